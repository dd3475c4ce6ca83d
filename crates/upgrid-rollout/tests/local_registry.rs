//! Full upgrade cycles against the redb-backed local registry.

use std::time::Duration;

use upgrid_registry::{LocalRegistry, ServiceClient};
use upgrid_rollout::{
    FinalScale, RetryPolicy, ServicePair, UpgradeError, UpgradeOptions, Upgrader,
};
use upgrid_state::{HealthStatus, ServiceSpec, StateStore, UpgradeState};

fn registry() -> LocalRegistry {
    let registry = LocalRegistry::new(StateStore::open_in_memory().unwrap());
    for host in ["h1", "h2"] {
        registry.add_host(host, "").unwrap();
    }
    registry
}

fn create(registry: &LocalRegistry, name: &str, image: &str, scale: u32, links: &[&str]) {
    registry
        .create_service(ServiceSpec {
            name: name.to_string(),
            image: image.to_string(),
            scale,
            hosts: vec!["h1".to_string(), "h2".to_string()],
            links: links.iter().map(|l| l.to_string()).collect(),
            created_at: 0,
            updated_at: 0,
        })
        .unwrap();
}

/// web-v1 at 4 instances, an empty web-v2, and lb linking to web-v1.
fn deployed() -> LocalRegistry {
    let registry = registry();
    create(&registry, "web-v1", "web:1", 4, &[]);
    create(&registry, "web-v2", "web:2", 0, &[]);
    create(&registry, "lb", "lb:1", 1, &["web-v1"]);
    registry
}

fn upgrader(registry: &LocalRegistry) -> Upgrader<LocalRegistry, LocalRegistry> {
    Upgrader::new(registry.clone(), registry.clone())
}

fn pair() -> ServicePair {
    ServicePair::new("web-v1", "web-v2").unwrap()
}

fn opts() -> UpgradeOptions {
    UpgradeOptions {
        interval: Duration::ZERO,
        poll_interval: Duration::ZERO,
        retry: RetryPolicy::immediate(2),
        ..Default::default()
    }
}

async fn scale_of(registry: &LocalRegistry, name: &str) -> u32 {
    registry.get_service(name).await.unwrap().scale
}

#[tokio::test]
async fn upgrade_then_confirm() {
    let registry = deployed();
    let upgrader = upgrader(&registry);

    let report = upgrader.upgrade(&pair(), &opts()).await.unwrap();
    assert_eq!(report.state, UpgradeState::AwaitingConfirmation);
    assert_eq!(report.steps_applied, 2);
    assert_eq!(scale_of(&registry, "web-v2").await, 4);
    assert_eq!(scale_of(&registry, "web-v1").await, 0);
    assert_eq!(
        registry.get_service("lb").await.unwrap().links,
        vec!["web-v2"]
    );
    assert_eq!(registry.list_instances("web-v2").await.unwrap().len(), 4);

    let confirm = UpgradeOptions {
        confirm_upgrade: true,
        ..opts()
    };
    let report = upgrader.upgrade(&pair(), &confirm).await.unwrap();
    assert_eq!(report.state, UpgradeState::Finalized);
    assert!(registry.get_service("web-v1").await.unwrap_err().is_not_found());

    // Confirming again finds nothing left to retire.
    let again = upgrader.upgrade(&pair(), &confirm).await.unwrap();
    assert_eq!(again.state, UpgradeState::Finalized);
}

#[tokio::test]
async fn upgrade_then_rollback() {
    let registry = deployed();
    let upgrader = upgrader(&registry);
    upgrader.upgrade(&pair(), &opts()).await.unwrap();

    let rollback = UpgradeOptions {
        rollback: true,
        ..opts()
    };
    let report = upgrader.upgrade(&pair(), &rollback).await.unwrap();

    assert_eq!(report.state, UpgradeState::RolledBack);
    assert_eq!(scale_of(&registry, "web-v1").await, 4);
    assert_eq!(scale_of(&registry, "web-v2").await, 0);
    assert_eq!(
        registry.get_service("lb").await.unwrap().links,
        vec!["web-v1"]
    );

    let record = registry.load_upgrade("web-v1", "web-v2").await.unwrap().unwrap();
    assert_eq!(record.state, UpgradeState::RolledBack);

    // A rolled-back upgrade cannot be confirmed.
    let confirm = UpgradeOptions {
        confirm_upgrade: true,
        ..opts()
    };
    assert!(matches!(
        upgrader.upgrade(&pair(), &confirm).await,
        Err(UpgradeError::InvalidTransition { .. })
    ));
}

#[tokio::test]
async fn cleanup_with_pull_and_growth() {
    let registry = deployed();
    let options = UpgradeOptions {
        final_scale: FinalScale::Exactly(6),
        pull: true,
        cleanup: true,
        ..opts()
    };

    let report = upgrader(&registry).upgrade(&pair(), &options).await.unwrap();

    assert_eq!(report.state, UpgradeState::Finalized);
    assert_eq!(report.steps_applied, 3);
    assert_eq!(report.hosts_pulled, vec!["h1", "h2"]);
    assert!(report.hosts_skipped.is_empty());
    assert_eq!(scale_of(&registry, "web-v2").await, 6);
    assert!(registry.get_service("web-v1").await.is_err());

    for host in ["h1", "h2"] {
        let cached = registry.state().get_host(host).unwrap().unwrap().cached_images;
        assert!(cached.contains(&"web:2".to_string()));
    }
}

#[tokio::test]
async fn pull_on_unregistered_host_is_skipped() {
    let registry = deployed();
    create(&registry, "api-v1", "api:1", 2, &[]);
    registry
        .create_service(ServiceSpec {
            name: "api-v2".to_string(),
            image: "api:2".to_string(),
            scale: 0,
            hosts: vec!["h1".to_string(), "h9".to_string()],
            links: Vec::new(),
            created_at: 0,
            updated_at: 0,
        })
        .unwrap();
    let options = UpgradeOptions {
        pull: true,
        ..opts()
    };

    let report = upgrader(&registry)
        .upgrade(&ServicePair::new("api-v1", "api-v2").unwrap(), &options)
        .await
        .unwrap();

    assert_eq!(report.hosts_pulled, vec!["h1", "h2"]);
    assert_eq!(report.hosts_skipped, vec!["h9"]);
    assert_eq!(report.state, UpgradeState::AwaitingConfirmation);
}

#[tokio::test]
async fn unhealthy_target_fails_health_gate() {
    let registry = deployed();
    // Occupy web-v2's first instance slot and mark it down before the run.
    registry.scale_service("web-v2", 1).await.unwrap();
    registry
        .set_instance_health("web-v2-0", HealthStatus::Unhealthy)
        .unwrap();
    let options = UpgradeOptions {
        health_gate: Some(Duration::ZERO),
        ..opts()
    };

    let err = upgrader(&registry).upgrade(&pair(), &options).await.unwrap_err();

    assert!(matches!(err, UpgradeError::Partial { completed: 0, .. }));
    assert_eq!(scale_of(&registry, "web-v1").await, 4);
    let record = registry.load_upgrade("web-v1", "web-v2").await.unwrap().unwrap();
    assert_eq!(record.state, UpgradeState::Aborted);
}

#[tokio::test]
async fn aborted_upgrade_rolls_back() {
    let registry = deployed();
    registry.scale_service("web-v2", 1).await.unwrap();
    registry
        .set_instance_health("web-v2-0", HealthStatus::Unhealthy)
        .unwrap();
    let upgrader = upgrader(&registry);
    let gated = UpgradeOptions {
        health_gate: Some(Duration::ZERO),
        ..opts()
    };
    upgrader.upgrade(&pair(), &gated).await.unwrap_err();
    assert!(scale_of(&registry, "web-v2").await > 0);

    let rollback = UpgradeOptions {
        rollback: true,
        ..opts()
    };
    let report = upgrader.upgrade(&pair(), &rollback).await.unwrap();

    assert_eq!(report.state, UpgradeState::RolledBack);
    assert_eq!(scale_of(&registry, "web-v1").await, 4);
    assert_eq!(scale_of(&registry, "web-v2").await, 0);
    let record = registry.load_upgrade("web-v1", "web-v2").await.unwrap().unwrap();
    assert_eq!(record.state, UpgradeState::RolledBack);
}

#[tokio::test]
async fn missing_target_is_terminal() {
    let registry = registry();
    create(&registry, "web-v1", "web:1", 2, &[]);

    let err = upgrader(&registry).upgrade(&pair(), &opts()).await.unwrap_err();

    assert!(matches!(err, UpgradeError::Terminal { .. }));
    assert_eq!(scale_of(&registry, "web-v1").await, 2);
    assert!(
        registry
            .load_upgrade("web-v1", "web-v2")
            .await
            .unwrap()
            .is_none()
    );
}
