//! Health gate — bounded polling until a service has enough healthy instances.

use std::time::Duration;

use tokio::time::Instant;
use tracing::{debug, info};

use upgrid_registry::ServiceClient;
use upgrid_state::HealthStatus;

use crate::error::{UpgradeError, UpgradeResult};
use crate::options::RetryPolicy;
use crate::retry::with_retry;

/// Poll `service` until at least `expected` of its instances are healthy.
///
/// Exceeding `timeout` is a [`UpgradeError::HealthGateTimeout`]. There is
/// no unbounded wait.
pub async fn wait_until_healthy<S: ServiceClient>(
    services: &S,
    retry: &RetryPolicy,
    service: &str,
    expected: u32,
    timeout: Duration,
    poll_interval: Duration,
) -> UpgradeResult<()> {
    if expected == 0 {
        return Ok(());
    }

    // A timeout too large to represent as an instant never expires.
    let deadline = Instant::now().checked_add(timeout);
    loop {
        let healthy = count_healthy(services, retry, service).await?;
        if healthy >= expected {
            info!(%service, healthy, expected, "health gate passed");
            return Ok(());
        }

        let pause = match deadline {
            Some(deadline) => {
                let now = Instant::now();
                if now >= deadline {
                    return Err(UpgradeError::HealthGateTimeout {
                        service: service.to_string(),
                        healthy,
                        expected,
                        timeout,
                    });
                }
                poll_interval.min(deadline - now)
            }
            None => poll_interval,
        };
        debug!(%service, healthy, expected, "waiting for instances to become healthy");
        tokio::time::sleep(pause).await;
    }
}

/// Number of currently healthy instances of `service`.
async fn count_healthy<S: ServiceClient>(
    services: &S,
    retry: &RetryPolicy,
    service: &str,
) -> UpgradeResult<u32> {
    let op = format!("list instances of {service}");
    let instances = with_retry(retry, &op, || services.list_instances(service)).await?;

    let mut healthy = 0;
    for instance in &instances {
        let op = format!("health of {}", instance.id);
        let health = with_retry(retry, &op, || services.get_instance_health(&instance.id)).await?;
        if health == HealthStatus::Healthy {
            healthy += 1;
        }
    }
    Ok(healthy)
}

#[cfg(test)]
mod tests {
    use upgrid_registry::LocalRegistry;
    use upgrid_state::{ServiceSpec, StateStore};

    use super::*;

    fn registry(scale: u32) -> LocalRegistry {
        let registry = LocalRegistry::new(StateStore::open_in_memory().unwrap());
        registry.add_host("h1", "").unwrap();
        registry
            .create_service(ServiceSpec {
                name: "web-v2".to_string(),
                image: "web:2".to_string(),
                scale,
                hosts: vec!["h1".to_string()],
                links: Vec::new(),
                created_at: 0,
                updated_at: 0,
            })
            .unwrap();
        registry
    }

    #[tokio::test]
    async fn nothing_expected_passes_immediately() {
        let registry = registry(0);
        wait_until_healthy(
            &registry,
            &RetryPolicy::immediate(1),
            "missing",
            0,
            Duration::ZERO,
            Duration::ZERO,
        )
        .await
        .unwrap();
    }

    #[tokio::test]
    async fn unbounded_timeout_still_passes() {
        let registry = registry(3);
        wait_until_healthy(
            &registry,
            &RetryPolicy::immediate(1),
            "web-v2",
            3,
            Duration::MAX,
            Duration::from_millis(10),
        )
        .await
        .unwrap();
    }

    #[tokio::test]
    async fn unhealthy_instance_times_out() {
        let registry = registry(2);
        registry
            .set_instance_health("web-v2-1", HealthStatus::Unhealthy)
            .unwrap();

        let err = wait_until_healthy(
            &registry,
            &RetryPolicy::immediate(1),
            "web-v2",
            2,
            Duration::ZERO,
            Duration::ZERO,
        )
        .await
        .unwrap_err();

        assert!(matches!(
            err,
            UpgradeError::HealthGateTimeout {
                healthy: 1,
                expected: 2,
                ..
            }
        ));
    }
}
