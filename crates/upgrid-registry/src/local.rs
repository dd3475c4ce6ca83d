//! LocalRegistry — a service registry backed by the embedded state store.
//!
//! Implements [`ServiceClient`] and [`LinkResolver`] on a [`StateStore`].
//! There is no container runtime behind it: scaling a service records
//! instance entries, spread across the service's hosts least-loaded
//! first, and new instances are recorded `healthy`. An external
//! controller can overwrite health through [`LocalRegistry::set_instance_health`].

use std::collections::HashMap;
use std::time::{SystemTime, UNIX_EPOCH};

use tracing::{debug, info};

use upgrid_state::*;

use crate::client::ServiceClient;
use crate::error::{ClientError, ClientResult};
use crate::links::{LinkResolver, repoint_links};

/// Host ID used for services with no configured hosts.
const DEFAULT_HOST: &str = "local";

/// A registry whose services live in a [`StateStore`].
#[derive(Clone)]
pub struct LocalRegistry {
    state: StateStore,
}

impl LocalRegistry {
    pub fn new(state: StateStore) -> Self {
        Self { state }
    }

    /// The underlying state store.
    pub fn state(&self) -> &StateStore {
        &self.state
    }

    /// Register a new service and start `spec.scale` instances for it.
    pub fn create_service(&self, mut spec: ServiceSpec) -> ClientResult<ServiceSpec> {
        if self.state.get_service(&spec.name)?.is_some() {
            return Err(ClientError::AlreadyExists(spec.name));
        }
        let now = epoch_secs();
        spec.created_at = now;
        spec.updated_at = now;
        let scale = spec.scale;
        spec.scale = 0;
        self.state.put_service(&spec)?;
        info!(service = %spec.name, image = %spec.image, "service created");
        self.apply_scale(&spec.name, scale)
    }

    /// Register (or update) a host.
    pub fn add_host(&self, id: &str, address: &str) -> ClientResult<HostInfo> {
        let cached_images = self
            .state
            .get_host(id)?
            .map(|h| h.cached_images)
            .unwrap_or_default();
        let host = HostInfo {
            id: id.to_string(),
            address: address.to_string(),
            cached_images,
            updated_at: epoch_secs(),
        };
        self.state.put_host(&host)?;
        Ok(host)
    }

    /// List all registered services, sorted by name.
    pub fn list_services(&self) -> ClientResult<Vec<ServiceSpec>> {
        let mut services = self.state.list_services()?;
        services.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(services)
    }

    /// Overwrite the health of one instance.
    pub fn set_instance_health(&self, instance_id: &str, health: HealthStatus) -> ClientResult<()> {
        let mut instance = self
            .state
            .find_instance(instance_id)?
            .ok_or_else(|| ClientError::InstanceNotFound(instance_id.to_string()))?;
        instance.health = health;
        instance.updated_at = epoch_secs();
        self.state.put_instance(&instance)?;
        debug!(%instance_id, ?health, "instance health updated");
        Ok(())
    }

    fn require_service(&self, name: &str) -> ClientResult<ServiceSpec> {
        self.state
            .get_service(name)?
            .ok_or_else(|| ClientError::ServiceNotFound(name.to_string()))
    }

    /// Instances of a service ordered by their numeric index.
    fn sorted_instances(&self, service: &str) -> ClientResult<Vec<InstanceState>> {
        let mut instances = self.state.list_instances_for_service(service)?;
        instances.sort_by_key(|i| instance_index(&i.id));
        Ok(instances)
    }

    /// Converge the recorded instances of a service onto `target`.
    fn apply_scale(&self, name: &str, target: u32) -> ClientResult<ServiceSpec> {
        let mut spec = self.require_service(name)?;
        let mut instances = self.sorted_instances(name)?;
        let current = instances.len() as u32;
        let now = epoch_secs();

        if target > current {
            let mut next_index = instances
                .last()
                .and_then(|i| instance_index(&i.id))
                .map_or(0, |i| i + 1);
            let mut load = host_load(&spec, &instances);
            for _ in current..target {
                let host_id = least_loaded(&spec, &load);
                *load.entry(host_id.clone()).or_default() += 1;
                let instance = InstanceState {
                    id: format!("{name}-{next_index}"),
                    service: name.to_string(),
                    host_id,
                    health: HealthStatus::Healthy,
                    started_at: now,
                    updated_at: now,
                };
                self.state.put_instance(&instance)?;
                instances.push(instance);
                next_index += 1;
            }
        } else if target < current {
            // Newest instances go first.
            for instance in instances.drain(target as usize..).rev() {
                self.state.delete_instance(&instance.table_key())?;
            }
        }

        if spec.scale != target {
            debug!(service = %name, from = spec.scale, to = target, "service scaled");
        }
        spec.scale = target;
        spec.updated_at = now;
        self.state.put_service(&spec)?;
        Ok(spec)
    }
}

impl ServiceClient for LocalRegistry {
    async fn get_service(&self, name: &str) -> ClientResult<ServiceSpec> {
        self.require_service(name)
    }

    async fn scale_service(&self, name: &str, scale: u32) -> ClientResult<ServiceSpec> {
        self.apply_scale(name, scale)
    }

    async fn delete_service(&self, name: &str) -> ClientResult<()> {
        if !self.state.delete_service(name)? {
            return Err(ClientError::ServiceNotFound(name.to_string()));
        }
        let removed = self.state.delete_instances_for_service(name)?;
        info!(service = %name, instances_removed = removed, "service deleted");
        Ok(())
    }

    async fn pull_image(&self, service: &str, host_id: &str) -> ClientResult<()> {
        let spec = self.require_service(service)?;
        let mut host = self
            .state
            .get_host(host_id)?
            .ok_or_else(|| ClientError::HostNotFound(host_id.to_string()))?;
        if !host.cached_images.contains(&spec.image) {
            host.cached_images.push(spec.image.clone());
            host.updated_at = epoch_secs();
            self.state.put_host(&host)?;
        }
        debug!(%service, %host_id, image = %spec.image, "image pulled");
        Ok(())
    }

    async fn list_instances(&self, service: &str) -> ClientResult<Vec<InstanceState>> {
        self.require_service(service)?;
        self.sorted_instances(service)
    }

    async fn get_instance_health(&self, instance_id: &str) -> ClientResult<HealthStatus> {
        self.state
            .find_instance(instance_id)?
            .map(|i| i.health)
            .ok_or_else(|| ClientError::InstanceNotFound(instance_id.to_string()))
    }

    async fn load_upgrade(&self, from: &str, to: &str) -> ClientResult<Option<UpgradeRecord>> {
        Ok(self.state.get_upgrade(from, to)?)
    }

    async fn save_upgrade(&self, record: &UpgradeRecord) -> ClientResult<()> {
        Ok(self.state.put_upgrade(record)?)
    }
}

impl LinkResolver for LocalRegistry {
    async fn rewire_links(&self, old: &str, new: &str) -> ClientResult<Vec<ServiceName>> {
        let mut rewired = Vec::new();
        for mut spec in self.list_services()? {
            if repoint_links(&mut spec, old, new) {
                spec.updated_at = epoch_secs();
                self.state.put_service(&spec)?;
                rewired.push(spec.name);
            }
        }
        if !rewired.is_empty() {
            info!(%old, %new, services = ?rewired, "links rewired");
        }
        Ok(rewired)
    }
}

/// Numeric suffix of an instance ID (`web-3` → 3).
fn instance_index(id: &str) -> Option<u32> {
    id.rsplit('-').next()?.parse().ok()
}

/// Instance count per host for a service.
fn host_load(spec: &ServiceSpec, instances: &[InstanceState]) -> HashMap<HostId, u32> {
    let mut load: HashMap<HostId, u32> = spec.hosts.iter().map(|h| (h.clone(), 0)).collect();
    for instance in instances {
        *load.entry(instance.host_id.clone()).or_default() += 1;
    }
    load
}

/// Pick the configured host with the fewest instances (first wins ties).
fn least_loaded(spec: &ServiceSpec, load: &HashMap<HostId, u32>) -> HostId {
    spec.hosts
        .iter()
        .min_by_key(|h| load.get(*h).copied().unwrap_or(0))
        .cloned()
        .unwrap_or_else(|| DEFAULT_HOST.to_string())
}

/// Current Unix epoch in seconds.
fn epoch_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn registry() -> LocalRegistry {
        LocalRegistry::new(StateStore::open_in_memory().unwrap())
    }

    fn spec(name: &str, scale: u32, hosts: &[&str], links: &[&str]) -> ServiceSpec {
        ServiceSpec {
            name: name.to_string(),
            image: format!("registry.local/{name}:1"),
            scale,
            hosts: hosts.iter().map(|h| h.to_string()).collect(),
            links: links.iter().map(|l| l.to_string()).collect(),
            created_at: 0,
            updated_at: 0,
        }
    }

    #[tokio::test]
    async fn create_starts_instances() {
        let reg = registry();
        let created = reg.create_service(spec("web", 3, &[], &[])).unwrap();
        assert_eq!(created.scale, 3);

        let instances = reg.list_instances("web").await.unwrap();
        let ids: Vec<_> = instances.iter().map(|i| i.id.as_str()).collect();
        assert_eq!(ids, vec!["web-0", "web-1", "web-2"]);
        assert!(instances.iter().all(|i| i.host_id == DEFAULT_HOST));
    }

    #[tokio::test]
    async fn create_twice_is_rejected() {
        let reg = registry();
        reg.create_service(spec("web", 1, &[], &[])).unwrap();
        let err = reg.create_service(spec("web", 1, &[], &[])).unwrap_err();
        assert!(matches!(err, ClientError::AlreadyExists(_)));
    }

    #[tokio::test]
    async fn scale_up_spreads_over_hosts() {
        let reg = registry();
        reg.create_service(spec("web", 1, &["h1", "h2"], &[])).unwrap();
        reg.scale_service("web", 4).await.unwrap();

        let instances = reg.list_instances("web").await.unwrap();
        let on_h1 = instances.iter().filter(|i| i.host_id == "h1").count();
        let on_h2 = instances.iter().filter(|i| i.host_id == "h2").count();
        assert_eq!((on_h1, on_h2), (2, 2));
    }

    #[tokio::test]
    async fn scale_down_removes_newest_first() {
        let reg = registry();
        reg.create_service(spec("web", 4, &[], &[])).unwrap();
        let scaled = reg.scale_service("web", 1).await.unwrap();
        assert_eq!(scaled.scale, 1);

        let instances = reg.list_instances("web").await.unwrap();
        assert_eq!(instances.len(), 1);
        assert_eq!(instances[0].id, "web-0");

        // Indices keep growing after a scale-down.
        reg.scale_service("web", 2).await.unwrap();
        let instances = reg.list_instances("web").await.unwrap();
        assert_eq!(instances[1].id, "web-1");
    }

    #[tokio::test]
    async fn scale_is_absolute_and_repeatable() {
        let reg = registry();
        reg.create_service(spec("web", 2, &[], &[])).unwrap();
        reg.scale_service("web", 5).await.unwrap();
        reg.scale_service("web", 5).await.unwrap();
        assert_eq!(reg.list_instances("web").await.unwrap().len(), 5);
    }

    #[tokio::test]
    async fn missing_service_is_not_found() {
        let reg = registry();
        let err = reg.get_service("ghost").await.unwrap_err();
        assert!(err.is_not_found());
        assert!(reg.scale_service("ghost", 1).await.unwrap_err().is_not_found());
        assert!(reg.delete_service("ghost").await.unwrap_err().is_not_found());
        assert!(reg.list_instances("ghost").await.unwrap_err().is_not_found());
    }

    #[tokio::test]
    async fn delete_removes_instances() {
        let reg = registry();
        reg.create_service(spec("web", 2, &[], &[])).unwrap();
        reg.delete_service("web").await.unwrap();

        assert!(reg.state().list_instances_for_service("web").unwrap().is_empty());
        assert!(reg.get_service("web").await.unwrap_err().is_not_found());
    }

    #[tokio::test]
    async fn instance_health_round_trip() {
        let reg = registry();
        reg.create_service(spec("web", 1, &[], &[])).unwrap();
        assert_eq!(
            reg.get_instance_health("web-0").await.unwrap(),
            HealthStatus::Healthy
        );

        reg.set_instance_health("web-0", HealthStatus::Unhealthy).unwrap();
        assert_eq!(
            reg.get_instance_health("web-0").await.unwrap(),
            HealthStatus::Unhealthy
        );
        assert!(matches!(
            reg.get_instance_health("web-7").await,
            Err(ClientError::InstanceNotFound(_))
        ));
    }

    #[tokio::test]
    async fn pull_caches_image_on_host() {
        let reg = registry();
        reg.add_host("h1", "10.0.0.1").unwrap();
        reg.create_service(spec("web", 0, &["h1"], &[])).unwrap();

        reg.pull_image("web", "h1").await.unwrap();
        reg.pull_image("web", "h1").await.unwrap();

        let host = reg.state().get_host("h1").unwrap().unwrap();
        assert_eq!(host.cached_images, vec!["registry.local/web:1"]);

        let err = reg.pull_image("web", "h9").await.unwrap_err();
        assert!(matches!(err, ClientError::HostNotFound(_)));
    }

    #[tokio::test]
    async fn rewire_repoints_dependents_once() {
        let reg = registry();
        reg.create_service(spec("web-v1", 1, &[], &[])).unwrap();
        reg.create_service(spec("web-v2", 0, &[], &[])).unwrap();
        reg.create_service(spec("lb", 1, &[], &["web-v1"])).unwrap();
        reg.create_service(spec("worker", 1, &[], &["db"])).unwrap();

        let rewired = reg.rewire_links("web-v1", "web-v2").await.unwrap();
        assert_eq!(rewired, vec!["lb"]);
        assert_eq!(reg.get_service("lb").await.unwrap().links, vec!["web-v2"]);
        assert_eq!(reg.get_service("worker").await.unwrap().links, vec!["db"]);

        assert!(reg.rewire_links("web-v1", "web-v2").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn upgrade_record_round_trip() {
        let reg = registry();
        assert!(reg.load_upgrade("a", "b").await.unwrap().is_none());

        let record = UpgradeRecord {
            from: "a".to_string(),
            to: "b".to_string(),
            source_scale: 2,
            final_scale: 2,
            completed_steps: 1,
            total_steps: 1,
            state: UpgradeState::AwaitingConfirmation,
            started_at: 1,
            updated_at: 2,
        };
        reg.save_upgrade(&record).await.unwrap();
        assert_eq!(reg.load_upgrade("a", "b").await.unwrap(), Some(record));
    }

    #[test]
    fn instance_index_parses_suffix() {
        assert_eq!(instance_index("web-v1-12"), Some(12));
        assert_eq!(instance_index("web"), None);
    }
}
