//! The service client contract.

use std::future::Future;

use upgrid_state::{HealthStatus, InstanceState, ServiceSpec, UpgradeRecord};

use crate::error::ClientResult;

/// Access to the orchestration platform's service registry.
///
/// Implementations signal failures through [`crate::ClientError`], whose
/// [`is_transient`](crate::ClientError::is_transient) decides whether the
/// caller may retry.
///
/// `scale_service` takes the absolute instance count rather than a delta,
/// so a retried request cannot be applied twice.
pub trait ServiceClient: Send + Sync {
    /// Look up a service by name.
    fn get_service(&self, name: &str) -> impl Future<Output = ClientResult<ServiceSpec>> + Send;

    /// Scale a service to exactly `scale` instances. Returns the updated spec.
    fn scale_service(
        &self,
        name: &str,
        scale: u32,
    ) -> impl Future<Output = ClientResult<ServiceSpec>> + Send;

    /// Delete a service and its instances.
    fn delete_service(&self, name: &str) -> impl Future<Output = ClientResult<()>> + Send;

    /// Pull the service's image onto one host.
    fn pull_image(
        &self,
        service: &str,
        host_id: &str,
    ) -> impl Future<Output = ClientResult<()>> + Send;

    /// List the running instances of a service.
    fn list_instances(
        &self,
        service: &str,
    ) -> impl Future<Output = ClientResult<Vec<InstanceState>>> + Send;

    /// Current health of one instance.
    fn get_instance_health(
        &self,
        instance_id: &str,
    ) -> impl Future<Output = ClientResult<HealthStatus>> + Send;

    /// Load the upgrade record of a `from` → `to` pair, if any.
    fn load_upgrade(
        &self,
        from: &str,
        to: &str,
    ) -> impl Future<Output = ClientResult<Option<UpgradeRecord>>> + Send;

    /// Insert or replace the upgrade record of a pair.
    fn save_upgrade(&self, record: &UpgradeRecord)
    -> impl Future<Output = ClientResult<()>> + Send;
}
