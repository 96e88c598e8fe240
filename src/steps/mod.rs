//! The concrete provisioning steps and the standard registry.

pub mod credentials;
pub mod firewall;
pub mod jail;
pub mod packages;
pub mod proxy;
pub mod workload;

pub use credentials::CredentialsStep;
pub use firewall::FirewallStep;
pub use jail::JailStep;
pub use packages::PackagesStep;
pub use proxy::ProxyStep;
pub use workload::WorkloadStep;

use crate::engine::Registry;
use crate::error::ProvisionResult;

/// Every step of a full install, in execution order.
///
/// `workload` is passed in so callers choose how readiness is probed.
pub fn standard_registry(workload: WorkloadStep) -> ProvisionResult<Registry> {
    let mut registry = Registry::new();
    registry.register(PackagesStep)?;
    registry.register(FirewallStep)?;
    registry.register(workload)?;
    registry.register(CredentialsStep)?;
    registry.register(ProxyStep)?;
    registry.register(JailStep)?;
    Ok(registry)
}
