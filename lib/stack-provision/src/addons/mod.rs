//! Cluster add-ons
//!
//! Each add-on is its own provisioning unit that depends on the cluster.
//! An add-on that needs another add-on's CRDs at apply time names that
//! add-on's unit as well; the remaining units are applied concurrently.

mod autoscaler;
mod ingress;
pub(crate) mod observability;
pub(crate) mod secrets;

pub use autoscaler::AutoscalerAddon;
pub use ingress::IngressAddon;
pub use observability::ObservabilityAddon;
pub use secrets::SecretsAddon;

use crate::cluster::ClusterHandle;
use stack_core::{Result, StackConfig, StackPlan};

/// A capability layered onto the cluster
pub trait Addon: Send + Sync {
    /// Unit name, unique within a stack
    fn name(&self) -> &'static str;

    /// Whether the configuration asks for this add-on
    fn enabled(&self, _config: &StackConfig) -> bool {
        true
    }

    /// Add-on units, besides the cluster, whose workloads must be applied
    /// before this one's. They must be composed earlier.
    fn depends_on(&self, _config: &StackConfig) -> Vec<&'static str> {
        Vec::new()
    }

    /// Declare the add-on's cloud resources and cluster workloads into the
    /// already opened unit named [`Addon::name`]
    fn provision(
        &self,
        plan: &mut StackPlan,
        config: &StackConfig,
        cluster: &ClusterHandle,
    ) -> Result<()>;
}

/// The add-ons every environment composes, in declaration order
pub fn default_addons() -> Vec<Box<dyn Addon>> {
    vec![
        Box::new(IngressAddon),
        Box::new(ObservabilityAddon),
        Box::new(SecretsAddon),
        Box::new(AutoscalerAddon),
    ]
}
