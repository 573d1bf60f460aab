//! Where cluster workloads are applied

use crate::Result;
use stack_api::{ChartInstallation, ClusterObject, ClusterWorkload};

/// A running cluster, or a stand-in for one
#[async_trait::async_trait]
pub trait ClusterTarget: Send + Sync {
    /// Target name (for logging)
    fn name(&self) -> &'static str;

    /// Create or update a raw object
    async fn apply_object(&self, object: &ClusterObject) -> Result<()>;

    /// Install or upgrade a chart release
    async fn install_chart(&self, chart: &ChartInstallation) -> Result<()>;
}

/// Something that knows how to put itself onto a [`ClusterTarget`]
#[async_trait::async_trait]
pub trait ApplyToCluster {
    async fn apply_to(&self, target: &dyn ClusterTarget) -> Result<()>;
}

#[async_trait::async_trait]
impl ApplyToCluster for ClusterWorkload {
    async fn apply_to(&self, target: &dyn ClusterTarget) -> Result<()> {
        match self {
            ClusterWorkload::Object(object) => target.apply_object(object).await,
            ClusterWorkload::Chart(chart) => target.install_chart(chart).await,
        }
    }
}
