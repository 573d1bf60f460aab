//! Target that records workloads instead of applying them

use crate::{ClusterTarget, Result};
use stack_api::{ChartInstallation, ClusterObject};
use std::sync::Mutex;
use tracing::info;

#[derive(Default)]
pub struct DryRunTarget {
    applied: Mutex<Vec<String>>,
}

impl DryRunTarget {
    pub fn new() -> Self {
        Self::default()
    }

    /// Everything applied so far, in order
    pub fn applied(&self) -> Vec<String> {
        self.applied.lock().map(|a| a.clone()).unwrap_or_default()
    }

    fn record(&self, entry: String) {
        info!("[dry-run] {}", entry);
        if let Ok(mut applied) = self.applied.lock() {
            applied.push(entry);
        }
    }
}

#[async_trait::async_trait]
impl ClusterTarget for DryRunTarget {
    fn name(&self) -> &'static str {
        "dry-run"
    }

    async fn apply_object(&self, object: &ClusterObject) -> Result<()> {
        self.record(object.to_string());
        Ok(())
    }

    async fn install_chart(&self, chart: &ChartInstallation) -> Result<()> {
        // Values are rendered so that unserializable overrides still fail here
        serde_yaml::to_string(&chart.values)?;
        self.record(format!(
            "HelmRelease {}/{} ({}@{})",
            chart.namespace, chart.release, chart.chart, chart.version
        ));
        Ok(())
    }
}
