//! Chart installations (Helm releases) into the cluster
use crate::{ResourceId, ServiceAccountRef};
use serde::Serialize;
use serde_json::{Map, Value};

/// A request to deploy a packaged application into the cluster.
///
/// Installation is upgrade-or-install; reapplying the same release is
/// expected to be a no-op.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ChartInstallation {
    pub release: String,
    pub chart: String,
    pub repository: String,
    pub version: String,
    pub namespace: String,
    pub create_namespace: bool,

    /// Value overrides, passed to the installer as a values file
    pub values: Map<String, Value>,

    /// Service account the chart's workload runs as, whether the chart
    /// creates it or reuses an existing one
    #[serde(skip_serializing_if = "Option::is_none")]
    pub service_account: Option<ServiceAccountRef>,

    /// Role the chart's workload assumes through its service account
    #[serde(skip_serializing_if = "Option::is_none")]
    pub identity: Option<ResourceId>,
}

impl ChartInstallation {
    pub fn new(
        release: impl Into<String>,
        repository: impl Into<String>,
        version: impl Into<String>,
        namespace: impl Into<String>,
    ) -> Self {
        let release = release.into();
        Self {
            chart: release.clone(),
            release,
            repository: repository.into(),
            version: version.into(),
            namespace: namespace.into(),
            create_namespace: false,
            values: Map::new(),
            service_account: None,
            identity: None,
        }
    }

    /// Create the target namespace if it does not exist
    pub fn create_namespace(mut self) -> Self {
        self.create_namespace = true;
        self
    }

    /// Replace the value overrides, which must serialize to an object
    pub fn values<V: Serialize>(mut self, values: V) -> Result<Self, serde_json::Error> {
        self.values = serde_json::from_value(serde_json::to_value(values)?)?;
        Ok(self)
    }

    pub fn runs_as(mut self, service_account: ServiceAccountRef) -> Self {
        self.service_account = Some(service_account);
        self
    }
}
