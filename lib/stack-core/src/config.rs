//! Stack configuration
//!
//! Every literal the provisioning units need lives here with a documented
//! default, so a stack can be composed from an empty file. Values are read
//! from YAML and validated once before composition.

use crate::{Result, StackError};
use ipnetwork::Ipv4Network;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::debug;

/// Root configuration, injected into composition
#[derive(Clone, Debug, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct StackConfig {
    /// Environment label used in every resource name
    #[serde(default = "default_environment")]
    pub environment: String,

    /// Account that owns the stack
    #[serde(default = "default_account_id")]
    pub account_id: String,

    #[serde(default = "default_region")]
    pub region: String,

    #[serde(default = "default_partition")]
    pub partition: String,

    #[serde(default)]
    pub network: NetworkConfig,

    #[serde(default)]
    pub cluster: ClusterConfig,

    #[serde(default)]
    pub addons: AddonsConfig,
}

#[derive(Clone, Debug, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct NetworkConfig {
    /// VPC address block, must be a /16
    #[serde(default = "default_cidr")]
    pub cidr: String,

    /// Availability zones to spread subnets across
    #[serde(default = "default_max_azs")]
    pub max_azs: u8,
}

#[derive(Clone, Debug, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct ClusterConfig {
    /// Kubernetes version (major.minor)
    #[serde(default = "default_kubernetes_version")]
    pub version: String,

    /// Static node count. Scaling beyond it is the autoscaler's job.
    #[serde(default = "default_capacity")]
    pub default_capacity: u32,

    /// Upper bound the autoscaler may grow the node group to
    #[serde(default = "default_max_capacity")]
    pub max_capacity: u32,

    #[serde(default = "default_instance_type")]
    pub instance_type: String,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct AddonsConfig {
    #[serde(default)]
    pub ingress: IngressConfig,
    #[serde(default)]
    pub observability: ObservabilityConfig,
    #[serde(default)]
    pub secrets: SecretsConfig,
    #[serde(default)]
    pub autoscaler: AutoscalerConfig,
}

#[derive(Clone, Debug, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct IngressConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,

    #[serde(default = "default_cert_manager_version")]
    pub cert_manager_version: String,

    #[serde(default = "default_lb_controller_version")]
    pub controller_version: String,

    /// Load balancer controller IAM policy. The bundled document is used when unset.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub policy_file: Option<PathBuf>,
}

#[derive(Clone, Debug, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct ObservabilityConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,

    #[serde(default = "default_fluent_bit_version")]
    pub fluent_bit_version: String,

    #[serde(default = "default_fluent_bit_image_tag")]
    pub fluent_bit_image_tag: String,

    #[serde(default = "default_prometheus_stack_version")]
    pub prometheus_stack_version: String,

    #[serde(default = "default_cloudwatch_metrics_version")]
    pub cloudwatch_metrics_version: String,
}

#[derive(Clone, Debug, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct SecretsConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,

    #[serde(default = "default_csi_driver_version")]
    pub driver_version: String,

    #[serde(default = "default_csi_provider_version")]
    pub provider_version: String,

    /// Compose the secrets mount self-test
    #[serde(default)]
    pub self_test: bool,
}

#[derive(Clone, Debug, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct AutoscalerConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,

    #[serde(default = "default_autoscaler_version")]
    pub chart_version: String,

    #[serde(default = "default_autoscaler_replicas")]
    pub replicas: u32,
}

impl StackConfig {
    /// Load a YAML configuration file
    pub fn load(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        let config = Self::from_yaml(&contents)?;
        debug!("Loaded stack configuration from {}", path.display());
        Ok(config)
    }

    pub fn from_yaml(contents: &str) -> Result<Self> {
        // An empty file means "all defaults"
        if contents.trim().is_empty() {
            return Ok(Self::default());
        }
        Ok(serde_yaml::from_str(contents)?)
    }

    /// Check every value composition relies on
    pub fn validate(&self) -> Result<()> {
        let env = &self.environment;
        if env.is_empty()
            || env.len() > 20
            || !env.chars().all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-')
            || env.starts_with('-')
        {
            return Err(invalid(format!(
                "environment {:?} must be 1-20 lowercase alphanumerics or '-'",
                env
            )));
        }

        if self.account_id.len() != 12 || !self.account_id.chars().all(|c| c.is_ascii_digit()) {
            return Err(invalid(format!("accountId {:?} must be 12 digits", self.account_id)));
        }

        if self.region.is_empty() {
            return Err(invalid("region must be set"));
        }

        let cidr = self.network.cidr()?;
        if cidr.prefix() != 16 {
            return Err(invalid(format!("network cidr {} must be a /16", cidr)));
        }

        if !(1..=6).contains(&self.network.max_azs) {
            return Err(invalid(format!(
                "network maxAzs {} must be between 1 and 6",
                self.network.max_azs
            )));
        }

        let mut parts = self.cluster.version.split('.');
        let version_ok = matches!(
            (parts.next(), parts.next(), parts.next()),
            (Some(major), Some(minor), None)
                if major.parse::<u8>().is_ok() && minor.parse::<u8>().is_ok()
        );
        if !version_ok {
            return Err(invalid(format!(
                "cluster version {:?} must be major.minor",
                self.cluster.version
            )));
        }

        if self.cluster.default_capacity == 0 {
            return Err(invalid("cluster defaultCapacity must be at least 1"));
        }

        if self.cluster.max_capacity < self.cluster.default_capacity {
            return Err(invalid(format!(
                "cluster maxCapacity {} is below defaultCapacity {}",
                self.cluster.max_capacity, self.cluster.default_capacity
            )));
        }

        if self.addons.autoscaler.replicas == 0 {
            return Err(invalid("autoscaler replicas must be at least 1"));
        }

        Ok(())
    }

    /// Name of the managed cluster
    pub fn cluster_name(&self) -> String {
        format!("{}-cluster", self.environment)
    }

    pub fn role_arn(&self, role_name: &str) -> String {
        format!("arn:{}:iam::{}:role/{}", self.partition, self.account_id, role_name)
    }

    pub fn cluster_arn(&self) -> String {
        format!(
            "arn:{}:eks:{}:{}:cluster/{}",
            self.partition,
            self.region,
            self.account_id,
            self.cluster_name()
        )
    }

    /// Account root principal
    pub fn account_root_arn(&self) -> String {
        format!("arn:{}:iam::{}:root", self.partition, self.account_id)
    }

    pub fn managed_policy_arn(&self, name: &str) -> String {
        format!("arn:{}:iam::aws:policy/{}", self.partition, name)
    }

    /// Availability zones, derived from the region
    pub fn availability_zones(&self) -> Vec<String> {
        (b'a'..)
            .take(self.network.max_azs as usize)
            .map(|letter| format!("{}{}", self.region, letter as char))
            .collect()
    }

    /// True if the account id is still the built-in placeholder
    pub fn has_placeholder_account(&self) -> bool {
        self.account_id == default_account_id()
    }
}

impl NetworkConfig {
    pub fn cidr(&self) -> Result<Ipv4Network> {
        Ok(self.cidr.parse::<Ipv4Network>()?)
    }
}

impl Default for StackConfig {
    fn default() -> Self {
        Self {
            environment: default_environment(),
            account_id: default_account_id(),
            region: default_region(),
            partition: default_partition(),
            network: NetworkConfig::default(),
            cluster: ClusterConfig::default(),
            addons: AddonsConfig::default(),
        }
    }
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            cidr: default_cidr(),
            max_azs: default_max_azs(),
        }
    }
}

impl Default for ClusterConfig {
    fn default() -> Self {
        Self {
            version: default_kubernetes_version(),
            default_capacity: default_capacity(),
            max_capacity: default_max_capacity(),
            instance_type: default_instance_type(),
        }
    }
}

impl Default for IngressConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            cert_manager_version: default_cert_manager_version(),
            controller_version: default_lb_controller_version(),
            policy_file: None,
        }
    }
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            fluent_bit_version: default_fluent_bit_version(),
            fluent_bit_image_tag: default_fluent_bit_image_tag(),
            prometheus_stack_version: default_prometheus_stack_version(),
            cloudwatch_metrics_version: default_cloudwatch_metrics_version(),
        }
    }
}

impl Default for SecretsConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            driver_version: default_csi_driver_version(),
            provider_version: default_csi_provider_version(),
            self_test: false,
        }
    }
}

impl Default for AutoscalerConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            chart_version: default_autoscaler_version(),
            replicas: default_autoscaler_replicas(),
        }
    }
}

fn invalid(message: impl Into<String>) -> StackError {
    StackError::InvalidConfiguration(message.into())
}

fn default_true() -> bool {
    true
}

fn default_environment() -> String {
    "dev".to_string()
}

fn default_account_id() -> String {
    "000000000000".to_string()
}

fn default_region() -> String {
    "us-east-1".to_string()
}

fn default_partition() -> String {
    "aws".to_string()
}

fn default_cidr() -> String {
    "10.124.0.0/16".to_string()
}

fn default_max_azs() -> u8 {
    3
}

fn default_kubernetes_version() -> String {
    "1.21".to_string()
}

fn default_capacity() -> u32 {
    2
}

fn default_max_capacity() -> u32 {
    6
}

fn default_instance_type() -> String {
    "m5.large".to_string()
}

fn default_cert_manager_version() -> String {
    "v1.6.1".to_string()
}

fn default_lb_controller_version() -> String {
    "1.3.3".to_string()
}

fn default_fluent_bit_version() -> String {
    "0.1.11".to_string()
}

fn default_fluent_bit_image_tag() -> String {
    "2.21.5".to_string()
}

fn default_prometheus_stack_version() -> String {
    "24.0.1".to_string()
}

fn default_cloudwatch_metrics_version() -> String {
    "0.0.6".to_string()
}

fn default_csi_driver_version() -> String {
    "1.0.0".to_string()
}

fn default_csi_provider_version() -> String {
    "0.0.1".to_string()
}

fn default_autoscaler_version() -> String {
    "9.10.9".to_string()
}

fn default_autoscaler_replicas() -> u32 {
    2
}
