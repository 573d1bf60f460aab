//! Managed cluster resources
use crate::network::Tag;
use crate::Token;
use serde::Serialize;

/// Attributes a provisioned cluster exports
pub mod attributes {
    pub const ARN: &str = "Arn";
    pub const ENDPOINT: &str = "Endpoint";
    pub const OIDC_ISSUER_URL: &str = "OpenIdConnectIssuerUrl";
}

/// Managed Kubernetes control plane
#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct ClusterSpec {
    pub name: String,
    pub version: String,
    pub resources_vpc_config: VpcConfig,
    /// Role mapped to `system:masters`
    pub masters_role_arn: Token,
    pub default_capacity: DefaultCapacity,
}

#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct VpcConfig {
    pub subnet_ids: Vec<Token>,
    pub endpoint_public_access: bool,
    pub endpoint_private_access: bool,
}

/// Managed node group created with the cluster. Its desired size is static;
/// only the autoscaler moves it between `min_size` and `max_size`.
#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct DefaultCapacity {
    pub instance_type: String,
    pub desired_size: u32,
    pub min_size: u32,
    pub max_size: u32,
    pub tags: Vec<Tag>,
}

/// Pods in selected namespaces run on serverless compute
#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct FargateProfileSpec {
    pub cluster_name: String,
    pub pod_execution_role_arn: Token,
    pub subnets: Vec<Token>,
    pub selectors: Vec<FargateSelector>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct FargateSelector {
    pub namespace: String,
}
