//! Cloud resources handed to the provisioning engine
use crate::cluster::{ClusterSpec, FargateProfileSpec};
use crate::iam::{OidcProviderSpec, PolicySpec, RoleSpec};
use crate::network::{ElasticIpSpec, InternetGatewaySpec, NatGatewaySpec, SubnetSpec, VpcSpec};
use crate::ssm::ParameterSpec;
use crate::ResourceId;
use serde::Serialize;
use std::collections::BTreeSet;

/// Properties of a cloud resource, one variant per resource type
#[derive(Clone, Debug, Serialize)]
#[serde(untagged)]
pub enum ResourceKind {
    Vpc(VpcSpec),
    InternetGateway(InternetGatewaySpec),
    Subnet(SubnetSpec),
    ElasticIp(ElasticIpSpec),
    NatGateway(NatGatewaySpec),
    Cluster(ClusterSpec),
    FargateProfile(FargateProfileSpec),
    OidcProvider(OidcProviderSpec),
    Role(RoleSpec),
    Policy(PolicySpec),
    Parameter(ParameterSpec),
}

impl ResourceKind {
    /// Template type name
    pub fn type_name(&self) -> &'static str {
        match self {
            ResourceKind::Vpc(_) => "AWS::EC2::VPC",
            ResourceKind::InternetGateway(_) => "AWS::EC2::InternetGateway",
            ResourceKind::Subnet(_) => "AWS::EC2::Subnet",
            ResourceKind::ElasticIp(_) => "AWS::EC2::EIP",
            ResourceKind::NatGateway(_) => "AWS::EC2::NatGateway",
            ResourceKind::Cluster(_) => "AWS::EKS::Cluster",
            ResourceKind::FargateProfile(_) => "AWS::EKS::FargateProfile",
            ResourceKind::OidcProvider(_) => "AWS::IAM::OIDCProvider",
            ResourceKind::Role(_) => "AWS::IAM::Role",
            ResourceKind::Policy(_) => "AWS::IAM::Policy",
            ResourceKind::Parameter(_) => "AWS::SSM::Parameter",
        }
    }
}

/// A resource in a stack plan
#[derive(Clone, Debug)]
pub struct Resource {
    pub id: ResourceId,
    /// Provisioning unit that declared this resource
    pub unit: String,
    pub kind: ResourceKind,
    pub depends_on: BTreeSet<ResourceId>,
}

impl Resource {
    pub fn as_role(&self) -> Option<&RoleSpec> {
        match &self.kind {
            ResourceKind::Role(role) => Some(role),
            _ => None,
        }
    }

    pub fn as_policy(&self) -> Option<&PolicySpec> {
        match &self.kind {
            ResourceKind::Policy(policy) => Some(policy),
            _ => None,
        }
    }

    pub fn as_cluster(&self) -> Option<&ClusterSpec> {
        match &self.kind {
            ResourceKind::Cluster(cluster) => Some(cluster),
            _ => None,
        }
    }

    pub fn as_oidc_provider(&self) -> Option<&OidcProviderSpec> {
        match &self.kind {
            ResourceKind::OidcProvider(provider) => Some(provider),
            _ => None,
        }
    }

    pub fn as_subnet(&self) -> Option<&SubnetSpec> {
        match &self.kind {
            ResourceKind::Subnet(subnet) => Some(subnet),
            _ => None,
        }
    }
}
