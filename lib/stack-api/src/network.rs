//! Virtual network resources
use crate::Token;
use serde::Serialize;

/// Isolated address space for cluster nodes
#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct VpcSpec {
    pub cidr_block: String,
    pub enable_dns_support: bool,
    pub enable_dns_hostnames: bool,
    pub tags: Vec<Tag>,
}

/// Internet gateway attached to a VPC, the egress path of public subnets
#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct InternetGatewaySpec {
    pub vpc_id: Token,
    pub tags: Vec<Tag>,
}

/// Subnet tier
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub enum SubnetTier {
    /// Routed directly to the internet gateway
    Public,
    /// Egress through the NAT gateway, no inbound route
    PrivateWithNat,
}

/// One subnet in one availability zone
#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct SubnetSpec {
    pub vpc_id: Token,
    pub cidr_block: String,
    pub availability_zone: String,
    pub map_public_ip_on_launch: bool,
    pub tier: SubnetTier,
    /// Target of the `0.0.0.0/0` route for this subnet
    pub default_route: Token,
    pub tags: Vec<Tag>,
}

#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct ElasticIpSpec {
    pub domain: String,
    pub tags: Vec<Tag>,
}

#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct NatGatewaySpec {
    pub subnet_id: Token,
    pub allocation_id: Token,
    pub tags: Vec<Tag>,
}

/// Resource tag
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct Tag {
    pub key: String,
    pub value: String,
}

impl Tag {
    pub fn new(key: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
        }
    }

    pub fn name(value: impl Into<String>) -> Self {
        Self::new("Name", value)
    }
}
