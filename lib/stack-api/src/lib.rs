//! Typed building blocks of an EKS stack plan
//!
//! This library defines the resources a stack plan is made of:
//! - Network: VPC, subnets, internet and NAT gateways
//! - Cluster: the managed control plane and its Fargate profile
//! - IAM: roles, inline policies and workload identities
//! - Charts and raw Kubernetes objects applied to the running cluster
//! - Tokens that reference attributes resolved at provisioning time

pub mod chart;
pub mod cluster;
pub mod iam;
pub mod manifest;
pub mod network;
pub mod resource;
pub mod ssm;
pub mod token;

pub use chart::ChartInstallation;
pub use iam::{PolicyDocument, PolicyStatement, ServiceAccountRef, WorkloadIdentity};
pub use manifest::{ClusterObject, ClusterWorkload};
pub use resource::{Resource, ResourceKind};
pub use token::{AttrRef, ResourceId, Token};
