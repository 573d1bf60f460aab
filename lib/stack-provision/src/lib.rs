//! Provisioning units for the EKS stack
//!
//! The network and cluster provisioners run first, then every enabled
//! add-on against the cluster handle. [`compose`] returns a validated
//! [`StackPlan`](stack_core::StackPlan).

pub mod addons;
pub mod cluster;
pub mod identity;
pub mod network;
pub mod orchestrator;
pub mod verification;

pub use addons::{default_addons, Addon};
pub use cluster::ClusterHandle;
pub use network::NetworkOutput;
pub use orchestrator::{compose, compose_with, compose_with_self_test};
