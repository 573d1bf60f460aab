//! Applying stack plans to a running cluster
//!
//! Raw objects go through Kubernetes server-side apply, charts through the
//! helm CLI. [`Deployer`] drives a plan against any [`ClusterTarget`].

pub mod deployer;
pub mod dry_run;
pub mod error;
pub mod helm;
pub mod kube_target;
pub mod target;

pub use deployer::{DeployReport, Deployer, StepOutcome, StepReport};
pub use dry_run::DryRunTarget;
pub use error::{ApplyError, Result};
pub use helm::HelmCli;
pub use kube_target::{KubeTarget, FIELD_MANAGER};
pub use target::{ApplyToCluster, ClusterTarget};
