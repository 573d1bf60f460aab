//! Core stack composition functionality
//!
//! This library provides:
//! - Stack configuration with documented defaults
//! - The stack plan registry that enforces declaration order
//! - Whole-plan validation of identities and network invariants
//! - Rendering of templates, manifests and chart releases

pub mod config;
pub mod error;
pub mod plan;
pub mod render;
pub mod validate;

pub use config::StackConfig;
pub use error::{Result, StackError};
pub use plan::{PlannedWorkload, StackPlan, UnitPlan};
pub use validate::{bind_identity, validate};
