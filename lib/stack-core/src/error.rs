use stack_api::{ResourceId, ServiceAccountRef};
use thiserror::Error;

pub type Result<T> = std::result::Result<T, StackError>;

#[derive(Error, Debug)]
pub enum StackError {
    #[error("Duplicate resource: {0}")]
    DuplicateResource(ResourceId),

    #[error("Duplicate unit: {0}")]
    DuplicateUnit(String),

    #[error("Duplicate workload {key} in unit {unit}")]
    DuplicateWorkload { unit: String, key: String },

    #[error("Unknown unit: {0}")]
    UnknownUnit(String),

    #[error("{resource} depends on {dependency}, which has not been declared")]
    UnknownDependency { resource: String, dependency: String },

    #[error("Invalid resource id: {0}")]
    InvalidResourceId(String),

    #[error(
        "Identity {role} trusts service account {expected}, but {workload} runs as {actual}"
    )]
    ServiceAccountMismatch {
        role: String,
        expected: ServiceAccountRef,
        actual: String,
        workload: String,
    },

    #[error("Identity {role} trusts the issuer of {issuer_cluster}, but is bound to {cluster}")]
    IssuerMismatch {
        role: String,
        cluster: ResourceId,
        issuer_cluster: ResourceId,
    },

    #[error("Identity {role} is not bound to any workload running as {service_account}")]
    UnboundIdentity {
        role: String,
        service_account: ServiceAccountRef,
    },

    #[error("Invariant violated: {0}")]
    Invariant(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(String),

    #[error("Invalid policy document {name}: {source}")]
    InvalidPolicyDocument {
        name: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("Invalid CIDR: {0}")]
    Cidr(#[from] ipnetwork::IpNetworkError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),
}
