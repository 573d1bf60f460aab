use thiserror::Error;

pub type Result<T> = std::result::Result<T, ApplyError>;

#[derive(Error, Debug)]
pub enum ApplyError {
    #[error("Kubernetes error applying {object}: {source}")]
    Kubernetes {
        object: String,
        #[source]
        source: kube::Error,
    },

    #[error("Kubeconfig error: {0}")]
    Kubeconfig(#[from] kube::config::KubeconfigError),

    #[error("Helm release {release} failed: {message}")]
    Helm { release: String, message: String },

    #[error("Helm binary unavailable: {0}")]
    HelmUnavailable(#[source] std::io::Error),

    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),
}

impl ApplyError {
    /// Whether the error stops every unit, not just the failing step
    pub fn is_fatal(&self) -> bool {
        match self {
            ApplyError::Kubernetes { source, .. } => match source {
                kube::Error::Api(response) => matches!(response.code, 401 | 403),
                kube::Error::SerdeError(_) | kube::Error::BuildRequest(_) => false,
                _ => true,
            },
            ApplyError::Kubeconfig(_) | ApplyError::HelmUnavailable(_) => true,
            ApplyError::Unauthorized(_) => true,
            ApplyError::Helm { .. } | ApplyError::SerializationError(_) => false,
            ApplyError::Yaml(_) => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kube::core::ErrorResponse;

    fn api_error(code: u16) -> ApplyError {
        ApplyError::Kubernetes {
            object: "ServiceAccount kube-system/cluster-autoscaler".to_string(),
            source: kube::Error::Api(ErrorResponse {
                status: "Failure".to_string(),
                message: "denied".to_string(),
                reason: "Forbidden".to_string(),
                code,
            }),
        }
    }

    #[test]
    fn test_auth_failures_are_fatal() {
        assert!(api_error(401).is_fatal());
        assert!(api_error(403).is_fatal());
    }

    #[test]
    fn test_conflicts_and_invalid_objects_are_recoverable() {
        assert!(!api_error(409).is_fatal());
        assert!(!api_error(422).is_fatal());
        assert!(!ApplyError::Helm {
            release: "cert-manager".to_string(),
            message: "timed out waiting for the condition".to_string(),
        }
        .is_fatal());
    }

    #[test]
    fn test_missing_helm_is_fatal() {
        let err = ApplyError::HelmUnavailable(std::io::Error::from(std::io::ErrorKind::NotFound));
        assert!(err.is_fatal());
    }
}
