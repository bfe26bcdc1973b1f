use thiserror::Error;

pub type Result<T> = std::result::Result<T, CoreError>;

#[derive(Error, Debug)]
pub enum CoreError {
    #[error("Invalid extended route spec in configmap {configmap}: {reason}")]
    ConfigFormat { configmap: String, reason: String },

    #[error("Extended route spec not available for RouteGroup/Namespace: {0}")]
    MissingSpec(String),

    #[error("Error while processing port for route {route}: {reason}")]
    PortResolution { route: String, reason: String },

    #[error("Failed to create LTM rules for route {route}: {reason}")]
    RuleCompilation { route: String, reason: String },

    #[error("Failed to attach TLS profiles for route {route}: {reason}")]
    TlsAttachment { route: String, reason: String },

    #[error("Kubernetes error: {0}")]
    KubernetesError(#[from] kube::error::Error),
}

impl CoreError {
    /// Whether re-queueing the work item can change the outcome.
    /// Lookups against caches that are still filling can; a malformed
    /// document or a group without an extended spec cannot. The latter is
    /// resynthesized when its spec arrives.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            CoreError::PortResolution { .. }
                | CoreError::TlsAttachment { .. }
                | CoreError::KubernetesError(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_errors_are_terminal() {
        let err = CoreError::ConfigFormat {
            configmap: "kube-system/global".to_string(),
            reason: "bad yaml".to_string(),
        };
        assert!(!err.is_retryable());
        assert!(err.to_string().contains("kube-system/global"));
    }

    #[test]
    fn test_missing_spec_is_terminal() {
        assert!(!CoreError::MissingSpec("ns1".to_string()).is_retryable());
    }

    #[test]
    fn test_lookup_errors_are_retryable() {
        assert!(CoreError::TlsAttachment {
            route: "r1".to_string(),
            reason: "no client profile".to_string(),
        }
        .is_retryable());
        assert!(CoreError::PortResolution {
            route: "r1".to_string(),
            reason: "no such port".to_string(),
        }
        .is_retryable());
    }
}
