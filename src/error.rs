//! Custom error types for kpu.

use thiserror::Error;

/// Errors that can occur while reconciling a cluster after an upgrade.
#[derive(Error, Debug)]
pub enum KpuError {
    #[error("Kubernetes API error: {0}")]
    KubernetesApi(String),

    #[error("{kind} \"{name}\" not found")]
    NotFound { kind: String, name: String },

    #[error("the DNS deployment {0} isn't ready yet")]
    DeploymentNotReady(String),

    #[error("Certificate error: {0}")]
    Certificate(String),

    #[error("rolled back after a failed step (completed: [{completed}]). Got errors: {errors}")]
    Rollback { completed: String, errors: String },

    #[error("Invalid version format: {0}")]
    InvalidVersion(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Command `{command}` failed: {details}")]
    Command { command: String, details: String },

    #[error("Timeout waiting for {operation}: {details}")]
    Timeout { operation: String, details: String },

    #[error("{} post-upgrade step(s) failed: {}", .0.len(), format_aggregate(.0))]
    PostUpgrade(Vec<String>),
}

impl KpuError {
    /// Map a kube client error, turning HTTP 404 into [`KpuError::NotFound`].
    pub fn kube(kind: &str, name: &str, err: kube::Error) -> Self {
        match err {
            kube::Error::Api(ref resp) if resp.code == 404 => Self::NotFound {
                kind: kind.to_string(),
                name: name.to_string(),
            },
            other => Self::KubernetesApi(format!("{kind} {name}: {other}")),
        }
    }

    /// Returns true if this error is transient and worth retrying.
    pub const fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::KubernetesApi(_) | Self::DeploymentNotReady(_) | Self::Timeout { .. }
        )
    }
}

/// Returns true if the error chain carries a "not found" condition.
pub fn is_not_found(err: &anyhow::Error) -> bool {
    err.chain().any(|cause| {
        if let Some(KpuError::NotFound { .. }) = cause.downcast_ref::<KpuError>() {
            return true;
        }
        matches!(
            cause.downcast_ref::<kube::Error>(),
            Some(kube::Error::Api(resp)) if resp.code == 404
        )
    })
}

/// Format a list of messages the way an aggregate error prints them.
///
/// One message prints as itself, several as `[a, b, c]`.
pub fn format_aggregate(messages: &[String]) -> String {
    match messages {
        [] => String::new(),
        [single] => single.clone(),
        many => format!("[{}]", many.join(", ")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn api_error(code: u16) -> kube::Error {
        kube::Error::Api(kube::error::ErrorResponse {
            status: "Failure".to_string(),
            message: "boom".to_string(),
            reason: "NotFound".to_string(),
            code,
        })
    }

    #[test]
    fn test_error_display_not_found() {
        let err = KpuError::NotFound {
            kind: "ConfigMap".to_string(),
            name: "kubelet-config-1.11".to_string(),
        };
        assert_eq!(err.to_string(), "ConfigMap \"kubelet-config-1.11\" not found");
    }

    #[test]
    fn test_error_display_not_ready() {
        let err = KpuError::DeploymentNotReady("coredns".to_string());
        assert_eq!(
            err.to_string(),
            "the DNS deployment coredns isn't ready yet"
        );
    }

    #[test]
    fn test_kube_404_maps_to_not_found() {
        let err = KpuError::kube("Deployment", "kube-dns", api_error(404));
        assert!(matches!(err, KpuError::NotFound { .. }));
    }

    #[test]
    fn test_kube_other_maps_to_api_error() {
        let err = KpuError::kube("Deployment", "kube-dns", api_error(500));
        assert!(matches!(err, KpuError::KubernetesApi(_)));
        assert!(err.to_string().contains("Deployment kube-dns"));
    }

    #[test]
    fn test_is_not_found_through_context() {
        let err = anyhow::Error::from(KpuError::NotFound {
            kind: "ConfigMap".to_string(),
            name: "x".to_string(),
        })
        .context("error downloading kubelet configuration");
        assert!(is_not_found(&err));
    }

    #[test]
    fn test_is_not_found_raw_kube_error() {
        let err = anyhow::Error::from(api_error(404));
        assert!(is_not_found(&err));
        let err = anyhow::Error::from(api_error(409));
        assert!(!is_not_found(&err));
    }

    #[test]
    fn test_is_not_found_other_error() {
        let err = anyhow::anyhow!("connection refused");
        assert!(!is_not_found(&err));
    }

    #[test]
    fn test_format_aggregate() {
        assert_eq!(format_aggregate(&[]), "");
        assert_eq!(format_aggregate(&["a".to_string()]), "a");
        assert_eq!(
            format_aggregate(&["a".to_string(), "b".to_string()]),
            "[a, b]"
        );
    }

    #[test]
    fn test_post_upgrade_display() {
        let err = KpuError::PostUpgrade(vec!["first".to_string(), "second".to_string()]);
        assert_eq!(err.to_string(), "2 post-upgrade step(s) failed: [first, second]");
    }

    #[test]
    fn test_is_transient() {
        assert!(KpuError::KubernetesApi("x".into()).is_transient());
        assert!(KpuError::DeploymentNotReady("coredns".into()).is_transient());
        assert!(!KpuError::InvalidVersion("x".into()).is_transient());
    }
}
