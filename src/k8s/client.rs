//! Kubernetes client builder with kubeconfig and context support.

use std::path::Path;

use anyhow::Result;
use kube::config::{KubeConfigOptions, Kubeconfig};
use tracing::debug;

use crate::constants::DEFAULT_KUBECONFIG;
use crate::error::KpuError;

/// Build a Kubernetes client.
///
/// An explicit kubeconfig wins; otherwise the admin kubeconfig of the control
/// plane node is used when present, falling back to the usual inference
/// (in-cluster, `~/.kube/config`).
pub async fn build_client(kubeconfig: Option<&Path>, context: Option<&str>) -> Result<kube::Client> {
    let options = KubeConfigOptions {
        context: context.map(String::from),
        ..Default::default()
    };

    let admin_conf = Path::new(DEFAULT_KUBECONFIG);
    let path = kubeconfig.or_else(|| admin_conf.exists().then_some(admin_conf));

    let config = match path {
        Some(path) => {
            debug!("Using kubeconfig {}", path.display());
            let kc = Kubeconfig::read_from(path)
                .map_err(|e| KpuError::Config(format!("kubeconfig {}: {e}", path.display())))?;
            kube::Config::from_custom_kubeconfig(kc, &options)
                .await
                .map_err(|e| KpuError::Config(format!("kubeconfig {}: {e}", path.display())))?
        }
        None if context.is_some() => {
            debug!("Using default kubeconfig with context {:?}", context);
            kube::Config::from_kubeconfig(&options)
                .await
                .map_err(|e| KpuError::Config(e.to_string()))?
        }
        None => {
            debug!("Inferring Kubernetes client configuration");
            kube::Config::infer()
                .await
                .map_err(|e| KpuError::Config(e.to_string()))?
        }
    };

    let client = kube::Client::try_from(config)
        .map_err(|e| KpuError::KubernetesApi(format!("failed to build client: {e}")))?;
    Ok(client)
}
