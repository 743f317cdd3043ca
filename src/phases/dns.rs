//! DNS migration: remove the DNS deployment the configuration no longer uses,
//! but only once its replacement is serving.

use anyhow::Result;
use tracing::{debug, info};

use crate::config::{ClusterConfiguration, Feature};
use crate::constants::{CORE_DNS, KUBE_DNS, NAMESPACE_SYSTEM};
use crate::error::{KpuError, is_not_found};
use crate::k8s::cluster::ClusterApi;
use crate::retry::{RetryPolicy, try_run_command};

/// The DNS deployment expected to run and the one to retire.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DnsSwap {
    pub installed: &'static str,
    pub stale: &'static str,
}

impl DnsSwap {
    /// Pick the pair from the CoreDNS gate. The two names always differ.
    pub fn for_config(cfg: &ClusterConfiguration) -> Self {
        if cfg.feature_enabled(Feature::CoreDns) {
            Self {
                installed: CORE_DNS,
                stale: KUBE_DNS,
            }
        } else {
            Self {
                installed: KUBE_DNS,
                stale: CORE_DNS,
            }
        }
    }
}

/// One attempt: check the installed deployment is ready, then delete the stale one.
async fn swap_once(cluster: &dyn ClusterApi, swap: DnsSwap) -> Result<()> {
    let readiness = cluster
        .deployment_readiness(NAMESPACE_SYSTEM, swap.installed)
        .await?;
    if readiness.ready_replicas == 0 {
        return Err(KpuError::DeploymentNotReady(swap.installed.to_string()).into());
    }

    match cluster
        .delete_deployment_foreground(NAMESPACE_SYSTEM, swap.stale)
        .await
    {
        Ok(()) => {
            info!("Removed stale DNS deployment {}", swap.stale);
            Ok(())
        }
        Err(e) if is_not_found(&e) => {
            debug!("Stale DNS deployment {} already absent", swap.stale);
            Ok(())
        }
        Err(e) => Err(e),
    }
}

/// Retry [`swap_once`] under `policy` until it succeeds or attempts run out.
pub async fn remove_stale_dns_deployment(
    cluster: &dyn ClusterApi,
    swap: DnsSwap,
    policy: RetryPolicy,
) -> Result<()> {
    try_run_command(policy, || swap_once(cluster, swap)).await
}
