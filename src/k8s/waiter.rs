//! Waiting for the control plane to settle.

use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use k8s_openapi::api::core::v1::Pod;
use kube::Client;
use kube::api::{Api, ListParams};
use tracing::{debug, info};

use crate::error::KpuError;

const POLL_INTERVAL: Duration = Duration::from_secs(5);

/// Blocks until the cluster reaches a condition.
#[async_trait]
pub trait Waiter: Send + Sync {
    /// Wait until the API server answers requests.
    async fn wait_for_api(&self) -> Result<()>;

    /// Wait until at least one Pod matching `selector` is running.
    async fn wait_for_pods_with_label(&self, namespace: &str, selector: &str) -> Result<()>;
}

/// Polls the API server until a condition holds or the timeout expires.
#[derive(Clone)]
pub struct KubeWaiter {
    client: Client,
    timeout: Duration,
    interval: Duration,
}

impl KubeWaiter {
    pub fn new(client: Client, timeout: Duration) -> Self {
        Self {
            client,
            timeout,
            interval: POLL_INTERVAL,
        }
    }

    async fn poll<F, Fut>(&self, operation: String, mut check: F) -> Result<()>
    where
        F: FnMut() -> Fut + Send,
        Fut: std::future::Future<Output = bool> + Send,
    {
        let interval = self.interval;
        let polling = async {
            loop {
                if check().await {
                    return;
                }
                debug!("Still waiting for {}", operation);
                tokio::time::sleep(interval).await;
            }
        };

        tokio::time::timeout(self.timeout, polling)
            .await
            .map_err(|_| KpuError::Timeout {
                operation: operation.clone(),
                details: format!("gave up after {:?}", self.timeout),
            })?;
        Ok(())
    }
}

#[async_trait]
impl Waiter for KubeWaiter {
    async fn wait_for_api(&self) -> Result<()> {
        info!("Waiting for the API server to be healthy");
        let client = self.client.clone();
        self.poll("the API server".to_string(), || {
            let client = client.clone();
            async move { client.apiserver_version().await.is_ok() }
        })
        .await
    }

    async fn wait_for_pods_with_label(&self, namespace: &str, selector: &str) -> Result<()> {
        info!("Waiting for Pods with label {} in {}", selector, namespace);
        let api: Api<Pod> = Api::namespaced(self.client.clone(), namespace);
        let params = ListParams::default().labels(selector);
        self.poll(format!("Pods with label {selector}"), || {
            let api = api.clone();
            let params = params.clone();
            async move {
                api.list(&params).await.is_ok_and(|pods| {
                    pods.items.iter().any(|pod| {
                        pod.status.as_ref().and_then(|s| s.phase.as_deref()) == Some("Running")
                    })
                })
            }
        })
        .await
    }
}

/// Waiter for dry runs: reports what it would wait for and returns at once.
#[derive(Debug, Default, Clone, Copy)]
pub struct DryRunWaiter;

#[async_trait]
impl Waiter for DryRunWaiter {
    async fn wait_for_api(&self) -> Result<()> {
        info!("[dryrun] Would wait for the API server to be healthy");
        Ok(())
    }

    async fn wait_for_pods_with_label(&self, namespace: &str, selector: &str) -> Result<()> {
        info!(
            "[dryrun] Would wait for Pods with label {} in {} to be running",
            selector, namespace
        );
        Ok(())
    }
}
