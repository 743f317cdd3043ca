//! In-memory collaborators for exercising the post-upgrade steps.

use std::collections::{HashSet, VecDeque};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::{Result, bail};
use async_trait::async_trait;
use tempfile::TempDir;

use crate::config::{ClusterConfiguration, KubeVersion};
use crate::constants::{DNS_MIGRATION_ATTEMPTS, KUBELET_CONFIG_FILE};
use crate::error::KpuError;
use crate::events::{EventSink, UpgradeEvent};
use crate::k8s::addons::{AddonInstaller, dns_addon_name};
use crate::k8s::cluster::{ClusterApi, DeploymentReadiness, kubelet_config_map_name};
use crate::k8s::rbac::RbacRule;
use crate::k8s::selfhosting::SelfHostingConverter;
use crate::k8s::waiter::{DryRunWaiter, Waiter};
use crate::orchestrator::{Collaborators, Paths, UpgradeContext};
use crate::retry::RetryPolicy;

/// Cluster fake recording every call as `operation[:argument]`.
#[derive(Default)]
pub struct FakeCluster {
    calls: Mutex<Vec<String>>,
    failing: HashSet<&'static str>,
    kubelet_config_missing: bool,
    stale_missing: bool,
    ready_replicas: Mutex<VecDeque<i32>>,
    download_dirs: Mutex<Vec<PathBuf>>,
    self_hosted: Arc<AtomicBool>,
}

impl FakeCluster {
    /// Make `operation` fail on every call.
    pub fn failing(mut self, operation: &'static str) -> Self {
        self.failing.insert(operation);
        self
    }

    pub fn with_missing_kubelet_config(mut self) -> Self {
        self.kubelet_config_missing = true;
        self
    }

    pub fn with_missing_stale_deployment(mut self) -> Self {
        self.stale_missing = true;
        self
    }

    /// Ready replica counts returned by successive polls; the last one repeats.
    pub fn with_ready_replicas(self, counts: &[i32]) -> Self {
        *self.ready_replicas.lock().unwrap() = counts.iter().copied().collect();
        self
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    pub fn download_dirs(&self) -> Vec<PathBuf> {
        self.download_dirs.lock().unwrap().clone()
    }

    fn record(&self, operation: &'static str, argument: Option<&str>) -> Result<()> {
        let call = match argument {
            Some(arg) => format!("{operation}:{arg}"),
            None => operation.to_string(),
        };
        self.calls.lock().unwrap().push(call);
        if self.failing.contains(operation) {
            bail!("{operation} failed");
        }
        Ok(())
    }

    fn next_ready_replicas(&self) -> i32 {
        let mut queue = self.ready_replicas.lock().unwrap();
        if queue.len() > 1 {
            queue.pop_front().unwrap()
        } else {
            queue.front().copied().unwrap_or(1)
        }
    }
}

#[async_trait]
impl ClusterApi for FakeCluster {
    async fn upload_configuration(&self, _cfg: &ClusterConfiguration) -> Result<()> {
        self.record("upload_configuration", None)
    }

    async fn create_or_update_kubelet_config(
        &self,
        _cfg: &ClusterConfiguration,
        _version: &KubeVersion,
    ) -> Result<()> {
        self.record("create_or_update_kubelet_config", None)
    }

    async fn download_kubelet_config(&self, version: &KubeVersion, dest_dir: &Path) -> Result<()> {
        self.record("download_kubelet_config", None)?;
        self.download_dirs.lock().unwrap().push(dest_dir.to_path_buf());
        if self.kubelet_config_missing {
            return Err(KpuError::NotFound {
                kind: "ConfigMap".to_string(),
                name: kubelet_config_map_name(version),
            }
            .into());
        }
        std::fs::create_dir_all(dest_dir)?;
        std::fs::write(dest_dir.join(KUBELET_CONFIG_FILE), "kind: KubeletConfiguration\n")?;
        Ok(())
    }

    async fn annotate_node_cri_socket(&self, _node: &str, _cri_socket: &str) -> Result<()> {
        self.record("annotate_node_cri_socket", None)
    }

    async fn ensure_rbac(&self, rule: RbacRule) -> Result<()> {
        self.record("ensure_rbac", Some(rule.name()))
    }

    async fn deployment_readiness(
        &self,
        _namespace: &str,
        name: &str,
    ) -> Result<DeploymentReadiness> {
        self.record("deployment_readiness", Some(name))?;
        Ok(DeploymentReadiness {
            ready_replicas: self.next_ready_replicas(),
        })
    }

    async fn delete_deployment_foreground(&self, _namespace: &str, name: &str) -> Result<()> {
        self.record("delete_deployment_foreground", Some(name))?;
        if self.stale_missing {
            return Err(KpuError::NotFound {
                kind: "Deployment".to_string(),
                name: name.to_string(),
            }
            .into());
        }
        Ok(())
    }

    async fn is_self_hosted(&self) -> bool {
        self.calls.lock().unwrap().push("is_self_hosted".to_string());
        self.self_hosted.load(Ordering::SeqCst)
    }
}

#[derive(Default)]
pub struct FakeAddons {
    calls: Mutex<Vec<String>>,
    failing: Mutex<HashSet<String>>,
}

impl FakeAddons {
    /// Make the add-on recorded as `name` (`proxy` or `dns:<addon>`) fail.
    pub fn fail(&self, name: &str) {
        self.failing.lock().unwrap().insert(name.to_string());
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    fn record(&self, name: String) -> Result<()> {
        self.calls.lock().unwrap().push(name.clone());
        if self.failing.lock().unwrap().contains(&name) {
            bail!("applying {name} failed");
        }
        Ok(())
    }
}

#[async_trait]
impl AddonInstaller for FakeAddons {
    async fn ensure_dns_addon(&self, cfg: &ClusterConfiguration) -> Result<()> {
        self.record(format!("dns:{}", dns_addon_name(cfg)))
    }

    async fn ensure_proxy_addon(&self, _cfg: &ClusterConfiguration) -> Result<()> {
        self.record("proxy".to_string())
    }
}

#[derive(Default)]
pub struct FakeCertIssuer {
    calls: AtomicU32,
    fail: AtomicBool,
}

impl FakeCertIssuer {
    pub fn fail(&self) {
        self.fail.store(true, Ordering::SeqCst);
    }

    pub fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl crate::pki::CertIssuer for FakeCertIssuer {
    async fn create_apiserver_cert_and_key(&self, _cfg: &ClusterConfiguration) -> Result<()> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.fail.load(Ordering::SeqCst) {
            bail!("signing failed");
        }
        Ok(())
    }
}

/// Converter fake that marks the shared cluster state as self-hosted.
pub struct FakeConverter {
    calls: AtomicU32,
    dry_runs: Mutex<Vec<bool>>,
    fail: AtomicBool,
    self_hosted: Arc<AtomicBool>,
}

impl FakeConverter {
    fn new(self_hosted: Arc<AtomicBool>) -> Self {
        Self {
            calls: AtomicU32::new(0),
            dry_runs: Mutex::new(Vec::new()),
            fail: AtomicBool::new(false),
            self_hosted,
        }
    }

    pub fn fail_next(&self) {
        self.fail.store(true, Ordering::SeqCst);
    }

    pub fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn dry_runs(&self) -> Vec<bool> {
        self.dry_runs.lock().unwrap().clone()
    }
}

#[async_trait]
impl SelfHostingConverter for FakeConverter {
    async fn convert(
        &self,
        _static_pod_dir: &Path,
        _kubernetes_dir: &Path,
        _cfg: &ClusterConfiguration,
        waiter: &dyn Waiter,
        dry_run: bool,
    ) -> Result<()> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.dry_runs.lock().unwrap().push(dry_run);
        if self.fail.swap(false, Ordering::SeqCst) {
            bail!("conversion failed");
        }
        waiter.wait_for_api().await?;
        if !dry_run {
            self.self_hosted.store(true, Ordering::SeqCst);
        }
        Ok(())
    }
}

#[derive(Default)]
pub struct MemoryEventSink {
    events: Mutex<Vec<UpgradeEvent>>,
}

impl MemoryEventSink {
    pub fn events(&self) -> Vec<UpgradeEvent> {
        self.events.lock().unwrap().clone()
    }
}

impl EventSink for MemoryEventSink {
    fn emit(&self, event: UpgradeEvent) {
        self.events.lock().unwrap().push(event);
    }
}

/// Fakes wired into an [`UpgradeContext`] rooted in a temporary directory.
pub struct Harness {
    pub cluster: Arc<FakeCluster>,
    pub addons: Arc<FakeAddons>,
    pub cert_issuer: Arc<FakeCertIssuer>,
    pub converter: Arc<FakeConverter>,
    pub events: Arc<MemoryEventSink>,
    config: ClusterConfiguration,
    pub root: TempDir,
}

impl Harness {
    /// Harness whose configuration is a minimal node registration plus `extra_yaml`.
    pub fn new(extra_yaml: &str) -> Self {
        Self::with_cluster(extra_yaml, FakeCluster::default())
    }

    pub fn with_cluster(extra_yaml: &str, cluster: FakeCluster) -> Self {
        let root = TempDir::new().unwrap();
        let mut config = ClusterConfiguration::from_yaml(&format!(
            "nodeRegistration:\n  name: cp-1\n  criSocket: /var/run/dockershim.sock\n{extra_yaml}"
        ))
        .unwrap();
        config.certificates_dir = root.path().join("pki");
        std::fs::create_dir_all(&config.certificates_dir).unwrap();

        let converter = Arc::new(FakeConverter::new(cluster.self_hosted.clone()));
        Self {
            cluster: Arc::new(cluster),
            addons: Arc::new(FakeAddons::default()),
            cert_issuer: Arc::new(FakeCertIssuer::default()),
            converter,
            events: Arc::new(MemoryEventSink::default()),
            config,
            root,
        }
    }

    pub fn cert_dir(&self) -> &Path {
        &self.config.certificates_dir
    }

    pub fn context(&self, dry_run: bool) -> UpgradeContext {
        let collaborators = Collaborators {
            cluster: self.cluster.clone(),
            addons: self.addons.clone(),
            cert_issuer: self.cert_issuer.clone(),
            converter: self.converter.clone(),
            waiter: Arc::new(DryRunWaiter),
            events: self.events.clone(),
        };
        let mut ctx = UpgradeContext::new(
            self.config.clone(),
            KubeVersion::parse("v1.11.0").unwrap(),
            dry_run,
            collaborators,
        );
        ctx.paths = Paths {
            kubelet_run_dir: self.root.path().join("kubelet"),
            static_pod_dir: self.root.path().join("manifests"),
            kubernetes_dir: self.root.path().to_path_buf(),
            scratch_root: self.root.path().to_path_buf(),
        };
        ctx.dns_retry = RetryPolicy::new(DNS_MIGRATION_ATTEMPTS, Duration::from_millis(1));
        ctx
    }
}
