//! Post-upgrade task sequence.
//!
//! The steps run strictly in the order of [`STEPS`], one at a time. A failing
//! step never stops the run: its error is recorded and the next step starts.
//! The run ends with every failure reported together, in step order.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use tracing::{debug, info, warn};

use crate::config::{ClusterConfiguration, KubeVersion};
use crate::constants::{
    CERT_BACKUP_HORIZON, DNS_MIGRATION_ATTEMPTS, DNS_MIGRATION_INTERVAL, KUBELET_RUN_DIR,
    KUBERNETES_DIR, STATIC_POD_DIR,
};
use crate::error::{KpuError, is_not_found};
use crate::events::EventSink;
use crate::k8s::addons::AddonInstaller;
use crate::k8s::cluster::ClusterApi;
use crate::k8s::rbac::RbacRule;
use crate::k8s::selfhosting::SelfHostingConverter;
use crate::k8s::waiter::Waiter;
use crate::phases::kubelet::{KubeletDir, resolve_kubelet_dir};
use crate::phases::{Completion, certs, dns, selfhosting};
use crate::pki::CertIssuer;
use crate::retry::RetryPolicy;

/// Local directories touched by the run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Paths {
    pub kubelet_run_dir: PathBuf,
    pub static_pod_dir: PathBuf,
    pub kubernetes_dir: PathBuf,
    /// Parent of the temporary kubelet directory of a dry run.
    pub scratch_root: PathBuf,
}

impl Default for Paths {
    fn default() -> Self {
        Self {
            kubelet_run_dir: PathBuf::from(KUBELET_RUN_DIR),
            static_pod_dir: PathBuf::from(STATIC_POD_DIR),
            kubernetes_dir: PathBuf::from(KUBERNETES_DIR),
            scratch_root: std::env::temp_dir(),
        }
    }
}

/// Input of one run. Not mutated while the run is in progress.
pub struct UpgradeContext {
    pub config: ClusterConfiguration,
    pub target_version: KubeVersion,
    pub dry_run: bool,

    pub cluster: Arc<dyn ClusterApi>,
    pub addons: Arc<dyn AddonInstaller>,
    pub cert_issuer: Arc<dyn CertIssuer>,
    pub converter: Arc<dyn SelfHostingConverter>,
    /// Waiter for real runs; dry runs substitute a no-op one.
    pub waiter: Arc<dyn Waiter>,
    pub events: Arc<dyn EventSink>,

    pub paths: Paths,
    pub dns_retry: RetryPolicy,
    pub backup_horizon: Duration,
    pub clock: fn() -> DateTime<Utc>,
}

/// Collaborators a run talks to.
pub struct Collaborators {
    pub cluster: Arc<dyn ClusterApi>,
    pub addons: Arc<dyn AddonInstaller>,
    pub cert_issuer: Arc<dyn CertIssuer>,
    pub converter: Arc<dyn SelfHostingConverter>,
    pub waiter: Arc<dyn Waiter>,
    pub events: Arc<dyn EventSink>,
}

impl UpgradeContext {
    /// Context with the standard paths, retry policy, and backup horizon.
    pub fn new(
        config: ClusterConfiguration,
        target_version: KubeVersion,
        dry_run: bool,
        collaborators: Collaborators,
    ) -> Self {
        Self {
            config,
            target_version,
            dry_run,
            cluster: collaborators.cluster,
            addons: collaborators.addons,
            cert_issuer: collaborators.cert_issuer,
            converter: collaborators.converter,
            waiter: collaborators.waiter,
            events: collaborators.events,
            paths: Paths::default(),
            dns_retry: RetryPolicy::new(DNS_MIGRATION_ATTEMPTS, DNS_MIGRATION_INTERVAL),
            backup_horizon: CERT_BACKUP_HORIZON,
            clock: Utc::now,
        }
    }
}

/// Identity of a post-upgrade step.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step {
    UploadConfig,
    KubeletConfigMap,
    KubeletDir,
    KubeletConfigDownload,
    CriSocketAnnotation,
    Rbac(RbacRule),
    SelfHosting,
    ApiServerCert,
    DnsAddon,
    DnsMigration,
    ProxyAddon,
}

/// Decides whether a step error is expected and should not fail the run.
pub type TolerateFn = fn(&anyhow::Error, &UpgradeContext) -> bool;

/// One entry of the step table.
#[derive(Clone, Copy)]
pub struct StepDescriptor {
    pub step: Step,
    pub name: &'static str,
    pub tolerate: TolerateFn,
}

fn never(_: &anyhow::Error, _: &UpgradeContext) -> bool {
    false
}

/// Before the first upgrade the kubelet ConfigMap for the new version does not
/// exist yet, so a rehearsal cannot find it.
fn not_found_in_dry_run(err: &anyhow::Error, ctx: &UpgradeContext) -> bool {
    ctx.dry_run && is_not_found(err)
}

const fn strict(step: Step, name: &'static str) -> StepDescriptor {
    StepDescriptor {
        step,
        name,
        tolerate: never,
    }
}

/// Every post-upgrade step, in execution order.
pub const STEPS: &[StepDescriptor] = &[
    strict(Step::UploadConfig, "upload-config"),
    strict(Step::KubeletConfigMap, "kubelet-config-map"),
    strict(Step::KubeletDir, "kubelet-dir"),
    StepDescriptor {
        step: Step::KubeletConfigDownload,
        name: "kubelet-config-download",
        tolerate: not_found_in_dry_run,
    },
    strict(Step::CriSocketAnnotation, "cri-socket-annotation"),
    strict(
        Step::Rbac(RbacRule::BootstrapTokenPostCsr),
        "bootstrap-token-csr-rbac",
    ),
    strict(
        Step::Rbac(RbacRule::BootstrapTokenAutoApprove),
        "bootstrap-token-autoapprove-rbac",
    ),
    strict(
        Step::Rbac(RbacRule::NodeCertificateRotation),
        "node-cert-rotation-rbac",
    ),
    strict(Step::SelfHosting, "self-hosting"),
    strict(Step::Rbac(RbacRule::ClusterInfo), "cluster-info-rbac"),
    strict(Step::ApiServerCert, "apiserver-cert"),
    strict(Step::DnsAddon, "dns-addon"),
    strict(Step::DnsMigration, "dns-migration"),
    strict(Step::ProxyAddon, "proxy-addon"),
];

/// Result of one step.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StepOutcome {
    Succeeded,
    Skipped(String),
    /// Failed with an error the step tolerates.
    Tolerated(String),
    Failed(String),
}

impl StepOutcome {
    pub const fn label(&self) -> &'static str {
        match self {
            Self::Succeeded => "Succeeded",
            Self::Skipped(_) => "Skipped",
            Self::Tolerated(_) => "Tolerated",
            Self::Failed(_) => "Failed",
        }
    }

    pub fn detail(&self) -> &str {
        match self {
            Self::Succeeded => "",
            Self::Skipped(s) | Self::Tolerated(s) | Self::Failed(s) => s,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StepRecord {
    pub name: &'static str,
    pub outcome: StepOutcome,
}

/// Ordered failures of one run. Entries are only ever appended.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ErrorAggregate {
    errors: Vec<String>,
}

impl ErrorAggregate {
    pub fn push(&mut self, message: String) {
        self.errors.push(message);
    }

    pub fn is_empty(&self) -> bool {
        self.errors.is_empty()
    }

    pub fn messages(&self) -> &[String] {
        &self.errors
    }

    /// `Ok` when nothing failed, otherwise one error describing every failure.
    pub fn into_result(self) -> Result<(), KpuError> {
        if self.errors.is_empty() {
            Ok(())
        } else {
            Err(KpuError::PostUpgrade(self.errors))
        }
    }
}

/// What happened during one run.
#[derive(Debug, Clone, Default)]
pub struct RunReport {
    pub steps: Vec<StepRecord>,
    pub errors: ErrorAggregate,
}

impl RunReport {
    pub fn count(&self, label: &str) -> usize {
        self.steps
            .iter()
            .filter(|record| record.outcome.label() == label)
            .count()
    }

    pub fn into_result(self) -> Result<(), KpuError> {
        self.errors.into_result()
    }
}

/// State carried from one step to a later one.
#[derive(Default)]
struct RunState {
    kubelet_dir: Option<KubeletDir>,
}

/// Run every post-upgrade step and report the outcome of each.
pub async fn run(ctx: &UpgradeContext) -> RunReport {
    info!(
        "Running post-upgrade tasks for {} (dry_run={})",
        ctx.target_version, ctx.dry_run
    );

    let mut state = RunState::default();
    let mut report = RunReport::default();

    for descriptor in STEPS {
        debug!("Starting step {}", descriptor.name);
        let outcome = match execute(descriptor, ctx, &mut state).await {
            Ok(Completion::Done) => StepOutcome::Succeeded,
            Ok(Completion::Skipped(reason)) => {
                debug!("Skipped step {}: {}", descriptor.name, reason);
                StepOutcome::Skipped(reason)
            }
            Err(e) if (descriptor.tolerate)(&e, ctx) => {
                info!("Ignoring expected error in step {}: {:#}", descriptor.name, e);
                StepOutcome::Tolerated(format!("{e:#}"))
            }
            Err(e) => {
                let message = format!("{e:#}");
                let transient = e
                    .downcast_ref::<KpuError>()
                    .is_some_and(KpuError::is_transient);
                warn!(step = descriptor.name, transient, "Step failed: {}", message);
                report.errors.push(message.clone());
                StepOutcome::Failed(message)
            }
        };
        report.steps.push(StepRecord {
            name: descriptor.name,
            outcome,
        });
    }

    if let Some(dir) = state.kubelet_dir.take() {
        dir.cleanup();
    }

    report
}

/// Run every post-upgrade step, hand the report to `on_report`, and fail with
/// every step error in order if any step failed.
pub async fn perform_post_upgrade_tasks<F>(ctx: &UpgradeContext, on_report: F) -> Result<(), KpuError>
where
    F: FnOnce(&RunReport),
{
    let report = run(ctx).await;
    on_report(&report);
    report.into_result()
}

async fn execute(
    descriptor: &StepDescriptor,
    ctx: &UpgradeContext,
    state: &mut RunState,
) -> Result<Completion> {
    let cfg = &ctx.config;

    match descriptor.step {
        Step::UploadConfig => {
            ctx.cluster
                .upload_configuration(cfg)
                .await
                .context("error uploading configuration")?;
        }
        Step::KubeletConfigMap => {
            ctx.cluster
                .create_or_update_kubelet_config(cfg, &ctx.target_version)
                .await
                .context("error creating kubelet configuration ConfigMap")?;
        }
        Step::KubeletDir => {
            let dir = resolve_kubelet_dir(
                ctx.dry_run,
                &ctx.paths.kubelet_run_dir,
                &ctx.paths.scratch_root,
            )?;
            state.kubelet_dir = Some(dir);
        }
        Step::KubeletConfigDownload => {
            let Some(dir) = state.kubelet_dir.as_ref() else {
                return Ok(Completion::skipped("kubelet directory is unavailable"));
            };
            ctx.cluster
                .download_kubelet_config(&ctx.target_version, dir.path())
                .await
                .context("error downloading kubelet configuration from the ConfigMap")?;
        }
        Step::CriSocketAnnotation => {
            let node = &cfg.node_registration;
            ctx.cluster
                .annotate_node_cri_socket(&node.name, &node.cri_socket)
                .await
                .context("error uploading crisocket")?;
        }
        Step::Rbac(rule) => {
            ctx.cluster
                .ensure_rbac(rule)
                .await
                .with_context(|| format!("error creating RBAC rules {rule}"))?;
        }
        Step::SelfHosting => return selfhosting::maybe_convert(ctx, descriptor.name).await,
        Step::ApiServerCert => return certs::renew_apiserver_cert(ctx, descriptor.name).await,
        Step::DnsAddon => {
            ctx.addons
                .ensure_dns_addon(cfg)
                .await
                .context("error ensuring the DNS addon")?;
        }
        Step::DnsMigration => {
            if ctx.dry_run {
                return Ok(Completion::skipped("dry run"));
            }
            let swap = dns::DnsSwap::for_config(cfg);
            dns::remove_stale_dns_deployment(ctx.cluster.as_ref(), swap, ctx.dns_retry).await?;
        }
        Step::ProxyAddon => {
            ctx.addons
                .ensure_proxy_addon(cfg)
                .await
                .context("error ensuring the proxy addon")?;
        }
    }

    Ok(Completion::Done)
}
