//! kpu - post-upgrade reconciliation for kubeadm-managed control planes.
//!
//! After the control plane binaries are upgraded, kpu brings the state that
//! depends on the version in line with it:
//! - Cluster and kubelet configuration ConfigMaps
//! - Node CRI socket annotation and bootstrap RBAC rules
//! - Optional self-hosted control plane conversion
//! - API server certificate renewal
//! - DNS and kube-proxy add-ons, including the kube-dns/CoreDNS swap

mod certs;
mod config;
mod constants;
mod error;
mod events;
mod k8s;
mod orchestrator;
mod output;
mod phases;
mod pki;
mod retry;
#[cfg(test)]
mod testing;
mod transaction;

use std::sync::Arc;

use anyhow::Result;
use clap::Parser;
use tracing::{error, info};

use config::{Args, COMMIT, Config, LogFormat, VERSION};
use constants::SELF_HOSTING_WAIT_TIMEOUT;
use events::TracingEventSink;
use k8s::addons::ManifestAddonInstaller;
use k8s::client::build_client;
use k8s::cluster::KubeCluster;
use k8s::selfhosting::KubeSelfHostingConverter;
use k8s::waiter::KubeWaiter;
use orchestrator::{Collaborators, UpgradeContext};
use pki::CommandCertIssuer;

#[tokio::main]
async fn main() {
    let args = Args::parse();

    if let Err(e) = init_tracing(&args.log_level, args.log_format) {
        eprintln!("Failed to initialize logging: {}", e);
        std::process::exit(1);
    }

    info!("Starting kpu v{} (commit: {})", VERSION, COMMIT);

    if let Err(e) = run(&args).await {
        error!("{:#}", e);
        std::process::exit(1);
    }
}

/// Main application logic.
async fn run(args: &Args) -> Result<()> {
    let config = Config::from_args(args)?;
    let client = build_client(config.kubeconfig.as_deref(), config.context.as_deref()).await?;
    info!("Connected to Kubernetes API server");

    let collaborators = Collaborators {
        cluster: Arc::new(KubeCluster::new(client.clone(), config.dry_run)),
        addons: Arc::new(ManifestAddonInstaller::new(
            client.clone(),
            config.addon_manifests.clone(),
            config.dry_run,
        )),
        cert_issuer: Arc::new(CommandCertIssuer::new(config.cert_issuer_command.clone())),
        converter: Arc::new(KubeSelfHostingConverter::new(client.clone())),
        waiter: Arc::new(KubeWaiter::new(client, SELF_HOSTING_WAIT_TIMEOUT)),
        events: Arc::new(TracingEventSink),
    };
    let ctx = UpgradeContext::new(
        config.cluster,
        config.target_version,
        config.dry_run,
        collaborators,
    );

    orchestrator::perform_post_upgrade_tasks(&ctx, |report| {
        output::print_report(report, ctx.dry_run);
    })
    .await?;

    info!("Post-upgrade tasks completed for {}", ctx.target_version);
    Ok(())
}

/// Initialize tracing subscriber. `RUST_LOG` takes precedence over `--log-level`.
fn init_tracing(log_level: &str, format: LogFormat) -> Result<()> {
    use tracing_subscriber::{EnvFilter, fmt};

    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(log_level))
        .map_err(|e| anyhow::anyhow!("Failed to initialize log filter: {}", e))?;

    match format {
        LogFormat::Json => fmt().with_env_filter(filter).json().with_target(true).init(),
        LogFormat::Text => fmt()
            .with_env_filter(filter)
            .with_target(false)
            .with_thread_ids(false)
            .with_file(false)
            .with_line_number(false)
            .init(),
    }

    Ok(())
}
