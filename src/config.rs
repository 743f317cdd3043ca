//! CLI configuration and argument parsing.

pub mod cluster;
pub mod version;

use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, ValueEnum};

use crate::constants::DEFAULT_ADDON_MANIFESTS_DIR;
use crate::error::KpuError;

pub use cluster::{ClusterConfiguration, Feature};
pub use version::KubeVersion;

pub const VERSION: &str = env!("CARGO_PKG_VERSION");
pub const COMMIT: &str = env!("BUILD_COMMIT");
pub const BUILD_DATE: &str = env!("BUILD_DATE");

/// Default command used to reissue the API server certificate and key.
const DEFAULT_CERT_ISSUER_COMMAND: &str = "kubeadm init phase certs apiserver";

/// Log output format.
#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Text,
    Json,
}

/// Post-upgrade reconciliation for kubeadm-managed control planes.
///
/// Brings configuration records, node annotations, RBAC rules, add-ons and
/// certificates in line with the version the control plane was upgraded to.
#[derive(Parser, Debug, Clone)]
#[command(name = "kpu")]
#[command(about = "Post-upgrade reconciliation for kubeadm-managed control planes")]
#[command(version = const_format::formatcp!(
    "{} (commit: {}, build date: {})",
    VERSION, COMMIT, BUILD_DATE
))]
pub struct Args {
    /// Cluster configuration file (YAML)
    #[arg(short, long, env = "KPU_CONFIG")]
    pub config: PathBuf,

    /// Kubernetes version the control plane was upgraded to (e.g., v1.11.0)
    #[arg(short, long)]
    pub target: String,

    /// Rehearse every step without mutating the cluster or local files
    #[arg(long, default_value = "false")]
    pub dry_run: bool,

    /// Kubeconfig file (defaults to KUBECONFIG or ~/.kube/config)
    #[arg(long, env = "KUBECONFIG")]
    pub kubeconfig: Option<PathBuf>,

    /// Kubeconfig context to use
    #[arg(long)]
    pub context: Option<String>,

    /// Directory holding add-on manifests (one sub-directory per add-on)
    #[arg(long, default_value = DEFAULT_ADDON_MANIFESTS_DIR, env = "KPU_ADDON_MANIFESTS")]
    pub addon_manifests: PathBuf,

    /// Command that reissues the API server certificate and key.
    /// Split on whitespace; quoting is not supported, so no argument may contain spaces
    #[arg(long, default_value = DEFAULT_CERT_ISSUER_COMMAND, env = "KPU_CERT_ISSUER_COMMAND")]
    pub cert_issuer_command: String,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info", env = "KPU_LOG_LEVEL")]
    pub log_level: String,

    /// Log format
    #[arg(long, value_enum, default_value = "text", env = "KPU_LOG_FORMAT")]
    pub log_format: LogFormat,
}

/// Application configuration derived from CLI args.
#[derive(Debug, Clone)]
pub struct Config {
    pub cluster: ClusterConfiguration,
    pub target_version: KubeVersion,
    pub dry_run: bool,
    pub kubeconfig: Option<PathBuf>,
    pub context: Option<String>,
    pub addon_manifests: PathBuf,
    pub cert_issuer_command: Vec<String>,
}

impl Config {
    /// Create config from CLI arguments, loading the cluster configuration file.
    pub fn from_args(args: &Args) -> Result<Self> {
        let cluster = ClusterConfiguration::load(&args.config)?;
        let target_version = KubeVersion::parse(&args.target)?;
        let cert_issuer_command = parse_command(&args.cert_issuer_command)?;

        Ok(Self {
            cluster,
            target_version,
            dry_run: args.dry_run,
            kubeconfig: args.kubeconfig.clone(),
            context: args.context.clone(),
            addon_manifests: args.addon_manifests.clone(),
            cert_issuer_command,
        })
    }
}

/// Split a command line on whitespace into program and arguments. Quotes are
/// not interpreted.
fn parse_command(raw: &str) -> Result<Vec<String>> {
    let parts: Vec<String> = raw.split_whitespace().map(String::from).collect();
    if parts.is_empty() {
        return Err(KpuError::Config("certificate issuer command is empty".to_string()).into());
    }
    Ok(parts)
}
