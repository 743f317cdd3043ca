//! API server certificate and key issuance.

use anyhow::{Context, Result};
use async_trait::async_trait;
use tokio::process::Command;
use tracing::{debug, info};

use crate::config::ClusterConfiguration;
use crate::error::KpuError;

/// Issues a fresh API server serving certificate and key.
#[async_trait]
pub trait CertIssuer: Send + Sync {
    /// Write `apiserver.crt` and `apiserver.key` into the certificates
    /// directory of `cfg`, reusing any valid pair already present.
    async fn create_apiserver_cert_and_key(&self, cfg: &ClusterConfiguration) -> Result<()>;
}

/// Delegates issuance to an external command (`kubeadm init phase certs
/// apiserver` by default), appending `--cert-dir <certificatesDir>`.
#[derive(Debug, Clone)]
pub struct CommandCertIssuer {
    command: Vec<String>,
}

impl CommandCertIssuer {
    pub fn new(command: Vec<String>) -> Self {
        Self { command }
    }
}

#[async_trait]
impl CertIssuer for CommandCertIssuer {
    async fn create_apiserver_cert_and_key(&self, cfg: &ClusterConfiguration) -> Result<()> {
        let Some((program, args)) = self.command.split_first() else {
            return Err(KpuError::Config("certificate issuer command is empty".to_string()).into());
        };
        let command_line = self.command.join(" ");
        debug!("Running {} --cert-dir {}", command_line, cfg.certificates_dir.display());

        let output = Command::new(program)
            .args(args)
            .arg("--cert-dir")
            .arg(&cfg.certificates_dir)
            .output()
            .await
            .with_context(|| format!("Failed to run `{command_line}`"))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(KpuError::Command {
                command: command_line,
                details: format!("{}: {}", output.status, stderr.trim()),
            }
            .into());
        }

        info!(
            "Issued API server certificate and key in {}",
            cfg.certificates_dir.display()
        );
        Ok(())
    }
}
