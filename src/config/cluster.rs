//! Cluster configuration as published to and consumed from the cluster.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::constants::DEFAULT_CERTIFICATES_DIR;
use crate::error::KpuError;

/// Feature gates understood by the post-upgrade tasks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Feature {
    /// Use CoreDNS instead of kube-dns.
    CoreDns,
    /// Run the control plane as DaemonSets instead of static Pods.
    SelfHosting,
}

impl Feature {
    pub const ALL: [Self; 2] = [Self::CoreDns, Self::SelfHosting];

    /// Name of the gate as written in `featureGates`.
    pub const fn name(self) -> &'static str {
        match self {
            Self::CoreDns => "CoreDNS",
            Self::SelfHosting => "SelfHosting",
        }
    }

    const fn default_enabled(self) -> bool {
        match self {
            Self::CoreDns => true,
            Self::SelfHosting => false,
        }
    }
}

/// Node identity of the control plane node running the upgrade.
#[derive(Deserialize, Serialize, Clone, Debug, Default, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct NodeRegistration {
    pub name: String,

    #[serde(default)]
    pub cri_socket: String,
}

/// Cluster networking settings.
#[derive(Deserialize, Serialize, Clone, Debug, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Networking {
    #[serde(default = "default_dns_domain")]
    pub dns_domain: String,

    #[serde(default = "default_service_subnet")]
    pub service_subnet: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pod_subnet: Option<String>,
}

impl Default for Networking {
    fn default() -> Self {
        Self {
            dns_domain: default_dns_domain(),
            service_subnet: default_service_subnet(),
            pod_subnet: None,
        }
    }
}

fn default_dns_domain() -> String {
    "cluster.local".to_string()
}

fn default_service_subnet() -> String {
    "10.96.0.0/12".to_string()
}

fn default_certificates_dir() -> PathBuf {
    PathBuf::from(DEFAULT_CERTIFICATES_DIR)
}

/// Active cluster configuration for one post-upgrade run.
#[derive(Deserialize, Serialize, Clone, Debug, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ClusterConfiguration {
    pub node_registration: NodeRegistration,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kubernetes_version: Option<String>,

    #[serde(default)]
    pub feature_gates: BTreeMap<String, bool>,

    #[serde(default = "default_certificates_dir")]
    pub certificates_dir: PathBuf,

    #[serde(default)]
    pub networking: Networking,

    /// Kubelet component configuration published for the new version.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kubelet_configuration: Option<serde_yaml::Value>,
}

impl ClusterConfiguration {
    /// Load and validate a configuration file.
    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read cluster configuration {}", path.display()))?;
        Self::from_yaml(&raw)
            .with_context(|| format!("Invalid cluster configuration {}", path.display()))
    }

    /// Parse and validate configuration YAML.
    pub fn from_yaml(raw: &str) -> Result<Self> {
        let config: Self = serde_yaml::from_str(raw)
            .map_err(|e| KpuError::Config(format!("failed to parse YAML: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    /// Reject configurations the post-upgrade tasks cannot act on.
    pub fn validate(&self) -> Result<()> {
        if self.node_registration.name.trim().is_empty() {
            return Err(KpuError::Config("nodeRegistration.name must be set".to_string()).into());
        }

        let unknown: Vec<&str> = self
            .feature_gates
            .keys()
            .map(String::as_str)
            .filter(|name| !Feature::ALL.iter().any(|f| f.name() == *name))
            .collect();
        if !unknown.is_empty() {
            return Err(KpuError::Config(format!(
                "unrecognized feature gate(s): {}",
                unknown.join(", ")
            ))
            .into());
        }

        Ok(())
    }

    /// Whether a feature gate is on, falling back to its default.
    pub fn feature_enabled(&self, feature: Feature) -> bool {
        self.feature_gates
            .get(feature.name())
            .copied()
            .unwrap_or_else(|| feature.default_enabled())
    }

    /// Serialize the configuration the way it is stored in the cluster.
    pub fn to_yaml(&self) -> Result<String> {
        serde_yaml::to_string(self).context("Failed to serialize cluster configuration")
    }
}
