//! Kubernetes version parsing.

use anyhow::Result;
use serde::{Deserialize, Serialize};

use crate::error::KpuError;

/// A parsed Kubernetes version (`v1.11.0`, `1.11`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct KubeVersion {
    pub major: u32,
    pub minor: u32,
    pub patch: Option<u32>,
}

impl KubeVersion {
    /// Parse a version string, accepting an optional leading `v` and build metadata.
    pub fn parse(version: &str) -> Result<Self> {
        let invalid = || KpuError::InvalidVersion(version.to_string());

        let trimmed = version.trim();
        let trimmed = trimmed.strip_prefix('v').unwrap_or(trimmed);
        // Drop pre-release and build suffixes such as "-beta.0" or "+abc".
        let core = trimmed
            .split(['-', '+'])
            .next()
            .filter(|s| !s.is_empty())
            .ok_or_else(invalid)?;

        let parts: Vec<&str> = core.split('.').collect();
        if parts.len() < 2 || parts.len() > 3 {
            return Err(invalid().into());
        }

        let major: u32 = parts[0].parse().map_err(|_| invalid())?;
        let minor: u32 = parts[1].parse().map_err(|_| invalid())?;
        let patch = match parts.get(2) {
            Some(p) => Some(p.parse::<u32>().map_err(|_| invalid())?),
            None => None,
        };

        Ok(Self {
            major,
            minor,
            patch,
        })
    }

    /// `major.minor`, the granularity kubelet configuration is branched on.
    pub fn minor_string(&self) -> String {
        format!("{}.{}", self.major, self.minor)
    }
}

impl std::fmt::Display for KubeVersion {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.patch {
            Some(patch) => write!(f, "v{}.{}.{}", self.major, self.minor, patch),
            None => write!(f, "v{}.{}", self.major, self.minor),
        }
    }
}

impl std::str::FromStr for KubeVersion {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}
