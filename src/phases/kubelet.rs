//! Kubelet configuration directory for the download step.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use tempfile::TempDir;
use tracing::{debug, warn};

use crate::constants::DRY_RUN_DIR_PREFIX;

/// Directory the kubelet configuration is downloaded into.
///
/// Dry runs get a fresh temporary directory owned by this value; it is
/// deleted by [`KubeletDir::cleanup`] or when the value is dropped.
#[derive(Debug)]
pub struct KubeletDir {
    path: PathBuf,
    scratch: Option<TempDir>,
}

impl KubeletDir {
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Remove the temporary directory of a dry run.
    pub fn cleanup(self) {
        if let Some(tmp) = self.scratch {
            let path = tmp.path().to_path_buf();
            match tmp.close() {
                Ok(()) => debug!("Removed dry-run kubelet directory {}", path.display()),
                Err(e) => warn!(
                    "Failed to remove dry-run kubelet directory {}: {}",
                    path.display(),
                    e
                ),
            }
        }
    }
}

/// Resolve the kubelet directory: `run_dir` for real runs, a new temporary
/// directory under `scratch_root` for dry runs.
pub fn resolve_kubelet_dir(dry_run: bool, run_dir: &Path, scratch_root: &Path) -> Result<KubeletDir> {
    if !dry_run {
        return Ok(KubeletDir {
            path: run_dir.to_path_buf(),
            scratch: None,
        });
    }

    let tmp = tempfile::Builder::new()
        .prefix(DRY_RUN_DIR_PREFIX)
        .tempdir_in(scratch_root)
        .with_context(|| {
            format!(
                "couldn't create a temporary directory in {}",
                scratch_root.display()
            )
        })?;
    debug!("Using dry-run kubelet directory {}", tmp.path().display());

    Ok(KubeletDir {
        path: tmp.path().to_path_buf(),
        scratch: Some(tmp),
    })
}
