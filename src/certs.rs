//! API server certificate age check and backup.
//!
//! The age is measured from the certificate's `NotBefore` (issuance), not from
//! how close `NotAfter` is. A certificate issued more than the horizon ago is
//! backed up into `expired/` and reissued.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use tracing::debug;
use x509_parser::pem::Pem;

use crate::constants::{APISERVER_CERT_NAME, APISERVER_KEY_NAME, EXPIRED_DIR_NAME};
use crate::error::KpuError;
use crate::transaction::{move_files, relocation_set};

/// Validity window of a certificate read from disk.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CertificateRecord {
    pub not_before: DateTime<Utc>,
    pub not_after: DateTime<Utc>,
}

impl CertificateRecord {
    /// Time elapsed since issuance, zero for certificates issued in the future.
    pub fn age_at(&self, now: DateTime<Utc>) -> Duration {
        (now - self.not_before).to_std().unwrap_or(Duration::ZERO)
    }
}

/// Parse every certificate in a PEM file, in file order.
pub fn certs_from_file(path: &Path) -> Result<Vec<CertificateRecord>> {
    let data = fs::read(path)
        .with_context(|| format!("couldn't load the certificate file {}", path.display()))?;

    let mut records = Vec::new();
    for pem in Pem::iter_from_buffer(&data) {
        let pem = pem.map_err(|e| {
            KpuError::Certificate(format!("invalid PEM data in {}: {e}", path.display()))
        })?;
        if pem.label != "CERTIFICATE" {
            continue;
        }
        let cert = pem.parse_x509().map_err(|e| {
            KpuError::Certificate(format!("invalid certificate in {}: {e}", path.display()))
        })?;
        let validity = cert.validity();
        records.push(CertificateRecord {
            not_before: to_datetime(validity.not_before.timestamp())?,
            not_after: to_datetime(validity.not_after.timestamp())?,
        });
    }

    Ok(records)
}

fn to_datetime(timestamp: i64) -> Result<DateTime<Utc>> {
    DateTime::from_timestamp(timestamp, 0)
        .ok_or_else(|| KpuError::Certificate(format!("timestamp {timestamp} out of range")).into())
}

/// Decide whether the certificate at `path` was issued more than `horizon`
/// before `now`.
pub fn should_backup_at(path: &Path, horizon: Duration, now: DateTime<Utc>) -> Result<bool> {
    let certs = certs_from_file(path)?;
    let first = certs
        .first()
        .ok_or_else(|| KpuError::Certificate("no certificate data found".to_string()))?;

    let age = first.age_at(now);
    debug!(
        "Certificate {} issued {} ({} days ago), expires {}",
        path.display(),
        first.not_before,
        age.as_secs() / 86_400,
        first.not_after
    );
    Ok(age > horizon)
}

/// Path of the API server certificate in a certificates directory.
pub fn apiserver_cert_path(cert_dir: &Path) -> PathBuf {
    cert_dir.join(APISERVER_CERT_NAME)
}

/// Move the API server certificate and key into `<cert_dir>/expired/`.
///
/// The backup directory must not exist yet. If one of the files cannot be
/// moved, the files already moved are put back.
pub fn backup_apiserver_cert_and_key(cert_dir: &Path) -> Result<PathBuf> {
    let sub_dir = cert_dir.join(EXPIRED_DIR_NAME);
    create_backup_dir(&sub_dir)?;

    let set = relocation_set(cert_dir, &sub_dir, &[APISERVER_CERT_NAME, APISERVER_KEY_NAME])?;
    move_files(set)?;
    Ok(sub_dir)
}

#[cfg(unix)]
fn create_backup_dir(dir: &Path) -> Result<()> {
    use std::os::unix::fs::DirBuilderExt;

    fs::DirBuilder::new()
        .mode(0o755)
        .create(dir)
        .with_context(|| format!("failed to create backup directory {}", dir.display()))
}

#[cfg(not(unix))]
fn create_backup_dir(dir: &Path) -> Result<()> {
    fs::create_dir(dir)
        .with_context(|| format!("failed to create backup directory {}", dir.display()))
}
