//! Back up and reissue an aged API server certificate.

use anyhow::{Context, Result};

use crate::certs::{apiserver_cert_path, backup_apiserver_cert_and_key, should_backup_at};
use crate::events::UpgradeEvent;
use crate::orchestrator::UpgradeContext;
use crate::phases::Completion;

/// Move the API server certificate and key aside and issue new ones when the
/// certificate is older than the context's horizon.
///
/// Failing to decide or to back up only emits a warning. A failed reissue is
/// the one error this step returns.
pub async fn renew_apiserver_cert(ctx: &UpgradeContext, step: &'static str) -> Result<Completion> {
    let cert_dir = &ctx.config.certificates_dir;
    let cert_path = apiserver_cert_path(cert_dir);

    match should_backup_at(&cert_path, ctx.backup_horizon, (ctx.clock)()) {
        Err(e) => {
            ctx.events.emit(UpgradeEvent::warning(
                step,
                format!("failed to determine to backup kube-apiserver cert and key: {e:#}"),
            ));
            return Ok(Completion::skipped("could not inspect the certificate"));
        }
        Ok(false) => return Ok(Completion::skipped("certificate is within its horizon")),
        Ok(true) => {}
    }

    if ctx.dry_run {
        ctx.events.emit(UpgradeEvent::info(
            step,
            format!(
                "[dryrun] Would back up {} and its key, then issue a new pair",
                cert_path.display()
            ),
        ));
        return Ok(Completion::skipped("dry run"));
    }

    match backup_apiserver_cert_and_key(cert_dir) {
        Ok(backup_dir) => ctx.events.emit(UpgradeEvent::info(
            step,
            format!(
                "Backed up kube-apiserver cert and key to {}",
                backup_dir.display()
            ),
        )),
        Err(e) => ctx.events.emit(UpgradeEvent::warning(
            step,
            format!("failed to backup kube-apiserver cert and key: {e:#}"),
        )),
    }

    ctx.cert_issuer
        .create_apiserver_cert_and_key(&ctx.config)
        .await
        .context("error creating kube-apiserver certificate and key")?;

    Ok(Completion::Done)
}
