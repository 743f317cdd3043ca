//! Gate for the one-way conversion to a self-hosted control plane.

use anyhow::{Context, Result};

use crate::config::Feature;
use crate::events::UpgradeEvent;
use crate::k8s::waiter::{DryRunWaiter, Waiter};
use crate::orchestrator::UpgradeContext;
use crate::phases::Completion;

/// Convert the control plane when the SelfHosting gate is on and the cluster
/// is not self-hosted yet. Dry runs hand the converter a waiter that returns
/// immediately.
pub async fn maybe_convert(ctx: &UpgradeContext, step: &'static str) -> Result<Completion> {
    if !ctx.config.feature_enabled(Feature::SelfHosting) {
        return Ok(Completion::skipped("SelfHosting feature gate is disabled"));
    }
    if ctx.cluster.is_self_hosted().await {
        return Ok(Completion::skipped("control plane is already self-hosted"));
    }

    let dry_run_waiter = DryRunWaiter;
    let waiter: &dyn Waiter = if ctx.dry_run {
        &dry_run_waiter
    } else {
        ctx.waiter.as_ref()
    };

    ctx.events.emit(UpgradeEvent::info(
        step,
        "Converting the control plane to self-hosted mode",
    ));
    ctx.converter
        .convert(
            &ctx.paths.static_pod_dir,
            &ctx.paths.kubernetes_dir,
            &ctx.config,
            waiter,
            ctx.dry_run,
        )
        .await
        .context("error creating self hosted control plane")?;

    Ok(Completion::Done)
}
