//! Conversion of a static-Pod control plane into self-hosted DaemonSets.

use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use async_trait::async_trait;
use k8s_openapi::api::apps::v1::{DaemonSet, DaemonSetSpec, DaemonSetUpdateStrategy};
use k8s_openapi::api::core::v1::{Pod, PodTemplateSpec, Toleration};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{LabelSelector, ObjectMeta};
use kube::Client;
use kube::api::{Api, Patch, PatchParams};
use tracing::info;

use crate::config::ClusterConfiguration;
use crate::constants::{
    CONTROL_PLANE_COMPONENTS, CONTROL_PLANE_NODE_LABEL, FIELD_MANAGER, NAMESPACE_SYSTEM,
    self_hosted_name,
};
use crate::error::KpuError;
use crate::k8s::waiter::Waiter;
use crate::transaction::{move_files, relocation_set};

/// Directory under the Kubernetes config dir receiving retired static Pod manifests.
const RETIRED_MANIFESTS_DIR: &str = "self-hosted-backup";

/// Turns the static-Pod control plane into a self-hosted one.
#[async_trait]
pub trait SelfHostingConverter: Send + Sync {
    async fn convert(
        &self,
        static_pod_dir: &Path,
        kubernetes_dir: &Path,
        cfg: &ClusterConfiguration,
        waiter: &dyn Waiter,
        dry_run: bool,
    ) -> Result<()>;
}

/// Converter creating one DaemonSet per control plane component.
///
/// For each component the DaemonSet is applied, its Pods are awaited, and the
/// static Pod manifest is moved out of the kubelet's manifest directory so the
/// kubelet stops the static Pod. Dry runs leave the manifests in place.
pub struct KubeSelfHostingConverter {
    client: Client,
}

impl KubeSelfHostingConverter {
    pub fn new(client: Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl SelfHostingConverter for KubeSelfHostingConverter {
    async fn convert(
        &self,
        static_pod_dir: &Path,
        kubernetes_dir: &Path,
        _cfg: &ClusterConfiguration,
        waiter: &dyn Waiter,
        dry_run: bool,
    ) -> Result<()> {
        let api: Api<DaemonSet> = Api::namespaced(self.client.clone(), NAMESPACE_SYSTEM);
        let mut params = PatchParams::apply(FIELD_MANAGER).force();
        params.dry_run = dry_run;

        waiter.wait_for_api().await?;

        for component in CONTROL_PLANE_COMPONENTS {
            let manifest = static_pod_dir.join(format!("{component}.yaml"));
            let pod = read_static_pod(&manifest)?;
            let ds = build_daemonset(component, pod);
            let name = self_hosted_name(component);

            api.patch(&name, &params, &Patch::Apply(&ds))
                .await
                .map_err(|e| KpuError::kube("DaemonSet", &name, e))?;
            info!("Created self-hosted DaemonSet {}", name);

            waiter
                .wait_for_pods_with_label(NAMESPACE_SYSTEM, &format!("k8s-app={name}"))
                .await?;

            if dry_run {
                info!(
                    "[dryrun] Would retire static Pod manifest {}",
                    manifest.display()
                );
                continue;
            }

            retire_manifest(static_pod_dir, &kubernetes_dir.join(RETIRED_MANIFESTS_DIR), component)?;
            waiter.wait_for_api().await?;
            info!("Self-hosted {} is running", component);
        }

        Ok(())
    }
}

fn read_static_pod(path: &Path) -> Result<Pod> {
    let raw = fs::read_to_string(path)
        .with_context(|| format!("Failed to read static Pod manifest {}", path.display()))?;
    serde_yaml::from_str(&raw)
        .with_context(|| format!("Invalid static Pod manifest {}", path.display()))
}

fn retire_manifest(static_pod_dir: &Path, retired_dir: &Path, component: &str) -> Result<()> {
    fs::create_dir_all(retired_dir)
        .with_context(|| format!("Failed to create {}", retired_dir.display()))?;
    let file = format!("{component}.yaml");
    move_files(relocation_set(static_pod_dir, retired_dir, &[file.as_str()])?)
}

/// DaemonSet running a component's static Pod spec on control plane nodes.
pub fn build_daemonset(component: &str, pod: Pod) -> DaemonSet {
    let name = self_hosted_name(component);
    let labels = BTreeMap::from([("k8s-app".to_string(), name.clone())]);

    let mut spec = pod.spec.unwrap_or_default();
    spec.node_selector = Some(BTreeMap::from([(
        CONTROL_PLANE_NODE_LABEL.to_string(),
        String::new(),
    )]));
    spec.tolerations = Some(vec![Toleration {
        key: Some(CONTROL_PLANE_NODE_LABEL.to_string()),
        effect: Some("NoSchedule".to_string()),
        ..Default::default()
    }]);

    DaemonSet {
        metadata: ObjectMeta {
            name: Some(name),
            namespace: Some(NAMESPACE_SYSTEM.to_string()),
            labels: Some(labels.clone()),
            ..Default::default()
        },
        spec: Some(DaemonSetSpec {
            selector: LabelSelector {
                match_labels: Some(labels.clone()),
                ..Default::default()
            },
            template: PodTemplateSpec {
                metadata: Some(ObjectMeta {
                    labels: Some(labels),
                    ..Default::default()
                }),
                spec: Some(spec),
            },
            update_strategy: Some(DaemonSetUpdateStrategy {
                type_: Some("RollingUpdate".to_string()),
                ..Default::default()
            }),
            ..Default::default()
        }),
        ..Default::default()
    }
}
