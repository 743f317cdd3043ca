//! Cluster operations used by the post-upgrade steps.

use std::collections::BTreeMap;
use std::fmt::Debug;
use std::path::Path;

use anyhow::{Context, Result};
use async_trait::async_trait;
use k8s_openapi::api::apps::v1::{DaemonSet, Deployment};
use k8s_openapi::api::core::v1::{ConfigMap, Node};
use k8s_openapi::api::rbac::v1::{ClusterRoleBinding, Role, RoleBinding};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use kube::api::{Api, DeleteParams, Patch, PatchParams};
use kube::{Client, Resource};
use serde::Serialize;
use serde::de::DeserializeOwned;
use tracing::{debug, info};

use crate::config::{ClusterConfiguration, KubeVersion};
use crate::constants::{
    CONTROL_PLANE_COMPONENTS, CRI_SOCKET_ANNOTATION, FIELD_MANAGER, KUBEADM_CONFIG_MAP,
    KUBEADM_CONFIG_MAP_KEY, KUBELET_CONFIG_FILE, KUBELET_CONFIG_MAP_KEY,
    KUBELET_CONFIG_MAP_PREFIX, NAMESPACE_SYSTEM, self_hosted_name,
};
use crate::error::KpuError;
use crate::k8s::rbac::{RbacObjects, RbacRule, kubelet_config_reader, objects_for};

/// Readiness of a Deployment as reported by its status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct DeploymentReadiness {
    pub ready_replicas: i32,
}

/// Cluster-side operations of the post-upgrade steps.
///
/// Every mutating call is idempotent: re-running it against a cluster that is
/// already reconciled leaves the cluster unchanged.
#[async_trait]
pub trait ClusterApi: Send + Sync {
    /// Store the active cluster configuration in the cluster.
    async fn upload_configuration(&self, cfg: &ClusterConfiguration) -> Result<()>;

    /// Publish the kubelet configuration ConfigMap for `version`, plus the
    /// RBAC letting nodes read it.
    async fn create_or_update_kubelet_config(
        &self,
        cfg: &ClusterConfiguration,
        version: &KubeVersion,
    ) -> Result<()>;

    /// Fetch the kubelet configuration for `version` into `dest_dir`.
    async fn download_kubelet_config(&self, version: &KubeVersion, dest_dir: &Path) -> Result<()>;

    /// Record the container runtime socket on the node object.
    async fn annotate_node_cri_socket(&self, node: &str, cri_socket: &str) -> Result<()>;

    async fn ensure_rbac(&self, rule: RbacRule) -> Result<()>;

    async fn deployment_readiness(&self, namespace: &str, name: &str)
    -> Result<DeploymentReadiness>;

    /// Delete a Deployment with foreground propagation.
    async fn delete_deployment_foreground(&self, namespace: &str, name: &str) -> Result<()>;

    /// Whether the control plane already runs as self-hosted DaemonSets.
    async fn is_self_hosted(&self) -> bool;
}

/// [`ClusterApi`] backed by the Kubernetes API.
///
/// Writes use server-side apply. In dry-run mode the API server validates and
/// admits each write without persisting it.
#[derive(Clone)]
pub struct KubeCluster {
    client: Client,
    dry_run: bool,
}

impl KubeCluster {
    pub fn new(client: Client, dry_run: bool) -> Self {
        Self { client, dry_run }
    }

    fn apply_params(&self) -> PatchParams {
        let mut params = PatchParams::apply(FIELD_MANAGER).force();
        params.dry_run = self.dry_run;
        params
    }

    async fn apply<K>(&self, api: &Api<K>, obj: &K) -> Result<()>
    where
        K: Resource<DynamicType = ()> + Clone + Debug + Serialize + DeserializeOwned,
    {
        let kind = K::kind(&());
        let name = obj.meta().name.clone().unwrap_or_default();
        api.patch(&name, &self.apply_params(), &Patch::Apply(obj))
            .await
            .map_err(|e| KpuError::kube(&kind, &name, e))?;
        debug!("Applied {} {} (dry_run={})", kind, name, self.dry_run);
        Ok(())
    }

    async fn apply_rbac(&self, objects: RbacObjects) -> Result<()> {
        match objects {
            RbacObjects::Cluster(binding) => {
                let api: Api<ClusterRoleBinding> = Api::all(self.client.clone());
                self.apply(&api, &binding).await
            }
            RbacObjects::Namespaced(role, binding) => {
                let namespace = role.metadata.namespace.clone().unwrap_or_default();
                let roles: Api<Role> = Api::namespaced(self.client.clone(), &namespace);
                self.apply(&roles, &role).await?;
                let bindings: Api<RoleBinding> = Api::namespaced(self.client.clone(), &namespace);
                self.apply(&bindings, &binding).await
            }
        }
    }
}

/// Name of the kubelet ConfigMap for a version, e.g. `kubelet-config-1.11`.
pub fn kubelet_config_map_name(version: &KubeVersion) -> String {
    format!("{KUBELET_CONFIG_MAP_PREFIX}{}", version.minor_string())
}

/// Kubelet configuration document published for the nodes.
pub fn kubelet_config_document(cfg: &ClusterConfiguration) -> Result<String> {
    match &cfg.kubelet_configuration {
        Some(value) => {
            serde_yaml::to_string(value).context("Failed to serialize kubelet configuration")
        }
        None => Ok(
            "apiVersion: kubelet.config.k8s.io/v1beta1\nkind: KubeletConfiguration\n".to_string(),
        ),
    }
}

fn config_map(name: &str, key: &str, value: String) -> ConfigMap {
    ConfigMap {
        metadata: ObjectMeta {
            name: Some(name.to_string()),
            namespace: Some(NAMESPACE_SYSTEM.to_string()),
            ..Default::default()
        },
        data: Some(BTreeMap::from([(key.to_string(), value)])),
        ..Default::default()
    }
}

#[async_trait]
impl ClusterApi for KubeCluster {
    async fn upload_configuration(&self, cfg: &ClusterConfiguration) -> Result<()> {
        info!("Storing the configuration in ConfigMap {}", KUBEADM_CONFIG_MAP);
        let api: Api<ConfigMap> = Api::namespaced(self.client.clone(), NAMESPACE_SYSTEM);
        let cm = config_map(KUBEADM_CONFIG_MAP, KUBEADM_CONFIG_MAP_KEY, cfg.to_yaml()?);
        self.apply(&api, &cm).await
    }

    async fn create_or_update_kubelet_config(
        &self,
        cfg: &ClusterConfiguration,
        version: &KubeVersion,
    ) -> Result<()> {
        let name = kubelet_config_map_name(version);
        info!("Creating ConfigMap {} for the kubelet configuration", name);

        let api: Api<ConfigMap> = Api::namespaced(self.client.clone(), NAMESPACE_SYSTEM);
        let cm = config_map(&name, KUBELET_CONFIG_MAP_KEY, kubelet_config_document(cfg)?);
        self.apply(&api, &cm).await?;

        let (role, binding) = kubelet_config_reader(&name);
        self.apply_rbac(RbacObjects::Namespaced(role, binding)).await
    }

    async fn download_kubelet_config(&self, version: &KubeVersion, dest_dir: &Path) -> Result<()> {
        let name = kubelet_config_map_name(version);
        let api: Api<ConfigMap> = Api::namespaced(self.client.clone(), NAMESPACE_SYSTEM);
        let cm = api
            .get(&name)
            .await
            .map_err(|e| KpuError::kube("ConfigMap", &name, e))?;

        let data = cm
            .data
            .and_then(|mut data| data.remove(KUBELET_CONFIG_MAP_KEY))
            .ok_or_else(|| {
                KpuError::KubernetesApi(format!(
                    "ConfigMap {name} has no {KUBELET_CONFIG_MAP_KEY} key"
                ))
            })?;

        let dest = dest_dir.join(KUBELET_CONFIG_FILE);
        tokio::fs::create_dir_all(dest_dir)
            .await
            .with_context(|| format!("Failed to create {}", dest_dir.display()))?;
        tokio::fs::write(&dest, data)
            .await
            .with_context(|| format!("Failed to write {}", dest.display()))?;

        info!("Wrote kubelet configuration to {}", dest.display());
        Ok(())
    }

    async fn annotate_node_cri_socket(&self, node: &str, cri_socket: &str) -> Result<()> {
        let api: Api<Node> = Api::all(self.client.clone());
        let patch = serde_json::json!({
            "metadata": {
                "annotations": { CRI_SOCKET_ANNOTATION: cri_socket }
            }
        });
        let params = PatchParams {
            dry_run: self.dry_run,
            ..Default::default()
        };
        api.patch(node, &params, &Patch::Merge(&patch))
            .await
            .map_err(|e| KpuError::kube("Node", node, e))?;
        info!("Annotated node {} with CRI socket {}", node, cri_socket);
        Ok(())
    }

    async fn ensure_rbac(&self, rule: RbacRule) -> Result<()> {
        debug!("Ensuring RBAC rules {}", rule);
        self.apply_rbac(objects_for(rule)).await
    }

    async fn deployment_readiness(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<DeploymentReadiness> {
        let api: Api<Deployment> = Api::namespaced(self.client.clone(), namespace);
        let deployment = api
            .get(name)
            .await
            .map_err(|e| KpuError::kube("Deployment", name, e))?;

        let ready_replicas = deployment
            .status
            .and_then(|s| s.ready_replicas)
            .unwrap_or(0);
        Ok(DeploymentReadiness { ready_replicas })
    }

    async fn delete_deployment_foreground(&self, namespace: &str, name: &str) -> Result<()> {
        let api: Api<Deployment> = Api::namespaced(self.client.clone(), namespace);
        let mut params = DeleteParams::foreground();
        params.dry_run = self.dry_run;
        api.delete(name, &params)
            .await
            .map_err(|e| KpuError::kube("Deployment", name, e))?;
        info!("Deleted Deployment {}/{}", namespace, name);
        Ok(())
    }

    async fn is_self_hosted(&self) -> bool {
        let api: Api<DaemonSet> = Api::namespaced(self.client.clone(), NAMESPACE_SYSTEM);
        for component in CONTROL_PLANE_COMPONENTS {
            let name = self_hosted_name(component);
            let scheduled = match api.get(&name).await {
                Ok(ds) => ds.status.map_or(0, |s| s.current_number_scheduled),
                Err(e) => {
                    debug!("DaemonSet {} unavailable: {}", name, e);
                    return false;
                }
            };
            if scheduled == 0 {
                return false;
            }
        }
        true
    }
}
