//! Essential add-ons (DNS and kube-proxy) applied from manifest directories.
//!
//! Each add-on lives in `<manifest_dir>/<addon>/` as one or more YAML files,
//! possibly multi-document. Objects are applied with server-side apply, so
//! re-applying an unchanged manifest is a no-op.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use async_trait::async_trait;
use kube::Client;
use kube::api::{Api, ApiResource, DynamicObject, Patch, PatchParams};
use serde::Deserialize;
use tracing::{debug, info};

use crate::config::{ClusterConfiguration, Feature};
use crate::constants::{CORE_DNS, FIELD_MANAGER, KUBE_DNS, KUBE_PROXY};
use crate::error::KpuError;

/// Installs or updates the essential add-ons.
#[async_trait]
pub trait AddonInstaller: Send + Sync {
    /// Install or update the DNS add-on selected by the CoreDNS gate.
    async fn ensure_dns_addon(&self, cfg: &ClusterConfiguration) -> Result<()>;

    async fn ensure_proxy_addon(&self, cfg: &ClusterConfiguration) -> Result<()>;
}

/// DNS add-on selected by the configuration.
pub fn dns_addon_name(cfg: &ClusterConfiguration) -> &'static str {
    if cfg.feature_enabled(Feature::CoreDns) {
        CORE_DNS
    } else {
        KUBE_DNS
    }
}

pub struct ManifestAddonInstaller {
    client: Client,
    manifest_dir: PathBuf,
    dry_run: bool,
}

impl ManifestAddonInstaller {
    pub fn new(client: Client, manifest_dir: PathBuf, dry_run: bool) -> Self {
        Self {
            client,
            manifest_dir,
            dry_run,
        }
    }

    async fn apply_addon(&self, addon: &str) -> Result<()> {
        let dir = self.manifest_dir.join(addon);
        let objects = load_manifests(&dir)?;
        if objects.is_empty() {
            return Err(KpuError::Config(format!(
                "no manifests found for add-on {addon} in {}",
                dir.display()
            ))
            .into());
        }

        for obj in &objects {
            self.apply_object(obj).await?;
        }
        info!("Applied essential addon: {}", addon);
        Ok(())
    }

    async fn apply_object(&self, obj: &DynamicObject) -> Result<()> {
        let types = obj
            .types
            .as_ref()
            .ok_or_else(|| KpuError::Config("manifest object without apiVersion/kind".to_string()))?;
        let name = obj
            .metadata
            .name
            .clone()
            .ok_or_else(|| KpuError::Config(format!("{} manifest without a name", types.kind)))?;

        let ar = api_resource(&types.api_version, &types.kind);
        let api: Api<DynamicObject> = match obj.metadata.namespace.as_deref() {
            Some(ns) => Api::namespaced_with(self.client.clone(), ns, &ar),
            None => Api::all_with(self.client.clone(), &ar),
        };

        let mut params = PatchParams::apply(FIELD_MANAGER).force();
        params.dry_run = self.dry_run;
        api.patch(&name, &params, &Patch::Apply(obj))
            .await
            .map_err(|e| KpuError::kube(&types.kind, &name, e))?;
        debug!("Applied {} {}", types.kind, name);
        Ok(())
    }
}

#[async_trait]
impl AddonInstaller for ManifestAddonInstaller {
    async fn ensure_dns_addon(&self, cfg: &ClusterConfiguration) -> Result<()> {
        self.apply_addon(dns_addon_name(cfg)).await
    }

    async fn ensure_proxy_addon(&self, _cfg: &ClusterConfiguration) -> Result<()> {
        self.apply_addon(KUBE_PROXY).await
    }
}

/// Read every object from the YAML files of a directory, in file name order.
pub fn load_manifests(dir: &Path) -> Result<Vec<DynamicObject>> {
    let mut files: Vec<PathBuf> = fs::read_dir(dir)
        .with_context(|| format!("Failed to read manifest directory {}", dir.display()))?
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .filter(|path| {
            path.extension()
                .is_some_and(|ext| ext == "yaml" || ext == "yml")
        })
        .collect();
    files.sort();

    let mut objects = Vec::new();
    for file in &files {
        let raw = fs::read_to_string(file)
            .with_context(|| format!("Failed to read manifest {}", file.display()))?;
        for document in serde_yaml::Deserializer::from_str(&raw) {
            let value = serde_yaml::Value::deserialize(document)
                .with_context(|| format!("Invalid YAML in {}", file.display()))?;
            if value.is_null() {
                continue;
            }
            let obj: DynamicObject = serde_yaml::from_value(value)
                .with_context(|| format!("Invalid Kubernetes object in {}", file.display()))?;
            objects.push(obj);
        }
    }

    Ok(objects)
}

/// API resource for a built-in kind given its `apiVersion`.
fn api_resource(api_version: &str, kind: &str) -> ApiResource {
    let (group, version) = match api_version.split_once('/') {
        Some((group, version)) => (group, version),
        None => ("", api_version),
    };
    ApiResource {
        group: group.to_string(),
        version: version.to_string(),
        api_version: api_version.to_string(),
        kind: kind.to_string(),
        plural: plural(kind),
    }
}

fn plural(kind: &str) -> String {
    let lower = kind.to_ascii_lowercase();
    if lower == "endpoints" {
        lower
    } else if lower.ends_with('s') {
        format!("{lower}es")
    } else if let Some(stem) = lower.strip_suffix('y') {
        format!("{stem}ies")
    } else {
        format!("{lower}s")
    }
}
