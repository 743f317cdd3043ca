//! Well-known names, paths, and defaults of a kubeadm-managed control plane.

use std::time::Duration;

pub const NAMESPACE_SYSTEM: &str = "kube-system";
pub const NAMESPACE_PUBLIC: &str = "kube-public";

pub const KUBERNETES_DIR: &str = "/etc/kubernetes";
pub const STATIC_POD_DIR: &str = "/etc/kubernetes/manifests";
pub const DEFAULT_CERTIFICATES_DIR: &str = "/etc/kubernetes/pki";
pub const KUBELET_RUN_DIR: &str = "/var/lib/kubelet";
pub const DEFAULT_ADDON_MANIFESTS_DIR: &str = "/etc/kubernetes/addons";
pub const DEFAULT_KUBECONFIG: &str = "/etc/kubernetes/admin.conf";

/// File the downloaded kubelet configuration is written to.
pub const KUBELET_CONFIG_FILE: &str = "config.yaml";
/// Prefix of the temporary kubelet directory used by dry runs.
pub const DRY_RUN_DIR_PREFIX: &str = "kubeadm-upgrade-dryrun";

pub const APISERVER_CERT_NAME: &str = "apiserver.crt";
pub const APISERVER_KEY_NAME: &str = "apiserver.key";
pub const EXPIRED_DIR_NAME: &str = "expired";

/// Age after which the API server certificate is backed up and reissued.
pub const CERT_BACKUP_HORIZON: Duration = Duration::from_secs(180 * 24 * 60 * 60);

pub const KUBE_DNS: &str = "kube-dns";
pub const CORE_DNS: &str = "coredns";
pub const KUBE_PROXY: &str = "kube-proxy";

/// Attempts made while waiting for the new DNS deployment before giving up.
pub const DNS_MIGRATION_ATTEMPTS: u32 = 10;
/// Fixed pause between DNS migration attempts.
pub const DNS_MIGRATION_INTERVAL: Duration = Duration::from_secs(5);

/// Upper bound for waits during the self-hosted control plane conversion.
pub const SELF_HOSTING_WAIT_TIMEOUT: Duration = Duration::from_secs(30 * 60);

pub const KUBEADM_CONFIG_MAP: &str = "kubeadm-config";
pub const KUBEADM_CONFIG_MAP_KEY: &str = "MasterConfiguration";
pub const KUBELET_CONFIG_MAP_PREFIX: &str = "kubelet-config-";
pub const KUBELET_CONFIG_MAP_KEY: &str = "kubelet";

pub const CRI_SOCKET_ANNOTATION: &str = "kubeadm.alpha.kubernetes.io/cri-socket";

pub const CLUSTER_INFO_CONFIG_MAP: &str = "cluster-info";
pub const CLUSTER_INFO_RBAC_NAME: &str = "kubeadm:bootstrap-signer-clusterinfo";
pub const ANONYMOUS_USER: &str = "system:anonymous";

pub const NODES_GROUP: &str = "system:nodes";
pub const BOOTSTRAP_TOKEN_GROUP: &str = "system:bootstrappers:kubeadm:default-node-token";

pub const SELF_HOSTED_PREFIX: &str = "self-hosted-";
pub const CONTROL_PLANE_COMPONENTS: &[&str] = &[
    "kube-apiserver",
    "kube-controller-manager",
    "kube-scheduler",
];
pub const CONTROL_PLANE_NODE_LABEL: &str = "node-role.kubernetes.io/master";

/// Field manager name used for server-side apply.
pub const FIELD_MANAGER: &str = "kpu";

/// Name of the DaemonSet that hosts a control plane component.
pub fn self_hosted_name(component: &str) -> String {
    format!("{SELF_HOSTED_PREFIX}{component}")
}
