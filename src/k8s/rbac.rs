//! RBAC objects the post-upgrade tasks keep in place.

use k8s_openapi::api::rbac::v1::{
    ClusterRoleBinding, PolicyRule, Role, RoleBinding, RoleRef, Subject,
};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;

use crate::constants::{
    ANONYMOUS_USER, BOOTSTRAP_TOKEN_GROUP, CLUSTER_INFO_CONFIG_MAP, CLUSTER_INFO_RBAC_NAME,
    NAMESPACE_PUBLIC, NAMESPACE_SYSTEM, NODES_GROUP,
};

const RBAC_API_GROUP: &str = "rbac.authorization.k8s.io";

/// Access-control rule sets reconciled after an upgrade.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RbacRule {
    /// Bootstrap tokens may post certificate signing requests.
    BootstrapTokenPostCsr,
    /// CSRs from bootstrap tokens are approved automatically.
    BootstrapTokenAutoApprove,
    /// Nodes may rotate their client certificates with automatic approval.
    NodeCertificateRotation,
    /// Anonymous users may read the `cluster-info` ConfigMap.
    ClusterInfo,
}

impl RbacRule {
    pub const fn name(self) -> &'static str {
        match self {
            Self::BootstrapTokenPostCsr => "kubeadm:kubelet-bootstrap",
            Self::BootstrapTokenAutoApprove => "kubeadm:node-autoapprove-bootstrap",
            Self::NodeCertificateRotation => "kubeadm:node-autoapprove-certificate-rotation",
            Self::ClusterInfo => CLUSTER_INFO_RBAC_NAME,
        }
    }
}

impl std::fmt::Display for RbacRule {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// Objects making up one rule set.
#[derive(Debug, Clone)]
pub enum RbacObjects {
    Cluster(ClusterRoleBinding),
    Namespaced(Role, RoleBinding),
}

/// Build the objects of a rule set.
pub fn objects_for(rule: RbacRule) -> RbacObjects {
    match rule {
        RbacRule::BootstrapTokenPostCsr => RbacObjects::Cluster(cluster_role_binding(
            rule.name(),
            "system:node-bootstrapper",
            group(BOOTSTRAP_TOKEN_GROUP),
        )),
        RbacRule::BootstrapTokenAutoApprove => RbacObjects::Cluster(cluster_role_binding(
            rule.name(),
            "system:certificates.k8s.io:certificatesigningrequests:nodeclient",
            group(BOOTSTRAP_TOKEN_GROUP),
        )),
        RbacRule::NodeCertificateRotation => RbacObjects::Cluster(cluster_role_binding(
            rule.name(),
            "system:certificates.k8s.io:certificatesigningrequests:selfnodeclient",
            group(NODES_GROUP),
        )),
        RbacRule::ClusterInfo => {
            let role = configmap_reader_role(rule.name(), NAMESPACE_PUBLIC, CLUSTER_INFO_CONFIG_MAP);
            let binding = role_binding(rule.name(), NAMESPACE_PUBLIC, vec![user(ANONYMOUS_USER)]);
            RbacObjects::Namespaced(role, binding)
        }
    }
}

/// Role and binding letting nodes read a version-branched kubelet ConfigMap.
pub fn kubelet_config_reader(config_map: &str) -> (Role, RoleBinding) {
    let name = format!("kubeadm:{config_map}");
    let role = configmap_reader_role(&name, NAMESPACE_SYSTEM, config_map);
    let binding = role_binding(
        &name,
        NAMESPACE_SYSTEM,
        vec![group(NODES_GROUP), group(BOOTSTRAP_TOKEN_GROUP)],
    );
    (role, binding)
}

fn group(name: &str) -> Subject {
    Subject {
        kind: "Group".to_string(),
        name: name.to_string(),
        api_group: Some(RBAC_API_GROUP.to_string()),
        namespace: None,
    }
}

fn user(name: &str) -> Subject {
    Subject {
        kind: "User".to_string(),
        name: name.to_string(),
        api_group: Some(RBAC_API_GROUP.to_string()),
        namespace: None,
    }
}

fn cluster_role_binding(name: &str, cluster_role: &str, subject: Subject) -> ClusterRoleBinding {
    ClusterRoleBinding {
        metadata: ObjectMeta {
            name: Some(name.to_string()),
            ..Default::default()
        },
        role_ref: RoleRef {
            api_group: RBAC_API_GROUP.to_string(),
            kind: "ClusterRole".to_string(),
            name: cluster_role.to_string(),
        },
        subjects: Some(vec![subject]),
    }
}

fn configmap_reader_role(name: &str, namespace: &str, config_map: &str) -> Role {
    Role {
        metadata: ObjectMeta {
            name: Some(name.to_string()),
            namespace: Some(namespace.to_string()),
            ..Default::default()
        },
        rules: Some(vec![PolicyRule {
            api_groups: Some(vec![String::new()]),
            resources: Some(vec!["configmaps".to_string()]),
            resource_names: Some(vec![config_map.to_string()]),
            verbs: vec!["get".to_string()],
            ..Default::default()
        }]),
    }
}

fn role_binding(name: &str, namespace: &str, subjects: Vec<Subject>) -> RoleBinding {
    RoleBinding {
        metadata: ObjectMeta {
            name: Some(name.to_string()),
            namespace: Some(namespace.to_string()),
            ..Default::default()
        },
        role_ref: RoleRef {
            api_group: RBAC_API_GROUP.to_string(),
            kind: "Role".to_string(),
            name: name.to_string(),
        },
        subjects: Some(subjects),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bootstrap_post_csr_binding() {
        let RbacObjects::Cluster(crb) = objects_for(RbacRule::BootstrapTokenPostCsr) else {
            panic!("expected a ClusterRoleBinding");
        };
        assert_eq!(crb.metadata.name.as_deref(), Some("kubeadm:kubelet-bootstrap"));
        assert_eq!(crb.role_ref.name, "system:node-bootstrapper");
        let subjects = crb.subjects.unwrap();
        assert_eq!(subjects[0].kind, "Group");
        assert_eq!(subjects[0].name, BOOTSTRAP_TOKEN_GROUP);
    }

    #[test]
    fn test_certificate_rotation_binds_nodes() {
        let RbacObjects::Cluster(crb) = objects_for(RbacRule::NodeCertificateRotation) else {
            panic!("expected a ClusterRoleBinding");
        };
        assert!(crb.role_ref.name.ends_with(":selfnodeclient"));
        assert_eq!(crb.subjects.unwrap()[0].name, NODES_GROUP);
    }

    #[test]
    fn test_cluster_info_rule_is_namespaced() {
        let RbacObjects::Namespaced(role, binding) = objects_for(RbacRule::ClusterInfo) else {
            panic!("expected a Role and RoleBinding");
        };
        assert_eq!(role.metadata.namespace.as_deref(), Some(NAMESPACE_PUBLIC));
        let rule = &role.rules.unwrap()[0];
        assert_eq!(rule.verbs, vec!["get"]);
        assert_eq!(
            rule.resource_names.as_deref(),
            Some(&[CLUSTER_INFO_CONFIG_MAP.to_string()][..])
        );
        assert_eq!(binding.role_ref.kind, "Role");
        assert_eq!(binding.subjects.unwrap()[0].name, ANONYMOUS_USER);
    }

    #[test]
    fn test_kubelet_config_reader() {
        let (role, binding) = kubelet_config_reader("kubelet-config-1.11");
        assert_eq!(
            role.metadata.name.as_deref(),
            Some("kubeadm:kubelet-config-1.11")
        );
        assert_eq!(binding.subjects.unwrap().len(), 2);
    }

    #[test]
    fn test_rule_display() {
        assert_eq!(
            RbacRule::BootstrapTokenAutoApprove.to_string(),
            "kubeadm:node-autoapprove-bootstrap"
        );
    }
}
