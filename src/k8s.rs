//! Kubernetes-facing collaborators of the post-upgrade steps.

pub mod addons;
pub mod client;
pub mod cluster;
pub mod rbac;
pub mod selfhosting;
pub mod waiter;
