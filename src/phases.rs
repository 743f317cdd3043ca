//! Post-upgrade step implementations.
//!
//! The simple steps are single collaborator calls made directly by the
//! orchestrator; the modules here hold the steps carrying their own decisions.

pub mod certs;
pub mod dns;
pub mod kubelet;
pub mod selfhosting;

/// How a step that did not fail ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Completion {
    Done,
    Skipped(String),
}

impl Completion {
    pub fn skipped(reason: impl Into<String>) -> Self {
        Self::Skipped(reason.into())
    }
}
