//! All-or-nothing application of reversible actions.
//!
//! Actions are applied in order. When one fails, every action already applied
//! is reverted (newest first) and the revert failures are folded into the
//! returned error together with the original failure.

use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use tracing::{debug, warn};

use crate::error::{KpuError, format_aggregate};

/// An action that can be undone after it was applied.
pub trait Reversible {
    fn apply(&self) -> Result<()>;
    fn revert(&self) -> Result<()>;
    fn describe(&self) -> String;
}

/// Apply every action or none of them.
pub fn apply_all<A: Reversible>(actions: &[A]) -> Result<()> {
    for (idx, action) in actions.iter().enumerate() {
        let Err(original) = action.apply() else {
            debug!("Applied {}", action.describe());
            continue;
        };

        let completed = &actions[..idx];
        let mut errors = vec![format!("{original:#}")];
        for done in completed.iter().rev() {
            if let Err(e) = done.revert() {
                warn!("Failed to revert {}: {:#}", done.describe(), e);
                errors.push(format!("{e:#}"));
            }
        }

        return Err(KpuError::Rollback {
            completed: completed
                .iter()
                .map(Reversible::describe)
                .collect::<Vec<_>>()
                .join(", "),
            errors: format_aggregate(&errors),
        }
        .into());
    }

    Ok(())
}

/// Rename of one file, reverted by renaming it back. Never replaces an
/// existing destination.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileMove {
    pub from: PathBuf,
    pub to: PathBuf,
}

impl Reversible for FileMove {
    fn apply(&self) -> Result<()> {
        if fs::symlink_metadata(&self.to).is_ok() {
            anyhow::bail!(
                "failed to move {} to {}: destination already exists",
                self.from.display(),
                self.to.display()
            );
        }
        fs::rename(&self.from, &self.to).with_context(|| {
            format!(
                "failed to move {} to {}",
                self.from.display(),
                self.to.display()
            )
        })
    }

    fn revert(&self) -> Result<()> {
        fs::rename(&self.to, &self.from).with_context(|| {
            format!(
                "failed to move {} back to {}",
                self.to.display(),
                self.from.display()
            )
        })
    }

    fn describe(&self) -> String {
        format!("{} -> {}", self.from.display(), self.to.display())
    }
}

/// Pending file relocations, disjoint on both sources and destinations.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FileMoveSet {
    moves: Vec<FileMove>,
}

impl FileMoveSet {
    /// Build a move set, rejecting a path that appears twice on either side.
    pub fn new<I, S, D>(pairs: I) -> Result<Self>
    where
        I: IntoIterator<Item = (S, D)>,
        S: Into<PathBuf>,
        D: Into<PathBuf>,
    {
        let mut sources = HashSet::new();
        let mut destinations = HashSet::new();
        let mut moves = Vec::new();

        for (from, to) in pairs {
            let (from, to) = (from.into(), to.into());
            if !sources.insert(from.clone()) {
                return Err(KpuError::Config(format!(
                    "{} is moved more than once",
                    from.display()
                ))
                .into());
            }
            if !destinations.insert(to.clone()) {
                return Err(KpuError::Config(format!(
                    "{} is the destination of more than one move",
                    to.display()
                ))
                .into());
            }
            moves.push(FileMove { from, to });
        }

        Ok(Self { moves })
    }

    pub fn moves(&self) -> &[FileMove] {
        &self.moves
    }
}

/// Move every file of the set, or put back the ones already moved.
pub fn move_files(set: FileMoveSet) -> Result<()> {
    debug!("Moving {} file(s)", set.moves().len());
    apply_all(set.moves())
}

/// Convenience for callers building a set from a directory and a file list.
pub fn relocation_set(from_dir: &Path, to_dir: &Path, names: &[&str]) -> Result<FileMoveSet> {
    FileMoveSet::new(
        names
            .iter()
            .map(|name| (from_dir.join(name), to_dir.join(name))),
    )
}
