//! The cleanup ledger: a root-scoped set of paths slated for removal at the
//! end of a session.
//!
//! Two forms exist, matching §4.6: a [`DeferredCleaner`] that only records
//! intent (handed to user `main` functions and merged up into the
//! dispatcher) and an active [`Cleaner`] that can actually delete. The
//! `Drop`-releases-best-effort discipline for scoped guards is grounded on
//! `shipper::lock::LockFile`; here there is no single guarded resource, so
//! the ledger itself is the guard — `clean()` is an explicit, not a `Drop`,
//! operation, because the dispatcher needs to observe per-path failures.

use std::fs;
use std::path::{Path, PathBuf};

#[derive(Debug, thiserror::Error)]
pub enum CleanupError {
    #[error("refusing to register {path} outside root {root} (pass ignore_outside_root to override)", path = path.display(), root = root.display())]
    OutsideRoot { path: PathBuf, root: PathBuf },
}

/// One path that could not be removed during [`Cleaner::clean`].
#[derive(Debug)]
pub struct CleanupFailure {
    pub path: PathBuf,
    pub error: std::io::Error,
}

/// Records cleanup intent without the ability to act on it. Handed to
/// runner `main` functions so user code can register paths for removal
/// without being able to trigger deletion mid-run.
#[derive(Debug, Clone, Default)]
pub struct DeferredCleaner {
    root: PathBuf,
    registered: Vec<PathBuf>,
}

impl DeferredCleaner {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            registered: Vec::new(),
        }
    }

    pub fn register(
        &mut self,
        path: impl Into<PathBuf>,
        ignore_outside_root: bool,
    ) -> Result<(), CleanupError> {
        let path = path.into();
        if !ignore_outside_root && !path.starts_with(&self.root) {
            return Err(CleanupError::OutsideRoot {
                path,
                root: self.root.clone(),
            });
        }
        if !self.registered.contains(&path) {
            self.registered.push(path);
        }
        Ok(())
    }

    pub fn unregister(&mut self, path: &Path) {
        self.registered.retain(|p| p != path);
    }

    pub fn registered(&self) -> &[PathBuf] {
        &self.registered
    }

    /// Folds another deferred cleaner's registrations into this one,
    /// de-duplicating by path. Used when the dispatcher combines the
    /// per-runner deferred cleaners it collects under `cleaner_lock`.
    pub fn merge(&mut self, other: DeferredCleaner) {
        for path in other.registered {
            if !self.registered.contains(&path) {
                self.registered.push(path);
            }
        }
    }
}

/// The aggregate, active ledger the dispatcher runs at session end.
#[derive(Debug, Clone, Default)]
pub struct Cleaner {
    root: PathBuf,
    registered: Vec<PathBuf>,
}

impl Cleaner {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            registered: Vec::new(),
        }
    }

    /// Absorbs a `DeferredCleaner`'s registrations into the active ledger.
    pub fn merge_deferred(&mut self, deferred: DeferredCleaner) {
        for path in deferred.registered {
            if !self.registered.contains(&path) {
                self.registered.push(path);
            }
        }
    }

    pub fn unregister(&mut self, path: &Path) {
        self.registered.retain(|p| p != path);
    }

    pub fn registered(&self) -> &[PathBuf] {
        &self.registered
    }

    /// Deletes every registered path in reverse-depth order (deepest paths
    /// first, so a parent directory removed after its children never
    /// leaves an orphaned entry behind), tolerating missing targets and
    /// collecting any other removal failure for the caller to log.
    pub fn clean(&mut self) -> Vec<CleanupFailure> {
        let mut ordered = self.registered.clone();
        ordered.sort_by_key(|p| std::cmp::Reverse(p.components().count()));

        let mut failures = Vec::new();
        for path in &ordered {
            let relpath = path.strip_prefix(&self.root).unwrap_or(path);
            tracing::info!(path = %relpath.display(), "Removing {}", relpath.display());
            if let Err(error) = remove_path(path) {
                if error.kind() != std::io::ErrorKind::NotFound {
                    tracing::warn!(path = %path.display(), %error, "failed to remove cleanup path");
                    failures.push(CleanupFailure {
                        path: path.clone(),
                        error,
                    });
                }
            }
        }
        self.registered.clear();
        failures
    }
}

fn remove_path(path: &Path) -> std::io::Result<()> {
    match fs::symlink_metadata(path) {
        Ok(meta) if meta.is_dir() => fs::remove_dir_all(path),
        Ok(_) => fs::remove_file(path),
        Err(e) => Err(e),
    }
}
