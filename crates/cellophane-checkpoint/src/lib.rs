//! Per-label content-hash checkpoint store.
//!
//! A [`Checkpoint`] tracks a set of paths (sample files, declared output
//! sources, explicit extras) and persists a `{path -> hash}` map so a later
//! run can cheaply tell whether anything tracked under the label has
//! changed. The on-disk format and the atomic-write discipline are
//! grounded directly on `shipper::state`'s `atomic_write_json` /
//! `fsync_parent_dir` pair: write to a `.tmp` sibling, `sync_all`, rename
//! into place, then best-effort fsync the parent directory so the rename
//! itself is durable.

use std::collections::BTreeMap;
use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::UNIX_EPOCH;

use anyhow::{Context, Result};
use cellophane_util::stable_fingerprint;

/// Tracks and fingerprints a named set of paths under one runner workdir.
#[derive(Debug, Clone)]
pub struct Checkpoint {
    label: String,
    workdir: PathBuf,
    tracked_paths: Vec<PathBuf>,
    extra_paths: Vec<PathBuf>,
}

impl Checkpoint {
    pub fn new(label: impl Into<String>, workdir: impl Into<PathBuf>) -> Self {
        Self {
            label: label.into(),
            workdir: workdir.into(),
            tracked_paths: Vec::new(),
            extra_paths: Vec::new(),
        }
    }

    /// Replaces the base tracked-path set (sample files plus declared
    /// output sources). Invalidation is implicit: the expanded path set is
    /// recomputed from scratch on every `store`/`check`/`hexdigest` call.
    pub fn set_tracked_paths(&mut self, paths: Vec<PathBuf>) {
        self.tracked_paths = paths;
    }

    pub fn add_paths<I: IntoIterator<Item = PathBuf>>(&mut self, paths: I) {
        self.extra_paths.extend(paths);
    }

    fn checkpoint_file(&self) -> PathBuf {
        self.workdir.join(format!(".checkpoints.{}.json", self.label))
    }

    /// Recursively expands directories in the tracked/extra path sets into
    /// their regular files, at call time — a directory's contents are never
    /// cached across calls.
    fn expand_paths(&self) -> Vec<PathBuf> {
        let mut expanded = Vec::new();
        for base in self.tracked_paths.iter().chain(self.extra_paths.iter()) {
            expand_one(base, &mut expanded);
        }
        expanded.sort();
        expanded.dedup();
        expanded
    }

    fn per_file_hash(&self, path: &Path, args: &[String], kwargs: &BTreeMap<String, String>) -> String {
        let name = path.to_string_lossy();
        let kwargs_repr = kwargs
            .iter()
            .map(|(k, v)| format!("{k}={v}"))
            .collect::<Vec<_>>()
            .join(",");

        let stat = fs::metadata(path).ok();
        match stat {
            Some(meta) => {
                let size = meta.len();
                let mtime_secs = meta
                    .modified()
                    .ok()
                    .and_then(|m| m.duration_since(UNIX_EPOCH).ok())
                    .map(|d| d.as_secs())
                    .unwrap_or(0);
                stable_fingerprint([
                    self.label.as_bytes(),
                    name.as_bytes(),
                    size.to_string().as_bytes(),
                    mtime_secs.to_string().as_bytes(),
                    args.join(",").as_bytes(),
                    kwargs_repr.as_bytes(),
                ])
            }
            None => {
                // Missing files contribute randomness so the persisted hash
                // can never match a freshly computed one: a missing tracked
                // path always forces a checkpoint mismatch.
                let junk: [u8; 8] = rand::random();
                stable_fingerprint([
                    self.label.as_bytes(),
                    name.as_bytes(),
                    &junk,
                    args.join(",").as_bytes(),
                    kwargs_repr.as_bytes(),
                ])
            }
        }
    }

    fn compute_map(&self, args: &[String], kwargs: &BTreeMap<String, String>) -> BTreeMap<String, String> {
        self.expand_paths()
            .into_iter()
            .map(|p| {
                let hash = self.per_file_hash(&p, args, kwargs);
                (p.to_string_lossy().to_string(), hash)
            })
            .collect()
    }

    /// Writes the current fingerprint map to `<workdir>/.checkpoints.<label>.json`.
    pub fn store(&self, args: &[String], kwargs: &BTreeMap<String, String>) -> Result<()> {
        let map = self.compute_map(args, kwargs);
        atomic_write_json(&self.checkpoint_file(), &map)
    }

    /// True iff the persisted map has exactly today's path set and every
    /// hash still matches.
    pub fn check(&self, args: &[String], kwargs: &BTreeMap<String, String>) -> Result<bool> {
        let path = self.checkpoint_file();
        let persisted: BTreeMap<String, String> = match fs::read_to_string(&path) {
            Ok(contents) => serde_json::from_str(&contents)
                .with_context(|| format!("corrupt checkpoint file {}", path.display()))?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(false),
            Err(e) => return Err(e).context("failed to read checkpoint file"),
        };
        let current = self.compute_map(args, kwargs);
        Ok(persisted == current)
    }

    /// A combined hash of every per-file hash plus the label, stable
    /// regardless of tracked-path insertion order, suitable for cross-run
    /// comparison.
    pub fn hexdigest(&self, args: &[String], kwargs: &BTreeMap<String, String>) -> String {
        let map = self.compute_map(args, kwargs);
        let mut fragments: Vec<String> = map.into_iter().map(|(k, v)| format!("{k}={v}")).collect();
        fragments.sort();
        fragments.push(self.label.clone());
        stable_fingerprint(fragments)
    }
}

fn expand_one(path: &Path, out: &mut Vec<PathBuf>) {
    match fs::metadata(path) {
        Ok(meta) if meta.is_dir() => {
            let Ok(entries) = fs::read_dir(path) else {
                return;
            };
            for entry in entries.flatten() {
                expand_one(&entry.path(), out);
            }
        }
        Ok(meta) if meta.is_file() => out.push(path.to_path_buf()),
        _ => out.push(path.to_path_buf()), // missing: kept so it forces a mismatch
    }
}

fn atomic_write_json<T: serde::Serialize>(path: &Path, value: &T) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("failed to create {}", parent.display()))?;
    }
    let tmp_path = path.with_extension("json.tmp");
    {
        let mut tmp = File::create(&tmp_path)
            .with_context(|| format!("failed to create {}", tmp_path.display()))?;
        let json = serde_json::to_vec_pretty(value).context("failed to serialize checkpoint")?;
        tmp.write_all(&json).context("failed to write checkpoint")?;
        tmp.sync_all().context("failed to fsync checkpoint")?;
    }
    fs::rename(&tmp_path, path)
        .with_context(|| format!("failed to rename {} into place", tmp_path.display()))?;
    fsync_parent_dir(path);
    Ok(())
}

fn fsync_parent_dir(path: &Path) {
    if let Some(parent) = path.parent() {
        if let Ok(dir) = File::open(parent) {
            let _ = dir.sync_all();
        }
    }
}

/// A by-label factory for [`Checkpoint`]s rooted at one runner workdir.
pub struct Checkpoints {
    workdir: PathBuf,
}

impl Checkpoints {
    pub fn new(workdir: impl Into<PathBuf>) -> Self {
        Self {
            workdir: workdir.into(),
        }
    }

    pub fn get(&self, label: impl Into<String>) -> Checkpoint {
        Checkpoint::new(label, self.workdir.clone())
    }
}
