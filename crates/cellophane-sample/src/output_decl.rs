//! Declared-output types shared between `Samples` (which stores them) and
//! the `cellophane-output` crate (which resolves them). Living here avoids a
//! dependency cycle: `cellophane-output` depends on this crate for the
//! `Samples`/`Sample` types it resolves globs against, so the shared output
//! *data* types live on this side of the boundary, the same way
//! `shipper-types` is the hub crate several algorithm crates in the teacher
//! workspace depend on without depending on each other.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

pub const DEFAULT_CHECKPOINT_LABEL: &str = "main";

/// A single, already-concrete declared output.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Output {
    pub src: PathBuf,
    pub dst: PathBuf,
    pub checkpoint: String,
    pub optional: bool,
}

impl Output {
    pub fn new(src: impl Into<PathBuf>, dst: impl Into<PathBuf>) -> Self {
        Self {
            src: src.into(),
            dst: dst.into(),
            checkpoint: DEFAULT_CHECKPOINT_LABEL.to_string(),
            optional: false,
        }
    }

    fn dedup_key(&self) -> OutputKey {
        OutputKey::Concrete {
            src: self.src.clone(),
            dst: self.dst.clone(),
        }
    }
}

/// A templated output whose concrete source path(s) are only known once
/// resolved against a workdir (glob expansion happens in
/// `cellophane-output`).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct OutputGlob {
    pub src_template: String,
    pub dst_dir: Option<String>,
    pub dst_name: Option<String>,
    pub checkpoint: String,
    pub optional: bool,
}

impl OutputGlob {
    pub fn new(src_template: impl Into<String>) -> Self {
        Self {
            src_template: src_template.into(),
            dst_dir: None,
            dst_name: None,
            checkpoint: DEFAULT_CHECKPOINT_LABEL.to_string(),
            optional: false,
        }
    }

    fn dedup_key(&self) -> OutputKey {
        OutputKey::Glob {
            src_template: self.src_template.clone(),
            dst_dir: self.dst_dir.clone(),
            dst_name: self.dst_name.clone(),
        }
    }
}

/// Either a concrete [`Output`] or a templated [`OutputGlob`], stored
/// together in `Samples.outputs`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum OutputDecl {
    Output(Output),
    Glob(OutputGlob),
}

impl OutputDecl {
    pub fn dedup_key(&self) -> OutputKey {
        match self {
            OutputDecl::Output(o) => o.dedup_key(),
            OutputDecl::Glob(g) => g.dedup_key(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum OutputKey {
    Concrete {
        src: PathBuf,
        dst: PathBuf,
    },
    Glob {
        src_template: String,
        dst_dir: Option<String>,
        dst_name: Option<String>,
    },
}
