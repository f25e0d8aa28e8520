//! Configuration loading: `.cellophane.toml` plus `CELLOPHANE_*` environment
//! overrides and CLI flags, merged into the engine's [`Container`].
//!
//! Modeled on `shipper::config`'s nested sub-struct-with-`#[serde(default)]`
//! style and its `load_from_workspace`/`load_from_file` split; CLI overrides
//! win over environment, which wins over the file, matching the teacher's
//! `build_runtime_options` precedence. The JSON-Schema-to-flag compiler
//! itself is out of scope (an external collaborator per §1) — this crate
//! only implements the consumer side: merge file + env + explicit overrides
//! into a `Container`.

use std::env;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use cellophane_container::{Container, Value};
use serde::{Deserialize, Serialize};

pub const CONFIG_FILE_NAME: &str = ".cellophane.toml";

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ExecutorSection {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub cpus: Option<u32>,
    #[serde(default)]
    pub memory: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PathsSection {
    #[serde(default = "default_workdir")]
    pub workdir: PathBuf,
    #[serde(default = "default_resultdir")]
    pub resultdir: PathBuf,
    #[serde(default = "default_logdir")]
    pub logdir: PathBuf,
}

impl Default for PathsSection {
    fn default() -> Self {
        Self {
            workdir: default_workdir(),
            resultdir: default_resultdir(),
            logdir: default_logdir(),
        }
    }
}

fn default_workdir() -> PathBuf {
    PathBuf::from("work")
}

fn default_resultdir() -> PathBuf {
    PathBuf::from("results")
}

fn default_logdir() -> PathBuf {
    PathBuf::from("logs")
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct SamplesSection {
    #[serde(default)]
    pub file: Option<PathBuf>,
}

/// Configuration loaded from `.cellophane.toml`, covering the fixed
/// engine-level flags of §6 (`--workdir`, `--resultdir`, `--logdir`,
/// `--tag`, `--samples_file`, `--executor_name`, `--executor_cpus`,
/// `--executor_memory`).
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct CellophaneConfig {
    #[serde(default)]
    pub tag: Vec<String>,
    #[serde(default)]
    pub executor: ExecutorSection,
    #[serde(default)]
    pub paths: PathsSection,
    #[serde(default)]
    pub samples: SamplesSection,
}

/// CLI overrides for merging with config file and environment values.
/// `Option` fields mean "user did not pass this flag" when `None`, matching
/// `shipper::config::CliOverrides`'s convention.
#[derive(Debug, Default)]
pub struct CliOverrides {
    pub workdir: Option<PathBuf>,
    pub resultdir: Option<PathBuf>,
    pub logdir: Option<PathBuf>,
    pub tag: Vec<String>,
    pub samples_file: Option<PathBuf>,
    pub executor_name: Option<String>,
    pub executor_cpus: Option<u32>,
    pub executor_memory: Option<String>,
}

impl CellophaneConfig {
    /// Searches `root` for [`CONFIG_FILE_NAME`]; `Ok(None)` if absent.
    pub fn load_from_workspace(root: &Path) -> Result<Option<Self>> {
        let path = root.join(CONFIG_FILE_NAME);
        if !path.exists() {
            return Ok(None);
        }
        Self::load_from_file(&path).map(Some)
    }

    pub fn load_from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config file {}", path.display()))?;
        toml::from_str(&content)
            .with_context(|| format!("failed to parse config file {}", path.display()))
    }

    /// Applies `CELLOPHANE_EXECUTOR_{NAME,CPUS,MEMORY}` environment
    /// overrides — the only fields the engine's fixed flag set exposes as
    /// environment variables.
    pub fn apply_env_overrides(&mut self) {
        if let Ok(v) = env::var("CELLOPHANE_EXECUTOR_NAME") {
            self.executor.name = Some(v);
        }
        if let Ok(v) = env::var("CELLOPHANE_EXECUTOR_CPUS") {
            if let Ok(cpus) = v.parse() {
                self.executor.cpus = Some(cpus);
            }
        }
        if let Ok(v) = env::var("CELLOPHANE_EXECUTOR_MEMORY") {
            self.executor.memory = Some(v);
        }
    }

    /// Applies CLI flag overrides, which take precedence over both the file
    /// and environment.
    pub fn apply_cli_overrides(&mut self, cli: CliOverrides) {
        if let Some(v) = cli.workdir {
            self.paths.workdir = v;
        }
        if let Some(v) = cli.resultdir {
            self.paths.resultdir = v;
        }
        if let Some(v) = cli.logdir {
            self.paths.logdir = v;
        }
        if !cli.tag.is_empty() {
            self.tag = cli.tag;
        }
        if let Some(v) = cli.samples_file {
            self.samples.file = Some(v);
        }
        if let Some(v) = cli.executor_name {
            self.executor.name = Some(v);
        }
        if let Some(v) = cli.executor_cpus {
            self.executor.cpus = Some(v);
        }
        if let Some(v) = cli.executor_memory {
            self.executor.memory = Some(v);
        }
    }

    /// Flattens this configuration into the engine's `Container`, the
    /// `config` argument every component ultimately reads via dotted paths
    /// (`executor.cpus`, `resultdir`, ...).
    pub fn into_container(self) -> Container {
        let mut root = Container::new();

        let mut executor = Container::new();
        if let Some(name) = self.executor.name {
            executor.insert("name", name);
        }
        if let Some(cpus) = self.executor.cpus {
            executor.insert("cpus", cpus as i64);
        }
        if let Some(memory) = self.executor.memory {
            executor.insert("memory", memory);
        }
        root.insert("executor", Value::Map(executor));

        root.insert("workdir", self.paths.workdir.display().to_string());
        root.insert("resultdir", self.paths.resultdir.display().to_string());
        root.insert("logdir", self.paths.logdir.display().to_string());

        if let Some(file) = self.samples.file {
            root.insert("samples_file", file.display().to_string());
        }

        if !self.tag.is_empty() {
            root.insert(
                "tag",
                Value::List(self.tag.into_iter().map(Value::String).collect()),
            );
        }

        root
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_produces_default_paths_in_container() {
        let config = CellophaneConfig::default();
        let container = config.into_container();
        assert_eq!(
            container.get("workdir").unwrap().as_str(),
            Some("work")
        );
        assert_eq!(
            container.get("resultdir").unwrap().as_str(),
            Some("results")
        );
    }

    #[test]
    fn load_from_workspace_returns_none_when_file_missing() {
        let tmp = tempfile::tempdir().expect("tempdir");
        assert!(CellophaneConfig::load_from_workspace(tmp.path())
            .expect("load")
            .is_none());
    }

    #[test]
    fn load_from_file_parses_nested_sections() {
        let tmp = tempfile::tempdir().expect("tempdir");
        let path = tmp.path().join(CONFIG_FILE_NAME);
        std::fs::write(
            &path,
            r#"
tag = ["release", "qc"]

[executor]
name = "local"
cpus = 4

[paths]
workdir = "scratch"
"#,
        )
        .expect("write");

        let config = CellophaneConfig::load_from_file(&path).expect("parse");
        assert_eq!(config.tag, vec!["release", "qc"]);
        assert_eq!(config.executor.name.as_deref(), Some("local"));
        assert_eq!(config.executor.cpus, Some(4));
        assert_eq!(config.paths.workdir, PathBuf::from("scratch"));
        assert_eq!(config.paths.resultdir, PathBuf::from("results"));
    }

    #[test]
    fn cli_overrides_win_over_file_and_env() {
        let mut config = CellophaneConfig {
            executor: ExecutorSection {
                name: Some("from-file".to_string()),
                cpus: Some(2),
                memory: None,
            },
            ..Default::default()
        };

        // SAFETY: test-only, no other thread in this process reads this var.
        unsafe { env::set_var("CELLOPHANE_EXECUTOR_CPUS", "8") };
        config.apply_env_overrides();
        assert_eq!(config.executor.cpus, Some(8));

        config.apply_cli_overrides(CliOverrides {
            executor_cpus: Some(16),
            ..Default::default()
        });
        assert_eq!(config.executor.cpus, Some(16));
        assert_eq!(config.executor.name.as_deref(), Some("from-file"));

        unsafe { env::remove_var("CELLOPHANE_EXECUTOR_CPUS") };
    }

    #[test]
    fn tag_list_is_only_set_when_non_empty() {
        let config = CellophaneConfig::default();
        let container = config.into_container();
        assert!(container.get("tag").is_none());

        let tagged = CellophaneConfig {
            tag: vec!["release".to_string()],
            ..Default::default()
        };
        let container = tagged.into_container();
        assert_eq!(
            container.get("tag").unwrap().as_list().unwrap().len(),
            1
        );
    }
}
