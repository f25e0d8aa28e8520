//! Programmatic surface for the `cellophane` binary: fixed engine-level
//! flag parsing, `.cellophane.toml` + environment + CLI override merging,
//! a YAML samples-file loader, and `SIGINT` wiring. Embedders who want the
//! exact CLI behavior without a subprocess call [`run`] directly — the
//! `cellophane` binary itself is a thin forwarder, mirroring
//! `shipper-cli`'s own library/binary split.
//!
//! Module discovery — resolving a schema into dynamic flags, walking a
//! project for runner/hook definitions — is an external collaborator's
//! job per the engine's design notes; this crate only wires the fixed
//! flag set the core itself depends on; the `Dispatcher` it hands back to
//! callers starts with no runners or hooks registered; embedders that
//! need their own, in a real program, extend it before calling
//! [`Dispatcher::run`].

use std::fs;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{Context, Result};
use cellophane::Dispatcher;
use cellophane_config::{CellophaneConfig, CliOverrides};
use cellophane_container::{Container, Value as ContainerValue};
use cellophane_sample::{Sample, Samples};
use clap::Parser;
use serde::Deserialize;

/// The fixed engine-level flags of §6: everything the core itself
/// consumes, independent of any schema-derived dynamic flag.
#[derive(Parser, Debug)]
#[command(name = "cellophane", version)]
#[command(about = "Session orchestration engine for sample-processing pipelines")]
pub struct Cli {
    /// Session root; `.cellophane.toml` is looked up here.
    #[arg(long, default_value = ".")]
    pub root: PathBuf,

    #[arg(long)]
    pub workdir: Option<PathBuf>,

    #[arg(long)]
    pub resultdir: Option<PathBuf>,

    #[arg(long)]
    pub logdir: Option<PathBuf>,

    /// Repeatable; e.g. `--tag release --tag qc`.
    #[arg(long = "tag")]
    pub tags: Vec<String>,

    #[arg(long)]
    pub samples_file: Option<PathBuf>,

    #[arg(long)]
    pub executor_name: Option<String>,

    #[arg(long)]
    pub executor_cpus: Option<u32>,

    #[arg(long)]
    pub executor_memory: Option<String>,

    /// Overrides `.cellophane.toml`'s default location of `<root>/.cellophane.toml`.
    #[arg(long)]
    pub config_file: Option<PathBuf>,
}

impl Cli {
    fn into_overrides(self) -> (PathBuf, Option<PathBuf>, CliOverrides) {
        let overrides = CliOverrides {
            workdir: self.workdir,
            resultdir: self.resultdir,
            logdir: self.logdir,
            tag: self.tags,
            samples_file: self.samples_file,
            executor_name: self.executor_name,
            executor_cpus: self.executor_cpus,
            executor_memory: self.executor_memory,
        };
        (self.root, self.config_file, overrides)
    }
}

/// One row of the YAML samples file — deliberately not `cellophane_sample::Sample`
/// itself, since that type's `uuid` is assigned fresh per run, never read
/// from input.
#[derive(Debug, Deserialize)]
struct SampleRow {
    id: String,
    #[serde(default)]
    files: Vec<PathBuf>,
    #[serde(default)]
    meta: serde_yaml::Mapping,
}

/// Loads a YAML samples file into a fresh [`Samples`] collection, per §6's
/// "Samples-file loading accepts YAML" addition.
pub fn load_samples_file(path: &Path) -> Result<Samples> {
    let content = fs::read_to_string(path)
        .with_context(|| format!("failed to read samples file {}", path.display()))?;
    let rows: Vec<SampleRow> = serde_yaml::from_str(&content)
        .with_context(|| format!("failed to parse samples file {}", path.display()))?;

    let mut samples = Samples::new();
    for row in rows {
        let mut sample = Sample::new(row.id);
        for file in row.files {
            sample.add_file(file);
        }
        for (key, value) in row.meta {
            let Some(key) = key.as_str() else { continue };
            sample.meta.insert(key.to_string(), yaml_to_container(value));
        }
        samples.union_one(sample);
    }
    Ok(samples)
}

fn yaml_to_container(value: serde_yaml::Value) -> ContainerValue {
    match value {
        serde_yaml::Value::Null => ContainerValue::Null,
        serde_yaml::Value::Bool(b) => ContainerValue::Bool(b),
        serde_yaml::Value::Number(n) => {
            if let Some(i) = n.as_i64() {
                ContainerValue::Int(i)
            } else {
                ContainerValue::Float(n.as_f64().unwrap_or_default())
            }
        }
        serde_yaml::Value::String(s) => ContainerValue::String(s),
        serde_yaml::Value::Sequence(items) => {
            ContainerValue::List(items.into_iter().map(yaml_to_container).collect())
        }
        serde_yaml::Value::Mapping(map) => {
            let mut container = Container::new();
            for (key, value) in map {
                if let Some(key) = key.as_str() {
                    container.insert(key.to_string(), yaml_to_container(value));
                }
            }
            ContainerValue::Map(container)
        }
        serde_yaml::Value::Tagged(tagged) => yaml_to_container(tagged.value),
    }
}

/// Resolves `.cellophane.toml` + environment + CLI overrides into a
/// `Container`, and builds a `Dispatcher` rooted at the resolved
/// `workdir`. No runners or hooks are registered — see the module docs.
pub fn build_dispatcher(cli: Cli) -> Result<(Dispatcher, Option<PathBuf>)> {
    let (root, config_file, overrides) = cli.into_overrides();

    let mut config = match &config_file {
        Some(path) => CellophaneConfig::load_from_file(path)?,
        None => CellophaneConfig::load_from_workspace(&root)?.unwrap_or_default(),
    };
    config.apply_env_overrides();
    let samples_file = overrides
        .samples_file
        .clone()
        .or_else(|| config.samples.file.clone());
    config.apply_cli_overrides(overrides);

    let workdir = root.join(&config.paths.workdir);
    let container = config.into_container();

    Ok((Dispatcher::new(&root, &workdir, container), samples_file))
}

/// Parses the fixed CLI flags, resolves config, loads samples, runs the
/// session, and returns the process exit code per §6: `0` on success
/// (including pipelines that ended with failed samples), `1` on an
/// unhandled framework error, `130` on `SIGINT`.
pub fn run() -> Result<ExitCode> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();
    let (dispatcher, samples_file) = build_dispatcher(cli)?;
    let dispatcher = Arc::new(dispatcher);

    let interrupt_target = Arc::clone(&dispatcher);
    ctrlc::set_handler(move || {
        tracing::warn!("SIGINT received, signaling dispatcher to interrupt");
        interrupt_target.interrupt();
    })
    .context("failed to install SIGINT handler")?;

    let samples = match samples_file {
        Some(path) => load_samples_file(&path)?,
        None => Samples::new(),
    };

    let outcome = dispatcher.run(samples);

    for failure in &outcome.cleanup_failures {
        tracing::warn!(path = %failure.path.display(), error = %failure.error, "cleanup failure");
    }

    let failed: Vec<_> = outcome.samples.failed().uuids().collect();
    if !failed.is_empty() {
        tracing::warn!(count = failed.len(), "session completed with failed samples");
    }

    if outcome.interrupted {
        Ok(ExitCode::from(130))
    } else {
        Ok(ExitCode::SUCCESS)
    }
}
