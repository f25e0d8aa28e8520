//! Job specification, outcome, and the environment/argv preparation the
//! executor performs before handing work to a child process.

use std::collections::HashMap;
use std::path::PathBuf;

use uuid::Uuid;

pub const ENSURED_PATH: &str = "/usr/local/bin:/usr/local/sbin:/usr/bin:/usr/sbin:/bin:/sbin";

/// One job submission, mirroring the executor's `submit(...)` contract.
#[derive(Debug, Clone)]
pub struct JobSpec {
    pub argv: Vec<String>,
    pub name: String,
    pub uuid: Option<Uuid>,
    pub workdir: Option<PathBuf>,
    pub env: HashMap<String, String>,
    /// Whether to additionally inherit the parent process's environment.
    pub inherit_os_env: bool,
    pub cpus: Option<u32>,
    pub memory: Option<String>,
    pub conda_spec: Option<String>,
    pub wait: bool,
}

impl JobSpec {
    pub fn new(name: impl Into<String>, argv: Vec<String>) -> Self {
        Self {
            argv,
            name: name.into(),
            uuid: None,
            workdir: None,
            env: HashMap::new(),
            inherit_os_env: true,
            cpus: None,
            memory: None,
            conda_spec: None,
            wait: false,
        }
    }
}

/// Terminal state of a submitted job.
#[derive(Debug, Clone)]
pub enum JobOutcome {
    Completed {
        exit_code: i32,
        stdout: PathBuf,
        stderr: PathBuf,
    },
    Failed {
        error: String,
    },
    Terminated {
        exit_code: i32,
    },
}

impl JobOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, JobOutcome::Completed { exit_code, .. } if *exit_code == 0)
    }
}

/// Merges `config_env` (lowest precedence) with the per-job `env`, ensuring
/// `PATH` always contains [`ENSURED_PATH`], appended after whatever the
/// caller already supplied.
pub fn merge_environment(
    config_env: &HashMap<String, String>,
    job_env: &HashMap<String, String>,
) -> HashMap<String, String> {
    let mut merged = config_env.clone();
    merged.extend(job_env.clone());
    let path_entry = merged.entry("PATH".to_string()).or_default();
    if path_entry.is_empty() {
        *path_entry = ENSURED_PATH.to_string();
    } else if !path_entry.split(':').any(|seg| ENSURED_PATH.split(':').any(|e| e == seg)) {
        path_entry.push(':');
        path_entry.push_str(ENSURED_PATH);
    }
    merged
}

/// Prefixes `argv` with a Conda bootstrap invocation and returns the
/// additional environment variables (`_CONDA_ENV_SPEC`, `_CONDA_ENV_NAME`)
/// the bootstrap script reads. No actual Conda integration happens here —
/// per the engine's non-goals, this is argv/env rewriting only.
pub fn conda_bootstrap(argv: &[String], conda_spec: &str) -> (Vec<String>, HashMap<String, String>) {
    let env_name = conda_spec
        .rsplit('/')
        .next()
        .unwrap_or(conda_spec)
        .to_string();
    let mut bootstrapped = vec!["cellophane-conda-bootstrap".to_string()];
    bootstrapped.extend_from_slice(argv);
    let mut env = HashMap::new();
    env.insert("_CONDA_ENV_SPEC".to_string(), conda_spec.to_string());
    env.insert("_CONDA_ENV_NAME".to_string(), env_name);
    (bootstrapped, env)
}
