//! The [`Executor`]: submits jobs onto a worker thread pool (via Tokio's
//! blocking-task pool, reached through a dedicated multi-threaded runtime
//! this crate owns), tracks them while pending, and terminates them on
//! request. Per-job locking and the `wait`/`terminate` pairing are grounded
//! on `shipper::lock::LockFile`'s guard discipline, generalized from one
//! lock to one lock per pending job.

use std::collections::HashMap;
use std::fs;
use std::path::PathBuf;
use std::sync::atomic::AtomicBool;
use std::sync::{Arc, Mutex};

use tokio::task::JoinHandle;
use uuid::Uuid;

use crate::job::{conda_bootstrap, merge_environment, JobOutcome, JobSpec};
use crate::process::{run_job, TerminateFlag};

#[derive(Debug, thiserror::Error)]
pub enum ExecutorError {
    #[error("job uuid {0} is already pending")]
    UuidAlreadyPending(Uuid),
    #[error("no pending job with uuid {0}")]
    UnknownUuid(Uuid),
    #[error("failed to create workdir {path}: {source}")]
    Workdir {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

struct PendingJob {
    terminate: TerminateFlag,
}

/// One worker-process-equivalent job scheduler, scoped to a single runner
/// workdir the way the engine's data model requires executors to be.
pub struct Executor {
    name: String,
    workdir_base: PathBuf,
    config_env: HashMap<String, String>,
    default_cpus: Option<u32>,
    default_memory: Option<String>,
    runtime: tokio::runtime::Runtime,
    pending: Arc<Mutex<HashMap<Uuid, PendingJob>>>,
    submission_order: Arc<Mutex<Vec<Uuid>>>,
}

impl Executor {
    pub fn new(
        name: impl Into<String>,
        workdir_base: impl Into<PathBuf>,
        config_env: HashMap<String, String>,
    ) -> anyhow::Result<Self> {
        let runtime = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(4)
            .enable_time()
            .build()?;
        Ok(Self {
            name: name.into(),
            workdir_base: workdir_base.into(),
            config_env,
            default_cpus: None,
            default_memory: None,
            runtime,
            pending: Arc::new(Mutex::new(HashMap::new())),
            submission_order: Arc::new(Mutex::new(Vec::new())),
        })
    }

    pub fn with_defaults(mut self, cpus: Option<u32>, memory: Option<String>) -> Self {
        self.default_cpus = cpus;
        self.default_memory = memory;
        self
    }

    /// Schedules `spec` on the worker pool, returning its join handle (the
    /// "future" in the engine's `submit(...) -> (future, uuid)` contract)
    /// and the job's uuid. The same uuid may not be submitted twice while
    /// pending. `spec.wait` blocks the calling thread until the job
    /// terminates before returning.
    pub fn submit(
        &self,
        mut spec: JobSpec,
    ) -> Result<(JoinHandle<JobOutcome>, Uuid), ExecutorError> {
        let uuid = spec.uuid.unwrap_or_else(Uuid::new_v4);
        {
            let pending = self.pending.lock().unwrap();
            if pending.contains_key(&uuid) {
                return Err(ExecutorError::UuidAlreadyPending(uuid));
            }
        }

        let workdir = spec.workdir.clone().unwrap_or_else(|| {
            self.workdir_base
                .join(format!("{}.{}.{}", spec.name, uuid.simple(), self.name))
        });
        fs::create_dir_all(&workdir).map_err(|source| ExecutorError::Workdir {
            path: workdir.clone(),
            source,
        })?;

        let mut env = merge_environment(&self.config_env, &spec.env);
        let cpus = spec.cpus.or(self.default_cpus);
        let memory = spec.memory.clone().or_else(|| self.default_memory.clone());
        if let Some(cpus) = cpus {
            env.insert("CELLOPHANE_JOB_CPUS".to_string(), cpus.to_string());
        }
        if let Some(memory) = memory {
            env.insert("CELLOPHANE_JOB_MEMORY".to_string(), memory);
        }
        let mut argv = spec.argv.clone();
        if let Some(conda_spec) = spec.conda_spec.take() {
            let (bootstrapped, conda_env) = conda_bootstrap(&argv, &conda_spec);
            argv = bootstrapped;
            env.extend(conda_env);
        }

        let stdout_path = workdir.join(format!("{}.{}.{}.stdout", spec.name, uuid, self.name));
        let stderr_path = workdir.join(format!("{}.{}.{}.stderr", spec.name, uuid, self.name));

        let terminate: TerminateFlag = Arc::new(AtomicBool::new(false));
        let pending_map = Arc::clone(&self.pending);
        let terminate_for_job = Arc::clone(&terminate);

        tracing::info!(job = %spec.name, %uuid, workdir = %workdir.display(), "submitting job");

        let handle = self.runtime.spawn_blocking(move || {
            let outcome = run_job(argv, &workdir, env, stdout_path, stderr_path, terminate_for_job);
            pending_map.lock().unwrap().remove(&uuid);
            outcome
        });

        self.pending
            .lock()
            .unwrap()
            .insert(uuid, PendingJob { terminate });
        self.submission_order.lock().unwrap().push(uuid);

        if spec.wait {
            let outcome = self.runtime.block_on(async {
                // The handle is awaited here, not returned to the caller;
                // submit still returns a handle below for interface
                // uniformity, pre-resolved by the time the caller sees it.
                handle.await
            });
            let resolved = self.runtime.spawn(async move {
                outcome.unwrap_or_else(|e| JobOutcome::Failed {
                    error: format!("job task panicked: {e}"),
                })
            });
            return Ok((resolved, uuid));
        }

        Ok((handle, uuid))
    }

    /// Waits for one pending job to finish by uuid. A no-op if the uuid is
    /// not currently pending (it may have already completed).
    pub fn wait(&self, uuid: Uuid) {
        loop {
            let still_pending = self.pending.lock().unwrap().contains_key(&uuid);
            if !still_pending {
                return;
            }
            std::thread::sleep(std::time::Duration::from_millis(50));
        }
    }

    /// Requests termination of one job, or every pending job in submission
    /// order when `uuid` is `None`.
    pub fn terminate(&self, uuid: Option<Uuid>) {
        match uuid {
            Some(uuid) => self.flag_terminate(uuid),
            None => {
                let order = self.submission_order.lock().unwrap().clone();
                for uuid in order {
                    self.flag_terminate(uuid);
                }
            }
        }
    }

    fn flag_terminate(&self, uuid: Uuid) {
        if let Some(job) = self.pending.lock().unwrap().get(&uuid) {
            job.terminate.store(true, std::sync::atomic::Ordering::SeqCst);
        }
    }

    pub fn pending_count(&self) -> usize {
        self.pending.lock().unwrap().len()
    }
}
