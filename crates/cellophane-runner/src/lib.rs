//! Wraps a single runner's user function: per-run workdir, a scoped
//! [`Executor`], checkpoint access, declared-output resolution, and the
//! failure-classification contract of §4.2.
//!
//! `main` is a `Send + Sync` trait object invoked with a fixed argument
//! tuple, mirroring how `shipper::engine_parallel::publish_package` is a
//! free function called with a fixed tuple rather than a trait hierarchy.
//! Hook invocation is not owned here: the dispatcher hands in two closures
//! (`run_pre_hooks`/`run_post_hooks`) so this crate never depends on the
//! dispatcher's hook plumbing directly.

use std::collections::HashMap;
use std::panic::{self, AssertUnwindSafe};
use std::path::{Path, PathBuf};
use std::sync::atomic::AtomicBool;
use std::sync::Arc;

use cellophane_checkpoint::Checkpoints;
use cellophane_cleanup::DeferredCleaner;
use cellophane_container::Container;
use cellophane_executor::Executor;
use cellophane_hooks::HookFailure;
use cellophane_sample::Samples;
use cellophane_util::Timestamp;

/// The two ways a runner's `main` can terminate without returning.
#[derive(Debug)]
pub enum MainError {
    /// A cooperative interrupt (e.g. `SIGINT` observed mid-run) was
    /// honored by `main` returning early instead of completing.
    Interrupted,
    /// `main` requested the process-level equivalent of a non-zero exit.
    Exited(i32),
}

/// `main`'s return value: `None` means "use the samples it was handed
/// unchanged"; `Some` replaces them. Rust's static typing already excludes
/// the distilled spec's third case ("anything else logs a warning and uses
/// the input") — there is no value of this type that isn't one of the two
/// sanctioned dispositions.
pub type MainResult = Result<Option<Samples>, MainError>;

/// Everything `main` needs beyond the `Samples` it owns for this call.
pub struct RunnerContext<'a> {
    pub config: &'a Container,
    pub root: &'a Path,
    pub workdir: &'a Path,
    pub timestamp: Timestamp,
    pub executor: &'a Executor,
    pub cleaner: &'a mut DeferredCleaner,
    pub checkpoints: &'a Checkpoints,
    /// Set by the dispatcher on `SIGINT`; `main` implementations that run
    /// in a loop are expected to poll this and return
    /// `Err(MainError::Interrupted)` instead of completing.
    pub interrupted: &'a AtomicBool,
}

pub type MainFn = Arc<dyn Fn(Samples, &mut RunnerContext<'_>) -> MainResult + Send + Sync>;

/// One registered runner: a name, an optional `split_by` grouping field, and
/// the user function it wraps.
#[derive(Clone)]
pub struct Runner {
    pub name: String,
    pub label: String,
    pub split_by: Option<String>,
    main: MainFn,
}

impl Runner {
    pub fn new(name: impl Into<String>, main: MainFn) -> Self {
        let name = name.into();
        Self {
            label: name.clone(),
            name,
            split_by: None,
            main,
        }
    }

    pub fn with_split_by(mut self, field: impl Into<String>) -> Self {
        self.split_by = Some(field.into());
        self
    }
}

#[derive(Debug, thiserror::Error)]
pub enum RunnerFailure {
    #[error("Runner '{name}' was interrupted")]
    Interrupted { name: String },
    #[error("Runner '{name}' exited with non-zero status({code})")]
    NonZeroExit { name: String, code: i32 },
    #[error("Unhandled exception in runner '{name}': {message}")]
    Unhandled { name: String, message: String },
}

impl RunnerFailure {
    fn message(&self) -> String {
        self.to_string()
    }
}

/// Everything a runner invocation needs from its session that it does not
/// own itself: the session root, config, timestamp, and the dispatcher's
/// hook-running callbacks.
pub struct RunnerEnv<'a> {
    pub root: &'a Path,
    pub config: &'a Container,
    pub timestamp: Timestamp,
    pub run_pre_hooks: &'a (dyn Fn(Samples) -> Result<Samples, HookFailure> + Sync),
    pub run_post_hooks: &'a (dyn Fn(Samples) -> Result<Samples, HookFailure> + Sync),
    /// Invoked with the pre-exception subset and a rendered message when
    /// `main` raises anything other than a cooperative interrupt or a
    /// requested exit, per §4.2/§7 ("any other exception routes to
    /// exception hooks").
    pub run_exception_hooks: &'a (dyn Fn(&Samples, &str) + Sync),
    pub interrupted: &'a AtomicBool,
}

/// Runs one runner over `subset`, inside `workdir`. Always returns a
/// `Samples`/`DeferredCleaner` pair — failures are recorded as per-sample
/// `fail_reason`s, never propagated as an `Err`, matching the engine's
/// "explicit Result types, never exceptions-as-control-flow" design note
/// applied one level up: the runner boundary itself never fails, only the
/// samples crossing it do.
pub fn run(runner: &Runner, subset: Samples, workdir: PathBuf, env: &RunnerEnv<'_>) -> (Samples, DeferredCleaner) {
    let span = tracing::info_span!("runner", name = %runner.name, label = %runner.label);
    let _entered = span.enter();

    let mut cleaner = DeferredCleaner::new(env.root);
    if let Err(err) = cleaner.register(&workdir, false) {
        tracing::warn!(%err, "runner workdir lies outside session root, not tracked for cleanup");
    }

    if let Err(source) = std::fs::create_dir_all(&workdir) {
        tracing::error!(workdir = %workdir.display(), %source, "failed to create runner workdir");
        let failure = RunnerFailure::Unhandled {
            name: runner.name.clone(),
            message: format!("failed to create workdir {}: {source}", workdir.display()),
        };
        return (fail_all(subset, &failure), cleaner);
    }

    let executor = match Executor::new(runner.name.as_str(), &workdir, HashMap::new()) {
        Ok(executor) => executor,
        Err(source) => {
            let failure = RunnerFailure::Unhandled {
                name: runner.name.clone(),
                message: format!("failed to start executor: {source}"),
            };
            return (fail_all(subset, &failure), cleaner);
        }
    };

    let pre_hook_input = subset.clone();
    let subset = match (env.run_pre_hooks)(pre_hook_input) {
        Ok(subset) => subset,
        Err(hook_failure) => {
            tracing::error!(error = %hook_failure, "pre-hook failed, failing runner's sample scope");
            let mut failed = subset;
            let message = hook_failure.to_string();
            for sample in failed.iter_mut() {
                sample.fail(message.clone());
            }
            cleaner.unregister(&workdir);
            return (failed, cleaner);
        }
    };

    let checkpoints = Checkpoints::new(&workdir);
    let main = Arc::clone(&runner.main);
    let config = env.config;
    let timestamp = env.timestamp;
    let workdir_for_ctx = workdir.clone();

    let outcome = panic::catch_unwind(AssertUnwindSafe(|| {
        let mut ctx = RunnerContext {
            config,
            root: env.root,
            workdir: &workdir_for_ctx,
            timestamp,
            executor: &executor,
            cleaner: &mut cleaner,
            checkpoints: &checkpoints,
            interrupted: env.interrupted,
        };
        (main)(subset.clone(), &mut ctx)
    }));

    let result_samples = match outcome {
        Ok(Ok(disposition)) => {
            let mut samples = disposition.unwrap_or(subset);
            mark_survivors_processed(&mut samples);
            match cellophane_output::resolve_all(&samples, &workdir, config, timestamp) {
                Ok(resolved) => samples.resolve_globs(resolved),
                Err(err) => {
                    tracing::warn!(%err, "failed to resolve declared output globs");
                }
            }
            fail_unprocessed(&mut samples);
            samples
        }
        Ok(Err(MainError::Interrupted)) => {
            let failure = RunnerFailure::Interrupted {
                name: runner.name.clone(),
            };
            executor.terminate(None);
            fail_all(subset, &failure)
        }
        Ok(Err(MainError::Exited(code))) => {
            let failure = RunnerFailure::NonZeroExit {
                name: runner.name.clone(),
                code,
            };
            executor.terminate(None);
            fail_all(subset, &failure)
        }
        Err(panic) => {
            let message = panic_message(panic);
            tracing::error!(%message, "runner main panicked");
            let failure = RunnerFailure::Unhandled {
                name: runner.name.clone(),
                message: message.clone(),
            };
            executor.terminate(None);
            (env.run_exception_hooks)(&subset, &message);
            fail_all(subset, &failure)
        }
    };

    if !result_samples.failed().is_empty() {
        cleaner.unregister(&workdir);
    }

    let result_samples = match (env.run_post_hooks)(result_samples) {
        Ok(samples) => samples,
        Err(hook_failure) => {
            tracing::warn!(error = %hook_failure, "post-hook failed, ignoring (logged and swallowed)");
            hook_failure_samples(hook_failure)
        }
    };

    drop(executor);
    (result_samples, cleaner)
}

/// Post-hook failures are logged and swallowed per §7; there is no samples
/// value to recover here since the closure already consumed its input on
/// error, so this only exists to make the fallback path's intent explicit
/// rather than silently discarding data the caller might expect back.
fn hook_failure_samples(_failure: HookFailure) -> Samples {
    Samples::new()
}

fn mark_survivors_processed(samples: &mut Samples) {
    for sample in samples.iter_mut() {
        if sample.fail_reason.is_none() {
            sample.processed = true;
        }
    }
}

fn fail_unprocessed(samples: &mut Samples) {
    for sample in samples.iter_mut() {
        if !sample.processed && sample.fail_reason.is_none() {
            sample.fail(cellophane_sample::NOT_PROCESSED_REASON);
        }
    }
}

fn fail_all(mut subset: Samples, failure: &RunnerFailure) -> Samples {
    let message = failure.message();
    for sample in subset.iter_mut() {
        sample.fail(message.clone());
    }
    subset
}

fn panic_message(payload: Box<dyn std::any::Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}
