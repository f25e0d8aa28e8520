//! Session orchestration: runs the Main sequence of §4.4 — session
//! pre-hooks, runner fan-out with per-runner hooks, per-sample and session
//! post-hooks, then the cleanup ledger.
//!
//! Modeled on `shipper::engine_parallel::run_publish_level`'s thread-based
//! fan-out over an `Arc<Mutex<_>>`-guarded aggregate, generalized from "one
//! thread per publish level" to "one thread per (runner, split group)".
//! Unlike the teacher, runner jobs here are joined in submission order
//! rather than completion order — the engine's merge rules are associative
//! and commutative (§4.4), so a `thread::scope` + sequential `join()` is a
//! simpler, behaviorally equivalent alternative to a completion-order
//! channel. See `DESIGN.md` for the full rationale.

pub mod hooks;

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

use cellophane_checkpoint::Checkpoints;
use cellophane_cleanup::{Cleaner, CleanupFailure, DeferredCleaner};
use cellophane_container::Container;
use cellophane_hooks::{HookWhen, Per};
use cellophane_runner::{Runner, RunnerEnv};
use cellophane_sample::{MergeRegistry, Samples};
use cellophane_util::Timestamp;
use uuid::Uuid;

pub use hooks::HookRegistry;

/// Everything one call to [`Dispatcher::run`] needs: the hook registry, the
/// registered runners (in registration order, the order they are submitted
/// in per step 3 of §4.4), the session's root/workdir/config, and the
/// shared interrupt flag a `ctrlc` handler at the CLI boundary flips.
pub struct Dispatcher {
    pub root: PathBuf,
    pub workdir: PathBuf,
    pub config: Container,
    pub hooks: HookRegistry,
    pub runners: Vec<Runner>,
    pub merge_registry: MergeRegistry,
    pub interrupted: AtomicBool,
}

/// The outcome of one full session run: the final aggregate `Samples` and
/// any cleanup failures encountered while applying the ledger.
pub struct SessionOutcome {
    pub samples: Samples,
    pub cleanup_failures: Vec<CleanupFailure>,
    /// `true` if the run was cut short by the interrupt flag — the CLI uses
    /// this to choose exit code 130 over 1.
    pub interrupted: bool,
}

impl Dispatcher {
    pub fn new(root: impl Into<PathBuf>, workdir: impl Into<PathBuf>, config: Container) -> Self {
        Self {
            root: root.into(),
            workdir: workdir.into(),
            config,
            hooks: HookRegistry::new(),
            runners: Vec::new(),
            merge_registry: MergeRegistry::new(),
            interrupted: AtomicBool::new(false),
        }
    }

    pub fn with_hooks(mut self, hooks: HookRegistry) -> Self {
        self.hooks = hooks;
        self
    }

    pub fn with_merge_registry(mut self, registry: MergeRegistry) -> Self {
        self.merge_registry = registry;
        self
    }

    pub fn add_runner(&mut self, runner: Runner) {
        self.runners.push(runner);
    }

    /// Runs the Main sequence of §4.4 over `samples`, the initial set
    /// (typically loaded from the samples file per §4.7).
    pub fn run(&self, samples: Samples) -> SessionOutcome {
        let timestamp = Timestamp::now();
        let mut cleaner = Cleaner::new(&self.root);

        // Step 1: session pre-hooks, in Pre/Session order.
        let samples_after_pre = match self
            .hooks
            .run_phase(samples, HookWhen::Pre, Per::Session)
        {
            Ok(samples) => samples,
            Err(err) => {
                tracing::error!(%err, "session pre-hook ordering failed, aborting before any runner ran");
                self.hooks.run_exception_hooks(&Samples::new(), &err.to_string());
                return SessionOutcome {
                    samples: Samples::new(),
                    cleanup_failures: Vec::new(),
                    interrupted: false,
                };
            }
        };

        // Step 2: shared aggregate state, guarded the way
        // `run_publish_level` guards its `ExecutionState`.
        let result_samples: Mutex<Samples> = Mutex::new(Samples::new());
        let aggregate_cleaner: Mutex<DeferredCleaner> =
            Mutex::new(DeferredCleaner::new(&self.root));

        // Every (runner, split group) pair is one job; a sample with no
        // `split_by` match is handed whole to every runner, so its count of
        // pending jobs is the number of jobs whose subset contains it, not
        // simply 1 — precompute the full job list up front so the per-sample
        // post-hook counter (Invariant 4) starts at the right value.
        let jobs: Vec<(&Runner, Option<String>, Samples)> = self
            .runners
            .iter()
            .flat_map(|runner| {
                samples_after_pre
                    .split_by(runner.split_by.as_deref())
                    .into_iter()
                    .map(move |(group, subset)| (runner, group, subset))
            })
            .collect();

        let sample_runner_count: Mutex<HashMap<Uuid, usize>> = Mutex::new(HashMap::new());
        {
            let mut counts = sample_runner_count.lock().unwrap();
            for (_, _, subset) in &jobs {
                for uuid in subset.uuids() {
                    *counts.entry(uuid).or_insert(0) += 1;
                }
            }
        }

        // Step 3-4: fan out one job per (runner, split group); `thread::scope`
        // lets these borrow `self`/`samples_after_pre` without `Arc`-wrapping
        // them, since every spawned thread outlives only this call.
        // Built once: every job shares the same root/config/hooks/interrupt
        // flag, so one `RunnerEnv` borrowed by every spawned thread avoids
        // recreating closures that would otherwise need to outlive their own
        // loop iteration.
        let run_pre_hooks = |s: Samples| -> Result<Samples, cellophane_hooks::HookFailure> {
            self.hooks.runner_scoped(s, HookWhen::Pre)
        };
        let run_post_hooks = |s: Samples| -> Result<Samples, cellophane_hooks::HookFailure> {
            Ok(match self.hooks.runner_scoped(s, HookWhen::Post) {
                Ok(samples) => samples,
                Err(_) => unreachable!(
                    "runner_scoped(Post) always returns Ok; post-hook failures are absorbed internally"
                ),
            })
        };
        let run_exception_hooks = |samples: &Samples, message: &str| {
            self.hooks.run_exception_hooks(samples, message);
        };
        let env = RunnerEnv {
            root: &self.root,
            config: &self.config,
            timestamp,
            run_pre_hooks: &run_pre_hooks,
            run_post_hooks: &run_post_hooks,
            run_exception_hooks: &run_exception_hooks,
            interrupted: &self.interrupted,
        };

        std::thread::scope(|scope| {
            let mut handles = Vec::new();

            for (runner, group, subset) in jobs {
                let workdir = self.workdir.join(runner_workdir_name(runner, group.as_deref()));
                let env = &env;

                let result_samples = &result_samples;
                let aggregate_cleaner = &aggregate_cleaner;
                let sample_runner_count = &sample_runner_count;
                let hooks = &self.hooks;
                let merge_registry = &self.merge_registry;

                let handle = scope.spawn(move || {
                    let (samples_i, deferred_i) =
                        cellophane_runner::run(runner, subset, workdir, env);

                    aggregate_cleaner.lock().unwrap().merge(deferred_i);

                    let touched: Vec<Uuid> = samples_i.uuids().collect();
                    {
                        let mut aggregate = result_samples.lock().unwrap();
                        if aggregate.is_empty() {
                            *aggregate = samples_i;
                        } else if let Err(err) = aggregate.merge(&samples_i, merge_registry) {
                            // `merge_samples` only ever errors on a uuid
                            // mismatch, which this keyed-by-uuid merge
                            // path cannot produce; kept as a defensive
                            // branch per §7's "append missing, mark
                            // failed" guidance rather than a reachable one.
                            tracing::error!(%err, "sample merge failed unexpectedly");
                            for sample in samples_i.iter() {
                                if aggregate.get(sample.uuid()).is_none() {
                                    let mut failed = sample.clone();
                                    failed.fail(err.to_string());
                                    aggregate.union_one(failed);
                                }
                            }
                        }
                    }

                    let mut ready = Vec::new();
                    {
                        let mut counts = sample_runner_count.lock().unwrap();
                        for uuid in touched {
                            if let Some(count) = counts.get_mut(&uuid) {
                                *count = count.saturating_sub(1);
                                if *count == 0 {
                                    ready.push(uuid);
                                }
                            }
                        }
                    }

                    if !ready.is_empty() {
                        let snapshot = {
                            let aggregate = result_samples.lock().unwrap();
                            let mut subset = Samples::new();
                            for uuid in &ready {
                                if let Some(sample) = aggregate.get(*uuid) {
                                    subset.union_one(sample.clone());
                                }
                            }
                            subset
                        };
                        match hooks.run_phase(snapshot, HookWhen::Post, Per::Sample) {
                            Ok(processed) => {
                                let mut aggregate = result_samples.lock().unwrap();
                                for sample in processed.iter() {
                                    aggregate.union_one(sample.clone());
                                }
                            }
                            Err(err) => {
                                tracing::error!(%err, "per-sample post-hook ordering failed");
                            }
                        }
                    }
                });
                handles.push(handle);
            }

            // Step 5: join in submission order; a panicking runner thread is
            // itself a bug (cellophane-runner never propagates panics past
            // its own catch_unwind), so this only ever observes success.
            for handle in handles {
                if let Err(payload) = handle.join() {
                    let message = panic_message(payload);
                    tracing::error!(%message, "runner thread panicked unexpectedly");
                    self.hooks
                        .run_exception_hooks(&result_samples.lock().unwrap(), &message);
                }
            }
        });

        let was_interrupted = self.interrupted.load(Ordering::SeqCst);
        let aggregate = result_samples.into_inner().unwrap();

        // Step 6: session post-hooks, falling back to samples_after_pre if
        // the aggregate is empty (no runner ever ran, or all failed to merge).
        let post_input = if aggregate.is_empty() {
            samples_after_pre
        } else {
            aggregate
        };
        let final_samples = match self.hooks.run_phase(post_input, HookWhen::Post, Per::Session) {
            Ok(samples) => samples,
            Err(err) => {
                tracing::error!(%err, "session post-hook ordering failed");
                self.hooks.run_exception_hooks(&Samples::new(), &err.to_string());
                Samples::new()
            }
        };

        // Step 7: cleanup ledger.
        cleaner.merge_deferred(aggregate_cleaner.into_inner().unwrap());
        let cleanup_failures = cleaner.clean();

        SessionOutcome {
            samples: final_samples,
            cleanup_failures,
            interrupted: was_interrupted,
        }
    }

    /// Flips the shared interrupt flag; called from a `ctrlc` handler at the
    /// CLI boundary. Runner `main` closures observe this through
    /// `RunnerContext::interrupted` and are expected to fail cooperatively.
    pub fn interrupt(&self) {
        self.interrupted.store(true, Ordering::SeqCst);
    }
}

fn runner_workdir_name(runner: &Runner, group: Option<&str>) -> String {
    match group {
        Some(group) => format!("{}.{group}", runner.name),
        None => runner.name.clone(),
    }
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
