//! The callable side of hooks: [`cellophane_hooks::Hook`] is pure
//! metadata (name, phase, condition, ordering deps); this module pairs
//! each hook name with the closure it actually runs, and applies the
//! resolved order + condition gating from `cellophane-hooks` against a
//! live `Samples` value.

use std::collections::HashMap;

use cellophane_hooks::{gated_subset, resolve, Condition, Hook, HookFailure, HookWhen, Per};
use cellophane_sample::Samples;

/// A session/runner pre- or post-hook: consumes the gated subset it was
/// handed and returns either the (possibly transformed) subset or the
/// failure that should fail that subset, per §7.
pub type Transform = Box<dyn Fn(Samples) -> Result<Samples, HookFailure> + Send + Sync>;

/// An exception hook: observes the current aggregate and a rendered
/// failure message, has no return value — it cannot alter the pipeline.
pub type Observe = Box<dyn Fn(&Samples, &str) + Send + Sync>;

enum Callable {
    Transform(Transform),
    Observe(Observe),
}

/// Holds every hook declaration plus its callable body, keyed by name.
#[derive(Default)]
pub struct HookRegistry {
    hooks: Vec<Hook>,
    callables: HashMap<String, Callable>,
}

impl HookRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a pre/post hook. `per` on `hook` decides whether
    /// [`HookRegistry::run_phase`] (session/sample scope) or
    /// [`HookRegistry::runner_scoped`] (runner scope) picks it up.
    pub fn register_transform(
        &mut self,
        hook: Hook,
        f: impl Fn(Samples) -> Result<Samples, HookFailure> + Send + Sync + 'static,
    ) {
        self.callables
            .insert(hook.name.clone(), Callable::Transform(Box::new(f)));
        self.hooks.push(hook);
    }

    /// Registers an exception hook (always `per = Session`, per the data
    /// model — `Hook::new` does not enforce this, so misuse is a logic
    /// error the integrator owns, not one this registry validates).
    pub fn register_exception(
        &mut self,
        hook: Hook,
        f: impl Fn(&Samples, &str) + Send + Sync + 'static,
    ) {
        self.callables
            .insert(hook.name.clone(), Callable::Observe(Box::new(f)));
        self.hooks.push(hook);
    }

    pub fn hooks(&self) -> &[Hook] {
        &self.hooks
    }

    fn phase_hooks(&self, when: HookWhen, per: Per) -> Vec<Hook> {
        self.hooks
            .iter()
            .filter(|h| h.when == when && h.per == per)
            .cloned()
            .collect()
    }

    /// Runs every hook with the given `(when, per)` in resolved order over
    /// `samples`, folding each hook's gated subset back into the full set.
    /// Pre-hook failures fail every sample the failing hook was gated over
    /// and the phase continues; post-hook failures are logged and
    /// swallowed. Ordering/cycle errors are module-load-time failures and
    /// propagate to the caller.
    pub fn run_phase(
        &self,
        samples: Samples,
        when: HookWhen,
        per: Per,
    ) -> Result<Samples, cellophane_hooks::OrderingError> {
        let phase_hooks = self.phase_hooks(when, per);
        let order = resolve(&phase_hooks, when)?;

        let mut current = samples;
        for name in order {
            let Some(hook) = phase_hooks.iter().find(|h| h.name == name) else {
                continue;
            };
            let Some(condition) = hook.condition else {
                continue;
            };
            let Some(subset) = gated_subset(&current, when, condition) else {
                continue;
            };
            let Some(Callable::Transform(f)) = self.callables.get(&name) else {
                continue;
            };
            match f(subset.clone()) {
                Ok(result) => current = replace_subset(current, result),
                Err(failure) if when == HookWhen::Pre => {
                    tracing::error!(hook = %name, error = %failure, "pre-hook failed, failing its gated subset");
                    current = fail_subset(current, &subset, &failure.to_string());
                }
                Err(failure) => {
                    tracing::warn!(hook = %name, error = %failure, "post-hook failed, logged and swallowed");
                }
            }
        }
        Ok(current)
    }

    /// Runs every per=Runner hook for `when` in resolved order, short
    /// circuiting on the first pre-hook failure (a runner pre-hook failure
    /// fails the whole runner subset, per §4.2 — `cellophane-runner` never
    /// calls `main` when this returns `Err`). Post-hook failures are
    /// logged and swallowed internally; this never returns `Err` for
    /// `when == Post`.
    pub fn runner_scoped(&self, samples: Samples, when: HookWhen) -> Result<Samples, HookFailure> {
        let phase_hooks = self.phase_hooks(when, Per::Runner);
        let order = resolve(&phase_hooks, when)
            .map_err(|err| HookFailure::new("<ordering>", err.to_string()))?;

        let mut current = samples;
        for name in order {
            let Some(hook) = phase_hooks.iter().find(|h| h.name == name) else {
                continue;
            };
            let Some(condition) = hook.condition else {
                continue;
            };
            let Some(subset) = gated_subset(&current, when, condition) else {
                continue;
            };
            let Some(Callable::Transform(f)) = self.callables.get(&name) else {
                continue;
            };
            match f(subset.clone()) {
                Ok(result) => current = replace_subset(current, result),
                Err(failure) if when == HookWhen::Pre => return Err(failure),
                Err(failure) => {
                    tracing::warn!(hook = %name, error = %failure, "runner post-hook failed, logged and swallowed");
                }
            }
        }
        Ok(current)
    }

    /// Invokes every registered exception hook, in registration order, with
    /// a best-effort snapshot of `samples` and the rendered failure
    /// message. Per §4.4's ordering guarantees, exception hooks "observe a
    /// best-effort snapshot" and may run concurrently with later runner
    /// callbacks — here they simply run synchronously on the dispatcher
    /// thread at the point of discovery.
    pub fn run_exception_hooks(&self, samples: &Samples, message: &str) {
        let order = resolve(&self.hooks, HookWhen::Exception).unwrap_or_default();
        for name in order {
            if let Some(Callable::Observe(f)) = self.callables.get(&name) {
                f(samples, message);
            }
        }
    }
}

/// Replaces `full`'s entries with `replacement`'s wherever uuids match,
/// leaving every other sample untouched — the "returned set replaces the
/// input only inside the subset the hook saw" rule from §4.3.
fn replace_subset(mut full: Samples, replacement: Samples) -> Samples {
    for sample in replacement.iter() {
        full.union_one(sample.clone());
    }
    full
}

fn fail_subset(mut full: Samples, subset: &Samples, message: &str) -> Samples {
    for uuid in subset.uuids() {
        if let Some(sample) = full.get_mut(uuid) {
            sample.fail(message);
        }
    }
    full
}

#[cfg(test)]
mod tests {
    use super::*;
    use cellophane_hooks::{Dep, Hook};
    use cellophane_sample::Sample;

    fn hook(name: &str, when: HookWhen, per: Per) -> Hook {
        Hook::new(name, when, per)
    }

    #[test]
    fn session_pre_hook_transforms_full_set() {
        let mut registry = HookRegistry::new();
        registry.register_transform(hook("mark", HookWhen::Pre, Per::Session), |mut samples| {
            for s in samples.iter_mut() {
                s.meta.insert("touched", true);
            }
            Ok(samples)
        });

        let mut samples = Samples::new();
        samples.union_one(Sample::new("s1"));
        let result = registry
            .run_phase(samples, HookWhen::Pre, Per::Session)
            .expect("resolve");
        assert_eq!(
            result.get_index(0).unwrap().meta.get("touched"),
            Some(&cellophane_container::Value::Bool(true))
        );
    }

    #[test]
    fn pre_hook_failure_fails_only_its_gated_subset() {
        let mut registry = HookRegistry::new();
        let mut failing = hook("doomed", HookWhen::Pre, Per::Session);
        failing.condition = Some(Condition::Unprocessed);
        registry.register_transform(failing, |_samples| {
            Err(HookFailure::new("doomed", "kaboom"))
        });

        let mut samples = Samples::new();
        let mut done = Sample::new("done");
        done.processed = true;
        samples.union_one(done);
        samples.union_one(Sample::new("pending"));

        let result = registry
            .run_phase(samples, HookWhen::Pre, Per::Session)
            .expect("resolve");

        let done_sample = result.iter().find(|s| s.id == "done").unwrap();
        let pending_sample = result.iter().find(|s| s.id == "pending").unwrap();
        assert!(done_sample.fail_reason.is_none());
        assert!(pending_sample
            .fail_reason
            .as_deref()
            .unwrap()
            .contains("kaboom"));
    }

    #[test]
    fn post_hook_failure_is_logged_and_swallowed() {
        let mut registry = HookRegistry::new();
        registry.register_transform(hook("noisy", HookWhen::Post, Per::Session), |_| {
            Err(HookFailure::new("noisy", "boom"))
        });

        let mut samples = Samples::new();
        samples.union_one(Sample::new("s1"));
        let result = registry
            .run_phase(samples, HookWhen::Post, Per::Session)
            .expect("resolve");
        assert!(result.get_index(0).unwrap().fail_reason.is_none());
    }

    #[test]
    fn runner_scoped_pre_hook_failure_short_circuits() {
        let mut registry = HookRegistry::new();
        let mut first = hook("first", HookWhen::Pre, Per::Runner);
        first.before.push(Dep::All);
        registry.register_transform(first, |_| Err(HookFailure::new("first", "no")));
        registry.register_transform(hook("second", HookWhen::Pre, Per::Runner), |mut s| {
            for sample in s.iter_mut() {
                sample.meta.insert("ran_second", true);
            }
            Ok(s)
        });

        let mut samples = Samples::new();
        samples.union_one(Sample::new("s1"));
        let err = registry
            .runner_scoped(samples, HookWhen::Pre)
            .expect_err("must fail");
        assert!(err.to_string().contains("no"));
    }

    #[test]
    fn exception_hooks_run_in_registration_order() {
        use std::sync::{Arc, Mutex};
        let seen = Arc::new(Mutex::new(Vec::new()));
        let mut registry = HookRegistry::new();
        let seen1 = Arc::clone(&seen);
        registry.register_exception(hook("first", HookWhen::Exception, Per::Session), move |_, _| {
            seen1.lock().unwrap().push("first");
        });
        let seen2 = Arc::clone(&seen);
        registry.register_exception(hook("second", HookWhen::Exception, Per::Session), move |_, _| {
            seen2.lock().unwrap().push("second");
        });

        registry.run_exception_hooks(&Samples::new(), "boom");
        assert_eq!(*seen.lock().unwrap(), vec!["first", "second"]);
    }
}
