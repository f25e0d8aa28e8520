//! End-to-end session scenarios, one test per scenario in the style of
//! `shipper-cli`'s `tests/bdd_publish.rs`: build a `Dispatcher` over a
//! tempdir, run it, assert on the resulting `SessionOutcome`.

use std::sync::{Arc, Mutex};

use cellophane::Dispatcher;
use cellophane_container::Container;
use cellophane_hooks::{Condition, Dep, Hook, HookWhen, Per};
use cellophane_runner::{MainError, MainFn, MainResult, Runner, RunnerContext};
use cellophane_sample::Sample;

fn passthrough(name: &str) -> Runner {
    let main: MainFn = Arc::new(|samples, _ctx: &mut RunnerContext<'_>| -> MainResult { Ok(Some(samples)) });
    Runner::new(name, main)
}

/// S1 — happy path: two samples, one runner marks both processed.
#[test]
fn s1_happy_path_marks_every_sample_complete() {
    let tmp = tempfile::tempdir().expect("tempdir");
    let mut dispatcher = Dispatcher::new(tmp.path(), tmp.path().join("work"), Container::new());
    dispatcher.add_runner(passthrough("echo"));

    let mut samples = cellophane_sample::Samples::new();
    samples.union_one(Sample::new("a"));
    samples.union_one(Sample::new("b"));

    let outcome = dispatcher.run(samples);

    assert_eq!(outcome.samples.complete().len(), 2);
    assert_eq!(outcome.samples.failed().len(), 0);
}

/// S2 — partial fail: one sample is explicitly failed by the runner;
/// per-sample post-hooks gated on `failed`/`complete` each fire exactly
/// once, over exactly the sample matching their condition.
#[test]
fn s2_partial_fail_gates_post_hooks_by_condition() {
    let tmp = tempfile::tempdir().expect("tempdir");

    let main: MainFn = Arc::new(|mut samples, _ctx: &mut RunnerContext<'_>| -> MainResult {
        for sample in samples.iter_mut() {
            if sample.id == "fail" {
                sample.fail("X");
            } else {
                sample.processed = true;
            }
        }
        Ok(Some(samples))
    });
    let mut dispatcher = Dispatcher::new(tmp.path(), tmp.path().join("work"), Container::new());
    dispatcher.add_runner(Runner::new("discriminating", main));

    let failed_seen: Arc<Mutex<Vec<Vec<String>>>> = Arc::new(Mutex::new(Vec::new()));
    let complete_seen: Arc<Mutex<Vec<Vec<String>>>> = Arc::new(Mutex::new(Vec::new()));

    let mut hooks = cellophane::HookRegistry::new();
    let mut failed_hook = Hook::new("on_failed", HookWhen::Post, Per::Sample);
    failed_hook.condition = Some(Condition::Failed);
    let failed_seen_clone = Arc::clone(&failed_seen);
    hooks.register_transform(failed_hook, move |samples| {
        failed_seen_clone
            .lock()
            .unwrap()
            .push(samples.iter().map(|s| s.id.clone()).collect());
        Ok(samples)
    });
    let mut complete_hook = Hook::new("on_complete", HookWhen::Post, Per::Sample);
    complete_hook.condition = Some(Condition::Complete);
    let complete_seen_clone = Arc::clone(&complete_seen);
    hooks.register_transform(complete_hook, move |samples| {
        complete_seen_clone
            .lock()
            .unwrap()
            .push(samples.iter().map(|s| s.id.clone()).collect());
        Ok(samples)
    });
    let dispatcher = dispatcher.with_hooks(hooks);

    let mut samples = cellophane_sample::Samples::new();
    samples.union_one(Sample::new("pass"));
    samples.union_one(Sample::new("fail"));

    let outcome = dispatcher.run(samples);

    let failed: Vec<_> = outcome.samples.failed().iter().map(|s| s.id.clone()).collect();
    assert_eq!(failed, vec!["fail".to_string()]);
    assert_eq!(
        outcome
            .samples
            .failed()
            .iter()
            .next()
            .unwrap()
            .fail_reason
            .as_deref(),
        Some("X")
    );
    let complete: Vec<_> = outcome.samples.complete().iter().map(|s| s.id.clone()).collect();
    assert_eq!(complete, vec!["pass".to_string()]);

    assert_eq!(*failed_seen.lock().unwrap(), vec![vec!["fail".to_string()]]);
    assert_eq!(*complete_seen.lock().unwrap(), vec![vec!["pass".to_string()]]);
}

/// S3 — two runners touching the same sample: their file-list
/// contributions merge as an order-preserving union, and the per-sample
/// post-hook fires exactly once (after both runners, not once per runner).
#[test]
fn s3_two_runners_merge_files_and_fire_post_hook_once() {
    let tmp = tempfile::tempdir().expect("tempdir");

    let main_a: MainFn = Arc::new(|mut samples, _ctx: &mut RunnerContext<'_>| -> MainResult {
        for sample in samples.iter_mut() {
            sample.add_file("fa.txt");
            sample.processed = true;
        }
        Ok(Some(samples))
    });
    let main_b: MainFn = Arc::new(|mut samples, _ctx: &mut RunnerContext<'_>| -> MainResult {
        for sample in samples.iter_mut() {
            sample.add_file("fb.txt");
            sample.processed = true;
        }
        Ok(Some(samples))
    });

    let mut dispatcher = Dispatcher::new(tmp.path(), tmp.path().join("work"), Container::new());
    dispatcher.add_runner(Runner::new("a", main_a));
    dispatcher.add_runner(Runner::new("b", main_b));

    let invocations: Arc<Mutex<usize>> = Arc::new(Mutex::new(0));
    let mut hooks = cellophane::HookRegistry::new();
    let invocations_clone = Arc::clone(&invocations);
    hooks.register_transform(Hook::new("count", HookWhen::Post, Per::Sample), move |samples| {
        *invocations_clone.lock().unwrap() += 1;
        Ok(samples)
    });
    let dispatcher = dispatcher.with_hooks(hooks);

    let mut samples = cellophane_sample::Samples::new();
    samples.union_one(Sample::new("x"));

    let outcome = dispatcher.run(samples);

    assert_eq!(outcome.samples.len(), 1);
    let merged = outcome.samples.get_index(0).unwrap();
    assert_eq!(
        merged.files,
        vec![std::path::PathBuf::from("fa.txt"), std::path::PathBuf::from("fb.txt")]
    );
    assert_eq!(*invocations.lock().unwrap(), 1);
}

/// S4 — hook ordering: `h1(before=h2)`, `h2(after=h1, before=ALL)` run in
/// the pre phase; `h3(after=ALL)` runs in the post phase. Expected log
/// order: `h1, h2, <runner>, h3`.
#[test]
fn s4_hooks_resolve_in_declared_dependency_order() {
    let tmp = tempfile::tempdir().expect("tempdir");
    let log: Arc<Mutex<Vec<&'static str>>> = Arc::new(Mutex::new(Vec::new()));

    let mut hooks = cellophane::HookRegistry::new();

    let mut h1 = Hook::new("h1", HookWhen::Pre, Per::Session);
    h1.before.push(Dep::Name("h2".to_string()));
    let log1 = Arc::clone(&log);
    hooks.register_transform(h1, move |samples| {
        log1.lock().unwrap().push("h1");
        Ok(samples)
    });

    let mut h2 = Hook::new("h2", HookWhen::Pre, Per::Session);
    h2.after.push(Dep::Name("h1".to_string()));
    h2.before.push(Dep::All);
    let log2 = Arc::clone(&log);
    hooks.register_transform(h2, move |samples| {
        log2.lock().unwrap().push("h2");
        Ok(samples)
    });

    let mut h3 = Hook::new("h3", HookWhen::Post, Per::Session);
    h3.after.push(Dep::All);
    let log3 = Arc::clone(&log);
    hooks.register_transform(h3, move |samples| {
        log3.lock().unwrap().push("h3");
        Ok(samples)
    });

    let mut dispatcher = Dispatcher::new(tmp.path(), tmp.path().join("work"), Container::new()).with_hooks(hooks);
    let log_runner = Arc::clone(&log);
    let main: MainFn = Arc::new(move |samples, _ctx: &mut RunnerContext<'_>| -> MainResult {
        log_runner.lock().unwrap().push("runner");
        Ok(Some(samples))
    });
    dispatcher.add_runner(Runner::new("work", main));

    let mut samples = cellophane_sample::Samples::new();
    samples.union_one(Sample::new("s1"));
    let _outcome = dispatcher.run(samples);

    assert_eq!(*log.lock().unwrap(), vec!["h1", "h2", "runner", "h3"]);
}

/// S5 — runner exception: a panicking `main` fails every input sample
/// with a message naming the runner and the panic payload, and the
/// exception hook observes the original message.
#[test]
fn s5_runner_panic_fails_samples_and_fires_exception_hooks() {
    let tmp = tempfile::tempdir().expect("tempdir");

    let main: MainFn = Arc::new(|_samples, _ctx: &mut RunnerContext<'_>| -> MainResult {
        panic!("boom")
    });

    let seen_messages: Arc<Mutex<Vec<String>>> = Arc::new(Mutex::new(Vec::new()));
    let mut hooks = cellophane::HookRegistry::new();
    let seen_clone = Arc::clone(&seen_messages);
    hooks.register_exception(
        Hook::new("observe", HookWhen::Exception, Per::Session),
        move |_samples, message| {
            seen_clone.lock().unwrap().push(message.to_string());
        },
    );

    let mut dispatcher = Dispatcher::new(tmp.path(), tmp.path().join("work"), Container::new()).with_hooks(hooks);
    dispatcher.add_runner(Runner::new("flaky", main));

    let mut samples = cellophane_sample::Samples::new();
    samples.union_one(Sample::new("a"));
    samples.union_one(Sample::new("b"));

    let outcome = dispatcher.run(samples);

    assert_eq!(outcome.samples.failed().len(), 2);
    for sample in outcome.samples.iter() {
        let reason = sample.fail_reason.as_deref().unwrap_or_default();
        assert!(reason.contains("Unhandled exception in runner"), "{reason}");
        assert!(reason.contains("boom"), "{reason}");
    }

    let seen = seen_messages.lock().unwrap();
    assert_eq!(seen.len(), 1, "one exception-hook call per runner job, not per sample");
    assert!(seen.iter().all(|m| m.contains("boom")));
}

/// S6 — SIGINT mid-run: an already-interrupted dispatcher fails every
/// sample with the cooperative-interrupt reason, session post-hooks still
/// run on the partial aggregate, and the outcome reports `interrupted`.
#[test]
fn s6_interrupt_fails_remaining_samples_and_still_runs_post_hooks() {
    let tmp = tempfile::tempdir().expect("tempdir");

    let main: MainFn = Arc::new(|_samples, ctx: &mut RunnerContext<'_>| -> MainResult {
        if ctx.interrupted.load(std::sync::atomic::Ordering::SeqCst) {
            return Err(MainError::Interrupted);
        }
        Err(MainError::Interrupted)
    });

    let post_hook_ran: Arc<Mutex<bool>> = Arc::new(Mutex::new(false));
    let mut hooks = cellophane::HookRegistry::new();
    let post_hook_ran_clone = Arc::clone(&post_hook_ran);
    hooks.register_transform(Hook::new("session_post", HookWhen::Post, Per::Session), move |samples| {
        *post_hook_ran_clone.lock().unwrap() = true;
        Ok(samples)
    });

    let mut dispatcher = Dispatcher::new(tmp.path(), tmp.path().join("work"), Container::new()).with_hooks(hooks);
    dispatcher.add_runner(Runner::new("slow", main));
    dispatcher.interrupt();

    let mut samples = cellophane_sample::Samples::new();
    samples.union_one(Sample::new("a"));
    samples.union_one(Sample::new("b"));

    let outcome = dispatcher.run(samples);

    assert!(outcome.interrupted);
    assert_eq!(outcome.samples.len(), 2);
    for sample in outcome.samples.iter() {
        assert_eq!(
            sample.fail_reason.as_deref(),
            Some("Runner 'slow' was interrupted")
        );
    }
    assert!(*post_hook_ran.lock().unwrap());
}
