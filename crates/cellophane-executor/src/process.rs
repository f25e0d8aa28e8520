//! Blocking job execution: spawns the child, redirects stdout/stderr to
//! files, polls for completion, and on a termination request sends
//! `SIGTERM` to the job's process group, waits out a 10-second grace
//! period, then `SIGKILL`s. The poll-loop shape (`try_wait` against a
//! deadline, `Duration::from_millis(100)` between polls) is taken directly
//! from `shipper::process::run_command_with_timeout`; the process-group
//! signal escalation is new — the teacher's subprocess launcher never needed
//! to kill a tree of children, only the single `cargo publish` it spawned.

use std::collections::HashMap;
use std::fs::File;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::job::JobOutcome;

pub const TERMINATE_GRACE: Duration = Duration::from_secs(10);
const POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Shared flag a caller flips to request termination of a running job.
pub type TerminateFlag = Arc<AtomicBool>;

pub fn run_job(
    argv: Vec<String>,
    workdir: &Path,
    env: HashMap<String, String>,
    stdout_path: PathBuf,
    stderr_path: PathBuf,
    terminate: TerminateFlag,
) -> JobOutcome {
    let Some((program, args)) = argv.split_first() else {
        return JobOutcome::Failed {
            error: "empty argv".to_string(),
        };
    };

    let stdout_file = match File::create(&stdout_path) {
        Ok(f) => f,
        Err(e) => return JobOutcome::Failed { error: e.to_string() },
    };
    let stderr_file = match File::create(&stderr_path) {
        Ok(f) => f,
        Err(e) => return JobOutcome::Failed { error: e.to_string() },
    };

    let mut command = Command::new(program);
    command
        .args(args)
        .current_dir(workdir)
        .envs(&env)
        .stdout(Stdio::from(stdout_file))
        .stderr(Stdio::from(stderr_file));

    new_process_group(&mut command);

    let mut child = match command.spawn() {
        Ok(child) => child,
        Err(e) => {
            return JobOutcome::Failed {
                error: format!("failed to spawn {program}: {e}"),
            };
        }
    };
    let pid = child.id();

    loop {
        match child.try_wait() {
            Ok(Some(status)) => {
                return JobOutcome::Completed {
                    exit_code: status.code().unwrap_or(-1),
                    stdout: stdout_path,
                    stderr: stderr_path,
                };
            }
            Ok(None) => {
                if terminate.load(Ordering::SeqCst) {
                    return terminate_job(&mut child, pid);
                }
                std::thread::sleep(POLL_INTERVAL);
            }
            Err(e) => {
                return JobOutcome::Failed {
                    error: format!("failed to poll child: {e}"),
                };
            }
        }
    }
}

fn terminate_job(child: &mut std::process::Child, pid: u32) -> JobOutcome {
    send_signal(pid, Signal::Term);
    let deadline = Instant::now() + TERMINATE_GRACE;
    loop {
        match child.try_wait() {
            Ok(Some(_)) => return JobOutcome::Terminated { exit_code: 143 },
            Ok(None) if Instant::now() >= deadline => {
                send_signal(pid, Signal::Kill);
                let _ = child.wait();
                return JobOutcome::Terminated { exit_code: 137 };
            }
            Ok(None) => std::thread::sleep(POLL_INTERVAL),
            Err(_) => return JobOutcome::Terminated { exit_code: 143 },
        }
    }
}

enum Signal {
    Term,
    Kill,
}

#[cfg(unix)]
fn new_process_group(command: &mut Command) {
    use std::os::unix::process::CommandExt;
    command.process_group(0);
}

#[cfg(not(unix))]
fn new_process_group(_command: &mut Command) {}

#[cfg(unix)]
fn send_signal(pid: u32, signal: Signal) {
    let sig = match signal {
        Signal::Term => libc::SIGTERM,
        Signal::Kill => libc::SIGKILL,
    };
    // Negative pid targets the whole process group `new_process_group`
    // placed this job's children into.
    unsafe {
        libc::kill(-(pid as i32), sig);
    }
}

#[cfg(not(unix))]
fn send_signal(_pid: u32, _signal: Signal) {}

#[cfg(test)]
mod tests {
    use super::*;

    fn sh_argv(script: &str) -> Vec<String> {
        vec!["/bin/sh".to_string(), "-c".to_string(), script.to_string()]
    }

    #[test]
    fn run_job_captures_exit_code_and_output() {
        let tmp = tempfile::tempdir().expect("tempdir");
        let outcome = run_job(
            sh_argv("echo out; echo err 1>&2; exit 3"),
            tmp.path(),
            HashMap::new(),
            tmp.path().join("out.log"),
            tmp.path().join("err.log"),
            Arc::new(AtomicBool::new(false)),
        );
        match outcome {
            JobOutcome::Completed { exit_code, stdout, stderr } => {
                assert_eq!(exit_code, 3);
                assert_eq!(
                    std::fs::read_to_string(stdout).unwrap().trim(),
                    "out"
                );
                assert_eq!(
                    std::fs::read_to_string(stderr).unwrap().trim(),
                    "err"
                );
            }
            other => panic!("expected Completed, got {other:?}"),
        }
    }

    #[test]
    fn run_job_reports_failure_for_missing_program() {
        let tmp = tempfile::tempdir().expect("tempdir");
        let outcome = run_job(
            vec!["/no/such/binary".to_string()],
            tmp.path(),
            HashMap::new(),
            tmp.path().join("out.log"),
            tmp.path().join("err.log"),
            Arc::new(AtomicBool::new(false)),
        );
        assert!(matches!(outcome, JobOutcome::Failed { .. }));
    }

    #[test]
    fn terminate_flag_kills_a_long_running_job() {
        let tmp = tempfile::tempdir().expect("tempdir");
        let terminate = Arc::new(AtomicBool::new(false));
        let terminate_clone = Arc::clone(&terminate);
        let workdir = tmp.path().to_path_buf();
        let handle = std::thread::spawn(move || {
            run_job(
                sh_argv("sleep 30"),
                &workdir,
                HashMap::new(),
                workdir.join("out.log"),
                workdir.join("err.log"),
                terminate_clone,
            )
        });
        std::thread::sleep(Duration::from_millis(200));
        terminate.store(true, Ordering::SeqCst);
        let outcome = handle.join().expect("job thread");
        assert!(matches!(outcome, JobOutcome::Terminated { .. }));
    }
}
