//! End-to-end tests that fork real processes.
//!
//! The reap loop waits for *any* child of the test binary, so every test here
//! holds `FORK_LOCK` for its whole duration.

use nix::libc::STDIN_FILENO;
use nix::sys::wait::WaitStatus;
use nix::unistd::{self, Pid};
use std::os::fd::RawFd;
use pipeline_shell::command::EXEC_FAILURE_STATUS;
use pipeline_shell::lexer::{MAX_STAGES, split_into_stages};
use pipeline_shell::pipeline::Phase;
use pipeline_shell::{Interpreter, PipelineExecutor, PipelineReport, ScriptedLines, ShellConfig};
use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::sync::mpsc::{self, RecvTimeoutError};
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;
use tempfile::TempDir;

static FORK_LOCK: Mutex<()> = Mutex::new(());

fn serialize() -> MutexGuard<'static, ()> {
    FORK_LOCK.lock().unwrap_or_else(|e| e.into_inner())
}

fn run(line: &str) -> PipelineReport {
    let stages = split_into_stages(line, MAX_STAGES).expect("tokenize");
    PipelineExecutor::new().run(&stages).expect("execute")
}

fn write_script(dir: &Path, name: &str, body: &str) -> PathBuf {
    let path = dir.join(name);
    fs::write(&path, format!("#!/bin/sh\n{body}\n")).expect("write script");
    fs::set_permissions(&path, fs::Permissions::from_mode(0o755)).expect("chmod script");
    path
}

fn exit_code_of(report: &PipelineReport, pid: Pid) -> Option<i32> {
    report.reaped.iter().find_map(|status| match *status {
        WaitStatus::Exited(p, code) if p == pid => Some(code),
        _ => None,
    })
}

fn assert_all_reaped(report: &PipelineReport) {
    for pid in &report.spawned {
        assert!(
            exit_code_of(report, *pid).is_some(),
            "stage {pid} was not reaped: {:?}",
            report.reaped
        );
    }
}

/// Aborts the whole test binary if a pipeline hasn't finished within `limit`.
///
/// Dropping the returned sender disarms it.
fn watchdog(limit: Duration) -> mpsc::Sender<()> {
    let (disarm, armed) = mpsc::channel::<()>();
    std::thread::spawn(move || {
        if let Err(RecvTimeoutError::Timeout) = armed.recv_timeout(limit) {
            eprintln!("pipeline did not finish within {limit:?}");
            std::process::exit(2);
        }
    });
    disarm
}

/// Keeps fd 0 closed until dropped, then restores the original stdin.
struct ClosedStdin {
    saved: RawFd,
}

impl ClosedStdin {
    fn new() -> Self {
        let saved = unistd::dup(STDIN_FILENO).expect("save stdin");
        unistd::close(STDIN_FILENO).expect("close stdin");
        Self { saved }
    }
}

impl Drop for ClosedStdin {
    fn drop(&mut self) {
        unistd::dup2(self.saved, STDIN_FILENO).expect("restore stdin");
        unistd::close(self.saved).expect("close saved stdin");
    }
}

#[cfg(target_os = "linux")]
fn open_fds() -> usize {
    fs::read_dir("/proc/self/fd").expect("list fds").count()
}

#[test]
fn blank_line_spawns_nothing() {
    let _guard = serialize();
    let report = run("  \t ");
    assert_eq!(report.channels, 0);
    assert!(report.spawned.is_empty());
    assert!(report.reaped.is_empty());
}

#[test]
fn single_stage_uses_no_channel() {
    let _guard = serialize();
    let report = run("true");
    assert_eq!(report.channels, 0);
    assert_eq!(report.spawned.len(), 1);
    assert_eq!(exit_code_of(&report, report.spawned[0]), Some(0));
}

#[test]
fn n_stages_use_n_minus_one_channels() {
    let _guard = serialize();
    for n in 2..=5 {
        let line = vec!["true"; n].join(" | ");
        let report = run(&line);
        assert_eq!(report.channels, n - 1, "line {line:?}");
        assert_eq!(report.spawned.len(), n, "line {line:?}");
        assert_all_reaped(&report);
    }
}

#[test]
fn producer_output_reaches_consumer_unchanged() {
    let _guard = serialize();
    let dir = TempDir::new().unwrap();
    let sink = dir.path().join("sink");
    let producer = write_script(dir.path(), "produce", "printf 'first line\\nsecond\\tline\\nlast'");
    let consumer = write_script(dir.path(), "consume", &format!("exec cat > '{}'", sink.display()));

    let report = run(&format!("{} | {}", producer.display(), consumer.display()));

    assert_eq!(report.channels, 1);
    assert_all_reaped(&report);
    assert_eq!(fs::read(&sink).unwrap(), b"first line\nsecond\tline\nlast");
}

#[test]
fn large_output_crosses_pipe_buffer_in_order() {
    let _guard = serialize();
    let dir = TempDir::new().unwrap();
    let sink = dir.path().join("sink");
    // Well over a 64 KiB pipe buffer.
    let producer = write_script(dir.path(), "produce", "i=0; while [ $i -lt 20000 ]; do echo \"line $i\"; i=$((i+1)); done");
    let consumer = write_script(dir.path(), "consume", &format!("exec cat > '{}'", sink.display()));

    let _watchdog = watchdog(Duration::from_secs(60));
    let report = run(&format!("{}|{}", producer.display(), consumer.display()));
    assert_all_reaped(&report);

    let expected: String = (0..20000).map(|i| format!("line {i}\n")).collect();
    assert_eq!(fs::read_to_string(&sink).unwrap(), expected);
}

#[test]
fn failing_stages_are_still_reaped() {
    let _guard = serialize();
    let report = run("false | true");
    assert_eq!(report.spawned.len(), 2);
    assert_eq!(exit_code_of(&report, report.spawned[0]), Some(1));
    assert_eq!(exit_code_of(&report, report.spawned[1]), Some(0));
}

#[test]
fn missing_program_exits_with_distinguished_status() {
    let _guard = serialize();
    let report = run("/nonexistent/no-such-program | true");
    assert_eq!(report.spawned.len(), 2);
    assert_eq!(
        exit_code_of(&report, report.spawned[0]),
        Some(EXEC_FAILURE_STATUS)
    );
    assert_eq!(exit_code_of(&report, report.spawned[1]), Some(0));
}

#[test]
fn downstream_sees_end_of_stream_after_failed_head() {
    let _guard = serialize();
    let dir = TempDir::new().unwrap();
    let sink = dir.path().join("sink");
    let consumer = write_script(
        dir.path(),
        "consume",
        &format!("cat > '{0}'\necho done >> '{0}'", sink.display()),
    );

    let _watchdog = watchdog(Duration::from_secs(30));
    let report = run(&format!("/nonexistent/no-such-program | {}", consumer.display()));

    assert_eq!(
        exit_code_of(&report, report.spawned[0]),
        Some(EXEC_FAILURE_STATUS)
    );
    assert_eq!(exit_code_of(&report, report.spawned[1]), Some(0));
    assert_eq!(fs::read_to_string(&sink).unwrap(), "done\n");
}

#[test]
fn transport_survives_closed_shell_stdin() {
    let _guard = serialize();
    let dir = TempDir::new().unwrap();
    let sink = dir.path().join("sink");
    let producer = write_script(dir.path(), "produce", "printf hello");
    let consumer = write_script(dir.path(), "consume", &format!("exec cat > '{}'", sink.display()));
    let line = format!("{} | cat | {}", producer.display(), consumer.display());

    let _watchdog = watchdog(Duration::from_secs(30));
    let report = {
        // The first channel's read end lands on fd 0.
        let _stdin = ClosedStdin::new();
        run(&line)
    };

    for pid in &report.spawned {
        assert_eq!(exit_code_of(&report, *pid), Some(0), "{:?}", report.reaped);
    }
    assert_eq!(fs::read_to_string(&sink).unwrap(), "hello");
}

#[test]
fn three_slurping_stages_do_not_deadlock() {
    let _guard = serialize();
    let dir = TempDir::new().unwrap();
    let sink = dir.path().join("sink");
    let producer = write_script(dir.path(), "produce", "printf 'c\\na\\nb\\n'");
    // Reads all of stdin before writing anything.
    let slurp = write_script(dir.path(), "slurp", "data=$(cat)\nprintf '%s\\n' \"$data\"");
    let consumer = write_script(dir.path(), "consume", &format!("exec cat > '{}'", sink.display()));

    let _watchdog = watchdog(Duration::from_secs(30));
    let report = run(&format!(
        "{} | {} | sort | {}",
        producer.display(),
        slurp.display(),
        consumer.display()
    ));

    assert_eq!(report.channels, 3);
    assert_all_reaped(&report);
    assert_eq!(fs::read_to_string(&sink).unwrap(), "a\nb\nc\n");
}

#[test]
#[cfg(target_os = "linux")]
fn repeated_pipelines_leak_no_descriptors() {
    let _guard = serialize();
    let mut executor = PipelineExecutor::new();
    let stages = split_into_stages("true | cat | cat | true", MAX_STAGES).unwrap();

    let before = open_fds();
    executor.run(&stages).unwrap();
    executor.run(&stages).unwrap();
    let after = open_fds();

    assert_eq!(before, after);
    assert_eq!(executor.phase(), Phase::Idle);
}

#[test]
fn prompt_loop_runs_every_line_until_end_of_input() {
    let _guard = serialize();
    let dir = TempDir::new().unwrap();
    let sink = dir.path().join("sink");
    let producer = write_script(dir.path(), "produce", "echo run");
    let consumer = write_script(dir.path(), "consume", &format!("exec cat >> '{}'", sink.display()));
    let pipeline = format!("{} | {}", producer.display(), consumer.display());

    let mut sh = Interpreter::new(ShellConfig::default());
    let mut lines = ScriptedLines::new(["".to_string(), pipeline.clone(), "false | true".to_string(), pipeline]);
    sh.repl(&mut lines).unwrap();

    assert_eq!(sh.phase(), Phase::Idle);
    assert_eq!(fs::read_to_string(&sink).unwrap(), "run\nrun\n");
}
