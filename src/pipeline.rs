//! Pipeline construction and execution.
//!
//! Stages are spawned left to right. While spawning stage `i` the executor
//! holds at most two endpoints: the read end carried over from channel
//! `i-1` (this stage's stdin) and both ends of channel `i`. Right after the
//! fork the parent closes this stage's stdin and stdout copies and carries
//! only the read end of channel `i` into the next iteration. A write end is
//! therefore closed in the executor before the next stage is created, which
//! is what lets downstream readers see end-of-stream.

use crate::channel::{Channel, ReadEnd, WriteEnd};
use crate::command::Stage;
use crate::process::{self, Forked};
use anyhow::{Context, Result};
use nix::errno::Errno;
use nix::sys::wait::{self, WaitStatus};
use nix::unistd::Pid;
use std::fmt;

/// Where the executor is in the processing of one line.
///
/// `Parsing` is only entered through [`crate::Interpreter::run_line`], which
/// tokenizes before handing stages over. [`PipelineExecutor::run`] on
/// already-parsed stages moves from `Idle` straight to `Spawning(0)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Phase {
    #[default]
    Idle,
    Parsing,
    /// Creating the process for the stage at this position.
    Spawning(usize),
    Reaping,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Phase::Idle => f.write_str("idle"),
            Phase::Parsing => f.write_str("parsing"),
            Phase::Spawning(i) => write!(f, "spawning stage {i}"),
            Phase::Reaping => f.write_str("reaping"),
        }
    }
}

/// Standard-stream endpoints handed to one stage.
///
/// `stdin` is `None` for the first stage and `stdout` is `None` for the last;
/// those streams are inherited from the executor unchanged.
#[derive(Debug, Default)]
pub struct StageIo {
    pub stdin: Option<ReadEnd>,
    pub stdout: Option<WriteEnd>,
}

impl StageIo {
    /// Releases the executor's copies once the child has inherited them.
    fn close(self) -> nix::Result<()> {
        let StageIo { stdin, stdout } = self;
        if let Some(end) = stdin {
            end.close()?;
        }
        if let Some(end) = stdout {
            end.close()?;
        }
        Ok(())
    }
}

/// What one pipeline execution did.
#[derive(Debug, Default)]
pub struct PipelineReport {
    /// Number of channels allocated, `N-1` for `N` stages.
    pub channels: usize,
    /// Pids of the spawned stages, in stage order.
    pub spawned: Vec<Pid>,
    /// Every status collected by the reap loop, in the order children exited.
    pub reaped: Vec<WaitStatus>,
}

/// Runs one pipeline at a time; see the module docs for the endpoint protocol.
#[derive(Debug, Default)]
pub struct PipelineExecutor {
    phase: Phase,
}

impl PipelineExecutor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub(crate) fn enter(&mut self, phase: Phase) {
        tracing::trace!(from = %self.phase, to = %phase, "executor phase");
        self.phase = phase;
    }

    /// Executes `stages` concurrently and returns once every child is reaped.
    ///
    /// A stage whose program can't be loaded is not an error here: its child
    /// reports the failure and exits, and is reaped with the rest. Errors are
    /// returned only for failed `pipe`, `fork`, `close` or `wait` calls in the
    /// executor, and are meant to be fatal to the caller.
    pub fn run(&mut self, stages: &[Stage]) -> Result<PipelineReport> {
        let mut report = PipelineReport::default();
        let Some(last) = stages.len().checked_sub(1) else {
            self.enter(Phase::Idle);
            return Ok(report);
        };

        let mut incoming: Option<ReadEnd> = None;
        for (i, stage) in stages.iter().enumerate() {
            self.enter(Phase::Spawning(i));

            let (carried, outgoing) = if i < last {
                let (read, write) = Channel::open()
                    .with_context(|| format!("pipe: channel after stage {i} ({stage})"))?
                    .split();
                report.channels += 1;
                (Some(read), Some(write))
            } else {
                (None, None)
            };

            let io = StageIo {
                stdin: incoming.take(),
                stdout: outgoing,
            };
            let pid = spawn(stage, &io, carried.as_ref())?;
            report.spawned.push(pid);

            io.close()
                .with_context(|| format!("close: endpoints of stage {i} ({stage})"))?;
            incoming = carried;
        }
        debug_assert!(incoming.is_none());

        self.enter(Phase::Reaping);
        report.reaped = reap_all()?;
        tracing::debug!(
            stages = stages.len(),
            channels = report.channels,
            reaped = report.reaped.len(),
            "pipeline finished"
        );

        self.enter(Phase::Idle);
        Ok(report)
    }
}

fn spawn(stage: &Stage, io: &StageIo, carried: Option<&ReadEnd>) -> Result<Pid> {
    // SAFETY: the child branch goes straight to `ChildView::exec`, which only
    // issues fcntl/dup2/close/execve/write/_exit.
    match unsafe { process::fork_process() }.with_context(|| format!("fork: {stage}"))? {
        Forked::Parent(pid) => {
            tracing::debug!(%pid, position = stage.position(), program = stage.program(), "spawned stage");
            Ok(pid)
        }
        Forked::Child(child) => child.exec(stage, io, carried),
    }
}

/// Waits for children until none remain.
///
/// `ECHILD` ends the loop normally; any other failure is returned.
pub fn reap_all() -> Result<Vec<WaitStatus>> {
    let mut reaped = Vec::new();
    loop {
        match process::retry_eintr(wait::wait) {
            Ok(status) => {
                tracing::debug!(?status, "reaped child");
                reaped.push(status);
            }
            Err(Errno::ECHILD) => return Ok(reaped),
            Err(errno) => return Err(errno).context("wait"),
        }
    }
}

/// Convenience wrapper for a one-off execution.
pub fn execute(stages: &[Stage]) -> Result<PipelineReport> {
    PipelineExecutor::new().run(stages)
}
