//! Process creation for a single stage.
//!
//! [`fork_process`] returns a tagged [`Forked`] outcome. The parent gets the
//! child's pid; the child gets a [`ChildView`] whose only operation,
//! [`ChildView::exec`], never returns.

use crate::command::{EXEC_FAILURE_STATUS, ExitCode, Stage};
use crate::channel::ReadEnd;
use crate::pipeline::StageIo;
use nix::errno::Errno;
use nix::fcntl::{FcntlArg, FdFlag, fcntl};
use nix::libc::{self, STDERR_FILENO, STDIN_FILENO, STDOUT_FILENO};
use nix::unistd::{self, ForkResult, Pid};
use std::os::fd::{AsRawFd, RawFd};

/// Status a child exits with when it could not rewire its standard streams.
pub const REWIRE_FAILURE_STATUS: ExitCode = 126;

/// Result of duplicating the executor.
#[derive(Debug)]
pub enum Forked {
    /// Running in the executor; holds the new child's pid.
    Parent(Pid),
    /// Running in the freshly created child.
    Child(ChildView),
}

/// Capability held only by the child side of a fork.
#[derive(Debug)]
pub struct ChildView {
    _private: (),
}

/// Calls `f` again for as long as it fails with `EINTR`.
pub(crate) fn retry_eintr<T>(mut f: impl FnMut() -> nix::Result<T>) -> nix::Result<T> {
    loop {
        match f() {
            Err(Errno::EINTR) => continue,
            result => return result,
        }
    }
}

/// Duplicates the calling process.
///
/// # Safety
///
/// In the [`Forked::Child`] branch only async-signal-safe work may happen
/// until the program image is replaced; [`ChildView::exec`] honors that.
pub unsafe fn fork_process() -> nix::Result<Forked> {
    match retry_eintr(|| unsafe { unistd::fork() })? {
        ForkResult::Parent { child } => Ok(Forked::Parent(child)),
        ForkResult::Child => Ok(Forked::Child(ChildView { _private: () })),
    }
}

impl ChildView {
    /// Wires `io` onto stdin/stdout, drops every other endpoint copy and
    /// loads the stage's program image.
    ///
    /// `unused` is an endpoint the executor holds for a later stage; it is
    /// closed here so this child never owns it. Nothing in this function
    /// allocates or runs destructors.
    pub fn exec(self, stage: &Stage, io: &StageIo, unused: Option<&ReadEnd>) -> ! {
        if let Err((op, errno)) = rewire(io, unused.map(ReadEnd::as_raw_fd)) {
            report(op.as_bytes(), errno);
            exit_now(REWIRE_FAILURE_STATUS);
        }

        let errno = match unistd::execvp(stage.c_program(), stage.argv()) {
            Ok(never) => match never {},
            Err(errno) => errno,
        };
        report(stage.c_program().as_bytes(), errno);
        exit_now(EXEC_FAILURE_STATUS)
    }
}

/// Terminates the child without running atexit handlers or flushing stdio
/// buffers inherited from the executor.
fn exit_now(status: ExitCode) -> ! {
    // SAFETY: `_exit` is async-signal-safe and touches no Rust state.
    unsafe { libc::_exit(status) }
}

fn rewire(io: &StageIo, unused: Option<RawFd>) -> Result<(), (&'static str, Errno)> {
    if let Some(fd) = unused {
        unistd::close(fd).map_err(|e| ("close", e))?;
    }
    let mut stdout = io.stdout.as_ref().map(AsRawFd::as_raw_fd);
    if let Some(stdin) = &io.stdin {
        // An outgoing endpoint sitting on fd 0 would be clobbered by the dup.
        if stdout == Some(STDIN_FILENO) {
            let moved = fcntl(STDIN_FILENO, FcntlArg::F_DUPFD_CLOEXEC(STDERR_FILENO + 1))
                .map_err(|e| ("fcntl", e))?;
            stdout = Some(moved);
        }
        redirect(stdin.as_raw_fd(), STDIN_FILENO)?;
    }
    if let Some(fd) = stdout {
        redirect(fd, STDOUT_FILENO)?;
    }
    Ok(())
}

/// Makes `target` refer to the endpoint `fd` across the image load.
fn redirect(fd: RawFd, target: RawFd) -> Result<(), (&'static str, Errno)> {
    if fd == target {
        // Already in place, but still marked close-on-exec from `pipe2`.
        return fcntl(fd, FcntlArg::F_SETFD(FdFlag::empty()))
            .map(drop)
            .map_err(|e| ("fcntl", e));
    }
    retry_eintr(|| unistd::dup2(fd, target)).map_err(|e| ("dup2", e))?;
    unistd::close(fd).map_err(|e| ("close", e))
}

/// Writes `<what>: <reason>\n` to stderr without allocating.
fn report(what: &[u8], errno: Errno) {
    let stderr = std::io::stderr();
    for part in [what, &b": "[..], errno.desc().as_bytes(), &b"\n"[..]] {
        let _: nix::Result<usize> = unistd::write(&stderr, part);
    }
}
