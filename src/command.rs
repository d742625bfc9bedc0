use std::ffi::CString;
use std::fmt;

/// Conventional process exit code type used by this crate.
///
/// A value of 0 indicates success; any non-zero value indicates failure.
pub type ExitCode = i32;

/// Status a child exits with when its program image could not be loaded.
///
/// Matches the POSIX shell convention for "command not found".
pub const EXEC_FAILURE_STATUS: ExitCode = 127;

/// One program in a pipeline.
///
/// A stage carries only its program name; it is always invoked with
/// `argv = [program]`. The argument vector is built once, when the stage is
/// parsed, so a freshly created child never has to allocate before it loads
/// the program image.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Stage {
    position: usize,
    program: String,
    argv: [CString; 1],
}

impl Stage {
    /// Returns `None` when `program` contains an interior NUL byte.
    pub fn new(position: usize, program: impl Into<String>) -> Option<Self> {
        let program = program.into();
        let c_program = CString::new(program.as_bytes()).ok()?;
        Some(Self {
            position,
            program,
            argv: [c_program],
        })
    }

    /// Zero-based position within the pipeline.
    pub fn position(&self) -> usize {
        self.position
    }

    pub fn program(&self) -> &str {
        &self.program
    }

    pub(crate) fn c_program(&self) -> &CString {
        &self.argv[0]
    }

    pub(crate) fn argv(&self) -> &[CString] {
        &self.argv
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.program)
    }
}
