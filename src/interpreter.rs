use crate::config::ShellConfig;
use crate::lexer;
use crate::pipeline::{Phase, PipelineExecutor, PipelineReport};
use anyhow::Result;
use rustyline::DefaultEditor;
use rustyline::error::ReadlineError;
use std::collections::VecDeque;

/// Supplier of input lines for the prompt loop.
pub trait LineSource {
    /// Returns the next line, or `None` once input is exhausted.
    fn read_line(&mut self, prompt: &str) -> Result<Option<String>>;
}

/// Interactive line editor backed by `rustyline`.
pub struct Editor {
    inner: DefaultEditor,
    history: bool,
}

impl Editor {
    pub fn new(history: bool) -> Result<Self> {
        Ok(Self {
            inner: DefaultEditor::new()?,
            history,
        })
    }
}

impl LineSource for Editor {
    fn read_line(&mut self, prompt: &str) -> Result<Option<String>> {
        match self.inner.readline(prompt) {
            Ok(line) => {
                if self.history && !line.trim().is_empty() {
                    self.inner.add_history_entry(line.as_str())?;
                }
                Ok(Some(line))
            }
            // Ctrl-C drops whatever was typed and prompts again.
            Err(ReadlineError::Interrupted) => Ok(Some(String::new())),
            Err(ReadlineError::Eof) => Ok(None),
            Err(err) => Err(err.into()),
        }
    }
}

/// Fixed, in-memory sequence of lines.
#[derive(Debug, Default)]
pub struct ScriptedLines {
    lines: VecDeque<String>,
}

impl ScriptedLines {
    pub fn new<I, S>(lines: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            lines: lines.into_iter().map(Into::into).collect(),
        }
    }
}

impl LineSource for ScriptedLines {
    fn read_line(&mut self, _prompt: &str) -> Result<Option<String>> {
        Ok(self.lines.pop_front())
    }
}

/// A minimal interpreter that runs each input line as a pipeline.
///
/// Example
/// ```no_run
/// use pipeline_shell::{Interpreter, ShellConfig};
/// let mut sh = Interpreter::new(ShellConfig::default());
/// let report = sh.run_line("true | false").unwrap();
/// assert_eq!(report.spawned.len(), 2);
/// ```
pub struct Interpreter {
    config: ShellConfig,
    executor: PipelineExecutor,
}

impl Interpreter {
    pub fn new(config: ShellConfig) -> Self {
        Self {
            config,
            executor: PipelineExecutor::new(),
        }
    }

    pub fn config(&self) -> &ShellConfig {
        &self.config
    }

    pub fn phase(&self) -> Phase {
        self.executor.phase()
    }

    /// Tokenizes and executes one line.
    ///
    /// A line that can't be tokenized is reported on stderr and skipped,
    /// yielding an empty report. An `Err` is a fatal executor failure.
    pub fn run_line(&mut self, line: &str) -> Result<PipelineReport> {
        self.executor.enter(Phase::Parsing);
        let stages = match lexer::split_into_stages(line, self.config.max_stages) {
            Ok(stages) => stages,
            Err(e) => {
                eprintln!("{e}");
                self.executor.enter(Phase::Idle);
                return Ok(PipelineReport::default());
            }
        };
        tracing::debug!(stages = stages.len(), "parsed line");
        self.executor.run(&stages)
    }

    /// Reads and executes lines until `source` reports end-of-input.
    pub fn repl(&mut self, source: &mut dyn LineSource) -> Result<()> {
        while let Some(line) = source.read_line(&self.config.prompt)? {
            self.run_line(&line)?;
        }
        tracing::debug!("end of input");
        Ok(())
    }
}

impl Default for Interpreter {
    fn default() -> Self {
        Self::new(ShellConfig::default())
    }
}
