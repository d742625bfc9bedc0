//! A minimal interactive pipeline runner.
//!
//! Each input line is split into program names separated by `|`. Every
//! program becomes one process; adjacent processes are connected stdout to
//! stdin through an anonymous pipe, and the line is done once every process
//! has been reaped. Programs are always run without arguments.
//!
//! The main entry point is [`Interpreter`]. [`lexer`] and [`pipeline`] expose
//! the tokenizer and the executor on their own.

pub mod channel;
pub mod command;
pub mod config;
mod interpreter;
pub mod lexer;
pub mod logging;
pub mod pipeline;
pub mod process;

pub use config::ShellConfig;
pub use interpreter::{Editor, Interpreter, LineSource, ScriptedLines};
pub use pipeline::{PipelineExecutor, PipelineReport};
