//! A module implementing lexical analysis (tokenization) of a pipeline line.
//!
//! The grammar is deliberately flat: a line is a sequence of program names
//! separated by blanks and/or the pipe character. There is no quoting or
//! escaping, so a `|` is always a delimiter, even where a user meant it to
//! be part of a name.

use crate::command::Stage;
use std::fmt;

/// Upper bound on the number of stages accepted in a single line.
pub const MAX_STAGES: usize = 100;

/// Errors that can occur while splitting a line into stages.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LexingError {
    /// The line holds more stages than the executor accepts.
    TooManyStages { count: usize, max: usize },
    /// A program name contains a NUL byte and can't be passed to the OS.
    InteriorNul { position: usize },
}

impl fmt::Display for LexingError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LexingError::TooManyStages { count, max } => {
                write!(f, "too many stages: {count} (limit is {max})")
            }
            LexingError::InteriorNul { position } => {
                write!(f, "stage {position}: program name contains a NUL byte")
            }
        }
    }
}

impl std::error::Error for LexingError {}

fn is_delimiter(ch: char) -> bool {
    matches!(ch, ' ' | '\t' | '|')
}

/// Splits `line` into its ordered, non-empty program names.
///
/// The count is checked before any [`Stage`] is built, so an oversized line
/// is rejected as a whole.
///
/// # Returns
/// `Ok(vec![])` for a blank line, the stages in left-to-right order otherwise,
/// or a [`LexingError`] when the line can't form a pipeline.
pub fn split_into_stages(line: &str, max: usize) -> Result<Vec<Stage>, LexingError> {
    let names: Vec<&str> = line.split(is_delimiter).filter(|s| !s.is_empty()).collect();
    if names.len() > max {
        return Err(LexingError::TooManyStages {
            count: names.len(),
            max,
        });
    }

    names
        .into_iter()
        .enumerate()
        .map(|(position, name)| {
            Stage::new(position, name).ok_or(LexingError::InteriorNul { position })
        })
        .collect()
}
