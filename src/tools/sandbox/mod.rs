//! Restricted interpreter for a small Python-like language.
//!
//! Code never touches the host: there are no imports, no attribute access
//! beyond a fixed set of methods, and no I/O except the captured `print`.
//! Execution is bounded by a step budget, a work budget for builtin loops
//! and comparisons, collection and string size limits, and a cancellation
//! flag the host can raise from another thread.

mod budget;
mod interp;
mod lexer;
mod parser;
mod value;

use std::sync::atomic::AtomicBool;
use std::sync::Arc;

use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq)]
pub enum SandboxError {
    #[error("SyntaxError: {message} (line {line})")]
    Syntax { message: String, line: usize },

    #[error("NameError: name '{0}' is not defined")]
    Name(String),

    #[error("TypeError: {0}")]
    Type(String),

    #[error("ValueError: {0}")]
    Value(String),

    #[error("ZeroDivisionError: {0}")]
    ZeroDivision(String),

    #[error("IndexError: {0}")]
    Index(String),

    #[error("KeyError: {0}")]
    Key(String),

    #[error("AttributeError: {0}")]
    Attribute(String),

    #[error("OverflowError: {0}")]
    Overflow(String),

    #[error("RecursionError: {0}")]
    Recursion(String),

    #[error("LimitExceeded: {0}")]
    Limit(String),
}

/// What a finished program left behind.
#[derive(Debug, Clone, PartialEq)]
pub struct RunOutput {
    /// The `result` binding converted to JSON, if the program assigned one.
    pub result: Option<serde_json::Value>,

    /// Everything passed to `print`.
    pub stdout: String,
}

/// Parse and execute `code` in a fresh environment. Setting `cancel` makes
/// the run stop with a limit error at its next step.
pub fn run(code: &str, cancel: Arc<AtomicBool>) -> Result<RunOutput, SandboxError> {
    let tokens = lexer::tokenize(code)?;
    let program = parser::parse(tokens)?;

    let mut interpreter = interp::Interpreter::with_cancel(cancel);
    interpreter.execute(&program)?;

    Ok(RunOutput {
        result: interpreter
            .lookup("result")
            .map(|v| v.to_json())
            .transpose()?,
        stdout: interpreter.into_stdout(),
    })
}
