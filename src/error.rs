//! Provides [InterpretationError], the error that most things return.

use std::fmt;

use thiserror::Error;

/// Any error that can occur during interpretation.
#[derive(Debug, Error)]
pub enum InterpretationError {
    /// One or more compile-time errors, such as syntax errors or name errors.
    /// The compiler keeps going after the first error (synchronizing at
    /// statement boundaries), so there may be several diagnostics.
    #[error("compile error")]
    CompileError(Vec<Diagnostic>),
    /// A runtime error, such as a type error or an undefined variable.
    #[error("{0}")]
    RuntimeError(#[from] RuntimeError),
}

/// A single compile-time diagnostic, tied to a source line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Diagnostic {
    /// Line the offending token was found on.
    pub line: usize,
    /// Where the error was detected: at a lexeme, at end-of-file, or nowhere
    /// in particular (scanner errors already name the offending text).
    pub location: ErrorLocation,
    /// Human-readable description of what went wrong.
    pub message: String,
}

/// The position qualifier printed between `Error` and the message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ErrorLocation {
    /// `Error at 'lexeme': …`
    At(String),
    /// `Error at end: …`
    AtEnd,
    /// `Error: …`
    Unlocated,
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[line {}] Error", self.line)?;
        match &self.location {
            ErrorLocation::At(lexeme) => write!(f, " at '{lexeme}'")?,
            ErrorLocation::AtEnd => write!(f, " at end")?,
            ErrorLocation::Unlocated => (),
        }
        write!(f, ": {}", self.message)
    }
}

/// A runtime error with the stack trace at the moment of failure.
///
/// The trace lists one entry per call frame, innermost first.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RuntimeError {
    pub message: String,
    pub trace: Vec<TraceLine>,
}

/// One `[line N] in <func …>` entry of a runtime stack trace.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TraceLine {
    pub line: usize,
    /// Rendered name of the function executing in this frame.
    pub function: String,
}

impl fmt::Display for RuntimeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)?;
        for entry in &self.trace {
            write!(f, "\n[line {}] in {}", entry.line, entry.function)?;
        }
        Ok(())
    }
}

impl std::error::Error for RuntimeError {}
