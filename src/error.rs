//! The error taxonomy described in spec.md §7.
//!
//! Each variant follows a common idiom for compiler errors: a
//! `derive_more::Display` impl carries the message, and `Debug` forwards to
//! `Display` so that `?`/`.unwrap()` failures read as a single clean line
//! rather than a derived struct dump.

use std::fmt;

use derive_more::Display;

use crate::common::Loc;

/// An error surfaced while lexing or parsing the frontend's textual IR
/// surface syntax. Carries a source coordinate when one is available.
#[derive(Display)]
#[display("parse error: {message}{}", loc.map(|l| format!(" at {l}")).unwrap_or_default())]
pub struct ParseError {
    pub message: String,
    pub loc: Option<Loc>,
}

impl ParseError {
    pub fn new(message: impl Into<String>, loc: Option<Loc>) -> Self {
        ParseError {
            message: message.into(),
            loc,
        }
    }

    /// Render a caret-pointing line for the given source text, per spec.md §6.3.
    pub fn caret_display(&self, source: &str) -> String {
        let Some(loc) = self.loc else {
            return self.to_string();
        };
        let line_text = source.lines().nth(loc.line as usize).unwrap_or("");
        let caret = " ".repeat(loc.col as usize) + "^";
        format!("{self}\n{line_text}\n{caret}")
    }
}

impl fmt::Debug for ParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{self}")
    }
}

/// An IR construct that the active backend refuses to lower: an unsupported
/// operator, cast, statement kind, or initializer shape. Fatal for the
/// compilation (spec.md §7).
#[derive(Display)]
#[display("unsupported feature: {_0}")]
pub struct UnsupportedFeatureError(pub String);

impl fmt::Debug for UnsupportedFeatureError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{self}")
    }
}

/// A configuration or constraint violation inside the backend: an
/// unsupported linkage tag, a pinned location out of range, an unsupported
/// global initializer type, register-allocator exhaustion, and so on.
#[derive(Display)]
#[display("backend error: {_0}")]
pub struct BackendError(pub String);

impl fmt::Debug for BackendError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{self}")
    }
}

/// An assertion-style invariant failure: a def/use chain violation, a
/// misplaced terminator, relocation length drift. These are programmer
/// errors in the sense that a conformant frontend/pipeline should never
/// trigger them, but they are still surfaced as a typed error at the
/// library's API boundary (rather than a panic) so the CLI can report them
/// without a Rust backtrace, per spec.md §7.
#[derive(Display)]
#[display("internal error: {_0}")]
pub struct InternalError(pub String);

impl fmt::Debug for InternalError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{self}")
    }
}

/// The error type returned by the library's top-level compile entry point.
#[derive(Display)]
pub enum CompileError {
    #[display("{_0}")]
    Parse(ParseError),
    #[display("{_0}")]
    UnsupportedFeature(UnsupportedFeatureError),
    #[display("{_0}")]
    Backend(BackendError),
    #[display("{_0}")]
    Internal(InternalError),
}

impl fmt::Debug for CompileError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{self}")
    }
}

impl From<ParseError> for CompileError {
    fn from(e: ParseError) -> Self {
        CompileError::Parse(e)
    }
}

impl From<UnsupportedFeatureError> for CompileError {
    fn from(e: UnsupportedFeatureError) -> Self {
        CompileError::UnsupportedFeature(e)
    }
}

impl From<BackendError> for CompileError {
    fn from(e: BackendError) -> Self {
        CompileError::Backend(e)
    }
}

impl From<InternalError> for CompileError {
    fn from(e: InternalError) -> Self {
        CompileError::Internal(e)
    }
}

impl std::error::Error for CompileError {}

/// Exit code this error should produce from the CLI, per spec.md §6.3.
impl CompileError {
    pub fn exit_code(&self) -> i32 {
        1
    }
}
