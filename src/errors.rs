//! The closed error taxonomy raised by the evaluator.
use crate::{ast::Location, value::Value};
use std::fmt;

/// The kind of error raised by the runtime. Closed taxonomy: adding a new
/// failure mode means adding a new variant here, not inventing a string code
/// somewhere else.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ErrorKind {
    UndefinedVariable,
    UndefinedFunction,
    UndefinedMethod,
    TypeError,
    LimitExceeded,
    Timeout,
    Abort,
    AutoException,
}

impl ErrorKind {
    /// The single-letter component of the `RILL-[LPRC]\d{3}` error id. All
    /// runtime-raised errors use `R`; `L`/`P`/`C` are reserved for the lexer,
    /// parser, and check phases, which live outside this crate.
    fn code_letter(self) -> char {
        'R'
    }

    /// A stable 3-digit code per kind, used to build the `errorId`.
    fn code_number(self) -> u32 {
        match self {
            ErrorKind::UndefinedVariable => 1,
            ErrorKind::UndefinedFunction => 2,
            ErrorKind::UndefinedMethod => 3,
            ErrorKind::TypeError => 4,
            ErrorKind::LimitExceeded => 5,
            ErrorKind::Timeout => 6,
            ErrorKind::Abort => 7,
            ErrorKind::AutoException => 8,
        }
    }

    fn error_id(self) -> String {
        format!("RILL-{}{:03}", self.code_letter(), self.code_number())
    }
}

/// Structured, per-kind context carried alongside an error. Keys are stable
/// and documented in spec.md §7; this enum pins them to a type instead of a
/// loosely-typed map so callers can match on the shape they expect.
#[derive(Clone, Debug)]
pub enum ErrorContext {
    None,
    Assignment {
        variable_name: String,
        expected_type: String,
        actual_type: String,
    },
    HostFunctionArg {
        function_name: String,
        param_name: String,
        expected_type: String,
        actual_type: String,
    },
    DictKey {
        key: String,
        available_keys: Vec<String>,
    },
    IterationLimit {
        limit: usize,
        iterations: usize,
    },
    Timeout {
        function_name: String,
        timeout_ms: u64,
    },
    AutoException {
        pattern: String,
        matched: String,
    },
    Destructure {
        expected: usize,
        actual: usize,
    },
}

impl Default for ErrorContext {
    fn default() -> Self {
        ErrorContext::None
    }
}

/// An error raised at runtime. Mirrors the teacher's `Exception`, but carries
/// a fixed structured `context` instead of wrapping an arbitrary `Value`,
/// since the spec's error surface is a typed record, not a thrown value.
#[derive(Clone, Debug)]
pub struct RillError {
    pub kind: ErrorKind,
    pub message: String,
    pub location: Option<Location>,
    pub context: ErrorContext,
    /// Frozen call-stack snapshot at the moment the error was raised, newest
    /// frame first. Populated by the evaluator as the error unwinds, the way
    /// the teacher threads `fiber.backtrace()` onto an `Exception` once its
    /// `backtrace` field is still empty.
    pub call_stack: Vec<CallStackFrame>,
}

#[derive(Clone, Debug)]
pub struct CallStackFrame {
    pub location: Option<Location>,
    pub function_name: String,
}

impl RillError {
    pub fn new(kind: ErrorKind, message: impl Into<String>, location: Option<Location>) -> Self {
        Self {
            kind,
            message: message.into(),
            location,
            context: ErrorContext::None,
            call_stack: Vec::new(),
        }
    }

    pub fn with_context(mut self, context: ErrorContext) -> Self {
        self.context = context;
        self
    }

    pub fn error_id(&self) -> String {
        self.kind.error_id()
    }

    /// Retrieve the frozen call-stack snapshot for this error. Spec §6
    /// requires this accessor to be the only sanctioned way to inspect a
    /// runtime error's call stack.
    pub fn call_stack(&self) -> &[CallStackFrame] {
        &self.call_stack
    }
}

impl fmt::Display for RillError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.error_id(), self.message)?;

        if let Some(loc) = &self.location {
            write!(f, " at {}:{}", loc.start.line, loc.start.column)?;
        }

        Ok(())
    }
}

impl std::error::Error for RillError {}

impl From<RillError> for Value {
    fn from(error: RillError) -> Value {
        Value::from(error.message)
    }
}

/// The semver pattern the help-URL helper requires; malformed versions yield
/// an empty string rather than a malformed link.
fn is_semver(version: &str) -> bool {
    let mut parts = version.split('.');
    let ok = (0..3).all(|_| {
        parts
            .next()
            .map(|p| !p.is_empty() && p.chars().all(|c| c.is_ascii_digit()))
            .unwrap_or(false)
    });
    ok && parts.next().is_none()
}

/// `RILL-[LPRC]\d{3}` — matches the id format produced by `ErrorKind::error_id`
/// as well as ids from the lexer/parser/check phases this crate doesn't emit.
fn is_valid_error_id(id: &str) -> bool {
    let bytes = id.as_bytes();
    id.len() == 9
        && &id[..5] == "RILL-"
        && matches!(bytes[5], b'L' | b'P' | b'R' | b'C')
        && bytes[6..9].iter().all(|b| b.is_ascii_digit())
}

/// Build the help URL for a given error id and crate version, or the empty
/// string if either is malformed.
pub fn help_url(error_id: &str, version: &str) -> String {
    if !is_valid_error_id(error_id) || !is_semver(version) {
        return String::new();
    }

    format!(
        "https://github.com/rcrsr/rill/blob/v{}/docs/ref-errors.md#{}",
        version,
        error_id.to_lowercase()
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_id_format() {
        let err = RillError::new(ErrorKind::TypeError, "boom", None);
        assert_eq!(err.error_id(), "RILL-R004");
    }

    #[test]
    fn help_url_valid() {
        assert_eq!(
            help_url("RILL-R004", "1.2.3"),
            "https://github.com/rcrsr/rill/blob/v1.2.3/docs/ref-errors.md#rill-r004"
        );
    }

    #[test]
    fn help_url_malformed_id() {
        assert_eq!(help_url("nonsense", "1.2.3"), "");
    }

    #[test]
    fn help_url_malformed_version() {
        assert_eq!(help_url("RILL-R004", "1.2"), "");
        assert_eq!(help_url("RILL-R004", "v1.2.3"), "");
    }
}
