use std::fmt;

/// A static problem found in a script: lexing, parsing, or a rule violation
/// detected before evaluation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Diagnostic {
    pub line: u32,
    pub message: String,
}

impl Diagnostic {
    pub fn new(line: u32, message: impl Into<String>) -> Self {
        Diagnostic {
            line,
            message: message.into(),
        }
    }
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "line {}: {}", self.line, self.message)
    }
}

/// Exception classes a script can raise, catch, or receive from a host
/// function.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    Exception,
    UserError,
    ValidationError,
    AccessError,
    ConstraintError,
    RetryableJobError,
    OSError,
    NameError,
    TypeError,
    ValueError,
    KeyError,
    IndexError,
    AttributeError,
    ZeroDivisionError,
    OverflowError,
    MemoryError,
    RecursionError,
}

impl ErrorKind {
    pub fn name(self) -> &'static str {
        match self {
            ErrorKind::Exception => "Exception",
            ErrorKind::UserError => "UserError",
            ErrorKind::ValidationError => "ValidationError",
            ErrorKind::AccessError => "AccessError",
            ErrorKind::ConstraintError => "ConstraintError",
            ErrorKind::RetryableJobError => "RetryableJobError",
            ErrorKind::OSError => "OSError",
            ErrorKind::NameError => "NameError",
            ErrorKind::TypeError => "TypeError",
            ErrorKind::ValueError => "ValueError",
            ErrorKind::KeyError => "KeyError",
            ErrorKind::IndexError => "IndexError",
            ErrorKind::AttributeError => "AttributeError",
            ErrorKind::ZeroDivisionError => "ZeroDivisionError",
            ErrorKind::OverflowError => "OverflowError",
            ErrorKind::MemoryError => "MemoryError",
            ErrorKind::RecursionError => "RecursionError",
        }
    }

    /// `except parent:` catches `self`.
    pub fn is_subclass_of(self, parent: ErrorKind) -> bool {
        if self == parent || parent == ErrorKind::Exception {
            return true;
        }
        matches!(
            (self, parent),
            (ErrorKind::ValidationError, ErrorKind::UserError)
                | (ErrorKind::AccessError, ErrorKind::UserError)
                | (ErrorKind::ConstraintError, ErrorKind::ValidationError)
                | (ErrorKind::ConstraintError, ErrorKind::UserError)
        )
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Every way evaluating a script can fail.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ScriptError {
    /// The source does not lex, parse, or pass static validation.
    #[error("syntax error at {0}")]
    Syntax(Diagnostic),

    /// The script tried to reach outside the sandbox. Never catchable by
    /// script-level `try`.
    #[error("forbidden at line {line}: {message}")]
    Forbidden { line: u32, message: String },

    /// A script-level exception, raised by `raise` or by a host function.
    #[error("{kind}: {message}")]
    Raised {
        kind: ErrorKind,
        message: String,
        line: u32,
    },

    /// The ruleset's step budget ran out.
    #[error("step budget of {limit} exhausted")]
    BudgetExceeded { limit: u64 },
}

impl ScriptError {
    pub fn raised(kind: ErrorKind, message: impl Into<String>) -> Self {
        ScriptError::Raised {
            kind,
            message: message.into(),
            line: 0,
        }
    }

    pub fn forbidden(message: impl Into<String>) -> Self {
        ScriptError::Forbidden {
            line: 0,
            message: message.into(),
        }
    }

    pub fn type_error(message: impl Into<String>) -> Self {
        ScriptError::raised(ErrorKind::TypeError, message)
    }

    pub fn value_error(message: impl Into<String>) -> Self {
        ScriptError::raised(ErrorKind::ValueError, message)
    }

    pub fn overflow_error(message: impl Into<String>) -> Self {
        ScriptError::raised(ErrorKind::OverflowError, message)
    }

    pub fn memory_error(message: impl Into<String>) -> Self {
        ScriptError::raised(ErrorKind::MemoryError, message)
    }

    /// Only `Raised` errors can be intercepted by a script's `except`.
    pub fn is_catchable(&self) -> bool {
        matches!(self, ScriptError::Raised { .. })
    }

    pub fn kind(&self) -> Option<ErrorKind> {
        match self {
            ScriptError::Raised { kind, .. } => Some(*kind),
            _ => None,
        }
    }

    /// Attach a source line if the error does not carry one yet.
    pub fn at_line(self, at: u32) -> Self {
        match self {
            ScriptError::Raised {
                kind,
                message,
                line: 0,
            } => ScriptError::Raised {
                kind,
                message,
                line: at,
            },
            ScriptError::Forbidden { line: 0, message } => {
                ScriptError::Forbidden { line: at, message }
            }
            other => other,
        }
    }

    pub fn line(&self) -> u32 {
        match self {
            ScriptError::Syntax(d) => d.line,
            ScriptError::Forbidden { line, .. } | ScriptError::Raised { line, .. } => *line,
            ScriptError::BudgetExceeded { .. } => 0,
        }
    }

    /// Message without the kind prefix.
    pub fn message(&self) -> String {
        match self {
            ScriptError::Syntax(d) => d.message.clone(),
            ScriptError::Forbidden { message, .. } | ScriptError::Raised { message, .. } => {
                message.clone()
            }
            ScriptError::BudgetExceeded { limit } => {
                format!("step budget of {} exhausted", limit)
            }
        }
    }
}

impl From<Diagnostic> for ScriptError {
    fn from(d: Diagnostic) -> Self {
        ScriptError::Syntax(d)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn validation_error_is_a_user_error() {
        assert!(ErrorKind::ValidationError.is_subclass_of(ErrorKind::UserError));
        assert!(ErrorKind::KeyError.is_subclass_of(ErrorKind::Exception));
        assert!(!ErrorKind::RetryableJobError.is_subclass_of(ErrorKind::UserError));
    }

    #[test]
    fn at_line_only_fills_missing_lines() {
        let e = ScriptError::raised(ErrorKind::TypeError, "bad").at_line(4);
        assert_eq!(e.line(), 4);
        assert_eq!(e.at_line(9).line(), 4);
    }

    #[test]
    fn forbidden_is_not_catchable() {
        assert!(!ScriptError::forbidden("no").is_catchable());
        assert!(ScriptError::type_error("no").is_catchable());
    }
}
