use tether_script::{ErrorKind, ScriptError};
use tether_storage::StorageError;

/// All errors surfaced by the engine.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    /// Bad configuration, bad script text, or a helper used the wrong way.
    #[error("validation error: {0}")]
    Validation(String),

    /// The operator lacks the capability for this action.
    #[error("access denied: {0}")]
    Access(String),

    /// More matches than the operation allows, or a unique key clash.
    #[error("constraint violated: {0}")]
    Constraint(String),

    /// Task code asked the queue to try again later. The message is the
    /// script's own, unmodified.
    #[error("{0}")]
    Retryable(String),

    /// A user-facing error raised deliberately by task code.
    #[error("{0}")]
    User(String),

    #[error("not found: {0}")]
    NotFound(String),

    /// A bundle file could not be imported.
    #[error("cannot import {file}: {message}")]
    Import { file: String, message: String },

    /// A remote fetch failed.
    #[error("fetch failed: {0}")]
    Fetch(String),

    #[error(transparent)]
    Script(ScriptError),

    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error("configuration error: {0}")]
    Config(String),
}

impl EngineError {
    pub fn is_retryable(&self) -> bool {
        matches!(self, EngineError::Retryable(_))
    }

    /// Re-express this error as a script exception so that it can be raised
    /// inside sandboxed code and caught there by kind.
    pub fn into_script(self) -> ScriptError {
        match self {
            EngineError::Script(e) => e,
            EngineError::Validation(m) => ScriptError::raised(ErrorKind::ValidationError, m),
            EngineError::Import { file, message } => {
                ScriptError::raised(ErrorKind::ValidationError, format!("{}: {}", file, message))
            }
            EngineError::Access(m) => ScriptError::raised(ErrorKind::AccessError, m),
            EngineError::Constraint(m) => ScriptError::raised(ErrorKind::ConstraintError, m),
            EngineError::Retryable(m) => ScriptError::raised(ErrorKind::RetryableJobError, m),
            EngineError::User(m) | EngineError::NotFound(m) => {
                ScriptError::raised(ErrorKind::UserError, m)
            }
            EngineError::Fetch(m) => ScriptError::raised(ErrorKind::OSError, m),
            other => ScriptError::raised(ErrorKind::Exception, other.to_string()),
        }
    }
}

impl From<EngineError> for ScriptError {
    fn from(err: EngineError) -> Self {
        err.into_script()
    }
}

impl From<ScriptError> for EngineError {
    fn from(err: ScriptError) -> Self {
        match &err {
            ScriptError::Syntax(_) | ScriptError::Forbidden { .. } => {
                EngineError::Validation(err.to_string())
            }
            ScriptError::Raised { kind, message, .. } => match kind {
                ErrorKind::ValidationError => EngineError::Validation(message.clone()),
                ErrorKind::RetryableJobError => EngineError::Retryable(message.clone()),
                ErrorKind::AccessError => EngineError::Access(message.clone()),
                ErrorKind::ConstraintError => EngineError::Constraint(message.clone()),
                ErrorKind::UserError => EngineError::User(message.clone()),
                _ => EngineError::Script(err),
            },
            ScriptError::BudgetExceeded { .. } => EngineError::Script(err),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retryable_message_passes_through_unmodified() {
        let err: EngineError =
            ScriptError::raised(ErrorKind::RetryableJobError, "rate limited").into();
        assert!(err.is_retryable());
        assert_eq!(err.to_string(), "rate limited");
        let back = err.into_script();
        assert_eq!(back.kind(), Some(ErrorKind::RetryableJobError));
        assert_eq!(back.message(), "rate limited");
    }

    #[test]
    fn sandbox_violations_become_validation_errors() {
        let err: EngineError = ScriptError::forbidden("import of 'os' is not allowed").into();
        assert!(matches!(err, EngineError::Validation(_)));
    }

    #[test]
    fn other_script_errors_are_kept_whole() {
        let err: EngineError = ScriptError::raised(ErrorKind::KeyError, "'x'").into();
        assert!(matches!(err, EngineError::Script(_)));
    }
}
