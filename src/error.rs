use std::path::PathBuf;

use thiserror::Error;

/// Failure raised while evaluating Forge code.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum EvalError {
    /// The code called `exit(code)`.
    #[error("exit requested with code {0}")]
    Exit(i32),
    #[error("{0}")]
    Fault(String),
}

impl From<String> for EvalError {
    fn from(message: String) -> Self {
        EvalError::Fault(message)
    }
}

impl From<&str> for EvalError {
    fn from(message: &str) -> Self {
        EvalError::Fault(message.to_string())
    }
}

pub type EvalResult<T> = Result<T, EvalError>;

/// Errors that end the whole reload session.
#[derive(Debug, Error)]
pub enum ReloadError {
    #[error("cannot watch '{}': {source}", path.display())]
    WatchSetupFailed {
        path: PathBuf,
        #[source]
        source: notify::Error,
    },
    #[error("failed to write console output: {0}")]
    Io(#[from] std::io::Error),
}
