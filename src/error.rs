use thiserror::Error;
use validator::ValidationErrors;

/// Errors returned by engine operations that reject their input outright.
///
/// Speculative calls that do not apply in the current phase are not errors;
/// the engine ignores them instead.
#[derive(Debug, Error)]
pub enum ServiceError {
    /// Invalid input provided by the caller.
    #[error("invalid input: {0}")]
    InvalidInput(String),
    /// Operation cannot be performed in the current state.
    #[error("invalid state: {0}")]
    InvalidState(String),
}

impl From<ValidationErrors> for ServiceError {
    fn from(err: ValidationErrors) -> Self {
        ServiceError::InvalidInput(format!("validation failed: {}", err))
    }
}
