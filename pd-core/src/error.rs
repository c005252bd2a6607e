use thiserror::Error;

pub type Result<T> = std::result::Result<T, CoreError>;

/// Failure taxonomy for the decision pipeline.
///
/// `Transient` and `Validation` are reliability failures: the engine
/// swallows them and substitutes the deterministic fallback. `Authorization`
/// is a security boundary and is surfaced to the caller. `Configuration`
/// degrades the model path permanently until fixed.
#[derive(Debug, Error)]
pub enum CoreError {
    #[error("transient provider error: {0}")]
    Transient(String),

    #[error("validation error: {0}")]
    Validation(String),

    #[error("authorization error: {0}")]
    Authorization(String),

    #[error("configuration error: {0}")]
    Configuration(String),

    #[error("storage error: {0}")]
    Storage(String),

    #[error("not found: {0}")]
    NotFound(String),
}

impl CoreError {
    /// Whether the engine may substitute a fallback decision for this error.
    /// Authorization and not-found failures must surface instead.
    pub fn falls_back(&self) -> bool {
        matches!(
            self,
            Self::Transient(_) | Self::Validation(_) | Self::Configuration(_) | Self::Storage(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn authorization_never_falls_back() {
        assert!(!CoreError::Authorization("not a participant".to_string()).falls_back());
        assert!(!CoreError::NotFound("conversation".to_string()).falls_back());
        assert!(CoreError::Transient("timeout".to_string()).falls_back());
        assert!(CoreError::Validation("bad json".to_string()).falls_back());
    }
}
