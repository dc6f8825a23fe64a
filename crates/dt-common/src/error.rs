use thiserror::Error;

/// Error taxonomy shared across the core (spec.md §7).
#[derive(Debug, Error)]
pub enum CoreError {
    #[error("not found: {0}")]
    NotFound(String),

    #[error("remote unavailable: {0}")]
    RemoteUnavailable(String),

    #[error("parse error: {0}")]
    ParseError(String),

    #[error("missing configuration: {0}")]
    ConfigurationMissing(String),

    #[error("runtime error: {0}")]
    RuntimeError(String),

    #[error("concurrent state: {0}")]
    ConcurrentState(String),
}
