use thiserror::Error;

#[derive(Debug, Error)]
pub enum CoreError {
    #[error("spinwick configuration error: {0}")]
    Configuration(String),
    #[error("spinwick dependency unavailable: {0}")]
    DependencyUnavailable(String),
    #[error("timed out {0}")]
    Timeout(String),
    #[error("spinwick internal error: {0}")]
    Internal(String),
}
