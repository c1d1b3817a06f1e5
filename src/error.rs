//! Error types for the render service

use thiserror::Error;

/// Result type alias for service operations
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while brokering a render request
#[derive(Error, Debug)]
pub enum Error {
    /// A request parameter was missing, malformed, or out of range
    #[error("{0}")]
    Validation(String),

    /// The render did not complete before the wait deadline
    #[error("after {0} seconds")]
    Timeout(u64),

    /// The engine reported a failure; the payload is a short fixed tag
    #[error("{0}")]
    Engine(&'static str),

    /// Basic-auth credentials were missing or wrong
    #[error("unauthorized")]
    Unauthorized,

    /// Failed to initialize the engine or server
    #[error("initialization failed: {0}")]
    Initialization(String),

    /// Failed to fetch a page
    #[error("failed to load URL: {0}")]
    Load(String),

    /// The dispatcher worker is gone and cannot accept jobs
    #[error("dispatcher unavailable: {0}")]
    Dispatch(String),
}
