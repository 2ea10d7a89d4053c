//! Error types for the logging engine itself
//!
//! These errors describe failures of configuration, sinks and I/O. They are
//! distinct from [`ClassifiedException`](crate::exception::ClassifiedException),
//! which is the value produced when *application* errors are classified.

use thiserror::Error;

/// Result type alias using the crate error
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for the logging engine
///
/// Large error variants are boxed to reduce stack size
#[derive(Debug, Error)]
pub enum Error {
    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(Box<figment::Error>),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// File size threshold could not be parsed (e.g. `"50M"`)
    #[error("Invalid size: {0}")]
    InvalidSize(String),

    /// Unknown level name
    #[error("Invalid level: {0}")]
    InvalidLevel(String),

    /// A sink could not be built or written
    #[error("Sink error: {0}")]
    Sink(String),

    /// Remote aggregation sink failure
    #[error("Remote sink error: {0}")]
    Remote(String),

    /// Tracing subscriber could not be installed
    #[error("Observability error: {0}")]
    Observability(String),
}

// Manual From implementations for boxed errors
impl From<figment::Error> for Error {
    fn from(err: figment::Error) -> Self {
        Error::Config(Box::new(err))
    }
}

impl From<reqwest::Error> for Error {
    fn from(err: reqwest::Error) -> Self {
        Error::Remote(err.to_string())
    }
}
