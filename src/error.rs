use std::error::Error as StdError;
use std::io;
use thiserror::Error;

/// Boxed error type carried by handler failures
pub type BoxError = Box<dyn StdError + Send + Sync + 'static>;

/// Main error type for the server
#[derive(Error, Debug)]
pub enum ServerError {
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("HTTP parsing error: {0}")]
    HttpParse(String),

    /// A terminal operation was attempted on a context that is already resolved,
    /// or whose response was already ended at the transport level
    #[error("Already ended: {0}")]
    AlreadyEnded(&'static str),

    /// A header name that is not a token, or a value carrying CR, LF or
    /// other control characters
    #[error("Invalid header: {0}")]
    InvalidHeader(String),

    #[error("Headers already sent")]
    HeadersSent,

    #[error("Unsupported compression encoding: {0}")]
    UnsupportedEncoding(String),

    /// An error raised by a pipeline handler
    #[error("Handler error: {0}")]
    Handler(#[source] BoxError),

    #[error("Handler panicked: {0}")]
    HandlerPanic(String),

    #[error("Invalid route pattern: {0}")]
    Pattern(#[from] regex::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl ServerError {
    /// Wrap an arbitrary handler error
    pub fn handler<E>(error: E) -> Self
    where
        E: Into<BoxError>,
    {
        ServerError::Handler(error.into())
    }

    /// Whether this error reports a double termination
    pub fn is_already_ended(&self) -> bool {
        matches!(self, ServerError::AlreadyEnded(_))
    }
}

pub type ServerResult<T> = Result<T, ServerError>;
