//! Error types for queuerpc.

use std::fmt;

use thiserror::Error;

/// Main error type for all dispatch operations.
#[derive(Debug, Error)]
pub enum RpcError {
    /// Broker client error (connection, channel, queue operations).
    #[error("AMQP error: {0}")]
    Amqp(#[from] lapin::Error),

    /// JSON serialization/deserialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Configuration source could not be read or deserialized.
    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),

    /// A composite parameter could not be decoded from the request body.
    #[error("Cannot bind parameter '{parameter}': {reason}")]
    Binding { parameter: String, reason: String },

    /// A required parameter was absent after binding.
    #[error("Missing argument for parameter '{0}'")]
    MissingArgument(String),

    /// Controller or binding cannot be used for dispatch.
    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(String),

    /// The channel is not open.
    #[error("Transport unavailable: {0}")]
    TransportUnavailable(String),

    /// Error returned by a handler.
    #[error("{0}")]
    Handler(HandlerError),

    /// Handler panicked while running.
    #[error("Handler panicked: {0}")]
    Panic(String),

    /// I/O error (signal handling).
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Writer task or consumer stream went away.
    #[error("Connection closed")]
    ConnectionClosed,
}

impl RpcError {
    /// Create a binding error for a parameter.
    pub fn binding(parameter: impl Into<String>, reason: impl fmt::Display) -> Self {
        Self::Binding {
            parameter: parameter.into(),
            reason: reason.to_string(),
        }
    }

    /// Error kind name reported in failure results.
    ///
    /// Handler errors report the handler's own kind rather than the wrapper's.
    pub fn kind(&self) -> &str {
        match self {
            Self::Amqp(_) => "AmqpError",
            Self::Json(_) => "BindingFailure",
            Self::Config(_) => "ConfigError",
            Self::Binding { .. } => "BindingFailure",
            Self::MissingArgument(_) => "MissingArgument",
            Self::InvalidConfiguration(_) => "InvalidConfiguration",
            Self::TransportUnavailable(_) => "TransportUnavailable",
            Self::Handler(e) => e.kind(),
            Self::Panic(_) => "Panic",
            Self::Io(_) => "IoError",
            Self::ConnectionClosed => "ConnectionClosed",
        }
    }

    /// Message reported in failure results.
    pub fn message(&self) -> String {
        match self {
            Self::Handler(e) => e.message().to_string(),
            other => other.to_string(),
        }
    }

    /// Whether this error ends the message cycle without a reply; the
    /// delivery is rejected instead of acknowledged.
    pub fn is_configuration(&self) -> bool {
        matches!(self, Self::InvalidConfiguration(_))
    }
}

/// Result type alias using RpcError.
pub type Result<T> = std::result::Result<T, RpcError>;

/// Error returned by RPC handlers.
///
/// Carries the error kind name and message that end up in the failure result.
/// Any `std::error::Error` converts into it, so handlers can use `?` freely:
///
/// ```
/// use queuerpc::HandlerError;
///
/// fn parse(input: &str) -> Result<i32, HandlerError> {
///     Ok(input.parse::<i32>()?)
/// }
///
/// let err = parse("nope").unwrap_err();
/// assert_eq!(err.kind(), "ParseIntError");
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HandlerError {
    kind: String,
    message: String,
}

impl HandlerError {
    /// Create a handler error with an explicit kind.
    pub fn new(kind: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            message: message.into(),
        }
    }

    /// Error kind name.
    pub fn kind(&self) -> &str {
        &self.kind
    }

    /// Error message.
    pub fn message(&self) -> &str {
        &self.message
    }
}

impl fmt::Display for HandlerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.kind, self.message)
    }
}

impl<E> From<E> for HandlerError
where
    E: std::error::Error + Send + Sync + 'static,
{
    fn from(err: E) -> Self {
        Self {
            kind: short_type_name::<E>().to_string(),
            message: err.to_string(),
        }
    }
}

impl From<HandlerError> for RpcError {
    fn from(err: HandlerError) -> Self {
        RpcError::Handler(err)
    }
}

/// Last path segment of a type name, without generic arguments.
pub(crate) fn short_type_name<T: ?Sized>() -> &'static str {
    let full = std::any::type_name::<T>();
    let base = full.split('<').next().unwrap_or(full);
    base.rsplit("::").next().unwrap_or(base)
}
