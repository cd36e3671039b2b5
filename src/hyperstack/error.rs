//! Error types for the Hyperstack provider.

use crate::config::ConfigError;
use thiserror::Error;

/// Errors raised by the Hyperstack provider.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum HyperstackError {
    /// Raised when the provider configuration is incomplete or malformed.
    #[error("configuration error: {0}")]
    Config(String),
    /// Raised when the request never produced an HTTP response.
    #[error("{operation} failed: {message}")]
    Transport {
        /// Provider operation being attempted.
        operation: String,
        /// Message returned by the HTTP client.
        message: String,
    },
    /// Raised when the provider answers with a non-success status.
    #[error("{operation} rejected with HTTP {status}: {body}")]
    Request {
        /// Provider operation being attempted.
        operation: String,
        /// HTTP status code returned by the provider.
        status: u16,
        /// Response body returned by the provider.
        body: String,
    },
    /// Raised when a success response cannot be decoded.
    #[error("failed to decode {operation} response: {message}")]
    Decode {
        /// Provider operation being attempted.
        operation: String,
        /// Decoder error message.
        message: String,
    },
}

impl HyperstackError {
    /// Returns the HTTP status for [`HyperstackError::Request`] failures.
    #[must_use]
    pub const fn status(&self) -> Option<u16> {
        match self {
            Self::Request { status, .. } => Some(*status),
            _ => None,
        }
    }
}

impl From<ConfigError> for HyperstackError {
    fn from(value: ConfigError) -> Self {
        Self::Config(value.to_string())
    }
}
