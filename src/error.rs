//! Error types for the cardctl CLI

use reqwest::StatusCode;
use thiserror::Error;

/// Result type alias for cardctl operations
pub type Result<T> = std::result::Result<T, Error>;

/// Top-level error type for the application
#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    Api(#[from] ApiError),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error("Interactive prompt error: {0}")]
    Prompt(String),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Operation failed: {0}")]
    Other(String),
}

impl From<dialoguer::Error> for Error {
    fn from(err: dialoguer::Error) -> Self {
        Error::Prompt(err.to_string())
    }
}

impl Error {
    /// The API error behind this error, if any
    pub fn as_api(&self) -> Option<&ApiError> {
        match self {
            Error::Api(err) => Some(err),
            _ => None,
        }
    }
}

/// API-related errors
///
/// Every kind derived from an HTTP response carries the status and the raw
/// response body so callers can inspect what the backend said.
#[derive(Debug, Clone, Error)]
pub enum ApiError {
    /// Unrecoverable 401: no refresh token, refresh failed, or the refresh
    /// response was malformed. Stored tokens have been purged.
    #[error("Authentication failed: {message}. Run `cardctl login` to sign in again.")]
    Authentication {
        status: StatusCode,
        message: String,
        body: Option<String>,
    },

    /// 403: the session is valid but lacks the privilege for this call.
    #[error("Insufficient privilege: {message}")]
    Authorization {
        status: StatusCode,
        message: String,
        body: Option<String>,
    },

    /// Any other non-2xx response
    #[error("Request failed ({status}): {message}")]
    Request {
        status: StatusCode,
        message: String,
        body: Option<String>,
    },

    #[error("Network error: {0}")]
    Network(String),

    #[error("Invalid API response: {0}")]
    InvalidResponse(String),
}

impl ApiError {
    /// HTTP status for response-derived errors
    pub fn status(&self) -> Option<StatusCode> {
        match self {
            ApiError::Authentication { status, .. }
            | ApiError::Authorization { status, .. }
            | ApiError::Request { status, .. } => Some(*status),
            ApiError::Network(_) | ApiError::InvalidResponse(_) => None,
        }
    }

    /// Raw response body, when one was received
    pub fn body(&self) -> Option<&str> {
        match self {
            ApiError::Authentication { body, .. }
            | ApiError::Authorization { body, .. }
            | ApiError::Request { body, .. } => body.as_deref(),
            ApiError::Network(_) | ApiError::InvalidResponse(_) => None,
        }
    }

    /// Authentication error without an HTTP exchange behind it (e.g. a
    /// refresh abandoned because the session was logged out meanwhile)
    pub fn session_ended(message: impl Into<String>) -> Self {
        ApiError::Authentication {
            status: StatusCode::UNAUTHORIZED,
            message: message.into(),
            body: None,
        }
    }

    pub fn is_authentication(&self) -> bool {
        matches!(self, ApiError::Authentication { .. })
    }
}

impl From<reqwest::Error> for ApiError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            ApiError::Network("Request timed out".to_string())
        } else if err.is_connect() {
            ApiError::Network("Failed to connect to API".to_string())
        } else {
            ApiError::Network(err.to_string())
        }
    }
}

/// Token store errors
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Token store database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("Token store I/O error: {0}")]
    Io(String),

    #[error("Could not determine home directory for the token store")]
    NoHome,
}

/// Configuration-related errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Configuration file not found: {0}")]
    NotFound(String),

    #[error("Failed to parse configuration: {0}")]
    ParseError(String),

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

impl From<serde_yaml::Error> for ConfigError {
    fn from(err: serde_yaml::Error) -> Self {
        ConfigError::ParseError(err.to_string())
    }
}
