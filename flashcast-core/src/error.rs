//! Error types for flashcast-core

use thiserror::Error;

/// Main error type for the flashcast-core library
#[derive(Error, Debug)]
pub enum Error {
    /// Database error
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON parsing error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Configuration error
    #[error("configuration error: {0}")]
    Config(String),

    /// Entity absent for the requesting owner
    #[error("{entity} not found: {id}")]
    NotFound { entity: &'static str, id: String },

    /// Malformed identifier, date, or template configuration
    #[error("bad request: {0}")]
    BadRequest(String),
}

/// Coarse classification used by callers to pick a transport-level response.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    NotFound,
    BadRequest,
    Internal,
}

impl Error {
    pub fn not_found(entity: &'static str, id: impl Into<String>) -> Self {
        Error::NotFound {
            entity,
            id: id.into(),
        }
    }

    pub fn bad_request(message: impl Into<String>) -> Self {
        Error::BadRequest(message.into())
    }

    /// Classify this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::NotFound { .. } => ErrorKind::NotFound,
            Error::BadRequest(_) => ErrorKind::BadRequest,
            Error::Database(_) | Error::Io(_) | Error::Json(_) | Error::Config(_) => {
                ErrorKind::Internal
            }
        }
    }
}

/// Result type alias for flashcast-core
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_kinds() {
        assert_eq!(Error::not_found("campaign", "c1").kind(), ErrorKind::NotFound);
        assert_eq!(Error::bad_request("nope").kind(), ErrorKind::BadRequest);
        assert_eq!(
            Error::Config("broken".to_string()).kind(),
            ErrorKind::Internal
        );
    }

    #[test]
    fn test_not_found_message() {
        let err = Error::not_found("campaign", "abc");
        assert_eq!(err.to_string(), "campaign not found: abc");
    }
}
