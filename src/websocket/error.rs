use thiserror::Error;

use crate::chat::ChatError;

/// Per-frame failures, reported to the sending connection only.
#[derive(Debug, Error)]
pub enum CommandError {
    #[error("Invalid message format")]
    InvalidJson,

    #[error("Unknown message type: {0}")]
    UnknownType(String),

    #[error("{0}")]
    Validation(String),

    #[error("Invalid {0}")]
    InvalidId(String),

    #[error("You are not a member of this chat")]
    Forbidden,

    #[error("Message rate limit exceeded ({0}/min)")]
    RateLimited(u64),

    #[error("Binary messages are not supported")]
    UnsupportedFormat,

    #[error(transparent)]
    Chat(#[from] ChatError),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl CommandError {
    pub fn code(&self) -> &'static str {
        match self {
            CommandError::InvalidJson => "INVALID_JSON",
            CommandError::UnknownType(_) => "UNKNOWN_TYPE",
            CommandError::Validation(_) => "VALIDATION_ERROR",
            CommandError::InvalidId(_) => "INVALID_ID",
            CommandError::Forbidden => "FORBIDDEN",
            CommandError::RateLimited(_) => "RATE_LIMITED",
            CommandError::UnsupportedFormat => "UNSUPPORTED_FORMAT",
            CommandError::Chat(e) => e.code(),
            CommandError::Internal(_) => "INTERNAL_ERROR",
        }
    }

    /// Text shown to the client. Storage failures are not described.
    pub fn client_message(&self) -> String {
        match self {
            CommandError::Chat(ChatError::Database(_)) | CommandError::Internal(_) => {
                "Internal server error".to_string()
            }
            other => other.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_codes() {
        assert_eq!(CommandError::InvalidJson.code(), "INVALID_JSON");
        assert_eq!(CommandError::RateLimited(60).code(), "RATE_LIMITED");
        assert_eq!(CommandError::Chat(ChatError::Forbidden).code(), "FORBIDDEN");
        assert_eq!(
            CommandError::Chat(ChatError::Database(sqlx::Error::PoolTimedOut)).code(),
            "INTERNAL_ERROR"
        );
    }

    #[test]
    fn test_database_details_hidden() {
        let err = CommandError::Chat(ChatError::Database(sqlx::Error::PoolTimedOut));
        assert_eq!(err.client_message(), "Internal server error");
        assert_eq!(
            CommandError::RateLimited(60).client_message(),
            "Message rate limit exceeded (60/min)"
        );
    }
}
