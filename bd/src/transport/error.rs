//! Transport error types

use thiserror::Error;

/// Errors that can occur talking to the chat API
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),

    #[error("API error {status}: {message}")]
    Api { status: u16, message: String },

    /// The API answered `ok: false`
    #[error("Rejected by API: {0}")]
    Rejected(String),

    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    #[error("Configuration error: {0}")]
    Config(String),
}

impl TransportError {
    /// Check if this error is retryable
    pub fn is_retryable(&self) -> bool {
        match self {
            TransportError::Network(_) => true,
            TransportError::Api { status, .. } => *status == 429 || *status >= 500,
            TransportError::Rejected(_) => false,
            TransportError::InvalidResponse(_) => false,
            TransportError::Config(_) => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_is_retryable() {
        assert!(
            TransportError::Api {
                status: 503,
                message: "Unavailable".to_string()
            }
            .is_retryable()
        );
        assert!(
            TransportError::Api {
                status: 429,
                message: "Slow down".to_string()
            }
            .is_retryable()
        );
        assert!(
            !TransportError::Api {
                status: 401,
                message: "Bad token".to_string()
            }
            .is_retryable()
        );
        assert!(!TransportError::Rejected("Chat not found".to_string()).is_retryable());
        assert!(!TransportError::InvalidResponse("not json".to_string()).is_retryable());
        assert!(!TransportError::Config("no token".to_string()).is_retryable());
    }
}
