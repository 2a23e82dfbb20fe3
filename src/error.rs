// Error types for the MediaCMS client.
// Classifies transport failures, HTTP status failures, auth outcomes and local storage errors.

use std::collections::BTreeMap;

use thiserror::Error;

/// Errors surfaced by the request pipeline and its collaborators.
///
/// The type is `Clone` because a single deduplicated call or refresh
/// settles for every caller that joined it.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ClientError {
    #[error("Network unavailable: {0}")]
    NetworkUnavailable(String),

    #[error("Request timed out")]
    Timeout,

    #[error("HTTP {status}: {message}")]
    HttpStatus { status: u16, message: String },

    #[error("Session expired: {0}")]
    AuthExpired(String),

    #[error("Forbidden: {0}")]
    Forbidden(String),

    #[error("Account blocked: {0}")]
    AccountBlocked(String),

    #[error("Validation failed: {}", format_fields(.0))]
    ValidationFailed(BTreeMap<String, Vec<String>>),

    #[error("Failed to decode response: {0}")]
    Decode(String),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("Invalid header value: {0}")]
    InvalidHeader(String),

    /// The request could not be built, so it was never sent.
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Request task aborted: {0}")]
    Aborted(String),
}

impl ClientError {
    /// Whether the transport should retry after this failure.
    pub fn is_transient(&self) -> bool {
        match self {
            ClientError::NetworkUnavailable(_) | ClientError::Timeout => true,
            ClientError::HttpStatus { status, .. } => *status >= 500,
            _ => false,
        }
    }

    /// HTTP status associated with the error, if a response was received.
    pub fn status(&self) -> Option<u16> {
        match self {
            ClientError::HttpStatus { status, .. } => Some(*status),
            ClientError::AuthExpired(_) => Some(401),
            ClientError::Forbidden(_) => Some(403),
            ClientError::ValidationFailed(_) => Some(400),
            _ => None,
        }
    }

    /// Human-readable message for a notification surface.
    pub fn user_message(&self) -> String {
        match self {
            ClientError::NetworkUnavailable(_) => {
                "Network connection failed, check your network settings".to_string()
            }
            ClientError::Timeout => "The server took too long to respond".to_string(),
            ClientError::AuthExpired(_) => "Not logged in or the session has expired".to_string(),
            ClientError::AccountBlocked(_) => {
                "Your account has been blocked, please contact an administrator".to_string()
            }
            ClientError::Forbidden(message) | ClientError::HttpStatus { message, .. } => {
                message.clone()
            }
            ClientError::ValidationFailed(fields) => format_fields(fields),
            other => other.to_string(),
        }
    }
}

/// Generic message used when the server provides no detail.
pub fn default_status_message(status: u16) -> &'static str {
    match status {
        400 => "Bad request",
        401 => "Not logged in or the session has expired",
        403 => "You do not have permission to access this resource",
        404 => "The requested resource does not exist",
        408 => "Request timed out",
        429 => "Too many requests, please slow down",
        500 => "Server error, please try again later",
        502 | 503 | 504 => "Service temporarily unavailable",
        _ => "Request failed",
    }
}

fn format_fields(fields: &BTreeMap<String, Vec<String>>) -> String {
    fields
        .iter()
        .map(|(field, messages)| format!("{}: {}", field, messages.join(", ")))
        .collect::<Vec<_>>()
        .join("; ")
}

impl From<reqwest::Error> for ClientError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_builder() {
            ClientError::InvalidRequest(err.to_string())
        } else if err.is_timeout() {
            ClientError::Timeout
        } else if err.is_decode() {
            ClientError::Decode(err.to_string())
        } else if let Some(status) = err.status() {
            ClientError::HttpStatus {
                status: status.as_u16(),
                message: default_status_message(status.as_u16()).to_string(),
            }
        } else {
            ClientError::NetworkUnavailable(err.to_string())
        }
    }
}

impl From<serde_json::Error> for ClientError {
    fn from(err: serde_json::Error) -> Self {
        ClientError::Decode(err.to_string())
    }
}

impl From<std::io::Error> for ClientError {
    fn from(err: std::io::Error) -> Self {
        ClientError::Storage(err.to_string())
    }
}

impl From<reqwest::header::InvalidHeaderValue> for ClientError {
    fn from(err: reqwest::header::InvalidHeaderValue) -> Self {
        ClientError::InvalidHeader(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, ClientError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transient_classification() {
        assert!(ClientError::Timeout.is_transient());
        assert!(ClientError::NetworkUnavailable("reset".into()).is_transient());
        assert!(
            ClientError::HttpStatus {
                status: 503,
                message: "down".into()
            }
            .is_transient()
        );
        assert!(
            !ClientError::HttpStatus {
                status: 404,
                message: "missing".into()
            }
            .is_transient()
        );
        assert!(!ClientError::AuthExpired("gone".into()).is_transient());
    }

    #[test]
    fn test_builder_error_is_not_transient() {
        let err = reqwest::Client::new()
            .get("http://[::1")
            .build()
            .unwrap_err();
        let err = ClientError::from(err);
        assert!(matches!(err, ClientError::InvalidRequest(_)), "got {:?}", err);
        assert!(!err.is_transient());
    }

    #[test]
    fn test_validation_display() {
        let mut fields = BTreeMap::new();
        fields.insert("email".to_string(), vec!["already taken".to_string()]);
        fields.insert(
            "password".to_string(),
            vec!["too short".to_string(), "too common".to_string()],
        );
        let err = ClientError::ValidationFailed(fields);
        assert_eq!(
            err.to_string(),
            "Validation failed: email: already taken; password: too short, too common"
        );
    }

    #[test]
    fn test_blocked_message_is_not_session_message() {
        let blocked = ClientError::AccountBlocked("blocked".into()).user_message();
        let expired = ClientError::AuthExpired("expired".into()).user_message();
        assert_ne!(blocked, expired);
    }
}
