use std::collections::BTreeMap;

use serde::Serialize;
use serde_json::Value;
use thiserror::Error;
use tracing::{debug, warn};

/// Maximum length for error response bodies in error messages
const MAX_ERROR_BODY_LENGTH: usize = 500;

/// Machine-readable classification of an [`ApiError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[cfg_attr(feature = "ts", derive(ts_rs::TS))]
#[cfg_attr(feature = "ts", ts(export))]
pub enum ErrorKind {
    Network,
    Auth,
    Validation,
    Server,
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum ApiError {
    #[error("Network error: {0}")]
    Network(String),

    #[error("Authentication failed: {message}")]
    Auth { status: Option<u16>, message: String },

    #[error("Validation failed: {message}")]
    Validation {
        status: u16,
        message: String,
        fields: BTreeMap<String, Vec<String>>,
    },

    #[error("Server error ({status}): {message}")]
    Server { status: u16, message: String },

    #[error("Invalid response: {0}")]
    InvalidResponse(String),
}

impl ApiError {
    /// Truncate a response body to avoid logging excessive data
    fn truncate_body(body: &str) -> String {
        if body.len() <= MAX_ERROR_BODY_LENGTH {
            body.to_string()
        } else {
            let mut end = MAX_ERROR_BODY_LENGTH;
            while !body.is_char_boundary(end) {
                end -= 1;
            }
            format!("{}... (truncated, {} total bytes)", &body[..end], body.len())
        }
    }

    /// Classify a non-success response by status code.
    pub fn from_status(status: u16, body: &str) -> Self {
        let parsed: Option<Value> = serde_json::from_str(body).ok();
        let message = parsed
            .as_ref()
            .and_then(Self::extract_message)
            .unwrap_or_else(|| Self::truncate_body(body));

        match status {
            401 | 403 => ApiError::Auth {
                status: Some(status),
                message,
            },
            400..=499 => {
                let fields = parsed.as_ref().map(Self::extract_fields).unwrap_or_default();
                ApiError::Validation {
                    status,
                    message,
                    fields,
                }
            }
            500..=599 => ApiError::Server { status, message },
            _ => ApiError::InvalidResponse(format!("Status {}: {}", status, message)),
        }
    }

    /// Pull a human-readable message out of a JSON error body.
    fn extract_message(body: &Value) -> Option<String> {
        ["detail", "message", "error"]
            .iter()
            .find_map(|key| body.get(*key).and_then(Value::as_str))
            .map(str::to_string)
    }

    /// Field-level messages in the `{"field": ["msg", ...]}` shape.
    fn extract_fields(body: &Value) -> BTreeMap<String, Vec<String>> {
        let mut fields = BTreeMap::new();
        if let Value::Object(map) = body {
            for (key, value) in map {
                let messages: Vec<String> = match value {
                    Value::Array(items) => items
                        .iter()
                        .filter_map(Value::as_str)
                        .map(str::to_string)
                        .collect(),
                    Value::String(s) if key != "detail" && key != "message" => vec![s.clone()],
                    _ => Vec::new(),
                };
                if !messages.is_empty() {
                    fields.insert(key.clone(), messages);
                }
            }
        }
        fields
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            ApiError::Network(_) => ErrorKind::Network,
            ApiError::Auth { .. } => ErrorKind::Auth,
            ApiError::Validation { .. } => ErrorKind::Validation,
            ApiError::Server { .. } | ApiError::InvalidResponse(_) => ErrorKind::Server,
        }
    }

    /// Only transient failures are worth retrying. A rejected credential
    /// never becomes valid by asking again.
    pub fn is_retryable(&self) -> bool {
        matches!(self.kind(), ErrorKind::Network | ErrorKind::Server)
    }

    /// Text suitable for showing to the user.
    pub fn user_message(&self) -> String {
        match self {
            ApiError::Network(_) => {
                "Unable to connect to server. Check your internet connection.".to_string()
            }
            ApiError::Auth { status: Some(401), .. } | ApiError::Auth { status: None, .. } => {
                "Your credentials were rejected. Please log in again.".to_string()
            }
            ApiError::Auth { message, .. } => format!("Access denied: {}", message),
            ApiError::Validation {
                message, fields, ..
            } => {
                if fields.is_empty() {
                    message.clone()
                } else {
                    fields
                        .iter()
                        .map(|(field, msgs)| {
                            if field == "non_field_errors" {
                                msgs.join(" ")
                            } else {
                                format!("{}: {}", field, msgs.join(" "))
                            }
                        })
                        .collect::<Vec<_>>()
                        .join("\n")
                }
            }
            ApiError::Server { .. } | ApiError::InvalidResponse(_) => {
                "The server had a problem. Please try again later.".to_string()
            }
        }
    }

    /// Record the raw error. Network failures carry no detail worth
    /// displaying, so their cause only ends up in the log.
    pub fn log(&self, operation: &str) {
        match self {
            ApiError::Network(cause) => warn!(operation, cause = %cause, "Network error"),
            ApiError::Validation { .. } => debug!(operation, error = %self, "Request rejected"),
            _ => warn!(operation, kind = ?self.kind(), error = %self, "API request failed"),
        }
    }
}

impl From<reqwest::Error> for ApiError {
    fn from(err: reqwest::Error) -> Self {
        if let Some(status) = err.status() {
            ApiError::from_status(status.as_u16(), "")
        } else if err.is_decode() {
            ApiError::InvalidResponse(err.to_string())
        } else {
            ApiError::Network(err.to_string())
        }
    }
}
