use thiserror::Error;

use crate::api::{ApiError, ErrorKind, Retryable};

/// Failures surfaced by session operations.
///
/// `Clone` so that every caller waiting on a shared refresh receives the
/// same error.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum SessionError {
    #[error("Authentication required")]
    AuthenticationRequired,

    #[error("Administrator access required")]
    PermissionDenied,

    #[error("Session expired - please log in again")]
    SessionExpired,

    #[error(transparent)]
    Api(#[from] ApiError),

    #[error("Session storage error: {0}")]
    Storage(String),
}

impl SessionError {
    pub(crate) fn storage(err: anyhow::Error) -> Self {
        SessionError::Storage(format!("{:#}", err))
    }

    /// Classification for API-originated failures; local conditions that
    /// mean "not logged in" classify as `Auth`.
    pub fn kind(&self) -> Option<ErrorKind> {
        match self {
            SessionError::Api(err) => Some(err.kind()),
            SessionError::AuthenticationRequired
            | SessionError::PermissionDenied
            | SessionError::SessionExpired => Some(ErrorKind::Auth),
            SessionError::Storage(_) => None,
        }
    }

    pub fn user_message(&self) -> String {
        match self {
            SessionError::Api(err) => err.user_message(),
            SessionError::AuthenticationRequired => "Please log in to continue.".to_string(),
            SessionError::PermissionDenied => {
                "You do not have permission to access this page.".to_string()
            }
            SessionError::SessionExpired => {
                "Your session has expired. Please log in again.".to_string()
            }
            SessionError::Storage(_) => "Unable to save your session on this device.".to_string(),
        }
    }
}

/// Only transient API failures are worth another attempt.
impl Retryable for SessionError {
    fn is_retryable(&self) -> bool {
        matches!(self, SessionError::Api(err) if err.is_retryable())
    }
}
