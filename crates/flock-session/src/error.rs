//! Error types for session-managed API calls

use transport::StatusCode;

/// Errors surfaced to callers of `SessionClient`.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// The session ended (no refresh credential, refresh failed, or the user
    /// signed out) while this request was waiting on it.
    #[error("session expired, sign in again")]
    SessionExpired,

    #[error("transport error: {0}")]
    Transport(String),

    #[error("bad request: {0}")]
    BadRequest(String),

    #[error("unauthorized: {0}")]
    Unauthorized(String),

    #[error("forbidden: {0}")]
    Forbidden(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("API returned {status}: {message}")]
    Status { status: u16, message: String },

    #[error("invalid response body: {0}")]
    Decode(String),

    #[error("invalid credentials: {0}")]
    InvalidCredentials(String),

    #[error("auth error: {0}")]
    Auth(String),
}

impl Error {
    /// Map a non-success API status to its typed error.
    pub fn from_status(status: StatusCode, message: String) -> Self {
        match status {
            StatusCode::BAD_REQUEST => Error::BadRequest(message),
            StatusCode::UNAUTHORIZED => Error::Unauthorized(message),
            StatusCode::FORBIDDEN => Error::Forbidden(message),
            StatusCode::NOT_FOUND => Error::NotFound(message),
            other => Error::Status {
                status: other.as_u16(),
                message,
            },
        }
    }
}

impl From<transport::Error> for Error {
    fn from(e: transport::Error) -> Self {
        match e {
            transport::Error::Decode(msg) => Error::Decode(msg),
            other => Error::Transport(other.to_string()),
        }
    }
}

impl From<flock_auth::Error> for Error {
    fn from(e: flock_auth::Error) -> Self {
        match e {
            flock_auth::Error::InvalidCredentials(msg) => Error::InvalidCredentials(msg),
            other => Error::Auth(other.to_string()),
        }
    }
}

/// Result alias for session operations.
pub type Result<T> = std::result::Result<T, Error>;
