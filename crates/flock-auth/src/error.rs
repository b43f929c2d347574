//! Error types for session credential operations

/// Errors from auth endpoint calls and storage backends.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("HTTP request failed: {0}")]
    Http(String),

    #[error("token exchange failed: {0}")]
    TokenExchange(String),

    #[error("invalid credentials: {0}")]
    InvalidCredentials(String),

    #[error("credential parse error: {0}")]
    CredentialParse(String),

    #[error("storage error: {0}")]
    Storage(String),
}

impl From<transport::Error> for Error {
    fn from(e: transport::Error) -> Self {
        Error::Http(e.to_string())
    }
}

/// Result alias for auth operations.
pub type Result<T> = std::result::Result<T, Error>;
