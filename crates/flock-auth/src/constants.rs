//! Auth endpoint paths and storage layout
//!
//! Paths are relative to the configured API base URL.

/// Establishes a new session from username and password
pub const LOGIN_PATH: &str = "/auth/login";

/// Exchanges a refresh credential for a new access credential
pub const REFRESH_PATH: &str = "/auth/refresh";

/// Best-effort server-side session invalidation
pub const LOGOUT_PATH: &str = "/auth/logout";

/// File holding the durable scope inside the storage directory
pub const DURABLE_FILE_NAME: &str = "session.json";
