//! Transport abstraction for the Flock API client
//!
//! Defines the `Transport` trait that decouples the session layer from the
//! HTTP stack. The session layer only ever sees `ApiRequest`/`ApiResponse`
//! values; `HttpTransport` turns them into reqwest calls against the
//! configured base URL.
//!
//! A transport never interprets status codes. A 401 or a 500 is a successful
//! round trip from its point of view and comes back as `Ok(ApiResponse)`;
//! only failures to complete the exchange (connect errors, timeouts, unreadable
//! bodies) are `Err`.

pub mod http;
pub mod request;

pub use http::{HttpTransport, HttpTransportBuilder};
pub use request::{ApiRequest, ApiResponse};
pub use reqwest::{Method, StatusCode, header};

use std::future::Future;
use std::pin::Pin;

/// Errors from completing (or preparing) an HTTP exchange.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("HTTP request failed: {0}")]
    Http(String),

    #[error("request timed out: {0}")]
    Timeout(String),

    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("invalid response body: {0}")]
    Decode(String),

    #[error("configuration error: {0}")]
    Config(String),
}

/// Result alias for transport operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Boxed future returned by `Transport::send`.
pub type SendFuture<'a> = Pin<Box<dyn Future<Output = Result<ApiResponse>> + Send + 'a>>;

/// Sends a prepared request and yields the raw response.
///
/// Uses a boxed future return type for dyn-compatibility (`Arc<dyn Transport>`).
/// Implementations must not add or strip credentials: whatever headers the
/// request carries are what goes on the wire.
pub trait Transport: Send + Sync {
    fn send(&self, request: ApiRequest) -> SendFuture<'_>;
}
