//! Session lifecycle for the Flock API client
//!
//! Wraps a `Transport` so that every request carries the current access
//! credential, and an expired credential is recovered transparently: one
//! refresh call no matter how many requests fail at once, then a replay of
//! everything that was waiting on it.
//!
//! Request lifecycle:
//! 1. `intercept::attach_credential()` adds the bearer header from the store
//! 2. The transport sends the request
//! 3. `classify::classify()` inspects the status; only a first-attempt 401 goes further
//! 4. `RefreshCoordinator` queues the request and starts (or joins) the single refresh,
//!    or replays it directly when the stored credential already changed
//! 5. Refresh succeeds: new credentials stored, queue replayed in FIFO order
//! 6. Refresh fails: `SessionTerminator` clears the store and publishes
//!    `AuthState::Unauthenticated`, then the queue is rejected with `SessionExpired`

pub mod classify;
pub mod client;
pub mod coordinator;
pub mod error;
pub mod intercept;
pub mod metrics;
pub mod state;
pub mod status;
pub mod terminate;

pub use classify::{Classification, classify};
pub use client::{SessionClient, SessionOptions};
pub use error::{Error, Result};
pub use status::AuthState;
pub use terminate::TerminationReason;
