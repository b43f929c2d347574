//! Session teardown
//!
//! Wipes the credential store, publishes `Unauthenticated` and rejects
//! whoever is still waiting. Safe to run any number of times; the second run
//! finds nothing to clear, no state change to publish and nothing to reject.
//!
//! The coordinator calls `end_session` while holding its state lock and
//! `reject` after releasing it. A rejected caller may sign in again at once;
//! by then the teardown it was rejected by is complete and cannot clear the
//! new session.

use std::collections::VecDeque;
use std::sync::Arc;

use flock_auth::CredentialStore;
use tokio::sync::watch;
use tracing::{debug, info};

use crate::error::Error;
use crate::metrics;
use crate::state::PendingRequest;
use crate::status::AuthState;

/// Why a session ended. Used as the `reason` metric label.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TerminationReason {
    /// An access credential expired and no refresh credential was stored
    NoRefreshCredential,
    /// The refresh call failed, timed out, or its result could not be stored
    RefreshFailed,
    /// The user signed out
    Logout,
}

impl TerminationReason {
    pub fn as_str(self) -> &'static str {
        match self {
            TerminationReason::NoRefreshCredential => "no_refresh_credential",
            TerminationReason::RefreshFailed => "refresh_failed",
            TerminationReason::Logout => "logout",
        }
    }
}

pub struct SessionTerminator {
    store: Arc<CredentialStore>,
    auth_state: watch::Sender<AuthState>,
}

impl SessionTerminator {
    pub fn new(store: Arc<CredentialStore>, initial: AuthState) -> Self {
        let (auth_state, _) = watch::channel(initial);
        Self { store, auth_state }
    }

    /// Clear the store and publish `Unauthenticated`.
    pub fn end_session(&self, reason: TerminationReason) {
        self.store.clear();
        if self.publish(AuthState::Unauthenticated) {
            info!(reason = reason.as_str(), "session terminated");
            metrics::record_termination(reason.as_str());
        } else {
            debug!(reason = reason.as_str(), "session already terminated");
        }
    }

    /// Settle every waiter with `SessionExpired`.
    pub fn reject(&self, pending: VecDeque<PendingRequest>) {
        if pending.is_empty() {
            return;
        }
        let count = pending.len();
        for waiter in pending {
            let request_id = waiter.request.id().to_owned();
            if waiter.settle.send(Err(Error::SessionExpired)).is_err() {
                debug!(request_id = %request_id, "caller gone before rejection");
            }
        }
        metrics::record_rejected(count as u64);
        debug!(count, "rejected pending requests");
    }

    /// Publish `state`; returns whether it differs from the previous value.
    /// Works with or without subscribers.
    pub fn publish(&self, state: AuthState) -> bool {
        self.auth_state.send_if_modified(|current| {
            if *current == state {
                false
            } else {
                *current = state;
                true
            }
        })
    }

    pub fn current(&self) -> AuthState {
        self.auth_state.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<AuthState> {
        self.auth_state.subscribe()
    }
}
