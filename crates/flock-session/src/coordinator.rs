//! Single-flight credential refresh
//!
//! The first request to come back 401 starts one refresh call; every request
//! that expires while it is in flight waits in a FIFO queue behind it. The
//! refresh outcome settles the whole queue: replay with the new credential on
//! success, reject with `SessionExpired` (and end the session) on failure.
//!
//! The refresh runs in its own task so that it completes even if the request
//! that triggered it is dropped. Completions are tagged with a generation; a
//! refresh that finishes after the session was torn down is discarded and
//! never writes credentials back.
//!
//! Every write to the store that follows a state transition (new credentials,
//! teardown, a fresh login) happens under the state lock, so on a
//! multi-threaded runtime a teardown cannot land on top of a newer session.
//! Waiters are settled only after the lock is released.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use common::Secret;
use flock_auth::{CredentialStore, Profile, RefreshResponse, Session};
use futures_util::future::join_all;
use tokio::sync::oneshot;
use tracing::{Instrument, debug, info, info_span, warn};
use transport::{ApiRequest, ApiResponse, Transport};

use crate::classify::{Classification, classify};
use crate::error::{Error, Result};
use crate::metrics;
use crate::state::{PendingRequest, RefreshAction, RefreshEvent, RefreshState, handle_event};
use crate::status::AuthState;
use crate::terminate::{SessionTerminator, TerminationReason};

pub struct RefreshCoordinator {
    transport: Arc<dyn Transport>,
    store: Arc<CredentialStore>,
    terminator: SessionTerminator,
    state: Mutex<RefreshState>,
    refresh_timeout: Option<Duration>,
}

impl RefreshCoordinator {
    pub fn new(
        transport: Arc<dyn Transport>,
        store: Arc<CredentialStore>,
        terminator: SessionTerminator,
        refresh_timeout: Option<Duration>,
    ) -> Self {
        Self {
            transport,
            store,
            terminator,
            state: Mutex::new(RefreshState::default()),
            refresh_timeout,
        }
    }

    pub fn terminator(&self) -> &SessionTerminator {
        &self.terminator
    }

    fn lock(&self) -> MutexGuard<'_, RefreshState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Run one transition on the locked state.
    fn apply(state: &mut RefreshState, event: RefreshEvent) -> RefreshAction {
        let (next, action) = handle_event(std::mem::take(state), event);
        *state = next;
        action
    }

    /// Whether a refresh is currently in flight.
    pub fn is_refreshing(&self) -> bool {
        self.lock().is_refreshing()
    }

    /// Hand over a request whose first attempt came back 401 and wait for the
    /// refresh to settle it. `sent_with` is the credential the request carried.
    ///
    /// If the store already holds a different credential, a refresh or login
    /// finished while the request was in flight; it is replayed with that
    /// credential instead of starting another refresh.
    pub async fn recover(
        self: &Arc<Self>,
        request: ApiRequest,
        sent_with: Option<Secret>,
    ) -> Result<ApiResponse> {
        let request_id = request.id().to_owned();
        let (settle, settled) = oneshot::channel();
        let pending = PendingRequest { request, settle };

        let (action, current) = {
            let mut state = self.lock();
            let current = self.store.current_access_credential();
            let superseded = current.is_some() && current != sent_with;
            let refreshable = state.is_refreshing() || self.store.refresh_credential().is_some();
            let action = Self::apply(
                &mut state,
                RefreshEvent::Expired {
                    pending,
                    refreshable,
                    superseded,
                },
            );
            if matches!(action, RefreshAction::Terminate(_)) {
                warn!(request_id = %request_id, "access credential expired and no refresh credential stored");
                self.terminator
                    .end_session(TerminationReason::NoRefreshCredential);
            }
            (action, current)
        };

        match (action, current) {
            (RefreshAction::StartRefresh { generation }, _) => {
                info!(request_id = %request_id, generation, "access credential expired, refreshing");
                let span = info_span!("refresh", generation);
                tokio::spawn(Arc::clone(self).drive_refresh(generation).instrument(span));
            }
            (RefreshAction::Queued, _) => {
                debug!(request_id = %request_id, "queued behind in-flight refresh");
            }
            (RefreshAction::Replay(queue), Some(credential)) => {
                debug!(request_id = %request_id, "credential replaced while in flight, replaying");
                self.replay(queue, credential).await;
            }
            (RefreshAction::Terminate(queue), _) => self.terminator.reject(queue),
            (RefreshAction::Replay(_), None) | (RefreshAction::Discard, _) => {}
        }

        // A dropped sender means the waiter was discarded without a verdict
        settled.await.unwrap_or(Err(Error::SessionExpired))
    }

    /// Tear the session down, rejecting anything still queued.
    pub fn terminate(&self, reason: TerminationReason) {
        let queue = {
            let mut state = self.lock();
            let action = Self::apply(&mut state, RefreshEvent::Terminated);
            self.terminator.end_session(reason);
            Self::abandoned(action)
        };
        self.terminator.reject(queue);
    }

    /// Replace whatever session exists with `session`, abandoning an
    /// in-flight refresh and rejecting its queue. Returns whether the
    /// session was stored.
    pub fn begin_session(&self, session: &Session) -> bool {
        let (saved, queue) = {
            let mut state = self.lock();
            let action = Self::apply(&mut state, RefreshEvent::Terminated);
            let saved = self.store.save(session);
            if saved {
                self.terminator
                    .publish(AuthState::Authenticated(session.profile.clone()));
            }
            (saved, Self::abandoned(action))
        };
        self.terminator.reject(queue);
        saved
    }

    /// Publish the state matching whatever session the store holds.
    pub fn restore(&self) -> Option<Profile> {
        let _state = self.lock();
        let profile = self.store.load().map(|session| session.profile);
        self.terminator.publish(AuthState::from(profile.clone()));
        profile
    }

    fn abandoned(action: RefreshAction) -> VecDeque<PendingRequest> {
        match action {
            RefreshAction::Terminate(queue) => queue,
            _ => VecDeque::new(),
        }
    }

    async fn drive_refresh(self: Arc<Self>, generation: u64) {
        let outcome = self.request_credentials().await;

        let mut fresh: Option<Secret> = None;
        let action = {
            let mut state = self.lock();
            if !state.is_current(generation) {
                RefreshAction::Discard
            } else {
                let event = match outcome {
                    Ok(RefreshResponse {
                        access_token,
                        refresh_token,
                    }) => {
                        let access = access_token.clone();
                        if self.store.update_credentials(access_token, refresh_token) {
                            fresh = Some(access);
                            RefreshEvent::RefreshSucceeded { generation }
                        } else {
                            warn!("refreshed credentials could not be stored");
                            RefreshEvent::RefreshFailed { generation }
                        }
                    }
                    Err(e) => {
                        warn!(error = %e, "credential refresh failed");
                        RefreshEvent::RefreshFailed { generation }
                    }
                };
                let action = Self::apply(&mut state, event);
                if matches!(action, RefreshAction::Terminate(_)) {
                    self.terminator.end_session(TerminationReason::RefreshFailed);
                }
                action
            }
        };

        match (action, fresh) {
            (RefreshAction::Replay(queue), Some(credential)) => {
                metrics::record_refresh("success");
                info!(queued = queue.len(), "credential refreshed, replaying");
                self.replay(queue, credential).await;
            }
            (RefreshAction::Terminate(queue), _) => {
                metrics::record_refresh("failure");
                self.terminator.reject(queue);
            }
            (RefreshAction::Discard, _) => {
                metrics::record_refresh("discarded");
                info!("refresh completed after session ended, discarding");
            }
            _ => {}
        }
    }

    /// One refresh call on the raw transport, bounded by `refresh_timeout`
    /// when set.
    async fn request_credentials(&self) -> Result<RefreshResponse> {
        let refresh_credential = self
            .store
            .refresh_credential()
            .ok_or_else(|| Error::Auth("no refresh credential stored".into()))?;
        let call = flock_auth::refresh(self.transport.as_ref(), &refresh_credential);

        match self.refresh_timeout {
            Some(limit) => tokio::time::timeout(limit, call)
                .await
                .map_err(|_| Error::Transport(format!("refresh timed out after {limit:?}")))?
                .map_err(Error::from),
            None => call.await.map_err(Error::from),
        }
    }

    /// Reissue queued requests in order with `credential`, settling each
    /// waiter with its own outcome. Replies are not re-intercepted.
    async fn replay(&self, queue: VecDeque<PendingRequest>, credential: Secret) {
        let mut withdrawn = 0usize;
        let mut replays = Vec::with_capacity(queue.len());

        for pending in queue {
            if pending.is_withdrawn() {
                withdrawn += 1;
                debug!(request_id = pending.request.id(), "caller withdrew, skipping replay");
                continue;
            }
            let PendingRequest {
                mut request,
                settle,
            } = pending;
            request.mark_retry();
            if let Err(e) = request.set_bearer(&credential) {
                let _ = settle.send(Err(e.into()));
                continue;
            }

            let transport = Arc::clone(&self.transport);
            replays.push(async move {
                let request_id = request.id().to_owned();
                let result = transport.send(request.clone()).await.map_err(Error::from);
                if let Ok(response) = &result
                    && classify(&request, response.status()) == Classification::ExpiredRetried
                {
                    warn!(request_id = %request_id, "replayed request rejected again, returning as-is");
                }
                if settle.send(result).is_err() {
                    debug!(request_id = %request_id, "caller withdrew during replay");
                }
            });
        }

        metrics::record_replayed(replays.len() as u64);
        debug!(replaying = replays.len(), withdrawn, "replaying queued requests");
        join_all(replays).await;
    }
}
