//! Session-aware API client
//!
//! Every call goes interceptor -> transport -> classifier. A first-attempt 401
//! is handed to the refresh coordinator; everything else comes back to the
//! caller unchanged. Login, refresh and logout use the raw transport so they
//! are never intercepted themselves.

use std::sync::Arc;
use std::time::Duration;

use flock_auth::{CredentialStore, PersistenceScope, Profile, Session};
use serde::de::DeserializeOwned;
use tokio::sync::watch;
use tracing::{debug, info, instrument, warn};
use transport::{ApiRequest, ApiResponse, Transport};

use crate::classify::{Classification, classify};
use crate::coordinator::RefreshCoordinator;
use crate::error::{Error, Result};
use crate::intercept::attach_credential;
use crate::status::AuthState;
use crate::terminate::{SessionTerminator, TerminationReason};
use common::Secret;

/// Tuning for the session layer.
#[derive(Debug, Clone, Default)]
pub struct SessionOptions {
    /// Upper bound on a single refresh call. `None` waits as long as the
    /// backend takes; queued requests wait with it.
    pub refresh_timeout: Option<Duration>,
}

/// Cheap to clone; clones share one store, one coordinator and one auth state.
#[derive(Clone)]
pub struct SessionClient {
    transport: Arc<dyn Transport>,
    store: Arc<CredentialStore>,
    coordinator: Arc<RefreshCoordinator>,
}

impl SessionClient {
    pub fn new(
        transport: Arc<dyn Transport>,
        store: Arc<CredentialStore>,
        options: SessionOptions,
    ) -> Self {
        let initial = AuthState::from(store.load().map(|session| session.profile));
        let terminator = SessionTerminator::new(Arc::clone(&store), initial);
        let coordinator = Arc::new(RefreshCoordinator::new(
            Arc::clone(&transport),
            Arc::clone(&store),
            terminator,
            options.refresh_timeout,
        ));
        Self {
            transport,
            store,
            coordinator,
        }
    }

    /// Send `request` with the current credential.
    ///
    /// Non-auth failures come back as `Ok` with their status. An expired
    /// credential is refreshed once and the request replayed; if the session
    /// cannot be recovered the result is `Err(SessionExpired)`. Dropping the
    /// returned future while it waits on a refresh withdraws the request.
    #[instrument(skip_all, fields(request_id = %request.id(), method = %request.method(), path = %request.path()))]
    pub async fn send(&self, request: ApiRequest) -> Result<ApiResponse> {
        let (outbound, sent_with) = attach_credential(&self.store, request.clone())?;
        let response = self.transport.send(outbound).await?;

        match classify(&request, response.status()) {
            Classification::NotExpired => Ok(response),
            Classification::ExpiredFirstAttempt => {
                debug!("access credential rejected");
                self.coordinator.recover(request, sent_with).await
            }
            Classification::ExpiredRetried => {
                warn!("credential rejected on retry");
                Ok(response)
            }
        }
    }

    /// `send`, then turn a non-success status into a typed error and decode a
    /// success body as JSON. An empty body decodes as `null`.
    pub async fn execute<T: DeserializeOwned>(&self, request: ApiRequest) -> Result<T> {
        let response = self.send(request).await?;
        if !response.is_success() {
            return Err(Error::from_status(response.status(), response.text()));
        }
        if response.body().is_empty() {
            return serde_json::from_str("null")
                .map_err(|e| Error::Decode(format!("empty response body: {e}")));
        }
        Ok(response.json()?)
    }

    /// Sign in and persist the session. `remember` selects the durable scope.
    ///
    /// A refresh still in flight for a previous session is abandoned and its
    /// waiters rejected.
    #[instrument(skip_all, fields(username = %username, remember))]
    pub async fn login(&self, username: &str, password: &Secret, remember: bool) -> Result<Profile> {
        let response = flock_auth::login(self.transport.as_ref(), username, password).await?;
        let session = Session::from_login(response, PersistenceScope::from_remember(remember))?;

        if !self.coordinator.begin_session(&session) {
            return Err(Error::Auth("session could not be stored".into()));
        }

        info!(subject = %session.profile.subject, scope = session.scope.label(), "signed in");
        Ok(session.profile)
    }

    /// Pick up a persisted session at start-up and publish the matching state.
    pub fn restore(&self) -> Option<Profile> {
        let profile = self.coordinator.restore();
        match &profile {
            Some(p) => info!(subject = %p.subject, "restored session"),
            None => debug!("no session to restore"),
        }
        profile
    }

    /// End the session locally, then tell the backend. The backend call is
    /// best-effort and its failure is only logged.
    #[instrument(skip_all)]
    pub async fn logout(&self) {
        let credential = self.store.current_access_credential();
        self.coordinator.terminate(TerminationReason::Logout);

        if let Some(credential) = credential
            && let Err(e) = flock_auth::logout(self.transport.as_ref(), &credential).await
        {
            warn!(error = %e, "logout call failed, session cleared locally");
        }
    }

    /// Cached identity, without a round trip.
    pub fn profile(&self) -> Option<Profile> {
        self.store.load().map(|session| session.profile)
    }

    pub fn is_authenticated(&self) -> bool {
        self.store.current_access_credential().is_some()
    }

    pub fn subscribe(&self) -> watch::Receiver<AuthState> {
        self.coordinator.terminator().subscribe()
    }

    pub fn store(&self) -> &CredentialStore {
        &self.store
    }
}
