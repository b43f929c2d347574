//! Credential store
//!
//! Holds at most one session, in exactly one persistence scope. Saving into
//! one scope clears the other first; loading checks the durable scope before
//! the ephemeral one. Multi-key operations are serialized by a mutex so a
//! reader never observes half of a save.
//!
//! Storage failures never surface to callers. They are logged and the store
//! behaves as if no session exists, which the rest of the client treats as
//! "unauthenticated".

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use common::Secret;
use tracing::{debug, warn};

use crate::error::Result;
use crate::profile::Profile;
use crate::storage::{MemoryStorage, PersistenceScope, SessionStorage, StorageKey};
use crate::token::LoginResponse;

/// An authenticated session as persisted by the store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Session {
    pub access_credential: Secret,
    /// Absent when the backend issued no refresh credential; an expired
    /// access credential then ends the session immediately.
    pub refresh_credential: Option<Secret>,
    pub profile: Profile,
    pub scope: PersistenceScope,
}

impl Session {
    /// Build a session from a login response, resolving the profile.
    pub fn from_login(login: LoginResponse, scope: PersistenceScope) -> Result<Session> {
        let profile = Profile::resolve(login.profile, login.access_token.expose())?;
        Ok(Session {
            access_credential: login.access_token,
            refresh_credential: login.refresh_token,
            profile,
            scope,
        })
    }
}

/// Single-session store over a `SessionStorage` backend.
pub struct CredentialStore {
    storage: Arc<dyn SessionStorage>,
    lock: Mutex<()>,
}

impl CredentialStore {
    pub fn new(storage: Arc<dyn SessionStorage>) -> Self {
        Self {
            storage,
            lock: Mutex::new(()),
        }
    }

    /// Store backed by process memory only.
    pub fn in_memory() -> Self {
        Self::new(Arc::new(MemoryStorage::new()))
    }

    fn guard(&self) -> MutexGuard<'_, ()> {
        self.lock.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Persist `session` in its scope, clearing the other scope first.
    ///
    /// Returns `false` if the backend rejected the write; the target scope is
    /// then cleared so no partial session remains.
    pub fn save(&self, session: &Session) -> bool {
        let _guard = self.guard();
        let scope = session.scope;
        self.clear_scope(scope.other());

        match self.write_session(session) {
            Ok(()) => {
                debug!(scope = scope.label(), subject = %session.profile.subject, "saved session");
                true
            }
            Err(e) => {
                warn!(scope = scope.label(), error = %e, "failed to save session, clearing scope");
                self.clear_scope(scope);
                false
            }
        }
    }

    /// The persisted session, durable scope first.
    pub fn load(&self) -> Option<Session> {
        let _guard = self.guard();
        self.load_unlocked()
    }

    /// Remove the session from both scopes.
    pub fn clear(&self) {
        let _guard = self.guard();
        for scope in PersistenceScope::READ_ORDER {
            self.clear_scope(scope);
        }
        debug!("cleared session");
    }

    /// Access credential for the interceptor. `None` when signed out or when
    /// storage is unreadable.
    pub fn current_access_credential(&self) -> Option<Secret> {
        self.load().map(|session| session.access_credential)
    }

    pub fn refresh_credential(&self) -> Option<Secret> {
        self.load().and_then(|session| session.refresh_credential)
    }

    /// Scope of the current session, if any.
    pub fn scope(&self) -> Option<PersistenceScope> {
        self.load().map(|session| session.scope)
    }

    /// Replace the credentials of the current session in place.
    ///
    /// The session keeps its scope and profile. When the backend did not rotate
    /// the refresh credential (`rotated_refresh` is `None`) the stored one is
    /// kept. Returns `false` if there is no session to update or the write
    /// failed.
    pub fn update_credentials(&self, access: Secret, rotated_refresh: Option<Secret>) -> bool {
        let _guard = self.guard();
        let Some(current) = self.load_unlocked() else {
            debug!("no session to update");
            return false;
        };

        let updated = Session {
            access_credential: access,
            refresh_credential: rotated_refresh.or(current.refresh_credential),
            profile: current.profile,
            scope: current.scope,
        };
        match self.write_session(&updated) {
            Ok(()) => {
                debug!(scope = updated.scope.label(), "updated session credentials");
                true
            }
            Err(e) => {
                warn!(scope = updated.scope.label(), error = %e, "failed to update credentials, clearing scope");
                self.clear_scope(updated.scope);
                false
            }
        }
    }

    fn load_unlocked(&self) -> Option<Session> {
        for scope in PersistenceScope::READ_ORDER {
            let Some(access) = self.read(scope, StorageKey::AccessCredential) else {
                continue;
            };
            let refresh = self.read(scope, StorageKey::RefreshCredential);
            let profile = self
                .read(scope, StorageKey::Profile)
                .and_then(|raw| match serde_json::from_str::<Profile>(&raw) {
                    Ok(profile) => Some(profile),
                    Err(e) => {
                        warn!(scope = scope.label(), error = %e, "stored profile is malformed");
                        None
                    }
                });

            match profile {
                Some(profile) => {
                    return Some(Session {
                        access_credential: Secret::from(access),
                        refresh_credential: refresh.map(Secret::from),
                        profile,
                        scope,
                    });
                }
                None => {
                    warn!(scope = scope.label(), "discarding incomplete session");
                    self.clear_scope(scope);
                }
            }
        }
        None
    }

    fn write_session(&self, session: &Session) -> Result<()> {
        let scope = session.scope;
        let profile = serde_json::to_string(&session.profile)
            .map_err(|e| crate::Error::Storage(format!("serializing profile: {e}")))?;

        self.storage.write(
            scope,
            StorageKey::AccessCredential,
            session.access_credential.expose(),
        )?;
        match &session.refresh_credential {
            Some(refresh) => {
                self.storage
                    .write(scope, StorageKey::RefreshCredential, refresh.expose())?
            }
            None => self.storage.remove(scope, StorageKey::RefreshCredential)?,
        }
        self.storage.write(scope, StorageKey::Profile, &profile)
    }

    fn read(&self, scope: PersistenceScope, key: StorageKey) -> Option<String> {
        match self.storage.read(scope, key) {
            Ok(value) => value.filter(|v| !v.is_empty()),
            Err(e) => {
                warn!(scope = scope.label(), key = key.as_str(), error = %e, "storage read failed");
                None
            }
        }
    }

    fn clear_scope(&self, scope: PersistenceScope) {
        for key in StorageKey::ALL {
            if let Err(e) = self.storage.remove(scope, key) {
                warn!(scope = scope.label(), key = key.as_str(), error = %e, "storage remove failed");
            }
        }
    }
}
