//! Session credentials for the Flock church administration API
//!
//! Provides the credential store (one session, held in exactly one of two
//! persistence scopes), the storage backends behind it, profile derivation,
//! and the `/auth/*` wire calls. This crate knows nothing about request
//! interception or refresh coordination; it can be tested and used on its own.
//!
//! Credential flow:
//! 1. Front end calls `token::login()` with username and password
//! 2. `Session::from_login()` derives the cached `Profile`
//! 3. Session stored via `CredentialStore::save()` in the chosen scope
//! 4. Interceptor reads `CredentialStore::current_access_credential()` per request
//! 5. On expiry the coordinator calls `token::refresh()` with the refresh credential
//! 6. New credentials saved via `CredentialStore::update_credentials()`

pub mod constants;
pub mod credentials;
pub mod error;
pub mod profile;
pub mod storage;
pub mod token;

pub use common::Secret;
pub use constants::*;
pub use credentials::{CredentialStore, Session};
pub use error::{Error, Result};
pub use profile::{Profile, ProfileFields};
pub use storage::{FileStorage, MemoryStorage, PersistenceScope, SessionStorage, StorageKey};
pub use token::{LoginResponse, RefreshResponse, login, logout, refresh};
