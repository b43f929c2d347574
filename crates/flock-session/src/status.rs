//! Authentication state published to the front end

use flock_auth::Profile;

/// What the UI should show. `Unauthenticated` means "go to the sign-in entry
/// point"; it is published whenever a session ends.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthState {
    Authenticated(Profile),
    Unauthenticated,
}

impl AuthState {
    pub fn profile(&self) -> Option<&Profile> {
        match self {
            AuthState::Authenticated(profile) => Some(profile),
            AuthState::Unauthenticated => None,
        }
    }

    pub fn is_authenticated(&self) -> bool {
        matches!(self, AuthState::Authenticated(_))
    }
}

impl From<Option<Profile>> for AuthState {
    fn from(profile: Option<Profile>) -> Self {
        profile.map_or(AuthState::Unauthenticated, AuthState::Authenticated)
    }
}
