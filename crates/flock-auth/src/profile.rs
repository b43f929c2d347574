//! Identity snapshot cached alongside the credentials
//!
//! The profile is resolved once at login so the front end can render who is
//! signed in without a round trip. Fields come from the login response body
//! first; anything it leaves out is read from the access token's JWT payload.

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use serde::{Deserialize, Deserializer, Serialize};

use crate::error::{Error, Result};

/// Minimal identity of the signed-in user.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Profile {
    /// Stable user identifier (`sub` claim / `userId`)
    pub subject: String,
    pub display_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role: Option<String>,
    /// Cell (small group) the user belongs to, if any
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub group: Option<String>,
}

/// Optional identity fields as they appear on the wire.
///
/// Used for both the login response body and the decoded JWT payload, so the
/// aliases cover both naming conventions (`userId` / `sub`, `cellId` / `cell_id`).
/// Numeric identifiers are accepted and kept as strings.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProfileFields {
    #[serde(default, alias = "user_id", alias = "sub", deserialize_with = "id_string")]
    pub user_id: Option<String>,
    #[serde(default, alias = "display_name")]
    pub name: Option<String>,
    #[serde(default)]
    pub role: Option<String>,
    #[serde(default, alias = "cell_id", deserialize_with = "id_string")]
    pub cell_id: Option<String>,
}

impl ProfileFields {
    /// Fill every missing field from `fallback`.
    fn or(self, fallback: ProfileFields) -> ProfileFields {
        ProfileFields {
            user_id: self.user_id.or(fallback.user_id),
            name: self.name.or(fallback.name),
            role: self.role.or(fallback.role),
            cell_id: self.cell_id.or(fallback.cell_id),
        }
    }
}

impl Profile {
    /// Resolve a profile from login response fields, falling back to the
    /// access token's claims.
    ///
    /// A subject is required; the display name defaults to the subject. An
    /// undecodable token is not an error when the response already carries a
    /// subject.
    pub fn resolve(fields: ProfileFields, access_token: &str) -> Result<Profile> {
        let merged = match decode_claims(access_token) {
            Ok(claims) => fields.or(claims),
            Err(e) if fields.user_id.is_some() => {
                tracing::debug!(error = %e, "access token claims unavailable, using response fields");
                fields
            }
            Err(e) => return Err(e),
        };

        let subject = merged
            .user_id
            .filter(|s| !s.is_empty())
            .ok_or_else(|| Error::CredentialParse("no subject in login response or token".into()))?;
        let display_name = merged.name.unwrap_or_else(|| subject.clone());

        Ok(Profile {
            subject,
            display_name,
            role: merged.role,
            group: merged.cell_id,
        })
    }
}

/// Decode the payload segment of a JWT without verifying it.
///
/// The signature is the backend's concern; the client only reads identity
/// hints for display.
pub fn decode_claims(token: &str) -> Result<ProfileFields> {
    let payload = token
        .split('.')
        .nth(1)
        .ok_or_else(|| Error::CredentialParse("access token is not a JWT".into()))?;
    let bytes = URL_SAFE_NO_PAD
        .decode(payload.trim_end_matches('='))
        .map_err(|e| Error::CredentialParse(format!("decoding token payload: {e}")))?;
    serde_json::from_slice(&bytes)
        .map_err(|e| Error::CredentialParse(format!("parsing token claims: {e}")))
}

fn id_string<'de, D>(deserializer: D) -> std::result::Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<serde_json::Value>::deserialize(deserializer)?;
    Ok(match value {
        Some(serde_json::Value::String(s)) => Some(s),
        Some(serde_json::Value::Number(n)) => Some(n.to_string()),
        _ => None,
    })
}
