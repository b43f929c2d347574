//! Auth endpoint calls
//!
//! Three interactions with the backend, all JSON over the raw transport (never
//! through the session interceptor, so a failed refresh cannot recurse):
//! 1. Login: username + password for an access/refresh credential pair
//! 2. Refresh: refresh credential for a new access credential (optionally rotated)
//! 3. Logout: best-effort server-side revocation

use serde::Deserialize;
use serde_json::json;
use tracing::debug;
use transport::{ApiRequest, ApiResponse, StatusCode, Transport};

use crate::constants::{LOGIN_PATH, LOGOUT_PATH, REFRESH_PATH};
use crate::error::{Error, Result};
use crate::profile::ProfileFields;
use common::Secret;

/// Body of a successful login.
///
/// Identity fields are optional; whatever is missing is read from the access
/// token's claims when the profile is resolved.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LoginResponse {
    #[serde(alias = "access_token")]
    pub access_token: Secret,
    #[serde(default, alias = "refresh_token")]
    pub refresh_token: Option<Secret>,
    #[serde(flatten)]
    pub profile: ProfileFields,
}

/// Body of a successful refresh. `refresh_token` is present only when the
/// backend rotates refresh credentials.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RefreshResponse {
    #[serde(alias = "access_token")]
    pub access_token: Secret,
    #[serde(default, alias = "refresh_token")]
    pub refresh_token: Option<Secret>,
}

/// Exchange a username and password for a session.
pub async fn login(
    transport: &dyn Transport,
    username: &str,
    password: &Secret,
) -> Result<LoginResponse> {
    let request = ApiRequest::post(LOGIN_PATH).json(&json!({
        "username": username,
        "password": password.expose(),
    }))?;
    let response = transport
        .send(request)
        .await
        .map_err(|e| Error::Http(format!("login request failed: {e}")))?;

    let status = response.status();
    if !status.is_success() {
        let body = response.text();
        if matches!(
            status,
            StatusCode::BAD_REQUEST | StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN
        ) {
            return Err(Error::InvalidCredentials(format!(
                "login rejected ({status}): {body}"
            )));
        }
        return Err(Error::TokenExchange(format!(
            "login returned {status}: {body}"
        )));
    }

    let login: LoginResponse = parse(&response, "login")?;
    if login.access_token.is_empty() {
        return Err(Error::TokenExchange("login response has empty accessToken".into()));
    }
    debug!(
        rotates = login.refresh_token.is_some(),
        "login succeeded"
    );
    Ok(login)
}

/// Obtain a new access credential using the refresh credential.
///
/// 401/403 mean the refresh credential itself is no longer valid; the session
/// cannot be recovered and the caller should terminate it.
pub async fn refresh(transport: &dyn Transport, refresh_credential: &Secret) -> Result<RefreshResponse> {
    let request = ApiRequest::post(REFRESH_PATH).json(&json!({
        "refreshToken": refresh_credential.expose(),
    }))?;
    let response = transport
        .send(request)
        .await
        .map_err(|e| Error::Http(format!("refresh request failed: {e}")))?;

    let status = response.status();
    if !status.is_success() {
        let body = response.text();

        // 401/403 means the refresh credential is revoked or expired
        if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
            return Err(Error::InvalidCredentials(format!(
                "refresh credential rejected ({status}): {body}"
            )));
        }

        return Err(Error::TokenExchange(format!(
            "refresh returned {status}: {body}"
        )));
    }

    let refreshed: RefreshResponse = parse(&response, "refresh")?;
    if refreshed.access_token.is_empty() {
        return Err(Error::TokenExchange("refresh response has empty accessToken".into()));
    }
    Ok(refreshed)
}

/// Tell the backend the session is over. Any non-success status is an error
/// the caller is free to ignore.
pub async fn logout(transport: &dyn Transport, access_credential: &Secret) -> Result<()> {
    let mut request = ApiRequest::post(LOGOUT_PATH);
    request.set_bearer(access_credential)?;
    let response = transport
        .send(request)
        .await
        .map_err(|e| Error::Http(format!("logout request failed: {e}")))?;

    if !response.is_success() {
        return Err(Error::TokenExchange(format!(
            "logout returned {}",
            response.status()
        )));
    }
    Ok(())
}

fn parse<T: serde::de::DeserializeOwned>(response: &ApiResponse, what: &str) -> Result<T> {
    response
        .json::<T>()
        .map_err(|e| Error::TokenExchange(format!("invalid {what} response: {e}")))
}
