//! Outbound credential attachment

use common::Secret;
use flock_auth::CredentialStore;
use transport::ApiRequest;

use crate::error::Result;

/// Attach the current access credential as a bearer header, returning the
/// request together with the credential it carries.
///
/// Reads the store only; never performs I/O and never refreshes. Without a
/// session the request goes out as the caller built it.
pub fn attach_credential(
    store: &CredentialStore,
    mut request: ApiRequest,
) -> Result<(ApiRequest, Option<Secret>)> {
    let credential = store.current_access_credential();
    if let Some(credential) = &credential {
        request.set_bearer(credential)?;
    }
    Ok((request, credential))
}
