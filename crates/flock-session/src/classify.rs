//! Failure classification for API responses
//!
//! Decides whether a response means "the access credential has expired" and,
//! if so, whether the request is still eligible for one refresh-and-replay.
//! Only 401 counts as expiry; 403 is a permission failure and passes through
//! like any other status.

use transport::{ApiRequest, StatusCode};

/// Outcome of inspecting a response to an intercepted request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Classification {
    /// Anything other than an expired credential; returned unchanged.
    NotExpired,
    /// Expired on the first attempt; eligible for refresh and replay.
    ExpiredFirstAttempt,
    /// Expired on a replay; surfaced as a terminal failure.
    ExpiredRetried,
}

/// Classify the response to `request`.
pub fn classify(request: &ApiRequest, status: StatusCode) -> Classification {
    if status != StatusCode::UNAUTHORIZED {
        return Classification::NotExpired;
    }
    if request.is_retry() {
        Classification::ExpiredRetried
    } else {
        Classification::ExpiredFirstAttempt
    }
}
