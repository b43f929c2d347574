//! Request and response values carried through the session layer

use bytes::Bytes;
use common::Secret;
use reqwest::header::{AUTHORIZATION, CONTENT_TYPE, HeaderMap, HeaderName, HeaderValue};
use reqwest::{Method, StatusCode};
use serde::Serialize;
use serde::de::DeserializeOwned;

use crate::{Error, Result};

/// An outbound API call, relative to the transport's base URL.
///
/// Cloning is cheap (the body is reference-counted `Bytes`), which is what
/// lets the session layer hold an unsent copy for replay after a credential
/// refresh.
#[derive(Debug, Clone)]
pub struct ApiRequest {
    id: String,
    method: Method,
    path: String,
    headers: HeaderMap,
    body: Option<Bytes>,
    retried: bool,
}

impl ApiRequest {
    /// `path` may include a query string. A missing leading slash is added.
    pub fn new(method: Method, path: impl Into<String>) -> Self {
        let path = path.into();
        let path = if path.starts_with('/') {
            path
        } else {
            format!("/{path}")
        };
        Self {
            id: format!("req_{}", uuid::Uuid::new_v4().simple()),
            method,
            path,
            headers: HeaderMap::new(),
            body: None,
            retried: false,
        }
    }

    pub fn get(path: impl Into<String>) -> Self {
        Self::new(Method::GET, path)
    }

    pub fn post(path: impl Into<String>) -> Self {
        Self::new(Method::POST, path)
    }

    /// Serialize `body` as the JSON payload and set `content-type`.
    pub fn json<T: Serialize + ?Sized>(mut self, body: &T) -> Result<Self> {
        let bytes = serde_json::to_vec(body)
            .map_err(|e| Error::InvalidRequest(format!("serializing request body: {e}")))?;
        self.headers
            .insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        self.body = Some(Bytes::from(bytes));
        Ok(self)
    }

    pub fn header(mut self, name: HeaderName, value: HeaderValue) -> Self {
        self.headers.insert(name, value);
        self
    }

    /// Correlation id for logs (`req_<uuid>`). Preserved across replay.
    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn method(&self) -> &Method {
        &self.method
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    pub fn body(&self) -> Option<&Bytes> {
        self.body.as_ref()
    }

    /// Whether this request already went through one credential refresh.
    pub fn is_retry(&self) -> bool {
        self.retried
    }

    pub fn mark_retry(&mut self) {
        self.retried = true;
    }

    /// Attach `credential` as `Authorization: Bearer ...`, replacing any
    /// existing value. The header is flagged sensitive so it is skipped by
    /// header debug output.
    pub fn set_bearer(&mut self, credential: &Secret) -> Result<()> {
        let mut value = HeaderValue::from_str(&format!("Bearer {}", credential.expose()))
            .map_err(|e| Error::InvalidRequest(format!("invalid credential value: {e}")))?;
        value.set_sensitive(true);
        self.headers.insert(AUTHORIZATION, value);
        Ok(())
    }

    /// Bearer token currently attached, if any.
    pub fn bearer(&self) -> Option<&str> {
        self.headers
            .get(AUTHORIZATION)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.strip_prefix("Bearer "))
    }
}

/// A completed HTTP exchange, whatever its status.
#[derive(Debug, Clone)]
pub struct ApiResponse {
    status: StatusCode,
    headers: HeaderMap,
    body: Bytes,
}

impl ApiResponse {
    pub fn new(status: StatusCode, headers: HeaderMap, body: Bytes) -> Self {
        Self {
            status,
            headers,
            body,
        }
    }

    /// Build a JSON response in memory (used by test transports).
    pub fn from_json(status: StatusCode, value: &serde_json::Value) -> Self {
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        Self::new(status, headers, Bytes::from(value.to_string()))
    }

    pub fn status(&self) -> StatusCode {
        self.status
    }

    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    pub fn body(&self) -> &Bytes {
        &self.body
    }

    pub fn is_success(&self) -> bool {
        self.status.is_success()
    }

    pub fn json<T: DeserializeOwned>(&self) -> Result<T> {
        serde_json::from_slice(&self.body)
            .map_err(|e| Error::Decode(format!("{} from {}: {e}", self.status, self.content_type())))
    }

    /// Body as UTF-8 text, lossily decoded.
    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }

    fn content_type(&self) -> &str {
        self.headers
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or("<no content-type>")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn path_gets_leading_slash() {
        assert_eq!(ApiRequest::get("members").path(), "/members");
        assert_eq!(ApiRequest::get("/cells?page=2").path(), "/cells?page=2");
    }

    #[test]
    fn request_ids_are_unique_and_prefixed() {
        let a = ApiRequest::get("/members");
        let b = ApiRequest::get("/members");
        assert!(a.id().starts_with("req_"), "id: {}", a.id());
        assert_ne!(a.id(), b.id());
    }

    #[test]
    fn json_body_sets_content_type() {
        let req = ApiRequest::post("/prayers")
            .json(&serde_json::json!({"title": "Healing for Ana"}))
            .unwrap();
        assert_eq!(req.headers()[CONTENT_TYPE], "application/json");
        let body: serde_json::Value = serde_json::from_slice(req.body().unwrap()).unwrap();
        assert_eq!(body["title"], "Healing for Ana");
    }

    #[test]
    fn set_bearer_replaces_and_marks_sensitive() {
        let mut req = ApiRequest::get("/notices");
        req.set_bearer(&Secret::new("at_old")).unwrap();
        req.set_bearer(&Secret::new("at_new")).unwrap();
        assert_eq!(req.bearer(), Some("at_new"));
        assert_eq!(req.headers().get_all(AUTHORIZATION).iter().count(), 1);
        assert!(req.headers()[AUTHORIZATION].is_sensitive());
    }

    #[test]
    fn set_bearer_rejects_header_breaking_values() {
        let mut req = ApiRequest::get("/notices");
        let result = req.set_bearer(&Secret::new("bad\ntoken"));
        assert!(matches!(result, Err(Error::InvalidRequest(_))));
        assert!(req.bearer().is_none());
    }

    #[test]
    fn clone_keeps_id_and_retry_flag() {
        let mut req = ApiRequest::post("/members/7/archive");
        req.mark_retry();
        let copy = req.clone();
        assert_eq!(copy.id(), req.id());
        assert!(copy.is_retry());
        assert!(!ApiRequest::get("/members").is_retry());
    }

    #[test]
    fn response_json_and_text() {
        let resp = ApiResponse::from_json(StatusCode::OK, &serde_json::json!({"total": 3}));
        assert!(resp.is_success());
        let value: serde_json::Value = resp.json().unwrap();
        assert_eq!(value["total"], 3);
        assert_eq!(resp.text(), r#"{"total":3}"#);
    }

    #[test]
    fn response_decode_error_mentions_status() {
        let resp = ApiResponse::new(
            StatusCode::BAD_GATEWAY,
            HeaderMap::new(),
            Bytes::from_static(b"<html>"),
        );
        let err = resp.json::<serde_json::Value>().unwrap_err();
        assert!(err.to_string().contains("502"), "got: {err}");
    }
}
