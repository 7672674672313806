//! Canonical sign payloads.
//!
//! Both sides of a secure call sign a compact JSON object whose fields appear in a
//! fixed order, with absent optional fields omitted and every value a string. The
//! resulting text is the exact byte input to the Ed25519 signature.
//!
//! Request field order: `session, nonce, timestamp, platform, method, path, query,
//! body?, authorization?`. Response field order: `session, nonce, platform,
//! timestamp, method, path, query, body`.
//!
//! # Example
//!
//! ```
//! use niu_core::canonical::{encode_query, Query, RequestSignPayload};
//!
//! let mut query = Query::new();
//! query.insert("page".into(), "2".into());
//! query.insert("a b".into(), "c&d".into());
//! let query = encode_query(&query).unwrap();
//! assert_eq!(query, "a+b=c%26d&page=2");
//!
//! let payload = RequestSignPayload {
//!     session: "s",
//!     nonce: "n",
//!     timestamp: "1700000000",
//!     platform: "8",
//!     method: "GET",
//!     path: "/user",
//!     query: &query,
//!     body: None,
//!     authorization: None,
//! };
//! assert_eq!(
//!     payload.canonical().unwrap(),
//!     r#"{"session":"s","nonce":"n","timestamp":"1700000000","platform":"8","method":"GET","path":"/user","query":"a+b=c%26d&page=2"}"#
//! );
//! ```

use crate::{Error, Result};
use serde::Serialize;
use std::collections::BTreeMap;

/// Query parameters, kept sorted by key.
pub type Query = BTreeMap<String, String>;

/// Render a query map as `application/x-www-form-urlencoded`, sorted by key.
///
/// An empty map renders as the empty string.
pub fn encode_query(query: &Query) -> Result<String> {
    serde_urlencoded::to_string(query).map_err(|e| Error::InvalidQuery(e.to_string()))
}

/// Fields signed by the client for every outbound request.
#[derive(Debug, Clone, Serialize)]
pub struct RequestSignPayload<'a> {
    /// Public secret bundle identifying the session.
    pub session: &'a str,
    /// Per-request nonce.
    pub nonce: &'a str,
    /// Unix time in seconds.
    pub timestamp: &'a str,
    /// Platform id.
    pub platform: &'a str,
    /// Upper-case HTTP method.
    pub method: &'a str,
    /// Request path relative to the API base.
    pub path: &'a str,
    /// Encoded query string.
    pub query: &'a str,
    /// Body text as sent on the wire (ciphertext when encrypted).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub body: Option<&'a str>,
    /// Bearer token, when one is sent.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub authorization: Option<&'a str>,
}

impl RequestSignPayload<'_> {
    /// Canonical text to sign.
    pub fn canonical(&self) -> Result<String> {
        serde_json::to_string(self).map_err(|e| Error::Marshal(e.to_string()))
    }
}

/// Fields the server signs for every response.
#[derive(Debug, Clone, Serialize)]
pub struct ResponseSignPayload<'a> {
    /// Session header value of the originating request.
    pub session: &'a str,
    /// Response nonce header.
    pub nonce: &'a str,
    /// Platform id.
    pub platform: &'a str,
    /// Response timestamp header.
    pub timestamp: &'a str,
    /// Lower-case HTTP method of the originating request.
    pub method: &'a str,
    /// Request path relative to the API base.
    pub path: &'a str,
    /// Encoded query string of the originating request.
    pub query: &'a str,
    /// Raw response body text.
    pub body: &'a str,
}

impl ResponseSignPayload<'_> {
    /// Canonical text to verify.
    pub fn canonical(&self) -> Result<String> {
        serde_json::to_string(self).map_err(|e| Error::Marshal(e.to_string()))
    }
}
