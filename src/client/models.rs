//! Wire types for the admin backend

use reqwest::Method;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use serde::{Deserialize, Serialize};

/// Access token plus (optionally rotated) refresh token
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenPair {
    pub access_token: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub refresh_token: Option<String>,
}

/// Token endpoint payload before validation; `access_token` may be missing
/// in a malformed response
#[derive(Debug, Clone, Default, Deserialize)]
pub(crate) struct TokenResponse {
    #[serde(default)]
    pub access_token: Option<String>,

    #[serde(default)]
    pub refresh_token: Option<String>,
}

impl TokenResponse {
    /// Validate into a pair; `None` when no usable access token was returned
    pub(crate) fn into_pair(self) -> Option<TokenPair> {
        match self.access_token {
            Some(access_token) if !access_token.is_empty() => Some(TokenPair {
                access_token,
                refresh_token: self.refresh_token.filter(|t| !t.is_empty()),
            }),
            _ => None,
        }
    }
}

/// `GET /api/auth/discord/login` payload
#[derive(Debug, Clone, Deserialize)]
pub(crate) struct AuthorizationUrl {
    pub authorization_url: String,
}

/// Auth endpoints answer either bare or inside the resource envelope
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub(crate) enum MaybeEnveloped<T> {
    Wrapped { data: T },
    Bare(T),
}

impl<T> MaybeEnveloped<T> {
    pub(crate) fn into_inner(self) -> T {
        match self {
            MaybeEnveloped::Wrapped { data } => data,
            MaybeEnveloped::Bare(inner) => inner,
        }
    }
}

/// Response envelope used by every resource endpoint
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Envelope<T> {
    pub status: String,

    pub data: T,

    #[serde(default)]
    pub message: Option<String>,

    #[serde(default)]
    pub timestamp: String,

    /// Present on list endpoints only
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pagination: Option<Pagination>,
}

/// Pagination block of list responses
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Pagination {
    pub page: u64,
    pub page_size: u64,
    pub total_items: u64,
    pub total_pages: u64,
}

impl Pagination {
    pub fn has_more_pages(&self) -> bool {
        self.page < self.total_pages
    }
}

/// Per-call request options, merged over the gateway's default headers.
///
/// # Example
/// ```ignore
/// let opts = RequestOptions::new()
///     .method(Method::POST)
///     .json(serde_json::json!({"name": "Starter pool"}));
/// ```
#[derive(Debug, Clone)]
pub struct RequestOptions {
    pub method: Method,
    pub headers: HeaderMap,
    pub query: Vec<(String, String)>,
    pub body: Option<serde_json::Value>,
}

impl Default for RequestOptions {
    fn default() -> Self {
        Self {
            method: Method::GET,
            headers: HeaderMap::new(),
            query: Vec::new(),
            body: None,
        }
    }
}

impl RequestOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn method(mut self, method: Method) -> Self {
        self.method = method;
        self
    }

    /// Set a header, replacing the default of the same name
    pub fn header(mut self, name: HeaderName, value: HeaderValue) -> Self {
        self.headers.insert(name, value);
        self
    }

    pub fn query(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.query.push((key.into(), value.into()));
        self
    }

    pub fn json(mut self, body: serde_json::Value) -> Self {
        self.body = Some(body);
        self
    }
}
