//! Request/response values shared by the executor, transports and callers.

use std::collections::hash_map::DefaultHasher;
use std::fmt::Write as _;
use std::hash::{Hash, Hasher};

use bytes::Bytes;
use http::header::{ACCEPT, ACCEPT_LANGUAGE, AUTHORIZATION, HeaderName};
use http::{HeaderMap, Method};
use serde::de::DeserializeOwned;
use url::Url;

use super::error::FetchError;

/// Caller headers that select a different representation of the same URL.
const VARYING_HEADERS: [HeaderName; 3] = [ACCEPT, ACCEPT_LANGUAGE, AUTHORIZATION];

/// One logical fetch as issued by an upstream client.
#[derive(Debug, Clone)]
pub struct FetchRequest {
    pub method: Method,
    pub url: Url,
    pub headers: HeaderMap,
    pub body: Option<Bytes>,
}

impl FetchRequest {
    pub fn new(method: Method, url: Url) -> Self {
        Self {
            method,
            url,
            headers: HeaderMap::new(),
            body: None,
        }
    }

    pub fn get(url: Url) -> Self {
        Self::new(Method::GET, url)
    }

    pub fn with_headers(mut self, headers: HeaderMap) -> Self {
        self.headers = headers;
        self
    }

    pub fn with_body(mut self, body: impl Into<Bytes>) -> Self {
        self.body = Some(body.into());
        self
    }

    /// Only reads are memoised.
    pub fn is_cacheable(&self) -> bool {
        self.method == Method::GET || self.method == Method::HEAD
    }

    /// `METHOD url`, followed by any caller-set `Accept`, `Accept-Language`
    /// or `Authorization`. Credentials enter the key only as a hash.
    pub fn cache_key(&self) -> String {
        let mut key = format!("{} {}", self.method, self.url);
        for name in &VARYING_HEADERS {
            let values: Vec<&[u8]> = self
                .headers
                .get_all(name)
                .iter()
                .map(|value| value.as_bytes())
                .collect();
            if values.is_empty() {
                continue;
            }
            if *name == AUTHORIZATION {
                let mut hasher = DefaultHasher::new();
                values.hash(&mut hasher);
                let _ = write!(key, " {name}=#{:016x}", hasher.finish());
            } else {
                let joined = values
                    .iter()
                    .map(|value| String::from_utf8_lossy(value))
                    .collect::<Vec<_>>()
                    .join(",");
                let _ = write!(key, " {name}={joined}");
            }
        }
        key
    }

    pub fn host(&self) -> &str {
        self.url.host_str().unwrap_or_default()
    }
}

/// Read-only HTTP response returned by the fetch layer.
#[derive(Debug, Clone)]
pub struct FetchResponse {
    status: u16,
    headers: HeaderMap,
    body: Bytes,
    url: Url,
}

impl FetchResponse {
    pub fn new(status: u16, headers: HeaderMap, body: Bytes, url: Url) -> Self {
        Self {
            status,
            headers,
            body,
            url,
        }
    }

    pub fn status(&self) -> u16 {
        self.status
    }

    pub fn url(&self) -> &Url {
        &self.url
    }

    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    /// Raw body bytes (already content-decoded).
    pub fn bytes(&self) -> Bytes {
        self.body.clone()
    }

    /// Body as UTF-8 text.
    pub fn text(&self) -> Result<String, FetchError> {
        String::from_utf8(self.body.to_vec()).map_err(|err| FetchError::Decode(err.to_string()))
    }

    /// Deserialize a JSON body. Failures surface as [`FetchError::Decode`].
    pub fn json<T: DeserializeOwned>(&self) -> Result<T, FetchError> {
        serde_json::from_slice(&self.body).map_err(|err| FetchError::Decode(err.to_string()))
    }
}

/// Outcome of a logical fetch. A 404 is data, not a failure.
#[derive(Debug, Clone)]
pub enum Fetched {
    Found(FetchResponse),
    NotFound { url: Url },
}

impl Fetched {
    pub fn is_found(&self) -> bool {
        matches!(self, Fetched::Found(_))
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, Fetched::NotFound { .. })
    }

    pub fn into_response(self) -> Option<FetchResponse> {
        match self {
            Fetched::Found(response) => Some(response),
            Fetched::NotFound { .. } => None,
        }
    }

    pub fn response(&self) -> Option<&FetchResponse> {
        match self {
            Fetched::Found(response) => Some(response),
            Fetched::NotFound { .. } => None,
        }
    }

    /// Status code as seen on the wire (404 for the not-found case).
    pub fn status(&self) -> u16 {
        match self {
            Fetched::Found(response) => response.status(),
            Fetched::NotFound { .. } => 404,
        }
    }
}
