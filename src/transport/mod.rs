//! Transports: the seam between the retry executor and the network.
//!
//! A [`Transport`] performs exactly one physical HTTP exchange. It never
//! retries and never classifies status codes; that is the executor's job.

pub mod decode;
pub mod impersonate;
pub mod reqwest_transport;

use std::io;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use http::{HeaderMap, Method};
use thiserror::Error;
use url::Url;

use crate::core::{ErrorKind, FetchRequest};
use crate::fingerprint::BrowserProfile;

pub use impersonate::{
    ImpersonatedConnection, ImpersonatingConnector, ImpersonatingTransport, TlsShape,
    tls_connector_for,
};
pub use reqwest_transport::ReqwestTransport;

/// Failure of a single physical exchange.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("dial {host}:{port} failed: {source}")]
    Dial {
        host: String,
        port: u16,
        #[source]
        source: io::Error,
    },
    #[error("TLS handshake with {host} failed: {source}")]
    Handshake {
        host: String,
        #[source]
        source: io::Error,
    },
    #[error("attempt timed out after {0:?}")]
    Timeout(Duration),
    #[error("connection error: {0}")]
    Connection(String),
    /// The body stream broke off mid-read.
    #[error("response body error: {0}")]
    Body(String),
    /// The body arrived whole but its content coding could not be undone.
    #[error("response decoding failed: {0}")]
    Decode(String),
    #[error("invalid request: {0}")]
    InvalidRequest(String),
    #[error("TLS configuration error: {0}")]
    Tls(String),
}

impl TransportError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            TransportError::Dial { .. } => ErrorKind::Dial,
            TransportError::Handshake { .. } => ErrorKind::Handshake,
            TransportError::Timeout(_) => ErrorKind::Timeout,
            TransportError::Connection(_) | TransportError::Body(_) => ErrorKind::Network,
            TransportError::Decode(_) => ErrorKind::Decode,
            TransportError::InvalidRequest(_) => ErrorKind::InvalidRequest,
            TransportError::Tls(_) => ErrorKind::Config,
        }
    }

    /// Network-level failures worth another attempt.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            TransportError::Dial { .. }
                | TransportError::Handshake { .. }
                | TransportError::Timeout(_)
                | TransportError::Connection(_)
                | TransportError::Body(_)
        )
    }
}

/// One physical request, with the browser identity already applied.
#[derive(Debug, Clone)]
pub struct TransportRequest {
    pub method: Method,
    pub url: Url,
    pub headers: HeaderMap,
    pub body: Option<Bytes>,
    pub profile: Arc<BrowserProfile>,
}

impl TransportRequest {
    /// Profile headers first, in browser order; caller headers override them
    /// in place.
    pub fn from_fetch(request: &FetchRequest, profile: Arc<BrowserProfile>) -> Self {
        Self {
            method: request.method.clone(),
            url: request.url.clone(),
            headers: merge_headers(profile.headers(), &request.headers),
            body: request.body.clone(),
            profile,
        }
    }
}

#[derive(Debug, Clone)]
pub struct TransportResponse {
    pub status: u16,
    pub headers: HeaderMap,
    pub body: Bytes,
}

#[async_trait]
pub trait Transport: Send + Sync {
    async fn send(&self, request: TransportRequest) -> Result<TransportResponse, TransportError>;

    /// Short label used in logs.
    fn name(&self) -> &'static str {
        "custom"
    }
}

#[async_trait]
impl<T: Transport + ?Sized> Transport for Arc<T> {
    async fn send(&self, request: TransportRequest) -> Result<TransportResponse, TransportError> {
        (**self).send(request).await
    }

    fn name(&self) -> &'static str {
        (**self).name()
    }
}

pub fn merge_headers(base: &HeaderMap, overrides: &HeaderMap) -> HeaderMap {
    let mut merged = base.clone();
    for name in overrides.keys() {
        let mut values = overrides.get_all(name).iter();
        if let Some(first) = values.next() {
            merged.insert(name.clone(), first.clone());
        }
        for value in values {
            merged.append(name.clone(), value.clone());
        }
    }
    merged
}

/// Render an error and its `source()` chain on one line.
pub(crate) fn error_chain(err: &(dyn std::error::Error + 'static)) -> String {
    let mut rendered = err.to_string();
    let mut current = err.source();
    while let Some(cause) = current {
        rendered.push_str(": ");
        rendered.push_str(&cause.to_string());
        current = cause.source();
    }
    rendered
}
