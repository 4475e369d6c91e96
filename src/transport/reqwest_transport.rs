//! Reqwest-backed [`Transport`] for upstreams that do not fingerprint TLS.
//!
//! The chosen profile's headers are still sent; only the ClientHello is
//! reqwest's own.

use std::io;

use async_trait::async_trait;
use reqwest::{Client, redirect::Policy};

use super::{Transport, TransportError, TransportRequest, TransportResponse, error_chain};

#[derive(Debug, Clone)]
pub struct ReqwestTransport {
    client: Client,
}

impl ReqwestTransport {
    /// Redirects are not followed, matching the impersonating transport, so
    /// the executor sees 3xx responses as-is.
    pub fn new() -> Result<Self, TransportError> {
        let client = Client::builder()
            .redirect(Policy::none())
            .pool_max_idle_per_host(0)
            .build()
            .map_err(|err| TransportError::Tls(error_chain(&err)))?;

        Ok(Self { client })
    }

    /// Wrap an existing client. It should already have redirects disabled.
    pub fn from_client(client: Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl Transport for ReqwestTransport {
    async fn send(&self, request: TransportRequest) -> Result<TransportResponse, TransportError> {
        let host = request.url.host_str().unwrap_or_default().to_string();
        let port = request.url.port_or_known_default().unwrap_or(443);

        let mut builder = self
            .client
            .request(request.method, request.url)
            .headers(request.headers);
        if let Some(body) = request.body {
            builder = builder.body(body);
        }

        let response = builder
            .send()
            .await
            .map_err(|err| map_error(err, host, port))?;

        let status = response.status().as_u16();
        let headers = response.headers().clone();
        let body = response
            .bytes()
            .await
            .map_err(|err| TransportError::Body(error_chain(&err)))?;

        Ok(TransportResponse {
            status,
            headers,
            body,
        })
    }

    fn name(&self) -> &'static str {
        "reqwest"
    }
}

/// reqwest folds TLS failures into connect errors, so both surface as dial.
fn map_error(err: reqwest::Error, host: String, port: u16) -> TransportError {
    if err.is_builder() {
        TransportError::InvalidRequest(error_chain(&err))
    } else if err.is_connect() {
        TransportError::Dial {
            host,
            port,
            source: io::Error::other(err),
        }
    } else if err.is_body() || err.is_decode() {
        TransportError::Body(error_chain(&err))
    } else {
        TransportError::Connection(error_chain(&err))
    }
}
