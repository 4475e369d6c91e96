//! Browser-shaped TLS transport.
//!
//! [`ImpersonatingConnector`] is the connection factory plugged into hyper's
//! pooled client. It dials TCP, runs a BoringSSL handshake configured from
//! the profile's [`ClientHelloSpec`] and hands hyper an HTTP/1.1 stream.
//! Pooling is disabled, so every request gets a fresh connection and no
//! handshake state is shared between calls.
//!
//! BoringSSL fixes a few parts of the hello that no browser spec can move:
//! TLS 1.3 suites are always offered in its own order, extension order is its
//! own unless permutation is on, and groups or ciphers it does not implement
//! are left out (see [`TlsShape::unsupported`]).

use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::io;
use std::pin::Pin;
use std::task::{Context, Poll};

use async_trait::async_trait;
use boring::ssl::{
    SslConnector, SslConnectorBuilder, SslCurve, SslMethod, SslOptions, SslVersion,
};
use bytes::Bytes;
use http::header::{CONTENT_ENCODING, CONTENT_LENGTH, HOST};
use http::{HeaderMap, HeaderValue, Uri};
use http_body_util::{BodyExt, Full};
use hyper::rt::ReadBufCursor;
use hyper_util::client::legacy::Client;
use hyper_util::client::legacy::connect::{Connected, Connection};
use hyper_util::rt::{TokioExecutor, TokioIo};
use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};
use tokio::net::TcpStream;
use tokio_boring::SslStream;
use tower_service::Service;
use url::Url;

use super::decode::decode_body;
use super::{Transport, TransportError, TransportRequest, TransportResponse, error_chain};
use crate::fingerprint::client_hello::{TLS12, TLS13};
use crate::fingerprint::{ClientHelloSpec, FingerprintId, client_hello_spec};

const HTTP11_ALPN: &str = "http/1.1";

const EXT_STATUS_REQUEST: u16 = 5;
const EXT_SIGNED_CERT_TIMESTAMP: u16 = 18;
const EXT_SESSION_TICKET: u16 = 35;

/// OpenSSL-style name BoringSSL accepts for a TLS 1.2 suite.
fn cipher_name(id: u16) -> Option<&'static str> {
    Some(match id {
        0xc02b => "ECDHE-ECDSA-AES128-GCM-SHA256",
        0xc02f => "ECDHE-RSA-AES128-GCM-SHA256",
        0xc02c => "ECDHE-ECDSA-AES256-GCM-SHA384",
        0xc030 => "ECDHE-RSA-AES256-GCM-SHA384",
        0xcca9 => "ECDHE-ECDSA-CHACHA20-POLY1305",
        0xcca8 => "ECDHE-RSA-CHACHA20-POLY1305",
        0xc009 => "ECDHE-ECDSA-AES128-SHA",
        0xc00a => "ECDHE-ECDSA-AES256-SHA",
        0xc013 => "ECDHE-RSA-AES128-SHA",
        0xc014 => "ECDHE-RSA-AES256-SHA",
        0x009c => "AES128-GCM-SHA256",
        0x009d => "AES256-GCM-SHA384",
        0x002f => "AES128-SHA",
        0x0035 => "AES256-SHA",
        0x000a => "DES-CBC3-SHA",
        _ => return None,
    })
}

fn sigalg_name(id: u16) -> Option<&'static str> {
    Some(match id {
        0x0201 => "rsa_pkcs1_sha1",
        0x0203 => "ecdsa_sha1",
        0x0401 => "rsa_pkcs1_sha256",
        0x0403 => "ecdsa_secp256r1_sha256",
        0x0501 => "rsa_pkcs1_sha384",
        0x0503 => "ecdsa_secp384r1_sha384",
        0x0601 => "rsa_pkcs1_sha512",
        0x0603 => "ecdsa_secp521r1_sha512",
        0x0804 => "rsa_pss_rsae_sha256",
        0x0805 => "rsa_pss_rsae_sha384",
        0x0806 => "rsa_pss_rsae_sha512",
        0x0807 => "ed25519",
        _ => return None,
    })
}

fn curve(id: u16) -> Option<SslCurve> {
    match id {
        23 => Some(SslCurve::SECP256R1),
        24 => Some(SslCurve::SECP384R1),
        25 => Some(SslCurve::SECP521R1),
        29 => Some(SslCurve::X25519),
        _ => None,
    }
}

fn ssl_version(id: u16) -> Option<SslVersion> {
    match id {
        TLS13 => Some(SslVersion::TLS1_3),
        TLS12 => Some(SslVersion::TLS1_2),
        _ => None,
    }
}

fn is_tls13_suite(id: u16) -> bool {
    (0x1301..=0x1305).contains(&id)
}

/// What a [`ClientHelloSpec`] becomes once mapped onto BoringSSL settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TlsShape {
    /// TLS 1.2 suites, colon-separated, in browser order.
    pub cipher_list: String,
    pub groups: Vec<u16>,
    pub sigalgs_list: String,
    /// ALPN in wire format.
    pub alpn: Vec<u8>,
    pub min_version: u16,
    pub max_version: u16,
    pub grease: bool,
    pub permute_extensions: bool,
    pub ocsp_stapling: bool,
    pub signed_cert_timestamps: bool,
    pub session_tickets: bool,
    /// Code points from the spec BoringSSL cannot emit.
    pub unsupported: Vec<u16>,
}

impl TlsShape {
    pub fn for_spec(spec: &ClientHelloSpec) -> Result<Self, TransportError> {
        let mut unsupported = Vec::new();

        let ciphers: Vec<&str> = spec
            .cipher_suites
            .iter()
            .filter(|id| !is_tls13_suite(**id))
            .filter_map(|id| {
                let name = cipher_name(*id);
                if name.is_none() {
                    unsupported.push(*id);
                }
                name
            })
            .collect();

        let groups: Vec<u16> = spec
            .supported_groups
            .iter()
            .copied()
            .filter(|id| {
                let known = curve(*id).is_some();
                if !known {
                    unsupported.push(*id);
                }
                known
            })
            .collect();

        let sigalgs: Vec<&str> = spec
            .signature_algorithms
            .iter()
            .filter_map(|id| {
                let name = sigalg_name(*id);
                if name.is_none() {
                    unsupported.push(*id);
                }
                name
            })
            .collect();

        let versions: Vec<u16> = spec
            .versions
            .iter()
            .copied()
            .filter(|version| ssl_version(*version).is_some())
            .collect();
        let (Some(min_version), Some(max_version)) =
            (versions.iter().min().copied(), versions.iter().max().copied())
        else {
            return Err(TransportError::Tls(
                "ClientHello offers no supported protocol version".into(),
            ));
        };
        if ciphers.is_empty() && min_version < TLS13 {
            return Err(TransportError::Tls("ClientHello offers no TLS 1.2 suite".into()));
        }
        if groups.is_empty() {
            return Err(TransportError::Tls("ClientHello offers no supported group".into()));
        }

        // Only HTTP/1.1 is spoken on these connections.
        let alpn = if spec.offers_alpn() {
            let mut wire = vec![HTTP11_ALPN.len() as u8];
            wire.extend_from_slice(HTTP11_ALPN.as_bytes());
            wire
        } else {
            Vec::new()
        };

        Ok(Self {
            cipher_list: ciphers.join(":"),
            groups,
            sigalgs_list: sigalgs.join(":"),
            alpn,
            min_version,
            max_version,
            grease: spec.grease,
            permute_extensions: spec.permute_extensions,
            ocsp_stapling: spec.offers_extension(EXT_STATUS_REQUEST),
            signed_cert_timestamps: spec.offers_extension(EXT_SIGNED_CERT_TIMESTAMP),
            session_tickets: spec.offers_extension(EXT_SESSION_TICKET),
            unsupported,
        })
    }

    /// Apply the shape to a fresh connector builder. Trust comes from the
    /// system store; add private roots on the returned builder.
    pub fn connector_builder(&self) -> Result<SslConnectorBuilder, TransportError> {
        let tls = |err: boring::error::ErrorStack| TransportError::Tls(err.to_string());

        let mut builder = SslConnector::builder(SslMethod::tls()).map_err(tls)?;
        builder
            .set_min_proto_version(ssl_version(self.min_version))
            .map_err(tls)?;
        builder
            .set_max_proto_version(ssl_version(self.max_version))
            .map_err(tls)?;
        if !self.cipher_list.is_empty() {
            builder.set_cipher_list(&self.cipher_list).map_err(tls)?;
        }
        let curves: Vec<SslCurve> = self.groups.iter().filter_map(|id| curve(*id)).collect();
        builder.set_curves(&curves).map_err(tls)?;
        if !self.sigalgs_list.is_empty() {
            builder.set_sigalgs_list(&self.sigalgs_list).map_err(tls)?;
        }
        if !self.alpn.is_empty() {
            builder.set_alpn_protos(&self.alpn).map_err(tls)?;
        }
        builder.set_grease_enabled(self.grease);
        builder.set_permute_extensions(self.permute_extensions);
        if self.ocsp_stapling {
            builder.enable_ocsp_stapling();
        }
        if self.signed_cert_timestamps {
            builder.enable_signed_cert_timestamps();
        }
        if !self.session_tickets {
            builder.set_options(SslOptions::NO_TICKET);
        }
        Ok(builder)
    }
}

/// BoringSSL connector shaped like `spec`.
pub fn tls_connector_for(spec: &ClientHelloSpec) -> Result<SslConnector, TransportError> {
    let shape = TlsShape::for_spec(spec)?;
    if !shape.unsupported.is_empty() {
        log::debug!("ClientHello code points left out: {:04x?}", shape.unsupported);
    }
    Ok(shape.connector_builder()?.build())
}

/// Connection factory for one fingerprint.
#[derive(Clone)]
pub struct ImpersonatingConnector {
    fingerprint: FingerprintId,
    tls: SslConnector,
}

impl fmt::Debug for ImpersonatingConnector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ImpersonatingConnector")
            .field("fingerprint", &self.fingerprint)
            .finish()
    }
}

impl ImpersonatingConnector {
    pub fn for_fingerprint(fingerprint: FingerprintId) -> Result<Self, TransportError> {
        let tls = tls_connector_for(client_hello_spec(fingerprint))?;
        Ok(Self::with_tls(fingerprint, tls))
    }

    /// Use a prepared connector, e.g. one built from
    /// [`TlsShape::connector_builder`] with a private root added.
    pub fn with_tls(fingerprint: FingerprintId, tls: SslConnector) -> Self {
        Self { fingerprint, tls }
    }

    pub fn fingerprint(&self) -> FingerprintId {
        self.fingerprint
    }

    async fn connect(self, uri: Uri) -> Result<ImpersonatedConnection, TransportError> {
        let secure = match uri.scheme_str() {
            Some("https") => true,
            Some("http") => false,
            other => {
                return Err(TransportError::InvalidRequest(format!(
                    "unsupported scheme {other:?}"
                )));
            }
        };
        let host = uri
            .host()
            .ok_or_else(|| TransportError::InvalidRequest(format!("no host in '{uri}'")))?
            .trim_start_matches('[')
            .trim_end_matches(']')
            .to_string();
        let port = uri.port_u16().unwrap_or(if secure { 443 } else { 80 });

        let tcp = TcpStream::connect((host.as_str(), port))
            .await
            .map_err(|source| TransportError::Dial {
                host: host.clone(),
                port,
                source,
            })?;
        let _ = tcp.set_nodelay(true);

        if !secure {
            return Ok(ImpersonatedConnection::new(ImpersonatedStream::Plain(tcp)));
        }

        // SNI is left out for IP literals, as browsers do.
        let config = self
            .tls
            .configure()
            .map_err(|err| TransportError::Tls(err.to_string()))?;

        log::debug!("TLS handshake with {host}:{port} as {:?}", self.fingerprint);
        let stream = tokio_boring::connect(config, &host, tcp)
            .await
            .map_err(|err| TransportError::Handshake {
                host,
                source: io::Error::other(err.to_string()),
            })?;

        Ok(ImpersonatedConnection::new(ImpersonatedStream::Tls(
            Box::new(stream),
        )))
    }
}

impl Service<Uri> for ImpersonatingConnector {
    type Response = ImpersonatedConnection;
    type Error = TransportError;
    type Future = Pin<Box<dyn Future<Output = Result<Self::Response, Self::Error>> + Send>>;

    fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, uri: Uri) -> Self::Future {
        Box::pin(self.clone().connect(uri))
    }
}

/// Plain TCP for `http://`, shaped TLS for `https://`.
pub enum ImpersonatedStream {
    Plain(TcpStream),
    Tls(Box<SslStream<TcpStream>>),
}

impl AsyncRead for ImpersonatedStream {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        match self.get_mut() {
            ImpersonatedStream::Plain(stream) => Pin::new(stream).poll_read(cx, buf),
            ImpersonatedStream::Tls(stream) => Pin::new(&mut **stream).poll_read(cx, buf),
        }
    }
}

impl AsyncWrite for ImpersonatedStream {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        match self.get_mut() {
            ImpersonatedStream::Plain(stream) => Pin::new(stream).poll_write(cx, buf),
            ImpersonatedStream::Tls(stream) => Pin::new(&mut **stream).poll_write(cx, buf),
        }
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        match self.get_mut() {
            ImpersonatedStream::Plain(stream) => Pin::new(stream).poll_flush(cx),
            ImpersonatedStream::Tls(stream) => Pin::new(&mut **stream).poll_flush(cx),
        }
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        match self.get_mut() {
            ImpersonatedStream::Plain(stream) => Pin::new(stream).poll_shutdown(cx),
            ImpersonatedStream::Tls(stream) => Pin::new(&mut **stream).poll_shutdown(cx),
        }
    }
}

/// Stream handed to hyper.
pub struct ImpersonatedConnection {
    inner: TokioIo<ImpersonatedStream>,
    tls: bool,
}

impl ImpersonatedConnection {
    fn new(stream: ImpersonatedStream) -> Self {
        let tls = matches!(stream, ImpersonatedStream::Tls(_));
        Self {
            inner: TokioIo::new(stream),
            tls,
        }
    }

    pub fn is_tls(&self) -> bool {
        self.tls
    }
}

impl Connection for ImpersonatedConnection {
    fn connected(&self) -> Connected {
        Connected::new()
    }
}

impl hyper::rt::Read for ImpersonatedConnection {
    fn poll_read(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: ReadBufCursor<'_>,
    ) -> Poll<io::Result<()>> {
        Pin::new(&mut self.inner).poll_read(cx, buf)
    }
}

impl hyper::rt::Write for ImpersonatedConnection {
    fn poll_write(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        Pin::new(&mut self.inner).poll_write(cx, buf)
    }

    fn poll_flush(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.inner).poll_flush(cx)
    }

    fn poll_shutdown(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.inner).poll_shutdown(cx)
    }
}

type HttpClient = Client<ImpersonatingConnector, Full<Bytes>>;

/// [`Transport`] speaking HTTP/1.1 over a browser-shaped TLS handshake.
///
/// One hyper client per fingerprint is built up front; nothing is mutated
/// afterwards, so a single instance serves any number of concurrent calls.
pub struct ImpersonatingTransport {
    clients: HashMap<FingerprintId, HttpClient>,
}

impl fmt::Debug for ImpersonatingTransport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ImpersonatingTransport")
            .field("fingerprints", &self.clients.len())
            .finish()
    }
}

impl ImpersonatingTransport {
    pub fn new() -> Result<Self, TransportError> {
        let connectors = FingerprintId::ALL
            .iter()
            .map(|id| ImpersonatingConnector::for_fingerprint(*id))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self::from_connectors(connectors))
    }

    pub fn from_connectors(connectors: impl IntoIterator<Item = ImpersonatingConnector>) -> Self {
        let clients = connectors
            .into_iter()
            .map(|connector| (connector.fingerprint(), build_client(connector)))
            .collect();
        Self { clients }
    }
}

fn build_client(connector: ImpersonatingConnector) -> HttpClient {
    Client::builder(TokioExecutor::new())
        .pool_max_idle_per_host(0)
        .http1_title_case_headers(true)
        .build(connector)
}

#[async_trait]
impl Transport for ImpersonatingTransport {
    async fn send(&self, request: TransportRequest) -> Result<TransportResponse, TransportError> {
        let fingerprint = request.profile.fingerprint();
        let client = self.clients.get(&fingerprint).ok_or_else(|| {
            TransportError::Tls(format!("no connector for fingerprint {fingerprint:?}"))
        })?;

        let uri: Uri = request
            .url
            .as_str()
            .parse()
            .map_err(|err: http::uri::InvalidUri| TransportError::InvalidRequest(err.to_string()))?;
        let headers = with_host_first(&request.url, &request.headers)?;

        let mut outbound = http::Request::builder()
            .method(request.method)
            .uri(uri)
            .body(Full::new(request.body.unwrap_or_default()))
            .map_err(|err| TransportError::InvalidRequest(err.to_string()))?;
        *outbound.headers_mut() = headers;

        let response = client.request(outbound).await.map_err(classify_client_error)?;
        let (parts, body) = response.into_parts();
        let raw = body
            .collect()
            .await
            .map_err(|err| TransportError::Body(error_chain(&err)))?
            .to_bytes();

        let decoded = decode_body(&parts.headers, raw)?;
        let mut headers = parts.headers;
        if headers.remove(CONTENT_ENCODING).is_some() {
            headers.remove(CONTENT_LENGTH);
        }

        Ok(TransportResponse {
            status: parts.status.as_u16(),
            headers,
            body: decoded,
        })
    }

    fn name(&self) -> &'static str {
        "impersonate"
    }
}

/// Browsers send `Host` first; hyper would append it last.
fn with_host_first(url: &Url, headers: &HeaderMap) -> Result<HeaderMap, TransportError> {
    let mut ordered = HeaderMap::with_capacity(headers.len() + 1);
    if !headers.contains_key(HOST) {
        let host = url
            .host_str()
            .ok_or_else(|| TransportError::InvalidRequest(format!("no host in '{url}'")))?;
        let authority = match url.port() {
            Some(port) => format!("{host}:{port}"),
            None => host.to_string(),
        };
        let value = HeaderValue::from_str(&authority)
            .map_err(|err| TransportError::InvalidRequest(err.to_string()))?;
        ordered.insert(HOST, value);
    }
    for (name, value) in headers {
        ordered.append(name.clone(), value.clone());
    }
    Ok(ordered)
}

/// Recover the connector's typed error from hyper's wrapper.
fn classify_client_error(err: hyper_util::client::legacy::Error) -> TransportError {
    let mut current: Option<&(dyn std::error::Error + 'static)> = std::error::Error::source(&err);
    while let Some(cause) = current {
        if let Some(transport) = cause.downcast_ref::<TransportError>() {
            return rebuild(transport);
        }
        current = std::error::Error::source(cause);
    }

    if err.is_connect() {
        TransportError::Connection(format!("connect failed: {}", error_chain(&err)))
    } else {
        TransportError::Connection(error_chain(&err))
    }
}

fn rebuild(err: &TransportError) -> TransportError {
    match err {
        TransportError::Dial { host, port, source } => TransportError::Dial {
            host: host.clone(),
            port: *port,
            source: io::Error::new(source.kind(), source.to_string()),
        },
        TransportError::Handshake { host, source } => TransportError::Handshake {
            host: host.clone(),
            source: io::Error::new(source.kind(), source.to_string()),
        },
        TransportError::Timeout(after) => TransportError::Timeout(*after),
        TransportError::Connection(msg) => TransportError::Connection(msg.clone()),
        TransportError::Body(msg) => TransportError::Body(msg.clone()),
        TransportError::Decode(msg) => TransportError::Decode(msg.clone()),
        TransportError::InvalidRequest(msg) => TransportError::InvalidRequest(msg.clone()),
        TransportError::Tls(msg) => TransportError::Tls(msg.clone()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_fingerprint_builds_a_connector() {
        for id in FingerprintId::ALL {
            let shape = TlsShape::for_spec(client_hello_spec(*id)).unwrap();
            assert_eq!(shape.alpn, b"\x08http/1.1", "{id:?}");
            assert_eq!((shape.min_version, shape.max_version), (TLS12, TLS13));
            tls_connector_for(client_hello_spec(*id)).unwrap();
        }
    }

    #[test]
    fn chrome_shape_keeps_browser_order() {
        let shape = TlsShape::for_spec(client_hello_spec(FingerprintId::Chrome120)).unwrap();
        let ciphers: Vec<_> = shape.cipher_list.split(':').collect();
        assert_eq!(ciphers.len(), 12);
        assert_eq!(ciphers[0], "ECDHE-ECDSA-AES128-GCM-SHA256");
        assert_eq!(ciphers[4], "ECDHE-ECDSA-CHACHA20-POLY1305");
        assert_eq!(ciphers[11], "AES256-SHA");
        assert_eq!(shape.groups, [29, 23, 24]);
        assert!(shape.sigalgs_list.starts_with("ecdsa_secp256r1_sha256:rsa_pss_rsae_sha256:"));
        assert!(shape.grease && shape.permute_extensions);
        assert!(shape.ocsp_stapling && shape.signed_cert_timestamps && shape.session_tickets);
        assert!(shape.unsupported.is_empty());
    }

    #[test]
    fn unsupported_code_points_are_reported() {
        let firefox = TlsShape::for_spec(client_hello_spec(FingerprintId::Firefox128)).unwrap();
        assert_eq!(firefox.groups, [29, 23, 24, 25]);
        assert_eq!(firefox.unsupported, [4588, 256, 257]);
        assert!(!firefox.grease);

        let safari = TlsShape::for_spec(client_hello_spec(FingerprintId::Safari17)).unwrap();
        assert!(!safari.session_tickets);
        assert_eq!(safari.unsupported, [0xc008, 0xc012]);
        assert!(safari.cipher_list.ends_with(":DES-CBC3-SHA"));
    }

    #[test]
    fn spec_without_usable_groups_is_rejected() {
        let spec = ClientHelloSpec {
            supported_groups: &[0xfafa],
            ..*client_hello_spec(FingerprintId::Safari17)
        };
        assert!(matches!(TlsShape::for_spec(&spec), Err(TransportError::Tls(_))));
    }

    #[test]
    fn spec_without_alpn_sends_none() {
        let spec = ClientHelloSpec {
            alpn: &[],
            ..*client_hello_spec(FingerprintId::Chrome83)
        };
        assert!(TlsShape::for_spec(&spec).unwrap().alpn.is_empty());
        tls_connector_for(&spec).unwrap();
    }

    #[test]
    fn host_header_leads() {
        let url = Url::parse("http://127.0.0.1:8080/v4/anime").unwrap();
        let mut headers = HeaderMap::new();
        headers.insert("user-agent", HeaderValue::from_static("Browser/1.0"));
        let ordered = with_host_first(&url, &headers).unwrap();
        let names: Vec<_> = ordered.keys().map(|k| k.as_str()).collect();
        assert_eq!(names, ["host", "user-agent"]);
        assert_eq!(ordered[HOST], "127.0.0.1:8080");
    }
}
