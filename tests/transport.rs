mod common;

use std::io::Write;
use std::sync::Arc;

use anifetch::{
    ErrorKind, FetchRequest, FingerprintId, ImpersonatingConnector, ImpersonatingTransport,
    ReqwestTransport, Transport, TransportError, TransportRequest,
};
use flate2::Compression;
use flate2::write::GzEncoder;
use http::header::CONTENT_ENCODING;
use http::{HeaderMap, Uri};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;
use tower_service::Service;
use url::Url;

use common::{ScriptedServer, chrome_profile, closed_port, json, response};

fn request_for(url: &str) -> TransportRequest {
    let request = FetchRequest::get(Url::parse(url).unwrap());
    TransportRequest::from_fetch(&request, chrome_profile())
}

#[tokio::test]
async fn plain_http_sends_browser_headers_in_order() {
    let server = ScriptedServer::start(vec![json(200, "OK", r#"{"data":{"mal_id":1}}"#)]).await;
    let transport = ImpersonatingTransport::new().unwrap();
    let request = request_for(&server.url("/v4/anime/1"));
    let user_agent = request.profile.user_agent().to_string();

    let response = transport.send(request).await.unwrap();
    assert_eq!(response.status, 200);
    assert_eq!(&response.body[..], br#"{"data":{"mal_id":1}}"#);

    let head = server.requests().await.remove(0);
    let lines: Vec<&str> = head.split("\r\n").collect();
    assert_eq!(lines[0], "GET /v4/anime/1 HTTP/1.1");
    assert!(lines[1].starts_with("Host: 127.0.0.1:"), "{head}");
    assert!(lines.contains(&format!("User-Agent: {user_agent}").as_str()), "{head}");

    // Template order survives the wire, in Title-Case.
    let position = |name: &str| {
        lines
            .iter()
            .position(|line| line.starts_with(name))
            .unwrap_or_else(|| panic!("{name} missing in {head}"))
    };
    assert!(position("Upgrade-Insecure-Requests:") < position("User-Agent:"));
    assert!(position("User-Agent:") < position("Accept:"));
    assert!(position("Sec-Fetch-Dest:") < position("Accept-Encoding:"));
    assert!(
        lines.contains(&"Accept-Encoding: gzip, deflate, br, zstd"),
        "browser codings rewritten: {head}"
    );
}

#[tokio::test]
async fn caller_headers_override_profile_headers() {
    let server = ScriptedServer::start(vec![json(200, "OK", "{}")]).await;
    let transport = ImpersonatingTransport::new().unwrap();
    let mut headers = HeaderMap::new();
    headers.insert("accept", "application/json".parse().unwrap());
    let request = FetchRequest::get(Url::parse(&server.url("/graphql")).unwrap())
        .with_headers(headers);

    transport
        .send(TransportRequest::from_fetch(&request, chrome_profile()))
        .await
        .unwrap();

    let head = server.requests().await.remove(0);
    assert!(head.contains("\r\nAccept: application/json\r\n"), "{head}");
    assert_eq!(head.matches("\r\nAccept: ").count(), 1);
}

#[tokio::test]
async fn gzip_body_is_decoded() {
    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(b"<html>episode list</html>").unwrap();
    let compressed = encoder.finish().unwrap();
    let server = ScriptedServer::start(vec![response(
        200,
        "OK",
        &[("Content-Encoding", "gzip"), ("Content-Type", "text/html")],
        &compressed,
    )])
    .await;

    let transport = ImpersonatingTransport::new().unwrap();
    let response = transport
        .send(request_for(&server.url("/anime/frieren")))
        .await
        .unwrap();

    assert_eq!(&response.body[..], b"<html>episode list</html>");
    assert!(response.headers.get(CONTENT_ENCODING).is_none());
}

#[tokio::test]
async fn refused_connection_is_a_dial_error() {
    let addr = closed_port().await;
    let transport = ImpersonatingTransport::new().unwrap();
    let err = transport
        .send(request_for(&format!("http://{addr}/")))
        .await
        .unwrap_err();

    assert!(matches!(err, TransportError::Dial { .. }), "{err:?}");
    assert_eq!(err.kind(), ErrorKind::Dial);
    assert!(err.is_retryable());
}

#[tokio::test]
async fn plaintext_server_fails_the_handshake() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        let (mut stream, _) = listener.accept().await.unwrap();
        stream
            .write_all(b"HTTP/1.1 400 Bad Request\r\nConnection: close\r\n\r\n")
            .await
            .ok();
        stream.shutdown().await.ok();
    });

    let transport = ImpersonatingTransport::new().unwrap();
    let err = transport
        .send(request_for(&format!("https://{addr}/")))
        .await
        .unwrap_err();

    assert!(matches!(err, TransportError::Handshake { .. }), "{err:?}");
    assert!(err.is_retryable());
}

#[tokio::test]
async fn reqwest_fallback_sends_profile_headers() {
    let server = ScriptedServer::start(vec![json(404, "Not Found", "{}")]).await;
    let transport = Arc::new(ReqwestTransport::new().unwrap());
    let request = request_for(&server.url("/v2/skip-times/1/1"));
    let user_agent = request.profile.user_agent().to_string();

    let response = transport.send(request).await.unwrap();
    assert_eq!(response.status, 404);
    assert_eq!(transport.name(), "reqwest");

    let head = server.requests().await.remove(0).to_ascii_lowercase();
    assert!(head.contains(&format!("user-agent: {}", user_agent.to_ascii_lowercase())));
}

/// The parts of a ClientHello the browser identity depends on.
#[derive(Debug, Default)]
struct WireHello {
    ciphers: Vec<u16>,
    extensions: Vec<u16>,
    groups: Vec<u16>,
    alpn: Vec<String>,
    server_name: Option<String>,
}

struct Cursor<'a> {
    buf: &'a [u8],
}

impl<'a> Cursor<'a> {
    fn take(&mut self, n: usize) -> &'a [u8] {
        let (head, tail) = self.buf.split_at(n);
        self.buf = tail;
        head
    }

    fn u8(&mut self) -> usize {
        self.take(1)[0] as usize
    }

    fn u16(&mut self) -> u16 {
        let bytes = self.take(2);
        u16::from_be_bytes([bytes[0], bytes[1]])
    }

    fn u24(&mut self) -> usize {
        let bytes = self.take(3);
        (bytes[0] as usize) << 16 | (bytes[1] as usize) << 8 | bytes[2] as usize
    }

    fn vec16(&mut self) -> Cursor<'a> {
        let len = self.u16() as usize;
        Cursor { buf: self.take(len) }
    }

    fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }
}

fn parse_client_hello(handshake: &[u8]) -> WireHello {
    let mut msg = Cursor { buf: handshake };
    assert_eq!(msg.u8(), 1, "not a ClientHello");
    let len = msg.u24();
    let mut body = Cursor { buf: msg.take(len) };
    body.take(2 + 32);
    let session_id = body.u8();
    body.take(session_id);

    let mut hello = WireHello::default();
    let mut ciphers = body.vec16();
    while !ciphers.is_empty() {
        hello.ciphers.push(ciphers.u16());
    }
    let compression = body.u8();
    body.take(compression);

    let mut extensions = body.vec16();
    while !extensions.is_empty() {
        let id = extensions.u16();
        let mut data = extensions.vec16();
        hello.extensions.push(id);
        match id {
            0 => {
                let mut names = data.vec16();
                assert_eq!(names.u8(), 0, "host_name entry");
                let name = names.vec16();
                hello.server_name = Some(String::from_utf8(name.buf.to_vec()).unwrap());
            }
            10 => {
                let mut groups = data.vec16();
                while !groups.is_empty() {
                    hello.groups.push(groups.u16());
                }
            }
            16 => {
                let mut protocols = data.vec16();
                while !protocols.is_empty() {
                    let len = protocols.u8();
                    let name = protocols.take(len);
                    hello.alpn.push(String::from_utf8(name.to_vec()).unwrap());
                }
            }
            _ => {}
        }
    }
    hello
}

fn is_grease(value: u16) -> bool {
    value & 0x0f0f == 0x0a0a && value >> 8 == value & 0xff
}

fn without_grease(values: &[u16]) -> Vec<u16> {
    values.iter().copied().filter(|v| !is_grease(*v)).collect()
}

/// Dial a listener that records the first TLS record and hangs up.
async fn capture_hello(fingerprint: FingerprintId) -> WireHello {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    let server = tokio::spawn(async move {
        let (mut stream, _) = listener.accept().await.unwrap();
        let mut header = [0u8; 5];
        stream.read_exact(&mut header).await.unwrap();
        assert_eq!(header[0], 0x16, "first record is not a handshake");
        let len = u16::from_be_bytes([header[3], header[4]]) as usize;
        let mut record = vec![0u8; len];
        stream.read_exact(&mut record).await.unwrap();
        record
    });

    let mut connector = ImpersonatingConnector::for_fingerprint(fingerprint).unwrap();
    let uri: Uri = format!("https://localhost:{port}/").parse().unwrap();
    let outcome = connector.call(uri).await;
    assert!(
        matches!(outcome, Err(TransportError::Handshake { .. })),
        "handshake against a silent peer must fail"
    );

    parse_client_hello(&server.await.unwrap())
}

#[tokio::test]
async fn chrome_client_hello_matches_the_browser() {
    let hello = capture_hello(FingerprintId::Chrome120).await;

    assert!(is_grease(hello.ciphers[0]), "{:04x?}", hello.ciphers);
    assert!(!hello.ciphers.contains(&0x00ff), "renegotiation SCSV sent");
    let ciphers = without_grease(&hello.ciphers);
    let mut tls13 = ciphers[..3].to_vec();
    tls13.sort_unstable();
    assert_eq!(tls13, [0x1301, 0x1302, 0x1303]);
    assert_eq!(
        ciphers[3..],
        [
            0xc02b, 0xc02f, 0xc02c, 0xc030, 0xcca9, 0xcca8, 0xc013, 0xc014, 0x009c, 0x009d,
            0x002f, 0x0035,
        ]
    );

    assert!(is_grease(hello.groups[0]), "{:?}", hello.groups);
    assert_eq!(without_grease(&hello.groups), [29, 23, 24]);
    assert_eq!(hello.alpn, ["http/1.1"]);
    assert_eq!(hello.server_name.as_deref(), Some("localhost"));

    assert!(hello.extensions.iter().any(|id| is_grease(*id)));
    for id in [0, 23, 65281, 10, 11, 35, 16, 5, 13, 18, 51, 45, 43] {
        assert!(hello.extensions.contains(&id), "extension {id} missing");
    }
}

#[tokio::test]
async fn firefox_client_hello_has_no_grease() {
    let hello = capture_hello(FingerprintId::Firefox120).await;

    assert!(!hello.ciphers.iter().any(|v| is_grease(*v)));
    assert!(!hello.extensions.iter().any(|v| is_grease(*v)));
    assert_eq!(
        hello.ciphers[3..],
        [
            0xc02b, 0xc02f, 0xcca9, 0xcca8, 0xc02c, 0xc030, 0xc00a, 0xc009, 0xc013, 0xc014,
            0x009c, 0x009d, 0x002f, 0x0035,
        ]
    );
    assert_eq!(hello.groups, [29, 23, 24, 25]);
    assert!(hello.extensions.contains(&5));
    assert!(!hello.extensions.contains(&18), "SCT is Chrome/Safari only");
    assert_eq!(hello.alpn, ["http/1.1"]);
}
