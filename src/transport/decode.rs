//! Content-Encoding handling for the impersonating transport.
//!
//! Profiles advertise the codings their browser advertises (`gzip, deflate,
//! br, zstd`), so every one of them must be undone here. A coding outside
//! that set, or a body that does not inflate, is a [`TransportError::Decode`]:
//! the bytes arrived, retrying will not change them.

use std::io::Read;

use bytes::Bytes;
use flate2::read::{DeflateDecoder, GzDecoder, ZlibDecoder};
use http::HeaderMap;
use http::header::CONTENT_ENCODING;

use super::TransportError;

const BROTLI_BUFFER: usize = 4096;

pub fn decode_body(headers: &HeaderMap, body: Bytes) -> Result<Bytes, TransportError> {
    let Some(value) = headers.get(CONTENT_ENCODING) else {
        return Ok(body);
    };
    let value = value
        .to_str()
        .map_err(|_| TransportError::Decode("content-encoding is not ASCII".into()))?;

    // Codings are listed in the order they were applied; undo them in reverse.
    let codings: Vec<String> = value
        .split(',')
        .map(|coding| coding.trim().to_ascii_lowercase())
        .filter(|coding| !coding.is_empty())
        .collect();

    codings
        .iter()
        .rev()
        .try_fold(body, |body, coding| decode_one(coding, body))
}

fn decode_one(coding: &str, body: Bytes) -> Result<Bytes, TransportError> {
    match coding {
        "identity" => Ok(body),
        "gzip" | "x-gzip" => read_all(coding, GzDecoder::new(&body[..])),
        // "deflate" is zlib-wrapped per RFC 9110, but some servers send raw deflate.
        "deflate" => read_all(coding, ZlibDecoder::new(&body[..]))
            .or_else(|_| read_all(coding, DeflateDecoder::new(&body[..]))),
        "br" => read_all(coding, brotli::Decompressor::new(&body[..], BROTLI_BUFFER)),
        "zstd" => zstd::stream::decode_all(&body[..])
            .map(Bytes::from)
            .map_err(|err| TransportError::Decode(format!("zstd: {err}"))),
        other => Err(TransportError::Decode(format!(
            "unsupported content-encoding '{other}'"
        ))),
    }
}

fn read_all(coding: &str, mut decoder: impl Read) -> Result<Bytes, TransportError> {
    let mut decoded = Vec::new();
    decoder
        .read_to_end(&mut decoded)
        .map_err(|err| TransportError::Decode(format!("{coding}: {err}")))?;
    Ok(Bytes::from(decoded))
}

#[cfg(test)]
mod tests {
    use super::*;
    use flate2::Compression;
    use flate2::write::{GzEncoder, ZlibEncoder};
    use http::HeaderValue;
    use std::io::Write;

    fn headers(encoding: &'static str) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_ENCODING, HeaderValue::from_static(encoding));
        headers
    }

    fn gzip(data: &[u8]) -> Vec<u8> {
        let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
        encoder.write_all(data).unwrap();
        encoder.finish().unwrap()
    }

    fn brotli(data: &[u8]) -> Vec<u8> {
        let mut encoder = brotli::CompressorWriter::new(Vec::new(), 4096, 5, 22);
        encoder.write_all(data).unwrap();
        encoder.flush().unwrap();
        encoder.into_inner()
    }

    #[test]
    fn gzip_body_is_inflated() {
        let body = decode_body(&headers("gzip"), Bytes::from(gzip(b"{\"data\":[]}"))).unwrap();
        assert_eq!(&body[..], b"{\"data\":[]}");
    }

    #[test]
    fn zlib_deflate_body_is_inflated() {
        let mut encoder = ZlibEncoder::new(Vec::new(), Compression::fast());
        encoder.write_all(b"skip-times").unwrap();
        let compressed = Bytes::from(encoder.finish().unwrap());

        let body = decode_body(&headers("deflate"), compressed).unwrap();
        assert_eq!(&body[..], b"skip-times");
    }

    #[test]
    fn brotli_body_is_decoded() {
        let compressed = Bytes::from(brotli(b"<html>Sousou no Frieren</html>"));
        let body = decode_body(&headers("br"), compressed).unwrap();
        assert_eq!(&body[..], b"<html>Sousou no Frieren</html>");
    }

    #[test]
    fn zstd_body_is_decoded() {
        let compressed = zstd::stream::encode_all(&b"{\"mal_id\":52991}"[..], 3).unwrap();
        let body = decode_body(&headers("zstd"), Bytes::from(compressed)).unwrap();
        assert_eq!(&body[..], b"{\"mal_id\":52991}");
    }

    #[test]
    fn stacked_codings_are_undone_in_reverse() {
        let compressed = Bytes::from(brotli(&gzip(b"layered")));
        let body = decode_body(&headers("gzip, br"), compressed).unwrap();
        assert_eq!(&body[..], b"layered");
    }

    #[test]
    fn identity_passes_through() {
        let body = decode_body(&HeaderMap::new(), Bytes::from_static(b"plain")).unwrap();
        assert_eq!(&body[..], b"plain");
        let body = decode_body(&headers("identity"), Bytes::from_static(b"plain")).unwrap();
        assert_eq!(&body[..], b"plain");
    }

    #[test]
    fn unknown_coding_is_a_decode_error() {
        let err = decode_body(&headers("compress"), Bytes::from_static(b"\x1f\x9d")).unwrap_err();
        assert!(matches!(err, TransportError::Decode(_)));
        assert!(!err.is_retryable());
    }

    #[test]
    fn corrupt_body_is_a_decode_error() {
        for coding in ["gzip", "br", "zstd"] {
            let mut map = HeaderMap::new();
            map.insert(CONTENT_ENCODING, HeaderValue::from_static(coding));
            let err = decode_body(&map, Bytes::from_static(b"definitely not compressed"))
                .unwrap_err();
            assert!(matches!(err, TransportError::Decode(_)), "{coding}: {err:?}");
        }
    }
}
