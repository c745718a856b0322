//! Conditional caching and compression for handler responses.
//!
//! # Responsibilities
//! - Fingerprint 200 responses and answer 304 when the client already holds
//!   the same representation (`ETag` / `If-None-Match`)
//! - Compress larger bodies with `deflate` or `gzip` when the client accepts it
//!
//! # Design Decisions
//! - Opt-in: handlers call `RequestContext::send_response`; the dispatcher never
//!   applies this on its own
//! - The fingerprint covers body, headers and encoding label, and is taken
//!   before compression
//! - `*` in `If-None-Match` is not honoured; it makes no sense for generated
//!   content

use axum::http::{header, HeaderMap, HeaderValue, StatusCode};
use bytes::Bytes;
use flate2::write::{GzEncoder, ZlibEncoder};
use flate2::Compression;
use sha2::{Digest, Sha256};
use std::io::Write;

/// Bodies at or below this size are sent uncompressed.
const COMPRESSION_THRESHOLD: usize = 2048;

/// Switches taken from the router configuration.
#[derive(Debug, Clone, Copy)]
pub struct ResponseOptions {
    pub enable_browser_cache: bool,
    pub enable_gzip: bool,
}

/// Payload handed to the helper.
#[derive(Debug, Clone, PartialEq)]
pub enum ResponseBody {
    Text(String),
    Binary(Bytes),
}

impl ResponseBody {
    fn as_bytes(&self) -> &[u8] {
        match self {
            ResponseBody::Text(text) => text.as_bytes(),
            ResponseBody::Binary(bytes) => bytes,
        }
    }

    fn encoding(&self) -> Option<&'static str> {
        match self {
            ResponseBody::Text(_) => Some("utf8"),
            ResponseBody::Binary(_) => None,
        }
    }
}

impl From<String> for ResponseBody {
    fn from(text: String) -> Self {
        ResponseBody::Text(text)
    }
}

impl From<&str> for ResponseBody {
    fn from(text: &str) -> Self {
        ResponseBody::Text(text.to_string())
    }
}

impl From<Bytes> for ResponseBody {
    fn from(bytes: Bytes) -> Self {
        ResponseBody::Binary(bytes)
    }
}

/// What the transport should send.
#[derive(Debug)]
pub enum Prepared {
    NotModified(HeaderMap),
    Full {
        status: StatusCode,
        headers: HeaderMap,
        body: ResponseBody,
    },
}

/// Content fingerprint used as the `ETag` value (unquoted).
pub fn fingerprint(body: &[u8], headers: &HeaderMap, encoding: Option<&str>) -> String {
    let pairs: Vec<(&str, String)> = headers
        .iter()
        .map(|(name, value)| (name.as_str(), String::from_utf8_lossy(value.as_bytes()).into_owned()))
        .collect();

    let mut hasher = Sha256::new();
    hasher.update(body);
    hasher.update(serde_json::to_string(&pairs).unwrap_or_default().as_bytes());
    if let Some(encoding) = encoding {
        hasher.update(encoding.as_bytes());
    }
    format!("{:x}", hasher.finalize())
}

/// Apply caching and compression to a response about to be sent.
pub fn prepare(
    options: ResponseOptions,
    request_headers: &HeaderMap,
    status: StatusCode,
    mut headers: HeaderMap,
    body: ResponseBody,
) -> Prepared {
    if options.enable_browser_cache && status == StatusCode::OK {
        let digest = fingerprint(body.as_bytes(), &headers, body.encoding());
        if let Ok(etag) = HeaderValue::from_str(&format!("\"{digest}\"")) {
            headers.insert(header::ETAG, etag);
        }
        headers.insert(
            header::CACHE_CONTROL,
            HeaderValue::from_static("max-age=0, must-revalidate"),
        );

        let if_none_match: Vec<&str> = request_headers
            .get_all(header::IF_NONE_MATCH)
            .iter()
            .filter_map(|v| v.to_str().ok())
            .collect();
        let matched = if_none_match
            .iter()
            .flat_map(|value| value.split(','))
            .map(|tag| tag.trim_matches(|c| c == ' ' || c == '"'))
            .any(|tag| tag == digest);
        if matched {
            return Prepared::NotModified(headers);
        }
    }

    let mut body = body;
    if options.enable_gzip && body.as_bytes().len() > COMPRESSION_THRESHOLD {
        let accept_encoding = request_headers
            .get(header::ACCEPT_ENCODING)
            .and_then(|v| v.to_str().ok())
            .unwrap_or_default();
        let coding = if accepts_coding(accept_encoding, "deflate") {
            Some("deflate")
        } else if accepts_coding(accept_encoding, "gzip") {
            Some("gzip")
        } else {
            None
        };

        if let Some(coding) = coding {
            match compress(coding, body.as_bytes()) {
                Ok(compressed) => {
                    headers.insert(header::CONTENT_ENCODING, HeaderValue::from_static(coding));
                    body = ResponseBody::Binary(compressed);
                }
                Err(e) => {
                    tracing::warn!(coding, error = %e, "Compression failed, sending identity body");
                }
            }
        }
    }

    Prepared::Full {
        status,
        headers,
        body,
    }
}

/// True if `coding` is listed in `Accept-Encoding` without `q=0`.
fn accepts_coding(accept_encoding: &str, coding: &str) -> bool {
    accept_encoding.split(',').any(|entry| {
        let mut params = entry.split(';');
        let token = params.next().unwrap_or_default().trim();
        let refused = params.any(|p| {
            p.trim()
                .strip_prefix("q=")
                .and_then(|q| q.trim().parse::<f32>().ok())
                .is_some_and(|q| q == 0.0)
        });
        token.eq_ignore_ascii_case(coding) && !refused
    })
}

fn compress(coding: &str, data: &[u8]) -> std::io::Result<Bytes> {
    let compressed = if coding == "gzip" {
        let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
        encoder.write_all(data)?;
        encoder.finish()?
    } else {
        let mut encoder = ZlibEncoder::new(Vec::new(), Compression::default());
        encoder.write_all(data)?;
        encoder.finish()?
    };
    Ok(Bytes::from(compressed))
}
