//! Cookie header parsing.
//!
//! `Cookie: a=1; b=two%20words` → `{a: "1", b: "two words"}`. Segments are
//! split on `;`, then on the first `=`; keys and values are trimmed and values
//! percent-decoded. A later duplicate key replaces an earlier one. Segments
//! without `=` are ignored.

use percent_encoding::{percent_decode_str, utf8_percent_encode, AsciiSet, CONTROLS};
use std::collections::HashMap;
use thiserror::Error;

/// Characters escaped when serializing a cookie value.
const COOKIE_VALUE: &AsciiSet = &CONTROLS
    .add(b' ')
    .add(b'"')
    .add(b'%')
    .add(b',')
    .add(b';')
    .add(b'=')
    .add(b'\\');

#[derive(Debug, Error, PartialEq, Eq)]
pub enum CookieError {
    #[error("cookie '{0}' does not decode to UTF-8")]
    InvalidEncoding(String),
}

/// Parse a `Cookie` header value.
pub fn parse_cookie_header(header: &str) -> Result<HashMap<String, String>, CookieError> {
    let mut cookies = HashMap::new();
    for segment in header.split(';') {
        let Some((key, value)) = segment.split_once('=') else {
            continue;
        };
        let key = key.trim();
        let decoded = percent_decode_str(value.trim())
            .decode_utf8()
            .map_err(|_| CookieError::InvalidEncoding(key.to_string()))?;
        cookies.insert(key.to_string(), decoded.into_owned());
    }
    Ok(cookies)
}

/// Serialize cookies as `key=value; key2=value2`, percent-encoding values.
pub fn serialize_cookies<'a, I>(cookies: I) -> String
where
    I: IntoIterator<Item = (&'a str, &'a str)>,
{
    cookies
        .into_iter()
        .map(|(key, value)| format!("{key}={}", utf8_percent_encode(value, COOKIE_VALUE)))
        .collect::<Vec<_>>()
        .join("; ")
}
