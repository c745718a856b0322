//! Request body formats and their materialized payloads.

use bytes::Bytes;
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// How a route wants its request body delivered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BodyFormat {
    /// Leave the raw reader untouched for the handler.
    Stream,
    /// UTF-8 text.
    String,
    /// Raw bytes.
    Buffer,
    /// `application/x-www-form-urlencoded` key/value pairs.
    FormUrlencoded,
}

impl BodyFormat {
    pub fn as_str(&self) -> &'static str {
        match self {
            BodyFormat::Stream => "stream",
            BodyFormat::String => "string",
            BodyFormat::Buffer => "buffer",
            BodyFormat::FormUrlencoded => "www-form-urlencoded",
        }
    }
}

impl fmt::Display for BodyFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
#[error("unknown body format '{0}'")]
pub struct UnknownBodyFormat(pub String);

impl FromStr for BodyFormat {
    type Err = UnknownBodyFormat;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "stream" => Ok(BodyFormat::Stream),
            "string" => Ok(BodyFormat::String),
            "buffer" => Ok(BodyFormat::Buffer),
            "www-form-urlencoded" | "form-urlencoded" => Ok(BodyFormat::FormUrlencoded),
            other => Err(UnknownBodyFormat(other.to_string())),
        }
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum BodyError {
    #[error("request body is not valid UTF-8")]
    InvalidUtf8,
}

/// Decoded `application/x-www-form-urlencoded` pairs, in body order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FormData(Vec<(String, String)>);

impl FormData {
    pub fn parse(input: &[u8]) -> Self {
        Self(
            url::form_urlencoded::parse(input)
                .map(|(k, v)| (k.into_owned(), v.into_owned()))
                .collect(),
        )
    }

    /// First value for `key`.
    pub fn get(&self, key: &str) -> Option<&str> {
        self.0
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    pub fn get_all(&self, key: &str) -> Vec<&str> {
        self.0
            .iter()
            .filter(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
            .collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// The request body after materialization.
#[derive(Debug, Clone, Default, PartialEq)]
pub enum BodyData {
    /// Not read by the pipeline; the reader is still available.
    #[default]
    Unread,
    Text(String),
    Form(FormData),
    Buffer(Bytes),
}

impl BodyData {
    /// Decode a fully read body according to `format`.
    pub fn decode(format: BodyFormat, bytes: Bytes) -> Result<Self, BodyError> {
        match format {
            BodyFormat::Stream => Ok(BodyData::Unread),
            BodyFormat::Buffer => Ok(BodyData::Buffer(bytes)),
            BodyFormat::String => String::from_utf8(bytes.to_vec())
                .map(BodyData::Text)
                .map_err(|_| BodyError::InvalidUtf8),
            BodyFormat::FormUrlencoded => {
                std::str::from_utf8(&bytes).map_err(|_| BodyError::InvalidUtf8)?;
                Ok(BodyData::Form(FormData::parse(&bytes)))
            }
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            BodyData::Text(text) => Some(text),
            _ => None,
        }
    }

    pub fn as_form(&self) -> Option<&FormData> {
        match self {
            BodyData::Form(form) => Some(form),
            _ => None,
        }
    }

    pub fn as_bytes(&self) -> Option<&Bytes> {
        match self {
            BodyData::Buffer(bytes) => Some(bytes),
            _ => None,
        }
    }
}
