//! Incremental `multipart/form-data` parsing.
//!
//! # Responsibilities
//! - Extract the boundary from the request `Content-Type`
//! - Turn an arbitrarily chunked body into part-start / part-chunk / part-end
//!   events without buffering whole parts
//!
//! # Data Flow
//! ```text
//! BodyReader chunks
//!     → MultipartParser::feed (header scan ⇄ body scan)
//!     → MultipartEvent queue
//!     → MultipartReader::next_event (pulled by the handler)
//! ```
//!
//! # Design Decisions
//! - The parser is sans-IO; `MultipartReader` drives it from the body stream
//! - The whole accumulated buffer is searched on every chunk, and the body scan
//!   holds back `len("\r\n--boundary") - 1` bytes so a delimiter split across
//!   chunks is still found
//! - The closing delimiter ends parsing; the epilogue is ignored

use axum::http::{HeaderMap, HeaderName, HeaderValue};
use bytes::{Buf, Bytes, BytesMut};
use std::collections::VecDeque;
use thiserror::Error;

use crate::http::streamer::{BodyReader, StreamerError};

/// Upper bound on a single part's header block.
const MAX_HEADER_BLOCK: usize = 16 * 1024;

#[derive(Debug, Error)]
pub enum MultipartError {
    #[error("expected multipart/form-data content type")]
    NotMultipart,

    #[error("missing boundary in multipart/form-data")]
    MissingBoundary,

    #[error("malformed part header: {0}")]
    MalformedHeader(String),

    #[error("body ended inside an open part")]
    UnexpectedEnd,

    #[error(transparent)]
    Transport(#[from] StreamerError),
}

impl MultipartError {
    /// Framing problems the client caused, as opposed to transport failures.
    pub fn is_client_error(&self) -> bool {
        !matches!(self, MultipartError::Transport(_))
    }
}

/// One step of a multipart body.
#[derive(Debug, Clone, PartialEq)]
pub enum MultipartEvent {
    PartStart {
        headers: HeaderMap,
        name: Option<String>,
        filename: Option<String>,
    },
    PartChunk(Bytes),
    PartEnd,
}

/// Read the boundary parameter of a `multipart/form-data` content type.
pub fn parse_boundary(content_type: Option<&str>) -> Result<String, MultipartError> {
    let content_type = content_type.ok_or(MultipartError::NotMultipart)?;
    let mut params = content_type.split(';');
    let media_type = params.next().unwrap_or_default().trim();
    if !media_type.eq_ignore_ascii_case("multipart/form-data") {
        return Err(MultipartError::NotMultipart);
    }

    params
        .filter_map(|param| param.trim().split_once('='))
        .find(|(key, _)| key.trim().eq_ignore_ascii_case("boundary"))
        .map(|(_, value)| unquote(value.trim()).to_string())
        .filter(|boundary| !boundary.is_empty())
        .ok_or(MultipartError::MissingBoundary)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ScanState {
    Headers,
    Body,
    Done,
}

/// Sans-IO multipart state machine.
#[derive(Debug)]
pub struct MultipartParser {
    marker: Vec<u8>,
    buffer: BytesMut,
    state: ScanState,
    /// Set once the first boundary marker was found.
    opened: bool,
}

impl MultipartParser {
    pub fn new(boundary: &str) -> Self {
        Self {
            marker: format!("--{boundary}").into_bytes(),
            buffer: BytesMut::new(),
            state: ScanState::Headers,
            opened: false,
        }
    }

    /// Append a chunk and return every event it completes.
    pub fn feed(&mut self, chunk: &[u8]) -> Result<Vec<MultipartEvent>, MultipartError> {
        self.buffer.extend_from_slice(chunk);
        let mut events = Vec::new();

        loop {
            match self.state {
                ScanState::Done => {
                    self.buffer.clear();
                    break;
                }
                ScanState::Headers => {
                    let Some(at) = find(&self.buffer, &self.marker) else {
                        // Preamble: only a partial marker can matter.
                        let keep = self.marker.len() - 1;
                        if self.buffer.len() > keep {
                            let excess = self.buffer.len() - keep;
                            self.buffer.advance(excess);
                        }
                        break;
                    };
                    self.buffer.advance(at);
                    self.opened = true;

                    let after = self.marker.len();
                    if self.buffer.len() < after + 2 {
                        break;
                    }
                    if &self.buffer[after..after + 2] == b"--" {
                        self.state = ScanState::Done;
                        continue;
                    }
                    let Some(end) = find(&self.buffer[after..], b"\r\n\r\n") else {
                        if self.buffer.len() > MAX_HEADER_BLOCK {
                            return Err(MultipartError::MalformedHeader(
                                "header block too large".into(),
                            ));
                        }
                        break;
                    };

                    let block_end = after + end;
                    let (headers, name, filename) = parse_part_headers(&self.buffer[after..block_end])?;
                    self.buffer.advance(block_end + 4);
                    self.state = ScanState::Body;
                    events.push(MultipartEvent::PartStart {
                        headers,
                        name,
                        filename,
                    });
                }
                ScanState::Body => match find(&self.buffer, &self.marker) {
                    Some(at) => {
                        let content_end = if at >= 2 && &self.buffer[at - 2..at] == b"\r\n" {
                            at - 2
                        } else {
                            at
                        };
                        // The marker itself stays buffered for the header scan.
                        let content = self.buffer.split_to(at).freeze().slice(..content_end);
                        if !content.is_empty() {
                            events.push(MultipartEvent::PartChunk(content));
                        }
                        events.push(MultipartEvent::PartEnd);
                        self.state = ScanState::Headers;
                    }
                    None => {
                        let keep = self.marker.len() + 1;
                        if self.buffer.len() > keep {
                            let ready = self.buffer.len() - keep;
                            events.push(MultipartEvent::PartChunk(self.buffer.split_to(ready).freeze()));
                        }
                        break;
                    }
                },
            }
        }

        Ok(events)
    }

    /// Check that the stream ended with the closing delimiter. A body that
    /// never reached a first boundary holds no parts and is accepted.
    pub fn finish(&self) -> Result<(), MultipartError> {
        match self.state {
            ScanState::Done => Ok(()),
            ScanState::Headers if !self.opened => Ok(()),
            ScanState::Headers | ScanState::Body => Err(MultipartError::UnexpectedEnd),
        }
    }
}

/// Pull-based multipart reader over a request body.
pub struct MultipartReader {
    reader: BodyReader,
    parser: MultipartParser,
    pending: VecDeque<MultipartEvent>,
    finished: bool,
}

/// A fully buffered part, produced by [`MultipartReader::collect_parts`].
#[derive(Debug, Clone, PartialEq)]
pub struct Part {
    pub headers: HeaderMap,
    pub name: Option<String>,
    pub filename: Option<String>,
    pub data: Bytes,
}

impl MultipartReader {
    pub fn new(boundary: &str, reader: BodyReader) -> Self {
        Self {
            reader,
            parser: MultipartParser::new(boundary),
            pending: VecDeque::new(),
            finished: false,
        }
    }

    /// Next event, or `None` after the body finished cleanly.
    pub async fn next_event(&mut self) -> Result<Option<MultipartEvent>, MultipartError> {
        loop {
            if let Some(event) = self.pending.pop_front() {
                return Ok(Some(event));
            }
            if self.finished {
                return Ok(None);
            }
            match self.reader.next_chunk().await? {
                Some(chunk) => self.pending.extend(self.parser.feed(&chunk)?),
                None => {
                    self.parser.finish()?;
                    self.finished = true;
                }
            }
        }
    }

    /// Buffer every part in memory. Meant for small forms.
    pub async fn collect_parts(mut self) -> Result<Vec<Part>, MultipartError> {
        let mut parts: Vec<Part> = Vec::new();
        let mut current: Option<(Part, BytesMut)> = None;
        while let Some(event) = self.next_event().await? {
            match event {
                MultipartEvent::PartStart {
                    headers,
                    name,
                    filename,
                } => {
                    let part = Part {
                        headers,
                        name,
                        filename,
                        data: Bytes::new(),
                    };
                    current = Some((part, BytesMut::new()));
                }
                MultipartEvent::PartChunk(chunk) => {
                    if let Some((_, data)) = current.as_mut() {
                        data.extend_from_slice(&chunk);
                    }
                }
                MultipartEvent::PartEnd => {
                    if let Some((mut part, data)) = current.take() {
                        part.data = data.freeze();
                        parts.push(part);
                    }
                }
            }
        }
        Ok(parts)
    }
}

type PartHead = (HeaderMap, Option<String>, Option<String>);

fn parse_part_headers(block: &[u8]) -> Result<PartHead, MultipartError> {
    let text = std::str::from_utf8(block)
        .map_err(|_| MultipartError::MalformedHeader("header block is not UTF-8".into()))?;

    let mut headers = HeaderMap::new();
    let mut name = None;
    let mut filename = None;
    for line in text.split("\r\n").filter(|line| !line.trim().is_empty()) {
        let (key, value) = line
            .split_once(':')
            .ok_or_else(|| MultipartError::MalformedHeader(line.to_string()))?;
        let (key, value) = (key.trim(), value.trim());

        if key.eq_ignore_ascii_case("content-disposition") {
            for param in value.split(';').map(str::trim) {
                if let Some(v) = param.strip_prefix("name=") {
                    name = Some(unquote(v).to_string());
                } else if let Some(v) = param.strip_prefix("filename=") {
                    filename = Some(unquote(v).to_string());
                }
            }
        }

        let header_name = HeaderName::from_bytes(key.as_bytes())
            .map_err(|_| MultipartError::MalformedHeader(line.to_string()))?;
        let header_value = HeaderValue::from_str(value)
            .map_err(|_| MultipartError::MalformedHeader(line.to_string()))?;
        headers.append(header_name, header_value);
    }

    Ok((headers, name, filename))
}

fn unquote(value: &str) -> &str {
    value
        .strip_prefix('"')
        .and_then(|v| v.strip_suffix('"'))
        .unwrap_or(value)
}

fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    if needle.is_empty() || haystack.len() < needle.len() {
        return None;
    }
    haystack.windows(needle.len()).position(|window| window == needle)
}

#[cfg(test)]
mod tests {
    use super::*;

    const BOUNDARY: &str = "----formboundary7MA4YWxk";

    fn payload() -> Vec<u8> {
        format!(
            "preamble to ignore\r\n\
             --{b}\r\n\
             Content-Disposition: form-data; name=\"title\"\r\n\
             \r\n\
             Hello\r\n\
             --{b}\r\n\
             Content-Disposition: form-data; name=\"upload\"; filename=\"notes.txt\"\r\n\
             Content-Type: text/plain\r\n\
             \r\n\
             line one\r\n--not-the-boundary\r\nline two\r\n\
             --{b}\r\n\
             Content-Disposition: form-data; name=\"empty\"\r\n\
             \r\n\
             \r\n\
             --{b}--\r\n\
             epilogue",
            b = BOUNDARY
        )
        .into_bytes()
    }

    type Summary = Vec<(Option<String>, Option<String>, Option<String>, Vec<u8>)>;

    /// Fold events into (name, filename, content-type, bytes) per part.
    fn summarize(events: Vec<MultipartEvent>) -> Summary {
        let mut out: Summary = Vec::new();
        let mut open = false;
        for event in events {
            match event {
                MultipartEvent::PartStart {
                    headers,
                    name,
                    filename,
                } => {
                    assert!(!open, "part started while another was open");
                    open = true;
                    let content_type = headers
                        .get("content-type")
                        .map(|v| v.to_str().unwrap().to_string());
                    out.push((name, filename, content_type, Vec::new()));
                }
                MultipartEvent::PartChunk(chunk) => {
                    assert!(open, "chunk outside a part");
                    out.last_mut().unwrap().3.extend_from_slice(&chunk);
                }
                MultipartEvent::PartEnd => {
                    assert!(open);
                    open = false;
                }
            }
        }
        assert!(!open);
        out
    }

    fn run(chunks: &[&[u8]]) -> Summary {
        let mut parser = MultipartParser::new(BOUNDARY);
        let mut events = Vec::new();
        for chunk in chunks {
            events.extend(parser.feed(chunk).unwrap());
        }
        parser.finish().unwrap();
        summarize(events)
    }

    #[test]
    fn parses_single_chunk() {
        let parts = run(&[&payload()]);
        assert_eq!(parts.len(), 3);
        assert_eq!(parts[0].0.as_deref(), Some("title"));
        assert_eq!(parts[0].3, b"Hello");
        assert_eq!(parts[1].0.as_deref(), Some("upload"));
        assert_eq!(parts[1].1.as_deref(), Some("notes.txt"));
        assert_eq!(parts[1].2.as_deref(), Some("text/plain"));
        assert_eq!(parts[1].3, b"line one\r\n--not-the-boundary\r\nline two");
        assert_eq!(parts[2].0.as_deref(), Some("empty"));
        assert!(parts[2].3.is_empty());
    }

    #[test]
    fn every_split_offset_matches_single_chunk() {
        let body = payload();
        let expected = run(&[&body]);
        for offset in 0..=body.len() {
            let (a, b) = body.split_at(offset);
            assert_eq!(run(&[a, b]), expected, "split at {offset}");
        }
    }

    #[test]
    fn byte_at_a_time_matches_single_chunk() {
        let body = payload();
        let chunks: Vec<&[u8]> = body.chunks(1).collect();
        assert_eq!(run(&chunks), run(&[&body]));
    }

    #[test]
    fn boundary_parsing() {
        assert_eq!(
            parse_boundary(Some("multipart/form-data; boundary=abc")).unwrap(),
            "abc"
        );
        assert_eq!(
            parse_boundary(Some("Multipart/Form-Data; charset=utf-8; boundary=\"a b\"")).unwrap(),
            "a b"
        );
        assert!(matches!(
            parse_boundary(Some("application/json")),
            Err(MultipartError::NotMultipart)
        ));
        assert!(matches!(parse_boundary(None), Err(MultipartError::NotMultipart)));
        assert!(matches!(
            parse_boundary(Some("multipart/form-data")),
            Err(MultipartError::MissingBoundary)
        ));
    }

    #[test]
    fn header_line_without_colon_is_rejected() {
        let body = format!("--{BOUNDARY}\r\nnot a header\r\n\r\ndata\r\n--{BOUNDARY}--");
        let mut parser = MultipartParser::new(BOUNDARY);
        assert!(matches!(
            parser.feed(body.as_bytes()),
            Err(MultipartError::MalformedHeader(_))
        ));
    }

    #[test]
    fn truncated_part_fails_on_finish() {
        let body = format!("--{BOUNDARY}\r\nContent-Disposition: form-data; name=\"a\"\r\n\r\npartial");
        let mut parser = MultipartParser::new(BOUNDARY);
        parser.feed(body.as_bytes()).unwrap();
        assert!(matches!(parser.finish(), Err(MultipartError::UnexpectedEnd)));
    }

    #[test]
    fn truncated_header_block_fails_on_finish() {
        let body = format!("--{BOUNDARY}\r\nContent-Disposition: form-da");
        let mut parser = MultipartParser::new(BOUNDARY);
        assert!(parser.feed(body.as_bytes()).unwrap().is_empty());
        assert!(matches!(parser.finish(), Err(MultipartError::UnexpectedEnd)));
    }

    #[test]
    fn missing_closing_delimiter_fails_on_finish() {
        let body = format!("--{BOUNDARY}\r\nContent-Disposition: form-data; name=\"a\"\r\n\r\nvalue\r\n--{BOUNDARY}\r\n");
        let mut parser = MultipartParser::new(BOUNDARY);
        let events = parser.feed(body.as_bytes()).unwrap();
        assert!(events.contains(&MultipartEvent::PartEnd));
        assert!(matches!(parser.finish(), Err(MultipartError::UnexpectedEnd)));
    }

    #[test]
    fn preamble_only_body_has_no_parts() {
        let mut parser = MultipartParser::new(BOUNDARY);
        assert!(parser.feed(b"nothing here").unwrap().is_empty());
        assert!(parser.finish().is_ok());
    }

    #[test]
    fn non_ascii_filename_is_kept() {
        let body = format!(
            "--{BOUNDARY}\r\nContent-Disposition: form-data; name=\"f\"; filename=\"résumé.pdf\"\r\n\r\nx\r\n--{BOUNDARY}--\r\n"
        );
        let parts = run(&[body.as_bytes()]);
        assert_eq!(parts[0].1.as_deref(), Some("résumé.pdf"));
        assert_eq!(parts[0].3, b"x");
    }

    #[test]
    fn body_chunks_are_emitted_before_the_part_ends() {
        let head = format!("--{BOUNDARY}\r\nContent-Disposition: form-data; name=\"big\"\r\n\r\n");
        let mut parser = MultipartParser::new(BOUNDARY);
        parser.feed(head.as_bytes()).unwrap();
        let events = parser.feed(&[b'z'; 4096]).unwrap();
        let streamed: usize = events
            .iter()
            .map(|e| match e {
                MultipartEvent::PartChunk(c) => c.len(),
                _ => 0,
            })
            .sum();
        assert_eq!(streamed, 4096 - (BOUNDARY.len() + 3));
        assert!(!events.contains(&MultipartEvent::PartEnd));
    }
}
