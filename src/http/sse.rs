//! Server-sent event streams.
//!
//! A handler opens the stream with `RequestContext::send_sse`, which sends
//! the `text/event-stream` headers immediately and returns an [`SseSender`].
//! Events travel over a bounded channel into the response body, so a slow
//! client applies backpressure to the writer.

use axum::body::Body;
use axum::http::{header, HeaderMap, HeaderValue};
use bytes::Bytes;
use serde::Serialize;
use std::convert::Infallible;
use thiserror::Error;
use tokio::sync::mpsc;

const CHANNEL_CAPACITY: usize = 32;

const PREAMBLE: &str = ": This page is a server-sent event stream. It will continue loading until you close it.\n\
: https://html.spec.whatwg.org/multipage/server-sent-events.html#server-sent-events\n\
\n";

#[derive(Debug, Error)]
pub enum SseError {
    #[error("retry interval must be a non-negative number of milliseconds, got {0}")]
    InvalidRetry(i64),

    #[error("event name cannot contain newlines")]
    InvalidEventName,

    #[error("event id cannot contain newlines")]
    InvalidEventId,

    #[error("event data could not be serialized: {0}")]
    Serialize(#[from] serde_json::Error),

    #[error("event stream closed by the client")]
    Closed,
}

/// Writing half of an open event stream.
#[derive(Debug)]
pub struct SseSender {
    tx: mpsc::Sender<Bytes>,
    retry_ms: u64,
}

impl SseSender {
    /// Emit one event. An empty `event_name` or `event_id` omits that field.
    pub async fn write<T: Serialize>(
        &self,
        event_name: &str,
        data: &T,
        event_id: &str,
    ) -> Result<(), SseError> {
        let frame = format_event(event_name, data, event_id, self.retry_ms)?;
        self.tx
            .send(Bytes::from(frame))
            .await
            .map_err(|_| SseError::Closed)
    }

    /// Finish the stream.
    pub fn close(self) {}
}

/// Validate the retry interval and build the response pieces for a stream.
pub(crate) fn open(retry_ms: i64) -> Result<(HeaderMap, Body, SseSender), SseError> {
    let retry_ms = u64::try_from(retry_ms).map_err(|_| SseError::InvalidRetry(retry_ms))?;

    let mut headers = HeaderMap::new();
    headers.insert(header::CONTENT_TYPE, HeaderValue::from_static("text/event-stream"));
    headers.insert(header::CACHE_CONTROL, HeaderValue::from_static("no-cache"));
    headers.insert(header::CONNECTION, HeaderValue::from_static("keep-alive"));
    headers.insert("x-accel-buffering", HeaderValue::from_static("no"));

    let (tx, rx) = mpsc::channel::<Bytes>(CHANNEL_CAPACITY);
    let preamble = futures_util::stream::once(async { Ok::<_, Infallible>(Bytes::from_static(PREAMBLE.as_bytes())) });
    let events = futures_util::stream::unfold(rx, |mut rx| async move {
        rx.recv().await.map(|frame| (Ok::<_, Infallible>(frame), rx))
    });
    let body = Body::from_stream(futures_util::StreamExt::chain(preamble, events));

    Ok((headers, body, SseSender { tx, retry_ms }))
}

/// Render one event in the SSE wire format.
pub fn format_event<T: Serialize>(
    event_name: &str,
    data: &T,
    event_id: &str,
    retry_ms: u64,
) -> Result<String, SseError> {
    if event_name.contains('\n') || event_name.contains('\r') {
        return Err(SseError::InvalidEventName);
    }
    if event_id.contains('\n') || event_id.contains('\r') {
        return Err(SseError::InvalidEventId);
    }

    let mut lines = Vec::with_capacity(4);
    if !event_name.is_empty() {
        lines.push(format!("event: {event_name}"));
    }
    lines.push(format!("data: {}", serde_json::to_string(data)?));
    if !event_id.is_empty() {
        lines.push(format!("id: {event_id}"));
    }
    if retry_ms > 0 {
        lines.push(format!("retry: {retry_ms}"));
    }
    Ok(lines.join("\n") + "\n\n")
}
