//! Decoding of watch responses.
//!
//! A watch response body carries one JSON object per line:
//! `{"type": "ADDED" | "MODIFIED" | "DELETED" | "ERROR", "object": ...}`.
//! [`decode_watch`] turns such a body into a lazy stream of [`WatchEvent`]s.
//!
//! The stream never fails. A line that cannot be decoded becomes a
//! [`WatchEvent::Error`] in its position and decoding carries on. A closed
//! or severed body ends the stream; reconnecting (with a `resourceVersion`
//! to resume from) is left to the caller.

use std::{io, pin::pin};

use bytes::{Buf, Bytes};
use futures::{
    future::{self, Either},
    stream, Stream, StreamExt,
};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::Status;
use serde::{de::DeserializeOwned, Deserialize};
use tokio::io::AsyncRead;
use tokio_util::{
    codec::{AnyDelimiterCodec, AnyDelimiterCodecError, FramedRead},
    io::StreamReader,
    sync::CancellationToken,
};

/// The kind of change a [`WatchEvent`] reports.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventType {
    Added,
    Modified,
    Deleted,
    Error,
}

/// One decoded watch event.
#[derive(Debug, Clone, PartialEq)]
pub enum WatchEvent<T> {
    Added(T),
    Modified(T),
    Deleted(T),
    Error(WatchError),
}

/// Why a watch event is an error.
#[derive(Debug, Clone, PartialEq)]
pub enum WatchError {
    /// The server sent an `ERROR` event, e.g. `410 Gone` for an expired resource version.
    Status(Status),
    /// The line could not be decoded.
    Malformed(MalformedWatchEvent),
}

/// A line of the watch body that is not a valid event.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("malformed watch event: {reason}")]
pub struct MalformedWatchEvent {
    /// The offending line, lossily decoded and trimmed.
    pub line: String,
    pub reason: String,
}

impl<T> WatchEvent<T> {
    pub fn event_type(&self) -> EventType {
        match self {
            Self::Added(_) => EventType::Added,
            Self::Modified(_) => EventType::Modified,
            Self::Deleted(_) => EventType::Deleted,
            Self::Error(_) => EventType::Error,
        }
    }

    pub fn object(&self) -> Option<&T> {
        match self {
            Self::Added(object) | Self::Modified(object) | Self::Deleted(object) => Some(object),
            Self::Error(_) => None,
        }
    }

    pub fn into_object(self) -> Option<T> {
        match self {
            Self::Added(object) | Self::Modified(object) | Self::Deleted(object) => Some(object),
            Self::Error(_) => None,
        }
    }
}

#[derive(Deserialize)]
struct RawEvent {
    #[serde(rename = "type")]
    event_type: String,
    object: serde_json::Value,
}

/// Longest line [`decode_watch`] buffers before giving up on the body.
pub const MAX_LINE_LENGTH: usize = 16 * 1024 * 1024;

/// Decodes a watch body read from `reader`.
///
/// Each poll waits until a full line arrives, the body ends, or `cancel`
/// fires. On cancellation the stream ends at once and `reader` is dropped,
/// even while the stream value itself is still alive. A line longer than
/// [`MAX_LINE_LENGTH`] ends the stream like a severed body. Once ended, the
/// stream keeps yielding `None`.
pub fn decode_watch<T, R>(reader: R, cancel: CancellationToken) -> impl Stream<Item = WatchEvent<T>>
where
    T: DeserializeOwned,
    R: AsyncRead,
{
    decode_lines(reader, cancel, MAX_LINE_LENGTH)
}

fn decode_lines<T, R>(
    reader: R,
    cancel: CancellationToken,
    max_length: usize,
) -> impl Stream<Item = WatchEvent<T>>
where
    T: DeserializeOwned,
    R: AsyncRead,
{
    let frames = FramedRead::new(
        Box::pin(reader),
        AnyDelimiterCodec::new_with_max_length(vec![b'\n'], vec![b'\n'], max_length),
    );

    stream::unfold(frames, move |mut frames| {
        let cancel = cancel.clone();
        async move {
            loop {
                let next = {
                    let cancelled = pin!(cancel.cancelled());
                    match future::select(cancelled, frames.next()).await {
                        Either::Left(_) => None,
                        Either::Right((frame, _)) => Some(frame),
                    }
                };

                match next {
                    None => {
                        log::debug!("watch cancelled, releasing the response body");
                        return None;
                    }
                    Some(None) => {
                        log::debug!("watch response body closed");
                        return None;
                    }
                    Some(Some(Err(AnyDelimiterCodecError::MaxChunkLengthExceeded))) => {
                        log::warn!("watch line exceeds {max_length} bytes, dropping the response body");
                        return None;
                    }
                    Some(Some(Err(err))) => {
                        log::debug!("watch response body severed: {err}");
                        return None;
                    }
                    Some(Some(Ok(line))) => {
                        if let Some(event) = parse_line(&line) {
                            return Some((event, frames));
                        }
                    }
                }
            }
        }
    })
    .fuse()
}

/// Decodes a watch body delivered as a stream of chunks.
///
/// Chunk boundaries need not align with lines. A chunk error severs the body.
pub fn decode_watch_chunks<T, S, B, E>(
    chunks: S,
    cancel: CancellationToken,
) -> impl Stream<Item = WatchEvent<T>>
where
    T: DeserializeOwned,
    S: Stream<Item = Result<B, E>>,
    B: Buf,
    E: Into<io::Error>,
{
    decode_watch(StreamReader::new(chunks), cancel)
}

fn parse_line<T: DeserializeOwned>(line: &Bytes) -> Option<WatchEvent<T>> {
    if line.iter().all(u8::is_ascii_whitespace) {
        return None;
    }

    let malformed = |reason: String| {
        WatchEvent::Error(WatchError::Malformed(MalformedWatchEvent {
            line: String::from_utf8_lossy(line).trim().to_owned(),
            reason,
        }))
    };

    let raw: RawEvent = match serde_json::from_slice(line) {
        Ok(raw) => raw,
        Err(err) => return Some(malformed(err.to_string())),
    };

    let event = match raw.event_type.as_str() {
        "ADDED" => serde_json::from_value(raw.object).map(WatchEvent::Added),
        "MODIFIED" => serde_json::from_value(raw.object).map(WatchEvent::Modified),
        "DELETED" => serde_json::from_value(raw.object).map(WatchEvent::Deleted),
        "ERROR" => serde_json::from_value(raw.object)
            .map(|status| WatchEvent::Error(WatchError::Status(status))),
        other => return Some(malformed(format!("unsupported event type '{other}'"))),
    };
    Some(event.unwrap_or_else(|err| malformed(err.to_string())))
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use k8s_openapi::api::core::v1::ConfigMap;

    use super::*;

    fn added(name: &str) -> String {
        format!(
            r#"{{"type":"ADDED","object":{{"apiVersion":"v1","kind":"ConfigMap","metadata":{{"name":"{name}"}}}}}}"#
        )
    }

    fn name(event: &WatchEvent<ConfigMap>) -> Option<&str> {
        event.object()?.metadata.name.as_deref()
    }

    async fn decode_all(body: String) -> Vec<WatchEvent<ConfigMap>> {
        decode_watch(io::Cursor::new(body.into_bytes()), CancellationToken::new())
            .collect()
            .await
    }

    #[tokio::test]
    async fn yields_events_in_order_then_ends() {
        let body = format!("{}\n{}\n{}\n", added("a"), added("b"), added("c"));
        let events = decode_all(body).await;

        let names: Vec<_> = events.iter().map(name).collect();
        assert_eq!(names, [Some("a"), Some("b"), Some("c")]);
        assert!(events.iter().all(|e| e.event_type() == EventType::Added));
    }

    #[tokio::test]
    async fn malformed_lines_become_error_events_in_place() {
        let body = format!("{}\n{{\"type\": \"ADDED\", \"obj\n{}\n", added("a"), added("c"));
        let events = decode_all(body).await;

        assert_eq!(events.len(), 3);
        assert_eq!(name(&events[0]), Some("a"));
        match &events[1] {
            WatchEvent::Error(WatchError::Malformed(err)) => {
                assert!(err.line.starts_with("{\"type\""), "{}", err.line);
            }
            other => panic!("unexpected {other:?}"),
        }
        assert_eq!(name(&events[2]), Some("c"));
    }

    #[tokio::test]
    async fn decodes_every_event_type() {
        let body = [
            added("a"),
            added("b").replace("ADDED", "MODIFIED"),
            added("b").replace("ADDED", "DELETED"),
            r#"{"type":"ERROR","object":{"apiVersion":"v1","kind":"Status","status":"Failure","reason":"Expired","code":410}}"#.to_owned(),
            r#"{"type":"BOOKMARK","object":{}}"#.to_owned(),
        ]
        .join("\n");
        let events = decode_all(body).await;

        let types: Vec<_> = events.iter().map(WatchEvent::event_type).collect();
        assert_eq!(
            types,
            [
                EventType::Added,
                EventType::Modified,
                EventType::Deleted,
                EventType::Error,
                EventType::Error,
            ]
        );
        match &events[3] {
            WatchEvent::Error(WatchError::Status(status)) => {
                assert_eq!(status.code, Some(410));
                assert_eq!(status.reason.as_deref(), Some("Expired"));
            }
            other => panic!("unexpected {other:?}"),
        }
        match &events[4] {
            WatchEvent::Error(WatchError::Malformed(err)) => assert!(err.reason.contains("BOOKMARK")),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[tokio::test]
    async fn payloads_of_the_wrong_shape_are_malformed() {
        let body = r#"{"type":"ADDED","object":{"metadata":"not an object"}}"#.to_owned();
        let events = decode_all(body).await;
        assert!(matches!(
            events.as_slice(),
            [WatchEvent::Error(WatchError::Malformed(_))]
        ));
    }

    #[tokio::test]
    async fn blank_lines_are_skipped() {
        let body = format!("\n{}\r\n\n  \n{}", added("a"), added("b"));
        let events = decode_all(body).await;
        let names: Vec<_> = events.iter().map(name).collect();
        assert_eq!(names, [Some("a"), Some("b")]);
    }

    #[tokio::test]
    async fn reassembles_lines_split_across_chunks() {
        let body = format!("{}\n{}\n", added("a"), added("b"));
        let (head, tail) = body.split_at(17);
        let chunks = stream::iter([
            Ok::<_, io::Error>(Bytes::copy_from_slice(head.as_bytes())),
            Ok(Bytes::copy_from_slice(tail.as_bytes())),
        ]);

        let events: Vec<WatchEvent<ConfigMap>> =
            decode_watch_chunks(chunks, CancellationToken::new()).collect().await;
        let names: Vec<_> = events.iter().map(name).collect();
        assert_eq!(names, [Some("a"), Some("b")]);
    }

    #[tokio::test]
    async fn severed_bodies_end_the_stream_quietly() {
        let chunks = stream::iter([
            Ok(Bytes::from(format!("{}\n", added("a")))),
            Err(io::Error::new(io::ErrorKind::ConnectionReset, "reset")),
            Ok(Bytes::from(format!("{}\n", added("b")))),
        ]);

        let events: Vec<WatchEvent<ConfigMap>> =
            decode_watch_chunks(chunks, CancellationToken::new()).collect().await;
        assert_eq!(events.len(), 1);
        assert_eq!(name(&events[0]), Some("a"));
    }

    #[tokio::test]
    async fn oversized_lines_end_the_stream() {
        let body = format!("{}\n{}\n{}\n", added("a"), "x".repeat(4096), added("c"));
        let events: Vec<WatchEvent<ConfigMap>> =
            decode_lines(io::Cursor::new(body), CancellationToken::new(), 1024)
                .collect()
                .await;
        assert_eq!(events.len(), 1);
        assert_eq!(name(&events[0]), Some("a"));
    }

    #[tokio::test]
    async fn cancellation_ends_a_waiting_stream_and_releases_the_body() {
        let body_handle = Arc::new(());
        let held = Arc::clone(&body_handle);
        let chunks = stream::iter([Ok::<_, io::Error>(Bytes::from(format!("{}\n", added("a"))))])
            .chain(stream::pending())
            .map(move |chunk| {
                let _ = held.as_ref();
                chunk
            });

        let cancel = CancellationToken::new();
        let mut events = Box::pin(decode_watch_chunks::<ConfigMap, _, _, _>(chunks, cancel.clone()));

        let first = events.next().await.unwrap();
        assert_eq!(name(&first), Some("a"));

        let (next, ()) = futures::join!(events.next(), async { cancel.cancel() });
        assert!(next.is_none());
        assert_eq!(Arc::strong_count(&body_handle), 1);
        assert!(events.next().await.is_none());
    }
}
