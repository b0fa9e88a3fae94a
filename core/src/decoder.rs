//! Server-sent event decoding for the message stream.
//!
//! The backend writes one `data: <json>` line per event. Segments from the
//! network split those lines (and UTF-8 sequences) at arbitrary points, so the
//! decoder holds raw bytes until a full line is available.

use crate::error::ChatError;
use crate::transport::ByteStream;
use chrono::{DateTime, Utc};
use futures::stream::{self, Stream, StreamExt};
use serde::Deserialize;
use std::collections::VecDeque;
use tracing::trace;

const DATA_PREFIX: &str = "data:";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamEvent {
    Chunk {
        text: String,
    },
    Completion {
        durable_id: String,
        created_at: Option<DateTime<Utc>>,
    },
    Failure {
        reason: String,
    },
}

#[derive(Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
enum WirePayload {
    Chunk {
        content: String,
    },
    Done {
        #[serde(rename = "messageId")]
        message_id: String,
        #[serde(rename = "createdAt", default)]
        created_at: Option<DateTime<Utc>>,
    },
    Error {
        #[serde(default)]
        message: String,
    },
}

impl From<WirePayload> for StreamEvent {
    fn from(payload: WirePayload) -> Self {
        match payload {
            WirePayload::Chunk { content } => Self::Chunk { text: content },
            WirePayload::Done {
                message_id,
                created_at,
            } => Self::Completion {
                durable_id: message_id,
                created_at,
            },
            WirePayload::Error { message } if message.trim().is_empty() => Self::Failure {
                reason: "Failed to send message".to_string(),
            },
            WirePayload::Error { message } => Self::Failure { reason: message },
        }
    }
}

/// A `data:` line that could not be read as an event.
#[derive(Debug)]
struct Malformed(String);

/// Incremental line decoder. Use one per streamed call.
#[derive(Debug, Default)]
pub struct StreamDecoder {
    buffer: Vec<u8>,
    // Start of the bytes not yet handed out as a line.
    consumed: usize,
    // Everything before this offset is known to hold no newline.
    scanned: usize,
}

impl StreamDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Buffers `bytes` and returns the events completed so far. Events left
    /// unread in the iterator are yielded by the next call.
    pub fn decode(&mut self, bytes: &[u8]) -> Events<'_> {
        self.buffer.extend_from_slice(bytes);
        Events { decoder: self }
    }

    /// Flushes whatever is left at end of data, including a final line that
    /// never got its newline.
    pub fn finish(mut self) -> Vec<StreamEvent> {
        let mut events: Vec<StreamEvent> = self.decode(&[]).collect();
        let tail = &self.buffer[self.consumed..];
        if !tail.is_empty() {
            if let Some(event) = accept(parse_line(tail)) {
                events.push(event);
            }
        }
        events
    }

    pub fn buffered_len(&self) -> usize {
        self.buffer.len() - self.consumed
    }

    fn next_line_event(&mut self) -> Option<Option<StreamEvent>> {
        let newline = self.buffer[self.scanned..]
            .iter()
            .position(|byte| *byte == b'\n');
        match newline {
            Some(offset) => {
                let end = self.scanned + offset;
                let event = accept(parse_line(&self.buffer[self.consumed..end]));
                self.consumed = end + 1;
                self.scanned = self.consumed;
                Some(event)
            }
            None => {
                self.buffer.drain(..self.consumed);
                self.consumed = 0;
                self.scanned = self.buffer.len();
                None
            }
        }
    }
}

pub struct Events<'a> {
    decoder: &'a mut StreamDecoder,
}

impl Iterator for Events<'_> {
    type Item = StreamEvent;

    fn next(&mut self) -> Option<StreamEvent> {
        loop {
            match self.decoder.next_line_event()? {
                Some(event) => return Some(event),
                None => continue,
            }
        }
    }
}

fn accept(parsed: Result<Option<StreamEvent>, Malformed>) -> Option<StreamEvent> {
    match parsed {
        Ok(event) => event,
        Err(Malformed(reason)) => {
            // Tolerated for keep-alive noise; revisit once the backend's
            // keep-alive convention is pinned down.
            trace!(%reason, "dropping malformed stream line");
            None
        }
    }
}

fn parse_line(line: &[u8]) -> Result<Option<StreamEvent>, Malformed> {
    let line = line.strip_suffix(b"\r").unwrap_or(line);
    let text = std::str::from_utf8(line).map_err(|err| Malformed(err.to_string()))?;
    let Some(payload) = text.strip_prefix(DATA_PREFIX) else {
        return Ok(None);
    };
    let payload = payload.strip_prefix(' ').unwrap_or(payload);
    serde_json::from_str::<WirePayload>(payload)
        .map(|payload| Some(payload.into()))
        .map_err(|err| Malformed(err.to_string()))
}

/// Decodes a streamed body into events, in arrival order. A transport error
/// is yielded once and ends the stream.
pub fn event_stream(body: ByteStream) -> impl Stream<Item = Result<StreamEvent, ChatError>> + Send {
    struct State {
        body: ByteStream,
        decoder: StreamDecoder,
        pending: VecDeque<StreamEvent>,
        done: bool,
    }

    let state = State {
        body,
        decoder: StreamDecoder::new(),
        pending: VecDeque::new(),
        done: false,
    };

    stream::unfold(state, |mut state| async move {
        loop {
            if let Some(event) = state.pending.pop_front() {
                return Some((Ok(event), state));
            }
            if state.done {
                return None;
            }
            match state.body.next().await {
                Some(Ok(segment)) => {
                    state.pending.extend(state.decoder.decode(&segment));
                }
                Some(Err(err)) => {
                    state.done = true;
                    return Some((Err(err), state));
                }
                None => {
                    state.done = true;
                    let decoder = std::mem::take(&mut state.decoder);
                    state.pending.extend(decoder.finish());
                }
            }
        }
    })
}
