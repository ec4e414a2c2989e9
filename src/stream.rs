//! Streaming wire formats.
//!
//! # Internal line protocol
//!
//! The native endpoint streams `text/plain` lines, each a one-character tag,
//! a colon, and a JSON value:
//!
//! ```text
//! 8:{"sources":[{"url":"…","title":"…","snippet":"…"}]}   exactly once, first
//! 0:"fragment"                                           zero or more
//! ```
//!
//! # OpenAI-compatible event stream
//!
//! [`ChatStreamTranscoder`] turns a line-protocol byte stream into
//! `chat.completion.chunk` server-sent events: an opening role chunk, one
//! chunk per text fragment, a chunk with `finish_reason: "stop"`, and the
//! `data: [DONE]` sentinel. The closing pair is emitted even when the input
//! fails midway.

use futures_util::stream::{self, BoxStream, Stream, StreamExt};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::collections::VecDeque;
use std::fmt::Display;

use crate::models::Source;

/// Terminating event of an OpenAI-compatible stream.
pub const DONE_EVENT: &str = "data: [DONE]\n\n";

const SOURCES_TAG: &str = "8:";
const TEXT_TAG: &str = "0:";

/// One line of the internal protocol.
#[derive(Debug, Clone, PartialEq)]
pub enum LineEvent {
    Sources(Vec<Source>),
    Text(String),
}

impl LineEvent {
    /// The exact bytes of this event, trailing newline included.
    pub fn encode(&self) -> String {
        match self {
            LineEvent::Sources(sources) => {
                let payload = serde_json::to_string(&SourcesPayload { sources })
                    .unwrap_or_else(|_| r#"{"sources":[]}"#.to_string());
                format!("{}{}\n", SOURCES_TAG, payload)
            }
            LineEvent::Text(text) => {
                format!("{}{}\n", TEXT_TAG, Value::String(text.clone()))
            }
        }
    }
}

#[derive(Serialize)]
struct SourcesPayload<'a> {
    sources: &'a [Source],
}

/// Reassembles newline-terminated lines from arbitrarily split chunks.
///
/// Bytes are buffered until a `\n` arrives, so a multi-byte character split
/// across chunks is decoded intact. A trailing `\r` is stripped.
#[derive(Debug, Default)]
pub struct LineBuffer {
    pending: Vec<u8>,
}

impl LineBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a chunk and return every line it completed.
    pub fn push(&mut self, chunk: &[u8]) -> Vec<String> {
        self.pending.extend_from_slice(chunk);
        let mut lines = Vec::new();
        while let Some(pos) = self.pending.iter().position(|&b| b == b'\n') {
            let raw: Vec<u8> = self.pending.drain(..=pos).collect();
            lines.push(decode_line(&raw[..raw.len() - 1]));
        }
        lines
    }

    /// The unterminated remainder, if any.
    pub fn finish(&mut self) -> Option<String> {
        if self.pending.is_empty() {
            return None;
        }
        let raw = std::mem::take(&mut self.pending);
        Some(decode_line(&raw))
    }
}

fn decode_line(raw: &[u8]) -> String {
    let raw = raw.strip_suffix(b"\r").unwrap_or(raw);
    String::from_utf8_lossy(raw).into_owned()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DecoderState {
    AwaitingSources,
    StreamingText,
    Done,
}

#[derive(Deserialize)]
struct SourcesLine {
    #[serde(default)]
    sources: Vec<Source>,
}

/// Incremental parser for the internal line protocol.
///
/// Blank lines, unknown tags, malformed JSON, and any sources line after the
/// first are skipped. Text arriving before a sources line is accepted.
#[derive(Debug)]
pub struct LineDecoder {
    lines: LineBuffer,
    state: DecoderState,
}

impl Default for LineDecoder {
    fn default() -> Self {
        Self::new()
    }
}

impl LineDecoder {
    pub fn new() -> Self {
        Self {
            lines: LineBuffer::new(),
            state: DecoderState::AwaitingSources,
        }
    }

    pub fn state(&self) -> DecoderState {
        self.state
    }

    pub fn push(&mut self, chunk: &[u8]) -> Vec<LineEvent> {
        if self.state == DecoderState::Done {
            return Vec::new();
        }
        self.lines
            .push(chunk)
            .into_iter()
            .filter_map(|line| self.decode(&line))
            .collect()
    }

    /// Flush an unterminated final line and stop accepting input.
    pub fn finish(&mut self) -> Vec<LineEvent> {
        if self.state == DecoderState::Done {
            return Vec::new();
        }
        let events = self
            .lines
            .finish()
            .and_then(|line| self.decode(&line))
            .into_iter()
            .collect();
        self.state = DecoderState::Done;
        events
    }

    fn decode(&mut self, line: &str) -> Option<LineEvent> {
        let line = line.trim();
        if line.is_empty() {
            return None;
        }

        if let Some(payload) = line.strip_prefix(SOURCES_TAG) {
            if self.state != DecoderState::AwaitingSources {
                return None;
            }
            let parsed: SourcesLine = serde_json::from_str(payload).ok()?;
            self.state = DecoderState::StreamingText;
            return Some(LineEvent::Sources(parsed.sources));
        }

        if let Some(payload) = line.strip_prefix(TEXT_TAG) {
            let text: String = serde_json::from_str(payload).ok()?;
            self.state = DecoderState::StreamingText;
            return Some(LineEvent::Text(text));
        }

        None
    }
}

/// Formats `chat.completion.chunk` events for one completion.
///
/// The id and `created` timestamp are fixed at construction and repeated on
/// every chunk.
#[derive(Debug, Clone)]
pub struct ChatStreamTranscoder {
    id: String,
    created: i64,
    model: String,
}

impl ChatStreamTranscoder {
    pub fn new(model: impl Into<String>) -> Self {
        let now = chrono::Utc::now();
        Self::with_identity(
            model,
            format!("chatcmpl-{}", now.timestamp_millis()),
            now.timestamp(),
        )
    }

    pub fn with_identity(model: impl Into<String>, id: impl Into<String>, created: i64) -> Self {
        Self {
            id: id.into(),
            created,
            model: model.into(),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn created(&self) -> i64 {
        self.created
    }

    fn event(&self, delta: Value, finish_reason: Option<&str>) -> String {
        let chunk = json!({
            "id": self.id,
            "object": "chat.completion.chunk",
            "created": self.created,
            "model": self.model,
            "choices": [{
                "index": 0,
                "delta": delta,
                "finish_reason": finish_reason,
            }],
        });
        format!("data: {}\n\n", chunk)
    }

    pub fn role_event(&self) -> String {
        self.event(json!({ "role": "assistant", "content": "" }), None)
    }

    pub fn text_event(&self, text: &str) -> String {
        self.event(json!({ "content": text }), None)
    }

    pub fn stop_event(&self) -> String {
        self.event(json!({}), Some("stop"))
    }

    /// Adapt a line-protocol byte stream into the event stream.
    ///
    /// Sources lines are dropped. An input error is logged and closes the
    /// stream normally.
    pub fn transcode<S, B, E>(self, input: S) -> BoxStream<'static, String>
    where
        S: Stream<Item = Result<B, E>> + Send + 'static,
        B: AsRef<[u8]> + Send + 'static,
        E: Display + Send + 'static,
    {
        let state = TranscodeState {
            transcoder: self,
            input: input.boxed(),
            input_done: false,
            decoder: LineDecoder::new(),
            pending: VecDeque::new(),
            phase: Phase::Opening,
        };

        stream::unfold(state, |mut st| async move {
            loop {
                match st.phase {
                    Phase::Opening => {
                        st.phase = Phase::Relaying;
                        let event = st.transcoder.role_event();
                        return Some((event, st));
                    }
                    Phase::Relaying => {
                        if let Some(text) = st.pending.pop_front() {
                            let event = st.transcoder.text_event(&text);
                            return Some((event, st));
                        }
                        if st.input_done {
                            st.phase = Phase::Closing;
                            continue;
                        }
                        match st.input.next().await {
                            Some(Ok(chunk)) => {
                                let events = st.decoder.push(chunk.as_ref());
                                st.enqueue(events);
                            }
                            Some(Err(e)) => {
                                tracing::warn!(error = %e, "line stream failed, closing completion");
                                st.input_done = true;
                            }
                            None => {
                                let events = st.decoder.finish();
                                st.enqueue(events);
                                st.input_done = true;
                            }
                        }
                    }
                    Phase::Closing => {
                        st.phase = Phase::Sentinel;
                        let event = st.transcoder.stop_event();
                        return Some((event, st));
                    }
                    Phase::Sentinel => {
                        st.phase = Phase::Ended;
                        return Some((DONE_EVENT.to_string(), st));
                    }
                    Phase::Ended => return None,
                }
            }
        })
        .boxed()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Opening,
    Relaying,
    Closing,
    Sentinel,
    Ended,
}

struct TranscodeState<B, E> {
    transcoder: ChatStreamTranscoder,
    input: BoxStream<'static, Result<B, E>>,
    input_done: bool,
    decoder: LineDecoder,
    pending: VecDeque<String>,
    phase: Phase,
}

impl<B, E> TranscodeState<B, E> {
    fn enqueue(&mut self, events: Vec<LineEvent>) {
        for event in events {
            if let LineEvent::Text(text) = event {
                if !text.is_empty() {
                    self.pending.push_back(text);
                }
            }
        }
    }
}
