//! Server-sent event bodies turned into text fragments.
//!
//! Network chunks are split at arbitrary byte positions, so lines are
//! reassembled with [`LineBuffer`] before any `data:` payload is inspected.
//!
//! A stream that ends before any non-blank fragment yields
//! [`GenerationError::EmptyResponse`], matching what the blocking calls
//! report for a blank answer.

use futures_util::stream::{self, BoxStream, StreamExt};
use std::collections::VecDeque;

use super::FragmentStream;
use crate::error::GenerationError;
use crate::stream::LineBuffer;

/// What one `data:` payload means to a provider.
pub(crate) enum SseStep {
    Fragment(String),
    Skip,
    Done,
    Fail(GenerationError),
}

struct SseState<F> {
    provider: String,
    body: BoxStream<'static, reqwest::Result<Vec<u8>>>,
    body_done: bool,
    lines: LineBuffer,
    pending: VecDeque<String>,
    extract: F,
    answered: bool,
    finished: bool,
}

impl<F> SseState<F> {
    /// End of input: nothing more, or the empty-answer error once.
    fn end(mut self) -> Option<(Result<String, GenerationError>, Self)> {
        self.finished = true;
        if self.answered {
            return None;
        }
        let err = GenerationError::EmptyResponse {
            provider: self.provider.clone(),
        };
        Some((Err(err), self))
    }
}

/// Map an event-stream response to fragments with `extract`.
///
/// `data: [DONE]` and [`SseStep::Done`] end the stream. Non-`data:` lines
/// (`event:`, comments, blanks) are ignored.
pub(crate) fn fragments<F>(provider: &str, resp: reqwest::Response, extract: F) -> FragmentStream
where
    F: Fn(&str) -> SseStep + Send + 'static,
{
    let state = SseState {
        provider: provider.to_string(),
        body: resp.bytes_stream().map(|r| r.map(|b| b.to_vec())).boxed(),
        body_done: false,
        lines: LineBuffer::new(),
        pending: VecDeque::new(),
        extract,
        answered: false,
        finished: false,
    };

    stream::unfold(state, |mut st| async move {
        loop {
            if st.finished {
                return None;
            }

            if let Some(line) = st.pending.pop_front() {
                let Some(data) = line.strip_prefix("data:") else {
                    continue;
                };
                let data = data.trim();
                if data == "[DONE]" {
                    return st.end();
                }
                match (st.extract)(data) {
                    SseStep::Fragment(text) => {
                        if !text.trim().is_empty() {
                            st.answered = true;
                        }
                        return Some((Ok(text), st));
                    }
                    SseStep::Skip => continue,
                    SseStep::Done => return st.end(),
                    SseStep::Fail(e) => {
                        st.finished = true;
                        return Some((Err(e), st));
                    }
                }
            }

            if st.body_done {
                return st.end();
            }

            match st.body.next().await {
                Some(Ok(bytes)) => {
                    let lines = st.lines.push(&bytes);
                    st.pending.extend(lines);
                }
                Some(Err(e)) => {
                    st.finished = true;
                    let err = GenerationError::from_reqwest(&st.provider, e);
                    return Some((Err(err), st));
                }
                None => {
                    st.body_done = true;
                    if let Some(rest) = st.lines.finish() {
                        st.pending.push_back(rest);
                    }
                }
            }
        }
    })
    .boxed()
}

/// Parse a payload as JSON, skipping keep-alives and malformed events.
pub(crate) fn parse_event(data: &str) -> Option<serde_json::Value> {
    if data.is_empty() {
        return None;
    }
    match serde_json::from_str(data) {
        Ok(value) => Some(value),
        Err(e) => {
            tracing::debug!(error = %e, "skipping malformed event payload");
            None
        }
    }
}
