//! Server-Sent Events decoding for streaming chat completions.
//!
//! Only the parts chat APIs use are handled: `data:` and `event:` fields,
//! multi-line data, comments, and both `\n` and `\r\n` line endings. Bytes
//! are buffered until a full line is available so multi-byte UTF-8 sequences
//! split across network chunks decode correctly.

use std::pin::Pin;
use std::task::{Context, Poll};

use bytes::{Buf, Bytes, BytesMut};
use futures::Stream;

/// One dispatched SSE event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SseEvent {
    pub event: Option<String>,
    pub data: String,
}

#[derive(Default)]
struct PendingEvent {
    event: Option<String>,
    data: Vec<String>,
}

impl PendingEvent {
    fn take(&mut self) -> Option<SseEvent> {
        if self.data.is_empty() && self.event.is_none() {
            return None;
        }
        let pending = std::mem::take(self);
        Some(SseEvent {
            event: pending.event,
            data: pending.data.join("\n"),
        })
    }

    /// Apply one line; returns a completed event on a blank line.
    fn apply(&mut self, line: &str) -> Option<SseEvent> {
        if line.is_empty() {
            return self.take();
        }
        if line.starts_with(':') {
            return None;
        }

        let (field, value) = match line.split_once(':') {
            Some((field, value)) => (field, value.strip_prefix(' ').unwrap_or(value)),
            None => (line, ""),
        };
        match field {
            "data" => self.data.push(value.to_string()),
            "event" => self.event = Some(value.to_string()),
            _ => {}
        }
        None
    }
}

/// Adapts a byte stream into a stream of [`SseEvent`]s.
pub struct SseEventStream<S> {
    inner: S,
    buffer: BytesMut,
    pending: PendingEvent,
    finished: bool,
}

impl<S> SseEventStream<S> {
    pub fn new(inner: S) -> Self {
        Self {
            inner,
            buffer: BytesMut::new(),
            pending: PendingEvent::default(),
            finished: false,
        }
    }

    fn next_line(&mut self) -> Option<String> {
        let end = self.buffer.iter().position(|b| *b == b'\n')?;
        let mut line = self.buffer.split_to(end);
        self.buffer.advance(1);
        if line.last() == Some(&b'\r') {
            line.truncate(line.len() - 1);
        }
        Some(String::from_utf8_lossy(&line).into_owned())
    }
}

impl<S, E> Stream for SseEventStream<S>
where
    S: Stream<Item = Result<Bytes, E>> + Unpin,
{
    type Item = Result<SseEvent, E>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = &mut *self;
        loop {
            while let Some(line) = this.next_line() {
                if let Some(event) = this.pending.apply(&line) {
                    return Poll::Ready(Some(Ok(event)));
                }
            }

            if this.finished {
                // Trailing line without a newline, then any undispatched event.
                if !this.buffer.is_empty() {
                    let rest = std::mem::take(&mut this.buffer);
                    this.pending.apply(&String::from_utf8_lossy(&rest));
                }
                return Poll::Ready(this.pending.take().map(Ok));
            }

            match Pin::new(&mut this.inner).poll_next(cx) {
                Poll::Ready(Some(Ok(bytes))) => this.buffer.extend_from_slice(&bytes),
                Poll::Ready(Some(Err(e))) => return Poll::Ready(Some(Err(e))),
                Poll::Ready(None) => this.finished = true,
                Poll::Pending => return Poll::Pending,
            }
        }
    }
}
