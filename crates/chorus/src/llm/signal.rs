//! Explicit continuation signals embedded in model output.
//!
//! Models report the signal as a trailing fenced block:
//!
//! ````text
//! ```continuation
//! {"status": "CONTINUE", "reason": "two files left", "progress": {"currentStep": 2}}
//! ```
//! ````
//!
//! The block is stripped from the content and never streamed to the client.

use tracing::debug;

use crate::agent::ContinuationSignal;

const SIGNAL_FENCE: &str = "```continuation";
const CLOSING_FENCE: &str = "```";

/// Split `content` into visible text and the parsed signal, if any.
///
/// A block that fails to parse is left in place.
pub fn extract_signal(content: &str) -> (String, Option<ContinuationSignal>) {
    let Some(start) = content.rfind(SIGNAL_FENCE) else {
        return (content.to_string(), None);
    };

    let body = &content[start + SIGNAL_FENCE.len()..];
    let (json, after) = match body.find(CLOSING_FENCE) {
        Some(end) => (&body[..end], &body[end + CLOSING_FENCE.len()..]),
        None => (body, ""),
    };

    match serde_json::from_str::<ContinuationSignal>(json.trim()) {
        Ok(signal) => {
            let before = content[..start].trim_end();
            let after = after.trim();
            let visible = if after.is_empty() {
                before.to_string()
            } else {
                format!("{before}\n{after}")
            };
            (visible, Some(signal))
        }
        Err(e) => {
            debug!(error = %e, "Ignoring malformed continuation block");
            (content.to_string(), None)
        }
    }
}

/// Holds back streamed text that might be the start of a signal block.
#[derive(Debug, Default)]
pub struct SignalFilter {
    held: String,
    in_signal: bool,
}

impl SignalFilter {
    /// Feed a delta; returns the text that is safe to stream now.
    pub fn push(&mut self, delta: &str) -> String {
        if self.in_signal {
            return String::new();
        }
        self.held.push_str(delta);

        if let Some(pos) = self.held.find(SIGNAL_FENCE) {
            self.in_signal = true;
            let visible = self.held[..pos].to_string();
            self.held.clear();
            return visible;
        }

        let split = self.held.len() - partial_fence_len(&self.held);
        self.held.drain(..split).collect()
    }

    /// Release whatever is still held once the stream ends.
    pub fn finish(&mut self) -> String {
        if self.in_signal {
            String::new()
        } else {
            std::mem::take(&mut self.held)
        }
    }
}

/// Length of the longest suffix of `text` that is a proper prefix of the fence.
fn partial_fence_len(text: &str) -> usize {
    let max = (SIGNAL_FENCE.len() - 1).min(text.len());
    (1..=max)
        .rev()
        .find(|&n| {
            let start = text.len() - n;
            text.is_char_boundary(start) && SIGNAL_FENCE.starts_with(&text[start..])
        })
        .unwrap_or(0)
}
