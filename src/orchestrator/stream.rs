// Stream plumbing: event emission into the response channel and word-level
// re-chunking of model output.
use crate::schemas::StreamEvent;
use serde_json::Value;
use tokio::sync::mpsc;

#[derive(Clone)]
pub struct EventEmitter {
    sender: mpsc::Sender<StreamEvent>,
}

impl EventEmitter {
    pub fn new(sender: mpsc::Sender<StreamEvent>) -> Self {
        Self { sender }
    }

    /// A closed receiver means the client went away; events are dropped.
    pub async fn emit(&self, event: &str, data: Value) {
        let _ = self.sender.send(StreamEvent::new(event, data)).await;
    }
}

/// Re-chunks streamed text at word boundaries. `push` returns the complete
/// words (each with its trailing whitespace) accumulated so far; a partial
/// trailing word stays buffered until the next delta or `flush`.
#[derive(Debug, Default)]
pub struct WordChunker {
    buffer: String,
}

impl WordChunker {
    pub fn push(&mut self, delta: &str) -> Vec<String> {
        self.buffer.push_str(delta);
        let mut chunks = Vec::new();
        loop {
            let mut split_at = None;
            let mut in_word = false;
            let mut after_word_ws = false;
            for (idx, ch) in self.buffer.char_indices() {
                if ch.is_whitespace() {
                    if in_word {
                        after_word_ws = true;
                    }
                } else {
                    if after_word_ws {
                        split_at = Some(idx);
                        break;
                    }
                    in_word = true;
                }
            }
            let Some(idx) = split_at else {
                break;
            };
            let rest = self.buffer.split_off(idx);
            chunks.push(std::mem::replace(&mut self.buffer, rest));
        }
        chunks
    }

    pub fn flush(&mut self) -> Option<String> {
        if self.buffer.is_empty() {
            None
        } else {
            Some(std::mem::take(&mut self.buffer))
        }
    }
}
