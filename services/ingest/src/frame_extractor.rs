//! Incremental extraction of JSON-array frames from a chunked byte stream.
//!
//! The upstream writes one JSON array per flush, separated by newlines, but
//! HTTP chunk boundaries fall anywhere: a chunk may carry several arrays, a
//! fraction of one, or the tail of one and the head of the next.

use bytes::{Buf, BytesMut};
use serde_json::Value;

/// Extract every complete leading array frame from `buffer`.
///
/// Returns the elements of all parsed frames, in order, and the unconsumed
/// remainder. Extraction stops at the first frame that is incomplete or does
/// not parse; that frame and everything after it stay in the remainder.
pub fn extract(buffer: &[u8]) -> (Vec<Value>, &[u8]) {
    let mut items = Vec::new();
    let mut pos = 0;

    while let Some(start) = find_byte(buffer, pos, b'[') {
        let Some(end) = matching_close(buffer, start) else {
            break;
        };

        match serde_json::from_slice::<Vec<Value>>(&buffer[start..=end]) {
            Ok(frame) => {
                items.extend(frame);
                pos = end + 1;
            }
            Err(_) => break,
        }
    }

    (items, &buffer[pos..])
}

fn find_byte(buffer: &[u8], from: usize, byte: u8) -> Option<usize> {
    buffer[from..]
        .iter()
        .position(|b| *b == byte)
        .map(|offset| from + offset)
}

/// Index of the `]` closing the array opened at `start`, skipping brackets
/// inside string literals.
fn matching_close(buffer: &[u8], start: usize) -> Option<usize> {
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;

    for (index, byte) in buffer.iter().enumerate().skip(start) {
        if in_string {
            match byte {
                _ if escaped => escaped = false,
                b'\\' => escaped = true,
                b'"' => in_string = false,
                _ => {}
            }
            continue;
        }

        match byte {
            b'"' => in_string = true,
            b'[' => depth += 1,
            b']' => {
                depth -= 1;
                if depth == 0 {
                    return Some(index);
                }
            }
            _ => {}
        }
    }

    None
}

/// Append-only session buffer feeding [`extract`].
#[derive(Debug, Default)]
pub struct FrameBuffer {
    buffer: BytesMut,
}

impl FrameBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a network chunk and return the items of every frame it completes.
    pub fn push(&mut self, chunk: &[u8]) -> Vec<Value> {
        self.buffer.extend_from_slice(chunk);

        let (items, remainder) = extract(&self.buffer);
        let consumed = self.buffer.len() - remainder.len();
        self.buffer.advance(consumed);

        items
    }

    /// Bytes held back waiting for the rest of a frame
    pub fn len(&self) -> usize {
        self.buffer.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.buffer
    }
}
