//! Newline framing for byte streams.
//!
//! TCP delivers a stream of bytes, not messages.  A single `read()` may
//! return half a message, exactly one message, or three messages and the
//! first few bytes of a fourth.  [`FrameDecoder`] buffers whatever arrives
//! and hands back only complete lines:
//!
//! ```text
//! read #1: {"type":"AUTH_RE            -> []
//! read #2: Q"}\n{"type":"AUTH_SU       -> [{"type":"AUTH_REQ"}]
//! read #3: CCESS"}\n                   -> [{"type":"AUTH_SUCCESS"}]
//! ```

use crate::protocol::codec::ProtocolError;

/// Default upper bound for a single frame, delimiter excluded.
pub const DEFAULT_MAX_FRAME_BYTES: usize = 64 * 1024;

/// Incremental line splitter with a bounded carry-over buffer.
#[derive(Debug)]
pub struct FrameDecoder {
    buf: Vec<u8>,
    max_frame_len: usize,
}

impl FrameDecoder {
    /// Creates a decoder that rejects frames longer than `max_frame_len` bytes.
    pub fn new(max_frame_len: usize) -> Self {
        Self {
            buf: Vec::new(),
            max_frame_len,
        }
    }

    /// Appends `chunk` and returns every line completed by it, in order.
    ///
    /// A trailing `\r` is removed from each line and blank lines are skipped.
    /// Bytes after the last `\n` are kept for the next call.
    ///
    /// # Errors
    ///
    /// Returns [`ProtocolError::FrameTooLong`] when the carried-over partial
    /// frame grows beyond the limit (the buffer is discarded), or
    /// [`ProtocolError::InvalidUtf8`] for a complete line that is not UTF-8.
    /// On error, lines already completed by the same chunk are dropped too.
    /// The stream is unusable after an error and the caller should close it.
    pub fn push(&mut self, chunk: &[u8]) -> Result<Vec<String>, ProtocolError> {
        self.buf.extend_from_slice(chunk);

        let mut lines = Vec::new();
        while let Some(pos) = self.buf.iter().position(|&b| b == b'\n') {
            let mut raw: Vec<u8> = self.buf.drain(..=pos).collect();
            raw.pop(); // '\n'
            if raw.last() == Some(&b'\r') {
                raw.pop();
            }
            if raw.len() > self.max_frame_len {
                return Err(ProtocolError::FrameTooLong {
                    limit: self.max_frame_len,
                });
            }
            let line = String::from_utf8(raw).map_err(|_| ProtocolError::InvalidUtf8)?;
            if line.trim().is_empty() {
                continue;
            }
            lines.push(line);
        }

        if self.buf.len() > self.max_frame_len {
            self.buf.clear();
            return Err(ProtocolError::FrameTooLong {
                limit: self.max_frame_len,
            });
        }
        Ok(lines)
    }

    /// Number of buffered bytes that do not yet form a complete line.
    pub fn pending_len(&self) -> usize {
        self.buf.len()
    }
}

impl Default for FrameDecoder {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_FRAME_BYTES)
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
