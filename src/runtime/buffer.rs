//! Per-connection buffer management.
//!
//! Every connection owns three bounded buffers:
//! - `ReadBuffer`: fixed-capacity inbound bytes plus a consume cursor
//! - `LineBuffer`: the current, not yet terminated line (capped)
//! - `OutputBuffer`: the frame in flight and how much of it has been sent
//!
//! All cursor movement goes through checked methods so that a bad count from
//! the transport can never index past the end of a buffer.

use bytes::BytesMut;

/// Fixed-capacity inbound buffer.
///
/// Filled by one transport read, then consumed front to back by the line
/// codec. New bytes are only read in once everything previously read has been
/// consumed, so the buffer never needs compaction.
#[derive(Debug)]
pub struct ReadBuffer {
    buf: Box<[u8]>,
    /// Number of valid bytes in `buf`.
    filled: usize,
    /// Number of valid bytes already handed to the codec.
    consumed: usize,
}

impl ReadBuffer {
    /// Create a read buffer holding at most `capacity` bytes.
    pub fn new(capacity: usize) -> Self {
        Self {
            buf: vec![0u8; capacity].into_boxed_slice(),
            filled: 0,
            consumed: 0,
        }
    }

    /// Space available for the next transport read.
    ///
    /// Resets the buffer first when all previously read bytes are consumed.
    pub fn unfilled_mut(&mut self) -> &mut [u8] {
        if self.is_drained() {
            self.clear();
        }
        &mut self.buf[self.filled..]
    }

    /// Record that `n` bytes were written into the slice from `unfilled_mut`.
    pub fn commit(&mut self, n: usize) {
        debug_assert!(n <= self.buf.len() - self.filled, "commit past capacity");
        self.filled = self.filled.saturating_add(n).min(self.buf.len());
    }

    /// Bytes read but not yet consumed.
    pub fn pending(&self) -> &[u8] {
        &self.buf[self.consumed..self.filled]
    }

    /// Mark `n` pending bytes as consumed.
    pub fn consume(&mut self, n: usize) {
        debug_assert!(n <= self.filled - self.consumed, "consume past filled");
        self.consumed = self.consumed.saturating_add(n).min(self.filled);
    }

    /// True when every read byte has been consumed.
    pub fn is_drained(&self) -> bool {
        self.consumed == self.filled
    }

    /// Discard all buffered bytes.
    pub fn clear(&mut self) {
        self.filled = 0;
        self.consumed = 0;
    }

    pub fn capacity(&self) -> usize {
        self.buf.len()
    }
}

/// Accumulator for the current line, capped at `max_len` payload bytes.
#[derive(Debug)]
pub struct LineBuffer {
    bytes: Vec<u8>,
    max_len: usize,
}

impl LineBuffer {
    pub fn new(max_len: usize) -> Self {
        Self {
            bytes: Vec::with_capacity(max_len),
            max_len,
        }
    }

    /// Append a byte if the line is below its cap.
    ///
    /// Returns `false` when the byte was dropped.
    pub fn push(&mut self, byte: u8) -> bool {
        if self.bytes.len() < self.max_len {
            self.bytes.push(byte);
            true
        } else {
            false
        }
    }

    /// Remove a trailing carriage return, if any.
    pub fn strip_trailing_cr(&mut self) {
        if self.bytes.last() == Some(&b'\r') {
            self.bytes.pop();
        }
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.bytes
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    pub fn is_full(&self) -> bool {
        self.bytes.len() >= self.max_len
    }

    pub fn max_len(&self) -> usize {
        self.max_len
    }

    pub fn clear(&mut self) {
        self.bytes.clear();
    }
}

/// The frame currently being written and its write offset.
///
/// The frame is considered pending while `written < frame.len()`.
#[derive(Debug, Default)]
pub struct OutputBuffer {
    frame: BytesMut,
    written: usize,
}

impl OutputBuffer {
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            frame: BytesMut::with_capacity(capacity),
            written: 0,
        }
    }

    /// Discard any previous frame and return the empty frame for filling.
    pub fn start_frame(&mut self) -> &mut BytesMut {
        self.frame.clear();
        self.written = 0;
        &mut self.frame
    }

    /// Queue a complete frame.
    pub fn load(&mut self, data: &[u8]) {
        self.start_frame().extend_from_slice(data);
    }

    /// Bytes of the frame not yet sent.
    pub fn unsent(&self) -> &[u8] {
        &self.frame[self.written..]
    }

    /// The whole frame, including the bytes already sent.
    pub fn frame(&self) -> &[u8] {
        &self.frame
    }

    /// Record that `n` bytes of the unsent tail were sent.
    pub fn advance(&mut self, n: usize) {
        debug_assert!(n <= self.frame.len() - self.written, "advance past frame");
        self.written = self.written.saturating_add(n).min(self.frame.len());
    }

    pub fn is_pending(&self) -> bool {
        self.written < self.frame.len()
    }

    pub fn written(&self) -> usize {
        self.written
    }

    pub fn clear(&mut self) {
        self.frame.clear();
        self.written = 0;
    }
}
