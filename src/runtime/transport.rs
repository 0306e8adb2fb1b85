//! Non-blocking transport primitive.
//!
//! Wraps any `Read + Write` socket and classifies each attempt into the
//! outcomes the connection state machine reacts to.

use std::io::{self, Read, Write};

/// Classified result of one non-blocking read or write attempt.
#[derive(Debug)]
pub enum IoOutcome {
    /// `n > 0` bytes were transferred.
    Transferred(usize),
    /// Nothing could be transferred right now.
    WouldBlock,
    /// The call was interrupted by a signal and may be retried at once.
    Interrupted,
    /// The peer closed its side (zero-length read).
    Closed,
    /// Unrecoverable error.
    Failed(io::Error),
}

impl IoOutcome {
    /// Classify the result of a `read` call.
    pub fn from_read(result: io::Result<usize>) -> Self {
        match result {
            Ok(0) => IoOutcome::Closed,
            Ok(n) => IoOutcome::Transferred(n),
            Err(e) => Self::from_error(e),
        }
    }

    /// Classify the result of a `write` call.
    ///
    /// A zero-length write of a non-empty buffer means the socket can no
    /// longer accept data and is treated as fatal.
    pub fn from_write(result: io::Result<usize>) -> Self {
        match result {
            Ok(0) => IoOutcome::Failed(io::Error::new(
                io::ErrorKind::WriteZero,
                "write returned 0",
            )),
            Ok(n) => IoOutcome::Transferred(n),
            Err(e) => Self::from_error(e),
        }
    }

    fn from_error(e: io::Error) -> Self {
        match e.kind() {
            io::ErrorKind::WouldBlock => IoOutcome::WouldBlock,
            io::ErrorKind::Interrupted => IoOutcome::Interrupted,
            _ => IoOutcome::Failed(e),
        }
    }
}

/// Non-blocking byte transport used by a connection.
pub trait Transport {
    /// Attempt to read into `buf`, which must be non-empty.
    fn try_read(&mut self, buf: &mut [u8]) -> IoOutcome;

    /// Attempt to write from `buf`, which must be non-empty.
    fn try_write(&mut self, buf: &[u8]) -> IoOutcome;
}

impl<T: Read + Write> Transport for T {
    fn try_read(&mut self, buf: &mut [u8]) -> IoOutcome {
        IoOutcome::from_read(self.read(buf))
    }

    fn try_write(&mut self, buf: &[u8]) -> IoOutcome {
        IoOutcome::from_write(self.write(buf))
    }
}
