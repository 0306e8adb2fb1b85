//! Reverse-line protocol implementation.
//!
//! A line-oriented text service:
//! - Client sends: `<text>\n` (an optional `\r` before the `\n` is stripped)
//! - Server responds: `<text reversed>\r\n`
//!
//! On connect the server sends a greeting line before reading anything.
//!
//! ## Protocol Format
//!
//! ```text
//! Server:   Welcome to the shuffle echo server, ...\r\n
//!
//! Request:  hello\n
//! Response: olleh\r\n
//!
//! Request:  ab\r\ncd\n
//! Response: ba\r\ndc\r\n
//! ```
//!
//! Lines longer than the configured cap (255 bytes by default) are truncated:
//! bytes past the cap are dropped from the reply but still consumed, so the
//! next line starts at the right place. No error is sent to the client.

pub mod codec;

pub use codec::{Decode, LineCodec, FRAME_TERMINATOR, LINE_TERMINATOR, MAX_LINE_LEN};
