//! shuffle-echo: a line-reversing TCP server
//!
//! Clients connect, receive a greeting, and every newline-terminated line
//! they send comes back with its bytes reversed and a `\r\n` terminator.
//!
//! Features:
//! - Single-threaded mio event loop multiplexing all connections
//! - Non-blocking per-connection state machine with read/write backpressure
//! - Lines capped at 255 bytes, excess silently dropped
//! - Configuration via CLI arguments or TOML file

pub mod config;
pub mod error;
pub mod protocols;
pub mod runtime;

pub use config::Config;
pub use error::ServerError;
pub use runtime::{Server, ShutdownHandle};
