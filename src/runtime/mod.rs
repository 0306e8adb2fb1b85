//! Event-driven runtime for the reverse-line server.
//!
//! One thread runs a mio poll (epoll on Linux, kqueue on macOS) over the
//! listener and every accepted socket. The pieces:
//! - `ReadBuffer`/`LineBuffer`/`OutputBuffer`: bounded per-connection buffers
//! - `Transport`: non-blocking read/write classified into `IoOutcome`
//! - `Connection`: per-socket protocol state machine
//! - `ConnectionRegistry`: slab of live connections keyed by event token
//! - `Server`: the poll loop that accepts and dispatches

pub mod buffer;
mod connection;
mod mio;
mod transport;

pub use connection::{
    ConnState, Connection, ConnectionOptions, ConnectionRegistry, Interest, InterestSet, Status,
};
pub use self::mio::{Server, ShutdownHandle};
pub use transport::{IoOutcome, Transport};

use crate::config::Config;
use crate::error::ServerError;
use tracing::{error, info};

/// Bind, install the termination handler, and serve until Ctrl-C/SIGTERM.
pub fn run(config: Config) -> Result<(), ServerError> {
    let server = Server::bind(&config)?;

    let handle = server.shutdown_handle();
    ctrlc::set_handler(move || {
        info!("Termination requested");
        if let Err(e) = handle.shutdown() {
            error!(error = %e, "Failed to wake event loop");
        }
    })?;

    server.run()?;
    Ok(())
}
