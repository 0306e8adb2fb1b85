//! Connection state machine for managing TCP connections.
//!
//! Each connection owns its socket, its buffers, and a small set of mode
//! flags. The event loop calls `on_readable`, `on_writable` and `on_shutdown`;
//! everything else (framing, partial writes, interest toggling, teardown)
//! happens inside the connection.
//!
//! ## States
//!
//! ```text
//!              open (greeting queued)
//!                      │
//!                      ▼
//!   ┌──────────► Writing ──────────┐
//!   │                │             │
//!   │ frame decoded  │ flushed     │ peer closed / shutdown / I/O error
//!   │                ▼             ▼
//!   └─────────── Reading ──────► Closed
//! ```
//!
//! While `Writing`, no input is processed: readable notifications only
//! unregister read interest until the frame has been flushed.

use crate::config::Config;
use crate::protocols::reverse::{Decode, LineCodec, FRAME_TERMINATOR};
use crate::runtime::buffer::{OutputBuffer, ReadBuffer};
use crate::runtime::transport::{IoOutcome, Transport};
use bytes::{Bytes, BytesMut};
use slab::Slab;
use std::io;
use std::net::SocketAddr;
use tracing::{debug, info, trace, warn};

/// Which readiness events a connection is registered for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct InterestSet {
    pub read: bool,
    pub write: bool,
}

impl InterestSet {
    pub const NONE: Self = Self {
        read: false,
        write: false,
    };
    pub const READ: Self = Self {
        read: true,
        write: false,
    };
    pub const WRITE: Self = Self {
        read: false,
        write: true,
    };
    pub const BOTH: Self = Self {
        read: true,
        write: true,
    };

    pub fn is_empty(self) -> bool {
        !self.read && !self.write
    }
}

/// Event loop side of interest registration.
///
/// `update` is only ever called with `before != after`, and `before` is
/// always the set most recently applied for this connection.
pub trait Interest<T> {
    fn update(&mut self, io: &mut T, before: InterestSet, after: InterestSet) -> io::Result<()>;
}

/// Current state of a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnState {
    /// Waiting for a complete line.
    Reading,
    /// A frame is in flight; input processing is suspended.
    Writing,
    /// Torn down. Terminal.
    Closed,
}

/// What the event loop should do with a connection after a notification.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Status {
    Open,
    /// Remove the connection from the registry and drop it.
    Closed,
}

impl Status {
    pub fn is_open(self) -> bool {
        self == Status::Open
    }
}

/// Per-connection settings shared by every accepted socket.
#[derive(Debug, Clone)]
pub struct ConnectionOptions {
    pub read_buffer_size: usize,
    pub max_line_length: usize,
    /// Complete greeting frame, CRLF included.
    pub greeting: Bytes,
}

impl ConnectionOptions {
    pub fn from_config(config: &Config) -> Self {
        let mut greeting = BytesMut::with_capacity(config.greeting.len() + FRAME_TERMINATOR.len());
        greeting.extend_from_slice(config.greeting.as_bytes());
        greeting.extend_from_slice(FRAME_TERMINATOR);

        Self {
            read_buffer_size: config.read_buffer_size,
            max_line_length: config.max_line_length,
            greeting: greeting.freeze(),
        }
    }
}

impl Default for ConnectionOptions {
    fn default() -> Self {
        Self::from_config(&Config::default())
    }
}

/// Why a connection is being torn down.
#[derive(Debug)]
enum Teardown {
    PeerClosed,
    Shutdown,
    Failed(io::Error),
}

impl From<io::Error> for Teardown {
    fn from(e: io::Error) -> Self {
        Teardown::Failed(e)
    }
}

/// A single client connection.
#[derive(Debug)]
pub struct Connection<T> {
    io: T,
    peer: SocketAddr,
    state: ConnState,
    /// Interest currently registered with the event loop.
    interest: InterestSet,
    read_buf: ReadBuffer,
    codec: LineCodec,
    output: OutputBuffer,
}

impl<T: Transport> Connection<T> {
    /// Create a connection with the greeting queued for writing.
    ///
    /// Nothing is registered until `open` is called.
    pub fn new(io: T, peer: SocketAddr, options: &ConnectionOptions) -> Self {
        let frame_capacity =
            (options.max_line_length + FRAME_TERMINATOR.len()).max(options.greeting.len());
        let mut output = OutputBuffer::with_capacity(frame_capacity);
        output.load(&options.greeting);

        let state = if output.is_pending() {
            ConnState::Writing
        } else {
            ConnState::Reading
        };

        Self {
            io,
            peer,
            state,
            interest: InterestSet::NONE,
            read_buf: ReadBuffer::new(options.read_buffer_size),
            codec: LineCodec::new(options.max_line_length),
            output,
        }
    }

    /// Register read and write interest so the greeting goes out on the
    /// first writable notification.
    pub fn open<R: Interest<T>>(&mut self, reactor: &mut R) -> io::Result<()> {
        self.register_read(reactor)?;
        self.register_write(reactor)?;
        info!(peer = %self.peer, "Connection from client");
        Ok(())
    }

    /// Handle a readable notification.
    pub fn on_readable<R: Interest<T>>(&mut self, reactor: &mut R) -> Status {
        let result = match self.state {
            ConnState::Closed => return Status::Closed,
            ConnState::Writing => {
                // Stop read notifications until the reply is flushed
                self.unregister_read(reactor)
                    .map(|_| ())
                    .map_err(Teardown::from)
            }
            ConnState::Reading => self.pump(reactor),
        };
        self.settle(reactor, result)
    }

    /// Handle a writable notification.
    pub fn on_writable<R: Interest<T>>(&mut self, reactor: &mut R) -> Status {
        let result = match self.state {
            ConnState::Closed => return Status::Closed,
            ConnState::Reading => self
                .unregister_write(reactor)
                .map(|_| ())
                .map_err(Teardown::from),
            ConnState::Writing => match self.flush(reactor) {
                Ok(true) => self.pump(reactor),
                Ok(false) => Ok(()),
                Err(reason) => Err(reason),
            },
        };
        self.settle(reactor, result)
    }

    /// Handle a shutdown notification from the event loop.
    pub fn on_shutdown<R: Interest<T>>(&mut self, reactor: &mut R) -> Status {
        if self.state == ConnState::Closed {
            return Status::Closed;
        }
        self.destroy(reactor, Teardown::Shutdown)
    }

    /// Register read interest. Returns `true` if it was not registered before.
    pub fn register_read<R: Interest<T>>(&mut self, reactor: &mut R) -> io::Result<bool> {
        let after = InterestSet {
            read: true,
            ..self.interest
        };
        self.set_interest(reactor, after)
    }

    /// Unregister read interest. Returns `true` if it was registered before.
    pub fn unregister_read<R: Interest<T>>(&mut self, reactor: &mut R) -> io::Result<bool> {
        let after = InterestSet {
            read: false,
            ..self.interest
        };
        self.set_interest(reactor, after)
    }

    /// Register write interest. Returns `true` if it was not registered before.
    pub fn register_write<R: Interest<T>>(&mut self, reactor: &mut R) -> io::Result<bool> {
        let after = InterestSet {
            write: true,
            ..self.interest
        };
        self.set_interest(reactor, after)
    }

    /// Unregister write interest. Returns `true` if it was registered before.
    pub fn unregister_write<R: Interest<T>>(&mut self, reactor: &mut R) -> io::Result<bool> {
        let after = InterestSet {
            write: false,
            ..self.interest
        };
        self.set_interest(reactor, after)
    }

    fn set_interest<R: Interest<T>>(
        &mut self,
        reactor: &mut R,
        after: InterestSet,
    ) -> io::Result<bool> {
        if after == self.interest {
            return Ok(false);
        }
        reactor.update(&mut self.io, self.interest, after)?;
        trace!(peer = %self.peer, before = ?self.interest, after = ?after, "Interest updated");
        self.interest = after;
        Ok(true)
    }

    /// Alternate between framing buffered input and reading the socket until
    /// the socket has nothing more or a reply is blocked.
    fn pump<R: Interest<T>>(&mut self, reactor: &mut R) -> Result<(), Teardown> {
        loop {
            if !self.process_input(reactor)? {
                return Ok(());
            }
            if !self.fill(reactor)? {
                return Ok(());
            }
        }
    }

    /// Read once into the drained read buffer.
    ///
    /// Returns `false` when the socket has nothing to read for this tick.
    fn fill<R: Interest<T>>(&mut self, reactor: &mut R) -> Result<bool, Teardown> {
        debug_assert!(self.read_buf.is_drained());
        loop {
            match self.io.try_read(self.read_buf.unfilled_mut()) {
                IoOutcome::Transferred(n) => {
                    self.read_buf.commit(n);
                    trace!(peer = %self.peer, bytes = n, "Read");
                    return Ok(true);
                }
                IoOutcome::WouldBlock => {
                    // Data may have arrived between the read and the registration,
                    // so a fresh registration earns one more attempt.
                    if !self.register_read(reactor)? {
                        return Ok(false);
                    }
                }
                IoOutcome::Interrupted => {}
                IoOutcome::Closed => return Err(Teardown::PeerClosed),
                IoOutcome::Failed(e) => return Err(Teardown::Failed(e)),
            }
        }
    }

    /// Frame buffered input, writing each reply before decoding the next.
    ///
    /// Returns `false` when a reply could not be fully written; the rest of
    /// the input stays buffered until it is.
    fn process_input<R: Interest<T>>(&mut self, reactor: &mut R) -> Result<bool, Teardown> {
        while !self.read_buf.is_drained() {
            let decoded = self
                .codec
                .decode(self.read_buf.pending(), self.output.start_frame());

            match decoded {
                Decode::NeedMore => self.read_buf.clear(),
                Decode::Frame {
                    consumed,
                    remaining,
                } => {
                    self.read_buf.consume(consumed);
                    self.state = ConnState::Writing;

                    let frame = self.output.frame();
                    let reply = &frame[..frame.len() - FRAME_TERMINATOR.len()];
                    info!(
                        peer = %self.peer,
                        reply = %String::from_utf8_lossy(reply),
                        remaining,
                        "Writing reversed line"
                    );

                    if !self.flush(reactor)? {
                        return Ok(false);
                    }
                }
            }
        }
        Ok(true)
    }

    /// Write the pending frame.
    ///
    /// Returns `true` once it is fully sent, `false` if the socket is full.
    fn flush<R: Interest<T>>(&mut self, reactor: &mut R) -> Result<bool, Teardown> {
        while self.output.is_pending() {
            match self.io.try_write(self.output.unsent()) {
                IoOutcome::Transferred(n) => self.output.advance(n),
                IoOutcome::WouldBlock => {
                    // Same race as on the read side
                    if !self.register_write(reactor)? {
                        debug!(
                            peer = %self.peer,
                            written = self.output.written(),
                            total = self.output.frame().len(),
                            "Write deferred"
                        );
                        return Ok(false);
                    }
                }
                IoOutcome::Interrupted => {}
                IoOutcome::Closed => return Err(Teardown::PeerClosed),
                IoOutcome::Failed(e) => return Err(Teardown::Failed(e)),
            }
        }

        self.output.clear();
        self.state = ConnState::Reading;
        Ok(true)
    }

    fn settle<R: Interest<T>>(&mut self, reactor: &mut R, result: Result<(), Teardown>) -> Status {
        match result {
            Ok(()) => Status::Open,
            Err(reason) => self.destroy(reactor, reason),
        }
    }

    fn destroy<R: Interest<T>>(&mut self, reactor: &mut R, reason: Teardown) -> Status {
        match &reason {
            Teardown::PeerClosed => info!(peer = %self.peer, "Disconnecting, closed by peer"),
            Teardown::Shutdown => info!(peer = %self.peer, "Disconnecting, shutdown"),
            Teardown::Failed(e) => warn!(peer = %self.peer, error = %e, "Connection error"),
        }

        if let Err(e) = self.set_interest(reactor, InterestSet::NONE) {
            debug!(peer = %self.peer, error = %e, "Failed to unregister interest");
            self.interest = InterestSet::NONE;
        }

        self.state = ConnState::Closed;
        self.read_buf.clear();
        self.output.clear();
        Status::Closed
    }
}

impl<T> Connection<T> {
    pub fn peer(&self) -> SocketAddr {
        self.peer
    }

    pub fn state(&self) -> ConnState {
        self.state
    }

    pub fn interest(&self) -> InterestSet {
        self.interest
    }

    pub fn is_writing(&self) -> bool {
        self.state == ConnState::Writing
    }

    pub fn get_ref(&self) -> &T {
        &self.io
    }

    pub fn get_mut(&mut self) -> &mut T {
        &mut self.io
    }
}

/// Registry of active connections using slab allocation.
///
/// Provides O(1) insert, lookup, and remove operations. Ids are reused after
/// removal, so a notification must always be resolved through the registry
/// rather than by holding on to a connection.
pub struct ConnectionRegistry<T> {
    connections: Slab<Connection<T>>,
    max_connections: usize,
}

impl<T> ConnectionRegistry<T> {
    /// Create a new registry with specified maximum capacity.
    pub fn new(max_connections: usize) -> Self {
        Self {
            connections: Slab::with_capacity(max_connections),
            max_connections,
        }
    }

    /// Insert a new connection into the registry.
    ///
    /// Returns `None` if the registry is at capacity.
    pub fn insert(&mut self, conn: Connection<T>) -> Option<usize> {
        if self.is_full() {
            return None;
        }
        Some(self.connections.insert(conn))
    }

    /// Get an immutable reference to a connection.
    pub fn get(&self, id: usize) -> Option<&Connection<T>> {
        self.connections.get(id)
    }

    /// Get a mutable reference to a connection.
    pub fn get_mut(&mut self, id: usize) -> Option<&mut Connection<T>> {
        self.connections.get_mut(id)
    }

    /// Remove a connection from the registry.
    pub fn remove(&mut self, id: usize) -> Option<Connection<T>> {
        self.connections.try_remove(id)
    }

    /// Check if a connection exists.
    pub fn contains(&self, id: usize) -> bool {
        self.connections.contains(id)
    }

    /// Number of active connections.
    pub fn len(&self) -> usize {
        self.connections.len()
    }

    /// Check if there are no connections.
    pub fn is_empty(&self) -> bool {
        self.connections.is_empty()
    }

    pub fn is_full(&self) -> bool {
        self.connections.len() >= self.max_connections
    }

    /// Maximum number of connections allowed.
    pub fn capacity(&self) -> usize {
        self.max_connections
    }

    /// Iterate over all connections mutably.
    pub fn iter_mut(&mut self) -> impl Iterator<Item = (usize, &mut Connection<T>)> {
        self.connections.iter_mut()
    }

    /// Drop every connection.
    pub fn clear(&mut self) {
        self.connections.clear();
    }
}
