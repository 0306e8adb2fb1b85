//! mio event loop implementation.
//!
//! Readiness-based model: poll tells us when sockets are ready, then the
//! connection performs non-blocking read/write calls. Uses epoll on Linux,
//! kqueue on macOS.
//!
//! The loop only routes notifications. Each event token is the connection's
//! id in the registry and is looked up on every dispatch, so an event for a
//! connection that was already closed is dropped.

use crate::config::Config;
use crate::runtime::{
    Connection, ConnectionOptions, ConnectionRegistry, Interest, InterestSet, Status,
};
use mio::event::Event;
use mio::net::{TcpListener, TcpStream};
use mio::{Events, Poll, Registry, Token, Waker};
use std::io;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, error, info, trace, warn};

const LISTENER_TOKEN: Token = Token(usize::MAX);
const WAKER_TOKEN: Token = Token(usize::MAX - 1);

/// Listen backlog for the server socket.
const BACKLOG: i32 = 1024;

/// Applies a connection's interest transitions to the poll registry.
struct MioInterest<'a> {
    registry: &'a Registry,
    token: Token,
}

impl Interest<TcpStream> for MioInterest<'_> {
    fn update(
        &mut self,
        stream: &mut TcpStream,
        before: InterestSet,
        after: InterestSet,
    ) -> io::Result<()> {
        match (to_mio(before), to_mio(after)) {
            (None, Some(interest)) => self.registry.register(stream, self.token, interest),
            (Some(_), Some(interest)) => self.registry.reregister(stream, self.token, interest),
            (Some(_), None) => self.registry.deregister(stream),
            (None, None) => Ok(()),
        }
    }
}

/// mio has no empty interest; an empty set means "not registered".
fn to_mio(set: InterestSet) -> Option<mio::Interest> {
    match (set.read, set.write) {
        (true, true) => Some(mio::Interest::READABLE | mio::Interest::WRITABLE),
        (true, false) => Some(mio::Interest::READABLE),
        (false, true) => Some(mio::Interest::WRITABLE),
        (false, false) => None,
    }
}

/// Handle for stopping a running server from another thread.
#[derive(Debug, Clone)]
pub struct ShutdownHandle {
    requested: Arc<AtomicBool>,
    waker: Arc<Waker>,
}

impl ShutdownHandle {
    /// Ask the event loop to stop and wake it up.
    ///
    /// Every open connection receives a shutdown notification before
    /// `Server::run` returns.
    pub fn shutdown(&self) -> io::Result<()> {
        self.requested.store(true, Ordering::Release);
        self.waker.wake()
    }

    pub fn is_requested(&self) -> bool {
        self.requested.load(Ordering::Acquire)
    }
}

/// Single-threaded reverse-line server.
pub struct Server {
    poll: Poll,
    listener: TcpListener,
    local_addr: SocketAddr,
    connections: ConnectionRegistry<TcpStream>,
    options: ConnectionOptions,
    batch_size: usize,
    shutdown: ShutdownHandle,
}

impl Server {
    /// Bind the listening socket and set up the poll.
    pub fn bind(config: &Config) -> io::Result<Self> {
        let poll = Poll::new()?;

        let listener = create_listener(config.listen)?;
        let mut listener = TcpListener::from_std(listener);
        let local_addr = listener.local_addr()?;
        poll.registry()
            .register(&mut listener, LISTENER_TOKEN, mio::Interest::READABLE)?;

        let waker = Arc::new(Waker::new(poll.registry(), WAKER_TOKEN)?);

        info!(
            addr = %local_addr,
            max_connections = config.max_connections,
            read_buffer_size = config.read_buffer_size,
            max_line_length = config.max_line_length,
            "Server listening"
        );

        Ok(Self {
            poll,
            listener,
            local_addr,
            connections: ConnectionRegistry::new(config.max_connections),
            options: ConnectionOptions::from_config(config),
            batch_size: config.batch_size,
            shutdown: ShutdownHandle {
                requested: Arc::new(AtomicBool::new(false)),
                waker,
            },
        })
    }

    /// Address the listener is bound to.
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn shutdown_handle(&self) -> ShutdownHandle {
        self.shutdown.clone()
    }

    /// Run the event loop until shutdown is requested.
    pub fn run(mut self) -> io::Result<()> {
        let mut events = Events::with_capacity(self.batch_size);

        while !self.shutdown.is_requested() {
            if let Err(e) = self.poll.poll(&mut events, None) {
                if e.kind() == io::ErrorKind::Interrupted {
                    continue;
                }
                return Err(e);
            }

            for event in events.iter() {
                match event.token() {
                    LISTENER_TOKEN => self.accept_connections(),
                    WAKER_TOKEN => trace!("Event loop woken"),
                    Token(conn_id) => self.dispatch(conn_id, event),
                }
            }
        }

        self.shutdown_connections();
        info!(addr = %self.local_addr, "Server stopped");
        Ok(())
    }

    fn accept_connections(&mut self) {
        loop {
            match self.listener.accept() {
                Ok((stream, peer)) => {
                    if self.connections.is_full() {
                        warn!(
                            peer = %peer,
                            max_connections = self.connections.capacity(),
                            "Connection limit reached, closing"
                        );
                        continue;
                    }

                    let conn = Connection::new(stream, peer, &self.options);
                    let Some(conn_id) = self.connections.insert(conn) else {
                        continue;
                    };

                    let mut interest = MioInterest {
                        registry: self.poll.registry(),
                        token: Token(conn_id),
                    };
                    let opened = match self.connections.get_mut(conn_id) {
                        Some(conn) => conn.open(&mut interest),
                        None => continue,
                    };

                    match opened {
                        Ok(()) => debug!(conn_id, peer = %peer, "Accepted connection"),
                        Err(e) => {
                            warn!(peer = %peer, error = %e, "Failed to register connection");
                            if let Some(mut conn) = self.connections.remove(conn_id) {
                                let _ = self.poll.registry().deregister(conn.get_mut());
                            }
                        }
                    }
                }
                Err(ref e) if e.kind() == io::ErrorKind::WouldBlock => break,
                Err(ref e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => {
                    error!(error = %e, "Accept error");
                    break;
                }
            }
        }
    }

    fn dispatch(&mut self, conn_id: usize, event: &Event) {
        let Some(conn) = self.connections.get_mut(conn_id) else {
            trace!(conn_id, "Event for closed connection");
            return;
        };

        let mut interest = MioInterest {
            registry: self.poll.registry(),
            token: Token(conn_id),
        };

        let status = if event.is_error() {
            conn.on_shutdown(&mut interest)
        } else {
            let mut status = Status::Open;
            if event.is_readable() || event.is_read_closed() {
                status = conn.on_readable(&mut interest);
            }
            if status.is_open() && (event.is_writable() || event.is_write_closed()) {
                status = conn.on_writable(&mut interest);
            }
            status
        };

        if !status.is_open() {
            self.close_connection(conn_id);
        }
    }

    /// Drop a torn-down connection, closing its socket.
    fn close_connection(&mut self, conn_id: usize) {
        if let Some(conn) = self.connections.remove(conn_id) {
            debug!(conn_id, peer = %conn.peer(), "Connection closed");
        }
    }

    fn shutdown_connections(&mut self) {
        let registry = self.poll.registry();
        for (conn_id, conn) in self.connections.iter_mut() {
            let mut interest = MioInterest {
                registry,
                token: Token(conn_id),
            };
            conn.on_shutdown(&mut interest);
        }

        let closed = self.connections.len();
        self.connections.clear();
        if closed > 0 {
            info!(closed, "Closed remaining connections");
        }
    }
}

/// Create a non-blocking TCP listener with SO_REUSEADDR set.
fn create_listener(addr: SocketAddr) -> io::Result<std::net::TcpListener> {
    let socket = socket2::Socket::new(
        match addr {
            SocketAddr::V4(_) => socket2::Domain::IPV4,
            SocketAddr::V6(_) => socket2::Domain::IPV6,
        },
        socket2::Type::STREAM,
        Some(socket2::Protocol::TCP),
    )?;

    socket.set_reuse_address(true)?;
    socket.set_nonblocking(true)?;
    socket.bind(&addr.into())?;
    socket.listen(BACKLOG)?;

    Ok(socket.into())
}
