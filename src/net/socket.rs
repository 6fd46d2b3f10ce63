//! Non-blocking UDP socket and the readiness poller built on mio.
//!
//! The socket itself is shared between the receiver and transmitter
//! threads (datagram sockets are safe for concurrent send/recv). The
//! [`SocketPoller`] is owned by the receiver alone: it waits for read
//! readiness with a bounded timeout so the stop flag is observed even on
//! a silent network.

use std::io::{self, ErrorKind};
use std::os::fd::AsFd;
use std::time::Duration;

use mio::net::UdpSocket as MioUdpSocket;
use mio::{Events, Interest, Poll, Token};

use super::Endpoint;

const RECV_TOKEN: Token = Token(0);

/// A non-blocking UDP socket.
pub struct UdpSocket {
    inner: MioUdpSocket,
}

impl UdpSocket {
    /// Binds a socket to the given endpoint.
    ///
    /// # Errors
    ///
    /// Returns an error if the socket cannot be bound.
    pub fn bind(endpoint: Endpoint) -> io::Result<Self> {
        let inner = MioUdpSocket::bind(endpoint.into())?;
        Ok(Self { inner })
    }

    /// Returns the local address this socket is bound to.
    ///
    /// # Errors
    ///
    /// Returns an error if the local address cannot be retrieved.
    pub fn local_addr(&self) -> io::Result<Endpoint> {
        self.inner.local_addr().map(Endpoint::from)
    }

    /// Sends one datagram, mapping `WouldBlock` to `Ok(None)`.
    ///
    /// A would-block send is a dropped datagram from the protocol's point
    /// of view; retransmission recovers it.
    ///
    /// # Errors
    ///
    /// Returns any I/O failure other than `WouldBlock`.
    pub fn try_send_to(&self, buf: &[u8], dest: Endpoint) -> io::Result<Option<usize>> {
        match self.inner.send_to(buf, dest.into()) {
            Ok(n) => Ok(Some(n)),
            Err(e) if e.kind() == ErrorKind::WouldBlock => Ok(None),
            Err(e) => Err(e),
        }
    }

    /// Receives one datagram, mapping `WouldBlock` to `Ok(None)`.
    ///
    /// # Errors
    ///
    /// Returns any I/O failure other than `WouldBlock`.
    pub fn try_recv_from(&self, buf: &mut [u8]) -> io::Result<Option<(usize, Endpoint)>> {
        match self.inner.recv_from(buf) {
            Ok((n, addr)) => Ok(Some((n, Endpoint::from(addr)))),
            Err(e) if e.kind() == ErrorKind::WouldBlock => Ok(None),
            Err(e) => Err(e),
        }
    }

    /// Best-effort enlargement of the kernel send and receive buffers.
    ///
    /// A full receive window of frames can arrive in one retransmission
    /// burst; undersized kernel buffers turn that into avoidable loss.
    ///
    /// # Errors
    ///
    /// Returns an error if either socket option cannot be set.
    pub fn set_buffer_sizes(&self, bytes: usize) -> io::Result<()> {
        let fd = self.inner.as_fd();
        rustix::net::sockopt::set_socket_send_buffer_size(fd, bytes)?;
        rustix::net::sockopt::set_socket_recv_buffer_size(fd, bytes)?;
        Ok(())
    }

    /// Returns the kernel receive buffer size.
    ///
    /// # Errors
    ///
    /// Returns an error if the option cannot be read.
    pub fn recv_buffer_size(&self) -> io::Result<usize> {
        Ok(rustix::net::sockopt::get_socket_recv_buffer_size(
            self.inner.as_fd(),
        )?)
    }
}

/// Read-readiness poller for one [`UdpSocket`].
///
/// Registration happens once, before the socket is shared; only the
/// receiver thread calls [`SocketPoller::wait`].
pub struct SocketPoller {
    poll: Poll,
    events: Events,
}

impl SocketPoller {
    /// Registers `socket` for read readiness.
    ///
    /// # Errors
    ///
    /// Returns an error if the poller cannot be created or the socket
    /// cannot be registered.
    pub fn new(socket: &mut UdpSocket) -> io::Result<Self> {
        let poll = Poll::new()?;
        poll.registry()
            .register(&mut socket.inner, RECV_TOKEN, Interest::READABLE)?;
        Ok(Self {
            poll,
            events: Events::with_capacity(8),
        })
    }

    /// Waits until the socket is readable or `timeout` elapses.
    ///
    /// Returns `true` when readiness was reported. A signal-interrupted
    /// wait is treated as an early timeout.
    ///
    /// # Errors
    ///
    /// Returns any poll failure other than `Interrupted`.
    pub fn wait(&mut self, timeout: Duration) -> io::Result<bool> {
        self.events.clear();
        match self.poll.poll(&mut self.events, Some(timeout)) {
            Ok(()) => Ok(!self.events.is_empty()),
            Err(e) if e.kind() == ErrorKind::Interrupted => Ok(false),
            Err(e) => Err(e),
        }
    }
}
