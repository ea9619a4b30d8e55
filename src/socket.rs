//! The public socket adapter surface.

use {
    crate::os::imp,
    std::{
        fmt::{self, Debug, Formatter},
        io,
        net::SocketAddr,
    },
};

/// IP address family of a socket, chosen at creation.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum AddressFamily {
    /// IPv4.
    Ipv4,
    /// IPv6.
    Ipv6,
}

/// An asynchronous TCP socket whose operation outcomes are delivered through a
/// [`CompletionPort`](crate::CompletionPort).
///
/// The handle is cheaply clonable; clones refer to the same underlying socket. Issuing calls —
/// [`connect()`](Self::connect), [`accept()`](Self::accept), [`send()`](Self::send),
/// [`recv()`](Self::recv), [`disconnect()`](Self::disconnect) — return as soon as the native
/// operation has been started (or finished on the spot); exactly one
/// [`CompletionStatus`](crate::CompletionStatus) per call later appears on the associated port
/// either way. Everything else (binding, listening, options) is a plain synchronous delegation
/// to the native socket.
///
/// Each half of the socket owns one reusable operation context, so one receive-class and one
/// send-class operation may be in flight concurrently, but issuing a second operation on a busy
/// half fails fast with an error. Per-operation failures never do: they arrive as data, in the
/// record's [`outcome`](crate::CompletionStatus::outcome).
///
/// A pending operation keeps the socket alive: dropping every user handle releases the native
/// socket only once nothing is in flight on it.
pub struct AsyncSocket<S>(pub(crate) imp::Socket<S>);

impl<S: Send + Sync + 'static> AsyncSocket<S> {
    /// Creates a new, unconnected TCP socket of the given family, in nonblocking mode.
    pub fn new(family: AddressFamily) -> io::Result<Self> {
        imp::Socket::new(family).map(Self)
    }

    /// Binds the socket to a local address. Synchronous, no completion record.
    pub fn bind(&self, address: SocketAddr) -> io::Result<()> {
        self.0.bind(address)
    }
    /// Starts listening for incoming connections. Synchronous, no completion record.
    pub fn listen(&self, backlog: i32) -> io::Result<()> {
        self.0.listen(backlog)
    }
    /// The address the socket is bound to.
    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.0.local_addr()
    }
    /// The address of the connected peer.
    pub fn peer_addr(&self) -> io::Result<SocketAddr> {
        self.0.peer_addr()
    }

    /// Issues an asynchronous connect to the given remote endpoint.
    ///
    /// Produces one [`Connect`](crate::OperationKind::Connect) record on the associated port;
    /// its outcome is the native connection result, verbatim.
    pub fn connect(&self, address: SocketAddr) -> io::Result<()> {
        self.0.connect(address)
    }

    /// Issues an asynchronous accept, adopting the connection into `conn`.
    ///
    /// `conn` is a created-but-unconnected socket; once the
    /// [`Accept`](crate::OperationKind::Accept) record reports success, `conn` refers to the
    /// accepted connection (and can then be associated with a port and driven like any other
    /// socket). `self` must be bound and listening.
    pub fn accept(&self, conn: &AsyncSocket<S>) -> io::Result<()> {
        self.0.accept(&conn.0)
    }

    /// Issues an asynchronous send of `buffer[offset..offset + count]`.
    ///
    /// One native send attempt finishes the operation: the
    /// [`Send`](crate::OperationKind::Send) record's
    /// [`bytes_transferred`](crate::CompletionStatus::bytes_transferred) is whatever the
    /// platform actually wrote, which may be less than `count`. The buffer is moved into the
    /// socket's persistent outbound context for the duration and handed back in the record —
    /// passing the reclaimed buffer to the next send keeps the hot path allocation-free.
    ///
    /// `flags` are raw platform `MSG_*` bits, passed through verbatim.
    pub fn send(&self, buffer: Vec<u8>, offset: usize, count: usize, flags: i32) -> io::Result<()> {
        self.0.send(buffer, offset, count, flags)
    }

    /// Issues an asynchronous receive into `buffer[offset..offset + count]`.
    ///
    /// Mirrors [`send()`](Self::send): one native receive finishes the operation, the filled
    /// buffer rides back in the [`Receive`](crate::OperationKind::Receive) record, and a record
    /// with zero [`bytes_transferred`](crate::CompletionStatus::bytes_transferred) and a success
    /// outcome means the peer shut the connection down.
    pub fn recv(&self, buffer: Vec<u8>, offset: usize, count: usize, flags: i32) -> io::Result<()> {
        self.0.recv(buffer, offset, count, flags)
    }

    /// Shuts down both directions of the connection, producing one
    /// [`Disconnect`](crate::OperationKind::Disconnect) record. Always completes immediately.
    pub fn disconnect(&self) -> io::Result<()> {
        self.0.disconnect()
    }

    /// Reads an integer-valued socket option. Level and name are raw platform values, delegated
    /// verbatim.
    pub fn option(&self, level: i32, name: i32) -> io::Result<i32> {
        self.0.option(level, name)
    }
    /// Sets an integer-valued socket option. Level and name are raw platform values, delegated
    /// verbatim.
    pub fn set_option(&self, level: i32, name: i32, value: i32) -> io::Result<()> {
        self.0.set_option(level, name, value)
    }
    /// Reads a socket option into a raw byte buffer, returning how many bytes the platform
    /// wrote.
    pub fn option_raw(&self, level: i32, name: i32, buf: &mut [u8]) -> io::Result<usize> {
        self.0.option_raw(level, name, buf)
    }
    /// Sets a socket option from a raw byte buffer.
    pub fn set_option_raw(&self, level: i32, name: i32, buf: &[u8]) -> io::Result<()> {
        self.0.set_option_raw(level, name, buf)
    }
    /// Raw control-code passthrough to the native socket.
    ///
    /// The buffer is handed to the native call as-is: the `ioctl` argument on Unix, the in/out
    /// buffer of `WSAIoctl` on Windows (where the return value is the native byte count).
    pub fn io_control(&self, code: u32, data: &mut [u8]) -> io::Result<usize> {
        self.0.io_control(code, data)
    }
}

impl<S> Clone for AsyncSocket<S> {
    fn clone(&self) -> Self {
        Self(self.0.clone())
    }
}
/// Handle identity: two `AsyncSocket`s are equal when they refer to the same underlying socket,
/// regardless of its state.
impl<S> PartialEq for AsyncSocket<S> {
    fn eq(&self, other: &Self) -> bool {
        self.0.handle_eq(&other.0)
    }
}
impl<S> Eq for AsyncSocket<S> {}
impl<S> Debug for AsyncSocket<S> {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.debug_tuple("AsyncSocket").field(&self.0).finish()
    }
}
