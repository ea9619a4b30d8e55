//! Completion records and their vocabulary.

use {
    crate::socket::AsyncSocket,
    std::{
        fmt::{self, Debug, Formatter},
        io,
        sync::Arc,
    },
};

/// The category of operation a [`CompletionStatus`] reports on.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum OperationKind {
    /// An [`accept()`](AsyncSocket::accept) finished; the target socket passed to it now refers
    /// to the accepted connection.
    Accept,
    /// A [`connect()`](AsyncSocket::connect) finished.
    Connect,
    /// A [`recv()`](AsyncSocket::recv) finished.
    Receive,
    /// A [`send()`](AsyncSocket::send) finished.
    Send,
    /// A [`disconnect()`](AsyncSocket::disconnect) finished.
    Disconnect,
    /// Not a socket operation: a record injected through
    /// [`signal()`](crate::CompletionPort::signal) or by
    /// [`close()`](crate::CompletionPort::close) to wake a consumer out of band.
    Signal,
}

/// The platform-reported outcome of an operation, carried verbatim.
///
/// This layer performs no interpretation and no retries: whatever code the native socket layer
/// produced is what the consumer gets. `0` is success on every supported platform; anything else
/// is an `errno` value on Unix and a `WSA*` error code on Windows.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum Outcome {
    /// The operation finished without an error code.
    Success,
    /// The raw OS error code the operation finished with.
    Error(i32),
}
impl Outcome {
    pub(crate) fn from_raw(code: i32) -> Self {
        if code == 0 {
            Self::Success
        } else {
            Self::Error(code)
        }
    }
    pub(crate) fn from_io_error(e: &io::Error) -> Self {
        // Errors produced by the native wrappers always carry a raw OS code.
        Self::Error(e.raw_os_error().unwrap_or(-1))
    }
    /// Whether this is [`Success`](Self::Success).
    pub fn is_success(self) -> bool {
        matches!(self, Self::Success)
    }
    /// The raw OS error code, if any.
    pub fn raw_os_error(self) -> Option<i32> {
        match self {
            Self::Success => None,
            Self::Error(code) => Some(code),
        }
    }
    /// Converts the outcome into a result, wrapping the raw code into an [`io::Error`].
    pub fn into_result(self) -> io::Result<()> {
        match self {
            Self::Success => Ok(()),
            Self::Error(code) => Err(io::Error::from_raw_os_error(code)),
        }
    }
}

/// An immutable record describing one finished — or synthetically signalled — asynchronous
/// operation.
///
/// Every issued socket operation produces exactly one record on the associated port, whether the
/// native call finished on the spot or asynchronously. Records are built once, never mutated,
/// and consumed exactly once, in FIFO order.
///
/// For [`Send`](OperationKind::Send) and [`Receive`](OperationKind::Receive), the buffer the
/// operation ran on rides along and can be reclaimed with [`take_buffer()`](Self::take_buffer) —
/// handing it back through the record is what lets the next operation on the same socket reuse
/// the allocation.
pub struct CompletionStatus<S> {
    pub(crate) socket: Option<AsyncSocket<S>>,
    pub(crate) state: Option<Arc<S>>,
    pub(crate) operation: OperationKind,
    pub(crate) outcome: Outcome,
    pub(crate) bytes_transferred: usize,
    pub(crate) buffer: Option<Vec<u8>>,
}

impl<S> CompletionStatus<S> {
    pub(crate) fn signal(state: Option<Arc<S>>) -> Self {
        Self {
            socket: None,
            state,
            operation: OperationKind::Signal,
            outcome: Outcome::Success,
            bytes_transferred: 0,
            buffer: None,
        }
    }

    /// The socket the operation ran on. `None` for [signals](OperationKind::Signal).
    pub fn socket(&self) -> Option<&AsyncSocket<S>> {
        self.socket.as_ref()
    }
    /// The state attached when the socket was [associated](crate::CompletionPort::associate), or
    /// passed to [`signal()`](crate::CompletionPort::signal). `None` only for the wakeup records
    /// injected by [`close()`](crate::CompletionPort::close).
    pub fn state(&self) -> Option<&S> {
        self.state.as_deref()
    }
    /// The category of the finished operation.
    pub fn operation(&self) -> OperationKind {
        self.operation
    }
    /// The platform-reported outcome, verbatim.
    pub fn outcome(&self) -> Outcome {
        self.outcome
    }
    /// How many bytes the operation moved. Meaningful for [`Send`](OperationKind::Send) and
    /// [`Receive`](OperationKind::Receive), zero for everything else.
    pub fn bytes_transferred(&self) -> usize {
        self.bytes_transferred
    }
    /// Reclaims the buffer a [`Send`](OperationKind::Send) or [`Receive`](OperationKind::Receive)
    /// operation ran on. For a receive, the bytes that arrived sit at the offset the operation
    /// was issued with, [`bytes_transferred()`](Self::bytes_transferred) long.
    pub fn take_buffer(&mut self) -> Option<Vec<u8>> {
        self.buffer.take()
    }
}

impl<S> Debug for CompletionStatus<S> {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.debug_struct("CompletionStatus")
            .field("operation", &self.operation)
            .field("outcome", &self.outcome)
            .field("bytes_transferred", &self.bytes_transferred)
            .field("socket", &self.socket.is_some())
            .field("state", &self.state.is_some())
            .finish()
    }
}
