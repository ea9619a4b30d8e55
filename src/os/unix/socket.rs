//! The socket adapter: issues nonblocking operations and maps their results — immediate or
//! driver-reported — into completion records.

use {
    super::{
        c_wrappers,
        driver::{ArmRequest, Direction, DriverShared, ReadyOutcome},
    },
    crate::{
        completion::{CompletionStatus, OperationKind, Outcome},
        misc::LockExt,
        queue::BlockingQueue,
        socket::AddressFamily,
    },
    libc::c_int,
    std::{
        fmt::{self, Debug, Formatter},
        io,
        mem::take,
        net::SocketAddr,
        ops::Range,
        os::fd::{AsFd, AsRawFd, BorrowedFd, OwnedFd, RawFd},
        sync::{Arc, Mutex, MutexGuard, OnceLock},
    },
};

pub(crate) struct Socket<S> {
    inner: Arc<Inner<S>>,
}
impl<S> Clone for Socket<S> {
    fn clone(&self) -> Self {
        Self { inner: Arc::clone(&self.inner) }
    }
}
impl<S> Socket<S> {
    pub(crate) fn handle_eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}
impl<S> Debug for Socket<S> {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.debug_struct("Socket")
            .field("fd", &self.inner.fd.as_raw_fd())
            .field("associated", &self.inner.assoc.get().is_some())
            .finish()
    }
}

struct Inner<S> {
    fd: OwnedFd,
    assoc: OnceLock<Association<S>>,
    inbound: Mutex<OpContext<S>>,
    outbound: Mutex<OpContext<S>>,
}

struct Association<S> {
    queue: Arc<BlockingQueue<CompletionStatus<S>>>,
    driver: Arc<DriverShared<S>>,
    state: Arc<S>,
}

/// Persistent per-direction operation context.
///
/// One lives on each half of the socket and is reconfigured in place on every issuance, so the
/// hot send/receive path never allocates: the caller's buffer is moved in here for the duration
/// of the operation and moved back out through the completion record.
struct OpContext<S> {
    /// The operation currently in flight on this half, if any.
    active: Option<OperationKind>,
    buffer: Vec<u8>,
    offset: usize,
    count: usize,
    flags: c_int,
    /// The socket a pending accept adopts its connection into. Inbound half only.
    accept_into: Option<Socket<S>>,
}
impl<S> OpContext<S> {
    fn new() -> Self {
        Self {
            active: None,
            buffer: Vec::new(),
            offset: 0,
            count: 0,
            flags: 0,
            accept_into: None,
        }
    }
    fn begin(&mut self, kind: OperationKind) -> io::Result<()> {
        if self.active.is_some() {
            return Err(io::Error::other(
                "an operation of the same direction is already in flight on this socket",
            ));
        }
        self.active = Some(kind);
        Ok(())
    }
    fn set_transfer(
        &mut self,
        buffer: Vec<u8>,
        offset: usize,
        count: usize,
        flags: c_int,
    ) -> io::Result<()> {
        if offset.checked_add(count).map_or(true, |end| end > buffer.len()) {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "transfer range is out of bounds of the buffer",
            ));
        }
        self.buffer = buffer;
        self.offset = offset;
        self.count = count;
        self.flags = flags;
        Ok(())
    }
    fn transfer_range(&self) -> Range<usize> {
        self.offset..self.offset + self.count
    }
}

/// What one native attempt at the active operation amounted to.
enum Step {
    Done(Outcome, usize),
    Wait,
}
fn step_from(r: io::Result<usize>) -> Step {
    match r {
        Ok(n) => Step::Done(Outcome::Success, n),
        Err(e) if would_block(&e) => Step::Wait,
        Err(e) => Step::Done(Outcome::from_io_error(&e), 0),
    }
}
fn would_block(e: &io::Error) -> bool {
    e.kind() == io::ErrorKind::WouldBlock
}

impl<S: Send + Sync + 'static> Socket<S> {
    pub(crate) fn new(family: AddressFamily) -> io::Result<Self> {
        let fd = c_wrappers::tcp_socket(family)?;
        Ok(Self {
            inner: Arc::new(Inner {
                fd,
                assoc: OnceLock::new(),
                inbound: Mutex::new(OpContext::new()),
                outbound: Mutex::new(OpContext::new()),
            }),
        })
    }

    fn fd(&self) -> BorrowedFd<'_> {
        self.inner.fd.as_fd()
    }
    pub(crate) fn raw_fd(&self) -> RawFd {
        self.inner.fd.as_raw_fd()
    }
    fn assoc(&self) -> io::Result<&Association<S>> {
        self.inner.assoc.get().ok_or_else(|| {
            io::Error::new(
                io::ErrorKind::NotConnected,
                "socket is not associated with a completion port",
            )
        })
    }
    fn ctx(&self, dir: Direction) -> MutexGuard<'_, OpContext<S>> {
        match dir {
            Direction::In => self.inner.inbound.lock_unpoisoned(),
            Direction::Out => self.inner.outbound.lock_unpoisoned(),
        }
    }

    pub(crate) fn associate(
        &self,
        queue: Arc<BlockingQueue<CompletionStatus<S>>>,
        driver: Arc<DriverShared<S>>,
        state: S,
    ) -> io::Result<()> {
        let assoc = Association { queue, driver, state: Arc::new(state) };
        self.inner.assoc.set(assoc).map_err(|_| {
            io::Error::new(
                io::ErrorKind::AlreadyExists,
                "socket is already associated with a completion port",
            )
        })
    }

    pub(crate) fn bind(&self, address: SocketAddr) -> io::Result<()> {
        c_wrappers::bind(self.fd(), address)
    }
    pub(crate) fn listen(&self, backlog: i32) -> io::Result<()> {
        c_wrappers::listen(self.fd(), backlog)
    }
    pub(crate) fn local_addr(&self) -> io::Result<SocketAddr> {
        c_wrappers::local_addr(self.fd())
    }
    pub(crate) fn peer_addr(&self) -> io::Result<SocketAddr> {
        c_wrappers::peer_addr(self.fd())
    }
    pub(crate) fn option(&self, level: i32, name: i32) -> io::Result<i32> {
        c_wrappers::getsockopt_int(self.fd(), level, name)
    }
    pub(crate) fn set_option(&self, level: i32, name: i32, value: i32) -> io::Result<()> {
        c_wrappers::setsockopt_int(self.fd(), level, name, value)
    }
    pub(crate) fn option_raw(&self, level: i32, name: i32, buf: &mut [u8]) -> io::Result<usize> {
        c_wrappers::getsockopt_raw(self.fd(), level, name, buf)
    }
    pub(crate) fn set_option_raw(&self, level: i32, name: i32, buf: &[u8]) -> io::Result<()> {
        c_wrappers::setsockopt_raw(self.fd(), level, name, buf)
    }
    pub(crate) fn io_control(&self, code: u32, data: &mut [u8]) -> io::Result<usize> {
        c_wrappers::ioctl(self.fd(), code, data)?;
        Ok(0)
    }

    pub(crate) fn connect(&self, address: SocketAddr) -> io::Result<()> {
        self.assoc()?;
        let mut ctx = self.ctx(Direction::Out);
        ctx.begin(OperationKind::Connect)?;
        match c_wrappers::connect(self.fd(), address) {
            Ok(()) => self.complete(&mut ctx, Outcome::Success, 0),
            Err(e) if e.raw_os_error() == Some(libc::EINPROGRESS) => {
                self.arm_locked(Direction::Out, &mut ctx)
            }
            Err(e) => self.complete(&mut ctx, Outcome::from_io_error(&e), 0),
        }
    }

    pub(crate) fn accept(&self, conn: &Self) -> io::Result<()> {
        self.assoc()?;
        let mut ctx = self.ctx(Direction::In);
        ctx.begin(OperationKind::Accept)?;
        ctx.accept_into = Some(conn.clone());
        self.finish_issue(Direction::In, ctx)
    }

    pub(crate) fn send(
        &self,
        buffer: Vec<u8>,
        offset: usize,
        count: usize,
        flags: i32,
    ) -> io::Result<()> {
        self.assoc()?;
        let mut ctx = self.ctx(Direction::Out);
        ctx.begin(OperationKind::Send)?;
        if let Err(e) = ctx.set_transfer(buffer, offset, count, flags) {
            ctx.active = None;
            return Err(e);
        }
        self.finish_issue(Direction::Out, ctx)
    }

    pub(crate) fn recv(
        &self,
        buffer: Vec<u8>,
        offset: usize,
        count: usize,
        flags: i32,
    ) -> io::Result<()> {
        self.assoc()?;
        let mut ctx = self.ctx(Direction::In);
        ctx.begin(OperationKind::Receive)?;
        // A leftover accept target from a prior accept on this half must not survive into a
        // receive.
        ctx.accept_into = None;
        if let Err(e) = ctx.set_transfer(buffer, offset, count, flags) {
            ctx.active = None;
            return Err(e);
        }
        self.finish_issue(Direction::In, ctx)
    }

    pub(crate) fn disconnect(&self) -> io::Result<()> {
        let assoc = self.assoc()?;
        let outcome = match c_wrappers::shutdown_both(self.fd()) {
            Ok(()) => Outcome::Success,
            Err(e) => Outcome::from_io_error(&e),
        };
        assoc.queue.add(CompletionStatus {
            socket: Some(crate::AsyncSocket(self.clone())),
            state: Some(Arc::clone(&assoc.state)),
            operation: OperationKind::Disconnect,
            outcome,
            bytes_transferred: 0,
            buffer: None,
        });
        Ok(())
    }

    /// First native attempt of a freshly issued operation: completes it on the spot if the
    /// platform lets it, arms the driver otherwise. This is what makes immediate and
    /// asynchronous completion indistinguishable to the consumer.
    fn finish_issue(&self, dir: Direction, mut ctx: MutexGuard<'_, OpContext<S>>) -> io::Result<()> {
        match self.attempt(&mut ctx)? {
            Attempt::Completed => Ok(()),
            Attempt::WouldBlock => self.arm_locked(dir, &mut ctx),
        }
    }

    fn arm_locked(&self, dir: Direction, ctx: &mut OpContext<S>) -> io::Result<()> {
        let assoc = self.assoc()?;
        let req = ArmRequest { fd: self.raw_fd(), dir, socket: self.clone() };
        if let Err(e) = assoc.driver.arm(req) {
            ctx.active = None;
            return Err(e);
        }
        Ok(())
    }

    /// Driver callback: the descriptor reported ready for `dir`. Runs on whatever thread the
    /// driver supplies.
    pub(crate) fn on_ready(&self, dir: Direction) -> ReadyOutcome {
        let mut ctx = self.ctx(dir);
        if ctx.active.is_none() {
            // Readiness outlived the operation it was armed for.
            return ReadyOutcome::Stale;
        }
        match self.attempt(&mut ctx) {
            Ok(Attempt::Completed) | Err(_) => ReadyOutcome::Completed,
            Ok(Attempt::WouldBlock) => ReadyOutcome::Rearm,
        }
    }

    /// One native attempt at the context's active operation. On anything but a would-block
    /// result, builds the completion record and enqueues it.
    fn attempt(&self, ctx: &mut OpContext<S>) -> io::Result<Attempt> {
        let kind = match ctx.active {
            Some(kind) => kind,
            None => unreachable!("attempt on an idle operation context"),
        };
        let step = match kind {
            OperationKind::Send => {
                let range = ctx.transfer_range();
                step_from(c_wrappers::send(self.fd(), &ctx.buffer[range], ctx.flags))
            }
            OperationKind::Receive => {
                let range = ctx.transfer_range();
                step_from(c_wrappers::recv(self.fd(), &mut ctx.buffer[range], ctx.flags))
            }
            OperationKind::Accept => match c_wrappers::accept(self.fd()) {
                Ok(accepted) => {
                    let target = match ctx.accept_into.take() {
                        Some(target) => target,
                        None => unreachable!("accept context has no target socket"),
                    };
                    match c_wrappers::replace_fd(accepted, target.raw_fd()) {
                        Ok(()) => Step::Done(Outcome::Success, 0),
                        Err(e) => Step::Done(Outcome::from_io_error(&e), 0),
                    }
                }
                Err(e) if would_block(&e) => Step::Wait,
                Err(e) => Step::Done(Outcome::from_io_error(&e), 0),
            },
            OperationKind::Connect => match c_wrappers::take_socket_error(self.fd()) {
                Ok(code) => Step::Done(Outcome::from_raw(code), 0),
                Err(e) => Step::Done(Outcome::from_io_error(&e), 0),
            },
            OperationKind::Disconnect | OperationKind::Signal => {
                unreachable!("operation kind cannot be in flight on a context")
            }
        };
        match step {
            Step::Done(outcome, bytes) => {
                self.complete(ctx, outcome, bytes)?;
                Ok(Attempt::Completed)
            }
            Step::Wait => Ok(Attempt::WouldBlock),
        }
    }

    /// Retires the active operation, building its record verbatim from the native result and
    /// enqueueing it on the associated port.
    fn complete(&self, ctx: &mut OpContext<S>, outcome: Outcome, bytes: usize) -> io::Result<()> {
        let kind = match ctx.active.take() {
            Some(kind) => kind,
            None => unreachable!("completing an idle operation context"),
        };
        let buffer = matches!(kind, OperationKind::Send | OperationKind::Receive)
            .then(|| take(&mut ctx.buffer));
        let assoc = self.assoc()?;
        assoc.queue.add(CompletionStatus {
            socket: Some(crate::AsyncSocket(self.clone())),
            state: Some(Arc::clone(&assoc.state)),
            operation: kind,
            outcome,
            bytes_transferred: bytes,
            buffer,
        });
        Ok(())
    }
}

enum Attempt {
    Completed,
    WouldBlock,
}
