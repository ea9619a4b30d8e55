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
    std::{
        fmt::{self, Debug, Formatter},
        io,
        mem::take,
        net::SocketAddr,
        ops::Range,
        sync::{
            atomic::{AtomicUsize, Ordering},
            Arc, Mutex, MutexGuard, OnceLock,
        },
    },
    windows_sys::Win32::Networking::WinSock::SOCKET,
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
            .field("socket", &self.inner.sock.get())
            .field("associated", &self.inner.assoc.get().is_some())
            .finish()
    }
}

/// Holder of the native socket handle. Swappable because accept adoption has no `dup2` on
/// Windows: the accepted handle replaces the target's and the old one is closed.
struct SocketCell(AtomicUsize);
impl SocketCell {
    fn new(sock: SOCKET) -> Self {
        Self(AtomicUsize::new(sock))
    }
    fn get(&self) -> SOCKET {
        self.0.load(Ordering::Acquire)
    }
    fn replace(&self, sock: SOCKET) -> SOCKET {
        self.0.swap(sock, Ordering::AcqRel)
    }
}
impl Drop for SocketCell {
    fn drop(&mut self) {
        c_wrappers::close(self.get());
    }
}

struct Inner<S> {
    sock: SocketCell,
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
    flags: i32,
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
        flags: i32,
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
        let sock = c_wrappers::tcp_socket(family)?;
        Ok(Self {
            inner: Arc::new(Inner {
                sock: SocketCell::new(sock),
                assoc: OnceLock::new(),
                inbound: Mutex::new(OpContext::new()),
                outbound: Mutex::new(OpContext::new()),
            }),
        })
    }

    pub(crate) fn raw(&self) -> SOCKET {
        self.inner.sock.get()
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
        c_wrappers::bind_addr(self.raw(), address)
    }
    pub(crate) fn listen(&self, backlog: i32) -> io::Result<()> {
        c_wrappers::listen_on(self.raw(), backlog)
    }
    pub(crate) fn local_addr(&self) -> io::Result<SocketAddr> {
        c_wrappers::local_addr(self.raw())
    }
    pub(crate) fn peer_addr(&self) -> io::Result<SocketAddr> {
        c_wrappers::peer_addr(self.raw())
    }
    pub(crate) fn option(&self, level: i32, name: i32) -> io::Result<i32> {
        c_wrappers::getsockopt_int(self.raw(), level, name)
    }
    pub(crate) fn set_option(&self, level: i32, name: i32, value: i32) -> io::Result<()> {
        c_wrappers::setsockopt_int(self.raw(), level, name, value)
    }
    pub(crate) fn option_raw(&self, level: i32, name: i32, buf: &mut [u8]) -> io::Result<usize> {
        c_wrappers::getsockopt_raw(self.raw(), level, name, buf)
    }
    pub(crate) fn set_option_raw(&self, level: i32, name: i32, buf: &[u8]) -> io::Result<()> {
        c_wrappers::setsockopt_raw(self.raw(), level, name, buf)
    }
    pub(crate) fn io_control(&self, code: u32, data: &mut [u8]) -> io::Result<usize> {
        c_wrappers::io_control(self.raw(), code, data)
    }

    pub(crate) fn connect(&self, address: SocketAddr) -> io::Result<()> {
        self.assoc()?;
        let mut ctx = self.ctx(Direction::Out);
        ctx.begin(OperationKind::Connect)?;
        match c_wrappers::connect_addr(self.raw(), address) {
            Ok(()) => self.complete(&mut ctx, Outcome::Success, 0),
            // WinSock reports an in-progress nonblocking connect as WSAEWOULDBLOCK.
            Err(e) if would_block(&e) => self.arm_locked(Direction::Out, &mut ctx),
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
        let outcome = match c_wrappers::shutdown_both(self.raw()) {
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
        let req = ArmRequest { sock: self.raw(), dir, socket: self.clone() };
        if let Err(e) = assoc.driver.arm(req) {
            ctx.active = None;
            return Err(e);
        }
        Ok(())
    }

    /// Driver callback: the socket reported ready for `dir`. Runs on whatever thread the driver
    /// supplies.
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
                step_from(c_wrappers::send_on(self.raw(), &ctx.buffer[range], ctx.flags))
            }
            OperationKind::Receive => {
                let range = ctx.transfer_range();
                step_from(c_wrappers::recv_on(self.raw(), &mut ctx.buffer[range], ctx.flags))
            }
            OperationKind::Accept => match c_wrappers::accept_on(self.raw()) {
                Ok(accepted) => {
                    let target = match ctx.accept_into.take() {
                        Some(target) => target,
                        None => unreachable!("accept context has no target socket"),
                    };
                    let old = target.inner.sock.replace(accepted);
                    c_wrappers::close(old);
                    Step::Done(Outcome::Success, 0)
                }
                Err(e) if would_block(&e) => Step::Wait,
                Err(e) => Step::Done(Outcome::from_io_error(&e), 0),
            },
            OperationKind::Connect => match c_wrappers::take_socket_error(self.raw()) {
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
