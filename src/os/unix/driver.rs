//! The stand-in for the platform's asynchronous I/O machinery: waits for armed operations to
//! become ready and runs their completion attempts on its own threads.

use {
    super::{c_wrappers, socket::Socket},
    crate::{misc::LockExt, port::Driver, queue::ConcurrentQueue},
    std::{
        io,
        os::fd::{AsFd, AsRawFd, OwnedFd, RawFd},
        sync::{
            atomic::{AtomicBool, Ordering},
            Arc, Mutex,
        },
        thread,
    },
};

/// Which half of a socket an operation context belongs to.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub(crate) enum Direction {
    /// Accept-class and receive-class operations.
    In,
    /// Connect-class and send-class operations.
    Out,
}
impl Direction {
    fn poll_events(self) -> i16 {
        match self {
            Self::In => libc::POLLIN,
            Self::Out => libc::POLLOUT,
        }
    }
}

/// A would-block operation handed over for readiness tracking.
///
/// Holds a strong handle to the socket: an armed operation keeps its descriptor alive until the
/// completion attempt has run, which is what makes "socket dropped while a completion callback
/// is in flight" impossible.
pub(crate) struct ArmRequest<S> {
    pub fd: RawFd,
    pub dir: Direction,
    pub socket: Socket<S>,
}

/// What the socket's completion attempt did with a readiness report.
pub(crate) enum ReadyOutcome {
    /// The operation retired; drop the entry.
    Completed,
    /// Still would-block; keep watching.
    Rearm,
    /// No operation is in flight on that half; drop the entry.
    Stale,
}

/// The readiness engine shared by a port and all of its associated sockets.
pub(crate) enum DriverShared<S> {
    Poll(Arc<PollDriver<S>>),
    Threaded,
}

impl<S: Send + Sync + 'static> DriverShared<S> {
    pub(crate) fn start(kind: Driver) -> io::Result<Arc<Self>> {
        match kind {
            Driver::Auto | Driver::Poll => PollDriver::start(),
            Driver::Threaded => Ok(Arc::new(Self::Threaded)),
        }
    }
    pub(crate) fn arm(&self, req: ArmRequest<S>) -> io::Result<()> {
        match self {
            Self::Poll(driver) => driver.arm(req),
            Self::Threaded => threaded_arm(req),
        }
    }
}

impl<S> DriverShared<S> {
    /// Stops the machinery. Armed operations that have not completed are abandoned.
    pub(crate) fn shutdown(&self) {
        if let Self::Poll(driver) = self {
            driver.shutdown();
        }
    }
}

/// One thread per port, multiplexing every armed operation through `poll(2)`, woken through a
/// self-pipe whenever there is something new to watch.
pub(crate) struct PollDriver<S> {
    regq: ConcurrentQueue<ArmRequest<S>>,
    wake_tx: OwnedFd,
    closed: AtomicBool,
    thread: Mutex<Option<thread::JoinHandle<()>>>,
}

impl<S: Send + Sync + 'static> PollDriver<S> {
    fn start() -> io::Result<Arc<DriverShared<S>>> {
        let (wake_rx, wake_tx) = c_wrappers::wake_pipe()?;
        let driver = Arc::new(Self {
            regq: ConcurrentQueue::new(),
            wake_tx,
            closed: AtomicBool::new(false),
            thread: Mutex::new(None),
        });
        let for_thread = Arc::clone(&driver);
        let handle = thread::Builder::new()
            .name("sockport-driver".into())
            .spawn(move || run(wake_rx, for_thread))?;
        *driver.thread.lock_unpoisoned() = Some(handle);
        Ok(Arc::new(DriverShared::Poll(driver)))
    }

    fn arm(&self, req: ArmRequest<S>) -> io::Result<()> {
        if self.closed.load(Ordering::Acquire) {
            return Err(io::Error::new(
                io::ErrorKind::BrokenPipe,
                "completion port has been dropped",
            ));
        }
        self.regq.enqueue(req);
        c_wrappers::write_wake_byte(self.wake_tx.as_fd());
        Ok(())
    }
}

impl<S> PollDriver<S> {
    fn shutdown(&self) {
        self.closed.store(true, Ordering::Release);
        c_wrappers::write_wake_byte(self.wake_tx.as_fd());
        if let Some(handle) = self.thread.lock_unpoisoned().take() {
            let _ = handle.join();
        }
    }
}

fn run<S: Send + Sync + 'static>(wake_rx: OwnedFd, driver: Arc<PollDriver<S>>) {
    let mut armed: Vec<ArmRequest<S>> = Vec::new();
    let mut pollfds: Vec<libc::pollfd> = Vec::new();
    loop {
        pollfds.clear();
        pollfds.push(libc::pollfd { fd: wake_rx.as_raw_fd(), events: libc::POLLIN, revents: 0 });
        pollfds.extend(
            armed
                .iter()
                .map(|req| libc::pollfd { fd: req.fd, events: req.dir.poll_events(), revents: 0 }),
        );

        let rc = unsafe { libc::poll(pollfds.as_mut_ptr(), pollfds.len() as libc::nfds_t, -1) };
        if rc < 0 {
            if io::Error::last_os_error().raw_os_error() == Some(libc::EINTR) {
                continue;
            }
            break;
        }

        let woken = pollfds.first().map_or(false, |pfd| pfd.revents != 0);

        if !armed.is_empty() {
            // Completion callbacks run right here, on the driver thread. Error conditions
            // (POLLERR/POLLHUP/POLLNVAL) also count as readiness: the retried native call is
            // what turns them into a concrete error code for the record.
            let mut still_armed = Vec::with_capacity(armed.len());
            for (req, pfd) in armed.drain(..).zip(pollfds.iter().skip(1)) {
                if pfd.revents == 0 {
                    still_armed.push(req);
                    continue;
                }
                if let ReadyOutcome::Rearm = req.socket.on_ready(req.dir) {
                    still_armed.push(req);
                }
            }
            armed = still_armed;
        }

        if woken {
            c_wrappers::drain_pipe(wake_rx.as_fd());
            if driver.closed.load(Ordering::Acquire) {
                break;
            }
            while let Some(req) = driver.regq.try_dequeue() {
                armed.push(req);
            }
        }
    }
}

/// The fallback engine: a short-lived thread per armed operation, blocking in `poll` on that one
/// descriptor until the operation retires. No shared structures, no wakeup plumbing — and no way
/// to abandon an operation early, which is why the multiplexing driver is the default.
fn threaded_arm<S: Send + Sync + 'static>(req: ArmRequest<S>) -> io::Result<()> {
    thread::Builder::new()
        .name("sockport-op".into())
        .spawn(move || {
            let mut pfd =
                libc::pollfd { fd: req.fd, events: req.dir.poll_events(), revents: 0 };
            loop {
                pfd.revents = 0;
                let rc = unsafe { libc::poll(&mut pfd, 1, -1) };
                if rc < 0 {
                    if io::Error::last_os_error().raw_os_error() == Some(libc::EINTR) {
                        continue;
                    }
                    // Let the completion attempt turn the descriptor's state into a record
                    // rather than dropping the operation on the floor.
                }
                if let ReadyOutcome::Rearm = req.socket.on_ready(req.dir) {
                    continue;
                }
                break;
            }
        })
        .map(drop)
}
