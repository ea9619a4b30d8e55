//! The stand-in for the platform's asynchronous I/O machinery: waits for armed operations to
//! become ready and runs their completion attempts on its own threads.

use {
    super::{c_wrappers, c_wrappers::WakeSocket, socket::Socket},
    crate::{misc::LockExt, port::Driver, queue::ConcurrentQueue},
    std::{
        io,
        sync::{
            atomic::{AtomicBool, Ordering},
            Arc, Mutex,
        },
        thread,
    },
    windows_sys::Win32::Networking::WinSock::{POLLRDNORM, POLLWRNORM, SOCKET, WSAPOLLFD},
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
    // WSAPoll takes the NORM flavors; the POLLIN/POLLOUT aggregates are rejected as arguments.
    fn poll_events(self) -> i16 {
        match self {
            Self::In => POLLRDNORM as i16,
            Self::Out => POLLWRNORM as i16,
        }
    }
}

/// A would-block operation handed over for readiness tracking.
///
/// Holds a strong handle to the socket: an armed operation keeps its handle alive until the
/// completion attempt has run, which is what makes "socket dropped while a completion callback
/// is in flight" impossible.
pub(crate) struct ArmRequest<S> {
    pub sock: SOCKET,
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
            Driver::Threaded => {
                c_wrappers::init()?;
                Ok(Arc::new(Self::Threaded))
            }
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

/// One thread per port, multiplexing every armed operation through `WSAPoll`, woken through a
/// self-connected loopback datagram socket whenever there is something new to watch.
pub(crate) struct PollDriver<S> {
    regq: ConcurrentQueue<ArmRequest<S>>,
    waker: WakeSocket,
    closed: AtomicBool,
    thread: Mutex<Option<thread::JoinHandle<()>>>,
}

impl<S: Send + Sync + 'static> PollDriver<S> {
    fn start() -> io::Result<Arc<DriverShared<S>>> {
        let waker = WakeSocket::new()?;
        let driver = Arc::new(Self {
            regq: ConcurrentQueue::new(),
            waker,
            closed: AtomicBool::new(false),
            thread: Mutex::new(None),
        });
        let for_thread = Arc::clone(&driver);
        let handle = thread::Builder::new()
            .name("sockport-driver".into())
            .spawn(move || run(for_thread))?;
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
        self.waker.wake();
        Ok(())
    }
}

impl<S> PollDriver<S> {
    fn shutdown(&self) {
        self.closed.store(true, Ordering::Release);
        self.waker.wake();
        if let Some(handle) = self.thread.lock_unpoisoned().take() {
            let _ = handle.join();
        }
    }
}

fn run<S: Send + Sync + 'static>(driver: Arc<PollDriver<S>>) {
    let mut armed: Vec<ArmRequest<S>> = Vec::new();
    let mut pollfds: Vec<WSAPOLLFD> = Vec::new();
    loop {
        pollfds.clear();
        pollfds.push(WSAPOLLFD {
            fd: driver.waker.raw(),
            events: Direction::In.poll_events(),
            revents: 0,
        });
        pollfds.extend(
            armed
                .iter()
                .map(|req| WSAPOLLFD { fd: req.sock, events: req.dir.poll_events(), revents: 0 }),
        );

        if c_wrappers::poll(&mut pollfds).is_err() {
            break;
        }

        let woken = pollfds.first().map_or(false, |pfd| pfd.revents != 0);

        if !armed.is_empty() {
            // Completion callbacks run right here, on the driver thread. Error conditions
            // (POLLERR/POLLHUP) also count as readiness: the retried native call is what turns
            // them into a concrete error code for the record.
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
            driver.waker.drain();
            if driver.closed.load(Ordering::Acquire) {
                break;
            }
            while let Some(req) = driver.regq.try_dequeue() {
                armed.push(req);
            }
        }
    }
}

/// The fallback engine: a short-lived thread per armed operation, blocking in `WSAPoll` on that
/// one socket until the operation retires. No shared structures, no wakeup plumbing — and no way
/// to abandon an operation early, which is why the multiplexing driver is the default.
fn threaded_arm<S: Send + Sync + 'static>(req: ArmRequest<S>) -> io::Result<()> {
    thread::Builder::new()
        .name("sockport-op".into())
        .spawn(move || {
            let mut pfd = [WSAPOLLFD { fd: req.sock, events: req.dir.poll_events(), revents: 0 }];
            loop {
                pfd[0].revents = 0;
                // On a poll error, let the completion attempt turn the socket's state into a
                // record rather than dropping the operation on the floor.
                let _ = c_wrappers::poll(&mut pfd);
                if let ReadyOutcome::Rearm = req.socket.on_ready(req.dir) {
                    continue;
                }
                break;
            }
        })
        .map(drop)
}
