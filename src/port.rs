//! The completion port: associates sockets, drains completions, injects wakeups.

use {
    crate::{
        completion::CompletionStatus,
        os::imp,
        queue::BlockingQueue,
        socket::AsyncSocket,
    },
    std::{
        fmt::{self, Debug, Formatter},
        io,
        sync::Arc,
        time::Duration,
    },
};

/// Selects the machinery that turns native readiness into completion records.
///
/// This is the explicit form of "force a specific backend": callers that care pass it to
/// [`CompletionPort::with_driver`]; everyone else gets [`Auto`](Self::Auto) from
/// [`CompletionPort::new`]. There is no process-global override.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Hash)]
pub enum Driver {
    /// The platform default — currently [`Poll`](Self::Poll) everywhere.
    #[default]
    Auto,
    /// One thread per port, multiplexing all armed operations through the platform's socket
    /// poll call.
    Poll,
    /// One short-lived blocking thread per armed operation. Simpler and fully independent
    /// per operation, at the cost of a thread apiece.
    Threaded,
}

/// A queue of [`CompletionStatus`] records fed by every socket associated with it, drained by
/// any number of consumer threads.
///
/// `S` is the per-socket state type: whatever is passed to [`associate()`](Self::associate)
/// comes back in each of that socket's records, and [`signal()`](Self::signal) carries one
/// directly.
///
/// # Disposal
/// Dropping the port stops its driver; operations still in flight at that moment are abandoned
/// and their records never appear. A consumer blocked in [`wait()`](Self::wait) borrows the
/// port, so the port cannot be dropped out from under it — to release blocked consumers, call
/// [`close()`](Self::close), which wakes each of them with a synthetic
/// [`Signal`](crate::OperationKind::Signal) record.
pub struct CompletionPort<S> {
    queue: Arc<BlockingQueue<CompletionStatus<S>>>,
    driver: Arc<imp::DriverShared<S>>,
}

impl<S: Send + Sync + 'static> CompletionPort<S> {
    /// Creates a port with the default driver.
    pub fn new() -> io::Result<Self> {
        Self::with_driver(Driver::Auto)
    }

    /// Creates a port with an explicitly chosen driver.
    pub fn with_driver(driver: Driver) -> io::Result<Self> {
        Ok(Self {
            queue: Arc::new(BlockingQueue::new()),
            driver: imp::DriverShared::start(driver)?,
        })
    }

    /// Attaches `state` to `socket` and makes this port the destination for all of its future
    /// completion records.
    ///
    /// A socket can be associated at most once; a second attempt fails with
    /// [`AlreadyExists`](io::ErrorKind::AlreadyExists). Associations are never removed.
    pub fn associate(&self, socket: &AsyncSocket<S>, state: S) -> io::Result<()> {
        socket.0.associate(Arc::clone(&self.queue), Arc::clone(&self.driver), state)
    }

    /// Removes and returns the next completion record, blocking until one arrives or the
    /// timeout elapses. A timeout of `None` blocks with no deadline.
    ///
    /// `None` as the return value means the budget ran out with nothing available — a normal
    /// outcome to branch on, not an error.
    pub fn wait(&self, timeout: Option<Duration>) -> Option<CompletionStatus<S>> {
        self.queue.try_take(timeout)
    }

    /// Drains up to the vector's spare capacity worth of completion records in one call.
    ///
    /// Blocks (within `timeout`) for the first record only, then opportunistically takes
    /// whatever else is already queued, without blocking further. Returns how many records were
    /// appended to `out`; `0` means the wait timed out with nothing available (or `out` had no
    /// spare capacity to begin with).
    pub fn wait_many(
        &self,
        out: &mut Vec<CompletionStatus<S>>,
        timeout: Option<Duration>,
    ) -> usize {
        let room = out.capacity() - out.len();
        if room == 0 {
            return 0;
        }
        let Some(first) = self.queue.try_take(timeout) else {
            return 0;
        };
        out.push(first);
        let mut taken = 1;
        while taken < room {
            match self.queue.try_take(Some(Duration::ZERO)) {
                Some(status) => {
                    out.push(status);
                    taken += 1;
                }
                None => break,
            }
        }
        taken
    }

    /// Enqueues a synthetic [`Signal`](crate::OperationKind::Signal) record carrying `state`,
    /// tied to no socket — an out-of-band wakeup for whichever consumer dequeues it next.
    pub fn signal(&self, state: S) {
        self.queue.add(CompletionStatus::signal(Some(Arc::new(state))));
    }

    /// Closes the port's queue: every consumer blocked in [`wait()`](Self::wait) at this moment
    /// is woken by a synthetic stateless [`Signal`](crate::OperationKind::Signal) record
    /// injected on its behalf.
    ///
    /// Closing does not discard queued records and does not stop producers; it only makes
    /// further waits non-blocking — once the queue runs dry they return `None` immediately.
    pub fn close(&self) {
        let waiters = self.queue.close();
        for _ in 0..waiters {
            self.queue.add(CompletionStatus::signal(None));
        }
    }

    /// The number of records currently queued.
    pub fn queued(&self) -> usize {
        self.queue.len()
    }
}

impl<S> Drop for CompletionPort<S> {
    fn drop(&mut self) {
        self.driver.shutdown();
    }
}

impl<S> Debug for CompletionPort<S> {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.debug_struct("CompletionPort").field("queue", &self.queue).finish()
    }
}
