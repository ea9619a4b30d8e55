//! The synchronization primitives backing [`CompletionPort`](crate::CompletionPort).
//!
//! Both queues are ordinary value containers with no knowledge of sockets or completions and can
//! be used on their own. [`BlockingQueue`] is the consumer-facing half of the crate: a strict
//! FIFO whose removal operation can block with a millisecond-granularity budget.
//! [`ConcurrentQueue`] is the non-blocking handoff used where suspending the caller would be
//! unnecessary overhead.

use {
    crate::misc::{Deadline, LockExt},
    std::{
        collections::VecDeque,
        fmt::{self, Debug, Formatter},
        sync::{Condvar, Mutex, PoisonError},
        time::Duration,
    },
};

/// A thread-safe FIFO queue with blocking, timeout-bounded removal.
///
/// Elements come out in exactly the order their [`add()`](Self::add) calls committed, for any
/// number of concurrent producers and consumers. One mutex protects both the element sequence
/// and the wait/notify condition, which is what makes lost wakeups impossible: a producer can
/// never slip an element in between a consumer's emptiness check and its wait.
pub struct BlockingQueue<T> {
    state: Mutex<State<T>>,
    filled: Condvar,
}

struct State<T> {
    items: VecDeque<T>,
    waiters: usize,
    closed: bool,
}

impl<T> BlockingQueue<T> {
    /// Creates an empty queue.
    pub fn new() -> Self {
        Self {
            state: Mutex::new(State { items: VecDeque::new(), waiters: 0, closed: false }),
            filled: Condvar::new(),
        }
    }

    /// Appends an element to the tail of the queue. Never blocks (beyond mutual exclusion) and
    /// never fails.
    ///
    /// If the queue was empty, every blocked [`try_take()`](Self::try_take) call is woken;
    /// waiters that lose the race for the element simply resume waiting on their remaining
    /// budget.
    pub fn add(&self, item: T) {
        let mut state = self.state.lock_unpoisoned();
        state.items.push_back(item);
        if state.items.len() == 1 {
            self.filled.notify_all();
        }
    }

    /// Removes and returns the head of the queue, blocking until an element arrives or the
    /// timeout elapses.
    ///
    /// A timeout of `None` blocks with no deadline. `None` as the *return value* means the
    /// budget ran out with nothing available — normal control flow, not an error. The deadline
    /// is measured from call entry on the monotonic clock, and the wait re-checks emptiness
    /// after every wakeup, so neither spurious wakeups nor races with other consumers can
    /// produce an early `None`.
    ///
    /// On a [closed](Self::close) queue, remaining elements are still handed out, but instead of
    /// blocking on an empty queue this returns `None` immediately.
    pub fn try_take(&self, timeout: Option<Duration>) -> Option<T> {
        let mut state = self.state.lock_unpoisoned();
        if let Some(item) = state.items.pop_front() {
            return Some(item);
        }
        if state.closed || timeout == Some(Duration::ZERO) {
            return None;
        }
        let deadline = Deadline::new(timeout);
        state.waiters += 1;
        let item = loop {
            // Re-checked on every wake: another consumer may have raced us to the element, and
            // condition variables are allowed to wake spuriously.
            if let Some(item) = state.items.pop_front() {
                break Some(item);
            }
            if state.closed {
                break None;
            }
            let Some(budget) = deadline.remaining() else {
                break None;
            };
            state = match budget {
                Some(budget) => {
                    self.filled
                        .wait_timeout(state, budget)
                        .unwrap_or_else(PoisonError::into_inner)
                        .0
                }
                None => self.filled.wait(state).unwrap_or_else(PoisonError::into_inner),
            };
        };
        state.waiters -= 1;
        item
    }

    /// Marks the queue as closed and wakes every blocked consumer, returning how many of those
    /// there were at that instant.
    ///
    /// Closing does not discard elements and does not stop producers: `add()` keeps working, and
    /// consumers keep draining whatever is present — they just no longer block once the queue
    /// runs dry.
    pub fn close(&self) -> usize {
        let mut state = self.state.lock_unpoisoned();
        state.closed = true;
        self.filled.notify_all();
        state.waiters
    }

    /// Whether [`close()`](Self::close) has been called.
    pub fn is_closed(&self) -> bool {
        self.state.lock_unpoisoned().closed
    }

    /// The number of elements currently queued.
    pub fn len(&self) -> usize {
        self.state.lock_unpoisoned().items.len()
    }

    /// Whether the queue is currently empty.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl<T> Default for BlockingQueue<T> {
    fn default() -> Self {
        Self::new()
    }
}
impl<T> Debug for BlockingQueue<T> {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        let state = self.state.lock_unpoisoned();
        f.debug_struct("BlockingQueue")
            .field("len", &state.items.len())
            .field("waiters", &state.waiters)
            .field("closed", &state.closed)
            .finish()
    }
}

/// A thread-safe FIFO queue without blocking semantics.
///
/// [`enqueue()`](Self::enqueue) always succeeds and [`try_dequeue()`](Self::try_dequeue) returns
/// immediately, empty-handed if need be. Strict mutual exclusion, no timeout logic.
pub struct ConcurrentQueue<T>(Mutex<VecDeque<T>>);

impl<T> ConcurrentQueue<T> {
    /// Creates an empty queue.
    pub fn new() -> Self {
        Self(Mutex::new(VecDeque::new()))
    }
    /// Appends an element to the tail of the queue.
    pub fn enqueue(&self, item: T) {
        self.0.lock_unpoisoned().push_back(item);
    }
    /// Removes and returns the head of the queue, or `None` if it is empty right now.
    pub fn try_dequeue(&self) -> Option<T> {
        self.0.lock_unpoisoned().pop_front()
    }
    /// The number of elements currently queued.
    pub fn len(&self) -> usize {
        self.0.lock_unpoisoned().len()
    }
    /// Whether the queue is currently empty.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl<T> Default for ConcurrentQueue<T> {
    fn default() -> Self {
        Self::new()
    }
}
impl<T> Debug for ConcurrentQueue<T> {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConcurrentQueue").field("len", &self.len()).finish()
    }
}
