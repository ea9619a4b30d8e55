#![allow(dead_code)]

use std::{
    sync::{Mutex, MutexGuard, PoisonError},
    time::{Duration, Instant},
};

pub(crate) trait LockExt {
    type Target;
    /// Locks a mutex, disregarding poisoning.
    ///
    /// Every mutex in this crate protects a structure whose invariants hold between any two
    /// operations on it, so the state left behind by a panicked thread is still coherent, while
    /// propagating the poison would take the whole port down with it.
    fn lock_unpoisoned(&self) -> MutexGuard<'_, Self::Target>;
}
impl<T> LockExt for Mutex<T> {
    type Target = T;
    #[inline]
    fn lock_unpoisoned(&self) -> MutexGuard<'_, T> {
        self.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Expiry point of a timed wait, computed once at call entry on the monotonic clock.
#[derive(Copy, Clone, Debug)]
pub(crate) enum Deadline {
    Unbounded,
    At(Instant),
}
impl Deadline {
    pub fn new(timeout: Option<Duration>) -> Self {
        match timeout.and_then(|t| Instant::now().checked_add(t)) {
            Some(end) => Self::At(end),
            // A timeout so large that it overflows `Instant` is as good as no deadline.
            None => Self::Unbounded,
        }
    }
    /// Budget left until expiry: `None` if it has run out, `Some(None)` if there is no deadline,
    /// `Some(Some(..))` otherwise.
    pub fn remaining(self) -> Option<Option<Duration>> {
        match self {
            Self::Unbounded => Some(None),
            Self::At(end) => {
                let now = Instant::now();
                if now < end {
                    Some(Some(end - now))
                } else {
                    None
                }
            }
        }
    }
}
