//! Test utilities: eyre setup plus helpers for draining completion ports with a test-friendly
//! deadline.
#![allow(dead_code, unused_macros)]

#[macro_use]
mod eyre;

pub use eyre::*;

use {
    crate::{CompletionPort, CompletionStatus},
    color_eyre::eyre::eyre,
    std::time::Duration,
};

pub fn testinit() {
    eyre::install();
}

/// Generous per-record deadline: long enough to absorb scheduler jitter on a loaded CI box,
/// short enough that a genuinely lost completion fails the test quickly.
pub const DEADLINE: Duration = Duration::from_secs(5);

/// Dequeues the next record, failing the test if nothing arrives in time.
pub fn next<S: Send + Sync + 'static>(
    port: &CompletionPort<S>,
) -> TestResult<CompletionStatus<S>> {
    port.wait(Some(DEADLINE)).ok_or_else(|| eyre!("no completion within {DEADLINE:?}"))
}
