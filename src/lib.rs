#![doc = include_str!("../README.md")]
// If this was in Cargo.toml, it would cover tests as well
#![warn(missing_docs, clippy::missing_assert_message)]

#[cfg(not(any(unix, windows)))]
compile_error!("unsupported platform — only Unix-like systems and Windows have socket backends");

#[macro_use]
mod macros;

pub mod queue;

mod completion;
mod misc;
mod port;
mod socket;

/// Platform backends. Exactly one is compiled in and re-exported as `imp`; the public types are
/// thin wrappers over it.
mod os {
    #[cfg(unix)]
    pub(crate) mod unix;
    #[cfg(windows)]
    pub(crate) mod windows;

    #[cfg(unix)]
    pub(crate) use unix as imp;
    #[cfg(windows)]
    pub(crate) use windows as imp;
}

pub use {
    completion::{CompletionStatus, OperationKind, Outcome},
    port::{CompletionPort, Driver},
    socket::{AddressFamily, AsyncSocket},
};

#[cfg(test)]
#[path = "../tests/index.rs"]
#[allow(clippy::unwrap_used)]
mod tests;
