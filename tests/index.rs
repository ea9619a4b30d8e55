#[path = "util/mod.rs"]
#[macro_use]
mod util;

mod port;
mod queue;
mod socket;
