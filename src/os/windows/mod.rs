//! The Windows backend: nonblocking WinSock sockets driven through `WSAPoll`.

mod addr;
mod c_wrappers;

pub(crate) mod driver;
pub(crate) mod socket;

pub(crate) use {driver::DriverShared, socket::Socket};
