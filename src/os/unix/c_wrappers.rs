//! Thin `io::Result` wrappers around the libc calls the backend drives.

#[cfg(not(any(
    target_os = "linux",
    target_os = "android",
    target_os = "freebsd",
    target_os = "netbsd",
    target_os = "openbsd"
)))]
use std::os::fd::AsFd;
use {
    super::addr,
    crate::socket::AddressFamily,
    libc::{c_int, socklen_t},
    std::{
        io,
        mem::size_of,
        net::SocketAddr,
        os::fd::{AsRawFd, BorrowedFd, FromRawFd, OwnedFd, RawFd},
    },
};

#[cfg(any(
    target_os = "linux",
    target_os = "android",
    target_os = "freebsd",
    target_os = "netbsd",
    target_os = "openbsd"
))]
pub(super) const NO_SIGPIPE_FLAGS: c_int = libc::MSG_NOSIGNAL;
#[cfg(not(any(
    target_os = "linux",
    target_os = "android",
    target_os = "freebsd",
    target_os = "netbsd",
    target_os = "openbsd"
)))]
pub(super) const NO_SIGPIPE_FLAGS: c_int = 0;

fn is_eintr(e: &io::Error) -> bool {
    e.raw_os_error() == Some(libc::EINTR)
}

pub(super) fn tcp_socket(family: AddressFamily) -> io::Result<OwnedFd> {
    let domain = match family {
        AddressFamily::Ipv4 => libc::AF_INET,
        AddressFamily::Ipv6 => libc::AF_INET6,
    };
    #[cfg(any(
        target_os = "linux",
        target_os = "android",
        target_os = "freebsd",
        target_os = "netbsd",
        target_os = "openbsd"
    ))]
    {
        let raw = unsafe {
            libc::socket(
                domain,
                libc::SOCK_STREAM | libc::SOCK_CLOEXEC | libc::SOCK_NONBLOCK,
                libc::IPPROTO_TCP,
            )
        };
        ok_or_ret_errno!(raw != -1 => unsafe { OwnedFd::from_raw_fd(raw) })
    }
    #[cfg(not(any(
        target_os = "linux",
        target_os = "android",
        target_os = "freebsd",
        target_os = "netbsd",
        target_os = "openbsd"
    )))]
    {
        let raw = unsafe { libc::socket(domain, libc::SOCK_STREAM, libc::IPPROTO_TCP) };
        let fd = ok_or_ret_errno!(raw != -1 => unsafe { OwnedFd::from_raw_fd(raw) })?;
        set_cloexec(fd.as_fd())?;
        set_nonblocking(fd.as_fd())?;
        #[cfg(target_vendor = "apple")]
        setsockopt_int(fd.as_fd(), libc::SOL_SOCKET, libc::SO_NOSIGPIPE, 1)?;
        Ok(fd)
    }
}

#[cfg_attr(
    any(
        target_os = "linux",
        target_os = "android",
        target_os = "freebsd",
        target_os = "netbsd",
        target_os = "openbsd"
    ),
    allow(dead_code)
)]
pub(super) fn set_cloexec(fd: BorrowedFd<'_>) -> io::Result<()> {
    let flags = unsafe { libc::fcntl(fd.as_raw_fd(), libc::F_GETFD, 0) };
    let flags = ok_or_ret_errno!(flags != -1 => flags)?;
    let rc = unsafe { libc::fcntl(fd.as_raw_fd(), libc::F_SETFD, flags | libc::FD_CLOEXEC) };
    ok_or_ret_errno!(rc != -1 => ())
}

pub(super) fn set_nonblocking(fd: BorrowedFd<'_>) -> io::Result<()> {
    let flags = unsafe { libc::fcntl(fd.as_raw_fd(), libc::F_GETFL, 0) };
    let flags = ok_or_ret_errno!(flags != -1 => flags)?;
    let rc = unsafe { libc::fcntl(fd.as_raw_fd(), libc::F_SETFL, flags | libc::O_NONBLOCK) };
    ok_or_ret_errno!(rc != -1 => ())
}

pub(super) fn bind(fd: BorrowedFd<'_>, address: SocketAddr) -> io::Result<()> {
    let (storage, len) = addr::to_native(address);
    let rc = unsafe { libc::bind(fd.as_raw_fd(), addr::as_sockaddr(&storage), len) };
    ok_or_ret_errno!(rc != -1 => ())
}

pub(super) fn listen(fd: BorrowedFd<'_>, backlog: c_int) -> io::Result<()> {
    let rc = unsafe { libc::listen(fd.as_raw_fd(), backlog) };
    ok_or_ret_errno!(rc != -1 => ())
}

/// Starts a nonblocking connect. An `EINTR` result is mapped to `EINPROGRESS`, which is what it
/// means for a nonblocking socket: the connection attempt keeps going in the background.
pub(super) fn connect(fd: BorrowedFd<'_>, address: SocketAddr) -> io::Result<()> {
    let (storage, len) = addr::to_native(address);
    let rc = unsafe { libc::connect(fd.as_raw_fd(), addr::as_sockaddr(&storage), len) };
    match ok_or_ret_errno!(rc != -1 => ()) {
        Err(e) if is_eintr(&e) => Err(io::Error::from_raw_os_error(libc::EINPROGRESS)),
        other => other,
    }
}

pub(super) fn accept(fd: BorrowedFd<'_>) -> io::Result<OwnedFd> {
    loop {
        #[cfg(any(
            target_os = "linux",
            target_os = "android",
            target_os = "freebsd",
            target_os = "netbsd",
            target_os = "openbsd"
        ))]
        let raw = unsafe {
            libc::accept4(
                fd.as_raw_fd(),
                std::ptr::null_mut(),
                std::ptr::null_mut(),
                libc::SOCK_CLOEXEC | libc::SOCK_NONBLOCK,
            )
        };
        #[cfg(not(any(
            target_os = "linux",
            target_os = "android",
            target_os = "freebsd",
            target_os = "netbsd",
            target_os = "openbsd"
        )))]
        let raw =
            unsafe { libc::accept(fd.as_raw_fd(), std::ptr::null_mut(), std::ptr::null_mut()) };

        match ok_or_ret_errno!(raw != -1 => unsafe { OwnedFd::from_raw_fd(raw) }) {
            Ok(accepted) => {
                #[cfg(not(any(
                    target_os = "linux",
                    target_os = "android",
                    target_os = "freebsd",
                    target_os = "netbsd",
                    target_os = "openbsd"
                )))]
                {
                    set_cloexec(accepted.as_fd())?;
                    set_nonblocking(accepted.as_fd())?;
                }
                return Ok(accepted);
            }
            Err(e) if is_eintr(&e) => continue,
            Err(e) => return Err(e),
        }
    }
}

/// Makes `target` refer to the same open socket as `accepted`, keeping `target`'s descriptor
/// number stable so that anything holding it (poll entries included) stays valid, then releases
/// `accepted`'s original descriptor.
pub(super) fn replace_fd(accepted: OwnedFd, target: RawFd) -> io::Result<()> {
    #[cfg(any(target_os = "linux", target_os = "android", target_os = "freebsd"))]
    {
        let rc = unsafe { libc::dup3(accepted.as_raw_fd(), target, libc::O_CLOEXEC) };
        ok_or_ret_errno!(rc != -1 => ())
    }
    #[cfg(not(any(target_os = "linux", target_os = "android", target_os = "freebsd")))]
    {
        let rc = unsafe { libc::dup2(accepted.as_raw_fd(), target) };
        ok_or_ret_errno!(rc != -1 => ())?;
        // dup2 does not carry FD_CLOEXEC over; the nonblocking mode lives on the open
        // description and needs no reapplication.
        set_cloexec(unsafe { BorrowedFd::borrow_raw(target) })
    }
}

pub(super) fn send(fd: BorrowedFd<'_>, buf: &[u8], flags: c_int) -> io::Result<usize> {
    loop {
        let rc = unsafe {
            libc::send(fd.as_raw_fd(), buf.as_ptr().cast(), buf.len(), flags | NO_SIGPIPE_FLAGS)
        };
        match ok_or_ret_errno!(rc != -1 => rc as usize) {
            Err(e) if is_eintr(&e) => continue,
            other => return other,
        }
    }
}

pub(super) fn recv(fd: BorrowedFd<'_>, buf: &mut [u8], flags: c_int) -> io::Result<usize> {
    loop {
        let rc = unsafe { libc::recv(fd.as_raw_fd(), buf.as_mut_ptr().cast(), buf.len(), flags) };
        match ok_or_ret_errno!(rc != -1 => rc as usize) {
            Err(e) if is_eintr(&e) => continue,
            other => return other,
        }
    }
}

/// Reads and clears the socket's pending error, the way the completion of a nonblocking connect
/// is observed.
pub(super) fn take_socket_error(fd: BorrowedFd<'_>) -> io::Result<c_int> {
    let mut err: c_int = 0;
    let mut len = size_of::<c_int>() as socklen_t;
    let rc = unsafe {
        libc::getsockopt(
            fd.as_raw_fd(),
            libc::SOL_SOCKET,
            libc::SO_ERROR,
            (&mut err as *mut c_int).cast(),
            &mut len,
        )
    };
    ok_or_ret_errno!(rc != -1 => err)
}

pub(super) fn shutdown_both(fd: BorrowedFd<'_>) -> io::Result<()> {
    let rc = unsafe { libc::shutdown(fd.as_raw_fd(), libc::SHUT_RDWR) };
    ok_or_ret_errno!(rc != -1 => ())
}

pub(super) fn getsockopt_int(fd: BorrowedFd<'_>, level: c_int, name: c_int) -> io::Result<c_int> {
    let mut val: c_int = 0;
    let mut len = size_of::<c_int>() as socklen_t;
    let rc = unsafe {
        libc::getsockopt(fd.as_raw_fd(), level, name, (&mut val as *mut c_int).cast(), &mut len)
    };
    ok_or_ret_errno!(rc != -1 => val)
}

pub(super) fn setsockopt_int(
    fd: BorrowedFd<'_>,
    level: c_int,
    name: c_int,
    value: c_int,
) -> io::Result<()> {
    let rc = unsafe {
        libc::setsockopt(
            fd.as_raw_fd(),
            level,
            name,
            (&value as *const c_int).cast(),
            size_of::<c_int>() as socklen_t,
        )
    };
    ok_or_ret_errno!(rc != -1 => ())
}

pub(super) fn getsockopt_raw(
    fd: BorrowedFd<'_>,
    level: c_int,
    name: c_int,
    buf: &mut [u8],
) -> io::Result<usize> {
    let mut len = buf.len() as socklen_t;
    let rc = unsafe {
        libc::getsockopt(fd.as_raw_fd(), level, name, buf.as_mut_ptr().cast(), &mut len)
    };
    ok_or_ret_errno!(rc != -1 => len as usize)
}

pub(super) fn setsockopt_raw(
    fd: BorrowedFd<'_>,
    level: c_int,
    name: c_int,
    buf: &[u8],
) -> io::Result<()> {
    let rc = unsafe {
        libc::setsockopt(fd.as_raw_fd(), level, name, buf.as_ptr().cast(), buf.len() as socklen_t)
    };
    ok_or_ret_errno!(rc != -1 => ())
}

pub(super) fn ioctl(fd: BorrowedFd<'_>, code: u32, data: &mut [u8]) -> io::Result<()> {
    let rc = unsafe { libc::ioctl(fd.as_raw_fd(), code as _, data.as_mut_ptr()) };
    ok_or_ret_errno!(rc != -1 => ())
}

pub(super) fn local_addr(fd: BorrowedFd<'_>) -> io::Result<SocketAddr> {
    let mut storage: libc::sockaddr_storage = unsafe { std::mem::zeroed() };
    let mut len = size_of::<libc::sockaddr_storage>() as socklen_t;
    let rc =
        unsafe { libc::getsockname(fd.as_raw_fd(), addr::as_sockaddr_mut(&mut storage), &mut len) };
    ok_or_ret_errno!(rc != -1 => ())?;
    addr::from_native(&storage)
}

pub(super) fn peer_addr(fd: BorrowedFd<'_>) -> io::Result<SocketAddr> {
    let mut storage: libc::sockaddr_storage = unsafe { std::mem::zeroed() };
    let mut len = size_of::<libc::sockaddr_storage>() as socklen_t;
    let rc =
        unsafe { libc::getpeername(fd.as_raw_fd(), addr::as_sockaddr_mut(&mut storage), &mut len) };
    ok_or_ret_errno!(rc != -1 => ())?;
    addr::from_native(&storage)
}

/// Creates the nonblocking self-pipe the poll driver is woken through.
pub(super) fn wake_pipe() -> io::Result<(OwnedFd, OwnedFd)> {
    let mut fds = [0 as c_int; 2];
    #[cfg(any(
        target_os = "linux",
        target_os = "android",
        target_os = "freebsd",
        target_os = "netbsd",
        target_os = "openbsd"
    ))]
    {
        let rc = unsafe { libc::pipe2(fds.as_mut_ptr(), libc::O_CLOEXEC | libc::O_NONBLOCK) };
        ok_or_ret_errno!(rc != -1 => ())?;
    }
    #[cfg(not(any(
        target_os = "linux",
        target_os = "android",
        target_os = "freebsd",
        target_os = "netbsd",
        target_os = "openbsd"
    )))]
    {
        let rc = unsafe { libc::pipe(fds.as_mut_ptr()) };
        ok_or_ret_errno!(rc != -1 => ())?;
        for &raw in &fds {
            let fd = unsafe { BorrowedFd::borrow_raw(raw) };
            set_cloexec(fd)?;
            set_nonblocking(fd)?;
        }
    }
    let [read, write] = fds;
    Ok(unsafe { (OwnedFd::from_raw_fd(read), OwnedFd::from_raw_fd(write)) })
}

/// Writes a single wakeup byte. A full pipe means a wakeup is already pending, which is just as
/// good.
pub(super) fn write_wake_byte(fd: BorrowedFd<'_>) {
    let _ = unsafe { libc::write(fd.as_raw_fd(), [1u8].as_ptr().cast(), 1) };
}

pub(super) fn drain_pipe(fd: BorrowedFd<'_>) {
    let mut buf = [0u8; 64];
    while unsafe { libc::read(fd.as_raw_fd(), buf.as_mut_ptr().cast(), buf.len()) } > 0 {}
}
