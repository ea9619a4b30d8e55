//! Thin `io::Result` wrappers around the WinSock calls the backend drives.

use {
    super::addr,
    crate::socket::AddressFamily,
    std::{
        io,
        mem::{size_of, zeroed},
        net::{Ipv4Addr, SocketAddr, SocketAddrV4},
        ptr::{null, null_mut},
        sync::OnceLock,
    },
    windows_sys::Win32::Networking::WinSock::{
        accept, bind, closesocket, connect, getpeername, getsockname, getsockopt, ioctlsocket,
        listen, recv, send, setsockopt, shutdown, WSAGetLastError, WSAIoctl, WSAPoll, WSASocketW,
        WSAStartup, AF_INET, AF_INET6, FIONBIO, INVALID_SOCKET, IPPROTO_TCP, IPPROTO_UDP,
        SD_BOTH, SOCKADDR_STORAGE, SOCKET, SOCKET_ERROR, SOCK_DGRAM, SOCK_STREAM, SOL_SOCKET,
        SO_ERROR, WSADATA, WSAEINTR, WSAPOLLFD, WSA_FLAG_NO_HANDLE_INHERIT,
    },
};

/// Evaluates to `Ok` of the given expression if `$success` is truthy, and to the thread's last
/// WinSock error otherwise.
macro_rules! ok_or_ret_wsa {
    ($success:expr => $($scb:tt)+) => {
        if $success {
            Ok($($scb)+)
        } else {
            Err(last_wsa_error())
        }
    };
}

pub(super) fn last_wsa_error() -> io::Error {
    io::Error::from_raw_os_error(unsafe { WSAGetLastError() })
}

fn is_wsaeintr(e: &io::Error) -> bool {
    e.raw_os_error() == Some(WSAEINTR)
}

static WSA_STARTUP: OnceLock<i32> = OnceLock::new();

/// Brings WinSock up once per process; every entry point that creates a socket goes through
/// here.
pub(super) fn init() -> io::Result<()> {
    let code = *WSA_STARTUP.get_or_init(|| {
        let mut data: WSADATA = unsafe { zeroed() };
        unsafe { WSAStartup(0x202, &mut data) }
    });
    if code == 0 {
        Ok(())
    } else {
        Err(io::Error::from_raw_os_error(code))
    }
}

fn new_socket(family: u16, r#type: i32, protocol: i32) -> io::Result<SOCKET> {
    init()?;
    let sock = unsafe {
        WSASocketW(family as i32, r#type, protocol, null(), 0, WSA_FLAG_NO_HANDLE_INHERIT)
    };
    let sock = ok_or_ret_wsa!(sock != INVALID_SOCKET => sock)?;
    match set_nonblocking(sock) {
        Ok(()) => Ok(sock),
        Err(e) => {
            close(sock);
            Err(e)
        }
    }
}

pub(super) fn tcp_socket(family: AddressFamily) -> io::Result<SOCKET> {
    let family = match family {
        AddressFamily::Ipv4 => AF_INET,
        AddressFamily::Ipv6 => AF_INET6,
    };
    new_socket(family, SOCK_STREAM as i32, IPPROTO_TCP)
}

pub(super) fn set_nonblocking(sock: SOCKET) -> io::Result<()> {
    let mut enabled: u32 = 1;
    let rc = unsafe { ioctlsocket(sock, FIONBIO, &mut enabled) };
    ok_or_ret_wsa!(rc != SOCKET_ERROR => ())
}

pub(super) fn close(sock: SOCKET) {
    let _ = unsafe { closesocket(sock) };
}

pub(super) fn bind_addr(sock: SOCKET, address: SocketAddr) -> io::Result<()> {
    let (storage, len) = addr::to_native(address);
    let rc = unsafe { bind(sock, addr::as_sockaddr(&storage), len) };
    ok_or_ret_wsa!(rc != SOCKET_ERROR => ())
}

pub(super) fn listen_on(sock: SOCKET, backlog: i32) -> io::Result<()> {
    let rc = unsafe { listen(sock, backlog) };
    ok_or_ret_wsa!(rc != SOCKET_ERROR => ())
}

/// Starts a nonblocking connect. WinSock reports an in-progress nonblocking connect as
/// `WSAEWOULDBLOCK`; that classification is left to the caller.
pub(super) fn connect_addr(sock: SOCKET, address: SocketAddr) -> io::Result<()> {
    let (storage, len) = addr::to_native(address);
    let rc = unsafe { connect(sock, addr::as_sockaddr(&storage), len) };
    ok_or_ret_wsa!(rc != SOCKET_ERROR => ())
}

pub(super) fn accept_on(sock: SOCKET) -> io::Result<SOCKET> {
    loop {
        let accepted = unsafe { accept(sock, null_mut(), null_mut()) };
        match ok_or_ret_wsa!(accepted != INVALID_SOCKET => accepted) {
            Ok(accepted) => {
                // The accepted socket inherits the listener's mode, but that is a WinSock detail
                // best not relied upon.
                if let Err(e) = set_nonblocking(accepted) {
                    close(accepted);
                    return Err(e);
                }
                return Ok(accepted);
            }
            Err(e) if is_wsaeintr(&e) => continue,
            Err(e) => return Err(e),
        }
    }
}

pub(super) fn send_on(sock: SOCKET, buf: &[u8], flags: i32) -> io::Result<usize> {
    let len = buf.len().min(i32::MAX as usize) as i32;
    loop {
        let rc = unsafe { send(sock, buf.as_ptr(), len, flags) };
        match ok_or_ret_wsa!(rc != SOCKET_ERROR => rc as usize) {
            Err(e) if is_wsaeintr(&e) => continue,
            other => return other,
        }
    }
}

pub(super) fn recv_on(sock: SOCKET, buf: &mut [u8], flags: i32) -> io::Result<usize> {
    let len = buf.len().min(i32::MAX as usize) as i32;
    loop {
        let rc = unsafe { recv(sock, buf.as_mut_ptr(), len, flags) };
        match ok_or_ret_wsa!(rc != SOCKET_ERROR => rc as usize) {
            Err(e) if is_wsaeintr(&e) => continue,
            other => return other,
        }
    }
}

/// Reads and clears the socket's pending error, the way the completion of a nonblocking connect
/// is observed.
pub(super) fn take_socket_error(sock: SOCKET) -> io::Result<i32> {
    let mut err: i32 = 0;
    let mut len = size_of::<i32>() as i32;
    let rc = unsafe {
        getsockopt(sock, SOL_SOCKET, SO_ERROR, (&mut err as *mut i32).cast(), &mut len)
    };
    ok_or_ret_wsa!(rc != SOCKET_ERROR => err)
}

pub(super) fn shutdown_both(sock: SOCKET) -> io::Result<()> {
    let rc = unsafe { shutdown(sock, SD_BOTH) };
    ok_or_ret_wsa!(rc != SOCKET_ERROR => ())
}

pub(super) fn getsockopt_int(sock: SOCKET, level: i32, name: i32) -> io::Result<i32> {
    let mut val: i32 = 0;
    let mut len = size_of::<i32>() as i32;
    let rc = unsafe { getsockopt(sock, level, name, (&mut val as *mut i32).cast(), &mut len) };
    ok_or_ret_wsa!(rc != SOCKET_ERROR => val)
}

pub(super) fn setsockopt_int(sock: SOCKET, level: i32, name: i32, value: i32) -> io::Result<()> {
    let rc = unsafe {
        setsockopt(sock, level, name, (&value as *const i32).cast(), size_of::<i32>() as i32)
    };
    ok_or_ret_wsa!(rc != SOCKET_ERROR => ())
}

pub(super) fn getsockopt_raw(
    sock: SOCKET,
    level: i32,
    name: i32,
    buf: &mut [u8],
) -> io::Result<usize> {
    let mut len = buf.len().min(i32::MAX as usize) as i32;
    let rc = unsafe { getsockopt(sock, level, name, buf.as_mut_ptr(), &mut len) };
    ok_or_ret_wsa!(rc != SOCKET_ERROR => len as usize)
}

pub(super) fn setsockopt_raw(sock: SOCKET, level: i32, name: i32, buf: &[u8]) -> io::Result<()> {
    let len = buf.len().min(i32::MAX as usize) as i32;
    let rc = unsafe { setsockopt(sock, level, name, buf.as_ptr(), len) };
    ok_or_ret_wsa!(rc != SOCKET_ERROR => ())
}

pub(super) fn io_control(sock: SOCKET, code: u32, data: &mut [u8]) -> io::Result<usize> {
    let mut returned: u32 = 0;
    let len = data.len().min(u32::MAX as usize) as u32;
    let rc = unsafe {
        WSAIoctl(
            sock,
            code,
            data.as_ptr().cast(),
            len,
            data.as_mut_ptr().cast(),
            len,
            &mut returned,
            null_mut(),
            None,
        )
    };
    ok_or_ret_wsa!(rc != SOCKET_ERROR => returned as usize)
}

pub(super) fn local_addr(sock: SOCKET) -> io::Result<SocketAddr> {
    let mut storage: SOCKADDR_STORAGE = unsafe { zeroed() };
    let mut len = size_of::<SOCKADDR_STORAGE>() as i32;
    let rc = unsafe { getsockname(sock, addr::as_sockaddr_mut(&mut storage), &mut len) };
    ok_or_ret_wsa!(rc != SOCKET_ERROR => ())?;
    addr::from_native(&storage)
}

pub(super) fn peer_addr(sock: SOCKET) -> io::Result<SocketAddr> {
    let mut storage: SOCKADDR_STORAGE = unsafe { zeroed() };
    let mut len = size_of::<SOCKADDR_STORAGE>() as i32;
    let rc = unsafe { getpeername(sock, addr::as_sockaddr_mut(&mut storage), &mut len) };
    ok_or_ret_wsa!(rc != SOCKET_ERROR => ())?;
    addr::from_native(&storage)
}

pub(super) fn poll(fds: &mut [WSAPOLLFD]) -> io::Result<usize> {
    loop {
        let rc = unsafe { WSAPoll(fds.as_mut_ptr(), fds.len() as u32, -1) };
        match ok_or_ret_wsa!(rc != SOCKET_ERROR => rc as usize) {
            Err(e) if is_wsaeintr(&e) => continue,
            other => return other,
        }
    }
}

/// A nonblocking loopback datagram socket connected to itself — `WSAPoll` cannot watch pipes or
/// events, so this is what the poll driver is woken through.
pub(super) struct WakeSocket(SOCKET);
impl WakeSocket {
    pub fn new() -> io::Result<Self> {
        let sock = new_socket(AF_INET, SOCK_DGRAM as i32, IPPROTO_UDP)?;
        let this = Self(sock);
        let local = SocketAddr::V4(SocketAddrV4::new(Ipv4Addr::LOCALHOST, 0));
        bind_addr(sock, local)?;
        connect_addr(sock, local_addr(sock)?)?;
        Ok(this)
    }
    pub fn raw(&self) -> SOCKET {
        self.0
    }
    /// Sends a single wakeup byte. A full buffer means a wakeup is already pending, which is
    /// just as good.
    pub fn wake(&self) {
        let _ = send_on(self.0, &[1], 0);
    }
    pub fn drain(&self) {
        let mut buf = [0u8; 64];
        while matches!(recv_on(self.0, &mut buf, 0), Ok(n) if n > 0) {}
    }
}
impl Drop for WakeSocket {
    fn drop(&mut self) {
        close(self.0);
    }
}
