//! `SocketAddr` ⇄ `SOCKADDR` conversion.

use {
    std::{
        io,
        mem::{size_of, zeroed},
        net::{Ipv4Addr, Ipv6Addr, SocketAddr, SocketAddrV4, SocketAddrV6},
    },
    windows_sys::Win32::Networking::WinSock::{
        AF_INET, AF_INET6, IN6_ADDR, IN6_ADDR_0, IN_ADDR, IN_ADDR_0, SOCKADDR, SOCKADDR_IN,
        SOCKADDR_IN6, SOCKADDR_IN6_0, SOCKADDR_STORAGE,
    },
};

pub(super) fn to_native(addr: SocketAddr) -> (SOCKADDR_STORAGE, i32) {
    let mut storage: SOCKADDR_STORAGE = unsafe { zeroed() };
    let len = match addr {
        SocketAddr::V4(v4) => {
            let sin =
                unsafe { &mut *(&mut storage as *mut SOCKADDR_STORAGE).cast::<SOCKADDR_IN>() };
            sin.sin_family = AF_INET;
            sin.sin_port = v4.port().to_be();
            sin.sin_addr = IN_ADDR { S_un: IN_ADDR_0 { S_addr: u32::from(*v4.ip()).to_be() } };
            size_of::<SOCKADDR_IN>()
        }
        SocketAddr::V6(v6) => {
            let sin6 =
                unsafe { &mut *(&mut storage as *mut SOCKADDR_STORAGE).cast::<SOCKADDR_IN6>() };
            sin6.sin6_family = AF_INET6;
            sin6.sin6_port = v6.port().to_be();
            sin6.sin6_flowinfo = v6.flowinfo();
            sin6.sin6_addr = IN6_ADDR { u: IN6_ADDR_0 { Byte: v6.ip().octets() } };
            sin6.Anonymous = SOCKADDR_IN6_0 { sin6_scope_id: v6.scope_id() };
            size_of::<SOCKADDR_IN6>()
        }
    };
    (storage, len as i32)
}

pub(super) fn from_native(storage: &SOCKADDR_STORAGE) -> io::Result<SocketAddr> {
    match storage.ss_family {
        AF_INET => {
            let sin = unsafe { &*(storage as *const SOCKADDR_STORAGE).cast::<SOCKADDR_IN>() };
            let ip = Ipv4Addr::from(u32::from_be(unsafe { sin.sin_addr.S_un.S_addr }));
            Ok(SocketAddr::V4(SocketAddrV4::new(ip, u16::from_be(sin.sin_port))))
        }
        AF_INET6 => {
            let sin6 = unsafe { &*(storage as *const SOCKADDR_STORAGE).cast::<SOCKADDR_IN6>() };
            Ok(SocketAddr::V6(SocketAddrV6::new(
                Ipv6Addr::from(unsafe { sin6.sin6_addr.u.Byte }),
                u16::from_be(sin6.sin6_port),
                sin6.sin6_flowinfo,
                unsafe { sin6.Anonymous.sin6_scope_id },
            )))
        }
        _ => Err(io::Error::new(
            io::ErrorKind::InvalidData,
            "socket has an address outside of the IP family",
        )),
    }
}

pub(super) fn as_sockaddr(storage: &SOCKADDR_STORAGE) -> *const SOCKADDR {
    (storage as *const SOCKADDR_STORAGE).cast()
}
pub(super) fn as_sockaddr_mut(storage: &mut SOCKADDR_STORAGE) -> *mut SOCKADDR {
    (storage as *mut SOCKADDR_STORAGE).cast()
}
