use {
    super::util::*,
    crate::{AddressFamily, AsyncSocket, CompletionPort, Driver, OperationKind},
    color_eyre::eyre::{bail, ensure},
    std::{
        io,
        net::SocketAddr,
        time::{Duration, Instant},
    },
};

type Port = CompletionPort<&'static str>;
type Socket = AsyncSocket<&'static str>;

fn listener(port: &Port) -> TestResult<(Socket, SocketAddr)> {
    let server = Socket::new(AddressFamily::Ipv4)?;
    server.bind("127.0.0.1:0".parse()?)?;
    server.listen(16)?;
    port.associate(&server, "server")?;
    let addr = server.local_addr()?;
    Ok((server, addr))
}

/// Stands up a loopback connection through the port: issues an accept and a connect, drains
/// both records, and associates the accepted socket as `"conn"`.
fn connected_pair(port: &Port) -> TestResult<(Socket, Socket)> {
    let (server, addr) = listener(port)?;
    let conn = Socket::new(AddressFamily::Ipv4)?;
    server.accept(&conn)?;
    let client = Socket::new(AddressFamily::Ipv4)?;
    port.associate(&client, "client")?;
    client.connect(addr)?;

    let (mut accepted, mut connected) = (false, false);
    while !(accepted && connected) {
        let status = next(port)?;
        match status.operation() {
            OperationKind::Accept => {
                ensure!(status.outcome().is_success(), "accept failed: {:?}", status.outcome());
                ensure_eq!(status.state(), Some(&"server"));
                ensure!(
                    status.socket() == Some(&server),
                    "the accept record must reference the listener"
                );
                accepted = true;
            }
            OperationKind::Connect => {
                ensure!(status.outcome().is_success(), "connect failed: {:?}", status.outcome());
                ensure_eq!(status.state(), Some(&"client"));
                connected = true;
            }
            other => bail!("unexpected completion: {other:?}"),
        }
    }
    port.associate(&conn, "conn")?;
    Ok((client, conn))
}

#[test]
fn accept_adopts_the_connection() -> TestResult {
    testinit();
    let port = Port::new()?;
    let (client, conn) = connected_pair(&port)?;
    // The adopted socket is the other end of the client's connection.
    ensure_eq!(conn.peer_addr()?, client.local_addr()?);
    ensure_eq!(conn.local_addr()?, client.peer_addr()?);
    Ok(())
}

fn exchange(driver: Driver) -> TestResult {
    testinit();
    let port = Port::with_driver(driver)?;
    let (client, conn) = connected_pair(&port)?;

    // Issuing the receive before any data exists forces it down the asynchronous path; the
    // send on a fresh connection will usually take the immediate one. The records coming out
    // must be indistinguishable either way.
    let payload = b"completion ports to the people".to_vec();
    let len = payload.len();
    conn.recv(vec![0; 64], 0, 64, 0)?;
    client.send(payload, 0, len, 0)?;

    let (mut send_seen, mut recv_seen) = (false, false);
    while !(send_seen && recv_seen) {
        let mut status = next(&port)?;
        match status.operation() {
            OperationKind::Send => {
                ensure!(status.outcome().is_success(), "send failed: {:?}", status.outcome());
                ensure_eq!(status.bytes_transferred(), len);
                ensure_eq!(status.state(), Some(&"client"));
                ensure!(status.socket() == Some(&client), "send record names the wrong socket");
                let Some(buffer) = status.take_buffer() else {
                    bail!("send records must hand the buffer back");
                };
                ensure_eq!(&buffer[..len], b"completion ports to the people");
                send_seen = true;
            }
            OperationKind::Receive => {
                ensure!(status.outcome().is_success(), "recv failed: {:?}", status.outcome());
                ensure_eq!(status.bytes_transferred(), len);
                ensure_eq!(status.state(), Some(&"conn"));
                let Some(buffer) = status.take_buffer() else {
                    bail!("receive records must hand the buffer back");
                };
                ensure_eq!(&buffer[..len], b"completion ports to the people");
                recv_seen = true;
            }
            other => bail!("unexpected completion: {other:?}"),
        }
    }
    // Exactly one record per issued operation, whether it completed immediately or not.
    ensure!(port.wait(Some(Duration::from_millis(100))).is_none(), "stray completion record");
    Ok(())
}

#[test]
fn exchange_with_poll_driver() -> TestResult {
    exchange(Driver::Poll)
}

#[test]
fn exchange_with_threaded_driver() -> TestResult {
    exchange(Driver::Threaded)
}

#[test]
fn send_completion_carries_context() -> TestResult {
    testinit();
    let port = Port::new()?;
    let (client, _conn) = connected_pair(&port)?;
    client.send(b"0123456789".to_vec(), 0, 10, 0)?;
    let before = Instant::now();
    let Some(status) = port.wait(Some(Duration::from_secs(1))) else {
        bail!("no completion within a second");
    };
    ensure_eq!(status.operation(), OperationKind::Send);
    ensure!(status.outcome().is_success(), "send failed: {:?}", status.outcome());
    ensure_eq!(status.bytes_transferred(), 10);
    ensure_eq!(status.state(), Some(&"client"));
    ensure!(status.socket() == Some(&client), "record must reference the sending socket");
    ensure!(before.elapsed() < Duration::from_secs(2), "completion arrived too late");
    Ok(())
}

#[test]
fn disconnect_completes_immediately() -> TestResult {
    testinit();
    let port = Port::new()?;
    let (client, _conn) = connected_pair(&port)?;
    client.disconnect()?;
    let status = next(&port)?;
    ensure_eq!(status.operation(), OperationKind::Disconnect);
    ensure!(status.outcome().is_success(), "disconnect failed: {:?}", status.outcome());
    ensure!(status.socket() == Some(&client), "disconnect record names the wrong socket");
    Ok(())
}

#[test]
fn peer_shutdown_reads_as_zero_bytes() -> TestResult {
    testinit();
    let port = Port::new()?;
    let (client, conn) = connected_pair(&port)?;
    client.disconnect()?;
    ensure_eq!(next(&port)?.operation(), OperationKind::Disconnect);
    conn.recv(vec![0; 16], 0, 16, 0)?;
    let status = next(&port)?;
    ensure_eq!(status.operation(), OperationKind::Receive);
    ensure!(status.outcome().is_success(), "EOF is not an error: {:?}", status.outcome());
    ensure_eq!(status.bytes_transferred(), 0);
    Ok(())
}

#[test]
fn reassociation_fails_fast() -> TestResult {
    testinit();
    let port = Port::new()?;
    let (server, _) = listener(&port)?;
    let err = port.associate(&server, "again").unwrap_err();
    ensure_eq!(err.kind(), io::ErrorKind::AlreadyExists);
    Ok(())
}

#[test]
fn unassociated_issue_fails_fast() -> TestResult {
    testinit();
    let socket = Socket::new(AddressFamily::Ipv4)?;
    let err = socket.send(vec![0; 4], 0, 4, 0).unwrap_err();
    ensure_eq!(err.kind(), io::ErrorKind::NotConnected);
    let err = socket.connect("127.0.0.1:1".parse()?).unwrap_err();
    ensure_eq!(err.kind(), io::ErrorKind::NotConnected);
    Ok(())
}

#[test]
fn one_operation_per_direction_at_a_time() -> TestResult {
    testinit();
    let port = Port::new()?;
    let (_client, conn) = connected_pair(&port)?;
    // No data is coming, so the first receive stays in flight.
    conn.recv(vec![0; 16], 0, 16, 0)?;
    ensure!(conn.recv(vec![0; 16], 0, 16, 0).is_err(), "second in-flight receive must fail");
    Ok(())
}

#[test]
fn out_of_range_transfer_fails_fast() -> TestResult {
    testinit();
    let port = Port::new()?;
    let (client, _conn) = connected_pair(&port)?;
    let err = client.send(vec![0; 4], 2, 8, 0).unwrap_err();
    ensure_eq!(err.kind(), io::ErrorKind::InvalidInput);
    // The failed issuance must not leave the outbound half busy.
    client.send(vec![0; 4], 0, 4, 0)?;
    ensure_eq!(next(&port)?.operation(), OperationKind::Send);
    Ok(())
}

#[cfg(unix)]
use libc::{IPPROTO_TCP, SOL_SOCKET, SO_KEEPALIVE, TCP_NODELAY};
#[cfg(windows)]
use windows_sys::Win32::Networking::WinSock::{IPPROTO_TCP, SOL_SOCKET, SO_KEEPALIVE, TCP_NODELAY};

#[test]
fn option_roundtrip() -> TestResult {
    testinit();
    let socket = Socket::new(AddressFamily::Ipv4)?;
    ensure_eq!(socket.option(SOL_SOCKET as i32, SO_KEEPALIVE as i32)?, 0);
    socket.set_option(SOL_SOCKET as i32, SO_KEEPALIVE as i32, 1)?;
    ensure!(socket.option(SOL_SOCKET as i32, SO_KEEPALIVE as i32)? != 0, "option did not stick");
    Ok(())
}

#[test]
fn raw_option_roundtrip() -> TestResult {
    testinit();
    let socket = Socket::new(AddressFamily::Ipv4)?;
    socket.set_option_raw(IPPROTO_TCP as i32, TCP_NODELAY as i32, &1_i32.to_ne_bytes())?;
    let mut buf = [0_u8; 4];
    let len = socket.option_raw(IPPROTO_TCP as i32, TCP_NODELAY as i32, &mut buf)?;
    ensure!(len > 0, "no option bytes came back");
    ensure!(buf.iter().any(|&b| b != 0), "option did not stick");
    Ok(())
}

#[test]
fn io_control_passthrough() -> TestResult {
    testinit();
    let port = Port::new()?;
    let (client, _conn) = connected_pair(&port)?;
    #[cfg(unix)]
    let code = libc::FIONREAD as u32;
    #[cfg(windows)]
    let code = windows_sys::Win32::Networking::WinSock::FIONREAD as u32;
    let mut data = [0_u8; std::mem::size_of::<i32>()];
    client.io_control(code, &mut data)?;
    Ok(())
}
