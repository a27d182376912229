use std::io;
use std::net::SocketAddr;

use tokio::net::{TcpListener, TcpSocket, TcpStream, UdpSocket};

use crate::error::{Result, StreamError};
use crate::signal::Interrupt;

/// Resolve `host:port`; every interruption and lookup failure is reported.
pub async fn resolve(
    interrupt: &Interrupt,
    endpoint: &str,
    host: &str,
    port: u16,
) -> Result<Vec<SocketAddr>> {
    let addrs: Vec<SocketAddr> = interrupt
        .io(tokio::net::lookup_host((host, port)))
        .await?
        .map_err(|e| StreamError::open(endpoint, e))?
        .collect();
    if addrs.is_empty() {
        return Err(StreamError::Unresolved {
            endpoint: endpoint.to_string(),
            address: format!("{}:{}", host, port),
        });
    }
    Ok(addrs)
}

/// Bind the first address that accepts and listen with a backlog of one.
pub fn listen(endpoint: &str, addrs: &[SocketAddr]) -> Result<TcpListener> {
    let mut last_err = None;
    for addr in addrs {
        log::debug!("{}: binding {}", endpoint, addr);
        match bind_listener(*addr) {
            Ok(listener) => return Ok(listener),
            Err(e) => last_err = Some(e),
        }
    }
    Err(StreamError::open(
        endpoint,
        last_err.unwrap_or_else(|| io::Error::new(io::ErrorKind::AddrNotAvailable, "no address")),
    ))
}

fn bind_listener(addr: SocketAddr) -> io::Result<TcpListener> {
    let socket = if addr.is_ipv4() {
        TcpSocket::new_v4()?
    } else {
        TcpSocket::new_v6()?
    };
    socket.set_reuseaddr(true)?;
    socket.bind(addr)?;
    socket.listen(1)
}

/// Bind a datagram socket on the first address that accepts.
pub async fn bind_udp(endpoint: &str, addrs: &[SocketAddr]) -> Result<UdpSocket> {
    let mut last_err = None;
    for addr in addrs {
        log::debug!("{}: binding udp {}", endpoint, addr);
        match UdpSocket::bind(addr).await {
            Ok(socket) => return Ok(socket),
            Err(e) => last_err = Some(e),
        }
    }
    Err(StreamError::open(
        endpoint,
        last_err.unwrap_or_else(|| io::Error::new(io::ErrorKind::AddrNotAvailable, "no address")),
    ))
}

/// Try each resolved address in turn until one connects.
pub async fn connect(
    interrupt: &Interrupt,
    endpoint: &str,
    addrs: &[SocketAddr],
) -> Result<TcpStream> {
    let mut last_err = None;
    for addr in addrs {
        log::debug!("{}: connecting {}", endpoint, addr);
        match interrupt.io(TcpStream::connect(addr)).await? {
            Ok(stream) => return Ok(stream),
            Err(e) => {
                log::debug!("{}: connect {} failed: {}", endpoint, addr, e);
                last_err = Some(e);
            }
        }
    }
    Err(StreamError::open(
        endpoint,
        last_err.unwrap_or_else(|| io::Error::new(io::ErrorKind::AddrNotAvailable, "no address")),
    ))
}

/// Unconnected send socket matching the destination's address family.
pub async fn udp_sender(endpoint: &str, dest: SocketAddr) -> Result<UdpSocket> {
    let local: SocketAddr = if dest.is_ipv4() {
        (std::net::Ipv4Addr::UNSPECIFIED, 0).into()
    } else {
        (std::net::Ipv6Addr::UNSPECIFIED, 0).into()
    };
    UdpSocket::bind(local)
        .await
        .map_err(|e| StreamError::open(endpoint, e))
}

/// Enable TCP keepalive with idle and probe interval of `secs` seconds.
///
/// `secs == 0` leaves the socket at the OS defaults.
#[cfg(unix)]
pub fn set_keepalive(stream: &TcpStream, secs: u32) -> io::Result<()> {
    use std::os::fd::AsRawFd;

    if secs == 0 {
        return Ok(());
    }
    let fd = stream.as_raw_fd();
    setsockopt(fd, libc::SOL_SOCKET, libc::SO_KEEPALIVE, 1)?;
    set_keepalive_timers(fd, libc::c_int::try_from(secs).unwrap_or(libc::c_int::MAX))
}

#[cfg(any(target_os = "linux", target_os = "android"))]
fn set_keepalive_timers(fd: std::os::fd::RawFd, secs: libc::c_int) -> io::Result<()> {
    setsockopt(fd, libc::IPPROTO_TCP, libc::TCP_KEEPIDLE, secs)?;
    setsockopt(fd, libc::IPPROTO_TCP, libc::TCP_KEEPINTVL, secs)
}

#[cfg(any(target_os = "macos", target_os = "ios"))]
fn set_keepalive_timers(fd: std::os::fd::RawFd, secs: libc::c_int) -> io::Result<()> {
    setsockopt(fd, libc::IPPROTO_TCP, libc::TCP_KEEPALIVE, secs)
}

// other unix systems only get SO_KEEPALIVE
#[cfg(all(
    unix,
    not(any(target_os = "linux", target_os = "android", target_os = "macos", target_os = "ios"))
))]
fn set_keepalive_timers(_fd: std::os::fd::RawFd, _secs: libc::c_int) -> io::Result<()> {
    Ok(())
}

#[cfg(not(unix))]
pub fn set_keepalive(_stream: &TcpStream, _secs: u32) -> io::Result<()> {
    Ok(())
}

#[cfg(unix)]
fn setsockopt(
    fd: std::os::fd::RawFd,
    level: libc::c_int,
    name: libc::c_int,
    value: libc::c_int,
) -> io::Result<()> {
    // SAFETY: `fd` is an open socket borrowed from a live TcpStream and the
    // option value is a c_int that outlives the call.
    let rc = unsafe {
        libc::setsockopt(
            fd,
            level,
            name,
            &value as *const libc::c_int as *const libc::c_void,
            std::mem::size_of::<libc::c_int>() as libc::socklen_t,
        )
    };
    if rc == 0 {
        Ok(())
    } else {
        Err(io::Error::last_os_error())
    }
}
