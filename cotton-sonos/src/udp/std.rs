use super::{Error, Syscall};
use std::net::{Ipv4Addr, SocketAddrV4};

type NewSocketFn = fn() -> std::io::Result<socket2::Socket>;
type SockoptFn = fn(&socket2::Socket, bool) -> std::io::Result<()>;
type BindFn = fn(&socket2::Socket, SocketAddrV4) -> std::io::Result<()>;

fn setup_socket_inner(
    port: u16,
    new_socket: NewSocketFn,
    nonblocking: SockoptFn,
    reuse_address: SockoptFn,
    bind: BindFn,
) -> std::io::Result<std::net::UdpSocket> {
    let socket = new_socket()?;
    nonblocking(&socket, true)?;
    reuse_address(&socket, true)?;
    bind(&socket, SocketAddrV4::new(Ipv4Addr::UNSPECIFIED, port))?;
    Ok(socket.into())
}

/// Create a non-blocking IPv4 UDP socket bound to 0.0.0.0:`port`
///
/// SO_REUSEADDR is set, so that several control points (or a Sonos
/// desktop app) can share port 1900 on one host.
///
/// # Errors
///
/// Returns [`Error::Syscall`] tagged [`Syscall::Open`] if any of the
/// socket calls fail.
pub fn setup_socket(port: u16) -> Result<std::net::UdpSocket, Error> {
    setup_socket_inner(
        port,
        || {
            socket2::Socket::new(
                socket2::Domain::IPV4,
                socket2::Type::DGRAM,
                Some(socket2::Protocol::UDP),
            )
        },
        socket2::Socket::set_nonblocking,
        socket2::Socket::set_reuse_address,
        |s, a| s.bind(&socket2::SockAddr::from(a)),
    )
    .map_err(|e| Error::Syscall(Syscall::Open, e))
}
