use super::{Error, Syscall, Transport, SSDP_GROUP};
use std::net::{Ipv4Addr, SocketAddr};
use tokio::net::UdpSocket;

/// Largest datagram we expect; Sonos responses are well under this
pub const MAX_PACKET_SIZE: usize = 1500;

/// [`Transport`] over tokio UDP sockets
///
/// Receiving is done separately, by the owner's `select!` loop, via
/// [`TokioTransport::recv_multicast`] and [`TokioTransport::recv_search`].
pub struct TokioTransport {
    multicast_port: u16,
    interface: Ipv4Addr,
    multicast: Option<UdpSocket>,
    search: Option<UdpSocket>,
}

impl TokioTransport {
    /// Create a transport which will listen on the standard SSDP port
    #[must_use]
    pub fn new(interface: Ipv4Addr) -> Self {
        Self::with_port(interface, SSDP_GROUP.port())
    }

    /// Create a transport listening for multicast on a non-standard port
    #[must_use]
    pub fn with_port(interface: Ipv4Addr, multicast_port: u16) -> Self {
        Self {
            multicast_port,
            interface,
            multicast: None,
            search: None,
        }
    }

    /// The local address of the search socket, if open
    #[must_use]
    pub fn search_addr(&self) -> Option<SocketAddr> {
        self.search.as_ref().and_then(|s| s.local_addr().ok())
    }

    /// Whether the multicast socket is open
    #[must_use]
    pub fn is_listening(&self) -> bool {
        self.multicast.is_some()
    }

    /// Receive one datagram from the multicast socket
    ///
    /// Never completes while the socket is closed, so it can sit in a
    /// `select!` unconditionally.
    pub async fn recv_multicast(
        &self,
        buf: &mut [u8],
    ) -> Result<(usize, SocketAddr), Error> {
        recv(self.multicast.as_ref(), buf).await
    }

    /// Receive one datagram from the search socket
    ///
    /// Never completes while the socket is closed.
    pub async fn recv_search(
        &self,
        buf: &mut [u8],
    ) -> Result<(usize, SocketAddr), Error> {
        recv(self.search.as_ref(), buf).await
    }
}

async fn recv(
    socket: Option<&UdpSocket>,
    buf: &mut [u8],
) -> Result<(usize, SocketAddr), Error> {
    match socket {
        Some(s) => s
            .recv_from(buf)
            .await
            .map_err(|e| Error::Syscall(Syscall::Recvfrom, e)),
        None => std::future::pending().await,
    }
}

fn from_std(socket: std::net::UdpSocket) -> Result<UdpSocket, Error> {
    UdpSocket::from_std(socket).map_err(|e| Error::Syscall(Syscall::Open, e))
}

fn multicast_group() -> Ipv4Addr {
    match SSDP_GROUP.ip() {
        std::net::IpAddr::V4(ip) => ip,
        std::net::IpAddr::V6(_) => Ipv4Addr::new(239, 255, 255, 250),
    }
}

impl Transport for TokioTransport {
    fn open_multicast(&mut self) -> Result<(), Error> {
        if self.multicast.is_none() {
            let s = super::std::setup_socket(self.multicast_port)?;
            self.multicast = Some(from_std(s)?);
        }
        Ok(())
    }

    fn join_multicast(&mut self) -> Result<(), Error> {
        let s = self.multicast.as_ref().ok_or(Error::NotOpen)?;
        s.join_multicast_v4(multicast_group(), self.interface)
            .map_err(|e| Error::Syscall(Syscall::JoinMulticast, e))
    }

    fn close_multicast(&mut self) -> Result<(), Error> {
        match self.multicast.take() {
            Some(s) => s
                .leave_multicast_v4(multicast_group(), self.interface)
                .map_err(|e| Error::Syscall(Syscall::LeaveMulticast, e)),
            None => Ok(()),
        }
    }

    fn open_search(&mut self) -> Result<(), Error> {
        if self.search.is_none() {
            let s = super::std::setup_socket(0)?;
            self.search = Some(from_std(s)?);
        }
        Ok(())
    }

    fn close_search(&mut self) {
        self.search = None;
    }

    fn send_search(
        &mut self,
        packet: &[u8],
        to: SocketAddr,
    ) -> Result<(), Error> {
        let s = self.search.as_ref().ok_or(Error::NotOpen)?;
        s.try_send_to(packet, to)
            .map(|_| ())
            .map_err(|e| Error::Syscall(Syscall::Sendto, e))
    }
}
