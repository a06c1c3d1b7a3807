use ::std::net::SocketAddr;

/// The SSDP multicast group and port
pub const SSDP_GROUP: SocketAddr = SocketAddr::V4(::std::net::SocketAddrV4::new(
    ::std::net::Ipv4Addr::new(239, 255, 255, 250),
    1900,
));

/// The list of system calls which can return errors
#[non_exhaustive]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Syscall {
    /// socket(), setsockopt() or bind() failed while opening a socket
    Open,
    /// recvfrom() returned an error
    Recvfrom,
    /// sendto() returned an error
    Sendto,
    /// setsockopt(IP_ADD_MEMBERSHIP) returned an error
    JoinMulticast,
    /// setsockopt(IP_DROP_MEMBERSHIP) returned an error
    LeaveMulticast,
}

/// The errors which can be returned from [`Transport`] methods
#[non_exhaustive]
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// The socket needed for this operation has not been opened
    #[error("socket not open")]
    NotOpen,

    /// A system call returned an error
    #[error("error from syscall {0:?}")]
    Syscall(Syscall, #[source] ::std::io::Error),
}

/// The two UDP paths used by discovery
///
/// The multicast path is bound to port 1900 and joined to the SSDP
/// group for as long as discovery runs; it hears NOTIFY messages. The
/// search path is an ephemeral socket opened for each burst, from
/// which M-SEARCH requests go out and on which the unicast responses
/// come back.
///
/// [`crate::Engine`] drives a `Transport` but never owns one, so that
/// it can be tested against a fake.
pub trait Transport {
    /// Open and bind the multicast receive socket
    ///
    /// # Errors
    ///
    /// Passes on any failure from the underlying socket calls.
    fn open_multicast(&mut self) -> Result<(), Error>;

    /// Join the SSDP group on the already-open multicast socket
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotOpen`] if there is no multicast socket, or
    /// passes on a failure from the system call.
    fn join_multicast(&mut self) -> Result<(), Error>;

    /// Leave the group and release the multicast socket
    ///
    /// # Errors
    ///
    /// Passes on a failure from the system call; the socket is
    /// released anyway.
    fn close_multicast(&mut self) -> Result<(), Error>;

    /// Open the search socket, if not already open
    ///
    /// # Errors
    ///
    /// Passes on any failure from the underlying socket calls.
    fn open_search(&mut self) -> Result<(), Error>;

    /// Release the search socket, if open
    fn close_search(&mut self);

    /// Send a datagram from the search socket
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotOpen`] if there is no search socket, or
    /// passes on a failure from the system call.
    fn send_search(&mut self, packet: &[u8], to: SocketAddr)
        -> Result<(), Error>;
}

/// Socket set-up common to all implementations using `std::net` underneath
pub mod std;

/// [`Transport`] implementation for Tokio sockets
pub mod tokio;
