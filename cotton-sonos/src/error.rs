use std::net::IpAddr;
use std::time::Duration;

/// The errors which can be returned by the control point
///
/// Most of these never reach the application: the
/// [`Engine`](crate::Engine) logs failed fetches and subscriptions and
/// carries on. They surface from the building blocks
/// ([`Fetcher`](crate::Fetcher), [`SubscriptionManager`](crate::SubscriptionManager),
/// [`AsyncService::start`](crate::AsyncService::start)) when used directly.
#[non_exhaustive]
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// A UDP socket operation failed
    #[error("UDP: {0}")]
    Udp(#[from] crate::udp::Error),

    /// A TCP or listener socket operation failed
    #[error("I/O: {0}")]
    Io(#[from] std::io::Error),

    /// An HTTP exchange with a device failed
    #[error("HTTP: {0}")]
    Http(#[from] reqwest::Error),

    /// A description document was not well-formed XML
    #[error("XML: {0}")]
    Xml(#[from] xmltree::ParseError),

    /// A URL could not be parsed, or has no IP address host
    #[error("invalid URL {0:?}")]
    InvalidUrl(String),

    /// A description document lacks a mandatory element
    #[error("description document has no {0}")]
    MissingField(&'static str),

    /// A peer answered a GENA request with a non-200 status
    #[error("peer answered with HTTP status {0}")]
    Status(u16),

    /// A SUBSCRIBE response carried no SID header
    #[error("subscribe response carried no SID")]
    NoSubscriptionId,

    /// A peer did not answer in time
    #[error("no response within {0:?}")]
    Timeout(Duration),

    /// An event callback arrived from an address matching no known device
    #[error("event callback from unknown peer {0}")]
    UnknownPeer(IpAddr),

    /// No local address routes to the device, so no CALLBACK URL can be made
    #[error("no local address routes to {0}")]
    NoCallbackAddress(IpAddr),

    /// Serialising a header block which has no request or status line
    #[error("header block has neither request line nor status line")]
    NoStartLine,

    /// A request method name was not a valid HTTP token
    #[error("invalid HTTP method {0:?}")]
    InvalidMethod(&'static str),

    /// Invalid combination of options
    #[error("invalid options: {0}")]
    InvalidOptions(&'static str),
}
