//! GENA, the UPnP eventing protocol: SUBSCRIBE and UNSUBSCRIBE requests

use crate::error::Error;
use reqwest::{Method, StatusCode};
use std::net::SocketAddr;
use std::time::Duration;
use tracing::trace;

/// The granted lifetime from a "Second-N" TIMEOUT header
///
/// "infinite" is not something Sonos grants; it yields `None` like
/// any other unparsable value.
#[must_use]
pub fn parse_timeout(value: &str) -> Option<Duration> {
    let (prefix, n) = value.trim().split_at_checked(7)?;
    if !prefix.eq_ignore_ascii_case("Second-") {
        return None;
    }
    n.parse::<u64>().ok().map(Duration::from_secs)
}

fn method(name: &'static str) -> Result<Method, Error> {
    Method::from_bytes(name.as_bytes()).map_err(|_| Error::InvalidMethod(name))
}

/// Sends GENA requests, each on a fresh connection
///
/// Every exchange, connecting included, must complete within the
/// timeout given to [`Client::new`].
#[derive(Debug, Clone)]
pub struct Client {
    http: reqwest::Client,
    timeout: Duration,
}

impl Client {
    /// Create a client whose exchanges give up after `timeout`
    ///
    /// # Errors
    ///
    /// Returns [`Error::Http`] if the HTTP client cannot be set up.
    pub fn new(timeout: Duration) -> Result<Self, Error> {
        let http = reqwest::Client::builder()
            .no_proxy()
            .timeout(timeout)
            .pool_max_idle_per_host(0)
            .http1_title_case_headers()
            .build()?;
        Ok(Self { http, timeout })
    }

    fn failed(&self, e: reqwest::Error) -> Error {
        if e.is_timeout() {
            Error::Timeout(self.timeout)
        } else {
            Error::Http(e)
        }
    }

    async fn send(
        &self,
        request: reqwest::RequestBuilder,
    ) -> Result<reqwest::Response, Error> {
        let response = request.send().await.map_err(|e| self.failed(e))?;
        trace!(status = %response.status(), headers = ?response.headers(), "GENA response");
        match response.status() {
            StatusCode::OK => Ok(response),
            code => Err(Error::Status(code.as_u16())),
        }
    }

    /// Ask the device at `addr` to NOTIFY `callback` about changes to `path`
    ///
    /// Returns the SID and, if the device said, the granted lifetime.
    ///
    /// # Errors
    ///
    /// Fails for a transport failure or timeout, a non-200 status, or a
    /// 200 without SID.
    pub async fn subscribe(
        &self,
        addr: SocketAddr,
        path: &str,
        callback: &str,
        lifetime: Duration,
    ) -> Result<(String, Option<Duration>), Error> {
        let request = self
            .http
            .request(method("SUBSCRIBE")?, format!("http://{addr}{path}"))
            .header("CALLBACK", format!("<{callback}>"))
            .header("NT", "upnp:event")
            .header("TIMEOUT", format!("Second-{}", lifetime.as_secs()));
        let response = self.send(request).await?;

        let header = |name: &str| {
            response
                .headers()
                .get(name)
                .and_then(|v| v.to_str().ok())
                .map(str::trim)
                .filter(|s| !s.is_empty())
        };
        let sid = header("SID").ok_or(Error::NoSubscriptionId)?;
        Ok((sid.to_string(), header("TIMEOUT").and_then(parse_timeout)))
    }

    /// Cancel subscription `sid` to `path` on the device at `addr`
    ///
    /// # Errors
    ///
    /// Fails for a transport failure or timeout, or a non-200 status.
    pub async fn unsubscribe(
        &self,
        addr: SocketAddr,
        path: &str,
        sid: &str,
    ) -> Result<(), Error> {
        let request = self
            .http
            .request(method("UNSUBSCRIBE")?, format!("http://{addr}{path}"))
            .header("SID", sid);
        self.send(request).await.map(|_| ())
    }
}
