use crate::config::SubscribeOptions;
use crate::device::Device;
use crate::error::Error;
use crate::gena;
use futures_util::future::join_all;
use std::net::{IpAddr, SocketAddr, UdpSocket};
use std::time::Duration;
use tracing::{debug, info, warn};

/// The local address from which traffic to `peer` would be sent
///
/// Connecting a UDP socket sends nothing; it just asks the routing
/// table.
///
/// # Errors
///
/// Passes on failures from the socket calls (e.g. no route to `peer`).
pub fn local_ip_for(peer: SocketAddr) -> Result<IpAddr, Error> {
    let any: SocketAddr = match peer {
        SocketAddr::V4(_) => SocketAddr::from(([0, 0, 0, 0], 0)),
        SocketAddr::V6(_) => SocketAddr::from(([0u16; 8], 0)),
    };
    let socket = UdpSocket::bind(any)?;
    socket.connect(peer)?;
    Ok(socket.local_addr()?.ip())
}

/// Issues GENA subscribe and unsubscribe exchanges for whole devices
///
/// Holds no subscription state of its own: results are handed back to
/// the caller, which records them in the registry.
#[derive(Debug, Clone)]
pub struct SubscriptionManager {
    options: SubscribeOptions,
    listen_port: u16,
    client: gena::Client,
}

impl SubscriptionManager {
    /// Create a manager whose CALLBACK URLs point at `listen_port`
    ///
    /// # Errors
    ///
    /// Returns [`Error::Http`] if the HTTP client cannot be set up.
    pub fn new(
        options: SubscribeOptions,
        listen_port: u16,
    ) -> Result<Self, Error> {
        let client = gena::Client::new(options.exchange_timeout)?;
        Ok(Self {
            options,
            listen_port,
            client,
        })
    }

    /// The CALLBACK URL to give `device`
    ///
    /// # Errors
    ///
    /// Fails if no configured host is set and no local address routes
    /// to the device.
    pub fn callback_url(&self, device: &Device) -> Result<String, Error> {
        let host = match self.options.callback_host {
            Some(ip) => ip,
            None => local_ip_for(device.address())?,
        };
        Ok(format!(
            "http://{}{}",
            SocketAddr::new(host, self.listen_port),
            self.options.callback_path
        ))
    }

    /// Subscribe to every service of `device`
    ///
    /// Does nothing if the device already has an active subscription.
    /// Each service is tried concurrently and independently; the
    /// result for each path is returned, with the SID on success.
    pub async fn register(
        &self,
        device: &Device,
    ) -> Vec<(String, Result<String, Error>)> {
        if device.has_active_subscription() {
            debug!(id = %device.id, "already subscribed");
            return Vec::new();
        }
        let callback = match self.callback_url(device) {
            Ok(url) => url,
            Err(e) => {
                warn!(id = %device.id, error = %e, "no callback address");
                return device
                    .services
                    .iter()
                    .map(|p| (p.clone(), Err(Error::NoCallbackAddress(device.ip))))
                    .collect();
            }
        };
        let addr = device.address();
        let requests = device.services.iter().map(|path| {
            let callback = callback.as_str();
            async move {
                let r = self
                    .client
                    .subscribe(addr, path, callback, self.options.timeout)
                    .await;
                match &r {
                    Ok((sid, granted)) => {
                        info!(id = %device.id, %path, %sid, granted = ?granted.map(|d: Duration| d.as_secs()), "subscribed");
                    }
                    Err(e) => {
                        warn!(id = %device.id, %path, error = %e, "subscribe failed");
                    }
                }
                (path.clone(), r.map(|(sid, _)| sid))
            }
        });
        join_all(requests).await
    }

    /// Cancel every active subscription of `device`, best effort
    pub async fn unregister(
        &self,
        device: &Device,
    ) -> Vec<(String, Result<(), Error>)> {
        let addr = device.address();
        let requests = device.active_subscriptions().map(|(path, sid)| async move {
            let r = self.client.unsubscribe(addr, path, sid).await;
            match &r {
                Ok(()) => debug!(id = %device.id, %path, %sid, "unsubscribed"),
                Err(e) => {
                    debug!(id = %device.id, %path, %sid, error = %e, "unsubscribe failed");
                }
            }
            (path.to_string(), r)
        });
        join_all(requests).await
    }
}
