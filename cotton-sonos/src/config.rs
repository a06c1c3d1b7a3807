use crate::error::Error;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::time::Duration;

/// The SSDP search target for Sonos players
pub const ZONE_PLAYER: &str = "urn:schemas-upnp-org:device:ZonePlayer:1";

/// Settings for SSDP discovery, see [`crate::Engine`]
#[derive(Debug, Clone)]
pub struct DiscoveryOptions {
    /// Search target (ST) sent in each M-SEARCH
    pub target_scope: String,

    /// USER-AGENT sent in each M-SEARCH
    pub user_agent: String,

    /// MX: how long, in seconds, devices may wait before answering
    pub max_wait_time: u8,

    /// How many copies of the M-SEARCH go out in each burst
    pub search_count: u32,

    /// Gap between the copies within a burst (plus up to 50ms of jitter)
    pub search_spacing: Duration,

    /// Gap between bursts
    pub burst_interval: Duration,

    /// No new bursts start once this long has passed since start
    pub burst_window: Duration,

    /// How long the search socket stays open after the last send of a
    /// burst; must be longer than `max_wait_time`
    pub response_grace: Duration,

    /// How often the registry is swept for stale devices
    pub decay_interval: Duration,

    /// Devices not refreshed for this long are re-validated by the sweep
    pub max_age: Duration,

    /// Local interface address on which to join the multicast group
    /// (`0.0.0.0` lets the OS choose)
    pub multicast_interface: Ipv4Addr,

    /// Time limit on fetching one description document
    pub fetch_timeout: Duration,
}

impl Default for DiscoveryOptions {
    fn default() -> Self {
        Self {
            target_scope: ZONE_PLAYER.to_string(),
            user_agent: format!(
                "Linux UPnP/1.0 {}/{}",
                env!("CARGO_PKG_NAME"),
                env!("CARGO_PKG_VERSION")
            ),
            max_wait_time: 1,
            search_count: 3,
            search_spacing: Duration::from_millis(250),
            burst_interval: Duration::from_secs(3),
            burst_window: Duration::from_secs(10),
            response_grace: Duration::from_secs(2),
            decay_interval: Duration::from_secs(5 * 60),
            max_age: Duration::from_secs(30 * 60),
            multicast_interface: Ipv4Addr::UNSPECIFIED,
            fetch_timeout: Duration::from_secs(5),
        }
    }
}

impl DiscoveryOptions {
    /// Check that the settings make sense together
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidOptions`] if the grace period does not
    /// outlast MX, or if any count or interval is zero.
    pub fn validate(&self) -> Result<(), Error> {
        if self.search_count == 0 {
            return Err(Error::InvalidOptions("search_count must be non-zero"));
        }
        if self.max_wait_time == 0 {
            return Err(Error::InvalidOptions("max_wait_time must be non-zero"));
        }
        if self.response_grace
            <= Duration::from_secs(u64::from(self.max_wait_time))
        {
            return Err(Error::InvalidOptions(
                "response_grace must exceed max_wait_time",
            ));
        }
        if self.burst_interval.is_zero() || self.decay_interval.is_zero() {
            return Err(Error::InvalidOptions("intervals must be non-zero"));
        }
        if self.target_scope.is_empty() {
            return Err(Error::InvalidOptions("target_scope must be set"));
        }
        Ok(())
    }
}

/// Settings for GENA event subscriptions, see [`crate::SubscriptionManager`]
#[derive(Debug, Clone)]
pub struct SubscribeOptions {
    /// Where the push-event listener binds; port 0 picks any free port
    pub listen: SocketAddr,

    /// The single path on which the listener accepts NOTIFY requests
    pub callback_path: String,

    /// Host to advertise in CALLBACK URLs; when `None`, the local
    /// address which routes to each device is used
    pub callback_host: Option<IpAddr>,

    /// Subscription lifetime requested in the TIMEOUT header
    pub timeout: Duration,

    /// Time limit on connecting and getting a response, per exchange
    pub exchange_timeout: Duration,
}

impl Default for SubscribeOptions {
    fn default() -> Self {
        Self {
            listen: SocketAddr::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED), 3400),
            callback_path: "/notify".to_string(),
            callback_host: None,
            timeout: Duration::from_secs(3600),
            exchange_timeout: Duration::from_secs(5),
        }
    }
}

impl SubscribeOptions {
    /// Check that the settings make sense
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidOptions`] if the callback path is not
    /// absolute or a timeout is zero.
    pub fn validate(&self) -> Result<(), Error> {
        if !self.callback_path.starts_with('/') {
            return Err(Error::InvalidOptions(
                "callback_path must start with '/'",
            ));
        }
        if self.timeout.as_secs() == 0 || self.exchange_timeout.is_zero() {
            return Err(Error::InvalidOptions("timeouts must be non-zero"));
        }
        Ok(())
    }
}

/// All the settings for an [`crate::AsyncService`]
#[derive(Debug, Clone, Default)]
pub struct Options {
    /// Discovery settings
    pub discovery: DiscoveryOptions,

    /// Eventing settings
    pub subscribe: SubscribeOptions,
}

impl Options {
    /// Check both sets of settings
    ///
    /// # Errors
    ///
    /// Returns the first [`Error::InvalidOptions`] found.
    pub fn validate(&self) -> Result<(), Error> {
        self.discovery.validate()?;
        self.subscribe.validate()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        assert!(Options::default().validate().is_ok());
    }

    #[test]
    fn grace_must_outlast_mx() {
        let o = DiscoveryOptions {
            max_wait_time: 2,
            response_grace: Duration::from_secs(2),
            ..Default::default()
        };
        assert!(matches!(o.validate(), Err(Error::InvalidOptions(_))));

        let o = DiscoveryOptions {
            max_wait_time: 2,
            response_grace: Duration::from_millis(2001),
            ..Default::default()
        };
        assert!(o.validate().is_ok());
    }

    #[test]
    fn zero_search_count_rejected() {
        let o = DiscoveryOptions {
            search_count: 0,
            ..Default::default()
        };
        assert!(o.validate().is_err());
    }

    #[test]
    fn zero_decay_interval_rejected() {
        let o = DiscoveryOptions {
            decay_interval: Duration::ZERO,
            ..Default::default()
        };
        assert!(o.validate().is_err());
    }

    #[test]
    fn relative_callback_path_rejected() {
        let o = SubscribeOptions {
            callback_path: "notify".to_string(),
            ..Default::default()
        };
        assert!(o.validate().is_err());
    }

    #[test]
    fn options_validate_both_halves() {
        let o = Options {
            subscribe: SubscribeOptions {
                timeout: Duration::from_millis(10),
                ..Default::default()
            },
            ..Default::default()
        };
        assert!(o.validate().is_err());
    }

    #[test]
    fn user_agent_names_crate() {
        let o = DiscoveryOptions::default();
        assert!(o.user_agent.contains("cotton-sonos/"));
    }
}
