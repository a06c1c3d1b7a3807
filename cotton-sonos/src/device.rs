use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::net::{IpAddr, SocketAddr};
use std::time::SystemTime;

/// The state of one GENA event subscription
///
/// A service path with no entry in [`Device::subscriptions`] is
/// unsubscribed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Subscription {
    /// SUBSCRIBE has been sent, no answer yet
    Pending,

    /// The device accepted, and named the subscription
    Active {
        /// Subscription identifier (SID), needed to unsubscribe
        sid: String,
    },
}

/// One Sonos player (or other ZonePlayer-type device)
///
/// Records are created from the device description document (see
/// [`crate::description`]) and replaced, never merged, when that
/// document is fetched again.
///
/// Serialisable, so that the last-known set of devices can be saved
/// and passed back to [`crate::AsyncService::start`] next time.
/// Subscription state is not saved: SIDs do not outlive the process
/// that subscribed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Device {
    /// Identity, e.g. "uuid:RINCON_000E58A0123401400"
    pub id: String,

    /// Address of the device, from the description URL
    pub ip: IpAddr,

    /// HTTP port of the device, from the description URL
    pub port: u16,

    /// URL of the device description document
    pub info_url: String,

    /// Declared UPnP device type
    #[serde(default)]
    pub device_type: String,

    /// Whether the device has a speaker of its own
    pub can_play_music: bool,

    /// Room name
    pub group_name: String,

    /// Event subscription paths, in document order
    pub services: Vec<String>,

    /// Subscription state, by service path
    #[serde(skip)]
    pub subscriptions: BTreeMap<String, Subscription>,

    /// When this record was made from a freshly-fetched document
    pub last_updated: SystemTime,
}

impl Device {
    /// Socket address for HTTP and GENA requests to this device
    #[must_use]
    pub fn address(&self) -> SocketAddr {
        SocketAddr::new(self.ip, self.port)
    }

    /// The SID of the active subscription to `path`, if any
    #[must_use]
    pub fn subscription_id(&self, path: &str) -> Option<&str> {
        match self.subscriptions.get(path) {
            Some(Subscription::Active { sid }) => Some(sid),
            _ => None,
        }
    }

    /// Whether any subscription is active
    #[must_use]
    pub fn has_active_subscription(&self) -> bool {
        self.subscriptions
            .values()
            .any(|s| matches!(s, Subscription::Active { .. }))
    }

    /// Whether any subscription is active or pending
    #[must_use]
    pub fn has_subscriptions(&self) -> bool {
        !self.subscriptions.is_empty()
    }

    /// All active subscriptions, as (path, SID) pairs
    pub fn active_subscriptions(&self) -> impl Iterator<Item = (&str, &str)> {
        self.subscriptions.iter().filter_map(|(path, s)| match s {
            Subscription::Active { sid } => Some((path.as_str(), sid.as_str())),
            Subscription::Pending => None,
        })
    }

    /// The service path whose subscription has this SID
    #[must_use]
    pub fn service_for_sid(&self, sid: &str) -> Option<&str> {
        self.active_subscriptions()
            .find(|(_, s)| *s == sid)
            .map(|(path, _)| path)
    }

    /// Whether this record was last refreshed more than `max_age` before `now`
    ///
    /// A `last_updated` in the future (clock stepped backwards) counts
    /// as fresh.
    #[must_use]
    pub fn is_stale(&self, now: SystemTime, max_age: std::time::Duration) -> bool {
        now.duration_since(self.last_updated)
            .is_ok_and(|age| age > max_age)
    }
}
