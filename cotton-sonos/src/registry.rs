use crate::device::{Device, Subscription};
use std::net::IpAddr;
use tracing::{debug, info};

/// Told about every change made to a [`Registry`]
pub trait Observer {
    /// The set of devices changed; here is all of it
    fn registry_changed(&self, devices: Vec<Device>);

    /// This device is about to be deleted; tear down its subscriptions
    fn unregister(&self, device: &Device);
}

/// How to pick out one device
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Selector<'a> {
    /// By identity ("uuid:RINCON_...")
    Id(&'a str),
    /// By address
    Ip(IpAddr),
    /// By description document URL
    InfoUrl(&'a str),
}

impl Selector<'_> {
    fn matches(&self, d: &Device) -> bool {
        match *self {
            Self::Id(id) => d.id == id,
            Self::Ip(ip) => d.ip == ip,
            Self::InfoUrl(url) => d.info_url == url,
        }
    }
}

/// The known devices, and the single source of truth about them
///
/// Every insertion, replacement or deletion is reported to the
/// [`Observer`] with a full snapshot. Changes to subscription state
/// are not reported: they are the subscription manager's own
/// business.
///
/// A linear scan is fine for the few dozen players a household has.
pub struct Registry<O: Observer> {
    devices: Vec<Device>,
    observer: O,
}

impl<O: Observer> Registry<O> {
    /// Create an empty registry reporting to `observer`
    pub fn new(observer: O) -> Self {
        Self {
            devices: Vec::new(),
            observer,
        }
    }

    /// The observer
    pub fn observer(&self) -> &O {
        &self.observer
    }

    /// Find a device
    #[must_use]
    pub fn get(&self, selector: Selector<'_>) -> Option<&Device> {
        self.devices.iter().find(|d| selector.matches(d))
    }

    /// A copy of every device
    #[must_use]
    pub fn list(&self) -> Vec<Device> {
        self.devices.clone()
    }

    /// Iterate over the devices without copying
    pub fn iter(&self) -> impl Iterator<Item = &Device> {
        self.devices.iter()
    }

    /// Number of devices
    #[must_use]
    pub fn len(&self) -> usize {
        self.devices.len()
    }

    /// Whether there are no devices
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.devices.is_empty()
    }

    fn changed(&self) {
        self.observer.registry_changed(self.list());
    }

    /// Insert a device, or replace the one with the same id
    ///
    /// A replacement starts with no subscription state, whatever the
    /// old record had. Returns the old record, if any.
    pub fn upsert(&mut self, mut device: Device) -> Option<Device> {
        device.subscriptions.clear();
        let old = if let Some(slot) =
            self.devices.iter_mut().find(|d| d.id == device.id)
        {
            debug!(id = %device.id, "device refreshed");
            Some(std::mem::replace(slot, device))
        } else {
            info!(id = %device.id, room = %device.group_name, "device added");
            self.devices.push(device);
            None
        };
        self.changed();
        old
    }

    /// Delete a device, having first told the observer to unsubscribe it
    ///
    /// Unknown ids are ignored, and no change is reported.
    pub fn remove(&mut self, id: &str) -> Option<Device> {
        let index = self.devices.iter().position(|d| d.id == id)?;
        self.observer.unregister(&self.devices[index]);
        let device = self.devices.remove(index);
        info!(id = %device.id, room = %device.group_name, "device removed");
        self.changed();
        Some(device)
    }

    /// Load a saved snapshot without reporting it
    ///
    /// Any subscription state in the snapshot is discarded. Later
    /// entries win over earlier ones with the same id.
    pub fn restore(&mut self, snapshot: Vec<Device>) {
        for mut device in snapshot {
            device.subscriptions.clear();
            if let Some(slot) =
                self.devices.iter_mut().find(|d| d.id == device.id)
            {
                *slot = device;
            } else {
                self.devices.push(device);
            }
        }
    }

    /// Report the current contents, unchanged, to the observer
    pub fn announce(&self) {
        self.changed();
    }

    /// Record the state of one subscription
    ///
    /// Returns false if the device is unknown.
    pub fn set_subscription(
        &mut self,
        id: &str,
        path: &str,
        state: Subscription,
    ) -> bool {
        match self.devices.iter_mut().find(|d| d.id == id) {
            Some(d) => {
                d.subscriptions.insert(path.to_string(), state);
                true
            }
            None => false,
        }
    }

    /// Forget every subscription which is still pending
    pub fn clear_pending(&mut self) {
        for d in &mut self.devices {
            d.subscriptions.retain(|_, s| *s != Subscription::Pending);
        }
    }

    /// Forget one subscription, returning what it was
    pub fn clear_subscription(
        &mut self,
        id: &str,
        path: &str,
    ) -> Option<Subscription> {
        self.devices
            .iter_mut()
            .find(|d| d.id == id)
            .and_then(|d| d.subscriptions.remove(path))
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::device::tests::device;
    use std::sync::{Arc, Mutex};

    #[derive(Default, Clone)]
    pub(crate) struct FakeObserver {
        pub(crate) changes: Arc<Mutex<Vec<Vec<Device>>>>,
        pub(crate) unregistered: Arc<Mutex<Vec<Device>>>,
    }

    impl FakeObserver {
        pub(crate) fn change_count(&self) -> usize {
            self.changes.lock().unwrap().len()
        }
    }

    impl Observer for FakeObserver {
        fn registry_changed(&self, devices: Vec<Device>) {
            self.changes.lock().unwrap().push(devices);
        }

        fn unregister(&self, device: &Device) {
            self.unregistered.lock().unwrap().push(device.clone());
        }
    }

    fn fixture() -> (Registry<FakeObserver>, FakeObserver) {
        let o = FakeObserver::default();
        (Registry::new(o.clone()), o)
    }

    #[test]
    fn upsert_new_adds_one_and_reports_once() {
        let (mut r, o) = fixture();
        assert!(r.upsert(device("uuid:A", "10.0.0.1")).is_none());
        assert_eq!(r.len(), 1);
        assert_eq!(o.change_count(), 1);
        assert_eq!(o.changes.lock().unwrap()[0].len(), 1);
    }

    #[test]
    fn upsert_existing_replaces() {
        let (mut r, o) = fixture();
        r.upsert(device("uuid:A", "10.0.0.1"));
        r.set_subscription(
            "uuid:A",
            "/x",
            Subscription::Active {
                sid: "uuid:s".to_string(),
            },
        );

        let mut newer = device("uuid:A", "10.0.0.9");
        newer.group_name = "Den".to_string();
        let old = r.upsert(newer).unwrap();

        assert_eq!(old.ip, "10.0.0.1".parse::<IpAddr>().unwrap());
        assert_eq!(r.len(), 1);
        assert_eq!(o.change_count(), 2);
        let d = r.get(Selector::Id("uuid:A")).unwrap();
        assert_eq!(d.group_name, "Den");
        assert!(!d.has_subscriptions());
    }

    #[test]
    fn selectors() {
        let (mut r, _) = fixture();
        r.upsert(device("uuid:A", "10.0.0.1"));
        r.upsert(device("uuid:B", "10.0.0.2"));
        assert_eq!(
            r.get(Selector::Ip("10.0.0.2".parse().unwrap())).unwrap().id,
            "uuid:B"
        );
        assert_eq!(
            r.get(Selector::InfoUrl(
                "http://10.0.0.1:1400/xml/device_description.xml"
            ))
            .unwrap()
            .id,
            "uuid:A"
        );
        assert!(r.get(Selector::Id("uuid:C")).is_none());
        assert!(r.get(Selector::Ip("10.0.0.3".parse().unwrap())).is_none());
    }

    #[test]
    fn remove_unknown_is_noop() {
        let (mut r, o) = fixture();
        r.upsert(device("uuid:A", "10.0.0.1"));
        assert!(r.remove("uuid:Z").is_none());
        assert_eq!(r.len(), 1);
        assert_eq!(o.change_count(), 1);
        assert!(o.unregistered.lock().unwrap().is_empty());
    }

    #[test]
    fn remove_unregisters_first() {
        let (mut r, o) = fixture();
        r.upsert(device("uuid:A", "10.0.0.1"));
        r.set_subscription(
            "uuid:A",
            "/x",
            Subscription::Active {
                sid: "uuid:s".to_string(),
            },
        );
        let gone = r.remove("uuid:A").unwrap();
        assert_eq!(gone.id, "uuid:A");
        assert!(r.is_empty());

        let unregistered = o.unregistered.lock().unwrap();
        assert_eq!(unregistered.len(), 1);
        assert_eq!(unregistered[0].subscription_id("/x"), Some("uuid:s"));
        assert_eq!(o.change_count(), 2);
        assert!(o.changes.lock().unwrap()[1].is_empty());
    }

    #[test]
    fn list_is_a_copy() {
        let (mut r, _) = fixture();
        r.upsert(device("uuid:A", "10.0.0.1"));
        let snapshot = r.list();
        r.remove("uuid:A");
        assert_eq!(snapshot.len(), 1);
        assert!(r.is_empty());
    }

    #[test]
    fn restore_is_silent_and_clears_subscriptions() {
        let (mut r, o) = fixture();
        let mut a = device("uuid:A", "10.0.0.1");
        a.subscriptions.insert(
            "/x".to_string(),
            Subscription::Active {
                sid: "uuid:stale".to_string(),
            },
        );
        let mut a2 = a.clone();
        a2.group_name = "Hall".to_string();
        r.restore(vec![a, device("uuid:B", "10.0.0.2"), a2]);

        assert_eq!(r.len(), 2);
        assert_eq!(o.change_count(), 0);
        let a = r.get(Selector::Id("uuid:A")).unwrap();
        assert!(!a.has_subscriptions());
        assert_eq!(a.group_name, "Hall");

        r.announce();
        assert_eq!(o.change_count(), 1);
        assert_eq!(o.changes.lock().unwrap()[0].len(), 2);
    }

    #[test]
    fn subscription_changes_are_silent() {
        let (mut r, o) = fixture();
        r.upsert(device("uuid:A", "10.0.0.1"));
        assert!(r.set_subscription("uuid:A", "/x", Subscription::Pending));
        assert!(!r.set_subscription("uuid:B", "/x", Subscription::Pending));
        assert_eq!(
            r.clear_subscription("uuid:A", "/x"),
            Some(Subscription::Pending)
        );
        assert_eq!(r.clear_subscription("uuid:A", "/x"), None);
        assert_eq!(o.change_count(), 1);
    }

    #[test]
    fn clear_pending_keeps_active() {
        let (mut r, o) = fixture();
        r.upsert(device("uuid:A", "10.0.0.1"));
        r.set_subscription("uuid:A", "/x", Subscription::Pending);
        r.set_subscription(
            "uuid:A",
            "/y",
            Subscription::Active {
                sid: "uuid:s".to_string(),
            },
        );
        r.clear_pending();
        let a = r.get(Selector::Id("uuid:A")).unwrap();
        assert_eq!(a.subscriptions.len(), 1);
        assert_eq!(a.subscription_id("/y"), Some("uuid:s"));
        assert_eq!(o.change_count(), 1);
    }
}
