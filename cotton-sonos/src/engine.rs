use crate::config::DiscoveryOptions;
use crate::device::{Device, Subscription};
use crate::error::Error;
use crate::message::{self, Advertisement, Message};
use crate::registry::{Observer, Registry, Selector};
use crate::udp::{self, Transport};
use rand::Rng;
use std::collections::{HashSet, VecDeque};
use std::net::{IpAddr, SocketAddr};
use std::time::{Duration, SystemTime};
use tracing::{debug, info, trace, warn};

const MAX_JITTER_MS: u64 = 50;

/// A description document the [`Engine`] wants fetched
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchRequest {
    /// Where the document is
    pub url: String,
    /// The identity we expect it to describe
    pub id: String,
}

/// Calls made by an [`Engine`] to get work done
///
/// The engine does no HTTP itself. The owner carries out each request
/// (usually as a spawned task) and reports the result back through
/// [`Engine::on_description`] or [`Engine::on_subscribed`]. The
/// [`Observer`] half covers registry changes and unsubscribing.
///
/// See the implementation in [`crate::AsyncService`].
pub trait Callback: Observer {
    /// Please fetch and parse this description document
    fn fetch_description(&self, request: FetchRequest);

    /// Please subscribe to every service of this device
    fn register(&self, device: &Device);

    /// A device sent us an event
    fn device_pushed_state(
        &self,
        device: Device,
        service: Option<String>,
        payload: String,
    );
}

/// Where the engine is in its lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum State {
    /// Not listening; the registry is kept but nothing changes it
    Stopped,
    /// Opening the multicast socket
    Joining,
    /// Listening and searching
    Running,
}

/// The core of the control point
///
/// Owns the device registry and decides when to search, what to fetch,
/// and when to subscribe or unsubscribe. It owns no sockets and does
/// no I/O of its own apart from through the [`Transport`] passed to
/// each call, which makes it straightforward to test; the usual owner
/// is [`crate::AsyncService`].
///
/// The owner should pass incoming datagrams to [`Engine::on_data`],
/// and must implement a timer facility: [`Engine::next_wakeup`] says
/// how long until the engine next needs attention, and when that time
/// comes [`Engine::wakeup`] must be called.
///
/// All times are wall-clock times supplied by the owner, because the
/// device records they are compared with are saved across runs.
pub struct Engine<CB: Callback> {
    options: DiscoveryOptions,
    state: State,
    registry: Registry<CB>,
    fetching: HashSet<String>,
    search: String,
    next_burst: Option<SystemTime>,
    burst_deadline: Option<SystemTime>,
    pending_searches: VecDeque<SystemTime>,
    search_close: Option<SystemTime>,
    next_sweep: Option<SystemTime>,
}

fn due(t: Option<SystemTime>, now: SystemTime) -> bool {
    t.is_some_and(|t| t <= now)
}

impl<CB: Callback> Engine<CB> {
    /// Create a new, stopped, Engine
    pub fn new(options: DiscoveryOptions, callback: CB) -> Self {
        let search = message::build_search(&options);
        Self {
            options,
            state: State::Stopped,
            registry: Registry::new(callback),
            fetching: HashSet::new(),
            search,
            next_burst: None,
            burst_deadline: None,
            pending_searches: VecDeque::new(),
            search_close: None,
            next_sweep: None,
        }
    }

    /// The current state
    #[must_use]
    pub fn state(&self) -> State {
        self.state
    }

    /// A copy of every known device
    #[must_use]
    pub fn devices(&self) -> Vec<Device> {
        self.registry.list()
    }

    /// Look up one known device
    #[must_use]
    pub fn device(&self, selector: Selector<'_>) -> Option<&Device> {
        self.registry.get(selector)
    }

    /// Whether a fetch for this identity is in flight
    #[must_use]
    pub fn is_fetching(&self, id: &str) -> bool {
        self.fetching.contains(id)
    }

    /// Join the multicast group and begin discovery
    ///
    /// `snapshot` is a previously-saved device list (possibly empty).
    /// It is loaded into the registry and reported straight away, and
    /// its devices are subscribed afresh. The first burst of searches
    /// is due immediately.
    ///
    /// # Errors
    ///
    /// Passes on a failure to open or join the multicast socket, in
    /// which case the engine stays stopped.
    pub fn start<T: Transport>(
        &mut self,
        snapshot: Vec<Device>,
        now: SystemTime,
        transport: &mut T,
    ) -> Result<(), Error> {
        if self.state != State::Stopped {
            return Ok(());
        }
        self.state = State::Joining;
        if let Err(e) = transport
            .open_multicast()
            .and_then(|()| transport.join_multicast())
        {
            let _ = transport.close_multicast();
            self.state = State::Stopped;
            warn!(error = %e, "could not join SSDP group");
            return Err(e.into());
        }
        self.state = State::Running;
        info!(devices = snapshot.len(), "discovery started");

        self.registry.restore(snapshot);
        self.registry.announce();
        let ids: Vec<String> =
            self.registry.iter().map(|d| d.id.clone()).collect();
        for id in ids {
            self.request_subscriptions(&id);
        }

        self.fetching.clear();
        self.next_burst = Some(now);
        self.burst_deadline = now.checked_add(self.options.burst_window);
        self.pending_searches.clear();
        self.search_close = None;
        self.next_sweep = now.checked_add(self.options.decay_interval);
        Ok(())
    }

    /// Stop discovery and release the sockets
    ///
    /// The registry is kept, see [`Engine::devices`], apart from
    /// subscriptions still pending: those are forgotten, so that a
    /// later [`Engine::start`] asks for them again.
    pub fn stop<T: Transport>(&mut self, transport: &mut T) {
        if self.state == State::Stopped {
            return;
        }
        self.state = State::Stopped;
        if let Err(e) = transport.close_multicast() {
            debug!(error = %e, "leaving SSDP group");
        }
        transport.close_search();
        self.next_burst = None;
        self.pending_searches.clear();
        self.search_close = None;
        self.next_sweep = None;
        self.registry.clear_pending();
        info!("discovery stopped");
    }

    /// Obtain the desired delay before the next [`Engine::wakeup`] is needed
    ///
    /// `None` means no timer is needed (the engine is stopped).
    #[must_use]
    pub fn next_wakeup(&self, now: SystemTime) -> Option<Duration> {
        if self.state != State::Running {
            return None;
        }
        [
            self.next_burst,
            self.pending_searches.front().copied(),
            self.search_close,
            self.next_sweep,
        ]
        .into_iter()
        .flatten()
        .min()
        .map(|t| t.duration_since(now).unwrap_or(Duration::ZERO))
    }

    /// Notify the `Engine` that its timeout has expired
    ///
    /// Does whatever is due: starting a burst, sending a search,
    /// closing the search socket, or sweeping for stale devices.
    pub fn wakeup<T: Transport>(&mut self, now: SystemTime, transport: &mut T) {
        if self.state != State::Running {
            return;
        }

        if due(self.next_burst, now) {
            self.begin_burst(now, transport);
        }

        while self.pending_searches.front().is_some_and(|t| *t <= now) {
            self.pending_searches.pop_front();
            if let Err(e) =
                transport.send_search(self.search.as_bytes(), udp::SSDP_GROUP)
            {
                warn!(error = %e, "M-SEARCH not sent");
            }
            if self.pending_searches.is_empty() {
                self.search_close = now.checked_add(self.options.response_grace);
            }
        }

        if due(self.search_close, now) {
            trace!("closing search socket");
            transport.close_search();
            self.search_close = None;
        }

        if due(self.next_sweep, now) {
            self.sweep(now);
            self.next_sweep = now.checked_add(self.options.decay_interval);
        }
    }

    fn begin_burst<T: Transport>(&mut self, now: SystemTime, transport: &mut T) {
        self.next_burst = now
            .checked_add(self.options.burst_interval)
            .filter(|next| self.burst_deadline.map_or(true, |end| *next < end));

        if let Err(e) = transport.open_search() {
            warn!(error = %e, "search socket unavailable, skipping burst");
            return;
        }
        debug!(count = self.options.search_count, "search burst");
        self.search_close = None;
        let mut rng = rand::rng();
        for i in 0..self.options.search_count {
            let offset = if i == 0 {
                Some(Duration::ZERO)
            } else {
                let jitter =
                    Duration::from_millis(rng.random_range(0..=MAX_JITTER_MS));
                self.options
                    .search_spacing
                    .checked_mul(i)
                    .and_then(|d| d.checked_add(jitter))
            };
            match offset.and_then(|d| now.checked_add(d)) {
                Some(at) => self.pending_searches.push_back(at),
                None => trace!(i, "search beyond the end of time"),
            }
        }
        self.pending_searches.make_contiguous().sort();
    }

    fn sweep(&mut self, now: SystemTime) {
        let stale: Vec<(String, String)> = self
            .registry
            .iter()
            .filter(|d| d.is_stale(now, self.options.max_age))
            .map(|d| (d.id.clone(), d.info_url.clone()))
            .collect();
        debug!(stale = stale.len(), "decay sweep");
        for (id, url) in stale {
            self.registry.remove(&id);
            self.fetch(id, url);
        }
    }

    fn fetch(&mut self, id: String, url: String) {
        self.fetching.insert(id.clone());
        self.registry
            .observer()
            .fetch_description(FetchRequest { url, id });
    }

    /// Notify the `Engine` that a datagram arrived on either socket
    pub fn on_data(&mut self, buf: &[u8], from: SocketAddr) {
        if self.state != State::Running {
            return;
        }
        let message = match message::parse(buf) {
            Ok(m) => m,
            Err(e) => {
                trace!(%from, error = %e, "ignoring datagram");
                return;
            }
        };
        match message {
            Message::Response(r) => {
                if self.registry.get(Selector::Id(&r.id)).is_none()
                    && !self.fetching.contains(&r.id)
                {
                    debug!(id = %r.id, %from, "new device");
                    self.fetch(r.id, r.location);
                }
            }
            Message::Notify(n) => match n.advertisement {
                Advertisement::Alive { .. } | Advertisement::Update { .. } => {
                    if let Some(location) = n.location {
                        debug!(id = %n.id, %from, "device advertised");
                        self.fetch(n.id, location);
                    }
                }
                Advertisement::Goodbye => {
                    debug!(id = %n.id, %from, "device leaving");
                    self.registry.remove(&n.id);
                }
            },
        }
    }

    /// Notify the `Engine` that a description fetch has finished
    ///
    /// Ignored if the engine has stopped meanwhile. A failure is
    /// logged and otherwise ignored: any existing record for the
    /// device stays as it was.
    pub fn on_description(
        &mut self,
        request: &FetchRequest,
        result: Result<Device, Error>,
    ) {
        self.fetching.remove(&request.id);
        if self.state == State::Stopped {
            debug!(url = %request.url, "discarding description, stopped");
            return;
        }
        match result {
            Ok(device) => {
                let id = device.id.clone();
                self.fetching.remove(&id);
                if let Some(old) = self.registry.upsert(device) {
                    if old.has_active_subscription() {
                        self.registry.observer().unregister(&old);
                    }
                }
                self.request_subscriptions(&id);
            }
            Err(e) => {
                warn!(url = %request.url, error = %e, "description fetch failed");
            }
        }
    }

    fn request_subscriptions(&mut self, id: &str) {
        let Some(device) = self.registry.get(Selector::Id(id)) else {
            return;
        };
        if device.services.is_empty() || device.has_subscriptions() {
            return;
        }
        let device = device.clone();
        for path in &device.services {
            self.registry
                .set_subscription(id, path, Subscription::Pending);
        }
        self.registry.observer().register(&device);
    }

    /// Notify the `Engine` that one SUBSCRIBE exchange has finished
    ///
    /// `device` is the record that was passed to [`Callback::register`].
    /// If that record has since been deleted or replaced, or the engine
    /// has stopped, a successful subscription is orphaned, and is handed
    /// straight back to [`Observer::unregister`].
    pub fn on_subscribed(
        &mut self,
        device: &Device,
        path: &str,
        result: Result<String, Error>,
    ) {
        let current = self.registry.get(Selector::Id(&device.id)).filter(|d| {
            d.last_updated == device.last_updated
                && d.subscriptions.get(path) == Some(&Subscription::Pending)
        });
        match (current.is_some(), result) {
            (true, Ok(sid)) => {
                self.registry.set_subscription(
                    &device.id,
                    path,
                    Subscription::Active { sid },
                );
            }
            (true, Err(_)) => {
                self.registry.clear_subscription(&device.id, path);
            }
            (false, Ok(sid)) => {
                debug!(id = %device.id, %path, %sid, "orphaned subscription");
                let mut orphan = device.clone();
                orphan.subscriptions.clear();
                orphan
                    .subscriptions
                    .insert(path.to_string(), Subscription::Active { sid });
                self.registry.observer().unregister(&orphan);
            }
            (false, Err(_)) => {}
        }
    }

    /// Route an inbound event NOTIFY to the device that sent it
    ///
    /// # Errors
    ///
    /// Returns [`Error::UnknownPeer`] if no device has the sender's
    /// address; the caller should refuse the request and carry on.
    pub fn on_push(
        &self,
        remote: IpAddr,
        sid: Option<&str>,
        payload: String,
    ) -> Result<(), Error> {
        let device = self
            .registry
            .get(Selector::Ip(remote))
            .ok_or(Error::UnknownPeer(remote))?;
        let service = sid
            .and_then(|s| device.service_for_sid(s))
            .map(str::to_string);
        self.registry.observer().device_pushed_state(
            device.clone(),
            service,
            payload,
        );
        Ok(())
    }
}
