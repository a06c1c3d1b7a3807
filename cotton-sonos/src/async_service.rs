use crate::config::Options;
use crate::description::Fetcher;
use crate::device::Device;
use crate::engine::{Callback, Engine, FetchRequest};
use crate::error::Error;
use crate::event::Event;
use crate::listener::{self, PushRequest};
use crate::registry::Observer;
use crate::subscription::SubscriptionManager;
use crate::udp::tokio::{TokioTransport, MAX_PACKET_SIZE};
use futures_util::future::join_all;
use std::net::SocketAddr;
use std::time::{Duration, SystemTime};
use tokio::net::TcpListener;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_stream::wrappers::UnboundedReceiverStream;
use tokio_stream::Stream;
use tracing::{debug, info, warn};

enum Job {
    Fetch(FetchRequest),
    Register(Device),
    Unregister(Device),
}

enum Outcome {
    Described(FetchRequest, Result<Device, Error>),
    Subscribed(Device, String, Result<String, Error>),
}

enum Command {
    Devices(oneshot::Sender<Vec<Device>>),
    Stop(oneshot::Sender<Vec<Device>>),
}

struct AsyncCallback {
    jobs: mpsc::UnboundedSender<Job>,
    events: mpsc::UnboundedSender<Event>,
}

impl Observer for AsyncCallback {
    fn registry_changed(&self, devices: Vec<Device>) {
        let _ = self.events.send(Event::RegistryChanged(devices));
    }

    fn unregister(&self, device: &Device) {
        if device.has_active_subscription() {
            let _ = self.jobs.send(Job::Unregister(device.clone()));
        }
    }
}

impl Callback for AsyncCallback {
    fn fetch_description(&self, request: FetchRequest) {
        let _ = self.jobs.send(Job::Fetch(request));
    }

    fn register(&self, device: &Device) {
        let _ = self.jobs.send(Job::Register(device.clone()));
    }

    fn device_pushed_state(
        &self,
        device: Device,
        service: Option<String>,
        payload: String,
    ) {
        let _ = self.events.send(Event::DevicePushedState {
            device,
            service,
            payload,
        });
    }
}

async fn sleep_for(delay: Option<Duration>) {
    match delay {
        Some(d) => tokio::time::sleep(d).await,
        None => std::future::pending().await,
    }
}

struct Worker {
    engine: Engine<AsyncCallback>,
    transport: TokioTransport,
    fetcher: Fetcher,
    manager: SubscriptionManager,
    jobs: mpsc::UnboundedReceiver<Job>,
    outcome_tx: mpsc::UnboundedSender<Outcome>,
    outcomes: mpsc::UnboundedReceiver<Outcome>,
    pushes: mpsc::UnboundedReceiver<PushRequest>,
    commands: mpsc::UnboundedReceiver<Command>,
}

impl Worker {
    fn spawn_job(&self, job: Job) {
        let tx = self.outcome_tx.clone();
        match job {
            Job::Fetch(request) => {
                let fetcher = self.fetcher.clone();
                tokio::spawn(async move {
                    let result = fetcher.fetch(&request.url).await;
                    let _ = tx.send(Outcome::Described(request, result));
                });
            }
            Job::Register(device) => {
                let manager = self.manager.clone();
                tokio::spawn(async move {
                    for (path, result) in manager.register(&device).await {
                        let _ = tx.send(Outcome::Subscribed(
                            device.clone(),
                            path,
                            result,
                        ));
                    }
                });
            }
            Job::Unregister(device) => {
                let manager = self.manager.clone();
                tokio::spawn(async move {
                    manager.unregister(&device).await;
                });
            }
        }
    }

    fn on_outcome(&mut self, outcome: Outcome) {
        match outcome {
            Outcome::Described(request, result) => {
                self.engine.on_description(&request, result);
            }
            Outcome::Subscribed(device, path, result) => {
                self.engine.on_subscribed(&device, &path, result);
            }
        }
    }

    fn on_push(&self, push: PushRequest) {
        let known = match self.engine.on_push(
            push.remote,
            push.sid.as_deref(),
            push.body,
        ) {
            Ok(()) => true,
            Err(e) => {
                warn!(error = %e, sid = ?push.sid, "event refused");
                false
            }
        };
        let _ = push.reply.send(known);
    }

    /// Stop the engine, then carry out the unsubscribes still queued
    ///
    /// Subscriptions which completed but were not yet processed are
    /// handed to the stopped engine first, so that they too are
    /// released.
    async fn finish(&mut self) -> Vec<Device> {
        self.engine.stop(&mut self.transport);
        while let Ok(outcome) = self.outcomes.try_recv() {
            self.on_outcome(outcome);
        }
        let mut releases = Vec::new();
        while let Ok(job) = self.jobs.try_recv() {
            if let Job::Unregister(device) = job {
                releases.push(device);
            }
        }
        debug!(devices = releases.len(), "releasing subscriptions");
        let manager = &self.manager;
        join_all(releases.iter().map(|d| manager.unregister(d))).await;
        self.engine.devices()
    }

    /// Returns the final device list once told to stop
    async fn run(mut self) -> Vec<Device> {
        let mut multicast_buf = [0u8; MAX_PACKET_SIZE];
        let mut search_buf = [0u8; MAX_PACKET_SIZE];
        loop {
            let delay = self.engine.next_wakeup(SystemTime::now());
            tokio::select! {
                command = self.commands.recv() => match command {
                    Some(Command::Devices(reply)) => {
                        let _ = reply.send(self.engine.devices());
                    }
                    Some(Command::Stop(reply)) => {
                        let devices = self.finish().await;
                        let _ = reply.send(devices.clone());
                        return devices;
                    }
                    None => return self.finish().await,
                },
                r = self.transport.recv_multicast(&mut multicast_buf) => {
                    match r {
                        Ok((n, from)) => {
                            self.engine.on_data(&multicast_buf[..n], from);
                        }
                        Err(e) => warn!(error = %e, "multicast receive"),
                    }
                },
                r = self.transport.recv_search(&mut search_buf) => {
                    match r {
                        Ok((n, from)) => {
                            self.engine.on_data(&search_buf[..n], from);
                        }
                        Err(e) => debug!(error = %e, "search receive"),
                    }
                },
                Some(job) = self.jobs.recv() => self.spawn_job(job),
                Some(outcome) = self.outcomes.recv() => self.on_outcome(outcome),
                Some(push) = self.pushes.recv() => self.on_push(push),
                () = sleep_for(delay) => {
                    self.engine.wakeup(SystemTime::now(), &mut self.transport);
                },
            }
        }
    }
}

/** High-level asynchronous Sonos discovery and eventing using tokio.
 *
 * Runs the [`Engine`] on a background task, together with the SSDP
 * sockets, the event listener, and the HTTP and GENA requests the
 * engine asks for. The application sees only the [`Event`] stream.
 */
pub struct AsyncService {
    commands: mpsc::UnboundedSender<Command>,
    listen_addr: SocketAddr,
    task: JoinHandle<Vec<Device>>,
}

impl AsyncService {
    /// Start discovery, listening on the standard SSDP port
    ///
    /// `snapshot` is a previously-saved device list, perhaps from
    /// [`AsyncService::stop`]; pass an empty one on first run. The
    /// first event on the returned stream is always a
    /// [`Event::RegistryChanged`] carrying the snapshot.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidOptions`] for bad options, or passes on
    /// failures to bind the event listener or join the SSDP group.
    pub async fn start(
        options: Options,
        snapshot: Vec<Device>,
    ) -> Result<(Self, impl Stream<Item = Event>), Error> {
        let transport =
            TokioTransport::new(options.discovery.multicast_interface);
        Self::start_with_transport(options, snapshot, transport).await
    }

    /// Start discovery using a particular transport
    ///
    /// As [`AsyncService::start`]; useful for listening on a
    /// non-standard port.
    ///
    /// # Errors
    ///
    /// As [`AsyncService::start`].
    pub async fn start_with_transport(
        options: Options,
        snapshot: Vec<Device>,
        mut transport: TokioTransport,
    ) -> Result<(Self, impl Stream<Item = Event>), Error> {
        options.validate()?;
        let listener = TcpListener::bind(options.subscribe.listen).await?;
        let listen_addr = listener.local_addr()?;
        let fetcher = Fetcher::new(options.discovery.fetch_timeout)?;
        let manager =
            SubscriptionManager::new(options.subscribe.clone(), listen_addr.port())?;

        let (job_tx, jobs) = mpsc::unbounded_channel();
        let (event_tx, events) = mpsc::unbounded_channel();
        let (outcome_tx, outcomes) = mpsc::unbounded_channel();
        let (push_tx, pushes) = mpsc::unbounded_channel();
        let (command_tx, commands) = mpsc::unbounded_channel();

        let mut engine = Engine::new(
            options.discovery.clone(),
            AsyncCallback {
                jobs: job_tx,
                events: event_tx,
            },
        );
        engine.start(snapshot, SystemTime::now(), &mut transport)?;

        let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();
        let path = options.subscribe.callback_path.clone();
        tokio::spawn(async move {
            let shutdown = async move {
                let _ = shutdown_rx.await;
            };
            if let Err(e) =
                listener::serve(listener, &path, push_tx, shutdown).await
            {
                warn!(error = %e, "event listener failed");
            }
        });
        info!(listen = %listen_addr, "event listener up");

        let worker = Worker {
            engine,
            transport,
            fetcher,
            manager,
            jobs,
            outcome_tx,
            outcomes,
            pushes,
            commands,
        };
        let task = tokio::spawn(async move {
            let devices = worker.run().await;
            let _ = shutdown_tx.send(());
            devices
        });

        Ok((
            Self {
                commands: command_tx,
                listen_addr,
                task,
            },
            UnboundedReceiverStream::new(events),
        ))
    }

    /// Where the event listener is bound
    #[must_use]
    pub fn listen_addr(&self) -> SocketAddr {
        self.listen_addr
    }

    /// A copy of every currently-known device
    pub async fn devices(&self) -> Vec<Device> {
        let (reply, rx) = oneshot::channel();
        if self.commands.send(Command::Devices(reply)).is_err() {
            return Vec::new();
        }
        rx.await.unwrap_or_default()
    }

    /// Stop discovery and hand back the device list, for saving
    ///
    /// Unsubscribes already asked for are carried out before this
    /// returns. Fetches and subscriptions still in flight are
    /// abandoned; the event stream ends.
    pub async fn stop(self) -> Vec<Device> {
        let (reply, rx) = oneshot::channel();
        if self.commands.send(Command::Stop(reply)).is_ok() {
            if let Ok(devices) = rx.await {
                return devices;
            }
        }
        self.task.await.unwrap_or_default()
    }
}
