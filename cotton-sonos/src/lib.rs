//! A control point for Sonos players on the local network
//!
//! The cotton-sonos crate finds Sonos ZonePlayers using SSDP, the
//! Simple Service Discovery Protocol, keeps a live registry of them,
//! and subscribes to their UPnP (GENA) events, so that the
//! application hears about changes in what is playing, and at what
//! volume, without polling.
//!
//! Discovery runs in bursts: a few M-SEARCH datagrams at start-up
//! and every few seconds for a short while after. Thereafter the
//! registry is kept current by the players' own NOTIFY
//! advertisements, and by a periodic sweep which re-validates any
//! record that has not been refreshed recently. Each player's
//! description document is fetched over HTTP to learn its room name
//! and the services it offers events for.
//!
//! The crate provides two interfaces. [`Engine`] is the protocol
//! state machine on its own, with no sockets or timers, driven by
//! its owner through [`Engine::on_data`], [`Engine::next_wakeup`]
//! and [`Engine::wakeup`]. [`AsyncService`] wraps an `Engine`
//! together with tokio sockets, an event listener and an HTTP
//! client, and delivers [`Event`]s as a stream. Most applications
//! will want `AsyncService`.
//!
//! Device records are serde-serializable, so the registry can be
//! saved on exit and handed back at the next start.

#![warn(missing_docs)]
#![warn(rustdoc::missing_crate_level_docs)]

mod async_service;
mod config;
mod device;
mod engine;
mod error;
mod event;
mod registry;

/// Parsing and building HTTP-style header blocks
pub mod headers;

/// SSDP messages: parsing responses and notifications, building searches
pub mod message;

pub mod description;

pub mod gena;

/// Subscribing whole devices to their event services
pub mod subscription;

pub mod listener;

/// Low-level UDP transport for SSDP
pub mod udp;

pub use async_service::AsyncService;
pub use config::{DiscoveryOptions, Options, SubscribeOptions, ZONE_PLAYER};
pub use description::Fetcher;
pub use device::{Device, Subscription};
pub use engine::{Callback, Engine, FetchRequest, State};
pub use error::Error;
pub use event::Event;
pub use message::{Advertisement, DiscoveryResponse, Message, Notification};
pub use registry::{Observer, Registry, Selector};
pub use subscription::SubscriptionManager;
