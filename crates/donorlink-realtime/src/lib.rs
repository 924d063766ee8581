//! # donorlink-realtime
//!
//! Real-time coordinator for the DonorLink client.
//!
//! One [`SessionContext`] per logged-in session owns:
//!
//! - a [`ConnectionHandle`] to the push channel (authenticated handshake,
//!   room joins, bounded exponential reconnection),
//! - an [`EventRouter`] that maps each inbound event to cache invalidations,
//!   toasts, inbox appends and gamification updates through one static table,
//! - a [`QueryCache`] whose invalidations collapse into a single refetch per key,
//! - a [`NotificationInbox`] with optimistic read tracking,
//! - a [`ToastQueue`] and a [`ProgressionTracker`].
//!
//! Transport and REST collaborators are traits; [`mock`] has deterministic
//! doubles for tests.

pub mod backoff;
pub mod cache;
pub mod config;
pub mod connection;
pub mod context;
pub mod gamification;
pub mod inbox;
pub mod logging;
pub mod mock;
pub mod rest;
pub mod router;
pub mod toast;
pub mod transport;

pub use backoff::ReconnectPolicy;
pub use cache::{CacheSnapshot, CacheStats, QueryCache};
pub use config::{LogConfig, LogFormat, RealtimeConfig};
pub use connection::{ConnectionHandle, ConnectionManager, ListenerId, Subscription};
pub use context::{Collaborators, SessionContext};
pub use gamification::{Celebration, ProgressionTracker};
pub use inbox::NotificationInbox;
pub use logging::init_tracing;
pub use rest::HttpApi;
pub use router::{Action, Effect, EffectTargets, EventRouter, Route, ROUTES};
pub use toast::ToastQueue;
pub use transport::{Connector, Handshake, Link, WsConnector};
