//! Session-scoped context: the one object a UI holds for a logged-in session.
//!
//! ```text
//!   ConnectionHandle ──on_any──► EventRouter ──┬──► QueryCache
//!          │                                   ├──► NotificationInbox
//!          │                                   ├──► ToastQueue
//!          │                                   └──► ProgressionTracker
//!          └──on_reconnect──► cache.invalidate_all + inbox reload flag
//! ```
//!
//! Created at login, dropped (or [`shutdown`](SessionContext::shutdown)) at
//! logout. Consumers get cheap clones of the components and register scoped
//! listeners through [`subscribe`](SessionContext::subscribe).

use std::fmt;
use std::sync::Arc;

use tokio::sync::watch;
use tracing::{info, warn};

use donorlink_core::{
    ConnectionState, Event, InboxApi, ProgressApi, ResourceFetcher, Result, Session,
};

use crate::cache::QueryCache;
use crate::config::RealtimeConfig;
use crate::connection::{ConnectionHandle, ConnectionManager, Subscription};
use crate::gamification::ProgressionTracker;
use crate::inbox::NotificationInbox;
use crate::router::{EffectTargets, EventRouter};
use crate::toast::ToastQueue;
use crate::transport::Connector;

/// External collaborators a session needs.
#[derive(Clone)]
pub struct Collaborators {
    pub connector: Arc<dyn Connector>,
    pub fetcher: Arc<dyn ResourceFetcher>,
    pub inbox_api: Arc<dyn InboxApi>,
    /// Optional profile endpoint used to seed the progression tracker.
    pub progress_api: Option<Arc<dyn ProgressApi>>,
}

impl fmt::Debug for Collaborators {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Collaborators")
            .field("progress_api", &self.progress_api.is_some())
            .finish_non_exhaustive()
    }
}

/// Everything real-time for one session.
pub struct SessionContext {
    config: RealtimeConfig,
    manager: ConnectionManager,
    connection: Option<ConnectionHandle>,
    router: EventRouter,
    targets: EffectTargets,
    progress_api: Option<Arc<dyn ProgressApi>>,
    session: Option<Session>,
}

impl fmt::Debug for SessionContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionContext")
            .field("session", &self.session)
            .field("connection_state", &self.connection_state())
            .field("cache", &self.targets.cache)
            .field("inbox", &self.targets.inbox)
            .finish_non_exhaustive()
    }
}

impl SessionContext {
    /// Build the session's components and open its push channel.
    ///
    /// A missing session or empty token is not an error here: the context
    /// runs without a connection (state stays `Disconnected`) and REST reads
    /// through the cache keep working. Must be called within a tokio runtime.
    pub fn start(session: Option<Session>, config: RealtimeConfig, collaborators: Collaborators) -> Self {
        let targets = EffectTargets {
            cache: QueryCache::new(collaborators.fetcher),
            inbox: NotificationInbox::new(collaborators.inbox_api),
            toasts: ToastQueue::new(config.toast_ttl),
            progress: ProgressionTracker::new(config.celebration_duration),
            toast_ttl: config.toast_ttl,
        };
        let manager = ConnectionManager::new(collaborators.connector, config.reconnect.clone());

        let mut context = Self {
            config,
            manager,
            connection: None,
            router: EventRouter::new(),
            targets,
            progress_api: collaborators.progress_api,
            session: None,
        };
        context.connect(session);
        context
    }

    fn connect(&mut self, session: Option<Session>) {
        // Wiring happens before the connection task starts so the router
        // sees the first event after the handshake.
        let established = self
            .manager
            .establish_with(session.as_ref(), |handle| self.wire(handle));
        self.connection = match established {
            Ok(handle) => Some(handle),
            Err(e) => {
                warn!(error = %e, "Push connection not established");
                None
            }
        };
        self.session = session;
    }

    /// Route every event and reconcile after reconnects.
    fn wire(&self, handle: &ConnectionHandle) {
        let router = self.router;
        let targets = self.targets.clone();
        handle.on_any(move |event| {
            router.dispatch(event, &targets);
        });

        let cache = self.targets.cache.clone();
        let inbox = self.targets.inbox.clone();
        handle.on_reconnect(move || {
            let invalidated = cache.invalidate_all();
            inbox.mark_needs_reload();
            info!(invalidated, "Reconnected, cache and inbox marked for reconciliation");
        });
    }

    pub fn config(&self) -> &RealtimeConfig {
        &self.config
    }

    pub fn session(&self) -> Option<&Session> {
        self.session.as_ref()
    }

    pub fn cache(&self) -> &QueryCache {
        &self.targets.cache
    }

    pub fn inbox(&self) -> &NotificationInbox {
        &self.targets.inbox
    }

    pub fn toasts(&self) -> &ToastQueue {
        &self.targets.toasts
    }

    pub fn progress(&self) -> &ProgressionTracker {
        &self.targets.progress
    }

    pub fn router(&self) -> &EventRouter {
        &self.router
    }

    pub fn connection(&self) -> Option<&ConnectionHandle> {
        self.connection.as_ref()
    }

    pub fn connection_state(&self) -> ConnectionState {
        self.connection
            .as_ref()
            .map(ConnectionHandle::state)
            .unwrap_or_default()
    }

    /// Watch connection state. Without a connection the receiver reports
    /// `Disconnected` forever.
    pub fn state_changes(&self) -> watch::Receiver<ConnectionState> {
        match &self.connection {
            Some(handle) => handle.state_changes(),
            None => watch::channel(ConnectionState::Disconnected).1,
        }
    }

    /// Listen for one event name until the returned guard drops. `None`
    /// when the session has no connection.
    pub fn subscribe<F>(&self, event_name: impl Into<String>, listener: F) -> Option<Subscription>
    where
        F: Fn(&Event) + Send + Sync + 'static,
    {
        self.connection
            .as_ref()
            .map(|handle| handle.subscribe(event_name, listener))
    }

    /// Mark everything stale and reload the inbox.
    pub async fn refresh(&self) -> Result<usize> {
        let invalidated = self.targets.cache.invalidate_all();
        self.targets.inbox.mark_needs_reload();
        let unread = self.targets.inbox.open().await?;
        info!(invalidated, unread, "Session refreshed");
        Ok(unread)
    }

    /// Seed the progression tracker from the profile endpoint, if any.
    pub async fn load_progress(&self) -> Result<bool> {
        let Some(api) = &self.progress_api else {
            return Ok(false);
        };
        let progress = api.fetch_progress().await?;
        self.targets.progress.load(progress);
        Ok(true)
    }

    /// Replace the connection, e.g. after a token refresh or once the old
    /// one gave up reconnecting. Cache, inbox and progression are kept.
    pub async fn reconnect(&mut self, session: Option<Session>) {
        if let Some(mut old) = self.connection.take() {
            old.close().await;
        }
        self.connect(session);
        self.targets.cache.invalidate_all();
        self.targets.inbox.mark_needs_reload();
    }

    /// Close the connection and drop all toasts.
    pub async fn shutdown(&mut self) {
        if let Some(mut connection) = self.connection.take() {
            connection.close().await;
        }
        self.targets.toasts.clear();
        info!("Session context shut down");
    }
}
