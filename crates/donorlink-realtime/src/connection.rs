//! Connection manager: one authenticated push channel per session.
//!
//! ```text
//!                  establish(session)
//!                         │ no token ──► Err(Unauthorized), no attempt
//!                         ▼
//!   Disconnected ──► Connecting ──ok──► Connected ──drop──► Reconnecting
//!        ▲                │                 ▲                   │
//!        │              fail                └──────ok───────────┤
//!        │                ▼                                     │
//!        └── attempts exhausted / close() ◄── Reconnecting ◄────┘
//! ```
//!
//! After every successful connect the manager re-sends the room joins and,
//! when the channel had been up before, runs the reconnect hooks so callers
//! can reconcile state they may have missed.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

use futures::StreamExt;
use serde_json::Value as JsonValue;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, trace, warn};

use donorlink_core::{Command, ConnectionState, Error, Event, Result, Session};

use crate::backoff::ReconnectPolicy;
use crate::transport::{Connector, Handshake, Link};

/// Callback invoked for inbound events.
pub type Listener = Arc<dyn Fn(&Event) + Send + Sync>;

/// Callback invoked after the channel comes back up.
pub type ReconnectHook = Arc<dyn Fn() + Send + Sync>;

/// Token returned by listener registration; pass it to `off`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ListenerId(u64);

impl fmt::Display for ListenerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "listener-{}", self.0)
    }
}

enum Target {
    Named(String),
    Any,
    Reconnect,
}

enum Callback {
    Event(Listener),
    Reconnect(ReconnectHook),
}

struct Entry {
    id: ListenerId,
    target: Target,
    callback: Callback,
    active: AtomicBool,
}

impl Entry {
    fn deactivate(&self) {
        self.active.store(false, Ordering::SeqCst);
    }

    fn is_active(&self) -> bool {
        self.active.load(Ordering::SeqCst)
    }
}

#[derive(Default)]
struct Registry {
    next_id: u64,
    entries: Vec<Arc<Entry>>,
    closed: bool,
}

struct Shared {
    registry: Mutex<Registry>,
    state: watch::Sender<ConnectionState>,
    outbound: Mutex<Option<mpsc::Sender<Command>>>,
}

impl Shared {
    fn new() -> Self {
        let (state, _) = watch::channel(ConnectionState::Disconnected);
        Self {
            registry: Mutex::new(Registry::default()),
            state,
            outbound: Mutex::new(None),
        }
    }

    fn registry(&self) -> MutexGuard<'_, Registry> {
        self.registry.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn outbound(&self) -> MutexGuard<'_, Option<mpsc::Sender<Command>>> {
        self.outbound.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn register(&self, target: Target, callback: Callback) -> ListenerId {
        let mut registry = self.registry();
        registry.next_id += 1;
        let id = ListenerId(registry.next_id);
        if registry.closed {
            debug!(listener = %id, "Connection closed, listener not registered");
            return id;
        }
        registry.entries.push(Arc::new(Entry {
            id,
            target,
            callback,
            active: AtomicBool::new(true),
        }));
        id
    }

    fn remove(&self, id: ListenerId) -> bool {
        let mut registry = self.registry();
        match registry.entries.iter().position(|e| e.id == id) {
            Some(index) => {
                let entry = registry.entries.remove(index);
                entry.deactivate();
                true
            }
            None => false,
        }
    }

    fn close_registry(&self) {
        let mut registry = self.registry();
        registry.closed = true;
        for entry in registry.entries.drain(..) {
            entry.deactivate();
        }
    }

    fn set_state(&self, state: ConnectionState) {
        let previous = self.state.send_replace(state);
        if previous != state {
            debug!(from = %previous, to = %state, "Connection state changed");
        }
    }

    /// Deliver an event to matching listeners in registration order.
    ///
    /// Callbacks run outside the registry lock so they may register or
    /// deregister listeners themselves.
    fn dispatch(&self, event: &Event) -> usize {
        if !event.is_known() {
            trace!(event_name = %event.name, "Unknown event name, only wildcard listeners apply");
        }
        let matching: Vec<Arc<Entry>> = {
            let registry = self.registry();
            if registry.closed {
                return 0;
            }
            registry
                .entries
                .iter()
                .filter(|e| match &e.target {
                    Target::Named(name) => name == &event.name,
                    Target::Any => true,
                    Target::Reconnect => false,
                })
                .cloned()
                .collect()
        };

        let mut delivered = 0;
        for entry in matching {
            if !entry.is_active() {
                continue;
            }
            if let Callback::Event(listener) = &entry.callback {
                listener(event);
                delivered += 1;
            }
        }
        trace!(event_name = %event.name, delivered, "Event dispatched");
        delivered
    }

    fn run_reconnect_hooks(&self) {
        let hooks: Vec<Arc<Entry>> = self
            .registry()
            .entries
            .iter()
            .filter(|e| matches!(e.target, Target::Reconnect))
            .cloned()
            .collect();
        for entry in hooks {
            if !entry.is_active() {
                continue;
            }
            if let Callback::Reconnect(hook) = &entry.callback {
                hook();
            }
        }
    }

    fn listener_count(&self) -> usize {
        self.registry()
            .entries
            .iter()
            .filter(|e| !matches!(e.target, Target::Reconnect))
            .count()
    }
}

/// Establishes push channels and keeps them alive.
#[derive(Clone)]
pub struct ConnectionManager {
    connector: Arc<dyn Connector>,
    policy: ReconnectPolicy,
}

impl fmt::Debug for ConnectionManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionManager")
            .field("policy", &self.policy)
            .finish_non_exhaustive()
    }
}

impl ConnectionManager {
    pub fn new(connector: Arc<dyn Connector>, policy: ReconnectPolicy) -> Self {
        Self { connector, policy }
    }

    pub fn policy(&self) -> &ReconnectPolicy {
        &self.policy
    }

    /// Open the session's push channel.
    ///
    /// Without a session, or with an empty token, no connection is attempted
    /// and `Error::Unauthorized` is returned. Otherwise a background task
    /// connects, joins the personal room (and the organization room when the
    /// role qualifies) and then delivers inbound events to listeners in
    /// arrival order. Must be called within a tokio runtime.
    pub fn establish(&self, session: Option<&Session>) -> Result<ConnectionHandle> {
        self.establish_with(session, |_| {})
    }

    /// Like [`establish`](Self::establish), but runs `register` on the handle
    /// before the background task starts, so listeners it adds see the
    /// first event after the handshake.
    pub fn establish_with<F>(&self, session: Option<&Session>, register: F) -> Result<ConnectionHandle>
    where
        F: FnOnce(&ConnectionHandle),
    {
        let session = session.ok_or_else(|| Error::Unauthorized("no active session".into()))?;
        if !session.has_credentials() {
            return Err(Error::Unauthorized(format!(
                "empty auth token for identity {}",
                session.identity.id
            )));
        }

        let mut joins = vec![Command::join_personal(session.identity.id.clone())];
        if let Some(org_id) = session.identity.organization_room() {
            joins.push(Command::join_organization(org_id));
        }

        let shared = Arc::new(Shared::new());
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        info!(
            identity_id = %session.identity.id,
            role = %session.identity.role,
            rooms = joins.len(),
            "Establishing push connection"
        );

        let mut handle = ConnectionHandle {
            shared: Arc::clone(&shared),
            shutdown: shutdown_tx,
            task: None,
        };
        register(&handle);

        handle.task = Some(tokio::spawn(run(
            shared,
            Arc::clone(&self.connector),
            self.policy.clone(),
            Handshake::from_session(session),
            joins,
            shutdown_rx,
        )));
        Ok(handle)
    }
}

/// Resolves once shutdown is requested or the handle is gone.
async fn shutdown_requested(rx: &mut watch::Receiver<bool>) {
    let _ = rx.wait_for(|stop| *stop).await;
}

async fn run(
    shared: Arc<Shared>,
    connector: Arc<dyn Connector>,
    policy: ReconnectPolicy,
    handshake: Handshake,
    joins: Vec<Command>,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut attempt: u32 = 0;
    let mut was_connected = false;

    loop {
        shared.set_state(if attempt == 0 && !was_connected {
            ConnectionState::Connecting
        } else {
            ConnectionState::Reconnecting
        });

        let result = tokio::select! {
            biased;
            _ = shutdown_requested(&mut shutdown) => break,
            result = connector.connect(&handshake) => result,
        };

        match result {
            Ok(link) => {
                attempt = 0;
                let stopped = serve(&shared, link, &joins, was_connected, &mut shutdown).await;
                was_connected = true;
                if stopped {
                    break;
                }
            }
            Err(e) => {
                warn!(attempt, error = %e, "Push connection attempt failed");
            }
        }

        attempt += 1;
        if !policy.can_retry(attempt) {
            error!(
                attempts = policy.max_attempts,
                identity_id = %handshake.identity_id,
                "Reconnection attempts exhausted, giving up"
            );
            break;
        }

        shared.set_state(ConnectionState::Reconnecting);
        let delay = policy.delay_for(attempt);
        debug!(attempt, delay_ms = delay.as_millis() as u64, "Scheduling reconnection");
        tokio::select! {
            biased;
            _ = shutdown_requested(&mut shutdown) => break,
            _ = tokio::time::sleep(delay) => {}
        }
    }

    shared.outbound().take();
    shared.set_state(ConnectionState::Disconnected);
    info!(identity_id = %handshake.identity_id, "Push connection stopped");
}

/// Drive one established link. Returns `true` when stopped by shutdown.
async fn serve(
    shared: &Shared,
    link: Link,
    joins: &[Command],
    was_connected: bool,
    shutdown: &mut watch::Receiver<bool>,
) -> bool {
    let Link {
        outbound,
        mut inbound,
    } = link;

    for join in joins {
        if let Err(e) = outbound.try_send(join.clone()) {
            warn!(command = %join.name, error = %e, "Failed to queue room join");
        }
    }
    *shared.outbound() = Some(outbound);
    shared.set_state(ConnectionState::Connected);
    info!(rooms = joins.len(), reconnected = was_connected, "Push connection established");

    if was_connected {
        shared.run_reconnect_hooks();
    }

    let stopped = loop {
        tokio::select! {
            biased;
            _ = shutdown_requested(shutdown) => break true,
            next = inbound.next() => match next {
                Some(Ok(event)) => {
                    shared.dispatch(&event);
                }
                Some(Err(e)) => {
                    warn!(error = %e, "Push channel failed");
                    break false;
                }
                None => {
                    warn!("Push channel closed by server");
                    break false;
                }
            },
        }
    };

    shared.outbound().take();
    stopped
}

/// Handle to a live (or retrying) push channel.
///
/// Dropping the handle stops the background task; prefer [`close`](Self::close)
/// to wait for it.
pub struct ConnectionHandle {
    shared: Arc<Shared>,
    shutdown: watch::Sender<bool>,
    task: Option<JoinHandle<()>>,
}

impl fmt::Debug for ConnectionHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionHandle")
            .field("state", &self.state())
            .field("listeners", &self.listener_count())
            .finish_non_exhaustive()
    }
}

impl ConnectionHandle {
    /// Register a listener for one event name.
    pub fn on<F>(&self, event_name: impl Into<String>, listener: F) -> ListenerId
    where
        F: Fn(&Event) + Send + Sync + 'static,
    {
        self.shared.register(
            Target::Named(event_name.into()),
            Callback::Event(Arc::new(listener)),
        )
    }

    /// Register a listener for every inbound event.
    pub fn on_any<F>(&self, listener: F) -> ListenerId
    where
        F: Fn(&Event) + Send + Sync + 'static,
    {
        self.shared
            .register(Target::Any, Callback::Event(Arc::new(listener)))
    }

    /// Register a hook run each time the channel comes back after a drop.
    pub fn on_reconnect<F>(&self, hook: F) -> ListenerId
    where
        F: Fn() + Send + Sync + 'static,
    {
        self.shared
            .register(Target::Reconnect, Callback::Reconnect(Arc::new(hook)))
    }

    /// Deregister exactly one listener. Returns whether it was registered.
    pub fn off(&self, id: ListenerId) -> bool {
        self.shared.remove(id)
    }

    /// Register a listener that is removed when the guard drops.
    pub fn subscribe<F>(&self, event_name: impl Into<String>, listener: F) -> Subscription
    where
        F: Fn(&Event) + Send + Sync + 'static,
    {
        let id = self.on(event_name, listener);
        Subscription {
            shared: Arc::downgrade(&self.shared),
            id,
        }
    }

    /// Send a command over the channel.
    pub fn emit(&self, name: impl Into<String>, payload: JsonValue) -> Result<()> {
        let command = Command::new(name, payload);
        let guard = self.shared.outbound();
        let sender = match guard.as_ref() {
            Some(sender) if self.state().is_connected() => sender,
            _ => return Err(Error::NotConnected(command.name)),
        };
        sender
            .try_send(command)
            .map_err(|e| Error::Transport(e.to_string()))
    }

    pub fn state(&self) -> ConnectionState {
        *self.shared.state.borrow()
    }

    /// Watch state transitions.
    pub fn state_changes(&self) -> watch::Receiver<ConnectionState> {
        self.shared.state.subscribe()
    }

    /// Event listeners currently registered (reconnect hooks excluded).
    pub fn listener_count(&self) -> usize {
        self.shared.listener_count()
    }

    pub fn is_closed(&self) -> bool {
        self.shared.registry().closed
    }

    /// Deregister every listener, stop reconnecting and wait for the
    /// background task. Idempotent.
    pub async fn close(&mut self) {
        self.shared.close_registry();
        let _ = self.shutdown.send(true);
        if let Some(task) = self.task.take() {
            if let Err(e) = task.await {
                warn!(error = %e, "Connection task ended abnormally");
            }
        }
        self.shared.outbound().take();
        self.shared.set_state(ConnectionState::Disconnected);
    }
}

impl Drop for ConnectionHandle {
    fn drop(&mut self) {
        self.shared.close_registry();
        let _ = self.shutdown.send(true);
        if let Some(task) = self.task.take() {
            task.abort();
            self.shared.outbound().take();
            self.shared.set_state(ConnectionState::Disconnected);
        }
    }
}

/// Listener registration tied to a scope. Dropping it deregisters only this
/// listener.
#[must_use = "the listener is removed when the subscription is dropped"]
pub struct Subscription {
    shared: Weak<Shared>,
    id: ListenerId,
}

impl Subscription {
    pub fn id(&self) -> ListenerId {
        self.id
    }
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription").field("id", &self.id).finish()
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(shared) = self.shared.upgrade() {
            shared.remove(self.id);
        }
    }
}
