//! Deterministic collaborators for testing.
//!
//! Every mock is a cheap-clone handle: keep one clone in the test to script
//! behaviour and inspect calls, hand another to the code under test.
//!
//! ## Usage
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use donorlink_core::{names, Identity, Role, Session};
//! use donorlink_realtime::{ConnectionManager, ReconnectPolicy};
//! use donorlink_realtime::mock::MockConnector;
//! use serde_json::json;
//!
//! # async fn demo() {
//! let connector = MockConnector::new();
//! let manager = ConnectionManager::new(Arc::new(connector.clone()), ReconnectPolicy::default());
//! let session = Session::new(Identity::new("u1", Role::Donor), "token");
//! let handle = manager.establish(Some(&session)).unwrap();
//!
//! connector.push(names::DONATION_CREATED, json!({"donationId": "d-1"}));
//! # drop(handle);
//! # }
//! ```

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;
use serde_json::{json, Value as JsonValue};
use tokio::sync::{mpsc, watch};
use tokio_stream::wrappers::UnboundedReceiverStream;

use donorlink_core::{
    defaults, CacheKey, Command, Error, Event, GamificationState, InboxApi, Notification,
    ProgressApi, ResourceFetcher, Result,
};

use crate::transport::{Connector, Handshake, Link};

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

// =============================================================================
// CONNECTOR
// =============================================================================

#[derive(Default)]
struct ConnectScript {
    refuse_next: VecDeque<String>,
    refuse_always: bool,
}

struct ConnectorState {
    script: Mutex<ConnectScript>,
    attempts: AtomicUsize,
    connections: AtomicUsize,
    handshakes: Mutex<Vec<Handshake>>,
    sent: Mutex<Vec<Command>>,
    sent_count: watch::Sender<usize>,
    server: Mutex<Option<mpsc::UnboundedSender<Result<Event>>>>,
}

/// In-memory push channel. Accepts every connection unless scripted
/// otherwise; the test plays the server through [`push`](Self::push).
#[derive(Clone)]
pub struct MockConnector {
    state: Arc<ConnectorState>,
}

impl Default for MockConnector {
    fn default() -> Self {
        Self::new()
    }
}

impl MockConnector {
    pub fn new() -> Self {
        let (sent_count, _) = watch::channel(0);
        Self {
            state: Arc::new(ConnectorState {
                script: Mutex::new(ConnectScript::default()),
                attempts: AtomicUsize::new(0),
                connections: AtomicUsize::new(0),
                handshakes: Mutex::new(Vec::new()),
                sent: Mutex::new(Vec::new()),
                sent_count,
                server: Mutex::new(None),
            }),
        }
    }

    /// Refuse the next `n` connection attempts.
    pub fn refuse_next(self, n: usize) -> Self {
        lock(&self.state.script)
            .refuse_next
            .extend((0..n).map(|i| format!("mock: connection refused ({})", i + 1)));
        self
    }

    /// Refuse every connection attempt.
    pub fn refuse_always(self) -> Self {
        lock(&self.state.script).refuse_always = true;
        self
    }

    /// Accept connections again.
    pub fn accept(&self) {
        let mut script = lock(&self.state.script);
        script.refuse_always = false;
        script.refuse_next.clear();
    }

    pub fn connect_attempts(&self) -> usize {
        self.state.attempts.load(Ordering::SeqCst)
    }

    /// Successful connections so far.
    pub fn connections(&self) -> usize {
        self.state.connections.load(Ordering::SeqCst)
    }

    pub fn handshakes(&self) -> Vec<Handshake> {
        lock(&self.state.handshakes).clone()
    }

    /// Commands the client sent, across all connections.
    pub fn sent_commands(&self) -> Vec<Command> {
        lock(&self.state.sent).clone()
    }

    /// Wait until at least `count` commands have been sent.
    pub async fn wait_for_commands(&self, count: usize) {
        let mut rx = self.state.sent_count.subscribe();
        let _ = rx.wait_for(|sent| *sent >= count).await;
    }

    /// Push an event to the live connection. Returns `false` when no
    /// connection is listening.
    pub fn push(&self, name: &str, payload: JsonValue) -> bool {
        self.push_event(Event::new(name, payload))
    }

    pub fn push_event(&self, event: Event) -> bool {
        match lock(&self.state.server).as_ref() {
            Some(tx) => tx.send(Ok(event)).is_ok(),
            None => false,
        }
    }

    /// Close the live connection from the server side.
    pub fn drop_connection(&self) {
        lock(&self.state.server).take();
    }

    /// Fail the live connection with a transport error.
    pub fn fail_stream(&self, reason: &str) {
        if let Some(tx) = lock(&self.state.server).take() {
            let _ = tx.send(Err(Error::Transport(reason.to_string())));
        }
    }
}

#[async_trait]
impl Connector for MockConnector {
    async fn connect(&self, handshake: &Handshake) -> Result<Link> {
        self.state.attempts.fetch_add(1, Ordering::SeqCst);
        lock(&self.state.handshakes).push(handshake.clone());

        let refusal = {
            let mut script = lock(&self.state.script);
            if script.refuse_always {
                Some("mock: connection refused".to_string())
            } else {
                script.refuse_next.pop_front()
            }
        };
        if let Some(reason) = refusal {
            return Err(Error::Connection(reason));
        }

        let (outbound, mut commands) = mpsc::channel::<Command>(defaults::OUTBOUND_BUFFER);
        let state = Arc::clone(&self.state);
        tokio::spawn(async move {
            while let Some(command) = commands.recv().await {
                lock(&state.sent).push(command);
                state.sent_count.send_modify(|n| *n += 1);
            }
        });

        let (tx, rx) = mpsc::unbounded_channel();
        *lock(&self.state.server) = Some(tx);
        self.state.connections.fetch_add(1, Ordering::SeqCst);

        Ok(Link {
            outbound,
            inbound: UnboundedReceiverStream::new(rx).boxed(),
        })
    }
}

// =============================================================================
// RESOURCE FETCHER
// =============================================================================

#[derive(Default)]
struct FetcherState {
    latency: Duration,
    responses: HashMap<CacheKey, JsonValue>,
    failing: HashSet<CacheKey>,
    calls: HashMap<CacheKey, usize>,
}

/// Resource fetcher counting calls per key.
///
/// Unless a response is configured, returns `{"key": "<key>", "version": n}`
/// where `n` is the call number for that key.
#[derive(Clone, Default)]
pub struct MockFetcher {
    state: Arc<Mutex<FetcherState>>,
}

impl MockFetcher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Simulated fetch latency (use with paused tokio time).
    pub fn with_latency(self, latency: Duration) -> Self {
        lock(&self.state).latency = latency;
        self
    }

    pub fn with_response(self, key: CacheKey, value: JsonValue) -> Self {
        lock(&self.state).responses.insert(key, value);
        self
    }

    /// Make fetches for `key` fail (or succeed again).
    pub fn set_failing(&self, key: &CacheKey, failing: bool) {
        let mut state = lock(&self.state);
        if failing {
            state.failing.insert(key.clone());
        } else {
            state.failing.remove(key);
        }
    }

    pub fn calls(&self, key: &CacheKey) -> usize {
        lock(&self.state).calls.get(key).copied().unwrap_or(0)
    }

    pub fn total_calls(&self) -> usize {
        lock(&self.state).calls.values().sum()
    }
}

#[async_trait]
impl ResourceFetcher for MockFetcher {
    async fn fetch(&self, key: &CacheKey) -> Result<JsonValue> {
        let (latency, version) = {
            let mut state = lock(&self.state);
            let version = {
                let calls = state.calls.entry(key.clone()).or_insert(0);
                *calls += 1;
                *calls
            };
            (state.latency, version)
        };

        if !latency.is_zero() {
            tokio::time::sleep(latency).await;
        }

        let state = lock(&self.state);
        if state.failing.contains(key) {
            return Err(Error::Fetch(format!("mock: {key} unavailable")));
        }
        Ok(state
            .responses
            .get(key)
            .cloned()
            .unwrap_or_else(|| json!({"key": key.to_string(), "version": version})))
    }
}

// =============================================================================
// INBOX API
// =============================================================================

/// A recorded inbox API call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InboxCall {
    FetchInbox,
    MarkRead(String),
    MarkAllRead,
}

#[derive(Default)]
struct InboxApiState {
    notifications: Vec<Notification>,
    fail_fetch: bool,
    fail_confirmations: bool,
    calls: Vec<InboxCall>,
}

/// Inbox endpoints backed by an in-memory list.
///
/// Confirmations mark the stored copy read, so a later `fetch_inbox`
/// reflects what the server would have persisted.
#[derive(Clone, Default)]
pub struct MockInboxApi {
    state: Arc<Mutex<InboxApiState>>,
}

impl MockInboxApi {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_notifications(self, notifications: Vec<Notification>) -> Self {
        lock(&self.state).notifications = notifications;
        self
    }

    /// Replace the server-side list.
    pub fn set_notifications(&self, notifications: Vec<Notification>) {
        lock(&self.state).notifications = notifications;
    }

    pub fn set_fail_fetch(&self, fail: bool) {
        lock(&self.state).fail_fetch = fail;
    }

    /// Make `mark_read`/`mark_all_read` fail without persisting anything.
    pub fn set_fail_confirmations(&self, fail: bool) {
        lock(&self.state).fail_confirmations = fail;
    }

    pub fn calls(&self) -> Vec<InboxCall> {
        lock(&self.state).calls.clone()
    }
}

#[async_trait]
impl InboxApi for MockInboxApi {
    async fn fetch_inbox(&self) -> Result<Vec<Notification>> {
        let mut state = lock(&self.state);
        state.calls.push(InboxCall::FetchInbox);
        if state.fail_fetch {
            return Err(Error::Request("mock: inbox unavailable".into()));
        }
        Ok(state.notifications.clone())
    }

    async fn mark_read(&self, id: &str) -> Result<()> {
        let mut state = lock(&self.state);
        state.calls.push(InboxCall::MarkRead(id.to_string()));
        if state.fail_confirmations {
            return Err(Error::Request(format!("mock: mark {id} read failed")));
        }
        if let Some(n) = state.notifications.iter_mut().find(|n| n.id == id) {
            n.is_read = true;
        }
        Ok(())
    }

    async fn mark_all_read(&self) -> Result<()> {
        let mut state = lock(&self.state);
        state.calls.push(InboxCall::MarkAllRead);
        if state.fail_confirmations {
            return Err(Error::Request("mock: mark all read failed".into()));
        }
        for n in state.notifications.iter_mut() {
            n.is_read = true;
        }
        Ok(())
    }
}

// =============================================================================
// PROGRESS API
// =============================================================================

/// Gamification profile endpoint returning a fixed state.
#[derive(Clone, Default)]
pub struct MockProgressApi {
    state: Arc<Mutex<(GamificationState, bool)>>,
    calls: Arc<AtomicUsize>,
}

impl MockProgressApi {
    pub fn new(progress: GamificationState) -> Self {
        Self {
            state: Arc::new(Mutex::new((progress, false))),
            calls: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn set_failing(&self, failing: bool) {
        lock(&self.state).1 = failing;
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ProgressApi for MockProgressApi {
    async fn fetch_progress(&self) -> Result<GamificationState> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let state = lock(&self.state);
        if state.1 {
            return Err(Error::Request("mock: progress unavailable".into()));
        }
        Ok(state.0.clone())
    }
}
