//! Notification inbox: ordered list with an unread counter.
//!
//! Read-state changes are applied locally first and confirmed over REST
//! afterwards. A failed confirmation keeps the local change, raises a soft
//! `sync_warning` and flags the inbox so the next [`NotificationInbox::open`]
//! reconciles against the server.

use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tokio::sync::watch;
use tracing::{debug, info, warn};

use donorlink_core::{Error, InboxApi, Notification, Result};

#[derive(Default)]
struct InboxState {
    /// Most recent first.
    items: Vec<Notification>,
    unread: usize,
    needs_reload: bool,
    sync_warning: Option<String>,
}

impl InboxState {
    fn recount(&mut self) {
        self.unread = self.items.iter().filter(|n| !n.is_read).count();
    }
}

struct InboxInner {
    api: Arc<dyn InboxApi>,
    state: Mutex<InboxState>,
    revision: watch::Sender<u64>,
}

/// Session-scoped notification inbox. Cheap to clone.
#[derive(Clone)]
pub struct NotificationInbox {
    inner: Arc<InboxInner>,
}

impl fmt::Debug for NotificationInbox {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NotificationInbox")
            .field("len", &self.len())
            .field("unread", &self.unread_count())
            .finish()
    }
}

impl NotificationInbox {
    pub fn new(api: Arc<dyn InboxApi>) -> Self {
        let (revision, _) = watch::channel(0);
        Self {
            inner: Arc::new(InboxInner {
                api,
                state: Mutex::new(InboxState::default()),
                revision,
            }),
        }
    }

    fn state(&self) -> MutexGuard<'_, InboxState> {
        self.inner.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn bump(&self) {
        self.inner.revision.send_modify(|rev| *rev += 1);
    }

    /// Replace the list with a server snapshot. The unread count is
    /// recomputed from the snapshot regardless of prior state.
    pub fn load_initial(&self, mut list: Vec<Notification>) {
        list.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        {
            let mut state = self.state();
            state.items = list;
            state.recount();
            debug!(len = state.items.len(), unread = state.unread, "Inbox loaded");
        }
        self.bump();
    }

    /// Prepend a pushed notification. Returns `false` for a duplicate id.
    pub fn append(&self, notification: Notification) -> bool {
        {
            let mut state = self.state();
            if state.items.iter().any(|n| n.id == notification.id) {
                debug!(notification_id = %notification.id, "Duplicate notification ignored");
                return false;
            }
            if !notification.is_read {
                state.unread += 1;
            }
            state.items.insert(0, notification);
        }
        self.bump();
        true
    }

    /// Mark one notification read, then confirm with the server.
    ///
    /// Only an unread → read transition decrements the counter. On
    /// confirmation failure the local change stands and the error is
    /// returned.
    pub async fn mark_read(&self, id: &str) -> Result<()> {
        let changed = {
            let mut state = self.state();
            let changed = match state.items.iter_mut().find(|n| n.id == id) {
                Some(n) if !n.is_read => {
                    n.is_read = true;
                    true
                }
                _ => false,
            };
            if changed {
                state.unread = state.unread.saturating_sub(1);
            }
            changed
        };
        if changed {
            self.bump();
        }

        self.inner
            .api
            .mark_read(id)
            .await
            .map_err(|e| self.confirmation_failed(format!("mark {id} read"), e))
    }

    /// Mark everything read, then confirm with the server.
    pub async fn mark_all_read(&self) -> Result<()> {
        {
            let mut state = self.state();
            for n in state.items.iter_mut() {
                n.is_read = true;
            }
            state.unread = 0;
        }
        self.bump();

        self.inner
            .api
            .mark_all_read()
            .await
            .map_err(|e| self.confirmation_failed("mark all read".to_string(), e))
    }

    fn confirmation_failed(&self, action: String, error: Error) -> Error {
        warn!(action = %action, error = %error, "Inbox confirmation failed, will reconcile on next open");
        {
            let mut state = self.state();
            state.sync_warning = Some(format!("could not {action}: {error}"));
            state.needs_reload = true;
        }
        self.bump();
        error
    }

    /// Empty the local list. Nothing is sent to the server.
    pub fn clear_all(&self) {
        {
            let mut state = self.state();
            state.items.clear();
            state.unread = 0;
        }
        self.bump();
    }

    /// Fetch the inbox from the server and load it, clearing any pending
    /// reconciliation.
    pub async fn open(&self) -> Result<usize> {
        let list = self.inner.api.fetch_inbox().await.map_err(|e| {
            warn!(error = %e, "Inbox fetch failed");
            e
        })?;
        self.load_initial(list);
        let unread = {
            let mut state = self.state();
            state.needs_reload = false;
            state.sync_warning = None;
            state.unread
        };
        info!(unread, "Inbox opened");
        Ok(unread)
    }

    pub fn unread_count(&self) -> usize {
        self.state().unread
    }

    /// Snapshot of the list, most recent first.
    pub fn items(&self) -> Vec<Notification> {
        self.state().items.clone()
    }

    pub fn get(&self, id: &str) -> Option<Notification> {
        self.state().items.iter().find(|n| n.id == id).cloned()
    }

    pub fn len(&self) -> usize {
        self.state().items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Last confirmation failure since the inbox was opened.
    pub fn sync_warning(&self) -> Option<String> {
        self.state().sync_warning.clone()
    }

    /// Whether the local list may have drifted from the server.
    pub fn needs_reload(&self) -> bool {
        self.state().needs_reload
    }

    pub fn mark_needs_reload(&self) {
        self.state().needs_reload = true;
        self.bump();
    }

    /// Revision counter bumped on every change.
    pub fn changes(&self) -> watch::Receiver<u64> {
        self.inner.revision.subscribe()
    }
}
