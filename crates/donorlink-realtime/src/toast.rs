//! Transient, auto-dismissing toasts.

use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tokio::time::Instant;
use tracing::trace;
use uuid::Uuid;

use donorlink_core::ToastMessage;

/// Roughly thirty years; stands in for "never" when a deadline overflows.
const FAR_FUTURE: Duration = Duration::from_secs(86_400 * 365 * 30);

/// `now + after`, saturating instead of panicking on very long durations.
pub(crate) fn deadline_after(after: Duration) -> Instant {
    let now = Instant::now();
    now.checked_add(after)
        .or_else(|| now.checked_add(FAR_FUTURE))
        .unwrap_or(now)
}

struct ActiveToast {
    message: ToastMessage,
    expires_at: Instant,
}

/// Queue of visible toasts. Each entry removes itself once its TTL elapses.
#[derive(Clone)]
pub struct ToastQueue {
    toasts: Arc<Mutex<Vec<ActiveToast>>>,
    default_ttl: Duration,
}

impl fmt::Debug for ToastQueue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ToastQueue")
            .field("visible", &self.len())
            .field("default_ttl", &self.default_ttl)
            .finish()
    }
}

impl ToastQueue {
    pub fn new(default_ttl: Duration) -> Self {
        Self {
            toasts: Arc::new(Mutex::new(Vec::new())),
            default_ttl,
        }
    }

    fn toasts(&self) -> MutexGuard<'_, Vec<ActiveToast>> {
        self.toasts.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn default_ttl(&self) -> Duration {
        self.default_ttl
    }

    /// Show a toast for `ttl`. Returns its id.
    ///
    /// Expiry is scheduled on the current tokio runtime; without one the
    /// entry is pruned lazily by [`active`](Self::active).
    pub fn enqueue(&self, icon: impl Into<String>, text: impl Into<String>, ttl: Duration) -> Uuid {
        let message = ToastMessage::new(icon, text, ttl);
        let id = message.id;
        self.toasts().push(ActiveToast {
            message,
            expires_at: deadline_after(ttl),
        });
        trace!(toast_id = %id, ttl_ms = ttl.as_millis() as u64, "Toast enqueued");

        if let Ok(handle) = tokio::runtime::Handle::try_current() {
            let toasts = Arc::downgrade(&self.toasts);
            handle.spawn(async move {
                tokio::time::sleep(ttl).await;
                if let Some(toasts) = toasts.upgrade() {
                    toasts
                        .lock()
                        .unwrap_or_else(PoisonError::into_inner)
                        .retain(|t| t.message.id != id);
                }
            });
        }
        id
    }

    /// Show a toast for the default TTL.
    pub fn push(&self, icon: impl Into<String>, text: impl Into<String>) -> Uuid {
        self.enqueue(icon, text, self.default_ttl)
    }

    /// Visible toasts, oldest first.
    pub fn active(&self) -> Vec<ToastMessage> {
        let now = Instant::now();
        let mut toasts = self.toasts();
        toasts.retain(|t| t.expires_at > now);
        toasts.iter().map(|t| t.message.clone()).collect()
    }

    /// Remove a toast before it expires.
    pub fn dismiss(&self, id: Uuid) -> bool {
        let mut toasts = self.toasts();
        let before = toasts.len();
        toasts.retain(|t| t.message.id != id);
        toasts.len() != before
    }

    pub fn clear(&self) {
        self.toasts().clear();
    }

    pub fn len(&self) -> usize {
        self.active().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
