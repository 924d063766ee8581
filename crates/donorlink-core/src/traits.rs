//! Collaborator traits for the REST side of the platform.
//!
//! The real-time channel only signals that something changed; the data itself
//! is always read and written through these interfaces. Concrete HTTP clients
//! live in `donorlink-realtime`, deterministic doubles in its `mock` module.

use async_trait::async_trait;
use serde_json::Value as JsonValue;

use crate::error::Result;
use crate::models::{CacheKey, GamificationState, Notification};

/// Fetches the current server representation of a cached resource.
#[async_trait]
pub trait ResourceFetcher: Send + Sync {
    /// Fetch a collection (`key.id == None`) or a single item.
    async fn fetch(&self, key: &CacheKey) -> Result<JsonValue>;
}

/// Notification inbox endpoints.
#[async_trait]
pub trait InboxApi: Send + Sync {
    /// Full inbox listing, most recent first.
    async fn fetch_inbox(&self) -> Result<Vec<Notification>>;

    /// Confirm a single notification as read.
    async fn mark_read(&self, id: &str) -> Result<()>;

    /// Confirm every notification as read.
    async fn mark_all_read(&self) -> Result<()>;
}

/// Gamification profile endpoint.
#[async_trait]
pub trait ProgressApi: Send + Sync {
    /// Current points, level and badges of the session identity.
    async fn fetch_progress(&self) -> Result<GamificationState>;
}
