//! Domain models shared by the real-time coordinator and its consumers.

use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::defaults;
use crate::error::{Error, Result};
use crate::events::{names, Event};

// =============================================================================
// SESSION
// =============================================================================

/// Platform role of an authenticated identity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Donor,
    Volunteer,
    NgoStaff,
    NgoAdmin,
    PlatformAdmin,
}

impl Role {
    /// Roles that act on behalf of an organization and receive its room's events.
    pub fn joins_organization_room(&self) -> bool {
        matches!(self, Role::NgoStaff | Role::NgoAdmin)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Donor => "donor",
            Role::Volunteer => "volunteer",
            Role::NgoStaff => "ngo_staff",
            Role::NgoAdmin => "ngo_admin",
            Role::PlatformAdmin => "platform_admin",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Role {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().replace('-', "_").as_str() {
            "donor" => Ok(Role::Donor),
            "volunteer" => Ok(Role::Volunteer),
            "ngo_staff" => Ok(Role::NgoStaff),
            "ngo_admin" | "ngo" => Ok(Role::NgoAdmin),
            "platform_admin" | "admin" => Ok(Role::PlatformAdmin),
            other => Err(Error::InvalidInput(format!("unknown role: {other}"))),
        }
    }
}

/// Who the session belongs to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Identity {
    pub id: String,
    pub role: Role,
    /// Organization the identity acts for (NGO staff and admins).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub organization_id: Option<String>,
}

impl Identity {
    pub fn new(id: impl Into<String>, role: Role) -> Self {
        Self {
            id: id.into(),
            role,
            organization_id: None,
        }
    }

    pub fn with_organization(mut self, org_id: impl Into<String>) -> Self {
        self.organization_id = Some(org_id.into());
        self
    }

    /// Organization room to join, if the role qualifies and an org is set.
    pub fn organization_room(&self) -> Option<&str> {
        if !self.role.joins_organization_room() {
            return None;
        }
        self.organization_id
            .as_deref()
            .filter(|id| !id.trim().is_empty())
    }
}

/// Authenticated session. Created at login, destroyed at logout or expiry.
#[derive(Clone, PartialEq, Eq)]
pub struct Session {
    pub identity: Identity,
    pub auth_token: String,
}

impl Session {
    pub fn new(identity: Identity, auth_token: impl Into<String>) -> Self {
        Self {
            identity,
            auth_token: auth_token.into(),
        }
    }

    /// A connection may only be attempted with a non-empty token.
    pub fn has_credentials(&self) -> bool {
        !self.auth_token.trim().is_empty()
    }
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("identity", &self.identity)
            .field("auth_token", &"<redacted>")
            .finish()
    }
}

// =============================================================================
// CONNECTION
// =============================================================================

/// Lifecycle state of the push connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionState {
    #[default]
    Disconnected,
    Connecting,
    Connected,
    Reconnecting,
}

impl ConnectionState {
    pub fn is_connected(&self) -> bool {
        matches!(self, ConnectionState::Connected)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ConnectionState::Disconnected => "disconnected",
            ConnectionState::Connecting => "connecting",
            ConnectionState::Connected => "connected",
            ConnectionState::Reconnecting => "reconnecting",
        }
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// =============================================================================
// CACHE KEYS
// =============================================================================

/// Server resources the client caches.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResourceType {
    Donations,
    Events,
    HelpRequests,
    Organizations,
    Certificates,
    Badges,
    Gamification,
    Leaderboard,
    Activities,
    Dashboard,
}

impl ResourceType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ResourceType::Donations => "donations",
            ResourceType::Events => "events",
            ResourceType::HelpRequests => "help_requests",
            ResourceType::Organizations => "organizations",
            ResourceType::Certificates => "certificates",
            ResourceType::Badges => "badges",
            ResourceType::Gamification => "gamification",
            ResourceType::Leaderboard => "leaderboard",
            ResourceType::Activities => "activities",
            ResourceType::Dashboard => "dashboard",
        }
    }

    /// REST path segment (`help-requests`).
    pub fn path_segment(&self) -> String {
        self.as_str().replace('_', "-")
    }
}

impl fmt::Display for ResourceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Cache key: a whole collection, or one item of it.
///
/// Collection and item keys are independent; invalidating one never touches
/// the other.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CacheKey {
    pub resource: ResourceType,
    pub id: Option<String>,
}

impl CacheKey {
    pub fn collection(resource: ResourceType) -> Self {
        Self { resource, id: None }
    }

    pub fn item(resource: ResourceType, id: impl Into<String>) -> Self {
        Self {
            resource,
            id: Some(id.into()),
        }
    }

    pub fn is_collection(&self) -> bool {
        self.id.is_none()
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.id {
            Some(id) => write!(f, "{}/{}", self.resource, id),
            None => write!(f, "{}", self.resource),
        }
    }
}

// =============================================================================
// NOTIFICATIONS
// =============================================================================

/// Closed set of notification categories. Anything else is `Other`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationCategory {
    Donation,
    Event,
    HelpRequest,
    Volunteer,
    Organization,
    Certificate,
    Badge,
    Points,
    Leaderboard,
    System,
    #[default]
    #[serde(other)]
    Other,
}

/// Icon and label shown for a category.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CategoryPresentation {
    pub icon: &'static str,
    pub label: &'static str,
}

impl NotificationCategory {
    pub fn presentation(&self) -> CategoryPresentation {
        let (icon, label) = match self {
            NotificationCategory::Donation => ("💝", "Donation"),
            NotificationCategory::Event => ("📅", "Event"),
            NotificationCategory::HelpRequest => ("🆘", "Help request"),
            NotificationCategory::Volunteer => ("🙋", "Volunteering"),
            NotificationCategory::Organization => ("🏢", "Organization"),
            NotificationCategory::Certificate => ("📜", "Certificate"),
            NotificationCategory::Badge => ("🏅", "Badge"),
            NotificationCategory::Points => ("⭐", "Points"),
            NotificationCategory::Leaderboard => ("🏆", "Leaderboard"),
            NotificationCategory::System => ("⚙️", "System"),
            NotificationCategory::Other => ("🔔", "Notification"),
        };
        CategoryPresentation { icon, label }
    }

    /// Lenient parse used for push payloads.
    pub fn parse(raw: &str) -> Self {
        serde_json::from_value(serde_json::Value::String(raw.trim().to_ascii_lowercase()))
            .unwrap_or_default()
    }
}

/// A durable inbox entry. Created server-side; only `is_read` is mutated
/// locally.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Notification {
    #[serde(alias = "_id")]
    pub id: String,
    #[serde(default, alias = "type")]
    pub category: NotificationCategory,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub message: String,
    #[serde(default = "chrono::Utc::now")]
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub is_read: bool,
}

impl Notification {
    /// Build a notification from one REST inbox record, with the same
    /// placeholders as [`from_event`](Self::from_event).
    ///
    /// Returns `None` when the record has no usable `id`/`_id`: such an entry
    /// could never be confirmed read on the server.
    pub fn from_record(record: &serde_json::Value) -> Option<Self> {
        let view = Event::new(names::NOTIFICATION_NEW, record.clone());
        let id = view.id_field("id").or_else(|| view.id_field("_id"))?;
        Some(Self {
            id,
            ..Self::from_event(&view)
        })
    }

    /// Build a notification from a push payload, filling placeholders for
    /// anything missing or malformed.
    pub fn from_event(event: &Event) -> Self {
        let category = event
            .str_field("category")
            .or_else(|| event.str_field("type"))
            .map(NotificationCategory::parse)
            .unwrap_or_default();

        let id = event
            .id_field("id")
            .or_else(|| event.id_field("_id"))
            .unwrap_or_else(|| Uuid::now_v7().to_string());

        let title = event
            .str_field("title")
            .map(str::to_string)
            .unwrap_or_else(|| category.presentation().label.to_string());

        let message = event
            .str_field("message")
            .map(str::to_string)
            .unwrap_or_default();

        let created_at = event
            .str_field("createdAt")
            .and_then(|raw| DateTime::parse_from_rfc3339(raw).ok())
            .map(|ts| ts.with_timezone(&Utc))
            .unwrap_or_else(Utc::now);

        Self {
            id,
            category,
            title,
            message,
            created_at,
            is_read: event.bool_field("isRead").unwrap_or(false),
        }
    }
}

// =============================================================================
// TOASTS
// =============================================================================

/// Ephemeral UI notice. Never persisted.
#[derive(Debug, Clone, PartialEq)]
pub struct ToastMessage {
    pub id: Uuid,
    pub icon: String,
    pub text: String,
    pub created_at: DateTime<Utc>,
    pub ttl: Duration,
}

impl ToastMessage {
    pub fn new(icon: impl Into<String>, text: impl Into<String>, ttl: Duration) -> Self {
        Self {
            id: Uuid::now_v7(),
            icon: icon.into(),
            text: text.into(),
            created_at: Utc::now(),
            ttl,
        }
    }
}

// =============================================================================
// GAMIFICATION
// =============================================================================

/// Displayed progression: points, level and earned badges.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GamificationState {
    #[serde(default)]
    pub points: u64,
    #[serde(default = "min_level")]
    pub level: u32,
    #[serde(default)]
    pub badges: BTreeSet<String>,
}

fn min_level() -> u32 {
    defaults::MIN_LEVEL
}

impl Default for GamificationState {
    fn default() -> Self {
        Self {
            points: 0,
            level: defaults::MIN_LEVEL,
            badges: BTreeSet::new(),
        }
    }
}

/// Server-declared progression change carried by a points event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PointsUpdate {
    /// Authoritative running total (never a delta).
    pub total_points: u64,
    pub level_up: bool,
    pub new_level: Option<u32>,
}

impl PointsUpdate {
    pub fn new(total_points: u64) -> Self {
        Self {
            total_points,
            level_up: false,
            new_level: None,
        }
    }

    pub fn with_level_up(mut self, new_level: u32) -> Self {
        self.level_up = true;
        self.new_level = Some(new_level);
        self
    }

    /// Read `totalPoints`, `levelUp`, `newLevel` from a push payload.
    ///
    /// Returns `None` when `totalPoints` is missing: without the aggregate there
    /// is nothing authoritative to display.
    pub fn from_event(event: &Event) -> Option<Self> {
        let total_points = event.i64_field("totalPoints")?.max(0) as u64;
        let new_level = event
            .i64_field("newLevel")
            .map(|level| level.clamp(defaults::MIN_LEVEL as i64, u32::MAX as i64) as u32);
        Some(Self {
            total_points,
            level_up: event.bool_field("levelUp").unwrap_or(false),
            new_level,
        })
    }
}
