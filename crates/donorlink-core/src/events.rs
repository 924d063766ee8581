//! Push event contract between the DonorLink server and the real-time client.
//!
//! Inbound events are namespaced `"resource:verb"` names with a JSON payload.
//! On the wire every message is a text frame:
//!
//! ```text
//! {"event":"donation:created","data":{"donationId":"d-42","message":"..."}}
//! ```
//!
//! The only outbound frames are the room joins sent right after the handshake
//! (`join-personal`, `join-organization`). Domain writes go through REST.
//!
//! ## Schema Evolution
//!
//! - Consumers ignore unknown event names and unknown payload fields.
//! - Missing payload fields degrade to placeholders; they never fail a frame.

use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

use crate::error::{Error, Result};

// ============================================================================
// Event names
// ============================================================================

/// Inbound event names, grouped by resource namespace.
pub mod names {
    // ── Donations ───────────────────────────────────────────────────────
    pub const DONATION_CREATED: &str = "donation:created";
    pub const DONATION_UPDATED: &str = "donation:updated";
    pub const DONATION_STATUS_CHANGED: &str = "donation:status_changed";
    pub const DONATION_DELIVERED: &str = "donation:delivered";

    // ── Events ──────────────────────────────────────────────────────────
    pub const EVENT_CREATED: &str = "event:created";
    pub const EVENT_UPDATED: &str = "event:updated";
    pub const EVENT_CANCELLED: &str = "event:cancelled";
    pub const EVENT_REGISTRATION: &str = "event:registration";

    // ── Help requests ───────────────────────────────────────────────────
    pub const HELP_REQUEST_CREATED: &str = "help_request:created";
    pub const HELP_REQUEST_UPDATED: &str = "help_request:updated";
    pub const HELP_REQUEST_FULFILLED: &str = "help_request:fulfilled";
    pub const VOLUNTEER_ASSIGNED: &str = "volunteer:assigned";

    // ── Organizations ───────────────────────────────────────────────────
    pub const NGO_VERIFIED: &str = "ngo:verified";

    // ── Recognition ─────────────────────────────────────────────────────
    pub const CERTIFICATE_ISSUED: &str = "certificate:issued";
    pub const BADGE_EARNED: &str = "badge:earned";
    pub const POINTS_EARNED: &str = "points:earned";
    pub const LEADERBOARD_UPDATED: &str = "leaderboard:updated";

    // ── Generic ─────────────────────────────────────────────────────────
    pub const ACTIVITY_NEW: &str = "activity:new";
    pub const STATS_UPDATED: &str = "stats:updated";
    pub const NOTIFICATION_NEW: &str = "notification:new";

    /// Every inbound name the client knows how to route.
    pub const ALL: &[&str] = &[
        DONATION_CREATED,
        DONATION_UPDATED,
        DONATION_STATUS_CHANGED,
        DONATION_DELIVERED,
        EVENT_CREATED,
        EVENT_UPDATED,
        EVENT_CANCELLED,
        EVENT_REGISTRATION,
        HELP_REQUEST_CREATED,
        HELP_REQUEST_UPDATED,
        HELP_REQUEST_FULFILLED,
        VOLUNTEER_ASSIGNED,
        NGO_VERIFIED,
        CERTIFICATE_ISSUED,
        BADGE_EARNED,
        POINTS_EARNED,
        LEADERBOARD_UPDATED,
        ACTIVITY_NEW,
        STATS_UPDATED,
        NOTIFICATION_NEW,
    ];

    // ── Outbound commands ───────────────────────────────────────────────
    pub const JOIN_PERSONAL: &str = "join-personal";
    pub const JOIN_ORGANIZATION: &str = "join-organization";
}

// ============================================================================
// Wire frame
// ============================================================================

/// JSON text frame exchanged over the push channel.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct WireFrame {
    event: String,
    #[serde(default)]
    data: JsonValue,
}

// ============================================================================
// Inbound event
// ============================================================================

/// A server-pushed domain event.
#[derive(Debug, Clone, PartialEq)]
pub struct Event {
    /// Namespaced name, e.g. `"points:earned"`.
    pub name: String,
    /// Event data. `Null` when the frame carried none.
    pub payload: JsonValue,
}

impl Event {
    pub fn new(name: impl Into<String>, payload: JsonValue) -> Self {
        Self {
            name: name.into(),
            payload,
        }
    }

    /// Parse an inbound text frame.
    pub fn from_frame(text: &str) -> Result<Self> {
        let frame: WireFrame = serde_json::from_str(text)?;
        if frame.event.trim().is_empty() {
            return Err(Error::InvalidInput("frame has an empty event name".into()));
        }
        Ok(Self {
            name: frame.event,
            payload: frame.data,
        })
    }

    /// Encode as a wire frame (used by test servers and mocks).
    pub fn to_frame(&self) -> Result<String> {
        Ok(serde_json::to_string(&WireFrame {
            event: self.name.clone(),
            data: self.payload.clone(),
        })?)
    }

    /// Resource namespace (`"donation"` for `"donation:created"`).
    pub fn resource(&self) -> Option<&str> {
        self.name.split_once(':').map(|(resource, _)| resource)
    }

    /// Verb (`"created"` for `"donation:created"`).
    pub fn verb(&self) -> Option<&str> {
        self.name.split_once(':').map(|(_, verb)| verb)
    }

    /// Look up a payload field. Dotted paths reach into nested objects
    /// (`"badge.id"`).
    pub fn field(&self, path: &str) -> Option<&JsonValue> {
        let value = if path.contains('.') {
            let pointer = format!("/{}", path.replace('.', "/"));
            self.payload.pointer(&pointer)
        } else {
            self.payload.get(path)
        };
        value.filter(|v| !v.is_null())
    }

    /// Identifier-like field: strings are taken as-is, numbers are stringified.
    pub fn id_field(&self, path: &str) -> Option<String> {
        match self.field(path)? {
            JsonValue::String(s) if !s.trim().is_empty() => Some(s.clone()),
            JsonValue::Number(n) => Some(n.to_string()),
            _ => None,
        }
    }

    /// Non-empty string field.
    pub fn str_field(&self, path: &str) -> Option<&str> {
        self.field(path)
            .and_then(JsonValue::as_str)
            .filter(|s| !s.trim().is_empty())
    }

    /// Integer field. Accepts floats (truncated) and numeric strings.
    pub fn i64_field(&self, path: &str) -> Option<i64> {
        match self.field(path)? {
            JsonValue::Number(n) => n.as_i64().or_else(|| n.as_f64().map(|f| f as i64)),
            JsonValue::String(s) => s.trim().parse().ok(),
            _ => None,
        }
    }

    /// Boolean field. Absent or non-boolean reads as `None`.
    pub fn bool_field(&self, path: &str) -> Option<bool> {
        self.field(path).and_then(JsonValue::as_bool)
    }

    /// Whether this name is part of the routed contract.
    pub fn is_known(&self) -> bool {
        names::ALL.contains(&self.name.as_str())
    }
}

// ============================================================================
// Outbound command
// ============================================================================

/// A client-to-server message on the push channel.
#[derive(Debug, Clone, PartialEq)]
pub struct Command {
    pub name: String,
    pub payload: JsonValue,
}

impl Command {
    pub fn new(name: impl Into<String>, payload: JsonValue) -> Self {
        Self {
            name: name.into(),
            payload,
        }
    }

    /// Subscribe this connection to the caller's personal room.
    pub fn join_personal(identity_id: impl Into<String>) -> Self {
        Self::new(names::JOIN_PERSONAL, JsonValue::String(identity_id.into()))
    }

    /// Subscribe this connection to an organization's room.
    pub fn join_organization(org_id: impl Into<String>) -> Self {
        Self::new(names::JOIN_ORGANIZATION, JsonValue::String(org_id.into()))
    }

    pub fn to_frame(&self) -> Result<String> {
        Ok(serde_json::to_string(&WireFrame {
            event: self.name.clone(),
            data: self.payload.clone(),
        })?)
    }

    /// Parse an outbound frame (server side of tests).
    pub fn from_frame(text: &str) -> Result<Self> {
        let frame: WireFrame = serde_json::from_str(text)?;
        Ok(Self {
            name: frame.event,
            payload: frame.data,
        })
    }
}

// ============================================================================
// Tests
// ============================================================================
