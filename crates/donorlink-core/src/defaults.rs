//! Centralized default constants for the DonorLink real-time client.
//!
//! **This module is the single source of truth** for shared default values.
//! Config loaders and component constructors reference these constants
//! instead of defining their own magic numbers.

// =============================================================================
// ENDPOINTS
// =============================================================================

/// Default WebSocket endpoint for the push channel.
pub const WS_URL: &str = "ws://localhost:5000/realtime";

/// Default REST API base URL.
pub const API_URL: &str = "http://localhost:5000/api";

// =============================================================================
// RECONNECTION
// =============================================================================

/// Delay before the first reconnection attempt.
pub const RECONNECT_INITIAL_DELAY_MS: u64 = 1_000;

/// Upper bound for the exponential reconnection delay.
pub const RECONNECT_MAX_DELAY_MS: u64 = 5_000;

/// Reconnection attempts before the connection goes terminally Disconnected.
pub const RECONNECT_MAX_ATTEMPTS: u32 = 5;

/// Exponential growth factor between attempts.
pub const RECONNECT_MULTIPLIER: f64 = 2.0;

/// Jitter applied to each delay (0.1 = ±10%).
pub const RECONNECT_JITTER: f64 = 0.1;

// =============================================================================
// CHANNELS
// =============================================================================

/// Outbound command buffer per connection.
pub const OUTBOUND_BUFFER: usize = 64;

// =============================================================================
// UI FEEDBACK
// =============================================================================

/// Lifetime of a toast message.
pub const TOAST_TTL_MS: u64 = 5_000;

/// How long the level-up celebration stays visible.
pub const CELEBRATION_DURATION_MS: u64 = 4_000;

// =============================================================================
// GAMIFICATION
// =============================================================================

/// Lowest displayable level.
pub const MIN_LEVEL: u32 = 1;

// =============================================================================
// LOGGING
// =============================================================================

/// Default `RUST_LOG` filter when none is set.
pub const LOG_FILTER: &str = "donorlink_realtime=info,donorlink_core=info";
