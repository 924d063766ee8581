//! Runtime configuration for the real-time coordinator.

use std::path::PathBuf;
use std::time::Duration;

use donorlink_core::defaults;

use crate::backoff::ReconnectPolicy;

/// Configuration for a session's real-time context.
#[derive(Debug, Clone)]
pub struct RealtimeConfig {
    /// WebSocket endpoint of the push channel.
    pub ws_url: String,
    /// REST API base URL.
    pub api_url: String,
    /// Connection establishment backoff.
    pub reconnect: ReconnectPolicy,
    /// Lifetime of toasts enqueued by routed events.
    pub toast_ttl: Duration,
    /// How long the level-up celebration stays visible.
    pub celebration_duration: Duration,
    /// Outbound command buffer per connection.
    pub outbound_buffer: usize,
}

impl Default for RealtimeConfig {
    fn default() -> Self {
        Self {
            ws_url: defaults::WS_URL.to_string(),
            api_url: defaults::API_URL.to_string(),
            reconnect: ReconnectPolicy::default(),
            toast_ttl: Duration::from_millis(defaults::TOAST_TTL_MS),
            celebration_duration: Duration::from_millis(defaults::CELEBRATION_DURATION_MS),
            outbound_buffer: defaults::OUTBOUND_BUFFER,
        }
    }
}

impl RealtimeConfig {
    /// Create config from environment variables (with defaults).
    ///
    /// | Variable | Default | Description |
    /// |----------|---------|-------------|
    /// | `DONORLINK_WS_URL` | `ws://localhost:5000/realtime` | Push channel endpoint |
    /// | `DONORLINK_API_URL` | `http://localhost:5000/api` | REST base URL |
    /// | `DONORLINK_RECONNECT_INITIAL_MS` | `1000` | First reconnection delay |
    /// | `DONORLINK_RECONNECT_MAX_MS` | `5000` | Reconnection delay cap |
    /// | `DONORLINK_RECONNECT_MAX_ATTEMPTS` | `5` | Attempts before giving up |
    /// | `DONORLINK_TOAST_TTL_MS` | `5000` | Toast lifetime |
    /// | `DONORLINK_CELEBRATION_MS` | `4000` | Level-up celebration duration |
    /// | `DONORLINK_OUTBOUND_BUFFER` | `64` | Outbound command buffer |
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Same as [`from_env`](Self::from_env) with an injectable variable source.
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let parse_u64 = |key: &str, default: u64| -> u64 {
            lookup(key)
                .and_then(|v| v.trim().parse::<u64>().ok())
                .unwrap_or(default)
        };

        let ws_url = lookup("DONORLINK_WS_URL")
            .filter(|v| !v.trim().is_empty())
            .unwrap_or_else(|| defaults::WS_URL.to_string());

        let api_url = lookup("DONORLINK_API_URL")
            .filter(|v| !v.trim().is_empty())
            .map(|v| v.trim_end_matches('/').to_string())
            .unwrap_or_else(|| defaults::API_URL.to_string());

        let max_attempts = lookup("DONORLINK_RECONNECT_MAX_ATTEMPTS")
            .and_then(|v| v.trim().parse::<u32>().ok())
            .unwrap_or(defaults::RECONNECT_MAX_ATTEMPTS)
            .max(1);

        let reconnect = ReconnectPolicy::default()
            .with_initial_delay(Duration::from_millis(parse_u64(
                "DONORLINK_RECONNECT_INITIAL_MS",
                defaults::RECONNECT_INITIAL_DELAY_MS,
            )))
            .with_max_delay(Duration::from_millis(parse_u64(
                "DONORLINK_RECONNECT_MAX_MS",
                defaults::RECONNECT_MAX_DELAY_MS,
            )))
            .with_max_attempts(max_attempts);

        let outbound_buffer = parse_u64("DONORLINK_OUTBOUND_BUFFER", defaults::OUTBOUND_BUFFER as u64)
            .max(1) as usize;

        Self {
            ws_url,
            api_url,
            reconnect,
            toast_ttl: Duration::from_millis(parse_u64(
                "DONORLINK_TOAST_TTL_MS",
                defaults::TOAST_TTL_MS,
            )),
            celebration_duration: Duration::from_millis(parse_u64(
                "DONORLINK_CELEBRATION_MS",
                defaults::CELEBRATION_DURATION_MS,
            )),
            outbound_buffer,
        }
    }

    pub fn with_ws_url(mut self, url: impl Into<String>) -> Self {
        self.ws_url = url.into();
        self
    }

    pub fn with_api_url(mut self, url: impl Into<String>) -> Self {
        self.api_url = url.into();
        self
    }

    pub fn with_reconnect(mut self, policy: ReconnectPolicy) -> Self {
        self.reconnect = policy;
        self
    }

    pub fn with_toast_ttl(mut self, ttl: Duration) -> Self {
        self.toast_ttl = ttl;
        self
    }

    pub fn with_celebration_duration(mut self, duration: Duration) -> Self {
        self.celebration_duration = duration;
        self
    }

    pub fn with_outbound_buffer(mut self, size: usize) -> Self {
        self.outbound_buffer = size.max(1);
        self
    }
}

/// Log output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

/// Logging configuration for the binary.
#[derive(Debug, Clone, Default)]
pub struct LogConfig {
    pub format: LogFormat,
    /// Optional log file (daily rotation).
    pub file: Option<PathBuf>,
    /// Force ANSI colors on or off; auto-detected when `None`.
    pub ansi: Option<bool>,
}

impl LogConfig {
    /// Reads `LOG_FORMAT` (`text`|`json`), `LOG_FILE`, `LOG_ANSI`.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let format = match lookup("LOG_FORMAT").as_deref().map(str::trim) {
            Some("json") => LogFormat::Json,
            _ => LogFormat::Text,
        };
        let file = lookup("LOG_FILE")
            .filter(|v| !v.trim().is_empty())
            .map(PathBuf::from);
        let ansi = lookup("LOG_ANSI").map(|v| v == "true" || v == "1");
        Self { format, file, ansi }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_defaults_without_env() {
        let config = RealtimeConfig::from_lookup(lookup(&[]));
        assert_eq!(config.ws_url, defaults::WS_URL);
        assert_eq!(config.api_url, defaults::API_URL);
        assert_eq!(config.reconnect.max_attempts, defaults::RECONNECT_MAX_ATTEMPTS);
        assert_eq!(config.toast_ttl, Duration::from_millis(defaults::TOAST_TTL_MS));
        assert_eq!(config.outbound_buffer, defaults::OUTBOUND_BUFFER);
    }

    #[test]
    fn test_env_overrides() {
        let config = RealtimeConfig::from_lookup(lookup(&[
            ("DONORLINK_WS_URL", "wss://push.example.org/ws"),
            ("DONORLINK_API_URL", "https://api.example.org/v1/"),
            ("DONORLINK_RECONNECT_INITIAL_MS", "250"),
            ("DONORLINK_RECONNECT_MAX_MS", "8000"),
            ("DONORLINK_RECONNECT_MAX_ATTEMPTS", "9"),
            ("DONORLINK_TOAST_TTL_MS", "1200"),
            ("DONORLINK_CELEBRATION_MS", "3000"),
        ]));
        assert_eq!(config.ws_url, "wss://push.example.org/ws");
        assert_eq!(config.api_url, "https://api.example.org/v1");
        assert_eq!(config.reconnect.initial_delay, Duration::from_millis(250));
        assert_eq!(config.reconnect.max_delay, Duration::from_millis(8000));
        assert_eq!(config.reconnect.max_attempts, 9);
        assert_eq!(config.toast_ttl, Duration::from_millis(1200));
        assert_eq!(config.celebration_duration, Duration::from_secs(3));
    }

    #[test]
    fn test_invalid_values_fall_back() {
        let config = RealtimeConfig::from_lookup(lookup(&[
            ("DONORLINK_RECONNECT_MAX_ATTEMPTS", "0"),
            ("DONORLINK_TOAST_TTL_MS", "soon"),
            ("DONORLINK_OUTBOUND_BUFFER", "0"),
            ("DONORLINK_WS_URL", "  "),
        ]));
        assert_eq!(config.reconnect.max_attempts, 1);
        assert_eq!(config.toast_ttl, Duration::from_millis(defaults::TOAST_TTL_MS));
        assert_eq!(config.outbound_buffer, 1);
        assert_eq!(config.ws_url, defaults::WS_URL);
    }

    #[test]
    fn test_log_config() {
        let config = LogConfig::from_lookup(lookup(&[
            ("LOG_FORMAT", "json"),
            ("LOG_FILE", "/tmp/donorlink.log"),
            ("LOG_ANSI", "false"),
        ]));
        assert_eq!(config.format, LogFormat::Json);
        assert_eq!(config.file, Some(PathBuf::from("/tmp/donorlink.log")));
        assert_eq!(config.ansi, Some(false));

        let default = LogConfig::from_lookup(lookup(&[]));
        assert_eq!(default.format, LogFormat::Text);
        assert!(default.file.is_none());
        assert!(default.ansi.is_none());
    }
}
