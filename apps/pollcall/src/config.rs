use std::env;
use std::time::Duration;

use crate::media::VideoConstraints;

pub const DEFAULT_POLL_INTERVAL_MS: u64 = 3_000;
pub const DEFAULT_RELAY_URL: &str = "http://127.0.0.1:8787";
pub const DEFAULT_RELAY_TIMEOUT_MS: u64 = 10_000;
pub const DEFAULT_ICE_SERVERS: &[&str] = &[
    "stun:stun.l.google.com:19302",
    "stun:stun1.l.google.com:19302",
];

/// Per-call tuning shared by every attempt a controller opens.
#[derive(Debug, Clone)]
pub struct CallConfig {
    pub poll_interval: Duration,
    pub ice_servers: Vec<String>,
    pub video: VideoConstraints,
    /// Clear the pair's relay slots when the call is closed.
    pub clear_relay_on_close: bool,
}

impl CallConfig {
    /// Load configuration from environment variables
    pub fn from_env() -> Self {
        let defaults = Self::default();
        let poll_interval = env_u64("POLLCALL_POLL_INTERVAL_MS")
            .filter(|ms| *ms > 0)
            .map(Duration::from_millis)
            .unwrap_or(defaults.poll_interval);
        let ice_servers = env::var("POLLCALL_ICE_SERVERS")
            .ok()
            .map(|raw| parse_ice_servers(&raw))
            .filter(|servers| !servers.is_empty())
            .unwrap_or(defaults.ice_servers);
        let video = VideoConstraints {
            width: env_u64("POLLCALL_VIDEO_WIDTH")
                .map(|w| w as u32)
                .unwrap_or(defaults.video.width),
            height: env_u64("POLLCALL_VIDEO_HEIGHT")
                .map(|h| h as u32)
                .unwrap_or(defaults.video.height),
        };
        let clear_relay_on_close = env::var("POLLCALL_CLEAR_ON_CLOSE")
            .map(|value| value == "1" || value.eq_ignore_ascii_case("true"))
            .unwrap_or(defaults.clear_relay_on_close);

        Self {
            poll_interval,
            ice_servers,
            video,
            clear_relay_on_close,
        }
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }
}

impl Default for CallConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_millis(DEFAULT_POLL_INTERVAL_MS),
            ice_servers: DEFAULT_ICE_SERVERS.iter().map(|s| s.to_string()).collect(),
            video: VideoConstraints::default(),
            clear_relay_on_close: true,
        }
    }
}

#[derive(Debug, Clone)]
pub struct RelayClientConfig {
    pub base_url: String,
    pub request_timeout: Duration,
}

impl RelayClientConfig {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: normalize_base(base_url.into()),
            request_timeout: Duration::from_millis(DEFAULT_RELAY_TIMEOUT_MS),
        }
    }

    pub fn from_env() -> Self {
        let base = env::var("POLLCALL_RELAY_URL")
            .ok()
            .filter(|value| !value.trim().is_empty())
            .unwrap_or_else(|| DEFAULT_RELAY_URL.to_string());
        let mut config = Self::new(base);
        if let Some(ms) = env_u64("POLLCALL_RELAY_TIMEOUT_MS").filter(|ms| *ms > 0) {
            config.request_timeout = Duration::from_millis(ms);
        }
        config
    }
}

impl Default for RelayClientConfig {
    fn default() -> Self {
        Self::new(DEFAULT_RELAY_URL)
    }
}

fn env_u64(key: &str) -> Option<u64> {
    env::var(key).ok().and_then(|value| value.trim().parse().ok())
}

pub fn parse_ice_servers(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|url| !url.is_empty())
        .map(str::to_string)
        .collect()
}

// Normalize localhost to IPv4 to avoid IPv6 (::1) preference on macOS
fn normalize_base(base: String) -> String {
    let trimmed = base.trim().trim_end_matches('/').to_string();
    if trimmed.contains("://localhost") {
        trimmed.replacen("://localhost", "://127.0.0.1", 1)
    } else {
        trimmed
    }
}
