//! Client configuration loaded from environment variables.
//!
//! Follows 12-factor style: all settings come from environment variables
//! (or a `.env` file via `dotenvy`). Programmatic construction goes through
//! [`ClientConfig::new`] and the `with_*` builders.

use std::time::Duration;

use url::Url;

use crate::client::{LivenessPolicy, ReconnectPolicy};
use crate::error::RealtimeError;

/// Default connection target.
pub const DEFAULT_URL: &str = "ws://localhost:3001/ws";

/// Default query parameter carrying the credential.
pub const DEFAULT_TOKEN_PARAM: &str = "token";

/// Default heartbeat period.
pub const DEFAULT_HEARTBEAT_INTERVAL: Duration = Duration::from_secs(30);

/// Default bound on credential resolution plus the transport handshake.
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Top-level client configuration.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Connection target, without credentials.
    pub url: Url,

    /// Query parameter name the credential is sent under.
    pub token_param: String,

    /// Reconnection backoff and attempt budget.
    pub reconnect: ReconnectPolicy,

    /// How long an attempt may stay `Connecting` before it counts as failed.
    pub connect_timeout: Duration,

    /// Heartbeat period; silence for twice this long forces a reconnect.
    pub heartbeat_interval: Duration,

    /// Which inbound traffic counts as proof of liveness.
    pub liveness: LivenessPolicy,

    /// Outbound queue bound (`0` = unbounded, drop-oldest when bounded).
    pub queue_capacity: usize,
}

impl ClientConfig {
    /// Creates a configuration for `url` with default policies.
    ///
    /// # Errors
    ///
    /// Returns [`RealtimeError::InvalidUrl`] if `url` does not parse.
    pub fn new(url: &str) -> Result<Self, RealtimeError> {
        Ok(Self {
            url: Url::parse(url)?,
            token_param: DEFAULT_TOKEN_PARAM.to_string(),
            reconnect: ReconnectPolicy::default(),
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            heartbeat_interval: DEFAULT_HEARTBEAT_INTERVAL,
            liveness: LivenessPolicy::default(),
            queue_capacity: 0,
        })
    }

    /// Loads configuration from environment variables.
    ///
    /// Falls back to defaults when a variable is missing or unparsable.
    /// Calls `dotenvy::dotenv().ok()` to optionally load a `.env` file.
    ///
    /// # Errors
    ///
    /// Returns [`RealtimeError::InvalidUrl`] if `REALTIME_URL` is set but
    /// cannot be parsed, or [`RealtimeError::InvalidConfig`] if the
    /// resulting values fail [`Self::validate`].
    pub fn from_env() -> Result<Self, RealtimeError> {
        dotenvy::dotenv().ok();

        let url = std::env::var("REALTIME_URL").unwrap_or_else(|_| DEFAULT_URL.to_string());
        let defaults = ReconnectPolicy::default();

        let config = Self {
            url: Url::parse(&url)?,
            token_param: std::env::var("REALTIME_TOKEN_PARAM")
                .unwrap_or_else(|_| DEFAULT_TOKEN_PARAM.to_string()),
            reconnect: ReconnectPolicy {
                base_delay: parse_env_millis("REALTIME_RECONNECT_BASE_MS", defaults.base_delay),
                max_delay: parse_env_millis("REALTIME_RECONNECT_MAX_MS", defaults.max_delay),
                max_attempts: parse_env("REALTIME_RECONNECT_MAX_ATTEMPTS", defaults.max_attempts),
            },
            connect_timeout: parse_env_millis("REALTIME_CONNECT_TIMEOUT_MS", DEFAULT_CONNECT_TIMEOUT),
            heartbeat_interval: parse_env_millis(
                "REALTIME_HEARTBEAT_INTERVAL_MS",
                DEFAULT_HEARTBEAT_INTERVAL,
            ),
            liveness: parse_liveness(std::env::var("REALTIME_HEARTBEAT_LIVENESS").ok().as_deref()),
            queue_capacity: parse_env("REALTIME_QUEUE_CAPACITY", 0),
        };
        config.validate()?;
        Ok(config)
    }

    /// Checks value ranges.
    ///
    /// # Errors
    ///
    /// Returns [`RealtimeError::InvalidConfig`] for a zero heartbeat
    /// interval or connect timeout, a zero base delay, a cap below the base
    /// delay, or an empty token parameter name.
    pub fn validate(&self) -> Result<(), RealtimeError> {
        if self.heartbeat_interval.is_zero() {
            return Err(RealtimeError::InvalidConfig(
                "heartbeat interval must be > 0".to_string(),
            ));
        }
        if self.connect_timeout.is_zero() {
            return Err(RealtimeError::InvalidConfig(
                "connect timeout must be > 0".to_string(),
            ));
        }
        if self.reconnect.base_delay.is_zero() {
            return Err(RealtimeError::InvalidConfig(
                "reconnect base delay must be > 0".to_string(),
            ));
        }
        if self.reconnect.max_delay < self.reconnect.base_delay {
            return Err(RealtimeError::InvalidConfig(
                "reconnect max delay must be >= base delay".to_string(),
            ));
        }
        if self.token_param.is_empty() {
            return Err(RealtimeError::InvalidConfig(
                "token parameter name must not be empty".to_string(),
            ));
        }
        Ok(())
    }

    /// Replaces the reconnect policy.
    #[must_use]
    pub fn with_reconnect(mut self, reconnect: ReconnectPolicy) -> Self {
        self.reconnect = reconnect;
        self
    }

    /// Replaces the connect timeout.
    #[must_use]
    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// Replaces the heartbeat period.
    #[must_use]
    pub fn with_heartbeat_interval(mut self, interval: Duration) -> Self {
        self.heartbeat_interval = interval;
        self
    }

    /// Replaces the liveness policy.
    #[must_use]
    pub fn with_liveness(mut self, liveness: LivenessPolicy) -> Self {
        self.liveness = liveness;
        self
    }

    /// Bounds the outbound queue (`0` = unbounded).
    #[must_use]
    pub fn with_queue_capacity(mut self, capacity: usize) -> Self {
        self.queue_capacity = capacity;
        self
    }

    /// Replaces the credential query parameter name.
    #[must_use]
    pub fn with_token_param(mut self, param: impl Into<String>) -> Self {
        self.token_param = param.into();
        self
    }
}

/// Parses an environment variable as `T`, returning `default` on missing
/// or invalid values.
fn parse_env<T: std::str::FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

/// Parses an environment variable holding milliseconds.
fn parse_env_millis(key: &str, default: Duration) -> Duration {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse::<u64>().ok())
        .map_or(default, Duration::from_millis)
}

/// Accepts `"any"` and `"heartbeat"` (case-insensitive); anything else
/// yields the default.
fn parse_liveness(raw: Option<&str>) -> LivenessPolicy {
    match raw.map(str::to_ascii_lowercase).as_deref() {
        Some("heartbeat") | Some("heartbeat_only") => LivenessPolicy::HeartbeatOnly,
        Some("any") | Some("any_traffic") => LivenessPolicy::AnyTraffic,
        _ => LivenessPolicy::default(),
    }
}
