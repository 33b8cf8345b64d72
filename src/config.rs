use http::{HeaderName, HeaderValue};
use std::time::Duration;
use url::Url;

/// Environment variable holding the claims API base URL
pub const API_URL_ENV: &str = "CLAIMS_API_URL";
/// Environment variable overriding the derived stream URL
pub const STREAM_URL_ENV: &str = "CLAIMS_STREAM_URL";

const DEFAULT_API_BASE: &str = "http://localhost:8000";
const DEFAULT_STREAM_PATH: &str = "/ws/claims";

/// Configuration for the realtime claims stream
#[derive(Debug, Clone)]
pub struct RealtimeConfig {
    /// Base URL of the claims API (`http://` or `https://`)
    pub api_base: String,
    /// Path of the event feed, appended to the API base path
    pub stream_path: String,
    /// Explicit stream URL; skips derivation from `api_base` when set
    pub stream_url: Option<String>,
    /// Connection-related settings
    pub connection: ConnectionConfig,
    /// Backoff settings for reconnection
    pub backoff: BackoffConfig,
    /// Health monitoring settings
    pub health: HealthConfig,
}

impl Default for RealtimeConfig {
    fn default() -> Self {
        Self {
            api_base: DEFAULT_API_BASE.to_string(),
            stream_path: DEFAULT_STREAM_PATH.to_string(),
            stream_url: None,
            connection: ConnectionConfig::default(),
            backoff: BackoffConfig::default(),
            health: HealthConfig::default(),
        }
    }
}

impl RealtimeConfig {
    /// Create a new builder for configuration
    pub fn builder() -> RealtimeConfigBuilder {
        RealtimeConfigBuilder::default()
    }

    /// Build a validated configuration from `CLAIMS_API_URL` and
    /// `CLAIMS_STREAM_URL`, falling back to defaults for unset variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut builder = Self::builder();
        if let Ok(base) = std::env::var(API_URL_ENV) {
            builder = builder.api_base(base);
        }
        if let Ok(url) = std::env::var(STREAM_URL_ENV) {
            builder = builder.stream_url(url);
        }
        builder.build()
    }

    /// Resolve the WebSocket endpoint for the event feed.
    ///
    /// The scheme follows the API's own scheme (`http` → `ws`,
    /// `https` → `wss`) and the feed path is appended to the API base path.
    pub fn stream_url(&self) -> Result<Url, ConfigError> {
        match &self.stream_url {
            Some(explicit) => {
                let url = Url::parse(explicit)
                    .map_err(|e| ConfigError::InvalidEndpoint(format!("{}: {}", explicit, e)))?;
                match url.scheme() {
                    "ws" | "wss" => Ok(url),
                    other => Err(ConfigError::InvalidEndpoint(format!(
                        "stream URL scheme must be ws or wss, got {}",
                        other
                    ))),
                }
            }
            None => derive_stream_url(&self.api_base, &self.stream_path),
        }
    }
}

fn derive_stream_url(api_base: &str, stream_path: &str) -> Result<Url, ConfigError> {
    let mut url = Url::parse(api_base)
        .map_err(|e| ConfigError::InvalidEndpoint(format!("{}: {}", api_base, e)))?;

    let scheme = match url.scheme() {
        "https" | "wss" => "wss",
        "http" | "ws" => "ws",
        other => {
            return Err(ConfigError::InvalidEndpoint(format!(
                "unsupported API scheme: {}",
                other
            )))
        }
    };
    url.set_scheme(scheme).map_err(|_| {
        ConfigError::InvalidEndpoint(format!("cannot map {} to {}", api_base, scheme))
    })?;

    let path = format!(
        "{}/{}",
        url.path().trim_end_matches('/'),
        stream_path.trim_start_matches('/')
    );
    url.set_path(&path);
    url.set_query(None);
    url.set_fragment(None);
    Ok(url)
}

/// Builder for RealtimeConfig
#[derive(Debug, Clone, Default)]
pub struct RealtimeConfigBuilder {
    config: RealtimeConfig,
}

impl RealtimeConfigBuilder {
    /// Set the claims API base URL
    pub fn api_base(mut self, base: impl Into<String>) -> Self {
        self.config.api_base = base.into();
        self
    }

    /// Set the feed path appended to the API base
    pub fn stream_path(mut self, path: impl Into<String>) -> Self {
        self.config.stream_path = path.into();
        self
    }

    /// Use an explicit `ws://` or `wss://` URL
    pub fn stream_url(mut self, url: impl Into<String>) -> Self {
        self.config.stream_url = Some(url.into());
        self
    }

    /// Set connection configuration
    pub fn connection(mut self, config: ConnectionConfig) -> Self {
        self.config.connection = config;
        self
    }

    /// Set backoff configuration
    pub fn backoff(mut self, config: BackoffConfig) -> Self {
        self.config.backoff = config;
        self
    }

    /// Set health configuration
    pub fn health(mut self, config: HealthConfig) -> Self {
        self.config.health = config;
        self
    }

    /// Add a header sent with every handshake (e.g. `Authorization`)
    pub fn header(mut self, name: HeaderName, value: HeaderValue) -> Self {
        self.config.connection.headers.push((name, value));
        self
    }

    /// Build the configuration with validation.
    pub fn build(self) -> Result<RealtimeConfig, ConfigError> {
        let backoff = &self.config.backoff;
        if backoff.initial_delay.is_zero() {
            return Err(ConfigError::InvalidBackoff(
                "initial_delay must be > 0".to_string(),
            ));
        }
        if backoff.max_delay < backoff.initial_delay {
            return Err(ConfigError::InvalidBackoff(
                "max_delay must be >= initial_delay".to_string(),
            ));
        }
        if !(backoff.multiplier >= 1.0) {
            return Err(ConfigError::InvalidBackoff(
                "multiplier must be >= 1".to_string(),
            ));
        }

        let health = &self.config.health;
        if health.enabled {
            if health.pong_timeout > health.ping_interval {
                return Err(ConfigError::InvalidHealth(
                    "pong_timeout should be <= ping_interval".to_string(),
                ));
            }
            if health.failure_threshold == 0 {
                return Err(ConfigError::InvalidHealth(
                    "failure_threshold cannot be 0".to_string(),
                ));
            }
        }

        if self.config.connection.command_buffer == 0 {
            return Err(ConfigError::InvalidConnection(
                "command_buffer cannot be 0".to_string(),
            ));
        }

        self.config.stream_url()?;

        Ok(self.config)
    }
}

/// Configuration validation errors
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    /// Invalid backoff configuration
    #[error("Invalid backoff configuration: {0}")]
    InvalidBackoff(String),
    /// Invalid health configuration
    #[error("Invalid health configuration: {0}")]
    InvalidHealth(String),
    /// Invalid connection configuration
    #[error("Invalid connection configuration: {0}")]
    InvalidConnection(String),
    /// Stream endpoint cannot be resolved
    #[error("Invalid stream endpoint: {0}")]
    InvalidEndpoint(String),
}

/// Connection-related configuration
#[derive(Debug, Clone)]
pub struct ConnectionConfig {
    /// Timeout for establishing a connection (TCP, TLS and handshake)
    pub connect_timeout: Duration,
    /// Extra headers sent with the WebSocket handshake
    pub headers: Vec<(HeaderName, HeaderValue)>,
    /// Capacity of the outbound command queue
    pub command_buffer: usize,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(10),
            headers: Vec::new(),
            command_buffer: 100,
        }
    }
}

/// Backoff configuration for reconnection
#[derive(Debug, Clone)]
pub struct BackoffConfig {
    /// Delay before the first retry; also the floor for every retry
    pub initial_delay: Duration,
    /// Maximum delay between reconnection attempts
    pub max_delay: Duration,
    /// Multiplier applied per consecutive failed attempt (1.0 = constant delay)
    pub multiplier: f64,
    /// Whether to add random jitter above the floor
    pub jitter: bool,
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_secs(3),
            max_delay: Duration::from_secs(30),
            multiplier: 2.0,
            jitter: true,
        }
    }
}

impl BackoffConfig {
    /// Constant delay between every attempt
    pub fn constant(delay: Duration) -> Self {
        Self {
            initial_delay: delay,
            max_delay: delay,
            multiplier: 1.0,
            jitter: false,
        }
    }

    /// Calculate the delay after `failures` consecutive failed attempts.
    ///
    /// Never returns less than `initial_delay`; jitter only spreads the part
    /// above the floor.
    pub fn delay_for_attempt(&self, failures: u32) -> Duration {
        let floor = self.initial_delay.as_millis() as f64;
        let base_delay = floor * self.multiplier.powi(failures.min(i32::MAX as u32) as i32);
        let capped_delay = base_delay.min(self.max_delay.as_millis() as f64).max(floor);

        if self.jitter {
            let jittered = floor + rand::random::<f64>() * (capped_delay - floor);
            Duration::from_millis(jittered as u64)
        } else {
            Duration::from_millis(capped_delay as u64)
        }
    }
}

/// Health monitoring configuration
#[derive(Debug, Clone)]
pub struct HealthConfig {
    /// Whether ping/pong and data-timeout checks run at all
    pub enabled: bool,
    /// Interval for sending WebSocket pings
    pub ping_interval: Duration,
    /// Timeout for receiving a pong response
    pub pong_timeout: Duration,
    /// Reconnect when no data frame arrives for this long
    pub data_timeout: Option<Duration>,
    /// Number of consecutive missed pongs before marking unhealthy
    pub failure_threshold: u32,
}

impl Default for HealthConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            ping_interval: Duration::from_secs(20),
            pong_timeout: Duration::from_secs(10),
            // Claim activity can be quiet for long stretches
            data_timeout: None,
            failure_threshold: 3,
        }
    }
}

impl HealthConfig {
    /// No pings and no data timeout; the connection lives until the peer or
    /// the network ends it.
    pub fn disabled() -> Self {
        Self {
            enabled: false,
            ..Self::default()
        }
    }
}
