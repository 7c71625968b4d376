//! Application configuration module
//!
//! Server-independent configuration values with a builder and validation.
//! The backend fills an `AppConfig` from the environment and validates it
//! before start-up.

use std::time::Duration;

use thiserror::Error;

/// Realtime tuning shared by the hub and the connection handler
#[derive(Debug, Clone)]
pub struct RealtimeSettings {
    /// Maximum inbound frame size in bytes
    pub max_message_size: usize,
    /// Idle timeout; the peer must send something (usually a pong) within it
    pub pong_wait: Duration,
    /// Deadline for a single outbound write
    pub write_wait: Duration,
    /// Outbound queue slots per client before slow-consumer eviction
    pub client_queue_capacity: usize,
    /// Capacity of each hub control-plane queue
    pub hub_queue_capacity: usize,
}

impl RealtimeSettings {
    /// Ping interval, nine tenths of the pong deadline
    pub fn ping_period(&self) -> Duration {
        self.pong_wait * 9 / 10
    }
}

impl Default for RealtimeSettings {
    fn default() -> Self {
        Self {
            max_message_size: 512,
            pong_wait: Duration::from_secs(60),
            write_wait: Duration::from_secs(10),
            client_queue_capacity: 256,
            hub_queue_capacity: 1024,
        }
    }
}

/// Application configuration
#[derive(Debug, Clone, Default)]
pub struct AppConfig {
    /// Allowed CORS origins; empty means same-origin only
    pub cors_allowed_origins: Vec<String>,
    /// Base URL of the external OGP metadata service
    pub ogp_service_url: Option<String>,
    /// Timeout for a single OGP fetch
    pub ogp_timeout: Duration,
    pub realtime: RealtimeSettings,
}

/// Longest OGP fetch the pipeline will wait for
pub const MAX_OGP_TIMEOUT: Duration = Duration::from_secs(5);

impl AppConfig {
    /// Create a new AppConfigBuilder
    pub fn builder() -> AppConfigBuilder {
        AppConfigBuilder::default()
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        if let Some(url) = &self.ogp_service_url {
            url::Url::parse(url).map_err(|_| ConfigError::InvalidUrl(url.clone()))?;
        }
        for origin in &self.cors_allowed_origins {
            url::Url::parse(origin).map_err(|_| ConfigError::InvalidUrl(origin.clone()))?;
        }
        if self.ogp_timeout.is_zero() || self.ogp_timeout > MAX_OGP_TIMEOUT {
            return Err(ConfigError::OutOfRange("ogp_timeout"));
        }
        if self.realtime.max_message_size == 0 {
            return Err(ConfigError::OutOfRange("max_message_size"));
        }
        if self.realtime.client_queue_capacity == 0 || self.realtime.hub_queue_capacity == 0 {
            return Err(ConfigError::OutOfRange("queue_capacity"));
        }
        if self.realtime.pong_wait.is_zero() || self.realtime.write_wait.is_zero() {
            return Err(ConfigError::OutOfRange("socket_timeouts"));
        }
        Ok(())
    }
}

/// Builder for AppConfig
#[derive(Debug, Default)]
pub struct AppConfigBuilder {
    cors_allowed_origins: Vec<String>,
    ogp_service_url: Option<String>,
    ogp_timeout: Option<Duration>,
    realtime: Option<RealtimeSettings>,
}

impl AppConfigBuilder {
    pub fn cors_allowed_origins(mut self, origins: Vec<String>) -> Self {
        self.cors_allowed_origins = origins;
        self
    }

    pub fn ogp_service_url(mut self, url: Option<String>) -> Self {
        self.ogp_service_url = url;
        self
    }

    /// Requested timeout; values above five seconds are clamped
    pub fn ogp_timeout(mut self, timeout: Duration) -> Self {
        self.ogp_timeout = Some(timeout.min(MAX_OGP_TIMEOUT));
        self
    }

    pub fn realtime(mut self, realtime: RealtimeSettings) -> Self {
        self.realtime = Some(realtime);
        self
    }

    /// Build and validate the configuration
    pub fn build(self) -> Result<AppConfig, ConfigError> {
        let config = AppConfig {
            cors_allowed_origins: self.cors_allowed_origins,
            ogp_service_url: self.ogp_service_url,
            ogp_timeout: self.ogp_timeout.unwrap_or(Duration::from_secs(3)),
            realtime: self.realtime.unwrap_or_default(),
        };
        config.validate()?;
        Ok(config)
    }
}

/// Configuration errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid URL: {0}")]
    InvalidUrl(String),
    #[error("missing value: {0}")]
    MissingValue(&'static str),
    #[error("value out of range: {0}")]
    OutOfRange(&'static str),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = AppConfig::builder().build().unwrap();
        assert_eq!(config.ogp_timeout, Duration::from_secs(3));
        assert_eq!(config.realtime.max_message_size, 512);
        assert_eq!(config.realtime.client_queue_capacity, 256);
        assert_eq!(config.realtime.ping_period(), Duration::from_secs(54));
    }

    #[test]
    fn test_ogp_timeout_is_clamped() {
        let config = AppConfig::builder()
            .ogp_timeout(Duration::from_secs(30))
            .build()
            .unwrap();
        assert_eq!(config.ogp_timeout, MAX_OGP_TIMEOUT);
    }

    #[test]
    fn test_invalid_origin_rejected() {
        let result = AppConfig::builder()
            .cors_allowed_origins(vec!["not a url".to_string()])
            .build();
        assert!(matches!(result, Err(ConfigError::InvalidUrl(_))));
    }

    #[test]
    fn test_zero_queue_rejected() {
        let realtime = RealtimeSettings {
            client_queue_capacity: 0,
            ..RealtimeSettings::default()
        };
        let result = AppConfig::builder().realtime(realtime).build();
        assert!(matches!(result, Err(ConfigError::OutOfRange(_))));
    }
}
