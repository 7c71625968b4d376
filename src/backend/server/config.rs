/**
 * Server Configuration
 *
 * This module reads process configuration from environment variables and
 * opens the optional PostgreSQL pool.
 *
 * # Configuration Sources
 *
 * Values come from the environment (`.env` is loaded by `main`). Everything
 * except `JWT_SECRET` in production has a development default.
 *
 * | Variable | Default |
 * |----------|---------|
 * | `DATABASE_URL` | unset: in-memory store |
 * | `JWT_SECRET` | development secret (rejected when `APP_ENV=production`) |
 * | `SERVER_PORT` | `8080` |
 * | `CORS_ALLOWED_ORIGINS` | empty (comma-separated list) |
 * | `OGP_SERVICE_URL` | unset: URL-only link previews |
 * | `OGP_TIMEOUT_MS` | `3000`, clamped to `5000` |
 * | `WS_MAX_MESSAGE_SIZE` | `512` |
 * | `WS_PONG_WAIT_SECS` | `60` |
 * | `WS_WRITE_WAIT_SECS` | `10` |
 * | `WS_CLIENT_QUEUE` | `256` |
 * | `HUB_QUEUE` | `1024` |
 * | `STORAGE_ENDPOINT`, `STORAGE_REGION`, `STORAGE_ACCESS_KEY`, `STORAGE_SECRET_KEY`, `STORAGE_BUCKET` | unset |
 *
 * # Error Handling
 *
 * Malformed values are configuration errors. A database that cannot be
 * reached is logged and the server falls back to the in-memory store.
 */
use std::str::FromStr;
use std::time::Duration;

use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;

use crate::shared::config::{AppConfig, ConfigError, RealtimeSettings};

/// Secret used when `JWT_SECRET` is unset outside production
const DEVELOPMENT_JWT_SECRET: &str = "teamchat-development-secret";

const DEFAULT_PORT: u16 = 8080;

/// Object-storage credentials, read at start and handed to the upload service
#[derive(Clone, Default)]
pub struct StorageSettings {
    pub endpoint: Option<String>,
    pub region: Option<String>,
    pub access_key: Option<String>,
    pub secret_key: Option<String>,
    pub bucket: Option<String>,
}

impl std::fmt::Debug for StorageSettings {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StorageSettings")
            .field("endpoint", &self.endpoint)
            .field("region", &self.region)
            .field("bucket", &self.bucket)
            .finish_non_exhaustive()
    }
}

/// Everything the server needs to start
#[derive(Clone)]
pub struct ServerConfig {
    pub database_url: Option<String>,
    pub jwt_secret: String,
    pub port: u16,
    pub app: AppConfig,
    pub storage: StorageSettings,
}

impl std::fmt::Debug for ServerConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServerConfig")
            .field("database_configured", &self.database_url.is_some())
            .field("port", &self.port)
            .field("app", &self.app)
            .field("storage", &self.storage)
            .finish_non_exhaustive()
    }
}

impl ServerConfig {
    /// Read configuration from the process environment
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Read configuration through `lookup`, which maps a variable name to its value
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let get = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

        let production = get("APP_ENV").is_some_and(|env| env.eq_ignore_ascii_case("production"));
        let jwt_secret = match get("JWT_SECRET") {
            Some(secret) => secret,
            None if production => return Err(ConfigError::MissingValue("JWT_SECRET")),
            None => {
                tracing::warn!("JWT_SECRET not set. Using the development secret.");
                DEVELOPMENT_JWT_SECRET.to_string()
            }
        };

        let defaults = RealtimeSettings::default();
        let realtime = RealtimeSettings {
            max_message_size: parse_or(&get, "WS_MAX_MESSAGE_SIZE", defaults.max_message_size)?,
            pong_wait: Duration::from_secs(parse_or(
                &get,
                "WS_PONG_WAIT_SECS",
                defaults.pong_wait.as_secs(),
            )?),
            write_wait: Duration::from_secs(parse_or(
                &get,
                "WS_WRITE_WAIT_SECS",
                defaults.write_wait.as_secs(),
            )?),
            client_queue_capacity: parse_or(&get, "WS_CLIENT_QUEUE", defaults.client_queue_capacity)?,
            hub_queue_capacity: parse_or(&get, "HUB_QUEUE", defaults.hub_queue_capacity)?,
        };

        let cors_allowed_origins = get("CORS_ALLOWED_ORIGINS")
            .map(|list| {
                list.split(',')
                    .map(str::trim)
                    .filter(|o| !o.is_empty())
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default();

        let app = AppConfig::builder()
            .cors_allowed_origins(cors_allowed_origins)
            .ogp_service_url(get("OGP_SERVICE_URL"))
            .ogp_timeout(Duration::from_millis(parse_or(&get, "OGP_TIMEOUT_MS", 3000u64)?))
            .realtime(realtime)
            .build()?;

        Ok(Self {
            database_url: get("DATABASE_URL"),
            jwt_secret,
            port: parse_or(&get, "SERVER_PORT", DEFAULT_PORT)?,
            app,
            storage: StorageSettings {
                endpoint: get("STORAGE_ENDPOINT"),
                region: get("STORAGE_REGION"),
                access_key: get("STORAGE_ACCESS_KEY"),
                secret_key: get("STORAGE_SECRET_KEY"),
                bucket: get("STORAGE_BUCKET"),
            },
        })
    }
}

fn parse_or<T: FromStr>(
    get: &impl Fn(&str) -> Option<String>,
    key: &'static str,
    default: T,
) -> Result<T, ConfigError> {
    match get(key) {
        Some(raw) => raw.parse().map_err(|_| ConfigError::OutOfRange(key)),
        None => Ok(default),
    }
}

/// Connect to PostgreSQL and run migrations
///
/// # Returns
///
/// - `Some(PgPool)` if the database is reachable
/// - `None` if `database_url` is absent or the connection fails
///
/// Migration failures are logged and do not prevent start-up; the schema may
/// already be current.
pub async fn load_database(database_url: Option<&str>) -> Option<PgPool> {
    let Some(database_url) = database_url else {
        tracing::warn!("DATABASE_URL not set. Using the in-memory store; data will not survive restarts.");
        return None;
    };

    tracing::info!("Connecting to database...");

    let pool = match PgPoolOptions::new()
        .max_connections(20)
        .acquire_timeout(Duration::from_secs(5))
        .connect(database_url)
        .await
    {
        Ok(pool) => pool,
        Err(e) => {
            tracing::error!("Failed to create database connection pool: {:?}", e);
            tracing::warn!("Falling back to the in-memory store.");
            return None;
        }
    };

    tracing::info!("Database connection pool created successfully");

    tracing::info!("Running database migrations...");
    match sqlx::migrate!().run(&pool).await {
        Ok(_) => tracing::info!("Database migrations completed successfully"),
        Err(e) => {
            tracing::error!("Failed to run database migrations: {}", e);
            tracing::warn!("Continuing without migrations - database might not be up to date");
        }
    }

    Some(pool)
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
    fn test_defaults() {
        let config = ServerConfig::from_lookup(lookup(&[])).unwrap();
        assert!(config.database_url.is_none());
        assert_eq!(config.jwt_secret, DEVELOPMENT_JWT_SECRET);
        assert_eq!(config.port, 8080);
        assert_eq!(config.app.ogp_timeout, Duration::from_secs(3));
        assert_eq!(config.app.realtime.max_message_size, 512);
        assert_eq!(config.app.realtime.ping_period(), Duration::from_secs(54));
        assert!(config.app.cors_allowed_origins.is_empty());
    }

    #[test]
    fn test_overrides() {
        let config = ServerConfig::from_lookup(lookup(&[
            ("JWT_SECRET", "s3cret"),
            ("SERVER_PORT", "9000"),
            ("CORS_ALLOWED_ORIGINS", "https://app.example.com, https://admin.example.com"),
            ("OGP_TIMEOUT_MS", "9000"),
            ("WS_CLIENT_QUEUE", "16"),
            ("STORAGE_BUCKET", "uploads"),
        ]))
        .unwrap();
        assert_eq!(config.jwt_secret, "s3cret");
        assert_eq!(config.port, 9000);
        assert_eq!(config.app.cors_allowed_origins.len(), 2);
        assert_eq!(config.app.ogp_timeout, Duration::from_secs(5));
        assert_eq!(config.app.realtime.client_queue_capacity, 16);
        assert_eq!(config.storage.bucket.as_deref(), Some("uploads"));
    }

    #[test]
    fn test_production_requires_secret() {
        let err = ServerConfig::from_lookup(lookup(&[("APP_ENV", "production")])).unwrap_err();
        assert!(matches!(err, ConfigError::MissingValue("JWT_SECRET")));
    }

    #[test]
    fn test_malformed_number_rejected() {
        let err = ServerConfig::from_lookup(lookup(&[("SERVER_PORT", "eighty")])).unwrap_err();
        assert!(matches!(err, ConfigError::OutOfRange("SERVER_PORT")));
    }

    #[test]
    fn test_secret_not_in_debug_output() {
        let config = ServerConfig::from_lookup(lookup(&[("JWT_SECRET", "hunter2")])).unwrap();
        assert!(!format!("{:?}", config).contains("hunter2"));
    }
}
