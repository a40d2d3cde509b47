use anyhow::Result;
use secrecy::{ExposeSecret, Secret};
use serde::Deserialize;
use std::net::IpAddr;
use validator::Validate;

#[derive(Debug, Deserialize, Clone, Validate)]
pub struct Settings {
    #[validate]
    pub server: ServerSettings,
    #[validate]
    pub database: DatabaseSettings,
    #[validate]
    pub cache: CacheSettings,
    #[validate]
    pub retention: RetentionSettings,
    pub webhook: WebhookSettings,
}

#[derive(Debug, Deserialize, Clone, Validate)]
pub struct ServerSettings {
    #[validate(custom = "validate_socket_addr")]
    pub bind_address: String,
    #[validate(range(min = 1024, max = 65535))]
    pub port: u16,
}

#[derive(Debug, Deserialize, Clone, Validate)]
pub struct DatabaseSettings {
    pub host: String,
    #[validate(range(min = 1024, max = 65535))]
    pub port: u16,
    pub username: String,
    pub password: Secret<String>,
    pub database_name: String,
    pub require_ssl: bool,
    pub min_connections: u32,
    pub max_connections: u32,
}

#[derive(Debug, Deserialize, Clone, Validate)]
pub struct CacheSettings {
    pub redis_url: String,
    pub enabled: bool,
    /// How long a validated key result may be served without a DB probe.
    #[validate(range(min = 1, max = 3600))]
    pub validation_ttl_seconds: u64,
    /// How long the monthly usage count may be served stale.
    #[validate(range(min = 1, max = 600))]
    pub monthly_count_ttl_seconds: u64,
}

#[derive(Debug, Deserialize, Clone, Validate)]
pub struct RetentionSettings {
    #[validate(range(min = 1))]
    pub usage_days: i64,
    #[validate(range(min = 1))]
    pub rate_window_days: i64,
    #[validate(range(min = 60))]
    pub purge_interval_seconds: u64,
}

#[derive(Debug, Deserialize, Clone)]
pub struct WebhookSettings {
    pub signing_secret: Secret<String>,
}

impl Settings {
    pub fn load() -> Result<Self, config::ConfigError> {
        // Load .env file if it exists
        dotenv::dotenv().ok();

        let config_builder = config::Config::builder()
            .add_source(config::File::with_name("config/default"))
            // Environment overrides, e.g. APP_SERVER__PORT=5001
            .add_source(
                config::Environment::with_prefix("APP")
                    .prefix_separator("_")
                    .separator("__"),
            )
            .add_source(config::File::with_name("config/local").required(false));

        config_builder.build()?.try_deserialize()
    }

    pub fn validate_all(&self) -> Result<(), validator::ValidationErrors> {
        self.validate()?;
        self.server.validate()?;
        self.database.validate()?;
        self.cache.validate()?;
        self.retention.validate()?;
        Ok(())
    }
}

fn validate_socket_addr(addr: &str) -> Result<(), validator::ValidationError> {
    addr.parse::<IpAddr>()
        .map(|_| ())
        .map_err(|_| validator::ValidationError::new("invalid_bind_address"))
}

impl DatabaseSettings {
    pub fn connection_string(&self) -> String {
        let ssl_mode = if self.require_ssl { "require" } else { "prefer" };
        format!(
            "postgres://{}:{}@{}:{}/{}?sslmode={}",
            self.username,
            self.password.expose_secret(),
            self.host,
            self.port,
            self.database_name,
            ssl_mode
        )
    }
}
