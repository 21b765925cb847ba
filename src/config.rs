use config::{Config, ConfigError, Environment, File};
use rust_decimal::Decimal;
use serde::Deserialize;
use std::path::Path;
use tracing::info;
use validator::Validate;

/// Default values for configuration
const DEFAULT_LOG_LEVEL: &str = "info";
const DEFAULT_ENV: &str = "development";
const DEFAULT_PORT: u16 = 8080;
const CONFIG_DIR: &str = "config";
const DEFAULT_DB_MAX_CONNECTIONS: u32 = 10;
const DEFAULT_DB_MIN_CONNECTIONS: u32 = 1;
const DEFAULT_DB_CONNECT_TIMEOUT_SECS: u64 = 30;
const DEFAULT_DB_ACQUIRE_TIMEOUT_SECS: u64 = 8;
const DEFAULT_DB_IDLE_TIMEOUT_SECS: u64 = 600;

/// Redirect payment gateway credentials and endpoints.
///
/// The merchant id and shared secret authenticate the server-to-server
/// callback protocol; both must be present before the callback endpoint can
/// be served, so they are validated at startup rather than per request.
#[derive(Clone, Debug, Deserialize, Validate)]
#[serde(deny_unknown_fields)]
pub struct GatewayConfig {
    /// Merchant account identifier assigned by the gateway
    #[validate(length(min = 1))]
    pub merchant_id: String,

    /// Shared secret used in callback checksums. Never logged, never echoed.
    #[validate(length(min = 16))]
    pub secret_key: String,

    /// Gateway URL the customer's browser is redirected to
    #[validate(url)]
    pub payment_url: String,

    /// Base URL the gateway redirects the browser back to after payment
    #[validate(url)]
    pub return_url: String,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            merchant_id: String::new(),
            secret_key: String::new(),
            payment_url: "https://gate.example.com/pay".to_string(),
            return_url: "http://localhost:8080/payment/return".to_string(),
        }
    }
}

/// Delivery pricing captured into each order at creation time.
#[derive(Clone, Debug, Deserialize, Validate)]
#[serde(deny_unknown_fields)]
pub struct DeliveryConfig {
    /// Fee charged for courier delivery
    #[serde(default = "default_courier_fee")]
    pub courier_fee: Decimal,

    /// Fee charged for customer pickup
    #[serde(default)]
    pub pickup_fee: Decimal,
}

impl Default for DeliveryConfig {
    fn default() -> Self {
        Self {
            courier_fee: default_courier_fee(),
            pickup_fee: Decimal::ZERO,
        }
    }
}

/// Application configuration structure with validation
#[derive(Clone, Debug, Deserialize, Validate)]
#[serde(deny_unknown_fields)]
pub struct AppConfig {
    /// Database connection URL
    pub database_url: String,

    /// Server host address
    pub host: String,

    /// Server port
    #[serde(default = "default_port")]
    pub port: u16,

    /// Application environment
    #[serde(default = "default_environment")]
    pub environment: String,

    /// Logging level
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Log in JSON format (structured logging)
    #[serde(default)]
    pub log_json: bool,

    /// Whether to run database migrations on startup
    #[serde(default)]
    pub auto_migrate: bool,

    /// Currency code stamped on new orders
    #[serde(default = "default_currency")]
    pub currency: String,

    /// DB pool: max connections
    #[serde(default = "default_db_max_connections")]
    pub db_max_connections: u32,

    /// DB pool: min connections
    #[serde(default = "default_db_min_connections")]
    pub db_min_connections: u32,

    /// DB timeouts (seconds)
    #[serde(default = "default_db_connect_timeout_secs")]
    pub db_connect_timeout_secs: u64,
    #[serde(default = "default_db_acquire_timeout_secs")]
    pub db_acquire_timeout_secs: u64,
    #[serde(default = "default_db_idle_timeout_secs")]
    pub db_idle_timeout_secs: u64,

    /// Payment gateway credentials (required)
    #[validate]
    pub gateway: GatewayConfig,

    /// Delivery pricing
    #[serde(default)]
    #[validate]
    pub delivery: DeliveryConfig,
}

fn default_port() -> u16 {
    DEFAULT_PORT
}
fn default_environment() -> String {
    DEFAULT_ENV.to_string()
}
fn default_log_level() -> String {
    DEFAULT_LOG_LEVEL.to_string()
}
fn default_currency() -> String {
    "USD".to_string()
}
fn default_courier_fee() -> Decimal {
    Decimal::ZERO
}
fn default_db_max_connections() -> u32 {
    DEFAULT_DB_MAX_CONNECTIONS
}
fn default_db_min_connections() -> u32 {
    DEFAULT_DB_MIN_CONNECTIONS
}
fn default_db_connect_timeout_secs() -> u64 {
    DEFAULT_DB_CONNECT_TIMEOUT_SECS
}
fn default_db_acquire_timeout_secs() -> u64 {
    DEFAULT_DB_ACQUIRE_TIMEOUT_SECS
}
fn default_db_idle_timeout_secs() -> u64 {
    DEFAULT_DB_IDLE_TIMEOUT_SECS
}

impl AppConfig {
    /// Construct a configuration programmatically (used by the test harness).
    pub fn new(
        database_url: impl Into<String>,
        host: impl Into<String>,
        port: u16,
        environment: impl Into<String>,
        gateway: GatewayConfig,
    ) -> Self {
        Self {
            database_url: database_url.into(),
            host: host.into(),
            port,
            environment: environment.into(),
            log_level: default_log_level(),
            log_json: false,
            auto_migrate: false,
            currency: default_currency(),
            db_max_connections: default_db_max_connections(),
            db_min_connections: default_db_min_connections(),
            db_connect_timeout_secs: default_db_connect_timeout_secs(),
            db_acquire_timeout_secs: default_db_acquire_timeout_secs(),
            db_idle_timeout_secs: default_db_idle_timeout_secs(),
            gateway,
            delivery: DeliveryConfig::default(),
        }
    }

    pub fn is_development(&self) -> bool {
        self.environment.eq_ignore_ascii_case("development")
    }

    pub fn log_level(&self) -> &str {
        &self.log_level
    }

    /// Delivery fee for a given delivery method.
    pub fn delivery_fee(&self, method: &crate::entities::order::DeliveryMethod) -> Decimal {
        use crate::entities::order::DeliveryMethod;
        match method {
            DeliveryMethod::Courier => self.delivery.courier_fee,
            DeliveryMethod::Pickup => self.delivery.pickup_fee,
        }
    }
}

/// Loads configuration from `config/default.toml`, an optional
/// `config/{environment}.toml` overlay, and `APP__*` environment variables.
///
/// Gateway credentials are a startup-time requirement: a missing merchant id
/// or shared secret makes the callback endpoint unverifiable, so we fail
/// here instead of per request.
pub fn load_config() -> Result<AppConfig, ConfigError> {
    let environment =
        std::env::var("APP_ENVIRONMENT").unwrap_or_else(|_| DEFAULT_ENV.to_string());

    let mut builder = Config::builder();

    let default_path = Path::new(CONFIG_DIR).join("default.toml");
    if default_path.exists() {
        builder = builder.add_source(File::from(default_path));
    }
    let env_path = Path::new(CONFIG_DIR).join(format!("{environment}.toml"));
    if env_path.exists() {
        builder = builder.add_source(File::from(env_path));
    }

    let cfg: AppConfig = builder
        .add_source(Environment::with_prefix("APP").separator("__"))
        .build()?
        .try_deserialize()?;

    cfg.validate()
        .map_err(|e| ConfigError::Message(format!("invalid configuration: {e}")))?;

    info!(
        environment = %cfg.environment,
        merchant_id = %cfg.gateway.merchant_id,
        "configuration loaded"
    );

    Ok(cfg)
}

/// Initialise the global tracing subscriber.
pub fn init_tracing(log_level: &str, json: bool) {
    use tracing_subscriber::EnvFilter;

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(log_level.to_string()));

    if json {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .json()
            .init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn gateway() -> GatewayConfig {
        GatewayConfig {
            merchant_id: "MERCHANT-001".to_string(),
            secret_key: "a_sufficiently_long_shared_secret".to_string(),
            ..GatewayConfig::default()
        }
    }

    #[test]
    fn missing_merchant_id_fails_validation() {
        let cfg = AppConfig::new(
            "sqlite::memory:",
            "127.0.0.1",
            8080,
            "test",
            GatewayConfig {
                merchant_id: String::new(),
                ..gateway()
            },
        );
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn short_secret_fails_validation() {
        let cfg = AppConfig::new(
            "sqlite::memory:",
            "127.0.0.1",
            8080,
            "test",
            GatewayConfig {
                secret_key: "short".to_string(),
                ..gateway()
            },
        );
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn complete_config_passes_validation() {
        let cfg = AppConfig::new("sqlite::memory:", "127.0.0.1", 8080, "test", gateway());
        assert!(cfg.validate().is_ok());
        assert!(!cfg.is_development());
    }
}
