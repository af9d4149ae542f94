use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;
use std::env;
use std::path::Path;
use thiserror::Error;
use tracing::{error, info};
use validator::{Validate, ValidationError, ValidationErrors};

/// Default values for configuration
const DEFAULT_LOG_LEVEL: &str = "info";
const DEFAULT_ENV: &str = "development";
const DEFAULT_PORT: u16 = 8080;
const CONFIG_DIR: &str = "config";
const DEFAULT_CURRENCY: &str = "COP";
const DEFAULT_COD_REGION: &str = "Antioquia";
const DEFAULT_STORE_NAME: &str = "Tienda";

/// How an order and its dependent rows are written.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderWriteMode {
    /// Header, items and shipping record inside one database transaction.
    #[default]
    Transactional,
    /// Three independent writes; a failure after the header leaves a partial order.
    Sequential,
}

/// One step of the volume discount table.
#[derive(Clone, Debug, Deserialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct DiscountTierConfig {
    /// Tax-inclusive cart total at which the tier starts (inclusive)
    pub threshold: i64,
    /// Discount percentage applied from this threshold upwards
    pub percent: u32,
}

/// Pricing configuration. Amounts are in whole currency units.
#[derive(Clone, Debug, Deserialize, Validate)]
#[serde(deny_unknown_fields)]
pub struct PricingConfig {
    /// Tax rate already included in every catalog price
    #[serde(default = "default_tax_rate_percent")]
    #[validate(range(max = 100))]
    pub tax_rate_percent: u32,

    /// Decimal places of the currency's minor unit (COP has none)
    #[serde(default)]
    #[validate(range(max = 4))]
    pub minor_units: u32,

    /// Discount tiers, ascending by threshold
    #[serde(default = "default_discount_tiers")]
    pub discount_tiers: Vec<DiscountTierConfig>,

    /// Shipping is free when the pre-discount subtotal is strictly above this
    #[serde(default = "default_free_shipping_threshold")]
    pub free_shipping_threshold: i64,

    /// Flat fee inside the cash-on-delivery region
    #[serde(default = "default_regional_shipping_fee")]
    pub regional_shipping_fee: i64,

    /// Flat fee everywhere else
    #[serde(default = "default_nationwide_shipping_fee")]
    pub nationwide_shipping_fee: i64,
}

impl Default for PricingConfig {
    fn default() -> Self {
        Self {
            tax_rate_percent: default_tax_rate_percent(),
            minor_units: 0,
            discount_tiers: default_discount_tiers(),
            free_shipping_threshold: default_free_shipping_threshold(),
            regional_shipping_fee: default_regional_shipping_fee(),
            nationwide_shipping_fee: default_nationwide_shipping_fee(),
        }
    }
}

/// Payment gateway (ePayco checkout) settings
#[derive(Clone, Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct GatewayConfig {
    /// Public key handed to the gateway's checkout widget
    #[serde(default)]
    pub public_key: Option<String>,

    /// Run the gateway in test mode
    #[serde(default = "default_true_bool")]
    pub test_mode: bool,

    /// Page the customer is sent to after paying
    #[serde(default)]
    pub response_url: Option<String>,

    /// Server-to-server confirmation URL
    #[serde(default)]
    pub confirmation_url: Option<String>,

    /// How long a checkout waits for the gateway response (seconds)
    #[serde(default = "default_gateway_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            public_key: None,
            test_mode: true,
            response_url: None,
            confirmation_url: None,
            timeout_secs: default_gateway_timeout_secs(),
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
    pub environment: String,

    /// Logging level
    #[serde(default = "default_log_level")]
    #[validate(custom = "validate_log_level")]
    pub log_level: String,

    /// Log in JSON format (structured logging)
    #[serde(default)]
    pub log_json: bool,

    /// Whether to run database migrations on startup
    #[serde(default)]
    pub auto_migrate: bool,

    /// DB pool: max connections
    #[serde(default = "default_db_max_connections")]
    pub db_max_connections: u32,

    /// DB pool: min connections
    #[serde(default = "default_db_min_connections")]
    pub db_min_connections: u32,

    /// DB timeouts (seconds)
    #[serde(default = "default_db_connect_timeout_secs")]
    pub db_connect_timeout_secs: u64,
    #[serde(default = "default_db_idle_timeout_secs")]
    pub db_idle_timeout_secs: u64,
    #[serde(default = "default_db_acquire_timeout_secs")]
    pub db_acquire_timeout_secs: u64,

    /// Store name shown on the gateway checkout
    #[serde(default = "default_store_name")]
    pub store_name: String,

    /// ISO 4217 currency code
    #[serde(default = "default_currency")]
    #[validate(length(min = 3, max = 3))]
    pub currency: String,

    /// Region whose orders are paid cash on delivery
    #[serde(default = "default_cod_region")]
    #[validate(length(min = 1))]
    pub cod_region: String,

    /// Offset from UTC used to date order references
    #[serde(default = "default_store_utc_offset_hours")]
    #[validate(range(min = -12, max = 14))]
    pub store_utc_offset_hours: i32,

    /// Order persistence strategy
    #[serde(default)]
    pub order_write_mode: OrderWriteMode,

    /// Attempts at inserting an order header when references collide
    #[serde(default = "default_reference_max_attempts")]
    #[validate(range(min = 1, max = 10))]
    pub reference_max_attempts: u32,

    /// Upper bound for persisting an order (seconds)
    #[serde(default = "default_persistence_timeout_secs")]
    pub persistence_timeout_secs: u64,

    /// Idle time after which a checkout session is forgotten (seconds)
    #[serde(default = "default_session_ttl_secs")]
    #[validate(range(min = 60))]
    pub session_ttl_secs: u64,

    /// How often expired sessions and payment attempts are swept (seconds)
    #[serde(default = "default_sweep_interval_secs")]
    #[validate(range(min = 1))]
    pub sweep_interval_secs: u64,

    /// Confirmation-email endpoint; notifications are only logged when unset
    #[serde(default)]
    pub notification_endpoint: Option<String>,

    /// Timeout for the confirmation-email call (seconds)
    #[serde(default = "default_notification_timeout_secs")]
    pub notification_timeout_secs: u64,

    /// Pricing configuration
    #[serde(default)]
    #[validate]
    pub pricing: PricingConfig,

    /// Payment gateway configuration
    #[serde(default)]
    pub gateway: GatewayConfig,
}

impl AppConfig {
    /// Creates a configuration with defaults for everything but the essentials
    pub fn new(database_url: String, host: String, port: u16, environment: String) -> Self {
        Self {
            database_url,
            host,
            port,
            environment,
            log_level: default_log_level(),
            log_json: false,
            auto_migrate: false,
            db_max_connections: default_db_max_connections(),
            db_min_connections: default_db_min_connections(),
            db_connect_timeout_secs: default_db_connect_timeout_secs(),
            db_idle_timeout_secs: default_db_idle_timeout_secs(),
            db_acquire_timeout_secs: default_db_acquire_timeout_secs(),
            store_name: default_store_name(),
            currency: default_currency(),
            cod_region: default_cod_region(),
            store_utc_offset_hours: default_store_utc_offset_hours(),
            order_write_mode: OrderWriteMode::default(),
            reference_max_attempts: default_reference_max_attempts(),
            persistence_timeout_secs: default_persistence_timeout_secs(),
            session_ttl_secs: default_session_ttl_secs(),
            sweep_interval_secs: default_sweep_interval_secs(),
            notification_endpoint: None,
            notification_timeout_secs: default_notification_timeout_secs(),
            pricing: PricingConfig::default(),
            gateway: GatewayConfig::default(),
        }
    }

    /// Gets database URL reference
    pub fn database_url(&self) -> &str {
        &self.database_url
    }

    /// Checks if running in production environment
    pub fn is_production(&self) -> bool {
        self.environment.eq_ignore_ascii_case("production")
    }

    /// Gets log level reference
    pub fn log_level(&self) -> &str {
        &self.log_level
    }

    /// Cross-field checks the derive cannot express
    fn validate_additional_constraints(&self) -> Result<(), ValidationErrors> {
        let mut errors = ValidationErrors::new();

        let tiers = &self.pricing.discount_tiers;
        let ascending = tiers
            .windows(2)
            .all(|w| w[0].threshold < w[1].threshold && w[0].percent <= w[1].percent);
        if !ascending || tiers.iter().any(|t| t.threshold < 0 || t.percent > 100) {
            let mut err = ValidationError::new("discount_tiers");
            err.message = Some(
                "discount tiers must have increasing thresholds and non-decreasing percentages"
                    .into(),
            );
            errors.add("discount_tiers", err);
        }

        let fees = [
            self.pricing.free_shipping_threshold,
            self.pricing.regional_shipping_fee,
            self.pricing.nationwide_shipping_fee,
        ];
        if fees.iter().any(|fee| *fee < 0) {
            let mut err = ValidationError::new("shipping_fees");
            err.message = Some("shipping amounts cannot be negative".into());
            errors.add("shipping_fees", err);
        }

        if self.is_production() && self.gateway.public_key.is_none() {
            let mut err = ValidationError::new("gateway.public_key");
            err.message = Some("a gateway public key is required in production".into());
            errors.add("gateway", err);
        }

        if errors.errors().is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }
}

/// Configuration loading errors
#[derive(Debug, Error)]
pub enum AppConfigError {
    #[error("Configuration loading failed: {0}")]
    Load(#[from] ConfigError),

    #[error("Configuration validation failed: {0}")]
    Validation(#[from] validator::ValidationErrors),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Default value functions
fn default_log_level() -> String {
    DEFAULT_LOG_LEVEL.to_string()
}

fn default_port() -> u16 {
    DEFAULT_PORT
}

fn default_db_max_connections() -> u32 {
    16
}
fn default_db_min_connections() -> u32 {
    2
}
fn default_db_connect_timeout_secs() -> u64 {
    30
}
fn default_db_idle_timeout_secs() -> u64 {
    600
}
fn default_db_acquire_timeout_secs() -> u64 {
    8
}

fn default_true_bool() -> bool {
    true
}

fn default_store_name() -> String {
    DEFAULT_STORE_NAME.to_string()
}

fn default_currency() -> String {
    DEFAULT_CURRENCY.to_string()
}

fn default_cod_region() -> String {
    DEFAULT_COD_REGION.to_string()
}

fn default_store_utc_offset_hours() -> i32 {
    -5 // America/Bogota, no DST
}

fn default_reference_max_attempts() -> u32 {
    5
}

fn default_persistence_timeout_secs() -> u64 {
    15
}

fn default_session_ttl_secs() -> u64 {
    24 * 60 * 60
}

fn default_sweep_interval_secs() -> u64 {
    300
}

fn default_notification_timeout_secs() -> u64 {
    10
}

fn default_gateway_timeout_secs() -> u64 {
    600
}

fn default_tax_rate_percent() -> u32 {
    4
}

fn default_discount_tiers() -> Vec<DiscountTierConfig> {
    vec![
        DiscountTierConfig {
            threshold: 200_000,
            percent: 5,
        },
        DiscountTierConfig {
            threshold: 300_000,
            percent: 10,
        },
        DiscountTierConfig {
            threshold: 500_000,
            percent: 15,
        },
    ]
}

fn default_free_shipping_threshold() -> i64 {
    200_000
}

fn default_regional_shipping_fee() -> i64 {
    10_000
}

fn default_nationwide_shipping_fee() -> i64 {
    18_000
}

/// Validates log level values
fn validate_log_level(level: &str) -> Result<(), ValidationError> {
    let valid_levels = ["trace", "debug", "info", "warn", "error"];
    if valid_levels.contains(&level.to_lowercase().as_str()) {
        Ok(())
    } else {
        let mut err = ValidationError::new("log_level");
        err.message = Some("Must be one of: trace, debug, info, warn, error".into());
        Err(err)
    }
}

/// Initializes tracing using the provided log level as the default filter
pub fn init_tracing(level: &str, json: bool) {
    use tracing_subscriber::{fmt, EnvFilter};

    let default_directive = format!("storefront_checkout={},tower_http=debug", level);
    let filter_directive = env::var("RUST_LOG")
        .ok()
        .filter(|s| !s.trim().is_empty())
        .unwrap_or(default_directive);

    let filter = EnvFilter::new(filter_directive);
    if json {
        let _ = fmt().with_env_filter(filter).json().try_init();
    } else {
        let _ = fmt().with_env_filter(filter).try_init();
    }
}

/// Loads application configuration
///
/// Layers configuration sources in this order:
/// 1. Built-in defaults
/// 2. Default config (config/default.toml)
/// 3. Environment-specific config (config/{env}.toml)
/// 4. Environment variables (APP__*)
pub fn load_config() -> Result<AppConfig, AppConfigError> {
    // Support both RUN_ENV and APP_ENV for selecting config profile
    let run_env = env::var("RUN_ENV")
        .or_else(|_| env::var("APP_ENV"))
        .unwrap_or_else(|_| DEFAULT_ENV.to_string());
    info!("Loading configuration for environment: {}", run_env);

    if !Path::new(CONFIG_DIR).exists() {
        info!(
            "Config directory '{}' not found; relying on built-in defaults and environment variables",
            CONFIG_DIR
        );
    }

    let config = Config::builder()
        .set_default("database_url", "sqlite://storefront.db?mode=rwc")?
        .set_default("host", "0.0.0.0")?
        .set_default("port", DEFAULT_PORT as i64)?
        .set_default("environment", DEFAULT_ENV)?
        .set_default("log_level", DEFAULT_LOG_LEVEL)?
        .set_default("log_json", false)?
        .add_source(File::with_name(&format!("{}/default", CONFIG_DIR)).required(false))
        .add_source(File::with_name(&format!("{}/{}", CONFIG_DIR, run_env)).required(false))
        .add_source(Environment::with_prefix("APP").separator("__"))
        .build()?;

    let app_config: AppConfig = config.try_deserialize()?;

    app_config.validate().map_err(|e| {
        error!("Configuration validation failed: {:?}", e);
        AppConfigError::Validation(e)
    })?;

    app_config.validate_additional_constraints().map_err(|e| {
        error!("Configuration constraint validation failed: {:?}", e);
        AppConfigError::Validation(e)
    })?;

    info!("Configuration loaded successfully");
    Ok(app_config)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base_config() -> AppConfig {
        AppConfig::new(
            "sqlite::memory:".into(),
            "127.0.0.1".into(),
            8080,
            "development".into(),
        )
    }

    #[test]
    fn defaults_describe_the_colombian_store() {
        let cfg = base_config();
        assert_eq!(cfg.currency, "COP");
        assert_eq!(cfg.cod_region, "Antioquia");
        assert_eq!(cfg.pricing.tax_rate_percent, 4);
        assert_eq!(cfg.pricing.discount_tiers.len(), 3);
        assert_eq!(cfg.order_write_mode, OrderWriteMode::Transactional);
        assert!(cfg.validate().is_ok());
        assert!(cfg.validate_additional_constraints().is_ok());
    }

    #[test]
    fn unsorted_discount_tiers_are_rejected() {
        let mut cfg = base_config();
        cfg.pricing.discount_tiers.swap(0, 2);
        assert!(cfg.validate_additional_constraints().is_err());
    }

    #[test]
    fn production_requires_gateway_key() {
        let mut cfg = base_config();
        cfg.environment = "production".into();
        assert!(cfg.validate_additional_constraints().is_err());

        cfg.gateway.public_key = Some("pk_live".into());
        assert!(cfg.validate_additional_constraints().is_ok());
    }

    #[test]
    fn invalid_log_level_fails_validation() {
        let mut cfg = base_config();
        cfg.log_level = "loud".into();
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn write_mode_deserializes_from_snake_case() {
        let mode: OrderWriteMode = serde_json::from_str("\"sequential\"").unwrap();
        assert_eq!(mode, OrderWriteMode::Sequential);
    }
}
