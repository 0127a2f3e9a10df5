use std::collections::BTreeMap;
use std::env;
use std::fmt;
use std::net::{IpAddr, SocketAddr};
use std::str::FromStr;
use std::time::Duration;

use rust_decimal::Decimal;

/// Distinguishes runtime behavior for different stages of the service.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AppEnvironment {
    Development,
    Test,
    Production,
}

impl AppEnvironment {
    fn from_str(value: &str) -> Self {
        match value.trim().to_ascii_lowercase().as_str() {
            "prod" | "production" => Self::Production,
            "test" | "ci" => Self::Test,
            _ => Self::Development,
        }
    }
}

/// Top-level configuration for the application.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub environment: AppEnvironment,
    pub server: ServerConfig,
    pub telemetry: TelemetryConfig,
    pub engine: EngineConfig,
}

impl AppConfig {
    pub fn load() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();

        let environment = AppEnvironment::from_str(
            &env::var("APP_ENV").unwrap_or_else(|_| "development".to_string()),
        );

        let host = env::var("APP_HOST").unwrap_or_else(|_| "127.0.0.1".to_string());
        let port = env::var("APP_PORT")
            .unwrap_or_else(|_| "3000".to_string())
            .parse::<u16>()
            .map_err(|_| ConfigError::InvalidPort)?;

        let log_level = env::var("APP_LOG_LEVEL").unwrap_or_else(|_| "info".to_string());

        Ok(Self {
            environment,
            server: ServerConfig { host, port },
            telemetry: TelemetryConfig { log_level },
            engine: EngineConfig::from_env()?,
        })
    }
}

/// Settings controlling the HTTP server binding.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

impl ServerConfig {
    pub fn socket_addr(&self) -> Result<SocketAddr, ConfigError> {
        if self.host.eq_ignore_ascii_case("localhost") {
            return Ok(SocketAddr::new(IpAddr::from([127, 0, 0, 1]), self.port));
        }

        let ip: IpAddr = self
            .host
            .parse()
            .map_err(|source| ConfigError::InvalidHost { source })?;

        Ok(SocketAddr::new(ip, self.port))
    }
}

/// Tracing and metrics controls.
#[derive(Debug, Clone)]
pub struct TelemetryConfig {
    pub log_level: String,
}

/// Whether reaching the ownership price completes a subscription on its own.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompletionPolicy {
    /// Completion requires a buyout payment or an explicit final-payment action.
    ExplicitOnly,
    /// A qualifying payment that brings `total_paid` to the price completes immediately.
    AutoOnFullPayment,
}

/// Upper bound for every delinquency threshold measured in weeks.
pub const MAX_ESCALATION_WEEKS: u32 = 52;

/// Fleet-wide defaults for pricing, delinquency, and store access.
#[derive(Debug, Clone, PartialEq)]
pub struct EngineConfig {
    pub tax_rate: Decimal,
    pub platform_fee_rate: Decimal,
    pub buyout_multiplier: Decimal,
    pub late_fees: BTreeMap<u32, Decimal>,
    pub suspend_after_weeks: u32,
    pub recovery_after_weeks: u32,
    pub termination_grace_weeks: u32,
    pub completion: CompletionPolicy,
    pub read_retry_attempts: u32,
    pub read_retry_backoff: Duration,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            tax_rate: Decimal::new(6, 3),
            platform_fee_rate: Decimal::new(6, 3),
            buyout_multiplier: Decimal::new(75, 2),
            late_fees: BTreeMap::from([
                (1, Decimal::new(2500, 2)),
                (2, Decimal::new(3500, 2)),
                (3, Decimal::new(5000, 2)),
                (4, Decimal::new(7500, 2)),
            ]),
            suspend_after_weeks: 5,
            recovery_after_weeks: 4,
            termination_grace_weeks: 4,
            completion: CompletionPolicy::ExplicitOnly,
            read_retry_attempts: 3,
            read_retry_backoff: Duration::from_millis(50),
        }
    }
}

impl EngineConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        let defaults = Self::default();

        let mut late_fees = defaults.late_fees.clone();
        for week in 1..=4u32 {
            let key = format!("APP_LATE_FEE_WEEK_{week}");
            if let Some(fee) = parse_env::<Decimal>(&key)? {
                if fee.is_sign_negative() {
                    return Err(ConfigError::InvalidValue { key });
                }
                late_fees.insert(week, fee);
            }
        }

        let completion = match parse_env::<bool>("APP_AUTO_COMPLETE")? {
            Some(true) => CompletionPolicy::AutoOnFullPayment,
            Some(false) => CompletionPolicy::ExplicitOnly,
            None => defaults.completion,
        };

        let config = Self {
            tax_rate: parse_env("APP_TAX_RATE")?.unwrap_or(defaults.tax_rate),
            platform_fee_rate: parse_env("APP_PLATFORM_FEE_RATE")?
                .unwrap_or(defaults.platform_fee_rate),
            buyout_multiplier: parse_env("APP_BUYOUT_MULTIPLIER")?
                .unwrap_or(defaults.buyout_multiplier),
            late_fees,
            suspend_after_weeks: parse_env("APP_SUSPEND_AFTER_WEEKS")?
                .unwrap_or(defaults.suspend_after_weeks),
            recovery_after_weeks: parse_env("APP_RECOVERY_AFTER_WEEKS")?
                .unwrap_or(defaults.recovery_after_weeks),
            termination_grace_weeks: parse_env("APP_TERMINATION_GRACE_WEEKS")?
                .unwrap_or(defaults.termination_grace_weeks),
            completion,
            read_retry_attempts: parse_env("APP_READ_RETRY_ATTEMPTS")?
                .unwrap_or(defaults.read_retry_attempts),
            read_retry_backoff: parse_env::<u64>("APP_READ_RETRY_BACKOFF_MS")?
                .map(Duration::from_millis)
                .unwrap_or(defaults.read_retry_backoff),
        };

        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        let rates = [
            ("APP_TAX_RATE", self.tax_rate),
            ("APP_PLATFORM_FEE_RATE", self.platform_fee_rate),
            ("APP_BUYOUT_MULTIPLIER", self.buyout_multiplier),
        ];
        for (key, rate) in rates {
            if rate.is_sign_negative() || rate > Decimal::ONE {
                return Err(ConfigError::InvalidValue {
                    key: key.to_string(),
                });
            }
        }

        let thresholds = [
            ("APP_SUSPEND_AFTER_WEEKS", self.suspend_after_weeks, 1),
            ("APP_RECOVERY_AFTER_WEEKS", self.recovery_after_weeks, 0),
            ("APP_TERMINATION_GRACE_WEEKS", self.termination_grace_weeks, 0),
        ];
        for (key, weeks, min) in thresholds {
            if !(min..=MAX_ESCALATION_WEEKS).contains(&weeks) {
                return Err(ConfigError::InvalidValue {
                    key: key.to_string(),
                });
            }
        }

        Ok(())
    }
}

fn parse_env<T: FromStr>(key: &str) -> Result<Option<T>, ConfigError> {
    match env::var(key) {
        Ok(raw) => raw
            .trim()
            .parse::<T>()
            .map(Some)
            .map_err(|_| ConfigError::InvalidValue {
                key: key.to_string(),
            }),
        Err(_) => Ok(None),
    }
}

#[derive(Debug)]
pub enum ConfigError {
    InvalidPort,
    InvalidHost { source: std::net::AddrParseError },
    InvalidValue { key: String },
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::InvalidPort => write!(f, "APP_PORT must be a valid u16"),
            ConfigError::InvalidHost { .. } => {
                write!(f, "APP_HOST must parse to an IPv4 or IPv6 address")
            }
            ConfigError::InvalidValue { key } => write!(f, "{key} has an invalid value"),
        }
    }
}

impl std::error::Error for ConfigError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ConfigError::InvalidPort | ConfigError::InvalidValue { .. } => None,
            ConfigError::InvalidHost { source } => Some(source),
        }
    }
}
