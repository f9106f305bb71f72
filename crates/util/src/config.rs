use std::{env, fmt, net::SocketAddr, time::Duration};

use super::server_bind_address;

pub const DEFAULT_DATABASE_URL: &str = "sqlite://domain-verify.db?mode=rwc";

const DEFAULT_MAX_ATTEMPTS: u32 = 3;
const DEFAULT_MIN_INTERVAL_SECS: u64 = 12 * 60 * 60;
const MAX_MIN_INTERVAL_SECS: u64 = 365 * 24 * 60 * 60;
const DEFAULT_WORKER_TICK_SECS: u64 = 60;
const DEFAULT_BATCH_SIZE: u32 = 100;
const DEFAULT_DNS_TIMEOUT_MS: u64 = 10_000;

/// Application runtime environment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Environment {
    Development,
    Production,
    Test,
}

impl Environment {
    fn from_str(value: &str) -> Result<Self, ConfigError> {
        match value {
            "development" | "dev" => Ok(Self::Development),
            "production" | "prod" => Ok(Self::Production),
            "test" => Ok(Self::Test),
            other => Err(ConfigError::InvalidEnvironment(other.to_string())),
        }
    }

    /// Returns `true` when the current environment should behave as development.
    pub fn is_development(self) -> bool {
        matches!(self, Self::Development)
    }

    /// Returns the canonical name used for logging/metrics labels.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Development => "development",
            Self::Production => "production",
            Self::Test => "test",
        }
    }
}

/// Knobs for the verification flow and the retry worker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VerificationConfig {
    pub max_attempts: u32,
    pub min_interval: Duration,
    pub worker_tick: Duration,
    pub batch_size: u32,
    pub dns_timeout: Duration,
    pub dns_nameserver: Option<SocketAddr>,
}

impl Default for VerificationConfig {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            min_interval: Duration::from_secs(DEFAULT_MIN_INTERVAL_SECS),
            worker_tick: Duration::from_secs(DEFAULT_WORKER_TICK_SECS),
            batch_size: DEFAULT_BATCH_SIZE,
            dns_timeout: Duration::from_millis(DEFAULT_DNS_TIMEOUT_MS),
            dns_nameserver: None,
        }
    }
}

impl VerificationConfig {
    fn from_env() -> Result<Self, ConfigError> {
        let max_attempts = positive("VERIFY_MAX_ATTEMPTS", DEFAULT_MAX_ATTEMPTS as u64)?;
        let min_interval = parse_var("VERIFY_MIN_INTERVAL_SECS", DEFAULT_MIN_INTERVAL_SECS)?;
        if min_interval > MAX_MIN_INTERVAL_SECS {
            return Err(ConfigError::InvalidValue(
                "VERIFY_MIN_INTERVAL_SECS",
                min_interval.to_string(),
            ));
        }
        let worker_tick = positive("VERIFY_WORKER_TICK_SECS", DEFAULT_WORKER_TICK_SECS)?;
        let batch_size = positive("VERIFY_BATCH_SIZE", DEFAULT_BATCH_SIZE as u64)?;
        let dns_timeout = positive("DNS_TIMEOUT_MS", DEFAULT_DNS_TIMEOUT_MS)?;
        let dns_nameserver = match env::var("DNS_NAMESERVER") {
            Ok(value) if !value.trim().is_empty() => Some(
                value
                    .trim()
                    .parse()
                    .map_err(|_| ConfigError::InvalidValue("DNS_NAMESERVER", value))?,
            ),
            _ => None,
        };

        Ok(Self {
            max_attempts: u32::try_from(max_attempts).map_err(|_| {
                ConfigError::InvalidValue("VERIFY_MAX_ATTEMPTS", max_attempts.to_string())
            })?,
            min_interval: Duration::from_secs(min_interval),
            worker_tick: Duration::from_secs(worker_tick),
            batch_size: u32::try_from(batch_size).map_err(|_| {
                ConfigError::InvalidValue("VERIFY_BATCH_SIZE", batch_size.to_string())
            })?,
            dns_timeout: Duration::from_millis(dns_timeout),
            dns_nameserver,
        })
    }
}

/// Runtime configuration resolved from environment variables.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub bind_addr: SocketAddr,
    pub environment: Environment,
    pub database_url: String,
    pub verification: VerificationConfig,
}

impl AppConfig {
    /// Constructs the configuration by reading and validating environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        let env_value = env::var("APP_ENV").unwrap_or_else(|_| "development".to_string());
        let environment = Environment::from_str(&env_value)?;
        let bind_addr = server_bind_address().map_err(ConfigError::BindAddress)?;
        let database_url =
            env::var("DATABASE_URL").unwrap_or_else(|_| DEFAULT_DATABASE_URL.to_string());
        let verification = VerificationConfig::from_env()?;

        Ok(Self {
            bind_addr,
            environment,
            database_url,
            verification,
        })
    }
}

fn parse_var(name: &'static str, default: u64) -> Result<u64, ConfigError> {
    match env::var(name) {
        Ok(value) => value
            .trim()
            .parse()
            .map_err(|_| ConfigError::InvalidValue(name, value)),
        Err(_) => Ok(default),
    }
}

fn positive(name: &'static str, default: u64) -> Result<u64, ConfigError> {
    let value = parse_var(name, default)?;
    if value == 0 {
        return Err(ConfigError::InvalidValue(name, value.to_string()));
    }
    Ok(value)
}

/// Errors that can occur during configuration loading.
#[derive(Debug)]
pub enum ConfigError {
    InvalidEnvironment(String),
    BindAddress(std::net::AddrParseError),
    InvalidValue(&'static str, String),
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidEnvironment(value) => write!(
                f,
                "APP_ENV must be one of 'development', 'production', or 'test' (got {value})"
            ),
            Self::BindAddress(err) => write!(f, "invalid APP_BIND_ADDR value: {err}"),
            Self::InvalidValue(name, value) => write!(f, "invalid {name} value: {value}"),
        }
    }
}

impl std::error::Error for ConfigError {}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{DEFAULT_BIND_ADDR, ENV_GUARD};

    const VERIFY_VARS: &[&str] = &[
        "VERIFY_MAX_ATTEMPTS",
        "VERIFY_MIN_INTERVAL_SECS",
        "VERIFY_WORKER_TICK_SECS",
        "VERIFY_BATCH_SIZE",
        "DNS_TIMEOUT_MS",
        "DNS_NAMESERVER",
        "DATABASE_URL",
    ];

    fn clear_env() {
        env::remove_var("APP_ENV");
        env::remove_var("APP_BIND_ADDR");
        for name in VERIFY_VARS {
            env::remove_var(name);
        }
    }

    #[test]
    fn loads_defaults_in_development() {
        let _guard = ENV_GUARD.lock().expect("env guard poisoned");
        clear_env();

        let config = AppConfig::from_env().expect("config should load with defaults");
        assert_eq!(config.environment, Environment::Development);
        assert_eq!(config.bind_addr.to_string(), DEFAULT_BIND_ADDR);
        assert_eq!(config.database_url, DEFAULT_DATABASE_URL);
        assert_eq!(config.verification, VerificationConfig::default());
    }

    #[test]
    fn rejects_invalid_environment() {
        let _guard = ENV_GUARD.lock().expect("env guard poisoned");
        clear_env();
        env::set_var("APP_ENV", "invalid");

        let err = AppConfig::from_env().expect_err("invalid env should error");
        assert!(matches!(err, ConfigError::InvalidEnvironment(value) if value == "invalid"));

        env::remove_var("APP_ENV");
    }

    #[test]
    fn parses_verification_overrides() {
        let _guard = ENV_GUARD.lock().expect("env guard poisoned");
        clear_env();
        env::set_var("APP_ENV", "production");
        env::set_var("VERIFY_MAX_ATTEMPTS", "5");
        env::set_var("VERIFY_MIN_INTERVAL_SECS", "600");
        env::set_var("DNS_TIMEOUT_MS", "2500");
        env::set_var("DNS_NAMESERVER", "1.1.1.1:53");
        env::set_var("DATABASE_URL", "sqlite::memory:");

        let config = AppConfig::from_env().expect("config should load");
        assert_eq!(config.environment, Environment::Production);
        assert_eq!(config.database_url, "sqlite::memory:");
        assert_eq!(config.verification.max_attempts, 5);
        assert_eq!(config.verification.min_interval, Duration::from_secs(600));
        assert_eq!(config.verification.dns_timeout, Duration::from_millis(2500));
        assert_eq!(
            config.verification.dns_nameserver,
            Some("1.1.1.1:53".parse().unwrap())
        );

        clear_env();
    }

    #[test]
    fn rejects_zero_attempts() {
        let _guard = ENV_GUARD.lock().expect("env guard poisoned");
        clear_env();
        env::set_var("VERIFY_MAX_ATTEMPTS", "0");

        let err = AppConfig::from_env().expect_err("zero attempts should error");
        assert!(matches!(err, ConfigError::InvalidValue("VERIFY_MAX_ATTEMPTS", _)));

        clear_env();
    }

    #[test]
    fn rejects_min_interval_beyond_one_year() {
        let _guard = ENV_GUARD.lock().expect("env guard poisoned");
        clear_env();
        env::set_var("VERIFY_MIN_INTERVAL_SECS", "1000000000000000");

        let err = AppConfig::from_env().expect_err("oversized interval should error");
        assert!(matches!(err, ConfigError::InvalidValue("VERIFY_MIN_INTERVAL_SECS", _)));

        env::set_var("VERIFY_MIN_INTERVAL_SECS", "31536000");
        let config = AppConfig::from_env().expect("one year is accepted");
        assert_eq!(
            config.verification.min_interval,
            Duration::from_secs(31_536_000)
        );

        clear_env();
    }

    #[test]
    fn rejects_unparseable_nameserver() {
        let _guard = ENV_GUARD.lock().expect("env guard poisoned");
        clear_env();
        env::set_var("DNS_NAMESERVER", "dns.example");

        let err = AppConfig::from_env().expect_err("nameserver must be ip:port");
        assert!(matches!(err, ConfigError::InvalidValue("DNS_NAMESERVER", value) if value == "dns.example"));

        clear_env();
    }
}
