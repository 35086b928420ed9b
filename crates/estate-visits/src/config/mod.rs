use std::env;
use std::fmt;
use std::net::{IpAddr, SocketAddr};
use std::str::FromStr;
use std::time::Duration;

use chrono_tz::Tz;

use crate::workflows::visits::{PgSettings, SchedulingPolicy};

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
    pub database: DatabaseConfig,
    pub scheduling: SchedulingPolicy,
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

        let database = DatabaseConfig {
            url: env::var("DATABASE_URL")
                .ok()
                .filter(|url| !url.trim().is_empty()),
            max_connections: parse_var("DATABASE_MAX_CONNECTIONS", 5)?,
            lock_timeout_ms: parse_var("VISITS_LOCK_TIMEOUT_MS", 5_000)?,
        };

        let timezone = match env::var("VISITS_TIMEZONE") {
            Ok(name) => name
                .trim()
                .parse::<Tz>()
                .map_err(|_| ConfigError::InvalidTimezone { value: name })?,
            Err(_) => Tz::UTC,
        };
        let defaults = SchedulingPolicy::default();
        let scheduling = SchedulingPolicy {
            timezone,
            min_lead_days: parse_var("VISITS_MIN_LEAD_DAYS", defaults.min_lead_days)?,
            cancellation_cutoff_hours: parse_var(
                "VISITS_CANCELLATION_CUTOFF_HOURS",
                defaults.cancellation_cutoff_hours,
            )?,
            max_confirmed_same_property: parse_var(
                "VISITS_MAX_CONFIRMED_SAME_PROPERTY",
                defaults.max_confirmed_same_property,
            )?,
            max_distinct_properties_for_agent: parse_var(
                "VISITS_MAX_DISTINCT_PROPERTIES_FOR_AGENT",
                defaults.max_distinct_properties_for_agent,
            )?,
        };

        Ok(Self {
            environment,
            server: ServerConfig { host, port },
            telemetry: TelemetryConfig { log_level },
            database,
            scheduling,
        })
    }
}

fn parse_var<T: FromStr>(name: &'static str, default: T) -> Result<T, ConfigError> {
    match env::var(name) {
        Ok(raw) => raw
            .trim()
            .parse::<T>()
            .map_err(|_| ConfigError::InvalidNumber { name, value: raw }),
        Err(_) => Ok(default),
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

/// Visit storage. Without a URL the service keeps visits in memory.
#[derive(Debug, Clone)]
pub struct DatabaseConfig {
    pub url: Option<String>,
    pub max_connections: u32,
    pub lock_timeout_ms: u64,
}

impl DatabaseConfig {
    pub fn lock_timeout(&self) -> Duration {
        Duration::from_millis(self.lock_timeout_ms)
    }

    /// PostgreSQL connection settings, when a database is configured.
    pub fn postgres(&self) -> Option<PgSettings> {
        self.url.as_ref().map(|url| PgSettings {
            url: url.clone(),
            max_connections: self.max_connections,
            lock_timeout: self.lock_timeout(),
        })
    }

    pub fn require_postgres(&self) -> Result<PgSettings, ConfigError> {
        self.postgres().ok_or(ConfigError::MissingDatabaseUrl)
    }
}

#[derive(Debug)]
pub enum ConfigError {
    InvalidPort,
    InvalidHost { source: std::net::AddrParseError },
    InvalidTimezone { value: String },
    InvalidNumber { name: &'static str, value: String },
    MissingDatabaseUrl,
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::InvalidPort => write!(f, "APP_PORT must be a valid u16"),
            ConfigError::InvalidHost { .. } => {
                write!(f, "APP_HOST must parse to an IPv4 or IPv6 address")
            }
            ConfigError::InvalidTimezone { value } => {
                write!(f, "VISITS_TIMEZONE '{value}' is not an IANA timezone name")
            }
            ConfigError::InvalidNumber { name, value } => {
                write!(f, "{name} must be a non-negative integer, got '{value}'")
            }
            ConfigError::MissingDatabaseUrl => {
                write!(f, "DATABASE_URL is required for this command")
            }
        }
    }
}

impl std::error::Error for ConfigError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ConfigError::InvalidHost { source } => Some(source),
            ConfigError::InvalidPort
            | ConfigError::InvalidTimezone { .. }
            | ConfigError::InvalidNumber { .. }
            | ConfigError::MissingDatabaseUrl => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::env;
    use std::sync::{Mutex, OnceLock};

    const VARS: &[&str] = &[
        "APP_ENV",
        "APP_HOST",
        "APP_PORT",
        "APP_LOG_LEVEL",
        "DATABASE_URL",
        "DATABASE_MAX_CONNECTIONS",
        "VISITS_TIMEZONE",
        "VISITS_MIN_LEAD_DAYS",
        "VISITS_CANCELLATION_CUTOFF_HOURS",
        "VISITS_MAX_CONFIRMED_SAME_PROPERTY",
        "VISITS_MAX_DISTINCT_PROPERTIES_FOR_AGENT",
        "VISITS_LOCK_TIMEOUT_MS",
    ];

    fn env_guard() -> &'static Mutex<()> {
        static GUARD: OnceLock<Mutex<()>> = OnceLock::new();
        GUARD.get_or_init(|| Mutex::new(()))
    }

    fn reset_env() {
        for name in VARS {
            env::remove_var(name);
        }
    }

    #[test]
    fn load_uses_defaults_when_env_missing() {
        let _lock = env_guard().lock().expect("env mutex poisoned");
        reset_env();
        let config = AppConfig::load().expect("config loads with defaults");
        assert_eq!(config.environment, AppEnvironment::Development);
        assert_eq!(config.server.host, "127.0.0.1");
        assert_eq!(config.server.port, 3000);
        assert_eq!(config.telemetry.log_level, "info");
        assert!(config.database.url.is_none());
        assert!(config.database.postgres().is_none());
        assert_eq!(config.database.lock_timeout(), Duration::from_secs(5));
        assert_eq!(config.scheduling, SchedulingPolicy::default());
    }

    #[test]
    fn accepts_localhost_host() {
        let _lock = env_guard().lock().expect("env mutex poisoned");
        reset_env();
        env::set_var("APP_HOST", "localhost");
        let config = AppConfig::load().expect("config loads");
        let addr = config.server.socket_addr().expect("localhost resolves");
        assert_eq!(addr, SocketAddr::new(IpAddr::from([127, 0, 0, 1]), 3000));
        reset_env();
    }

    #[test]
    fn scheduling_overrides_are_applied() {
        let _lock = env_guard().lock().expect("env mutex poisoned");
        reset_env();
        env::set_var("VISITS_TIMEZONE", "Europe/Paris");
        env::set_var("VISITS_MAX_CONFIRMED_SAME_PROPERTY", "5");
        env::set_var("VISITS_CANCELLATION_CUTOFF_HOURS", "48");
        env::set_var("DATABASE_URL", "postgres://visits@localhost/visits");
        env::set_var("VISITS_LOCK_TIMEOUT_MS", "250");

        let config = AppConfig::load().expect("config loads");
        assert_eq!(config.scheduling.timezone, chrono_tz::Europe::Paris);
        assert_eq!(config.scheduling.max_confirmed_same_property, 5);
        assert_eq!(config.scheduling.cancellation_cutoff_hours, 48);
        assert_eq!(config.scheduling.min_lead_days, 1);

        let pg = config.database.postgres().expect("database configured");
        assert_eq!(pg.url, "postgres://visits@localhost/visits");
        assert_eq!(pg.max_connections, 5);
        assert_eq!(pg.lock_timeout, Duration::from_millis(250));
        reset_env();
    }

    #[test]
    fn rejects_unknown_timezone_and_bad_numbers() {
        let _lock = env_guard().lock().expect("env mutex poisoned");
        reset_env();
        env::set_var("VISITS_TIMEZONE", "Mars/Olympus_Mons");
        let err = AppConfig::load().expect_err("timezone rejected");
        assert!(matches!(err, ConfigError::InvalidTimezone { .. }));

        reset_env();
        env::set_var("VISITS_MIN_LEAD_DAYS", "-1");
        let err = AppConfig::load().expect_err("negative lead time rejected");
        assert!(err.to_string().contains("VISITS_MIN_LEAD_DAYS"));
        reset_env();
    }
}
