use std::env;
use std::fmt;
use std::net::{IpAddr, SocketAddr};
use std::path::PathBuf;
use std::time::Duration;

use crate::workflows::clearance::{ReapplicationPolicy, RetryPolicy};

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
    pub workflow: WorkflowConfig,
}

const DEFAULT_DEPARTMENTS: &str = "library:Library,hostel:Hostel,accounts:Accounts";

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

        let departments = match env::var("CLEARANCE_DEPARTMENTS_CSV") {
            Ok(path) if !path.trim().is_empty() => DepartmentSource::Csv(PathBuf::from(path)),
            _ => DepartmentSource::Inline(
                env::var("CLEARANCE_DEPARTMENTS")
                    .unwrap_or_else(|_| DEFAULT_DEPARTMENTS.to_string()),
            ),
        };

        let cooldown_hours = number_var("CLEARANCE_REAPPLY_COOLDOWN_HOURS", 0)?;
        let reapplication = ReapplicationPolicy {
            max_reapplications: number_var("CLEARANCE_MAX_REAPPLICATIONS", 5)? as u32,
            max_per_department: number_var("CLEARANCE_MAX_DEPARTMENT_REAPPLICATIONS", 5)? as u32,
            cooldown: (cooldown_hours > 0).then(|| chrono::Duration::hours(cooldown_hours as i64)),
        };

        let finalization = RetryPolicy {
            max_attempts: number_var("CLEARANCE_FINALIZE_MAX_ATTEMPTS", 5)? as u32,
            initial_backoff: Duration::from_millis(number_var(
                "CLEARANCE_FINALIZE_BACKOFF_MS",
                500,
            )?),
            max_backoff: Duration::from_millis(number_var(
                "CLEARANCE_FINALIZE_MAX_BACKOFF_MS",
                30_000,
            )?),
        };

        let sweep_interval =
            Duration::from_secs(positive_number_var("CLEARANCE_SWEEP_INTERVAL_SECS", 300)?);

        Ok(Self {
            environment,
            server: ServerConfig { host, port },
            telemetry: TelemetryConfig { log_level },
            workflow: WorkflowConfig {
                departments,
                reapplication,
                finalization,
                sweep_interval,
            },
        })
    }
}

fn number_var(key: &'static str, default: u64) -> Result<u64, ConfigError> {
    match env::var(key) {
        Ok(raw) if !raw.trim().is_empty() => raw
            .trim()
            .parse::<u64>()
            .map_err(|_| ConfigError::InvalidNumber { key }),
        _ => Ok(default),
    }
}

fn positive_number_var(key: &'static str, default: u64) -> Result<u64, ConfigError> {
    match number_var(key, default)? {
        0 => Err(ConfigError::InvalidNumber { key }),
        value => Ok(value),
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

/// Where the required department list comes from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DepartmentSource {
    /// `id:Name` pairs separated by commas.
    Inline(String),
    Csv(PathBuf),
}

/// Clearance workflow knobs: department set, reapplication ceiling and finalization retries.
#[derive(Debug, Clone)]
pub struct WorkflowConfig {
    pub departments: DepartmentSource,
    pub reapplication: ReapplicationPolicy,
    pub finalization: RetryPolicy,
    pub sweep_interval: Duration,
}

#[derive(Debug)]
pub enum ConfigError {
    InvalidPort,
    InvalidHost { source: std::net::AddrParseError },
    InvalidNumber { key: &'static str },
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::InvalidPort => write!(f, "APP_PORT must be a valid u16"),
            ConfigError::InvalidHost { .. } => {
                write!(f, "APP_HOST must parse to an IPv4 or IPv6 address")
            }
            ConfigError::InvalidNumber { key } => {
                write!(f, "{key} must be an integer within its allowed range")
            }
        }
    }
}

impl std::error::Error for ConfigError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ConfigError::InvalidPort | ConfigError::InvalidNumber { .. } => None,
            ConfigError::InvalidHost { source } => Some(source),
        }
    }
}
