//! Coordinator and process configuration.
//!
//! Two layers live here:
//!
//! - [`CoordinatorConfig`]: the explicit options a [`ShutdownCoordinator`] is
//!   built from (which logger to use, whether to close services in parallel).
//! - [`Config`]: process-level settings loaded from environment variables,
//!   used by binaries to build a `CoordinatorConfig` and install logging.
//!
//! # Environment Variables
//!
//! - `SHUTDOWN_PARALLEL`: Close services concurrently (default: false)
//! - `SHUTDOWN_TIMEOUT_MS`: Deadline for the caller's wait (default: 30000, 0 = none)
//! - `SHUTDOWN_SILENT`: Suppress coordinator log output (default: false)
//! - `LOG_FORMAT`: `pretty` or `json` (default: pretty)
//! - `LOG_LEVEL`: Log filter used when `RUST_LOG` is unset (default: info)
//! - `RUST_LOG`: Log filter; read by the subscriber itself and takes precedence
//!
//! [`ShutdownCoordinator`]: crate::coordinator::ShutdownCoordinator

use std::env;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use crate::error::{ShutdownError, ShutdownResult};
use crate::logger::{Logger, NoopLogger, TracingLogger};

/// Which logger the coordinator reports through.
#[derive(Clone, Default)]
pub enum LoggerChoice {
    /// Structured output through `tracing`.
    #[default]
    Default,
    /// Suppress all coordinator output.
    Silent,
    /// Caller-supplied logger.
    Custom(Arc<dyn Logger>),
}

impl LoggerChoice {
    pub(crate) fn into_logger(self) -> Arc<dyn Logger> {
        match self {
            LoggerChoice::Default => Arc::new(TracingLogger),
            LoggerChoice::Silent => Arc::new(NoopLogger),
            LoggerChoice::Custom(logger) => logger,
        }
    }
}

impl fmt::Debug for LoggerChoice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LoggerChoice::Default => write!(f, "Default"),
            LoggerChoice::Silent => write!(f, "Silent"),
            LoggerChoice::Custom(_) => write!(f, "Custom(..)"),
        }
    }
}

/// Options for constructing a coordinator.
///
/// # Example
///
/// ```rust,ignore
/// let config = CoordinatorConfig::default().parallel(true);
/// let coordinator = ShutdownCoordinator::with_os_signals(config, vec![db, cache]);
/// ```
#[derive(Debug, Clone, Default)]
pub struct CoordinatorConfig {
    pub logger: LoggerChoice,
    /// Close services concurrently instead of in registration order.
    pub parallel: bool,
}

impl CoordinatorConfig {
    pub fn parallel(mut self, parallel: bool) -> Self {
        self.parallel = parallel;
        self
    }

    pub fn logger(mut self, logger: Arc<dyn Logger>) -> Self {
        self.logger = LoggerChoice::Custom(logger);
        self
    }

    pub fn silent(mut self) -> Self {
        self.logger = LoggerChoice::Silent;
        self
    }
}

/// Log output format for [`init_tracing`](crate::logger::init_tracing).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

impl FromStr for LogFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "pretty" | "text" => Ok(LogFormat::Pretty),
            "json" => Ok(LogFormat::Json),
            other => Err(format!("unknown log format '{other}'")),
        }
    }
}

/// Process configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    /// Close services concurrently (default: false)
    pub parallel: bool,

    /// Deadline for the caller's wait on shutdown (default: 30s).
    /// `None` waits until every service has settled.
    pub shutdown_timeout: Option<Duration>,

    /// Suppress coordinator output (default: false)
    pub silent: bool,

    /// Log filter from `LOG_LEVEL`, used when `RUST_LOG` is unset (default: "info")
    pub log_level: String,

    pub log_format: LogFormat,
}

impl Config {
    /// Load configuration from environment variables with sensible defaults.
    ///
    /// # Errors
    ///
    /// Returns `ShutdownError::Config` if any value fails to parse.
    pub fn from_env() -> ShutdownResult<Self> {
        // Load an .env file if present (ignore errors if not found)
        let _ = dotenvy::dotenv();

        let timeout_ms: u64 = Self::parse_env("SHUTDOWN_TIMEOUT_MS", 30_000)?;

        let config = Self {
            parallel: Self::parse_env("SHUTDOWN_PARALLEL", false)?,
            shutdown_timeout: Self::timeout_from_millis(timeout_ms),
            silent: Self::parse_env("SHUTDOWN_SILENT", false)?,
            log_level: env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_string()),
            log_format: match env::var("LOG_FORMAT") {
                Ok(val) => val
                    .parse()
                    .map_err(|e| ShutdownError::Config(format!("Invalid LOG_FORMAT: {e}")))?,
                Err(_) => LogFormat::default(),
            },
        };

        config.validate()?;

        Ok(config)
    }

    fn validate(&self) -> ShutdownResult<()> {
        if self.log_level.trim().is_empty() {
            return Err(ShutdownError::Config(
                "LOG_LEVEL must not be empty".to_string(),
            ));
        }

        Ok(())
    }

    /// Build the coordinator options described by this configuration.
    pub fn coordinator_config(&self) -> CoordinatorConfig {
        let config = CoordinatorConfig::default().parallel(self.parallel);
        if self.silent { config.silent() } else { config }
    }

    /// `0` disables the deadline.
    fn timeout_from_millis(ms: u64) -> Option<Duration> {
        (ms > 0).then(|| Duration::from_millis(ms))
    }

    /// Parse an environment variable into the specified type with a default value.
    fn parse_env<T>(name: &str, default: T) -> ShutdownResult<T>
    where
        T: FromStr,
        T::Err: fmt::Display,
    {
        match env::var(name) {
            Ok(val) => val
                .trim()
                .parse()
                .map_err(|e| ShutdownError::Config(format!("Invalid {name}: {e}"))),
            Err(_) => Ok(default),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            parallel: false,
            shutdown_timeout: Some(Duration::from_secs(30)),
            silent: false,
            log_level: "info".to_string(),
            log_format: LogFormat::Pretty,
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_values() {
        let config = Config::default();

        assert!(!config.parallel);
        assert!(!config.silent);
        assert_eq!(config.shutdown_timeout, Some(Duration::from_secs(30)));
        assert_eq!(config.log_format, LogFormat::Pretty);
    }

    #[test]
    fn test_zero_timeout_disables_deadline() {
        assert_eq!(Config::timeout_from_millis(0), None);
        assert_eq!(
            Config::timeout_from_millis(250),
            Some(Duration::from_millis(250))
        );
    }

    #[test]
    fn test_log_format_parsing() {
        assert_eq!("json".parse::<LogFormat>().unwrap(), LogFormat::Json);
        assert_eq!(" Pretty ".parse::<LogFormat>().unwrap(), LogFormat::Pretty);
        assert!("xml".parse::<LogFormat>().is_err());
    }

    #[test]
    fn test_coordinator_config_mapping() {
        let config = Config {
            parallel: true,
            silent: true,
            ..Config::default()
        };

        let coordinator = config.coordinator_config();
        assert!(coordinator.parallel);
        assert!(matches!(coordinator.logger, LoggerChoice::Silent));

        let coordinator = Config::default().coordinator_config();
        assert!(!coordinator.parallel);
        assert!(matches!(coordinator.logger, LoggerChoice::Default));
    }

    #[test]
    fn test_validate_empty_log_level() {
        let config = Config {
            log_level: "  ".to_string(),
            ..Config::default()
        };

        let result = config.validate();
        assert!(result.is_err());
        assert!(result.unwrap_err().to_string().contains("LOG_LEVEL"));
    }

    #[test]
    fn test_validate_valid_config() {
        assert!(Config::default().validate().is_ok());
    }
}
