//! Logger capability used by the shutdown coordinator.
//!
//! The coordinator never talks to `tracing` directly. It goes through the
//! [`Logger`] trait so callers can silence it ([`NoopLogger`]), capture it in
//! tests, or plug in their own sink. The default sink is [`TracingLogger`],
//! which emits structured events through `tracing`.
//!
//! # Structured Fields
//!
//! Extra context travels as a slice of [`Field`]s. `TracingLogger` renders the
//! slice as one JSON object so it survives both the pretty and JSON formatters:
//!
//! ```text
//! INFO shutdown_manager::logger: Service closed fields={"service":"db"}
//! ```

use serde::Serialize;
use serde_json::{Map, Value};
use tracing_subscriber::EnvFilter;

use crate::config::{Config, LogFormat};

/// A single structured log field.
#[derive(Debug, Clone, PartialEq)]
pub struct Field {
    pub key: &'static str,
    pub value: Value,
}

impl Field {
    pub fn new(key: &'static str, value: impl Into<Value>) -> Self {
        Self {
            key,
            value: value.into(),
        }
    }
}

/// Leveled, fire-and-forget logging capability.
///
/// Implementations must never panic or block for long; the coordinator calls
/// them from inside the closure pass.
pub trait Logger: Send + Sync {
    fn info(&self, message: &str, fields: &[Field]);
    fn debug(&self, message: &str, fields: &[Field]);
    fn warn(&self, message: &str, fields: &[Field]);
    fn error(&self, message: &str, error: &anyhow::Error, fields: &[Field]);
}

/// Logger that discards everything.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopLogger;

impl Logger for NoopLogger {
    fn info(&self, _message: &str, _fields: &[Field]) {}
    fn debug(&self, _message: &str, _fields: &[Field]) {}
    fn warn(&self, _message: &str, _fields: &[Field]) {}
    fn error(&self, _message: &str, _error: &anyhow::Error, _fields: &[Field]) {}
}

/// Default structured sink backed by `tracing`.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingLogger;

impl Logger for TracingLogger {
    fn info(&self, message: &str, fields: &[Field]) {
        if fields.is_empty() {
            tracing::info!("{message}");
        } else {
            tracing::info!(fields = %render_fields(fields), "{message}");
        }
    }

    fn debug(&self, message: &str, fields: &[Field]) {
        if fields.is_empty() {
            tracing::debug!("{message}");
        } else {
            tracing::debug!(fields = %render_fields(fields), "{message}");
        }
    }

    fn warn(&self, message: &str, fields: &[Field]) {
        if fields.is_empty() {
            tracing::warn!("{message}");
        } else {
            tracing::warn!(fields = %render_fields(fields), "{message}");
        }
    }

    fn error(&self, message: &str, error: &anyhow::Error, fields: &[Field]) {
        let error = render_error(error);
        if fields.is_empty() {
            tracing::error!(error = %error, "{message}");
        } else {
            tracing::error!(error = %error, fields = %render_fields(fields), "{message}");
        }
    }
}

/// Serializable view of an error, including its cause chain.
#[derive(Debug, Serialize)]
struct ErrorRecord {
    message: String,
    chain: Vec<String>,
}

fn render_error(error: &anyhow::Error) -> String {
    let record = ErrorRecord {
        message: error.to_string(),
        chain: error.chain().skip(1).map(ToString::to_string).collect(),
    };
    serde_json::to_string(&record).unwrap_or_else(|_| record.message)
}

fn render_fields(fields: &[Field]) -> String {
    let map: Map<String, Value> = fields
        .iter()
        .map(|f| (f.key.to_string(), f.value.clone()))
        .collect();
    Value::Object(map).to_string()
}

/// Install the global `tracing` subscriber.
///
/// Uses `RUST_LOG` when set, falling back to `Config::log_level`. Calling
/// this twice is harmless; the second install is ignored.
pub fn init_tracing(config: &Config) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config.log_level.as_str()));

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_ids(true);

    let _ = match config.log_format {
        LogFormat::Json => builder.json().try_init(),
        LogFormat::Pretty => builder.try_init(),
    };
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_render_fields_as_json_object() {
        let fields = [Field::new("service", "db"), Field::new("attempt", 2)];
        assert_eq!(render_fields(&fields), r#"{"attempt":2,"service":"db"}"#);
    }

    #[test]
    fn test_render_error_includes_chain() {
        let err = anyhow::anyhow!("socket closed").context("flush failed");
        let rendered = render_error(&err);
        let parsed: Value = serde_json::from_str(&rendered).unwrap();

        assert_eq!(parsed["message"], "flush failed");
        assert_eq!(parsed["chain"][0], "socket closed");
    }

    #[test]
    fn test_builtin_loggers_accept_all_levels() {
        let err = anyhow::anyhow!("boom");
        for logger in [&NoopLogger as &dyn Logger, &TracingLogger] {
            logger.info("info", &[]);
            logger.debug("debug", &[Field::new("k", "v")]);
            logger.warn("warn", &[]);
            logger.error("error", &err, &[Field::new("service", "x")]);
        }
    }
}
