//! Process-wide structured logger.

use figment::providers::{Env, Serialized};
use figment::Figment;
use serde::{Deserialize, Serialize};
use slog_scope::GlobalLoggerGuard;
use sloggers::terminal::{Destination, TerminalLoggerBuilder};
use sloggers::types::Severity;
use sloggers::Build;
use std::str::FromStr;

use crate::base::*;

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct LogSettings {
    /// `TENANTSHOP_LOG`: trace, debug, info, warning, error or critical.
    pub log: String,
}

impl Default for LogSettings {
    fn default() -> Self {
        LogSettings {
            log: String::from("info"),
        }
    }
}

impl LogSettings {
    pub fn from_env() -> ShopResult<Self> {
        Figment::from(Serialized::defaults(LogSettings::default()))
            .merge(Env::prefixed("TENANTSHOP_"))
            .extract()
            .map_err(|e| ShopError::Internal(format!("Invalid log settings: {}", e)))
    }

    pub fn severity(&self) -> ShopResult<Severity> {
        Severity::from_str(self.log.trim())
            .map_err(|_| ShopError::Internal(format!("Unknown log level: {}", self.log)))
    }
}

/// Installs the terminal logger; logging stops when the guard is dropped.
pub fn init(settings: &LogSettings) -> ShopResult<GlobalLoggerGuard> {
    let mut builder = TerminalLoggerBuilder::new();
    builder.level(settings.severity()?);
    builder.destination(Destination::Stderr);
    let logger = builder
        .build()
        .map_err(|e| ShopError::Internal(e.to_string()))?;
    Ok(slog_scope::set_global_logger(logger))
}
