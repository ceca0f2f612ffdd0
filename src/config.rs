//! Configuration management for the service host.
//!
//! Configuration is loaded from environment variables following the 12-factor app pattern.

use crate::constants::{
    DEFAULT_MAX_MESSAGE_SIZE, DEFAULT_SHUTDOWN_TIMEOUT, DEFAULT_SHUTDOWN_TIMEOUT_SECS,
};
use crate::error::HostError;
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use std::time::Duration;

/// Name reported when `SQLTOOLS_SERVICE_NAME` is not set.
pub const DEFAULT_SERVICE_NAME: &str = env!("CARGO_PKG_NAME");

/// Host configuration loaded from environment variables.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HostConfig {
    /// Name used in logs.
    pub service_name: String,

    /// How long the shutdown request waits for shutdown tasks.
    pub shutdown_timeout: Duration,

    /// Largest accepted frame payload in bytes.
    pub max_message_size: usize,
}

impl HostConfig {
    /// Load configuration from environment variables.
    ///
    /// # Environment Variables
    ///
    /// - `SQLTOOLS_SHUTDOWN_TIMEOUT`: Shutdown task timeout in seconds (default: 120)
    /// - `SQLTOOLS_MAX_MESSAGE_SIZE`: Maximum frame payload in bytes (default: 64 MiB)
    /// - `SQLTOOLS_SERVICE_NAME`: Service name for logs (default: package name)
    pub fn from_env() -> Result<Self, HostError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load configuration through an arbitrary key lookup.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, HostError> {
        let shutdown_timeout_secs: u64 = parse_var(
            &lookup,
            "SQLTOOLS_SHUTDOWN_TIMEOUT",
            DEFAULT_SHUTDOWN_TIMEOUT_SECS,
        )?;

        let max_message_size: usize =
            parse_var(&lookup, "SQLTOOLS_MAX_MESSAGE_SIZE", DEFAULT_MAX_MESSAGE_SIZE)?;
        if max_message_size == 0 {
            return Err(HostError::config(
                "SQLTOOLS_MAX_MESSAGE_SIZE must be greater than zero",
            ));
        }

        let service_name = lookup("SQLTOOLS_SERVICE_NAME")
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .unwrap_or_else(|| DEFAULT_SERVICE_NAME.to_string());

        Ok(HostConfig {
            service_name,
            shutdown_timeout: Duration::from_secs(shutdown_timeout_secs),
            max_message_size,
        })
    }

    /// Override the shutdown timeout.
    pub fn with_shutdown_timeout(mut self, timeout: Duration) -> Self {
        self.shutdown_timeout = timeout;
        self
    }
}

impl Default for HostConfig {
    fn default() -> Self {
        Self {
            service_name: DEFAULT_SERVICE_NAME.to_string(),
            shutdown_timeout: DEFAULT_SHUTDOWN_TIMEOUT,
            max_message_size: DEFAULT_MAX_MESSAGE_SIZE,
        }
    }
}

fn parse_var<T: FromStr>(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &str,
    default: T,
) -> Result<T, HostError> {
    match lookup(key) {
        None => Ok(default),
        Some(raw) => raw
            .trim()
            .parse()
            .map_err(|_| HostError::config(format!("{key} has an invalid value: {raw:?}"))),
    }
}
