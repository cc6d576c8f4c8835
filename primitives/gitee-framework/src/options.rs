//! Command-line option groups shared by every robot.
//!
//! A robot flattens [`ServiceOptions`] and [`GiteeOptions`] into its own
//! `clap` parser and validates both before starting any agent.

use std::{
    path::{Path, PathBuf},
    time::Duration,
};

use clap::{Args, ValueEnum};
use reqwest::Url;

/// Default Gitee API endpoint.
pub const DEFAULT_ENDPOINT: &str = "https://gitee.com/api/v5";

/// Errors reported by option validation.
#[derive(Debug, thiserror::Error)]
pub enum OptionsError {
    #[error("port must be non-zero")]
    InvalidPort,

    #[error("missing config-file")]
    MissingConfigFile,

    #[error("missing token-path")]
    MissingTokenPath,

    #[error("invalid gitee-endpoint '{endpoint}': {reason}")]
    InvalidEndpoint { endpoint: String, reason: String },
}

/// Output format for log lines.
#[derive(ValueEnum, Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum LogFormat {
    #[default]
    Json,
    Text,
}

/// Service-level options: listener, shutdown and config file.
#[derive(Args, Debug, Clone)]
pub struct ServiceOptions {
    /// Port to listen on.
    #[arg(long, env = "ROBOT_PORT", default_value = "8888")]
    pub port: u16,

    /// Seconds to keep handling in-flight events after a shutdown signal.
    #[arg(long = "grace-period", env = "ROBOT_GRACE_PERIOD", default_value = "180")]
    pub grace_period_secs: u64,

    /// Path to the robot config file.
    #[arg(long, env = "ROBOT_CONFIG_FILE")]
    pub config_file: Option<PathBuf>,

    /// Log output format.
    #[arg(long, env = "ROBOT_LOG_FORMAT", value_enum, default_value = "json")]
    pub log_format: LogFormat,
}

impl ServiceOptions {
    pub fn grace_period(&self) -> Duration {
        Duration::from_secs(self.grace_period_secs)
    }

    pub fn config_path(&self) -> Result<&Path, OptionsError> {
        self.config_file
            .as_deref()
            .filter(|p| !p.as_os_str().is_empty())
            .ok_or(OptionsError::MissingConfigFile)
    }

    pub fn validate(&self) -> Result<(), OptionsError> {
        if self.port == 0 {
            return Err(OptionsError::InvalidPort);
        }

        self.config_path()?;
        Ok(())
    }
}

/// Platform-level options: token location and API endpoint.
#[derive(Args, Debug, Clone)]
pub struct GiteeOptions {
    /// Path to the file holding the Gitee access token.
    #[arg(long, env = "GITEE_TOKEN_PATH", default_value = "/etc/gitee/oauth")]
    pub token_path: PathBuf,

    /// Gitee API endpoint.
    #[arg(long, env = "GITEE_ENDPOINT", default_value = DEFAULT_ENDPOINT)]
    pub gitee_endpoint: String,

    /// Optional path to the webhook secret used to check `X-Gitee-Token`.
    #[arg(long, env = "GITEE_WEBHOOK_SECRET_PATH")]
    pub webhook_secret_path: Option<PathBuf>,
}

impl GiteeOptions {
    /// Checks the options are well formed. File existence is left to the
    /// secret agent.
    pub fn validate(&self) -> Result<(), OptionsError> {
        if self.token_path.as_os_str().is_empty() {
            return Err(OptionsError::MissingTokenPath);
        }

        let invalid = |reason: String| OptionsError::InvalidEndpoint {
            endpoint: self.gitee_endpoint.clone(),
            reason,
        };

        let url = Url::parse(&self.gitee_endpoint).map_err(|e| invalid(e.to_string()))?;
        if !matches!(url.scheme(), "http" | "https") {
            return Err(invalid(format!("unsupported scheme '{}'", url.scheme())));
        }

        Ok(())
    }

    /// Every secret file the robot needs loaded at startup.
    pub fn secret_paths(&self) -> Vec<PathBuf> {
        let mut paths = vec![self.token_path.clone()];
        paths.extend(self.webhook_secret_path.clone());
        paths
    }
}
