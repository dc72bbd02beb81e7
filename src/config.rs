//! Environment-driven configuration for the relay handlers

use std::env;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::error_handling::{ErrorContext, RelayError, RelayResult};

const DEFAULT_SOURCE_NAME: &str = "azure-defender";
const DEFAULT_QUEUE_ID_PREFIX: &str = "event";
const DEFAULT_TEMPLATE_DIR: &str = "templates";
const DEFAULT_MAX_ROWS_PER_FILE: usize = 100_000;
const DEFAULT_ACCOUNT_ID_PATH: &str = "cloud.account.uid";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    Text,
    Json,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RelayConfig {
    /// Outbound queue for forwarded events
    pub queue_url: Option<String>,
    /// Prefix of synthesized batch entry ids
    pub queue_id_prefix: String,
    pub security_lake_bucket: Option<String>,
    /// Key prefix in front of the `accountid=` partition,
    /// e.g. `ext/azure-defender/region=us-east-1`
    pub security_lake_prefix: String,
    /// Account used when a record does not carry one
    pub source_account_id: String,
    /// Dotted path inside an OCSF record holding the account partition value
    pub account_id_path: String,
    /// Logical source stamped into processing metadata
    pub source_name: String,
    pub processor_version: String,
    pub template_dir: PathBuf,
    pub credentials_secret_name: Option<String>,
    pub max_rows_per_file: usize,
    pub log_format: LogFormat,
}

impl RelayConfig {
    pub fn from_env() -> RelayResult<Self> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Build from any key lookup; `from_env` passes the process environment
    pub fn from_lookup<F>(lookup: F) -> RelayResult<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let non_empty = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let max_rows_per_file = match non_empty("MAX_ROWS_PER_FILE") {
            Some(raw) => raw
                .trim()
                .parse::<usize>()
                .with_config_context(|| {
                    format!("MAX_ROWS_PER_FILE must be a positive integer, got '{}'", raw)
                })?,
            None => DEFAULT_MAX_ROWS_PER_FILE,
        };

        let log_format = match non_empty("LOG_FORMAT").as_deref().map(str::to_ascii_lowercase) {
            None => LogFormat::Text,
            Some(f) if f == "text" => LogFormat::Text,
            Some(f) if f == "json" => LogFormat::Json,
            Some(other) => {
                return Err(RelayError::configuration(format!(
                    "LOG_FORMAT must be 'text' or 'json', got '{}'",
                    other
                )))
            }
        };

        let config = RelayConfig {
            queue_url: non_empty("SQS_QUEUE_URL"),
            queue_id_prefix: non_empty("QUEUE_ID_PREFIX")
                .unwrap_or_else(|| DEFAULT_QUEUE_ID_PREFIX.to_string()),
            security_lake_bucket: non_empty("SECURITY_LAKE_BUCKET"),
            security_lake_prefix: non_empty("SECURITY_LAKE_PREFIX")
                .map(|p| p.trim_matches('/').to_string())
                .unwrap_or_else(|| format!("ext/{}", DEFAULT_SOURCE_NAME)),
            source_account_id: non_empty("SOURCE_ACCOUNT_ID")
                .unwrap_or_else(|| "unknown".to_string()),
            account_id_path: non_empty("ACCOUNT_ID_PATH")
                .unwrap_or_else(|| DEFAULT_ACCOUNT_ID_PATH.to_string()),
            source_name: non_empty("SOURCE_NAME")
                .unwrap_or_else(|| DEFAULT_SOURCE_NAME.to_string()),
            processor_version: non_empty("PROCESSOR_VERSION")
                .unwrap_or_else(|| env!("CARGO_PKG_VERSION").to_string()),
            template_dir: non_empty("TEMPLATE_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from(DEFAULT_TEMPLATE_DIR)),
            credentials_secret_name: non_empty("CREDENTIALS_SECRET_NAME"),
            max_rows_per_file,
            log_format,
        };

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> RelayResult<()> {
        if self.max_rows_per_file == 0 {
            return Err(RelayError::configuration("MAX_ROWS_PER_FILE must be greater than zero"));
        }

        let invalid = |c: char| !c.is_ascii_alphanumeric() && c != '-' && c != '_';
        if self.queue_id_prefix.contains(invalid) {
            return Err(RelayError::configuration(
                "QUEUE_ID_PREFIX may only contain alphanumerics, '-' and '_'",
            ));
        }

        if let Some(url) = &self.queue_url {
            if !url.starts_with("https://") && !url.starts_with("http://") {
                return Err(RelayError::configuration(format!(
                    "SQS_QUEUE_URL is not a URL: {}",
                    url
                )));
            }
        }

        Ok(())
    }

    /// Queue url, or a configuration error for handlers that need one
    pub fn require_queue_url(&self) -> RelayResult<&str> {
        self.queue_url
            .as_deref()
            .ok_or_else(|| RelayError::configuration("SQS_QUEUE_URL is not set"))
    }

    pub fn require_security_lake_bucket(&self) -> RelayResult<&str> {
        self.security_lake_bucket
            .as_deref()
            .ok_or_else(|| RelayError::configuration("SECURITY_LAKE_BUCKET is not set"))
    }
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            queue_url: None,
            queue_id_prefix: DEFAULT_QUEUE_ID_PREFIX.to_string(),
            security_lake_bucket: None,
            security_lake_prefix: format!("ext/{}", DEFAULT_SOURCE_NAME),
            source_account_id: "unknown".to_string(),
            account_id_path: DEFAULT_ACCOUNT_ID_PATH.to_string(),
            source_name: DEFAULT_SOURCE_NAME.to_string(),
            processor_version: env!("CARGO_PKG_VERSION").to_string(),
            template_dir: PathBuf::from(DEFAULT_TEMPLATE_DIR),
            credentials_secret_name: None,
            max_rows_per_file: DEFAULT_MAX_ROWS_PER_FILE,
            log_format: LogFormat::Text,
        }
    }
}
