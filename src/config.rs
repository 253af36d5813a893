//! Application configuration module
//! Handles environment variable loading, configuration validation, and campaign selection

use crate::campaign::{CampaignConfig, DEFAULT_CAMPAIGN};
use std::env;
use std::time::Duration;

/// Upper bound on `DONATION_MAX_RETRIES`; backoff doubles per attempt.
pub const MAX_RETRIES_LIMIT: u32 = 10;

/// Main application configuration
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub api: ApiConfig,
    pub campaign: String,
    pub logging: LoggingConfig,
}

/// Donation backend configuration
#[derive(Debug, Clone)]
pub struct ApiConfig {
    pub base_url: String,
    pub request_timeout: u64, // seconds
    pub max_retries: u32,
}

/// Logging configuration
#[derive(Debug, Clone)]
pub struct LoggingConfig {
    pub level: String,
    pub format: LogFormat,
}

/// Log format options
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LogFormat {
    Json,
    Plain,
}

impl AppConfig {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self, ConfigError> {
        // Load .env file if it exists
        let _ = dotenv::dotenv().ok();

        Ok(AppConfig {
            api: ApiConfig::from_env()?,
            campaign: env::var("DONATION_CAMPAIGN").unwrap_or_else(|_| DEFAULT_CAMPAIGN.to_string()),
            logging: LoggingConfig::from_env()?,
        })
    }

    /// Validate the entire configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.api.validate()?;
        self.logging.validate()?;
        self.campaign_config()?;

        Ok(())
    }

    /// The built-in campaign selected by `DONATION_CAMPAIGN`.
    pub fn campaign_config(&self) -> Result<CampaignConfig, ConfigError> {
        CampaignConfig::by_slug(&self.campaign).ok_or_else(|| {
            ConfigError::ValidationFailed(format!("unknown campaign '{}'", self.campaign))
        })
    }
}

impl ApiConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Ok(ApiConfig {
            base_url: env::var("DONATION_API_BASE_URL")
                .unwrap_or_else(|_| "http://localhost:5000".to_string()),
            request_timeout: env::var("DONATION_REQUEST_TIMEOUT_SECS")
                .unwrap_or_else(|_| "10".to_string())
                .parse()
                .map_err(|_| {
                    ConfigError::InvalidValue("DONATION_REQUEST_TIMEOUT_SECS".to_string())
                })?,
            max_retries: env::var("DONATION_MAX_RETRIES")
                .unwrap_or_else(|_| "2".to_string())
                .parse()
                .map_err(|_| ConfigError::InvalidValue("DONATION_MAX_RETRIES".to_string()))?,
        })
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.base_url.is_empty() {
            return Err(ConfigError::InvalidValue("DONATION_API_BASE_URL".to_string()));
        }

        if !self.base_url.starts_with("http://") && !self.base_url.starts_with("https://") {
            return Err(ConfigError::InvalidValue(
                "DONATION_API_BASE_URL must be a valid URL".to_string(),
            ));
        }

        if self.request_timeout == 0 {
            return Err(ConfigError::InvalidValue(
                "DONATION_REQUEST_TIMEOUT_SECS cannot be 0".to_string(),
            ));
        }

        if self.max_retries > MAX_RETRIES_LIMIT {
            return Err(ConfigError::InvalidValue(format!(
                "DONATION_MAX_RETRIES cannot exceed {}",
                MAX_RETRIES_LIMIT
            )));
        }

        Ok(())
    }
}

impl LoggingConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Ok(LoggingConfig {
            level: env::var("LOG_LEVEL").unwrap_or_else(|_| "INFO".to_string()),
            format: match env::var("LOG_FORMAT")
                .unwrap_or_else(|_| "plain".to_string())
                .to_lowercase()
                .as_str()
            {
                "json" => LogFormat::Json,
                _ => LogFormat::Plain,
            },
        })
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let valid_levels = ["TRACE", "DEBUG", "INFO", "WARN", "ERROR"];
        if !valid_levels.contains(&self.level.to_uppercase().as_str()) {
            return Err(ConfigError::InvalidValue("LOG_LEVEL".to_string()));
        }

        Ok(())
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        LoggingConfig {
            level: "INFO".to_string(),
            format: LogFormat::Plain,
        }
    }
}

/// Configuration error types
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid value for configuration: {0}")]
    InvalidValue(String),

    #[error("Validation failed: {0}")]
    ValidationFailed(String),
}
