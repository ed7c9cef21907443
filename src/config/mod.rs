//! Configuration module for the upload relay
//!
//! Handles loading and parsing of YAML configuration files with support for
//! environment variable expansion and validation at startup.

use serde::{Deserialize, Serialize};
use std::path::Path;
use thiserror::Error;

mod loader;

pub use loader::ConfigLoader;

/// Validate that a URL starts with http:// or https://
fn is_valid_http_url(url: &str) -> bool {
    url.starts_with("http://") || url.starts_with("https://")
}

/// Configuration errors
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Failed to parse config: {0}")]
    ParseError(#[from] serde_yaml::Error),

    #[error("Invalid configuration: {0}")]
    ValidationError(String),
}

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub server: ServerConfig,
    pub s3: S3Config,
    /// Base URL prepended to object keys when deriving the public URL
    /// returned by upload-complete. No trailing slash.
    pub public_base_url: String,
}

impl Config {
    /// Load configuration from a file
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        ConfigLoader::load(path)
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.s3.bucket.is_empty() {
            return Err(ConfigError::ValidationError(
                "s3.bucket must not be empty".into(),
            ));
        }

        if self.s3.region.is_empty() {
            return Err(ConfigError::ValidationError(
                "s3.region must not be empty".into(),
            ));
        }

        if let Some(ref endpoint) = self.s3.endpoint {
            if !is_valid_http_url(endpoint) {
                return Err(ConfigError::ValidationError(
                    "s3.endpoint must start with http:// or https://".into(),
                ));
            }
        }

        if self.s3.max_attempts == 0 {
            return Err(ConfigError::ValidationError(
                "s3.max_attempts must be at least 1".into(),
            ));
        }

        if !is_valid_http_url(&self.public_base_url) {
            return Err(ConfigError::ValidationError(
                "public_base_url must start with http:// or https://".into(),
            ));
        }

        if self.server.max_body_size == 0 {
            return Err(ConfigError::ValidationError(
                "server.max_body_size must be greater than 0".into(),
            ));
        }

        Ok(())
    }
}

/// Server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Primary listen address (served over TLS when `tls` is configured)
    pub address: String,

    /// Address of the plain-HTTP listener used when TLS material cannot be
    /// loaded. Exists so certificate-issuance handshakes can still complete.
    #[serde(default = "default_fallback_address")]
    pub fallback_address: String,

    /// TLS certificate material. When absent the server listens on plain
    /// HTTP at `address` without attempting the TLS branch.
    #[serde(default)]
    pub tls: Option<TlsConfig>,

    /// Per-request body-size ceiling in bytes, applied to JSON and raw
    /// binary bodies alike.
    #[serde(default = "default_max_body_size")]
    pub max_body_size: usize,

    /// Transport-level request timeout in seconds. Kept generous so large
    /// part uploads over slow links are not aborted mid-transfer.
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,
}

fn default_fallback_address() -> String {
    "0.0.0.0:80".to_string()
}

fn default_max_body_size() -> usize {
    104857600 // 100MB
}

fn default_request_timeout() -> u64 {
    300 // 5 minutes
}

/// TLS certificate configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TlsConfig {
    /// PEM certificate chain, e.g. /etc/letsencrypt/live/<domain>/fullchain.pem
    pub cert_path: String,
    /// PEM private key, e.g. /etc/letsencrypt/live/<domain>/privkey.pem
    pub key_path: String,
}

/// S3 backend configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct S3Config {
    pub bucket: String,
    pub region: String,
    #[serde(default)]
    pub endpoint: Option<String>,
    #[serde(default)]
    pub access_key: Option<String>,
    #[serde(default)]
    pub secret_key: Option<String>,

    /// Retry ceiling for transient backend failures
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// Socket connect and per-operation timeout in seconds. Must match the
    /// transport timeout ceiling or large transfers abort on one layer.
    #[serde(default = "default_s3_timeout")]
    pub timeout_secs: u64,
}

fn default_max_attempts() -> u32 {
    5
}

fn default_s3_timeout() -> u64 {
    300 // 5 minutes
}
