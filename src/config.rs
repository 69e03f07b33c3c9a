use anyhow::{Context, Result};
use serde::Deserialize;
use serde::Serialize;
use std::fs::read_to_string;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::CalendlyError;

/// Application-wide settings
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    /// Calendly API settings
    #[serde(default)]
    pub calendly: CalendlyConfig,

    /// Settings for the SSE transport
    #[serde(default)]
    pub server: ServerConfig,
}

/// Calendly API settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CalendlyConfig {
    /// Base URL of the v2 API
    #[serde(default = "default_api_base")]
    pub api_base: String,

    /// Per-request timeout in seconds
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,

    /// Environment variable holding the personal access token
    #[serde(default = "default_token_env")]
    pub token_env: String,
}

/// SSE transport settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Address the HTTP listener binds to
    #[serde(default = "default_bind")]
    pub bind: String,
}

impl Default for CalendlyConfig {
    fn default() -> Self {
        Self {
            api_base: default_api_base(),
            timeout_secs: default_timeout_secs(),
            token_env: default_token_env(),
        }
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
        }
    }
}

impl CalendlyConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

// defaults
fn default_api_base() -> String {
    "https://api.calendly.com".to_string()
}

fn default_timeout_secs() -> u64 {
    30
}

fn default_token_env() -> String {
    "CALENDLY_TOKEN".to_string()
}

fn default_bind() -> String {
    "127.0.0.1:8000".to_string()
}

/// Bearer token captured once at startup.
///
/// Handlers ask this value for the token instead of reading the environment
/// themselves, so a missing token turns into an error envelope rather than a
/// crash.
#[derive(Clone)]
pub struct Credentials {
    var: String,
    token: Option<String>,
}

impl Credentials {
    /// Read the token from `var`. Unset and empty values both count as missing.
    pub fn from_env(var: &str) -> Self {
        let token = std::env::var(var).ok();
        Self::new(var, token)
    }

    pub fn new(var: &str, token: Option<String>) -> Self {
        let token = token.filter(|t| !t.trim().is_empty());
        Self {
            var: var.to_string(),
            token,
        }
    }

    pub fn is_present(&self) -> bool {
        self.token.is_some()
    }

    pub fn token(&self) -> Result<&str, CalendlyError> {
        self.token.as_deref().ok_or_else(|| CalendlyError::MissingToken {
            var: self.var.clone(),
        })
    }
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("var", &self.var)
            .field("token", &self.token.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

/// Read a configuration file
pub fn load_config<P: AsRef<Path>>(path: P) -> Result<AppConfig> {
    let path = path.as_ref();
    let config_str = read_to_string(path)
        .with_context(|| format!("Failed to read config file {}", path.display()))?;

    let config: AppConfig = toml::from_str(&config_str)
        .with_context(|| format!("Failed to parse config file {}", path.display()))?;

    Ok(config)
}

/// `$XDG_CONFIG_HOME/calendly_mcp/config.toml`
pub fn default_config_path() -> Option<PathBuf> {
    let config_dir = match std::env::var("XDG_CONFIG_HOME") {
        Ok(dir) if !dir.is_empty() => PathBuf::from(dir),
        _ => dirs::config_dir()?,
    };
    Some(config_dir.join("calendly_mcp").join("config.toml"))
}

/// An explicit path must load. Without one, the default location is used if a
/// file exists there, and built-in defaults otherwise.
pub fn resolve_config(explicit: Option<&Path>) -> Result<AppConfig> {
    if let Some(path) = explicit {
        return load_config(path);
    }

    match default_config_path() {
        Some(path) if path.exists() => load_config(&path),
        _ => Ok(AppConfig::default()),
    }
}
