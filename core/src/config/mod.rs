//! Kernel configuration
//!
//! Service endpoints and local paths are resolved once, when the kernel is
//! constructed: TOML file first, then environment overrides.

use crate::error::{KernelError, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

const CONFIG_FILE_NAME: &str = "bakery.toml";

/// Environment variables that override file settings
pub const ENV_COMPILER_URL: &str = "BRANE_COMPILER_URL";
pub const ENV_DRIVER_URL: &str = "BRANE_DRV_URL";
pub const ENV_API_URL: &str = "BRANE_API_URL";
pub const ENV_DATA_DIR: &str = "BRANE_DATA_DIR";

/// How invocations are observed
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum StrategyKind {
    /// Stream when an execution endpoint is configured, poll otherwise
    #[default]
    Auto,
    Poll,
    Stream,
}

impl std::str::FromStr for StrategyKind {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "auto" => Ok(StrategyKind::Auto),
            "poll" | "rest" => Ok(StrategyKind::Poll),
            "stream" | "push" => Ok(StrategyKind::Stream),
            _ => Err(format!("Unknown strategy: {}", s)),
        }
    }
}

impl std::fmt::Display for StrategyKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StrategyKind::Auto => write!(f, "auto"),
            StrategyKind::Poll => write!(f, "poll"),
            StrategyKind::Stream => write!(f, "stream"),
        }
    }
}

/// Client configuration passed to the kernel at construction
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct KernelConfig {
    /// `host:port` of the framed compile service
    #[serde(default = "default_compiler_endpoint")]
    pub compiler_endpoint: String,

    /// Base URL of the streaming execution service, if deployed
    #[serde(default)]
    pub execution_endpoint: Option<String>,

    /// Base URL of the session/invocation registry
    #[serde(default = "default_registry_endpoint")]
    pub registry_endpoint: String,

    /// Local mount of the shared data volume
    #[serde(default = "default_data_root")]
    pub data_root: PathBuf,

    /// Path prefix execution outputs use to reference the data volume
    #[serde(default = "default_data_prefix")]
    pub data_prefix: String,

    #[serde(default)]
    pub strategy: StrategyKind,

    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,

    /// Consecutive status fetch failures tolerated while polling
    #[serde(default = "default_max_poll_failures")]
    pub max_poll_failures: u32,
}

fn default_compiler_endpoint() -> String {
    "127.0.0.1:5555".to_string()
}

fn default_registry_endpoint() -> String {
    "http://brane-api:8080".to_string()
}

fn default_data_root() -> PathBuf {
    PathBuf::from("/home/jovyan/data")
}

fn default_data_prefix() -> String {
    "/data/".to_string()
}

fn default_request_timeout_secs() -> u64 {
    30
}

fn default_max_poll_failures() -> u32 {
    3
}

impl Default for KernelConfig {
    fn default() -> Self {
        Self {
            compiler_endpoint: default_compiler_endpoint(),
            execution_endpoint: None,
            registry_endpoint: default_registry_endpoint(),
            data_root: default_data_root(),
            data_prefix: default_data_prefix(),
            strategy: StrategyKind::default(),
            request_timeout_secs: default_request_timeout_secs(),
            max_poll_failures: default_max_poll_failures(),
        }
    }
}

impl KernelConfig {
    /// Load configuration from a TOML file
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)?;
        toml::from_str(&content)
            .map_err(|e| KernelError::Config(format!("{}: {}", path.display(), e)))
    }

    /// Resolve the effective configuration.
    ///
    /// An explicit path must exist. Without one, the first of
    /// `./bakery.toml` and `<config dir>/bakery/bakery.toml` is used, or the
    /// defaults if neither exists. Environment overrides apply last.
    pub fn resolve(explicit: Option<&Path>) -> Result<Self> {
        let mut config = match explicit {
            Some(path) => Self::load(path)?,
            None => match find_config_file() {
                Some(path) => {
                    tracing::debug!(path = %path.display(), "loading configuration");
                    Self::load(path)?
                }
                None => Self::default(),
            },
        };

        config.apply_overrides(|key| std::env::var(key).ok());
        config.validate()?;
        Ok(config)
    }

    /// Apply overrides from a key lookup (the process environment in
    /// production).
    pub fn apply_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(url) = lookup(ENV_COMPILER_URL) {
            self.compiler_endpoint = url;
        }
        if let Some(url) = lookup(ENV_DRIVER_URL) {
            self.execution_endpoint = Some(with_scheme(&url));
        }
        if let Some(url) = lookup(ENV_API_URL) {
            self.registry_endpoint = with_scheme(&url);
        }
        if let Some(dir) = lookup(ENV_DATA_DIR) {
            self.data_root = PathBuf::from(dir);
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.compiler_endpoint.trim().is_empty() {
            return Err(KernelError::Config("compiler_endpoint cannot be empty".to_string()));
        }
        check_base_url(&self.registry_endpoint, "registry_endpoint")?;
        if let Some(endpoint) = &self.execution_endpoint {
            check_base_url(endpoint, "execution_endpoint")?;
        }
        if self.strategy == StrategyKind::Stream && self.execution_endpoint.is_none() {
            return Err(KernelError::Config(
                "strategy 'stream' requires an execution_endpoint".to_string(),
            ));
        }
        if self.request_timeout_secs == 0 {
            return Err(KernelError::Config("request_timeout_secs must be at least 1".to_string()));
        }
        if self.max_poll_failures == 0 {
            return Err(KernelError::Config("max_poll_failures must be at least 1".to_string()));
        }
        if !self.data_prefix.starts_with('/') {
            return Err(KernelError::Config("data_prefix must be an absolute path".to_string()));
        }
        Ok(())
    }

    /// The strategy actually used: `auto` follows the deployed services.
    pub fn effective_strategy(&self) -> StrategyKind {
        match self.strategy {
            StrategyKind::Auto if self.execution_endpoint.is_some() => StrategyKind::Stream,
            StrategyKind::Auto => StrategyKind::Poll,
            other => other,
        }
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn to_toml_string(&self) -> Result<String> {
        toml::to_string_pretty(self).map_err(|e| KernelError::Config(e.to_string()))
    }
}

/// Find the configuration file in standard locations
pub fn find_config_file() -> Option<PathBuf> {
    if let Ok(cwd) = std::env::current_dir() {
        let path = cwd.join(CONFIG_FILE_NAME);
        if path.exists() {
            return Some(path);
        }
    }

    if let Some(dir) = get_config_dir() {
        let path = dir.join(CONFIG_FILE_NAME);
        if path.exists() {
            return Some(path);
        }
    }

    None
}

/// Get the configuration directory path
pub fn get_config_dir() -> Option<PathBuf> {
    if let Some(dir) = dirs::config_dir() {
        return Some(dir.join("bakery"));
    }

    dirs::home_dir().map(|home| home.join(".config").join("bakery"))
}

// Endpoints in the environment are often bare `host:port` pairs.
fn with_scheme(url: &str) -> String {
    let url = url.trim();
    if url.starts_with("http://") || url.starts_with("https://") {
        url.to_string()
    } else {
        format!("http://{}", url)
    }
}

fn check_base_url(url: &str, field_name: &str) -> Result<()> {
    let trimmed = url.trim();

    if trimmed.is_empty() {
        return Err(KernelError::Config(format!("{} cannot be empty", field_name)));
    }

    if trimmed.contains("%2F") || trimmed.contains("%3D") || trimmed.contains("%20") {
        return Err(KernelError::Config(format!(
            "{} appears to contain URL-encoded characters: {}",
            field_name, trimmed
        )));
    }

    if !trimmed.starts_with("http://") && !trimmed.starts_with("https://") {
        return Err(KernelError::Config(format!(
            "{} must start with 'http://' or 'https://'. Got: {}",
            field_name, trimmed
        )));
    }

    Ok(())
}
