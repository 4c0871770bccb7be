//! Configuration system for personality-net nodes
//!
//! Supports multiple configuration sources with the following precedence (highest to lowest):
//! 1. Environment variables (PNET_* prefix)
//! 2. Configuration file (TOML)
//! 3. Default values

use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::{debug, info};
use url::Url;

use crate::error::{Error, Result};
use crate::personality::PersonalityTrait;

/// File name searched for in the working directory
pub const CONFIG_FILE_NAME: &str = "personality-net.toml";

/// Main node configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct NodeConfig {
    /// Agent identity, endpoints and traits
    pub agent: AgentSettings,

    /// Coordinator identity and registry endpoint
    pub coordinator: CoordinatorSettings,

    /// Network settings shared by both roles
    pub network: NetworkSettings,

    /// Logging configuration
    pub logging: LoggingSettings,

    /// Data storage paths
    pub storage: StorageSettings,
}

/// Agent settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AgentSettings {
    /// Agent name, also the personality name
    pub name: String,

    /// Personality version
    pub version: String,

    /// Public base URL of this agent
    pub base_url: String,

    /// Port the agent tool server listens on
    pub mcp_port: u16,

    /// Trait name to either a full record or a bare value
    pub traits: Map<String, Value>,
}

/// Coordinator settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CoordinatorSettings {
    /// Coordinator node name
    pub name: String,

    /// Public base URL of the knowledge-network API (including `/koi-net`)
    pub base_url: String,

    /// Port the registry server listens on
    pub mcp_registry_port: u16,
}

/// Network settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NetworkSettings {
    /// Knowledge-network base URL of the coordinator to announce to
    #[serde(skip_serializing_if = "Option::is_none")]
    pub first_contact: Option<String>,

    /// Address HTTP servers bind to
    pub listen_host: String,

    /// Timeout for each broadcast/poll request in milliseconds
    pub request_timeout_ms: u64,

    /// Retry policy for bootstrap calls
    pub retry: RetrySettings,
}

/// Bootstrap retry settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetrySettings {
    /// Total attempts per call, including the first
    pub max_attempts: u32,

    /// Delay before the first retry in milliseconds
    pub initial_delay_ms: u64,

    /// Upper bound on the delay between retries in milliseconds
    pub max_delay_ms: u64,
}

/// Logging settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingSettings {
    /// Log level: trace, debug, info, warn, error
    pub level: String,

    /// Log file path (empty = no file logging)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub file: Option<String>,

    /// Maximum log file size in MB before rotation
    pub max_file_size_mb: u64,

    /// Number of rotated log files to keep
    pub max_files: u32,

    /// Enable JSON formatted logging
    pub json_format: bool,
}

/// Storage path settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageSettings {
    /// Base directory for per-node identity and cache
    pub data_dir: String,
}

impl Default for AgentSettings {
    fn default() -> Self {
        Self {
            name: "agent".to_string(),
            version: "1.0".to_string(),
            base_url: "http://127.0.0.1:8100".to_string(),
            mcp_port: 8100,
            traits: Map::new(),
        }
    }
}

impl Default for CoordinatorSettings {
    fn default() -> Self {
        Self {
            name: "coordinator".to_string(),
            base_url: "http://127.0.0.1:9000/koi-net".to_string(),
            mcp_registry_port: 9000,
        }
    }
}

impl Default for NetworkSettings {
    fn default() -> Self {
        Self {
            first_contact: None,
            listen_host: "0.0.0.0".to_string(),
            request_timeout_ms: 5000,
            retry: RetrySettings::default(),
        }
    }
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_delay_ms: 250,
            max_delay_ms: 2000,
        }
    }
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            file: None,
            max_file_size_mb: 100,
            max_files: 5,
            json_format: false,
        }
    }
}

impl Default for StorageSettings {
    fn default() -> Self {
        Self {
            data_dir: ".koi".to_string(),
        }
    }
}

impl AgentSettings {
    /// Build the trait list from the configured map, in file order.
    pub fn personality_traits(&self) -> Vec<PersonalityTrait> {
        self.traits
            .iter()
            .map(|(name, entry)| PersonalityTrait::from_config_entry(name, entry))
            .collect()
    }
}

impl NodeConfig {
    /// Load configuration from file with environment variable overrides
    pub fn load(config_path: Option<&str>) -> Result<Self> {
        let mut config = Self::default();

        // 1. Load from config file if it exists
        if let Some(path) = Self::find_config_file(config_path)? {
            debug!(path = %path.display(), "Loading configuration file");
            config = Self::from_file(&path)?;
            info!(path = %path.display(), "Configuration loaded from file");
        }

        // 2. Apply environment variable overrides
        config.apply_env_overrides();

        // 3. Expand paths
        config.expand_paths();

        // 4. Validate
        config.validate()?;

        Ok(config)
    }

    /// Parse a configuration file without overrides or validation
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path).map_err(|e| Error::IoRead {
            path: path.to_path_buf(),
            source: e,
        })?;
        toml::from_str(&content).map_err(|e| Error::config_parse(e.to_string()))
    }

    /// Find the configuration file to use
    fn find_config_file(explicit_path: Option<&str>) -> Result<Option<PathBuf>> {
        // If explicit path provided, use it (error if not found)
        if let Some(path) = explicit_path {
            let path = PathBuf::from(expand_path(path));
            if path.exists() {
                return Ok(Some(path));
            }
            return Err(Error::config_not_found(path));
        }

        // Search in standard locations
        let search_paths = [
            // Current directory
            PathBuf::from(CONFIG_FILE_NAME),
            PathBuf::from("config.toml"),
            // User config directory
            dirs::config_dir()
                .map(|p| p.join("personality-net").join("config.toml"))
                .unwrap_or_default(),
            // Home directory
            dirs::home_dir()
                .map(|p| p.join(".personality-net").join("config.toml"))
                .unwrap_or_default(),
        ];

        for path in &search_paths {
            if !path.as_os_str().is_empty() && path.exists() {
                debug!(path = %path.display(), "Found configuration file");
                return Ok(Some(path.clone()));
            }
        }

        debug!("No configuration file found, using defaults");
        Ok(None)
    }

    /// Apply environment variable overrides
    fn apply_env_overrides(&mut self) {
        // Agent settings
        if let Ok(val) = std::env::var("PNET_AGENT_NAME") {
            self.agent.name = val;
        }
        if let Ok(val) = std::env::var("PNET_AGENT_VERSION") {
            self.agent.version = val;
        }
        if let Ok(val) = std::env::var("PNET_AGENT_BASE_URL") {
            self.agent.base_url = val;
        }
        if let Ok(val) = std::env::var("PNET_AGENT_MCP_PORT") {
            if let Ok(n) = val.parse() {
                self.agent.mcp_port = n;
            }
        }

        // Coordinator settings
        if let Ok(val) = std::env::var("PNET_COORDINATOR_NAME") {
            self.coordinator.name = val;
        }
        if let Ok(val) = std::env::var("PNET_COORDINATOR_BASE_URL") {
            self.coordinator.base_url = val;
        }
        if let Ok(val) = std::env::var("PNET_REGISTRY_PORT") {
            if let Ok(n) = val.parse() {
                self.coordinator.mcp_registry_port = n;
            }
        }

        // Network settings
        if let Ok(val) = std::env::var("PNET_FIRST_CONTACT") {
            self.network.first_contact = if val.is_empty() { None } else { Some(val) };
        }
        if let Ok(val) = std::env::var("PNET_LISTEN_HOST") {
            self.network.listen_host = val;
        }
        if let Ok(val) = std::env::var("PNET_REQUEST_TIMEOUT_MS") {
            if let Ok(n) = val.parse() {
                self.network.request_timeout_ms = n;
            }
        }

        // Logging settings
        if let Ok(val) = std::env::var("PNET_LOG_LEVEL") {
            self.logging.level = val;
        }
        if let Ok(val) = std::env::var("PNET_LOG_FILE") {
            self.logging.file = Some(val);
        }
        if let Ok(val) = std::env::var("PNET_LOG_JSON") {
            self.logging.json_format = val.to_lowercase() == "true" || val == "1";
        }

        // Storage settings
        if let Ok(val) = std::env::var("PNET_DATA_DIR") {
            self.storage.data_dir = val;
        }
    }

    /// Expand ~ and other path variables
    fn expand_paths(&mut self) {
        self.storage.data_dir = expand_path(&self.storage.data_dir);

        if let Some(ref file) = self.logging.file {
            self.logging.file = Some(expand_path(file));
        }
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        validate_name("agent.name", &self.agent.name)?;
        validate_name("agent.version", &self.agent.version)?;
        validate_url("agent.base_url", &self.agent.base_url)?;
        if self.agent.mcp_port == 0 {
            return Err(Error::config_field_invalid("agent.mcp_port", "mcp_port must be non-zero"));
        }

        validate_name("coordinator.name", &self.coordinator.name)?;
        validate_url("coordinator.base_url", &self.coordinator.base_url)?;
        if self.coordinator.mcp_registry_port == 0 {
            return Err(Error::config_field_invalid(
                "coordinator.mcp_registry_port",
                "mcp_registry_port must be non-zero",
            ));
        }

        if let Some(ref first_contact) = self.network.first_contact {
            validate_url("network.first_contact", first_contact)?;
        }
        if self.network.request_timeout_ms == 0 {
            return Err(Error::config_field_invalid(
                "network.request_timeout_ms",
                "request_timeout_ms must be non-zero",
            ));
        }
        if self.network.retry.max_attempts == 0 {
            return Err(Error::config_field_invalid(
                "network.retry.max_attempts",
                "max_attempts must be at least 1",
            ));
        }

        // Validate log level
        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.logging.level.to_lowercase().as_str()) {
            return Err(Error::config_field_invalid(
                "logging.level",
                format!(
                    "Invalid log level '{}'. Must be one of: {}",
                    self.logging.level,
                    valid_levels.join(", ")
                ),
            ));
        }

        Ok(())
    }

    /// Render the effective configuration as TOML
    pub fn to_toml(&self) -> Result<String> {
        Ok(toml::to_string_pretty(self)?)
    }

    /// Get the data directory as a PathBuf
    pub fn data_dir(&self) -> PathBuf {
        PathBuf::from(&self.storage.data_dir)
    }

    /// Per-node state directory (`<data_dir>/<name>`)
    pub fn node_dir(&self, name: &str) -> PathBuf {
        self.data_dir().join(name)
    }
}

fn validate_name(field: &str, value: &str) -> Result<()> {
    if value.is_empty() {
        return Err(Error::config_field_invalid(field, format!("{} cannot be empty", field)));
    }
    if value.contains('/') {
        return Err(Error::config_field_invalid(field, format!("{} cannot contain '/'", field)));
    }
    Ok(())
}

fn validate_url(field: &str, value: &str) -> Result<()> {
    let url = Url::parse(value)
        .map_err(|e| Error::config_field_invalid(field, format!("Invalid URL '{}': {}", value, e)))?;
    if url.scheme() != "http" && url.scheme() != "https" {
        return Err(Error::config_field_invalid(
            field,
            format!("{} must start with http:// or https://", field),
        ));
    }
    Ok(())
}

/// Expand ~ and environment variables in paths
fn expand_path(path: &str) -> String {
    shellexpand::full(path)
        .unwrap_or_else(|_| std::borrow::Cow::Borrowed(path))
        .into_owned()
}

/// Default location written by `config init`
pub fn default_config_path() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".personality-net")
        .join("config.toml")
}

/// Initialize a new configuration file
pub fn init_config(path: Option<&str>, force: bool) -> Result<PathBuf> {
    let config_path = path
        .map(|p| PathBuf::from(expand_path(p)))
        .unwrap_or_else(default_config_path);

    // Check if file exists
    if config_path.exists() && !force {
        return Err(Error::config_validation(format!(
            "Configuration file already exists: {}. Use --force to overwrite.",
            config_path.display()
        )));
    }

    // Create parent directories
    if let Some(parent) = config_path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent).map_err(|e| Error::IoWrite {
                path: parent.to_path_buf(),
                source: e,
            })?;
        }
    }

    fs::write(&config_path, generate_default_config()).map_err(|e| Error::IoWrite {
        path: config_path.clone(),
        source: e,
    })?;

    Ok(config_path)
}

/// Generate default configuration content with comments
pub fn generate_default_config() -> String {
    r#"# personality-net configuration

[agent]
# Agent name (also the personality name)
name = "helpful-agent"

# Personality version
version = "1.0"

# Public base URL of this agent; tools are served under <base_url>/mcp
base_url = "http://127.0.0.1:8100"

# Port the agent tool server listens on
mcp_port = 8100

# Traits: either a full record or a bare value
[agent.traits]
mood = { description = "Current mood", value = "helpful", is_callable = true }
tone = "friendly"

[coordinator]
# Coordinator node name
name = "coordinator"

# Public base URL of the knowledge-network API
base_url = "http://127.0.0.1:9000/koi-net"

# Port the registry server listens on
mcp_registry_port = 9000

[network]
# Coordinator knowledge-network URL an agent announces itself to
# first_contact = "http://127.0.0.1:9000/koi-net"

# Address HTTP servers bind to
listen_host = "0.0.0.0"

# Timeout for each broadcast/poll request in milliseconds
request_timeout_ms = 5000

[network.retry]
# Attempts per bootstrap call, including the first
max_attempts = 3

# Delay before the first retry in milliseconds
initial_delay_ms = 250

# Upper bound on the delay between retries in milliseconds
max_delay_ms = 2000

[logging]
# Log level: trace, debug, info, warn, error
level = "info"

# Log file path (comment out to disable file logging)
# file = "~/.personality-net/logs/node.log"

# Maximum log file size in MB before rotation
max_file_size_mb = 100

# Number of rotated log files to keep
max_files = 5

# Enable JSON formatted logging
json_format = false

[storage]
# Base directory for node identity and cache
data_dir = ".koi"
"#
    .to_string()
}
