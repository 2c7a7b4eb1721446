//! Bridge configuration (hostcall.toml)
//!
//! Every field has a default, so an empty file (or no file at all) yields a
//! working configuration.
//!
//! ```toml
//! copy_mode = "region"
//! class_loader = true
//! describe_exceptions = false
//! log_filter = "hostcall=debug"
//! ```

use crate::host::CopyMode;
use serde::Deserialize;
use std::path::Path;
use thiserror::Error;

/// Environment variable naming a configuration file
pub const CONFIG_ENV: &str = "HOSTCALL_CONFIG";

/// Errors that can occur while loading configuration
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Failed to read the configuration file
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    /// Failed to parse TOML
    #[error("Failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),
}

/// Runtime options for a [`Bridge`](crate::Bridge)
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct BridgeConfig {
    /// How completion byte arrays are copied out of the host
    pub copy_mode: CopyMode,

    /// Resolve registered classes through the application class loader
    /// captured at init, instead of the loader of the calling thread
    pub class_loader: bool,

    /// Print host exceptions before clearing them
    pub describe_exceptions: bool,

    /// Default log filter, used when no filter is set in the environment
    pub log_filter: String,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        BridgeConfig {
            copy_mode: CopyMode::default(),
            class_loader: true,
            describe_exceptions: false,
            log_filter: "hostcall=warn".to_string(),
        }
    }
}

impl BridgeConfig {
    /// Parse configuration from a TOML string
    pub fn from_toml_str(source: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(source)?)
    }

    /// Load configuration from a TOML file
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let source = std::fs::read_to_string(path)?;
        Self::from_toml_str(&source)
    }

    /// Load the file named by `HOSTCALL_CONFIG`, or the defaults when unset
    pub fn from_env() -> Result<Self, ConfigError> {
        match std::env::var_os(CONFIG_ENV) {
            Some(path) => Self::load(Path::new(&path)),
            None => Ok(Self::default()),
        }
    }
}
