//! Bootstrap configuration loading and data folder resolution
//!
//! Configuration is split in two tiers:
//! 1. **TOML bootstrap**: database path, port, media folders, logging
//! 2. **Runtime settings**: the optional `[runtime]` table (timeouts and
//!    sweeper periods), every key falling back to a built-in default
//!
//! Command-line arguments are applied on top by the binary.

use crate::{Error, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, info};

/// Default HTTP control port
pub const DEFAULT_PORT: u16 = 5790;

/// Environment variable naming the TOML config file
pub const CONFIG_ENV_VAR: &str = "VOXQ_CONFIG";

/// Environment variable naming the data folder
pub const DATA_DIR_ENV_VAR: &str = "VOXQ_DATA_DIR";

/// Bootstrap configuration loaded from TOML
#[derive(Debug, Clone, Deserialize)]
pub struct TomlConfig {
    /// Path to the SQLite database file
    #[serde(default)]
    pub database_path: Option<PathBuf>,

    /// HTTP control port
    #[serde(default = "default_port")]
    pub port: u16,

    /// Data folder (database, downloads) when not given on the command line
    #[serde(default)]
    pub data_dir: Option<PathBuf>,

    /// Folder the local resolver reads tracks from
    #[serde(default)]
    pub media_dir: Option<PathBuf>,

    /// Folder "downloaded" temp files are written to
    #[serde(default)]
    pub download_dir: Option<PathBuf>,

    #[serde(default)]
    pub logging: LoggingConfig,

    #[serde(default)]
    pub runtime: RuntimeSettings,
}

impl Default for TomlConfig {
    fn default() -> Self {
        Self {
            database_path: None,
            port: DEFAULT_PORT,
            data_dir: None,
            media_dir: None,
            download_dir: None,
            logging: LoggingConfig::default(),
            runtime: RuntimeSettings::default(),
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, Default, Deserialize)]
pub struct LoggingConfig {
    /// Filter directive (e.g. "info", "voxq_player=trace"); replaces the
    /// built-in default filter when set
    #[serde(default)]
    pub level: Option<String>,
}

/// Runtime tuning knobs
///
/// All values are optional in the file; missing keys take the built-in
/// defaults below.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct RuntimeSettings {
    /// Bound on every chat platform call
    pub platform_timeout_ms: u64,
    /// Bound on every engine call
    pub engine_timeout_ms: u64,
    /// Played-seconds accrual period
    pub accrual_interval_ms: u64,
    /// Inactivity sweep period
    pub sweep_interval_ms: u64,
    /// How long a call may have no listeners before autoend ends it
    pub inactivity_timeout_s: u64,
    /// Upper bound for the loop counter
    pub max_loop: u8,
}

impl Default for RuntimeSettings {
    fn default() -> Self {
        Self {
            platform_timeout_ms: 10_000,
            engine_timeout_ms: 10_000,
            accrual_interval_ms: 1_000,
            sweep_interval_ms: 10_000,
            inactivity_timeout_s: 300,
            max_loop: 10,
        }
    }
}

impl RuntimeSettings {
    pub fn platform_timeout(&self) -> Duration {
        Duration::from_millis(self.platform_timeout_ms)
    }

    pub fn engine_timeout(&self) -> Duration {
        Duration::from_millis(self.engine_timeout_ms)
    }

    pub fn accrual_interval(&self) -> Duration {
        Duration::from_millis(self.accrual_interval_ms)
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_millis(self.sweep_interval_ms)
    }

    pub fn inactivity_timeout(&self) -> Duration {
        Duration::from_secs(self.inactivity_timeout_s)
    }

    /// Reject values that would stall the sweepers or disable timeouts
    pub fn validate(&self) -> Result<()> {
        if self.accrual_interval_ms == 0 || self.sweep_interval_ms == 0 {
            return Err(Error::Config(
                "sweeper intervals must be greater than zero".to_string(),
            ));
        }
        if self.platform_timeout_ms == 0 || self.engine_timeout_ms == 0 {
            return Err(Error::Config("timeouts must be greater than zero".to_string()));
        }
        if self.max_loop == 0 {
            return Err(Error::Config("max_loop must be at least 1".to_string()));
        }
        Ok(())
    }
}

fn default_port() -> u16 {
    DEFAULT_PORT
}

impl TomlConfig {
    /// Parse a TOML document
    pub fn from_toml_str(content: &str) -> Result<Self> {
        let config: TomlConfig = toml::from_str(content)
            .map_err(|e| Error::Config(format!("Invalid TOML: {}", e)))?;
        config.runtime.validate()?;
        Ok(config)
    }

    /// Load from a file path
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            Error::Config(format!("Failed to read config file {}: {}", path.display(), e))
        })?;
        debug!("Loading config from {}", path.display());
        Self::from_toml_str(&content)
    }

    /// Load the config file if one can be located, defaults otherwise
    ///
    /// An explicitly named file that does not exist is an error; a missing
    /// platform default file is not.
    pub fn load_or_default(explicit: Option<&Path>) -> Result<Self> {
        if let Some(path) = explicit {
            return Self::load(path);
        }
        if let Ok(path) = std::env::var(CONFIG_ENV_VAR) {
            return Self::load(Path::new(&path));
        }
        match default_config_file() {
            Some(path) if path.exists() => Self::load(&path),
            Some(path) => {
                info!("No config file at {}, using defaults", path.display());
                Ok(Self::default())
            }
            None => {
                info!("No config folder on this platform, using defaults");
                Ok(Self::default())
            }
        }
    }
}

/// Platform config file location (`<config dir>/voxq/config.toml`)
pub fn default_config_file() -> Option<PathBuf> {
    dirs::config_dir().map(|d| d.join("voxq").join("config.toml"))
}

/// Data folder resolution, highest priority first:
/// 1. Command-line argument
/// 2. Environment variable
/// 3. TOML config value
/// 4. OS-dependent default
pub fn resolve_data_dir(
    cli_arg: Option<&Path>,
    env_var_name: &str,
    toml_value: Option<&Path>,
) -> PathBuf {
    if let Some(path) = cli_arg {
        return path.to_path_buf();
    }

    if let Ok(path) = std::env::var(env_var_name) {
        if !path.is_empty() {
            return PathBuf::from(path);
        }
    }

    if let Some(path) = toml_value {
        return path.to_path_buf();
    }

    default_data_dir()
}

/// OS-dependent default data folder
pub fn default_data_dir() -> PathBuf {
    dirs::data_local_dir()
        .map(|d| d.join("voxq"))
        .unwrap_or_else(|| PathBuf::from("./voxq_data"))
}
