//! voxq-player configuration
//!
//! Command-line arguments (with environment fallbacks) are layered over the
//! bootstrap TOML file, which is layered over built-in defaults.

use clap::Parser;
use std::path::PathBuf;
use voxq_common::config::{resolve_data_dir, RuntimeSettings, TomlConfig, DATA_DIR_ENV_VAR};

use crate::error::Result;

/// Command-line arguments
#[derive(Parser, Debug, Clone, Default)]
#[command(name = "voxq-player", about = "Voice-chat playback orchestrator", version)]
pub struct Args {
    /// HTTP control port
    #[arg(short, long, env = "VOXQ_PORT")]
    pub port: Option<u16>,

    /// SQLite database file
    #[arg(short, long, env = "VOXQ_DATABASE")]
    pub database: Option<PathBuf>,

    /// Data folder (database and downloads default to living here)
    #[arg(long)]
    pub data_dir: Option<PathBuf>,

    /// Folder the local resolver reads tracks from
    #[arg(short, long, env = "VOXQ_MEDIA_DIR")]
    pub media_dir: Option<PathBuf>,

    /// Bootstrap TOML file
    #[arg(short, long, env = "VOXQ_CONFIG")]
    pub config: Option<PathBuf>,

    /// End loopback streams after this many seconds (development engine)
    #[arg(long, env = "VOXQ_LOOPBACK_TRACK_SECONDS")]
    pub loopback_track_seconds: Option<u64>,
}

/// Fully resolved player configuration
#[derive(Debug, Clone)]
pub struct Config {
    pub port: u16,
    pub data_dir: PathBuf,
    pub db_path: PathBuf,
    pub media_dir: PathBuf,
    pub download_dir: PathBuf,
    /// Log filter from the TOML file, if any
    pub log_level: Option<String>,
    pub runtime: RuntimeSettings,
}

impl Config {
    /// Load the TOML file named by `args` (or the platform default) and
    /// apply the arguments on top
    pub fn load(args: &Args) -> Result<Self> {
        let toml = TomlConfig::load_or_default(args.config.as_deref())?;
        Ok(Self::resolve(args, toml))
    }

    /// Merge arguments over an already parsed TOML document
    pub fn resolve(args: &Args, toml: TomlConfig) -> Self {
        let data_dir = resolve_data_dir(
            args.data_dir.as_deref(),
            DATA_DIR_ENV_VAR,
            toml.data_dir.as_deref(),
        );

        let db_path = args
            .database
            .clone()
            .or(toml.database_path)
            .unwrap_or_else(|| data_dir.join("voxq.db"));
        let media_dir = args
            .media_dir
            .clone()
            .or(toml.media_dir)
            .unwrap_or_else(|| data_dir.join("media"));
        let download_dir = toml
            .download_dir
            .unwrap_or_else(|| data_dir.join("downloads"));

        Self {
            port: args.port.unwrap_or(toml.port),
            data_dir,
            db_path,
            media_dir,
            download_dir,
            log_level: toml.logging.level,
            runtime: toml.runtime,
        }
    }
}
