pub mod merge;
pub mod schema;

pub use schema::*;

use crate::cli::{Cli, Commands};
use anyhow::Context;
use std::path::{Path, PathBuf};

/// Name of the config file looked up in the working directory and in the
/// platform config directory.
const CONFIG_FILE_NAME: &str = "lidar-relay.toml";

/// Load configuration by merging global, local, and CLI sources.
/// Precedence: CLI > local config > global config > defaults.
///
/// Missing config files are handled gracefully (defaults apply).
pub fn load_config(cli: &Cli) -> anyhow::Result<AppConfig> {
    // Layer 1: Global config (~/.config/lidar-relay/lidar-relay.toml or platform equivalent)
    load_layered(cli, load_global_config())
}

/// Merge the local and CLI layers over an already loaded global layer.
fn load_layered(cli: &Cli, global: PartialConfig) -> anyhow::Result<AppConfig> {
    // Layer 2: Local config (--config path, or ./lidar-relay.toml)
    let local_path = cli_config_path(cli).unwrap_or_else(|| PathBuf::from(CONFIG_FILE_NAME));
    let local = load_toml_file(&local_path).unwrap_or_default();

    // Layer 3: CLI args (converted to PartialConfig)
    let cli_partial = cli_to_partial(cli);

    let config = cli_partial
        .with_fallback(local)
        .with_fallback(global)
        .finalize()
        .context("Invalid configuration")?;

    Ok(config)
}

/// Load global config from the platform-specific config directory.
/// Returns empty PartialConfig if file not found.
fn load_global_config() -> PartialConfig {
    match global_config_path() {
        Some(p) => load_toml_file(&p).unwrap_or_default(),
        None => {
            tracing::debug!("Could not determine global config directory");
            PartialConfig::default()
        }
    }
}

/// Load and parse a TOML config file into a PartialConfig.
/// Returns None on file-not-found; parse errors are logged and skipped.
fn load_toml_file(path: &Path) -> Option<PartialConfig> {
    match std::fs::read_to_string(path) {
        Ok(contents) => {
            match toml::from_str::<ConfigFile>(&contents)
                .context(format!("Failed to parse {}", path.display()))
            {
                Ok(config_file) => {
                    tracing::info!("Loaded config from {}", path.display());
                    Some(config_file.to_partial())
                }
                Err(e) => {
                    tracing::warn!("Config parse error: {:#}", e);
                    None
                }
            }
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            tracing::debug!("No config file at {}, using defaults", path.display());
            None
        }
        Err(e) => {
            tracing::warn!("Failed to read config at {}: {}", path.display(), e);
            None
        }
    }
}

/// Resolve the platform-specific global config path.
/// Linux: ~/.config/lidar-relay/lidar-relay.toml
fn global_config_path() -> Option<PathBuf> {
    directories::ProjectDirs::from("", "", "lidar-relay")
        .map(|dirs| dirs.config_dir().join(CONFIG_FILE_NAME))
}

fn cli_config_path(cli: &Cli) -> Option<PathBuf> {
    match &cli.command {
        Commands::Serve { config, .. } => config.clone(),
        Commands::Send { .. } => None,
    }
}

/// Convert CLI arguments to a PartialConfig for merging.
fn cli_to_partial(cli: &Cli) -> PartialConfig {
    match &cli.command {
        Commands::Serve {
            http_addr,
            udp_port,
            scripts_dir,
            config: _,
        } => PartialConfig {
            http_addr: http_addr.clone(),
            udp_port: *udp_port,
            scripts_dir: scripts_dir.clone(),
            ..Default::default()
        },
        Commands::Send { .. } => PartialConfig::default(),
    }
}
