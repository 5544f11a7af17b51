//! Configuration shared by the command line tools.
//!
//! Settings are read from a TOML file. Search order:
//! 1. the `--config` flag of the tool
//! 2. the `ZEBRANII_CONFIG` environment variable
//! 3. `./zebranii.toml`
//!
//! When none is found the built-in defaults apply. Every section and key is
//! optional.

use serde::{Deserialize, Serialize};
use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::debug;

use crate::ants::Preset;
use crate::error::{Error, Result};
use crate::morphology::CleanupParams;

pub const CONFIG_ENV: &str = "ZEBRANII_CONFIG";
pub const CONFIG_FILE_NAME: &str = "zebranii.toml";

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub logging: LoggingConfig,
    pub cleanup: CleanupConfig,
    pub registration: RegistrationConfig,
    pub export: ExportConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// `error`, `warn`, `info`, `debug` or `trace`.
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

/// Region mask cleanup after warping.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CleanupConfig {
    pub enabled: bool,
    /// Closing radius (µm).
    pub radius_um: f64,
    /// Smallest connected component kept (µm³).
    pub min_component_volume_um3: f64,
    /// Warped mask values above this are inside the region.
    pub threshold: f64,
}

impl Default for CleanupConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            radius_um: 20.0,
            min_component_volume_um3: 20.0 * 20.0 * 20.0,
            threshold: 0.5,
        }
    }
}

impl CleanupConfig {
    pub fn params(&self, spacing: [f64; 3]) -> Result<CleanupParams> {
        CleanupParams::from_physical(self.radius_um, self.min_component_volume_um3, spacing)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RegistrationConfig {
    pub preset: Preset,
    /// Directory holding the ANTs executables; `PATH` is searched otherwise.
    pub ants_bin_dir: Option<PathBuf>,
    /// Thread count handed to ANTs.
    pub threads: Option<usize>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExportConfig {
    /// Export hole boundaries as separate polygons.
    pub include_holes: bool,
}

impl Config {
    pub fn from_toml(content: &str) -> Result<Self> {
        let config: Config = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        const LEVELS: [&str; 5] = ["error", "warn", "info", "debug", "trace"];
        if !LEVELS.contains(&self.logging.level.to_ascii_lowercase().as_str()) {
            return Err(Error::invalid_parameter(
                "logging.level",
                format!("`{}` is not one of {}", self.logging.level, LEVELS.join(", ")),
            ));
        }
        let cleanup = &self.cleanup;
        if !(cleanup.radius_um.is_finite() && cleanup.radius_um > 0.0) {
            return Err(Error::invalid_parameter(
                "cleanup.radius_um",
                "must be a positive number",
            ));
        }
        if !(cleanup.min_component_volume_um3.is_finite() && cleanup.min_component_volume_um3 > 0.0)
        {
            return Err(Error::invalid_parameter(
                "cleanup.min_component_volume_um3",
                "must be a positive number",
            ));
        }
        if !(cleanup.threshold > 0.0 && cleanup.threshold < 1.0) {
            return Err(Error::invalid_parameter(
                "cleanup.threshold",
                "must lie strictly between 0 and 1",
            ));
        }
        if self.registration.threads == Some(0) {
            return Err(Error::invalid_parameter(
                "registration.threads",
                "must be at least 1",
            ));
        }
        Ok(())
    }
}

/// Finds the configuration file to use, if any.
///
/// An explicitly given path (flag or environment variable) must exist; the
/// default file in the working directory is optional.
pub fn find_config_file(explicit: Option<&Path>) -> Result<Option<PathBuf>> {
    if let Some(path) = explicit {
        return existing(path.to_path_buf()).map(Some);
    }
    if let Ok(env_path) = env::var(CONFIG_ENV) {
        if !env_path.is_empty() {
            return existing(PathBuf::from(env_path)).map(Some);
        }
    }
    let default = PathBuf::from(CONFIG_FILE_NAME);
    Ok(default.is_file().then_some(default))
}

fn existing(path: PathBuf) -> Result<PathBuf> {
    if path.is_file() {
        Ok(path)
    } else {
        Err(Error::MissingFile(path))
    }
}

/// Loads the configuration following the search order above.
pub fn load_config(explicit: Option<&Path>) -> Result<Config> {
    match find_config_file(explicit)? {
        Some(path) => {
            debug!(path = %path.display(), "loading configuration");
            Config::from_toml(&fs::read_to_string(&path)?)
        }
        None => Ok(Config::default()),
    }
}
