//! JSON file configuration adapter.
//!
//! Implements [`ConfigPort`] over a single pretty-printed JSON file.
//!
//! - A missing file is not an error: `load` returns the defaults.
//! - A file that does not parse is `Corrupted`; it is never overwritten
//!   silently.
//! - `save` validates before writing, then replaces the file through a
//!   temporary sibling so a crash mid-write leaves the old file intact.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use log::{info, warn};

use crate::app::ports::{ConfigError, ConfigPort};
use crate::config::SystemConfig;

pub struct JsonConfigFile {
    path: PathBuf,
}

impl JsonConfigFile {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl ConfigPort for JsonConfigFile {
    fn load(&self) -> Result<SystemConfig, ConfigError> {
        let text = match fs::read_to_string(&self.path) {
            Ok(text) => text,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                warn!(
                    "config: {} not found, using defaults",
                    self.path.display()
                );
                return Ok(SystemConfig::default());
            }
            Err(e) => return Err(ConfigError::IoError(e)),
        };
        let config: SystemConfig =
            serde_json::from_str(&text).map_err(|e| ConfigError::Corrupted(e.to_string()))?;
        config.validate().map_err(ConfigError::ValidationFailed)?;
        info!("config: loaded {}", self.path.display());
        Ok(config)
    }

    fn save(&self, config: &SystemConfig) -> Result<(), ConfigError> {
        config.validate().map_err(ConfigError::ValidationFailed)?;
        let text = serde_json::to_string_pretty(config)
            .map_err(|e| ConfigError::Corrupted(e.to_string()))?;

        if let Some(dir) = self.path.parent().filter(|d| !d.as_os_str().is_empty()) {
            fs::create_dir_all(dir).map_err(ConfigError::IoError)?;
        }
        let tmp = self.path.with_extension("json.tmp");
        fs::write(&tmp, text).map_err(ConfigError::IoError)?;
        fs::rename(&tmp, &self.path).map_err(ConfigError::IoError)?;
        info!("config: saved {}", self.path.display());
        Ok(())
    }
}
