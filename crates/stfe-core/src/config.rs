use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::error::{StfeError, StfeResult};

/// Top-level configuration (loaded from config.toml)
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct StfeConfig {
    pub log: LogConfig,
    pub files: FilesConfig,
    pub password: PasswordConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LogConfig {
    /// Log level (default: warn)
    pub level: String,
    /// Log format: "json" or "text"
    pub format: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FilesConfig {
    /// Extension given to encrypted documents (default: twofish)
    pub extension: String,
    /// Replace an existing output file without --force
    pub overwrite: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PasswordConfig {
    /// Ask for a new password twice before encrypting
    pub confirm: bool,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: "warn".into(),
            format: "text".into(),
        }
    }
}

impl Default for FilesConfig {
    fn default() -> Self {
        Self {
            extension: "twofish".into(),
            overwrite: false,
        }
    }
}

impl Default for PasswordConfig {
    fn default() -> Self {
        Self { confirm: true }
    }
}

impl StfeConfig {
    /// Check values serde cannot express.
    pub fn validate(&self) -> StfeResult<()> {
        if !matches!(self.log.format.as_str(), "text" | "json") {
            return Err(StfeError::Config(format!(
                "log.format must be \"text\" or \"json\", got {:?}",
                self.log.format
            )));
        }
        let ext = self.files.extension.trim_start_matches('.');
        if ext.is_empty() || ext.contains(&['/', '\\'][..]) {
            return Err(StfeError::Config(format!(
                "files.extension is not a usable extension: {:?}",
                self.files.extension
            )));
        }
        Ok(())
    }

    /// The configured extension without a leading dot.
    pub fn extension(&self) -> &str {
        self.files.extension.trim_start_matches('.')
    }
}

/// Load configuration from `path`, falling back to defaults if it does not exist.
///
/// Runs before logging is installed, so the caller reports a missing file.
pub fn load_config(path: &Path) -> StfeResult<StfeConfig> {
    let config = if path.exists() {
        let content = std::fs::read_to_string(path)?;
        toml::from_str(&content)
            .map_err(|e| StfeError::Config(format!("parsing {}: {e}", path.display())))?
    } else {
        StfeConfig::default()
    };
    config.validate()?;
    Ok(config)
}

/// Expand `~` in path to the user's home directory
pub fn expand_tilde(path: &Path) -> PathBuf {
    let s = path.to_string_lossy();
    if let Some(rest) = s.strip_prefix("~/") {
        let home = std::env::var("HOME").unwrap_or_default();
        PathBuf::from(home).join(rest)
    } else {
        path.to_path_buf()
    }
}
