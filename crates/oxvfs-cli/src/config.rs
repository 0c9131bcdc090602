//! CLI configuration file.
//!
//! ```toml
//! [kdf]
//! log_n = 15
//! r = 8
//! p = 1
//! ```
//!
//! Looked up at `--config`, else `$OXVFS_CONFIG_DIR/config.toml`, else the
//! platform config directory. A missing default file means defaults.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use directories::ProjectDirs;
use serde::Deserialize;

use oxvfs_core::KdfParams;

const CONFIG_FILE: &str = "config.toml";

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct CliConfig {
    /// scrypt cost for newly created password containers.
    pub kdf: KdfParams,
}

impl CliConfig {
    pub fn load(explicit: Option<&Path>) -> Result<Self> {
        if let Some(path) = explicit {
            return Self::from_file(path);
        }
        match default_config_path() {
            Some(path) if path.exists() => Self::from_file(&path),
            _ => Ok(Self::default()),
        }
    }

    fn from_file(path: &Path) -> Result<Self> {
        let text = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config: {}", path.display()))?;
        let config: Self = toml::from_str(&text)
            .with_context(|| format!("Failed to parse config: {}", path.display()))?;
        if config.kdf.log_n == 0 || config.kdf.log_n >= 64 {
            bail!("kdf.log_n must be between 1 and 63, got {}", config.kdf.log_n);
        }
        tracing::debug!(path = %path.display(), log_n = config.kdf.log_n, "Loaded config");
        Ok(config)
    }
}

fn default_config_path() -> Option<PathBuf> {
    if let Some(dir) = std::env::var_os("OXVFS_CONFIG_DIR") {
        return Some(PathBuf::from(dir).join(CONFIG_FILE));
    }
    ProjectDirs::from("", "", "oxvfs").map(|dirs| dirs.config_dir().join(CONFIG_FILE))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write_config(text: &str) -> (tempfile::TempDir, PathBuf) {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(CONFIG_FILE);
        fs::write(&path, text).unwrap();
        (dir, path)
    }

    #[test]
    fn test_kdf_section() {
        let (_dir, path) = write_config("[kdf]\nlog_n = 4\nr = 8\np = 1\n");
        let config = CliConfig::load(Some(&path)).unwrap();
        assert_eq!(config.kdf, KdfParams::insecure_fast());
    }

    #[test]
    fn test_empty_file_is_default() {
        let (_dir, path) = write_config("");
        assert_eq!(CliConfig::load(Some(&path)).unwrap(), CliConfig::default());
    }

    #[test]
    fn test_rejects_bad_files() {
        let (_dir, path) = write_config("[kdf]\nlog_n = 0\nr = 8\np = 1\n");
        assert!(CliConfig::load(Some(&path)).is_err());

        let (_dir, path) = write_config("colour = true\n");
        assert!(CliConfig::load(Some(&path)).is_err());

        assert!(CliConfig::load(Some(Path::new("/nonexistent/oxvfs.toml"))).is_err());
    }
}
