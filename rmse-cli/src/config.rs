use serde::{Deserialize, Serialize};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use rmse_core::MAX_BACKUPS;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CliConfig {
    pub backup_retention: usize,
    pub log_level: String,
    pub log_file: Option<PathBuf>,
}

impl Default for CliConfig {
    fn default() -> Self {
        Self {
            backup_retention: MAX_BACKUPS,
            log_level: "info".to_string(),
            log_file: None,
        }
    }
}

pub fn config_path() -> Option<PathBuf> {
    let mut base = dirs::config_dir().or_else(dirs::data_dir)?;
    base.push("rmse");
    base.push("config.json");
    Some(base)
}

/// Reads the config at `path`. Missing or broken files give defaults.
pub fn load_config(path: Option<&Path>) -> CliConfig {
    let Some(path) = path.map(Path::to_path_buf).or_else(config_path) else {
        return CliConfig::default();
    };
    match fs::read_to_string(&path) {
        Ok(data) => match serde_json::from_str::<CliConfig>(&data) {
            Ok(cfg) => cfg,
            Err(e) => {
                // Logging is not up yet at this point.
                eprintln!("ignoring unreadable config {}: {e}", path.display());
                CliConfig::default()
            }
        },
        Err(_) => CliConfig::default(),
    }
}

pub fn save_config(path: &Path, cfg: &CliConfig) -> io::Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let data = serde_json::to_string_pretty(cfg)?;
    fs::write(path, data)
}
