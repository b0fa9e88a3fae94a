use anyhow::{Context, Result};
use directories::BaseDirs;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::warn;

/// Terminal preferences, kept next to `rapport.yaml` as `cli_settings.json`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CliPreferences {
    #[serde(default = "CliPreferences::default_show_timestamps")]
    pub show_timestamps: bool,
    #[serde(default = "CliPreferences::default_load_history")]
    pub load_history_on_start: bool,
    #[serde(default)]
    pub last_conversation: Option<String>,
}

impl Default for CliPreferences {
    fn default() -> Self {
        Self {
            show_timestamps: CliPreferences::default_show_timestamps(),
            load_history_on_start: CliPreferences::default_load_history(),
            last_conversation: None,
        }
    }
}

impl CliPreferences {
    fn default_show_timestamps() -> bool {
        true
    }

    fn default_load_history() -> bool {
        true
    }
}

pub fn preferences_path() -> PathBuf {
    config_dir().join("cli_settings.json")
}

/// Reads preferences, writing defaults when the file is missing or unreadable.
pub async fn load_preferences(path: &Path) -> Result<CliPreferences> {
    match tokio::fs::read_to_string(path).await {
        Ok(contents) => match serde_json::from_str(&contents) {
            Ok(preferences) => Ok(preferences),
            Err(err) => {
                let defaults = CliPreferences::default();
                save_preferences(path, &defaults).await?;
                warn!(
                    error = ?err,
                    "failed to parse cli_settings.json, resetting to defaults"
                );
                Ok(defaults)
            }
        },
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
            let defaults = CliPreferences::default();
            save_preferences(path, &defaults).await?;
            Ok(defaults)
        }
        Err(err) => Err(err).context("failed to read cli_settings.json"),
    }
}

pub async fn save_preferences(path: &Path, preferences: &CliPreferences) -> Result<()> {
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent)
            .await
            .with_context(|| format!("failed to create directory {}", parent.display()))?;
    }
    let serialized = serde_json::to_string_pretty(preferences)?;
    tokio::fs::write(path, serialized)
        .await
        .with_context(|| format!("failed to write cli_settings.json at {}", path.display()))
}

fn config_dir() -> PathBuf {
    if let Some(base) = BaseDirs::new() {
        base.config_dir().join("rapport")
    } else {
        PathBuf::from(".rapport")
    }
}
