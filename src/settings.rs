use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{Result, TallyError};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    pub data_dir: String,
    #[serde(default = "default_log_level")]
    pub log_level: String,
    /// Rankings at or above this score are accepted without asking.
    #[serde(default = "default_auto_accept_threshold")]
    pub auto_accept_threshold: f64,
    /// Merchant groups at least this large go to batch review.
    #[serde(default = "default_batch_min_size")]
    pub batch_min_size: usize,
    #[serde(default = "default_direction_threshold")]
    pub direction_threshold: f64,
    #[serde(default = "default_suggestion_timeout_secs")]
    pub suggestion_timeout_secs: u64,
    #[serde(default = "default_category_timeout_secs")]
    pub category_timeout_secs: u64,
    #[serde(default = "default_request_channel_capacity")]
    pub request_channel_capacity: usize,
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_auto_accept_threshold() -> f64 {
    0.90
}

fn default_batch_min_size() -> usize {
    2
}

fn default_direction_threshold() -> f64 {
    0.75
}

fn default_suggestion_timeout_secs() -> u64 {
    30
}

fn default_category_timeout_secs() -> u64 {
    10
}

fn default_request_channel_capacity() -> usize {
    64
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir().to_string_lossy().to_string(),
            log_level: default_log_level(),
            auto_accept_threshold: default_auto_accept_threshold(),
            batch_min_size: default_batch_min_size(),
            direction_threshold: default_direction_threshold(),
            suggestion_timeout_secs: default_suggestion_timeout_secs(),
            category_timeout_secs: default_category_timeout_secs(),
            request_channel_capacity: default_request_channel_capacity(),
        }
    }
}

impl Settings {
    pub fn suggestion_timeout(&self) -> Duration {
        Duration::from_secs(self.suggestion_timeout_secs)
    }

    pub fn category_timeout(&self) -> Duration {
        Duration::from_secs(self.category_timeout_secs)
    }

    pub fn db_path(&self) -> PathBuf {
        PathBuf::from(&self.data_dir).join("tally.db")
    }
}

fn config_dir() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".config")
        .join("tally")
}

fn settings_path() -> PathBuf {
    config_dir().join("settings.json")
}

fn default_data_dir() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("Documents")
        .join("tally")
}

pub fn load_settings() -> Settings {
    let path = settings_path();
    if path.exists() {
        let content = std::fs::read_to_string(&path).unwrap_or_default();
        serde_json::from_str(&content).unwrap_or_default()
    } else {
        Settings::default()
    }
}

pub fn save_settings(settings: &Settings) -> Result<()> {
    let dir = config_dir();
    std::fs::create_dir_all(&dir)?;
    let json = serde_json::to_string_pretty(settings)
        .map_err(|e| TallyError::Settings(e.to_string()))?;
    std::fs::write(settings_path(), format!("{json}\n"))?;
    Ok(())
}

pub fn shellexpand_path(path: &str) -> String {
    if path.starts_with('~') {
        if let Some(home) = dirs::home_dir() {
            return path.replacen('~', &home.to_string_lossy(), 1);
        }
    }
    std::fs::canonicalize(path)
        .unwrap_or_else(|_| PathBuf::from(path))
        .to_string_lossy()
        .to_string()
}
