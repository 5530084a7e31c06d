use std::path::PathBuf;

use directories::ProjectDirs;
use serde::Deserialize;

/// Application configuration loaded from TOML config file.
/// All fields have sensible defaults — the config file is optional.
#[derive(Debug, Deserialize, Default)]
#[serde(default)]
pub struct AppConfig {
    /// Playlists to collect (used when `collect` has no CLI args).
    pub playlists: Vec<String>,
    /// Directory holding the JSON song stores (overrides the current directory).
    pub data_dir: Option<PathBuf>,
    /// Upstream API settings.
    pub api: ApiConfig,
    /// Feature-extraction settings.
    pub analysis: AnalysisConfig,
}

/// Upstream API configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ApiConfig {
    /// Delay between processed records in milliseconds.
    pub rate_limit_ms: u64,
    /// Identifying header sent with stream requests. The CDN rejects
    /// default library user agents.
    pub user_agent: String,
    /// Pre-obtained API client id. Scraped from the web app when unset.
    pub client_id: Option<String>,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            rate_limit_ms: 1000,
            user_agent: "Mozilla/5.0".to_string(),
            client_id: None,
        }
    }
}

/// Feature-extraction configuration.
#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(default)]
pub struct AnalysisConfig {
    /// Number of contiguous structural sections per track.
    pub num_sections: usize,
    /// Beats grouped into one bar. The original hardwired 4/4; keep it
    /// explicit so other meters are at least expressible.
    pub beats_per_bar: usize,
    /// Per-stage attempt cap before a failing record is skipped.
    pub max_attempts: u32,
}

impl Default for AnalysisConfig {
    fn default() -> Self {
        Self {
            num_sections: 4,
            beats_per_bar: 4,
            max_attempts: 3,
        }
    }
}

impl AppConfig {
    /// Load config from `~/.config/cratedig/config.toml`.
    /// Returns default config if file doesn't exist.
    /// Logs a warning if the file exists but can't be parsed.
    pub fn load() -> Self {
        let config_path = Self::config_path();
        match config_path {
            Some(path) if path.exists() => {
                match std::fs::read_to_string(&path) {
                    Ok(contents) => {
                        match toml::from_str::<AppConfig>(&contents) {
                            Ok(config) => {
                                log::info!("Loaded config from {}", path.display());
                                config
                            }
                            Err(e) => {
                                log::warn!(
                                    "Failed to parse {}: {}. Using defaults.",
                                    path.display(),
                                    e
                                );
                                Self::default()
                            }
                        }
                    }
                    Err(e) => {
                        log::warn!(
                            "Failed to read {}: {}. Using defaults.",
                            path.display(),
                            e
                        );
                        Self::default()
                    }
                }
            }
            _ => {
                log::debug!("No config file found, using defaults");
                Self::default()
            }
        }
    }

    /// Get the config file path.
    fn config_path() -> Option<PathBuf> {
        ProjectDirs::from("", "", crate::APP_NAME)
            .map(|dirs| dirs.config_dir().join("config.toml"))
    }
}
