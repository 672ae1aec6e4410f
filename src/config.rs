use log::warn;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::reader::context::ReadingMode;
use crate::reader::page_cache::{DEFAULT_DISK_CACHE_MB, DEFAULT_MEMORY_PAGES};
use crate::reader::preload::DEFAULT_OVERSCAN;
use crate::reader::progress_sync::SyncTimings;
use crate::reader::session::SessionOptions;

const SERVER_ENV: &str = "COMIC_SHELF_SERVER";
const TOKEN_ENV: &str = "COMIC_SHELF_TOKEN";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub server_url: String,
    pub api_token: Option<String>,
    pub reading_mode: ReadingMode,
    pub spread_mode: bool,
    pub overscan: u32,
    pub progress_debounce_ms: u64,
    pub settle_delay_ms: u64,
    pub spread_width_tolerance: f64,
    pub memory_pages: usize,
    pub disk_cache_mb: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            server_url: "http://localhost:8000".to_string(),
            api_token: None,
            reading_mode: ReadingMode::Paged,
            spread_mode: false,
            overscan: DEFAULT_OVERSCAN,
            progress_debounce_ms: 1000,
            settle_delay_ms: 300,
            spread_width_tolerance: 0.10,
            memory_pages: DEFAULT_MEMORY_PAGES,
            disk_cache_mb: DEFAULT_DISK_CACHE_MB,
        }
    }
}

fn get_config_path() -> PathBuf {
    let config_dir = dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("comic-shelf");

    fs::create_dir_all(&config_dir).ok();
    config_dir.join("config.json")
}

impl Config {
    /// Loads the user's config, falling back to defaults, then applies env overrides.
    pub fn load() -> Self {
        let mut config = Self::load_from(&get_config_path());
        config.apply_env(
            std::env::var(SERVER_ENV).ok(),
            std::env::var(TOKEN_ENV).ok(),
        );
        config
    }

    pub fn load_from(path: &Path) -> Self {
        if !path.exists() {
            return Config::default();
        }
        match fs::read_to_string(path) {
            Ok(content) => serde_json::from_str(&content).unwrap_or_else(|e| {
                warn!("Ignoring invalid config {}: {}", path.display(), e);
                Config::default()
            }),
            Err(e) => {
                warn!("Could not read config {}: {}", path.display(), e);
                Config::default()
            }
        }
    }

    pub fn save(&self) {
        self.save_to(&get_config_path());
    }

    pub fn save_to(&self, path: &Path) {
        if let Ok(content) = serde_json::to_string_pretty(self) {
            if let Err(e) = fs::write(path, content) {
                warn!("Could not write config {}: {}", path.display(), e);
            }
        }
    }

    fn apply_env(&mut self, server: Option<String>, token: Option<String>) {
        if let Some(server) = server.filter(|s| !s.trim().is_empty()) {
            self.server_url = server;
        }
        if let Some(token) = token.filter(|t| !t.trim().is_empty()) {
            self.api_token = Some(token);
        }
    }

    pub fn session_options(&self) -> SessionOptions {
        SessionOptions {
            mode: self.reading_mode,
            spread_enabled: self.spread_mode,
            overscan: self.overscan,
            spread_width_tolerance: self.spread_width_tolerance,
            timings: SyncTimings {
                debounce: Duration::from_millis(self.progress_debounce_ms),
                settle_delay: Duration::from_millis(self.settle_delay_ms),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn temp_path(name: &str) -> PathBuf {
        std::env::temp_dir().join(format!(
            "comic-shelf-config-{}-{}.json",
            std::process::id(),
            name
        ))
    }

    #[test]
    fn missing_fields_use_defaults() {
        let config: Config =
            serde_json::from_str(r#"{"reading_mode":"webtoon","overscan":5}"#).unwrap();
        assert_eq!(config.reading_mode, ReadingMode::Webtoon);
        assert_eq!(config.overscan, 5);
        assert_eq!(config.progress_debounce_ms, 1000);
        assert_eq!(config.server_url, "http://localhost:8000");
    }

    #[test]
    fn invalid_file_falls_back_to_defaults() {
        let path = temp_path("invalid");
        fs::write(&path, "not json").unwrap();
        assert_eq!(Config::load_from(&path), Config::default());
        let _ = fs::remove_file(&path);
    }

    #[test]
    fn save_and_load() {
        let path = temp_path("roundtrip");
        let config = Config {
            spread_mode: true,
            reading_mode: ReadingMode::Continuous,
            ..Config::default()
        };
        config.save_to(&path);
        assert_eq!(Config::load_from(&path), config);
        let _ = fs::remove_file(&path);
    }

    #[test]
    fn env_overrides_server_and_token() {
        let mut config = Config::default();
        config.apply_env(Some("http://shelf:9000".into()), Some(" ".into()));
        assert_eq!(config.server_url, "http://shelf:9000");
        assert!(config.api_token.is_none());
    }

    #[test]
    fn session_options_follow_config() {
        let config = Config {
            progress_debounce_ms: 250,
            spread_mode: true,
            ..Config::default()
        };
        let options = config.session_options();
        assert_eq!(options.timings.debounce, Duration::from_millis(250));
        assert!(options.spread_enabled);
    }
}
