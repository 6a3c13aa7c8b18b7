use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use log::{info, warn};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::coordinator::GenerationSettings;

pub const DEFAULT_CONFIG_PATH: &str = "config/chat.json";

const MIN_TEMPERATURE: f32 = 0.1;
const MAX_TEMPERATURE: f32 = 2.0;

#[derive(Error, Debug, PartialEq, Eq)]
pub enum ConfigError {
    #[error("No rooms configured")]
    NoRooms,
    #[error("Room {0} is configured more than once")]
    DuplicateRoom(String),
    #[error("Tick interval must be greater than zero")]
    InvalidInterval,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RoomConfig {
    pub id: String,
    pub display_name: String,
    #[serde(default)]
    pub description: String,
    /// Sender name used for administrative announcements; defaults to the
    /// display name.
    #[serde(default)]
    pub system_sender: Option<String>,
    pub corpus: PathBuf,
    #[serde(default = "default_order")]
    pub order: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct GenerationConfig {
    pub max_tokens: usize,
    pub temperature: f32,
    pub context_window: usize,
    pub timeout_secs: u64,
}

impl Default for GenerationConfig {
    fn default() -> Self {
        let defaults = GenerationSettings::default();
        Self {
            max_tokens: defaults.max_tokens,
            temperature: defaults.temperature,
            context_window: defaults.context_window,
            timeout_secs: defaults.timeout.as_secs(),
        }
    }
}

impl GenerationConfig {
    pub fn settings(&self) -> GenerationSettings {
        GenerationSettings {
            max_tokens: self.max_tokens,
            temperature: self.temperature,
            context_window: self.context_window,
            timeout: Duration::from_secs(self.timeout_secs),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct AppConfig {
    pub port: u16,
    pub data_file: PathBuf,
    pub static_dir: PathBuf,
    pub tick_interval_secs: u64,
    pub default_page_size: usize,
    pub max_page_size: usize,
    pub generation: GenerationConfig,
    pub rooms: Vec<RoomConfig>,
}

fn default_order() -> usize {
    3
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            port: 5001,
            data_file: PathBuf::from("data/messages.json"),
            static_dir: PathBuf::from("public"),
            tick_interval_secs: 300,
            default_page_size: 50,
            max_page_size: 200,
            generation: GenerationConfig::default(),
            rooms: vec![RoomConfig {
                id: "general".to_string(),
                display_name: "General".to_string(),
                description: "A room that talks to itself".to_string(),
                system_sender: None,
                corpus: PathBuf::from("data/general.txt"),
                order: default_order(),
            }],
        }
    }
}

impl AppConfig {
    pub fn tick_interval(&self) -> Duration {
        Duration::from_secs(self.tick_interval_secs)
    }

    /// Clamps tunables into range and rejects configurations that cannot run.
    pub fn validate(&mut self) -> Result<(), ConfigError> {
        if self.rooms.is_empty() {
            return Err(ConfigError::NoRooms);
        }
        let mut seen = HashSet::new();
        for room in &self.rooms {
            if !seen.insert(room.id.as_str()) {
                return Err(ConfigError::DuplicateRoom(room.id.clone()));
            }
        }
        if self.tick_interval_secs == 0 {
            return Err(ConfigError::InvalidInterval);
        }

        let temperature = self.generation.temperature.clamp(MIN_TEMPERATURE, MAX_TEMPERATURE);
        if (temperature - self.generation.temperature).abs() > f32::EPSILON {
            warn!(
                "Temperature {} out of range; using {}",
                self.generation.temperature, temperature
            );
            self.generation.temperature = temperature;
        }
        self.max_page_size = self.max_page_size.max(1);
        self.default_page_size = self.default_page_size.clamp(1, self.max_page_size);
        self.generation.context_window = self.generation.context_window.max(1);
        Ok(())
    }
}

pub fn load_config(path: &Path) -> AppConfig {
    match fs::read_to_string(path) {
        Ok(content) => match serde_json::from_str::<AppConfig>(&content) {
            Ok(config) => config,
            Err(err) => {
                warn!("Failed to parse config file {}: {err}", path.display());
                AppConfig::default()
            }
        },
        Err(err) => {
            info!(
                "Config file {} not found ({err}); using defaults",
                path.display()
            );
            AppConfig::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_file_fills_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("chat.json");
        std::fs::write(
            &path,
            r#"{
                "port": 8080,
                "generation": { "temperature": 0.5 },
                "rooms": [{ "id": "lab", "displayName": "Hack Lab", "corpus": "lab.txt" }]
            }"#,
        )
        .unwrap();

        let config = load_config(&path);
        assert_eq!(config.port, 8080);
        assert_eq!(config.tick_interval_secs, 300);
        assert_eq!(config.generation.max_tokens, 500);
        assert!((config.generation.temperature - 0.5).abs() < f32::EPSILON);
        assert_eq!(config.rooms[0].order, 3);
        assert_eq!(config.rooms[0].system_sender, None);
    }

    #[test]
    fn missing_or_malformed_file_uses_defaults() {
        let dir = tempfile::tempdir().unwrap();
        assert_eq!(load_config(&dir.path().join("none.json")).port, 5001);

        let path = dir.path().join("bad.json");
        std::fs::write(&path, "{{{").unwrap();
        assert_eq!(load_config(&path).rooms.len(), 1);
    }

    #[test]
    fn validate_clamps_tunables() {
        let mut config = AppConfig::default();
        config.generation.temperature = 9.0;
        config.max_page_size = 0;
        config.validate().unwrap();

        assert!((config.generation.temperature - MAX_TEMPERATURE).abs() < f32::EPSILON);
        assert_eq!(config.max_page_size, 1);
        assert_eq!(config.default_page_size, 1);
    }

    #[test]
    fn validate_rejects_unrunnable_configs() {
        let mut config = AppConfig::default();
        config.rooms.push(config.rooms[0].clone());
        assert_eq!(
            config.validate(),
            Err(ConfigError::DuplicateRoom("general".to_string()))
        );

        let mut config = AppConfig::default();
        config.rooms.clear();
        assert_eq!(config.validate(), Err(ConfigError::NoRooms));

        let mut config = AppConfig::default();
        config.tick_interval_secs = 0;
        assert_eq!(config.validate(), Err(ConfigError::InvalidInterval));
    }
}
