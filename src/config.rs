use crate::engine::EngineSettings;
use crate::sync::SyncOptions;
use anyhow::{Context, Result, anyhow, bail};
use dirs::home_dir;
use serde::{Deserialize, Serialize};
use std::fs;
#[cfg(unix)]
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};

const APP_DIR: &str = ".HabitSync";
const CONFIG_FILE: &str = "config.json";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub user_id: Option<String>,
    pub db_path: PathBuf,
    pub api_port: u16,
    pub database_id: String,
    pub habits_collection: String,
    pub completions_collection: String,
    pub sync_full_history: bool,
    pub event_buffer: usize,
}

impl Default for Config {
    fn default() -> Self {
        let engine = EngineSettings::default();

        Self {
            user_id: None,
            db_path: default_root_dir().join("db").join("habits.db"),
            api_port: 7891,
            database_id: engine.database_id,
            habits_collection: engine.habits_collection,
            completions_collection: engine.completions_collection,
            sync_full_history: engine.sync.full_history,
            event_buffer: engine.sync.event_buffer,
        }
    }
}

impl Config {
    pub fn root_dir() -> Result<PathBuf> {
        Ok(default_root_dir())
    }

    pub fn config_path() -> Result<PathBuf> {
        Ok(default_root_dir().join(CONFIG_FILE))
    }

    pub fn load() -> Result<Self> {
        Self::load_from(&Self::config_path()?)
    }

    pub fn load_from(config_path: &Path) -> Result<Self> {
        let content = fs::read_to_string(config_path)
            .with_context(|| format!("Failed to read config file: {}", config_path.display()))?;

        serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", config_path.display()))
    }

    pub fn save(&self) -> Result<()> {
        self.save_to(&Self::config_path()?)
    }

    pub fn save_to(&self, config_path: &Path) -> Result<()> {
        if let Some(parent) = config_path.parent() {
            fs::create_dir_all(parent).with_context(|| {
                format!("Failed to create config directory: {}", parent.display())
            })?;
        }

        let content = serde_json::to_string_pretty(self).context("Failed to serialize config")?;
        fs::write(config_path, content)
            .with_context(|| format!("Failed to write config file: {}", config_path.display()))?;
        set_mode_600(config_path)?;

        Ok(())
    }

    pub fn ensure_bootstrap_files(&self) -> Result<()> {
        let root = Self::root_dir()?;
        fs::create_dir_all(&root)
            .with_context(|| format!("Failed to create root directory: {}", root.display()))?;

        if let Some(parent) = self.db_path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create DB directory: {}", parent.display()))?;
        }

        Ok(())
    }

    pub fn require_user(&self) -> Result<&str> {
        self.user_id
            .as_deref()
            .context("No user configured. Run `HabitSync onboard` or `HabitSync config set user_id <id>`")
    }

    pub fn engine_settings(&self) -> EngineSettings {
        EngineSettings {
            database_id: self.database_id.clone(),
            habits_collection: self.habits_collection.clone(),
            completions_collection: self.completions_collection.clone(),
            sync: SyncOptions {
                full_history: self.sync_full_history,
                event_buffer: self.event_buffer,
            },
        }
    }

    pub fn set_value(&mut self, key: &str, value: &str) -> Result<()> {
        match normalize_config_key(key) {
            "user_id" => {
                let trimmed = value.trim();
                if trimmed.is_empty() {
                    bail!("user_id must not be empty");
                }
                self.user_id = Some(trimmed.to_string());
            }
            "db_path" => {
                self.db_path = expand_home(value);
            }
            "api_port" => {
                self.api_port = value
                    .parse::<u16>()
                    .map_err(|_| anyhow!("api_port must be a number"))?;
            }
            "database_id" => {
                self.database_id = non_empty_name("database_id", value)?;
            }
            "habits_collection" => {
                self.habits_collection = non_empty_name("habits_collection", value)?;
            }
            "completions_collection" => {
                self.completions_collection = non_empty_name("completions_collection", value)?;
            }
            "sync_full_history" => {
                self.sync_full_history = value
                    .parse::<bool>()
                    .map_err(|_| anyhow!("sync_full_history must be true/false"))?;
            }
            "event_buffer" => {
                self.event_buffer = value
                    .parse::<usize>()
                    .map_err(|_| anyhow!("event_buffer must be a number"))?
                    .max(1);
            }
            _ => {
                bail!(
                    "Unsupported config key: {key}. Supported keys: user_id|user.id, db_path|db.path, api_port|api.port, database_id|store.database_id, habits_collection|store.habits_collection, completions_collection|store.completions_collection, sync_full_history|sync.full_history, event_buffer|sync.event_buffer"
                );
            }
        }

        Ok(())
    }

    pub fn get_value(&self, key: &str) -> Option<String> {
        match normalize_config_key(key) {
            "user_id" => Some(
                self.user_id
                    .clone()
                    .unwrap_or_else(|| "not_set".to_string()),
            ),
            "db_path" => Some(self.db_path.display().to_string()),
            "api_port" => Some(self.api_port.to_string()),
            "database_id" => Some(self.database_id.clone()),
            "habits_collection" => Some(self.habits_collection.clone()),
            "completions_collection" => Some(self.completions_collection.clone()),
            "sync_full_history" => Some(self.sync_full_history.to_string()),
            "event_buffer" => Some(self.event_buffer.to_string()),
            _ => None,
        }
    }
}

fn normalize_config_key(key: &str) -> &str {
    match key {
        "user_id" | "user.id" => "user_id",
        "db_path" | "db.path" => "db_path",
        "api_port" | "api.port" => "api_port",
        "database_id" | "store.database_id" => "database_id",
        "habits_collection" | "store.habits_collection" => "habits_collection",
        "completions_collection" | "store.completions_collection" => "completions_collection",
        "sync_full_history" | "sync.full_history" => "sync_full_history",
        "event_buffer" | "sync.event_buffer" => "event_buffer",
        _ => key,
    }
}

// Collection and database names end up inside dotted channel paths.
fn non_empty_name(key: &str, value: &str) -> Result<String> {
    let trimmed = value.trim();
    if trimmed.is_empty() || trimmed.contains('.') {
        bail!("{key} must be a non-empty name without dots");
    }
    Ok(trimmed.to_string())
}

pub fn expand_home(raw: &str) -> PathBuf {
    raw.strip_prefix("~/")
        .and_then(|stripped| home_dir().map(|home| home.join(stripped)))
        .unwrap_or_else(|| PathBuf::from(raw))
}

fn default_root_dir() -> PathBuf {
    home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(APP_DIR)
}

fn set_mode_600(path: &Path) -> Result<()> {
    #[cfg(unix)]
    {
        fs::set_permissions(path, fs::Permissions::from_mode(0o600))
            .with_context(|| format!("Failed to set file permissions: {}", path.display()))?;
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::Config;
    use std::path::PathBuf;

    #[test]
    fn dotted_aliases_map_to_fields() {
        let mut config = Config::default();
        config.set_value("user.id", " alice ").expect("user");
        config.set_value("api.port", "8080").expect("port");
        config.set_value("sync.full_history", "false").expect("history");
        config.set_value("store.habits_collection", "routines").expect("collection");

        assert_eq!(config.get_value("user_id").as_deref(), Some("alice"));
        assert_eq!(config.get_value("api.port").as_deref(), Some("8080"));
        assert!(!config.sync_full_history);
        assert_eq!(config.habits_collection, "routines");

        let settings = config.engine_settings();
        assert_eq!(settings.habits_collection, "routines");
        assert!(!settings.sync.full_history);
    }

    #[test]
    fn rejects_bad_values_and_unknown_keys() {
        let mut config = Config::default();
        assert!(config.set_value("api_port", "not-a-port").is_err());
        assert!(config.set_value("sync_full_history", "maybe").is_err());
        assert!(config.set_value("database_id", "a.b").is_err());
        assert!(config.set_value("user_id", "   ").is_err());
        assert!(config.set_value("theme", "dark").is_err());
        assert_eq!(config.get_value("theme"), None);
        assert_eq!(config, Config::default());
    }

    #[test]
    fn event_buffer_has_a_floor() {
        let mut config = Config::default();
        config.set_value("event_buffer", "0").expect("buffer");
        assert_eq!(config.event_buffer, 1);
    }

    #[test]
    fn missing_user_is_reported() {
        let config = Config::default();
        assert_eq!(config.get_value("user_id").as_deref(), Some("not_set"));
        assert!(config.require_user().is_err());
    }

    #[test]
    fn save_and_load_round_trip_through_disk() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("nested").join("config.json");

        let mut config = Config::default();
        config.set_value("user_id", "bob").expect("user");
        config.db_path = PathBuf::from("/tmp/habits.db");
        config.save_to(&path).expect("save");

        let loaded = Config::load_from(&path).expect("load");
        assert_eq!(loaded, config);

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let mode = std::fs::metadata(&path).expect("metadata").permissions().mode();
            assert_eq!(mode & 0o777, 0o600);
        }
    }

    #[test]
    fn partial_files_fill_in_defaults() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("config.json");
        std::fs::write(&path, r#"{ "user_id": "carol" }"#).expect("write");

        let loaded = Config::load_from(&path).expect("load");
        assert_eq!(loaded.user_id.as_deref(), Some("carol"));
        assert_eq!(loaded.habits_collection, Config::default().habits_collection);
    }
}
