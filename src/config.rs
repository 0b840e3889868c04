//! Configuration management for Zellie

use crate::error::{Result, ZellieError};
use crate::llm::device::DevicePreference;
use crate::llm::engine::InferenceConfig;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Config {
    pub models: ModelConfig,
    #[serde(default)]
    pub inference: InferenceConfig,
    #[serde(default)]
    pub runtime: RuntimeConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelConfig {
    pub models_dir: PathBuf,
    pub default_model: String,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct RuntimeConfig {
    #[serde(default)]
    pub device: DevicePreference,
}

impl Default for Config {
    fn default() -> Self {
        let models_dir = dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".zellie")
            .join("models");

        Self {
            models: ModelConfig {
                models_dir,
                default_model: "smollm2-360m".to_string(),
            },
            inference: InferenceConfig::default(),
            runtime: RuntimeConfig::default(),
        }
    }
}

impl Config {
    /// Load the default config file, creating it with defaults on first run
    pub fn load() -> Result<Self> {
        let config_path = Self::config_path();

        if config_path.exists() {
            Self::load_from(&config_path)
        } else {
            let config = Self::default();
            config.save_to(&config_path)?;
            Ok(config)
        }
    }

    /// Load an explicit config file, which must exist
    pub fn load_from(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Err(ZellieError::Configuration(format!(
                "Config file not found: {}",
                path.display()
            )));
        }
        let content = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&content)
            .map_err(|e| ZellieError::Configuration(format!("Failed to parse config: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    pub fn save(&self) -> Result<()> {
        self.save_to(&Self::config_path())
    }

    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let content = toml::to_string_pretty(self)
            .map_err(|e| ZellieError::Configuration(format!("Failed to serialize config: {}", e)))?;

        std::fs::write(path, content)?;
        Ok(())
    }

    pub fn config_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| dirs::home_dir().unwrap_or_else(|| PathBuf::from(".")))
            .join("zellie")
            .join("config.toml")
    }

    pub fn validate(&self) -> Result<()> {
        if self.models.default_model.trim().is_empty() {
            return Err(ZellieError::Configuration("models.default_model must not be empty".to_string()));
        }
        self.inference
            .validate()
            .map_err(|e| ZellieError::Configuration(e.to_string()))
    }

    /// Set a dotted key such as `inference.max_tokens`. The new value is parsed
    /// as the type the key currently holds; the result must still validate.
    pub fn set(&mut self, key: &str, value: &str) -> Result<()> {
        let mut root = toml::Value::try_from(&*self)
            .map_err(|e| ZellieError::Configuration(format!("Failed to serialize config: {}", e)))?;

        let (parents, leaf) = match key.rsplit_once('.') {
            Some((parents, leaf)) => (parents.split('.').collect::<Vec<_>>(), leaf),
            None => (Vec::new(), key),
        };

        let mut table = root
            .as_table_mut()
            .ok_or_else(|| ZellieError::Configuration("Config root is not a table".to_string()))?;
        for part in parents {
            table = table
                .get_mut(part)
                .and_then(toml::Value::as_table_mut)
                .ok_or_else(|| ZellieError::Configuration(format!("Unknown config section '{}'", part)))?;
        }

        if is_optional_key(key) && is_unset_value(value) {
            table.remove(leaf);
            return self.apply(root, key);
        }

        let new_value = match table.get(leaf) {
            Some(current) => parse_like(current, value, key)?,
            // Optional keys left unset are absent from the serialized form
            None if is_optional_key(key) => parse_untyped(value),
            None => return Err(ZellieError::Configuration(format!("Unknown config key '{}'", key))),
        };
        table.insert(leaf.to_string(), new_value);
        self.apply(root, key)
    }

    fn apply(&mut self, root: toml::Value, key: &str) -> Result<()> {
        let updated: Config = root
            .try_into()
            .map_err(|e| ZellieError::Configuration(format!("Invalid value for '{}': {}", key, e)))?;
        updated.validate()?;
        *self = updated;
        Ok(())
    }

    pub fn models_dir(&self) -> &PathBuf {
        &self.models.models_dir
    }
}

fn is_optional_key(key: &str) -> bool {
    matches!(key, "inference.seed" | "inference.top_k")
}

fn is_unset_value(raw: &str) -> bool {
    matches!(raw.trim().to_lowercase().as_str(), "none" | "off")
}

fn parse_like(current: &toml::Value, raw: &str, key: &str) -> Result<toml::Value> {
    let invalid = |kind: &str| ZellieError::Configuration(format!("'{}' expects {}, got '{}'", key, kind, raw));
    Ok(match current {
        toml::Value::Integer(_) => toml::Value::Integer(raw.trim().parse().map_err(|_| invalid("an integer"))?),
        toml::Value::Float(_) => toml::Value::Float(raw.trim().parse().map_err(|_| invalid("a number"))?),
        toml::Value::Boolean(_) => toml::Value::Boolean(raw.trim().parse().map_err(|_| invalid("true or false"))?),
        toml::Value::String(_) => toml::Value::String(raw.to_string()),
        _ => return Err(invalid("a scalar value")),
    })
}

fn parse_untyped(raw: &str) -> toml::Value {
    let raw = raw.trim();
    if let Ok(i) = raw.parse::<i64>() {
        toml::Value::Integer(i)
    } else if let Ok(f) = raw.parse::<f64>() {
        toml::Value::Float(f)
    } else if let Ok(b) = raw.parse::<bool>() {
        toml::Value::Boolean(b)
    } else {
        toml::Value::String(raw.to_string())
    }
}
