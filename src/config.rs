//! Session configuration store
//!
//! A flat property map in the style of the tn5250 `.tn5250rc` files: keys
//! such as `host`, `enhanced` or `env.TERM` map to typed values. The core
//! only reads from it; the embedding program owns and persists it.

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{ConfigError, Result};

/// Default terminal type announced during Telnet negotiation
pub const DEFAULT_TERM: &str = "IBM-3179-2";

/// Supported configuration value types
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(untagged)]
pub enum ConfigValue {
    Boolean(bool),
    Integer(i64),
    String(String),
    StringArray(Vec<String>),
}

impl ConfigValue {
    pub fn as_string(&self) -> Option<&str> {
        match self {
            ConfigValue::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_integer(&self) -> Option<i64> {
        match self {
            ConfigValue::Integer(i) => Some(*i),
            ConfigValue::String(s) => s.trim().parse().ok(),
            _ => None,
        }
    }

    /// Booleans may also be spelled as strings or 0/1 integers.
    pub fn as_boolean(&self) -> Option<bool> {
        match self {
            ConfigValue::Boolean(b) => Some(*b),
            ConfigValue::Integer(i) => Some(*i != 0),
            ConfigValue::String(s) => match s.trim().to_ascii_lowercase().as_str() {
                "1" | "true" | "yes" | "on" => Some(true),
                "0" | "false" | "no" | "off" => Some(false),
                _ => None,
            },
            ConfigValue::StringArray(_) => None,
        }
    }

    pub fn as_string_array(&self) -> Option<&Vec<String>> {
        match self {
            ConfigValue::StringArray(arr) => Some(arr),
            _ => None,
        }
    }

    /// Render the value the way it would be written in a Telnet variable.
    pub fn to_plain_string(&self) -> String {
        match self {
            ConfigValue::Boolean(b) => if *b { "1".to_string() } else { "0".to_string() },
            ConfigValue::Integer(i) => i.to_string(),
            ConfigValue::String(s) => s.clone(),
            ConfigValue::StringArray(arr) => arr.join(","),
        }
    }
}

impl From<String> for ConfigValue {
    fn from(value: String) -> Self {
        ConfigValue::String(value)
    }
}

impl From<&str> for ConfigValue {
    fn from(value: &str) -> Self {
        ConfigValue::String(value.to_string())
    }
}

impl From<i64> for ConfigValue {
    fn from(value: i64) -> Self {
        ConfigValue::Integer(value)
    }
}

impl From<bool> for ConfigValue {
    fn from(value: bool) -> Self {
        ConfigValue::Boolean(value)
    }
}

impl From<Vec<String>> for ConfigValue {
    fn from(value: Vec<String>) -> Self {
        ConfigValue::StringArray(value)
    }
}

/// Property store handed to the stream, display and session
#[derive(Debug, Clone, PartialEq)]
pub struct SessionConfig {
    properties: HashMap<String, ConfigValue>,
    config_resource: String,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self::new(String::new())
    }
}

impl SessionConfig {
    /// Create a configuration holding the defaults
    pub fn new(config_resource: String) -> Self {
        let mut config = Self {
            properties: HashMap::new(),
            config_resource,
        };
        config.set_defaults();
        config
    }

    fn set_defaults(&mut self) {
        self.properties.insert("env.TERM".to_string(), DEFAULT_TERM.into());
        self.properties.insert("map".to_string(), "37".into());
        self.properties.insert("enhanced".to_string(), false.into());
        self.properties.insert("sign_key_hack".to_string(), false.into());
        self.properties.insert("field_minus_in_char".to_string(), false.into());
        self.properties.insert("allow_strpccmd".to_string(), false.into());
        self.properties.insert("uninhibited".to_string(), false.into());
        self.properties.insert("timeout".to_string(), 100i64.into());
    }

    /// Raw lookup
    pub fn get(&self, key: &str) -> Option<&ConfigValue> {
        self.properties.get(key)
    }

    pub fn get_string(&self, key: &str) -> Option<String> {
        self.properties.get(key).map(|v| v.to_plain_string())
    }

    pub fn get_string_or(&self, key: &str, default: &str) -> String {
        self.get_string(key).unwrap_or_else(|| default.to_string())
    }

    pub fn get_int(&self, key: &str) -> Option<i64> {
        self.properties.get(key).and_then(|v| v.as_integer())
    }

    pub fn get_int_or(&self, key: &str, default: i64) -> i64 {
        self.get_int(key).unwrap_or(default)
    }

    pub fn get_bool(&self, key: &str) -> Option<bool> {
        self.properties.get(key).and_then(|v| v.as_boolean())
    }

    /// Absent or unparseable booleans read as `default`.
    pub fn get_bool_or(&self, key: &str, default: bool) -> bool {
        self.get_bool(key).unwrap_or(default)
    }

    pub fn set<T: Into<ConfigValue>>(&mut self, key: &str, value: T) {
        self.properties.insert(key.to_string(), value.into());
    }

    pub fn remove(&mut self, key: &str) -> Option<ConfigValue> {
        self.properties.remove(key)
    }

    pub fn has(&self, key: &str) -> bool {
        self.properties.contains_key(key)
    }

    /// Terminal type string, e.g. `IBM-3179-2`
    pub fn terminal_type(&self) -> String {
        self.get_string_or("env.TERM", DEFAULT_TERM)
    }

    /// `env.*` variables other than TERM, sorted by name, for NEW-ENVIRON.
    pub fn environment(&self) -> Vec<(String, String)> {
        let mut vars: Vec<(String, String)> = self
            .properties
            .iter()
            .filter_map(|(k, v)| {
                let name = k.strip_prefix("env.")?;
                if name.is_empty() || name == "TERM" {
                    return None;
                }
                Some((name.to_string(), v.to_plain_string()))
            })
            .collect();
        vars.sort();
        vars
    }

    pub fn get_config_resource(&self) -> &str {
        &self.config_resource
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(&self.properties)?)
    }

    /// Merge properties from JSON on top of the current ones.
    pub fn merge_json(&mut self, json: &str) -> Result<()> {
        let loaded: HashMap<String, ConfigValue> = serde_json::from_str(json)?;
        self.properties.extend(loaded);
        Ok(())
    }

    /// Load defaults overlaid with the file at `path`, if it exists.
    pub fn load(path: &Path) -> Result<Self> {
        let mut config = Self::new(path.to_string_lossy().to_string());
        if path.exists() {
            let text = fs::read_to_string(path).map_err(|e| ConfigError::FileError {
                path: path.display().to_string(),
                error: e.to_string(),
            })?;
            config.merge_json(&text)?;
            log::debug!("loaded configuration from {}", path.display());
        }
        Ok(config)
    }

    /// Write the configuration back to its resource path.
    pub fn save(&self) -> Result<()> {
        if self.config_resource.is_empty() {
            return Err(ConfigError::MissingRequired { key: "config_resource".to_string() }.into());
        }
        let path = PathBuf::from(&self.config_resource);
        let io_err = |e: std::io::Error| ConfigError::FileError {
            path: path.display().to_string(),
            error: e.to_string(),
        };
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                fs::create_dir_all(parent).map_err(io_err)?;
            }
        }
        fs::write(&path, self.to_json()?).map_err(io_err)?;
        Ok(())
    }
}

/// Platform default location of the configuration file.
/// `TN5250_CONFIG` overrides it; otherwise `<config dir>/tn5250/session.json`.
pub fn default_config_path() -> PathBuf {
    if let Ok(p) = std::env::var("TN5250_CONFIG") {
        return PathBuf::from(p);
    }
    match dirs::config_dir() {
        Some(base) => base.join("tn5250").join("session.json"),
        None => PathBuf::from("session.json"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_values() {
        let config = SessionConfig::default();
        assert_eq!(config.terminal_type(), "IBM-3179-2");
        assert!(!config.get_bool_or("enhanced", true));
        assert_eq!(config.get_int_or("timeout", 0), 100);
    }

    #[test]
    fn test_boolean_spellings() {
        let mut config = SessionConfig::default();
        config.set("a", "yes");
        config.set("b", "0");
        config.set("c", 1i64);
        config.set("d", "maybe");
        assert_eq!(config.get_bool("a"), Some(true));
        assert_eq!(config.get_bool("b"), Some(false));
        assert_eq!(config.get_bool("c"), Some(true));
        assert_eq!(config.get_bool("d"), None);
        assert!(config.get_bool_or("d", true));
    }

    #[test]
    fn test_environment_excludes_term() {
        let mut config = SessionConfig::default();
        config.set("env.USER", "QSECOFR");
        config.set("env.DEVNAME", "DSP01");
        assert_eq!(
            config.environment(),
            vec![
                ("DEVNAME".to_string(), "DSP01".to_string()),
                ("USER".to_string(), "QSECOFR".to_string()),
            ]
        );
    }

    #[test]
    fn test_json_round_trip() {
        let mut config = SessionConfig::default();
        config.set("host", "as400.example.com");
        config.set("enhanced", true);
        let json = config.to_json().unwrap();

        let mut other = SessionConfig::new("x.json".to_string());
        other.merge_json(&json).unwrap();
        assert_eq!(other.get_string("host").as_deref(), Some("as400.example.com"));
        assert_eq!(other.get_bool("enhanced"), Some(true));
    }

    #[test]
    fn test_save_and_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("session.json");
        let mut config = SessionConfig::new(path.to_string_lossy().to_string());
        config.set("host", "ssl:pub400.com");
        config.save().unwrap();

        let loaded = SessionConfig::load(&path).unwrap();
        assert_eq!(loaded.get_string("host").as_deref(), Some("ssl:pub400.com"));
        assert_eq!(loaded.terminal_type(), DEFAULT_TERM);
    }

    #[test]
    fn test_save_without_resource_fails() {
        let config = SessionConfig::default();
        assert!(config.save().is_err());
    }
}
