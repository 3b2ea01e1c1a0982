//! Persisted configuration access.
//!
//! Two files matter to session resolution:
//! - the user config at `<configDir>/config.toml`, which also carries per-workspace
//!   state written back after a successful session
//! - a discovered config (`--config`, else the nearest `.containai/config.toml`
//!   above the workspace, else the user config) that supplies defaults
//!
//! # File format
//!
//! ```toml
//! [agent]
//! data_volume = "containai-data"
//!
//! [secure_engine]
//! context_name = "containai-docker"
//!
//! [ssh]
//! port_range_start = 2300
//! port_range_end = 2500
//!
//! [workspace."/home/me/src/app"]
//! data_volume = "app-data"
//! container_name = "app-main"
//! ```

mod toml_store;

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use anyhow::Result;

use crate::environment::PortRange;
use crate::errors::ValidationError;

pub use toml_store::TomlConfigStore;

/// Name of the per-repository config directory searched above the workspace.
pub const LOCAL_CONFIG_DIR: &str = ".containai";

/// A parsed configuration value.
#[derive(Debug, Clone, PartialEq)]
pub enum ConfigValue {
    String(String),
    Bool(bool),
    Int(i64),
    Float(f64),
    Timestamp(String),
    Table(BTreeMap<String, ConfigValue>),
    Array(Vec<ConfigValue>),
    Null,
}

impl ConfigValue {
    /// The value as a non-empty string, if it is one.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            ConfigValue::String(s) if !s.trim().is_empty() => Some(s.trim()),
            ConfigValue::String(_)
            | ConfigValue::Bool(_)
            | ConfigValue::Int(_)
            | ConfigValue::Float(_)
            | ConfigValue::Timestamp(_)
            | ConfigValue::Table(_)
            | ConfigValue::Array(_)
            | ConfigValue::Null => None,
        }
    }

    /// The value as an integer. Numeric strings are accepted.
    pub fn as_int(&self) -> Option<i64> {
        match self {
            ConfigValue::Int(i) => Some(*i),
            ConfigValue::String(s) => s.trim().parse().ok(),
            ConfigValue::Bool(_)
            | ConfigValue::Float(_)
            | ConfigValue::Timestamp(_)
            | ConfigValue::Table(_)
            | ConfigValue::Array(_)
            | ConfigValue::Null => None,
        }
    }
}

impl From<toml::Value> for ConfigValue {
    fn from(value: toml::Value) -> Self {
        match value {
            toml::Value::String(s) => ConfigValue::String(s),
            toml::Value::Integer(i) => ConfigValue::Int(i),
            toml::Value::Float(f) => ConfigValue::Float(f),
            toml::Value::Boolean(b) => ConfigValue::Bool(b),
            toml::Value::Datetime(dt) => ConfigValue::Timestamp(dt.to_string()),
            toml::Value::Array(items) => {
                ConfigValue::Array(items.into_iter().map(ConfigValue::from).collect())
            }
            toml::Value::Table(table) => ConfigValue::Table(
                table
                    .into_iter()
                    .map(|(k, v)| (k, ConfigValue::from(v)))
                    .collect(),
            ),
        }
    }
}

/// Key/value access to a configuration file.
pub trait ConfigStore: Send + Sync {
    /// Look up a dotted global key such as `agent.data_volume`.
    fn get(&self, key: &str) -> Result<Option<ConfigValue>>;

    /// Look up a key inside the workspace's `[workspace."<path>"]` table.
    fn get_workspace(&self, workspace: &Path, key: &str) -> Result<Option<ConfigValue>>;

    /// Set a key inside the workspace's table, creating the file if needed.
    fn set_workspace(&self, workspace: &Path, key: &str, value: &str) -> Result<()>;
}

/// Locate the config that supplies defaults for `workspace`.
///
/// An explicit path must exist. Otherwise the nearest `.containai/config.toml`
/// at or above the workspace wins, then the user config if present.
pub fn discover_config(
    workspace: &Path,
    explicit: Option<&Path>,
    user_config: &Path,
) -> Result<Option<PathBuf>, ValidationError> {
    if let Some(path) = explicit {
        if !path.is_file() {
            return Err(ValidationError::ConfigNotFound(path.to_path_buf()));
        }
        return Ok(Some(path.to_path_buf()));
    }

    for dir in workspace.ancestors() {
        let candidate = dir.join(LOCAL_CONFIG_DIR).join("config.toml");
        if candidate.is_file() {
            return Ok(Some(candidate));
        }
    }

    if user_config.is_file() {
        return Ok(Some(user_config.to_path_buf()));
    }
    Ok(None)
}

/// SSH port range from `[ssh]`, falling back to the default range.
pub fn port_range(store: &dyn ConfigStore) -> Result<PortRange> {
    let start = store.get("ssh.port_range_start")?.and_then(|v| v.as_int());
    let end = store.get("ssh.port_range_end")?.and_then(|v| v.as_int());
    match (start, end) {
        (None, None) => Ok(PortRange::DEFAULT),
        (start, end) => {
            let start = start.unwrap_or(i64::from(PortRange::DEFAULT.start));
            let end = end.unwrap_or(i64::from(PortRange::DEFAULT.end));
            let start = u16::try_from(start)
                .map_err(|_| anyhow::anyhow!("ssh.port_range_start {} is not a port", start))?;
            let end = u16::try_from(end)
                .map_err(|_| anyhow::anyhow!("ssh.port_range_end {} is not a port", end))?;
            PortRange::new(start, end)
        }
    }
}
