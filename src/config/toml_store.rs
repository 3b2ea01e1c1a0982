use std::path::{Path, PathBuf};

use anyhow::{Context, Result};

use super::{ConfigStore, ConfigValue};

/// File-backed `ConfigStore`. Every call re-reads the file so values never go stale
/// between pipeline steps. Writes rewrite the whole document; comments are not kept.
#[derive(Debug, Clone)]
pub struct TomlConfigStore {
    path: PathBuf,
}

impl TomlConfigStore {
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Load the document. A missing file is an empty table.
    fn load(&self) -> Result<toml::Table> {
        if !self.path.exists() {
            return Ok(toml::Table::new());
        }

        let content = std::fs::read_to_string(&self.path)
            .with_context(|| format!("Failed to read {}", self.path.display()))?;

        toml::from_str(&content).with_context(|| format!("Failed to parse {}", self.path.display()))
    }

    fn save(&self, table: &toml::Table) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create {}", parent.display()))?;
        }
        let content = toml::to_string_pretty(table)
            .with_context(|| format!("Failed to serialize {}", self.path.display()))?;
        std::fs::write(&self.path, content)
            .with_context(|| format!("Failed to write {}", self.path.display()))?;
        Ok(())
    }
}

fn workspace_key(workspace: &Path) -> String {
    workspace.to_string_lossy().into_owned()
}

impl ConfigStore for TomlConfigStore {
    fn get(&self, key: &str) -> Result<Option<ConfigValue>> {
        let table = self.load()?;
        let mut segments = key.split('.');
        let Some(first) = segments.next() else {
            return Ok(None);
        };

        let mut current = match table.get(first) {
            Some(value) => value,
            None => return Ok(None),
        };
        for segment in segments {
            current = match current.get(segment) {
                Some(value) => value,
                None => return Ok(None),
            };
        }
        Ok(Some(ConfigValue::from(current.clone())))
    }

    fn get_workspace(&self, workspace: &Path, key: &str) -> Result<Option<ConfigValue>> {
        let table = self.load()?;
        let value = table
            .get("workspace")
            .and_then(|w| w.get(workspace_key(workspace).as_str()))
            .and_then(|ws| ws.get(key))
            .cloned();
        Ok(value.map(ConfigValue::from))
    }

    fn set_workspace(&self, workspace: &Path, key: &str, value: &str) -> Result<()> {
        let mut table = self.load()?;

        let workspaces = table
            .entry("workspace")
            .or_insert_with(|| toml::Value::Table(toml::Table::new()));
        let toml::Value::Table(workspaces) = workspaces else {
            anyhow::bail!(
                "'workspace' in {} is not a table",
                self.path.display()
            );
        };

        let entry = workspaces
            .entry(workspace_key(workspace))
            .or_insert_with(|| toml::Value::Table(toml::Table::new()));
        let toml::Value::Table(entry) = entry else {
            anyhow::bail!(
                "workspace entry for {} in {} is not a table",
                workspace.display(),
                self.path.display()
            );
        };

        entry.insert(key.to_string(), toml::Value::String(value.to_string()));
        self.save(&table)
    }
}
