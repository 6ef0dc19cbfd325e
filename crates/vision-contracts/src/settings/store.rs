use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use anyhow::Context;
use serde_json::{Map, Value};

/// String key/value storage backing the persisted settings.
///
/// Implementations report failures; deciding whether a failure matters is
/// left to the caller.
pub trait KeyValueStore: Send {
    fn get(&mut self, key: &str) -> anyhow::Result<Option<String>>;
    fn set(&mut self, key: &str, value: &str) -> anyhow::Result<()>;
    fn remove(&mut self, key: &str) -> anyhow::Result<()>;
}

/// JSON object file holding one string per key.
///
/// Every read goes back to disk and every write merges only the touched key
/// into the current file contents, so two processes sharing a settings file
/// do not drop each other's values.
#[derive(Debug, Clone)]
pub struct SettingsFile {
    path: PathBuf,
}

impl SettingsFile {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn load(&self) -> anyhow::Result<Map<String, Value>> {
        let raw = match std::fs::read_to_string(&self.path) {
            Ok(raw) => raw,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(Map::new()),
            Err(err) => {
                return Err(err).with_context(|| format!("failed reading {}", self.path.display()))
            }
        };
        if raw.trim().is_empty() {
            return Ok(Map::new());
        }
        let parsed: Value = serde_json::from_str(&raw)
            .with_context(|| format!("{} is not valid JSON", self.path.display()))?;
        match parsed {
            Value::Object(map) => Ok(map),
            _ => anyhow::bail!("{} does not hold a JSON object", self.path.display()),
        }
    }

    fn write(&self, payload: &Map<String, Value>) -> anyhow::Result<()> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("failed creating {}", parent.display()))?;
        }
        std::fs::write(
            &self.path,
            serde_json::to_string_pretty(&Value::Object(payload.clone()))?,
        )
        .with_context(|| format!("failed writing {}", self.path.display()))?;
        Ok(())
    }
}

impl KeyValueStore for SettingsFile {
    fn get(&mut self, key: &str) -> anyhow::Result<Option<String>> {
        let payload = self.load()?;
        Ok(payload.get(key).and_then(Value::as_str).map(str::to_string))
    }

    fn set(&mut self, key: &str, value: &str) -> anyhow::Result<()> {
        let mut on_disk = self.load()?;
        let snapshot = Value::String(value.to_string());
        if on_disk.get(key) == Some(&snapshot) {
            return Ok(());
        }
        on_disk.insert(key.to_string(), snapshot);
        self.write(&on_disk)
    }

    fn remove(&mut self, key: &str) -> anyhow::Result<()> {
        let mut on_disk = self.load()?;
        if on_disk.remove(key).is_none() {
            return Ok(());
        }
        self.write(&on_disk)
    }
}

/// Process-local store; values vanish when it is dropped.
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    values: BTreeMap<String, String>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl KeyValueStore for MemoryStore {
    fn get(&mut self, key: &str) -> anyhow::Result<Option<String>> {
        Ok(self.values.get(key).cloned())
    }

    fn set(&mut self, key: &str, value: &str) -> anyhow::Result<()> {
        self.values.insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn remove(&mut self, key: &str) -> anyhow::Result<()> {
        self.values.remove(key);
        Ok(())
    }
}
