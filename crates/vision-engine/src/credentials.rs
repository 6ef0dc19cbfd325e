use std::path::PathBuf;

use vision_contracts::models::{Capability, ModelRegistry};
use vision_contracts::settings::{KeyValueStore, MemoryStore, SettingsFile, StorageKey};

/// Best-effort persistence for the four credential/model fields.
///
/// Storage problems are logged and swallowed: a store that cannot be read or
/// written behaves like an empty one, and the session keeps working with the
/// values it holds in memory.
pub struct CredentialStore {
    backend: Option<Box<dyn KeyValueStore>>,
}

impl CredentialStore {
    pub fn new(backend: impl KeyValueStore + 'static) -> Self {
        Self {
            backend: Some(Box::new(backend)),
        }
    }

    /// Settings file at `path`; without a path (no config directory on this
    /// platform) the store is unavailable.
    pub fn open(path: Option<PathBuf>) -> Self {
        match path {
            Some(path) => Self::new(SettingsFile::new(path)),
            None => {
                tracing::warn!("no settings location available; credentials will not persist");
                Self::unavailable()
            }
        }
    }

    pub fn in_memory() -> Self {
        Self::new(MemoryStore::new())
    }

    pub fn unavailable() -> Self {
        Self { backend: None }
    }

    pub fn is_available(&self) -> bool {
        self.backend.is_some()
    }

    pub fn get(&mut self, key: StorageKey) -> Option<String> {
        let backend = self.backend.as_mut()?;
        match backend.get(key.as_str()) {
            Ok(value) => value.filter(|value| !value.trim().is_empty()),
            Err(err) => {
                tracing::warn!(key = %key, error = ?err, "settings read failed");
                None
            }
        }
    }

    /// Stores the trimmed value; a blank value removes the key instead.
    pub fn set(&mut self, key: StorageKey, value: &str) {
        let Some(backend) = self.backend.as_mut() else {
            tracing::debug!(key = %key, "settings unavailable; not persisting");
            return;
        };
        let trimmed = value.trim();
        let outcome = if trimmed.is_empty() {
            backend.remove(key.as_str())
        } else {
            backend.set(key.as_str(), trimmed)
        };
        if let Err(err) = outcome {
            tracing::warn!(key = %key, error = ?err, "unable to persist value");
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Credentials {
    pub caption_api_key: String,
    pub insight_api_key: String,
    pub caption_model: String,
    pub insight_model: String,
}

impl Credentials {
    /// Blank keys and the registry's default model for each capability.
    pub fn with_defaults(registry: &ModelRegistry) -> Self {
        let default_model = |capability| {
            registry
                .default_for(capability)
                .map(|model| model.id.clone())
                .unwrap_or_default()
        };
        Self {
            caption_api_key: String::new(),
            insight_api_key: String::new(),
            caption_model: default_model(Capability::Caption),
            insight_model: default_model(Capability::Insight),
        }
    }

    /// Overlays persisted values on `defaults`.
    ///
    /// Stored model ids the registry does not offer for the matching
    /// capability are ignored so a stale choice cannot stick.
    pub fn load(
        store: &mut CredentialStore,
        defaults: Credentials,
        registry: &ModelRegistry,
    ) -> Self {
        let mut credentials = defaults;
        for key in StorageKey::ALL {
            let Some(value) = store.get(key) else {
                continue;
            };
            let capability = match key {
                StorageKey::CaptionModel => Some(Capability::Caption),
                StorageKey::InsightModel => Some(Capability::Insight),
                _ => None,
            };
            if let Some(capability) = capability {
                if registry.ensure(&value, capability).is_none() {
                    tracing::warn!(model = %value, %capability, "ignoring unknown stored model");
                    continue;
                }
            }
            credentials.set(key, value);
        }
        credentials
    }

    /// Writes all four fields, changed or not.
    pub fn persist(&self, store: &mut CredentialStore) {
        for key in StorageKey::ALL {
            store.set(key, self.get(key));
        }
    }

    pub fn get(&self, key: StorageKey) -> &str {
        match key {
            StorageKey::CaptionApiKey => &self.caption_api_key,
            StorageKey::InsightApiKey => &self.insight_api_key,
            StorageKey::CaptionModel => &self.caption_model,
            StorageKey::InsightModel => &self.insight_model,
        }
    }

    pub fn set(&mut self, key: StorageKey, value: impl Into<String>) {
        let value = value.into().trim().to_string();
        match key {
            StorageKey::CaptionApiKey => self.caption_api_key = value,
            StorageKey::InsightApiKey => self.insight_api_key = value,
            StorageKey::CaptionModel => self.caption_model = value,
            StorageKey::InsightModel => self.insight_model = value,
        }
    }
}

/// `hf_a…cdef`-style masking for printing secrets.
pub fn mask_secret(value: &str) -> String {
    let chars: Vec<char> = value.trim().chars().collect();
    match chars.len() {
        0 => "(not set)".to_string(),
        1..=8 => "*".repeat(chars.len()),
        len => {
            let head: String = chars[..4].iter().collect();
            let tail: String = chars[len - 4..].iter().collect();
            format!("{head}…{tail}")
        }
    }
}
