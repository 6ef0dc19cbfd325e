mod keys;
mod store;

pub use keys::StorageKey;
pub use store::{KeyValueStore, MemoryStore, SettingsFile};
