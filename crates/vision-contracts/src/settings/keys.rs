use std::fmt;

/// The fixed set of persisted credential and model fields.
///
/// The string names are shared with earlier releases of the app, so a
/// settings file written by any version rehydrates the same fields.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StorageKey {
    CaptionApiKey,
    InsightApiKey,
    CaptionModel,
    InsightModel,
}

impl StorageKey {
    pub const ALL: [StorageKey; 4] = [
        StorageKey::CaptionApiKey,
        StorageKey::InsightApiKey,
        StorageKey::CaptionModel,
        StorageKey::InsightModel,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            StorageKey::CaptionApiKey => "svc:hfKey",
            StorageKey::InsightApiKey => "svc:orKey",
            StorageKey::CaptionModel => "svc:blipModel",
            StorageKey::InsightModel => "svc:orModel",
        }
    }

    /// Short name used on the command line (`config set hf_key ...`).
    pub fn cli_name(self) -> &'static str {
        match self {
            StorageKey::CaptionApiKey => "hf_key",
            StorageKey::InsightApiKey => "or_key",
            StorageKey::CaptionModel => "caption_model",
            StorageKey::InsightModel => "insight_model",
        }
    }

    pub fn is_secret(self) -> bool {
        matches!(self, StorageKey::CaptionApiKey | StorageKey::InsightApiKey)
    }

    pub fn parse(raw: &str) -> Option<StorageKey> {
        let needle = raw.trim();
        Self::ALL.into_iter().find(|key| {
            key.as_str() == needle || key.cli_name().eq_ignore_ascii_case(needle)
        })
    }
}

impl fmt::Display for StorageKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
