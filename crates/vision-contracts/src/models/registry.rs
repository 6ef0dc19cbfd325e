use std::fmt;

use indexmap::IndexMap;
use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Capability {
    /// Image in, short description out (Hugging Face inference).
    Caption,
    /// Chat completion over a caption (OpenRouter).
    Insight,
}

impl fmt::Display for Capability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Capability::Caption => f.write_str("caption"),
            Capability::Insight => f.write_str("insight"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ModelSpec {
    pub id: String,
    pub label: String,
    pub capability: Capability,
}

impl ModelSpec {
    pub fn supports(&self, capability: Capability) -> bool {
        self.capability == capability
    }
}

/// Ordered model choices; the first entry per capability is its default.
#[derive(Debug, Clone)]
pub struct ModelRegistry {
    models: IndexMap<String, ModelSpec>,
}

impl ModelRegistry {
    pub fn new(models: Option<IndexMap<String, ModelSpec>>) -> Self {
        Self {
            models: models.unwrap_or_else(default_models),
        }
    }

    pub fn get(&self, id: &str) -> Option<&ModelSpec> {
        self.models.get(id)
    }

    pub fn by_capability(&self, capability: Capability) -> Vec<ModelSpec> {
        self.models
            .values()
            .filter(|model| model.supports(capability))
            .cloned()
            .collect()
    }

    pub fn default_for(&self, capability: Capability) -> Option<&ModelSpec> {
        self.models
            .values()
            .find(|model| model.supports(capability))
    }

    pub fn ensure(&self, id: &str, capability: Capability) -> Option<ModelSpec> {
        let model = self.get(id)?;
        if model.supports(capability) {
            return Some(model.clone());
        }
        None
    }
}

impl Default for ModelRegistry {
    fn default() -> Self {
        Self::new(None)
    }
}

fn default_models() -> IndexMap<String, ModelSpec> {
    let mut map = IndexMap::new();

    let mut insert = |id: &str, label: &str, capability: Capability| {
        map.insert(
            id.to_string(),
            ModelSpec {
                id: id.to_string(),
                label: label.to_string(),
                capability,
            },
        );
    };

    insert(
        "Salesforce/blip-image-captioning-large",
        "BLIP large",
        Capability::Caption,
    );
    insert(
        "Salesforce/blip-image-captioning-base",
        "BLIP base",
        Capability::Caption,
    );
    insert(
        "nlpconnect/vit-gpt2-image-captioning",
        "ViT-GPT2",
        Capability::Caption,
    );
    insert("openai/gpt-4o-mini", "GPT-4o mini", Capability::Insight);
    insert(
        "anthropic/claude-3.5-haiku",
        "Claude 3.5 Haiku",
        Capability::Insight,
    );
    insert(
        "google/gemini-2.0-flash-001",
        "Gemini 2.0 Flash",
        Capability::Insight,
    );
    insert(
        "meta-llama/llama-3.1-8b-instruct",
        "Llama 3.1 8B Instruct",
        Capability::Insight,
    );

    map
}
