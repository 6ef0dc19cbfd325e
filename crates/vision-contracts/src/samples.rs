use indexmap::IndexMap;
use serde::Serialize;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SampleDefinition {
    pub label: String,
    pub path: String,
    pub alt: String,
}

impl SampleDefinition {
    /// File stem of the resource path, e.g. `burnt_pcb`.
    pub fn slug(&self) -> &str {
        let file = self.file_name();
        file.rsplit_once('.').map(|(stem, _)| stem).unwrap_or(file)
    }

    pub fn file_name(&self) -> &str {
        self.path
            .rsplit('/')
            .next()
            .filter(|value| !value.is_empty())
            .unwrap_or("sample.jpg")
    }
}

#[derive(Debug, Clone)]
struct SampleEntry {
    definition: SampleDefinition,
    missing: Option<bool>,
}

/// The bundled one-click sample images plus what we last learned about
/// whether each resource exists.
#[derive(Debug, Clone)]
pub struct SampleCatalog {
    entries: IndexMap<String, SampleEntry>,
}

impl SampleCatalog {
    pub fn new(definitions: Vec<SampleDefinition>) -> Self {
        let entries = definitions
            .into_iter()
            .map(|definition| {
                (
                    definition.path.clone(),
                    SampleEntry {
                        definition,
                        missing: None,
                    },
                )
            })
            .collect();
        Self { entries }
    }

    pub fn definitions(&self) -> impl Iterator<Item = &SampleDefinition> {
        self.entries.values().map(|entry| &entry.definition)
    }

    /// Looks a sample up by path, slug or label (case-insensitive).
    pub fn find(&self, query: &str) -> Option<&SampleDefinition> {
        let needle = query.trim();
        if needle.is_empty() {
            return None;
        }
        if let Some(entry) = self.entries.get(needle) {
            return Some(&entry.definition);
        }
        let normalized = normalize_label(needle);
        self.definitions().find(|definition| {
            definition.slug().eq_ignore_ascii_case(needle)
                || definition.file_name().eq_ignore_ascii_case(needle)
                || normalize_label(&definition.label) == normalized
        })
    }

    /// `None` until a load of this sample has been attempted.
    pub fn is_missing(&self, path: &str) -> Option<bool> {
        self.entries.get(path).and_then(|entry| entry.missing)
    }

    pub fn mark_missing(&mut self, path: &str, missing: bool) {
        if let Some(entry) = self.entries.get_mut(path) {
            entry.missing = Some(missing);
        }
    }
}

impl Default for SampleCatalog {
    fn default() -> Self {
        Self::new(default_samples())
    }
}

fn normalize_label(raw: &str) -> String {
    raw.trim()
        .chars()
        .map(|ch| match ch {
            ' ' | '-' => '_',
            other => other.to_ascii_lowercase(),
        })
        .collect()
}

fn default_samples() -> Vec<SampleDefinition> {
    [
        (
            "Burnt PCB",
            "samples/burnt_pcb.jpg",
            "Sample of a burnt circuit board",
        ),
        (
            "Lab Equipment",
            "samples/lab_equipment.jpg",
            "Sample of laboratory equipment",
        ),
        (
            "Classroom",
            "samples/classroom.jpg",
            "Sample of a classroom environment",
        ),
    ]
    .into_iter()
    .map(|(label, path, alt)| SampleDefinition {
        label: label.to_string(),
        path: path.to_string(),
        alt: alt.to_string(),
    })
    .collect()
}
