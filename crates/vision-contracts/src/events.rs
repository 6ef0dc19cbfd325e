use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use anyhow::Context;
use chrono::{SecondsFormat, Utc};
use serde_json::{Map, Value};

const RESERVED_KEYS: [&str; 3] = ["type", "session_id", "ts"];

/// JSONL log of what one captioning session showed the user.
///
/// Every line is `{"type", "session_id", "ts", ..fields}`. The file is
/// opened on first write and kept open for the rest of the session.
#[derive(Debug)]
pub struct EventWriter {
    path: PathBuf,
    session_id: String,
    file: Option<File>,
}

impl EventWriter {
    pub fn new(path: impl Into<PathBuf>, session_id: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            session_id: session_id.into(),
            file: None,
        }
    }

    pub fn for_new_session(path: impl Into<PathBuf>) -> Self {
        Self::new(path, uuid::Uuid::new_v4().to_string())
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    /// Appends one event. `fields` must be a JSON object; keys that collide
    /// with the envelope are dropped.
    pub fn emit(&mut self, event_type: &str, fields: Value) -> anyhow::Result<()> {
        let Value::Object(fields) = fields else {
            anyhow::bail!("fields for event '{event_type}' are not a JSON object");
        };
        let mut event = Map::new();
        event.insert("type".to_string(), Value::from(event_type));
        event.insert("session_id".to_string(), Value::from(self.session_id.as_str()));
        event.insert(
            "ts".to_string(),
            Value::from(Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true)),
        );
        event.extend(
            fields
                .into_iter()
                .filter(|(key, _)| !RESERVED_KEYS.contains(&key.as_str())),
        );

        let mut line = serde_json::to_string(&event)?;
        line.push('\n');
        let path = self.path.display().to_string();
        self.file()?
            .write_all(line.as_bytes())
            .with_context(|| format!("failed appending to {path}"))
    }

    fn file(&mut self) -> anyhow::Result<&mut File> {
        if self.file.is_none() {
            if let Some(parent) = self.path.parent() {
                std::fs::create_dir_all(parent)
                    .with_context(|| format!("failed creating {}", parent.display()))?;
            }
            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(&self.path)
                .with_context(|| format!("failed opening {}", self.path.display()))?;
            self.file = Some(file);
        }
        self.file
            .as_mut()
            .context("event log file missing after open")
    }
}

#[cfg(test)]
mod tests {
    use chrono::DateTime;
    use serde_json::{json, Value};

    use super::EventWriter;

    fn read_rows(path: &std::path::Path) -> anyhow::Result<Vec<Value>> {
        std::fs::read_to_string(path)?
            .lines()
            .map(|line| serde_json::from_str(line).map_err(Into::into))
            .collect()
    }

    #[test]
    fn events_carry_envelope_and_fields() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let path = temp.path().join("logs").join("events.jsonl");
        let mut writer = EventWriter::new(&path, "session-1");

        writer.emit("state_changed", json!({ "state": "captioning" }))?;
        writer.emit("caption_output", json!({ "text": "a lab bench" }))?;

        let rows = read_rows(&path)?;
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0]["type"], "state_changed");
        assert_eq!(rows[0]["session_id"], "session-1");
        assert_eq!(rows[0]["state"], "captioning");
        assert_eq!(rows[1]["text"], "a lab bench");
        DateTime::parse_from_rfc3339(rows[1]["ts"].as_str().unwrap_or(""))?;
        Ok(())
    }

    #[test]
    fn fields_cannot_rewrite_the_envelope() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let path = temp.path().join("events.jsonl");
        let mut writer = EventWriter::for_new_session(&path);

        writer.emit("status", json!({ "type": "spoofed", "session_id": "x", "tone": "info" }))?;
        assert!(writer.emit("status", json!("not an object")).is_err());

        let rows = read_rows(&path)?;
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0]["type"], "status");
        assert_eq!(rows[0]["session_id"], writer.session_id());
        assert_eq!(rows[0]["tone"], "info");
        Ok(())
    }
}
