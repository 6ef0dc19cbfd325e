use serde_json::{json, Value};
use vision_contracts::events::EventWriter;

use crate::pipeline::{
    AnalysisObserver, PipelineState, StatusTone, CAPTION_INITIAL, INSIGHT_INITIAL,
    STATUS_CLEARED,
};

/// What a user sees: status line, caption and insight outputs, and whether
/// analyze can be pressed. Optionally mirrors every change to an event log.
#[derive(Debug)]
pub struct OutputPanel {
    status: String,
    tone: StatusTone,
    caption: String,
    insight: String,
    analyze_enabled: bool,
    state: PipelineState,
    trail: Vec<PipelineState>,
    events: Option<EventWriter>,
}

impl OutputPanel {
    pub fn new() -> Self {
        Self {
            status: String::new(),
            tone: StatusTone::Info,
            caption: CAPTION_INITIAL.to_string(),
            insight: INSIGHT_INITIAL.to_string(),
            analyze_enabled: true,
            state: PipelineState::Idle,
            trail: Vec::new(),
            events: None,
        }
    }

    pub fn with_events(mut self, events: EventWriter) -> Self {
        self.events = Some(events);
        self
    }

    pub fn status(&self) -> &str {
        &self.status
    }

    pub fn tone(&self) -> StatusTone {
        self.tone
    }

    pub fn caption(&self) -> &str {
        &self.caption
    }

    pub fn insight(&self) -> &str {
        &self.insight
    }

    pub fn analyze_enabled(&self) -> bool {
        self.analyze_enabled
    }

    pub fn state(&self) -> PipelineState {
        self.state
    }

    /// Every state entered since creation or the last `take_trail`.
    pub fn trail(&self) -> &[PipelineState] {
        &self.trail
    }

    pub fn take_trail(&mut self) -> Vec<PipelineState> {
        std::mem::take(&mut self.trail)
    }

    /// Back to the initial outputs, as after pressing clear.
    pub fn reset(&mut self) {
        self.caption = CAPTION_INITIAL.to_string();
        self.insight = INSIGHT_INITIAL.to_string();
        self.emit("panel_reset", json!({}));
        self.set_status(StatusTone::Info, STATUS_CLEARED);
    }

    fn emit(&mut self, event_type: &str, fields: Value) {
        let Some(events) = self.events.as_mut() else {
            return;
        };
        if let Err(err) = events.emit(event_type, fields) {
            tracing::warn!(
                event_type,
                path = %events.path().display(),
                error = ?err,
                "event write failed"
            );
        }
    }
}

impl Default for OutputPanel {
    fn default() -> Self {
        Self::new()
    }
}

impl AnalysisObserver for OutputPanel {
    fn state_changed(&mut self, state: PipelineState) {
        self.state = state;
        self.trail.push(state);
        self.emit("state_changed", json!({ "state": state.as_str() }));
    }

    fn set_status(&mut self, tone: StatusTone, message: &str) {
        self.tone = tone;
        self.status = message.to_string();
        self.emit(
            "status",
            json!({ "tone": tone.as_str(), "message": message }),
        );
    }

    fn caption_output(&self) -> &str {
        &self.caption
    }

    fn set_caption_output(&mut self, text: &str) {
        self.caption = text.to_string();
        self.emit("caption_output", json!({ "text": text }));
    }

    fn insight_output(&self) -> &str {
        &self.insight
    }

    fn set_insight_output(&mut self, text: &str) {
        self.insight = text.to_string();
        self.emit("insight_output", json!({ "text": text }));
    }

    fn set_analyze_enabled(&mut self, enabled: bool) {
        self.analyze_enabled = enabled;
    }
}
