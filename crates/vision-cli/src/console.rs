use std::io::{self, Write};

use vision_engine::pipeline::{
    AnalysisObserver, PipelineState, StatusTone, CAPTION_INITIAL, CAPTION_PENDING,
    INSIGHT_INITIAL, INSIGHT_PENDING,
};
use vision_engine::OutputPanel;

/// `OutputPanel` that also prints what changes.
///
/// Placeholders are tracked but not printed; status lines and final outputs
/// are.
pub(crate) struct ConsolePanel {
    panel: OutputPanel,
    out: Box<dyn Write>,
}

impl ConsolePanel {
    pub(crate) fn new(panel: OutputPanel, out: Box<dyn Write>) -> Self {
        Self { panel, out }
    }

    pub(crate) fn stdout(panel: OutputPanel) -> Self {
        Self::new(panel, Box::new(io::stdout()))
    }

    pub(crate) fn panel(&self) -> &OutputPanel {
        &self.panel
    }

    pub(crate) fn say(&mut self, line: &str) {
        if let Err(err) = writeln!(self.out, "{line}").and_then(|_| self.out.flush()) {
            tracing::debug!(error = %err, "console write failed");
        }
    }

    pub(crate) fn reset(&mut self) {
        self.panel.reset();
        let status = self.panel.status().to_string();
        self.say(&status);
    }
}

fn is_placeholder(text: &str) -> bool {
    [CAPTION_INITIAL, CAPTION_PENDING, INSIGHT_INITIAL, INSIGHT_PENDING].contains(&text)
}

impl AnalysisObserver for ConsolePanel {
    fn state_changed(&mut self, state: PipelineState) {
        self.panel.state_changed(state);
    }

    fn set_status(&mut self, tone: StatusTone, message: &str) {
        self.panel.set_status(tone, message);
        self.say(message);
    }

    fn caption_output(&self) -> &str {
        self.panel.caption_output()
    }

    fn set_caption_output(&mut self, text: &str) {
        self.panel.set_caption_output(text);
        if !is_placeholder(text) {
            self.say(&format!("Caption: {text}"));
        }
    }

    fn insight_output(&self) -> &str {
        self.panel.insight_output()
    }

    fn set_insight_output(&mut self, text: &str) {
        self.panel.set_insight_output(text);
        if !is_placeholder(text) {
            self.say(&format!("Insight: {text}"));
        }
    }

    fn set_analyze_enabled(&mut self, enabled: bool) {
        self.panel.set_analyze_enabled(enabled);
    }
}

#[cfg(test)]
mod tests {
    use std::io::Write;
    use std::sync::{Arc, Mutex};

    use vision_engine::pipeline::{
        AnalysisObserver, StatusTone, CAPTION_PENDING, INSIGHT_INITIAL,
    };
    use vision_engine::OutputPanel;

    use super::ConsolePanel;

    #[derive(Clone, Default)]
    struct SharedBuffer(Arc<Mutex<Vec<u8>>>);

    impl Write for SharedBuffer {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn placeholders_are_tracked_but_not_printed() {
        let buffer = SharedBuffer::default();
        let mut console = ConsolePanel::new(OutputPanel::new(), Box::new(buffer.clone()));
        console.set_status(StatusTone::Info, "working");
        console.set_caption_output(CAPTION_PENDING);
        console.set_insight_output(INSIGHT_INITIAL);
        console.set_caption_output("a classroom with desks");

        assert_eq!(console.caption_output(), "a classroom with desks");
        assert_eq!(console.insight_output(), INSIGHT_INITIAL);
        let printed = String::from_utf8(buffer.0.lock().unwrap().clone()).unwrap();
        assert_eq!(printed, "working\nCaption: a classroom with desks\n");
    }
}
