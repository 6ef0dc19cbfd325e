use std::path::Path;
use std::time::Duration;

use vision_contracts::models::{Capability, ModelRegistry, ModelSelector};
use vision_contracts::samples::SampleCatalog;
use vision_contracts::session::{Intent, SESSION_HELP_COMMANDS};
use vision_contracts::settings::StorageKey;
use vision_engine::credentials::mask_secret;
use vision_engine::pipeline::{AnalysisObserver, AnalysisRequest, AnalysisResult, StatusTone};
use vision_engine::samples::{
    apply_outcome, loading_status, SampleApplied, SampleLoadOutcome, SampleLoader,
    SAMPLE_WARNING_PREFIX, STATUS_CUSTOM_READY, STATUS_SAMPLE_READY,
};
use vision_engine::{
    AnalysisPipeline, CaptionService, CredentialStore, Credentials, ImageSelection,
    InsightService, PreviewStore,
};

use crate::console::ConsolePanel;

const SAMPLE_POLL: Duration = Duration::from_millis(200);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Flow {
    Continue,
    Quit,
}

pub(crate) struct SessionParts<C, I> {
    pub pipeline: AnalysisPipeline<C, I>,
    pub registry: ModelRegistry,
    pub store: CredentialStore,
    pub credentials: Credentials,
    pub prompt: String,
    pub loader: SampleLoader,
    pub previews: Box<dyn PreviewStore>,
    pub console: ConsolePanel,
    pub show_previews: bool,
}

/// State behind the interactive loop: credentials, prompt, current image and
/// the output panel. One `handle` call per input line.
pub(crate) struct Session<C, I> {
    pipeline: AnalysisPipeline<C, I>,
    selector: ModelSelector,
    store: CredentialStore,
    credentials: Credentials,
    prompt: String,
    catalog: SampleCatalog,
    selection: ImageSelection<Box<dyn PreviewStore>>,
    loader: SampleLoader,
    console: ConsolePanel,
    show_previews: bool,
}

impl<C: CaptionService, I: InsightService> Session<C, I> {
    pub(crate) fn new(parts: SessionParts<C, I>) -> Self {
        Self {
            pipeline: parts.pipeline,
            selector: ModelSelector::new(Some(parts.registry)),
            store: parts.store,
            credentials: parts.credentials,
            prompt: parts.prompt,
            catalog: SampleCatalog::default(),
            selection: ImageSelection::new(parts.previews),
            loader: parts.loader,
            console: parts.console,
            show_previews: parts.show_previews,
        }
    }

    pub(crate) fn handle(&mut self, intent: &Intent) -> Flow {
        self.drain_samples();
        match intent.action.as_str() {
            "noop" => {}
            "help" => {
                self.console
                    .say(&format!("Commands: {}", SESSION_HELP_COMMANDS.join(" ")));
                self.console
                    .say("Any other text becomes the prompt and starts an analysis.");
            }
            "quit" => return Flow::Quit,
            "set_caption_key" => self.set_key(StorageKey::CaptionApiKey, intent.arg("value")),
            "set_insight_key" => self.set_key(StorageKey::InsightApiKey, intent.arg("value")),
            "set_caption_model" => self.set_model(
                StorageKey::CaptionModel,
                Capability::Caption,
                intent.arg("value"),
            ),
            "set_insight_model" => self.set_model(
                StorageKey::InsightModel,
                Capability::Insight,
                intent.arg("value"),
            ),
            "set_prompt" => {
                self.prompt = intent.arg("value").to_string();
                self.console.say("Prompt updated.");
            }
            "select_sample" => self.select_sample(intent.arg("path")),
            "select_file" => self.select_file(intent.arg("path")),
            "clear" => {
                self.selection.clear();
                self.console.reset();
            }
            "analyze" => {
                self.analyze(intent.prompt.as_deref());
            }
            "list_samples" => self.list_samples(),
            "list_models" => self.list_models(),
            "status" => self.print_status(),
            "unknown" => {
                let command = intent.arg("command").to_string();
                self.console
                    .say(&format!("Unknown command /{command}. Type /help for commands."));
            }
            other => {
                tracing::debug!(action = other, "unhandled session action");
            }
        }
        Flow::Continue
    }

    pub(crate) fn analyze(&mut self, prompt: Option<&str>) -> AnalysisResult {
        if let Some(prompt) = prompt {
            self.prompt = prompt.to_string();
        }
        self.wait_for_samples();
        let request = AnalysisRequest {
            credentials: &self.credentials,
            prompt: &self.prompt,
            image: self.selection.current(),
        };
        self.pipeline.run(&request, &mut self.store, &mut self.console)
    }

    fn set_key(&mut self, key: StorageKey, value: &str) {
        self.credentials.set(key, value);
        self.store.set(key, value);
        let label = field_label(key);
        let current = self.credentials.get(key);
        if current.is_empty() {
            self.console.say(&format!("{label} cleared."));
        } else {
            self.console
                .say(&format!("{label} saved ({}).", mask_secret(current)));
        }
    }

    fn set_model(&mut self, key: StorageKey, capability: Capability, value: &str) {
        let selection = match self.selector.select(Some(value), capability) {
            Ok(selection) => selection,
            Err(message) => {
                self.console.say(&message);
                return;
            }
        };
        if let (Some(_), Some(reason)) = (&selection.requested, &selection.fallback_reason) {
            self.console
                .say(&format!("{reason} Use /models to list choices."));
            return;
        }
        let model_id = selection.model.id;
        self.credentials.set(key, model_id.as_str());
        // A blank value clears the stored choice; the default applies again.
        let stored = if value.trim().is_empty() { "" } else { model_id.as_str() };
        self.store.set(key, stored);
        self.console
            .say(&format!("{} set to {model_id}.", field_label(key)));
    }

    fn select_sample(&mut self, query: &str) {
        if query.is_empty() {
            self.console.say("/sample requires a name. Try /samples.");
            return;
        }
        let Some(sample) = self.catalog.find(query).cloned() else {
            let names: Vec<&str> = self.catalog.definitions().map(|sample| sample.slug()).collect();
            self.console.say(&format!(
                "Unknown sample '{query}'. Available: {}",
                names.join(", ")
            ));
            return;
        };
        let status = loading_status(&self.catalog, &sample);
        self.console.set_status(StatusTone::Info, status);
        let token = self.selection.begin_load();
        self.loader.start(token, sample);
    }

    fn select_file(&mut self, raw_path: &str) {
        if raw_path.is_empty() {
            self.console.say("/upload requires a path.");
            return;
        }
        let path = Path::new(raw_path);
        let bytes = match std::fs::read(path) {
            Ok(bytes) => bytes,
            Err(err) => {
                self.console.set_status(
                    StatusTone::Error,
                    &format!("{SAMPLE_WARNING_PREFIX}Unable to read {raw_path}: {err}"),
                );
                return;
            }
        };
        let name = path
            .file_name()
            .and_then(|name| name.to_str())
            .unwrap_or_default()
            .to_string();
        self.selection.select_from_bytes(bytes, &name);
        self.console.set_status(StatusTone::Info, STATUS_CUSTOM_READY);
        self.announce_preview();
    }

    fn drain_samples(&mut self) {
        while let Some(outcome) = self.loader.try_next() {
            self.apply_sample(outcome);
        }
    }

    /// Analysis needs the image the user last asked for, so pending loads
    /// finish first.
    fn wait_for_samples(&mut self) {
        self.drain_samples();
        while self.loader.in_flight() > 0 {
            if let Some(outcome) = self.loader.wait_next(SAMPLE_POLL) {
                self.apply_sample(outcome);
            }
        }
    }

    fn apply_sample(&mut self, outcome: SampleLoadOutcome) {
        match apply_outcome(&mut self.selection, &mut self.catalog, outcome) {
            SampleApplied::Selected { name } => {
                tracing::debug!(%name, "sample selected");
                self.console.set_status(StatusTone::Info, STATUS_SAMPLE_READY);
                self.announce_preview();
            }
            SampleApplied::Failed(err) => {
                self.console
                    .set_status(StatusTone::Error, &format!("{SAMPLE_WARNING_PREFIX}{err}"));
            }
            SampleApplied::Stale => {}
        }
    }

    fn announce_preview(&mut self) {
        if !self.show_previews {
            return;
        }
        let uri = self
            .selection
            .current()
            .and_then(|image| image.preview())
            .map(|handle| handle.uri());
        if let Some(uri) = uri {
            self.console.say(&format!("Preview: {uri}"));
        }
    }

    fn list_samples(&mut self) {
        self.drain_samples();
        let lines: Vec<String> = self
            .catalog
            .definitions()
            .map(|sample| {
                let availability = match self.catalog.is_missing(&sample.path) {
                    Some(true) => "missing",
                    Some(false) => "available",
                    None => "not checked",
                };
                format!(
                    "{:<14} {} ({}) [{availability}]",
                    sample.slug(),
                    sample.label,
                    sample.path
                )
            })
            .collect();
        for line in lines {
            self.console.say(&line);
        }
    }

    fn list_models(&mut self) {
        let mut lines = Vec::new();
        for (capability, key) in [
            (Capability::Caption, StorageKey::CaptionModel),
            (Capability::Insight, StorageKey::InsightModel),
        ] {
            lines.push(format!("{} models:", field_label(key).trim_end_matches(" model")));
            let current = self.credentials.get(key);
            for model in self.selector.registry.by_capability(capability) {
                let marker = if model.id == current { "*" } else { " " };
                lines.push(format!("  {marker} {} ({})", model.id, model.label));
            }
        }
        for line in lines {
            self.console.say(&line);
        }
    }

    fn print_status(&mut self) {
        self.drain_samples();
        let mut lines: Vec<String> = StorageKey::ALL
            .into_iter()
            .map(|key| {
                let value = self.credentials.get(key);
                let shown = if key.is_secret() {
                    mask_secret(value)
                } else {
                    value.to_string()
                };
                format!("{}: {shown}", field_label(key))
            })
            .collect();
        lines.push(format!("Prompt: {}", self.prompt));
        lines.push(match self.selection.current() {
            Some(image) => format!(
                "Image: {} ({} bytes, {}, sha256 {})",
                image.display_name(),
                image.bytes().len(),
                image.mime_type(),
                &image.digest()[..12]
            ),
            None => "Image: none".to_string(),
        });
        if self.loader.in_flight() > 0 {
            lines.push(format!("Sample loads in flight: {}", self.loader.in_flight()));
        }
        let panel = self.console.panel();
        lines.push(format!("Caption: {}", panel.caption()));
        lines.push(format!("Insight: {}", panel.insight()));
        for line in lines {
            self.console.say(&line);
        }
    }
}

fn field_label(key: StorageKey) -> &'static str {
    match key {
        StorageKey::CaptionApiKey => "Hugging Face token",
        StorageKey::InsightApiKey => "OpenRouter API key",
        StorageKey::CaptionModel => "Caption model",
        StorageKey::InsightModel => "Insight model",
    }
}

#[cfg(test)]
mod tests {
    use std::io;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    use vision_contracts::models::ModelRegistry;
    use vision_contracts::session::parse_intent;
    use vision_contracts::settings::StorageKey;
    use vision_engine::pipeline::{
        PipelineState, CAPTION_INITIAL, INSIGHT_INITIAL, STATUS_CLEARED,
    };
    use vision_engine::samples::{DirSampleSource, SampleLoader, STATUS_CUSTOM_READY};
    use vision_engine::{
        AnalysisError, AnalysisPipeline, CaptionService, CredentialStore, Credentials,
        InsightService, MemoryPreviews, OutputPanel,
    };

    use super::{Flow, Session, SessionParts};
    use crate::console::ConsolePanel;

    struct FixedCaption(Arc<AtomicUsize>);

    impl CaptionService for FixedCaption {
        fn caption(
            &self,
            _api_key: &str,
            _model: &str,
            image: &[u8],
            _file_name: &str,
        ) -> Result<String, AnalysisError> {
            self.0.fetch_add(1, Ordering::SeqCst);
            Ok(format!("an image of {} bytes", image.len()))
        }
    }

    struct EchoInsight;

    impl InsightService for EchoInsight {
        fn insight(
            &self,
            _api_key: &str,
            _model: &str,
            prompt: &str,
            caption: &str,
        ) -> Result<String, AnalysisError> {
            Ok(format!("{prompt} / {caption}"))
        }
    }

    fn session_with_samples(root: &std::path::Path) -> Session<FixedCaption, EchoInsight> {
        session_counting_captions(root).0
    }

    fn session_counting_captions(
        root: &std::path::Path,
    ) -> (Session<FixedCaption, EchoInsight>, Arc<AtomicUsize>) {
        let registry = ModelRegistry::default();
        let captions = Arc::new(AtomicUsize::new(0));
        let session = Session::new(SessionParts {
            pipeline: AnalysisPipeline::new(FixedCaption(Arc::clone(&captions)), EchoInsight),
            credentials: Credentials::with_defaults(&registry),
            registry,
            store: CredentialStore::in_memory(),
            prompt: "Describe it.".to_string(),
            loader: SampleLoader::new(Arc::new(DirSampleSource::new(root))),
            previews: Box::new(MemoryPreviews::new()),
            console: ConsolePanel::new(OutputPanel::new(), Box::new(io::sink())),
            show_previews: true,
        });
        (session, captions)
    }

    fn send(session: &mut Session<FixedCaption, EchoInsight>, line: &str) -> Flow {
        session.handle(&parse_intent(line))
    }

    #[test]
    fn key_edits_persist_and_blank_clears() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let mut session = session_with_samples(temp.path());

        send(&mut session, "/hf_key  hf_abcdefghijkl ");
        assert_eq!(session.credentials.caption_api_key, "hf_abcdefghijkl");
        assert_eq!(
            session.store.get(StorageKey::CaptionApiKey).as_deref(),
            Some("hf_abcdefghijkl")
        );

        send(&mut session, "/hf_key");
        assert_eq!(session.credentials.caption_api_key, "");
        assert_eq!(session.store.get(StorageKey::CaptionApiKey), None);
        Ok(())
    }

    #[test]
    fn model_edits_are_checked_against_registry() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let mut session = session_with_samples(temp.path());

        send(&mut session, "/insight_model anthropic/claude-3.5-haiku");
        assert_eq!(session.credentials.insight_model, "anthropic/claude-3.5-haiku");
        assert_eq!(
            session.store.get(StorageKey::InsightModel).as_deref(),
            Some("anthropic/claude-3.5-haiku")
        );

        send(&mut session, "/insight_model made-up/model");
        assert_eq!(session.credentials.insight_model, "anthropic/claude-3.5-haiku");

        send(&mut session, "/insight_model");
        assert_eq!(session.credentials.insight_model, "openai/gpt-4o-mini");
        assert_eq!(session.store.get(StorageKey::InsightModel), None);
        Ok(())
    }

    #[test]
    fn upload_then_clear_resets_selection_and_outputs() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let image_path = temp.path().join("bench.jpg");
        std::fs::write(&image_path, b"jpeg bytes")?;
        let mut session = session_with_samples(temp.path());

        send(&mut session, &format!("/upload \"{}\"", image_path.display()));
        assert_eq!(
            session.selection.current().map(|image| image.display_name()),
            Some("bench.jpg")
        );
        assert_eq!(session.console.panel().status(), STATUS_CUSTOM_READY);

        send(&mut session, "/upload /definitely/not/here.jpg");
        assert_eq!(
            session.selection.current().map(|image| image.display_name()),
            Some("bench.jpg")
        );

        send(&mut session, "/clear");
        assert!(session.selection.current().is_none());
        assert_eq!(session.selection.previews().outstanding(), 0);
        let panel = session.console.panel();
        assert_eq!(panel.status(), STATUS_CLEARED);
        assert_eq!(panel.caption(), CAPTION_INITIAL);
        assert_eq!(panel.insight(), INSIGHT_INITIAL);
        Ok(())
    }

    #[test]
    fn free_text_waits_for_sample_and_analyzes() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        std::fs::create_dir_all(temp.path().join("samples"))?;
        std::fs::write(temp.path().join("samples/classroom.jpg"), b"desks")?;
        let mut session = session_with_samples(temp.path());
        send(&mut session, "/hf_key hf_token");
        send(&mut session, "/or_key sk-or");

        send(&mut session, "/sample classroom");
        send(&mut session, "Who is in the room?");

        assert_eq!(session.prompt, "Who is in the room?");
        let panel = session.console.panel();
        assert_eq!(panel.caption(), "an image of 5 bytes");
        assert_eq!(panel.insight(), "Who is in the room? / an image of 5 bytes");
        assert_eq!(panel.state(), PipelineState::Idle);
        assert!(panel.analyze_enabled());
        assert_eq!(session.catalog.is_missing("samples/classroom.jpg"), Some(false));
        Ok(())
    }

    #[test]
    fn missing_sample_leaves_nothing_selected() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let (mut session, captions) = session_counting_captions(temp.path());
        send(&mut session, "/hf_key hf");
        send(&mut session, "/or_key or");

        send(&mut session, "/sample burnt pcb");
        let result = session.analyze(None);

        assert!(session.selection.current().is_none());
        assert_eq!(session.catalog.is_missing("samples/burnt_pcb.jpg"), Some(true));
        assert_eq!(
            result.error.map(|err| err.to_string()),
            Some("Choose a sample image or upload your own before analyzing.".to_string())
        );
        assert_eq!(captions.load(Ordering::SeqCst), 0);
        Ok(())
    }

    #[test]
    fn quit_and_exit_end_the_session() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let mut session = session_with_samples(temp.path());
        assert_eq!(send(&mut session, "/status"), Flow::Continue);
        assert_eq!(send(&mut session, "/nope"), Flow::Continue);
        assert_eq!(send(&mut session, "/quit"), Flow::Quit);
        assert_eq!(send(&mut session, "/exit"), Flow::Quit);
        Ok(())
    }
}
