use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::caption::CaptionService;
use crate::credentials::{CredentialStore, Credentials};
use crate::error::{AnalysisError, MissingField};
use crate::insight::InsightService;
use crate::selection::SelectedImage;

pub const STATUS_VALIDATING: &str = "🔐 Validating inputs...";
pub const STATUS_CAPTIONING: &str = "🖼️ Generating caption with BLIP...";
pub const STATUS_INSIGHTING: &str = "🤖 Requesting OpenRouter insight...";
pub const STATUS_DONE: &str = "✅ Caption & insight ready.";
pub const STATUS_CLEARED: &str = "✨ Cleared. Ready for a new image.";
pub const ERROR_PREFIX: &str = "❌ ";

pub const CAPTION_INITIAL: &str = "Awaiting analysis...";
pub const CAPTION_PENDING: &str = "Generating caption...";
pub const CAPTION_UNAVAILABLE: &str = "No caption available.";
pub const INSIGHT_INITIAL: &str = "Your insight will appear here.";
pub const INSIGHT_PENDING: &str = "Thinking...";
pub const INSIGHT_UNAVAILABLE: &str = "No insight generated.";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PipelineState {
    #[default]
    Idle,
    Validating,
    Captioning,
    Insighting,
    Done,
    Failed,
}

impl PipelineState {
    pub fn as_str(self) -> &'static str {
        match self {
            PipelineState::Idle => "idle",
            PipelineState::Validating => "validating",
            PipelineState::Captioning => "captioning",
            PipelineState::Insighting => "insighting",
            PipelineState::Done => "done",
            PipelineState::Failed => "failed",
        }
    }
}

impl fmt::Display for PipelineState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum StatusTone {
    #[default]
    Info,
    Success,
    Error,
}

impl StatusTone {
    pub fn as_str(self) -> &'static str {
        match self {
            StatusTone::Info => "info",
            StatusTone::Success => "success",
            StatusTone::Error => "error",
        }
    }
}

/// Receives everything a run publishes. The output getters let the pipeline
/// avoid overwriting results that are already on display.
pub trait AnalysisObserver {
    fn state_changed(&mut self, state: PipelineState);
    fn set_status(&mut self, tone: StatusTone, message: &str);
    fn caption_output(&self) -> &str;
    fn set_caption_output(&mut self, text: &str);
    fn insight_output(&self) -> &str;
    fn set_insight_output(&mut self, text: &str);
    fn set_analyze_enabled(&mut self, enabled: bool);
}

/// The analyze action's enabled flag. Shared by clones.
#[derive(Debug, Clone, Default)]
pub struct AnalyzeControl {
    running: Arc<AtomicBool>,
}

impl AnalyzeControl {
    pub fn new() -> Self {
        Self::default()
    }

    /// `None` while another run holds the control.
    pub fn try_acquire(&self) -> Option<AnalyzeGuard> {
        self.running
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| AnalyzeGuard {
                running: Arc::clone(&self.running),
            })
    }

    pub fn is_enabled(&self) -> bool {
        !self.running.load(Ordering::Acquire)
    }
}

/// Re-enables the control on drop, whatever the run's outcome.
#[derive(Debug)]
pub struct AnalyzeGuard {
    running: Arc<AtomicBool>,
}

impl Drop for AnalyzeGuard {
    fn drop(&mut self) {
        self.running.store(false, Ordering::Release);
    }
}

#[derive(Debug, Clone, Copy)]
pub struct AnalysisRequest<'a> {
    pub credentials: &'a Credentials,
    pub prompt: &'a str,
    pub image: Option<&'a SelectedImage>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct AnalysisResult {
    pub caption: Option<String>,
    pub insight: Option<String>,
    pub error: Option<AnalysisError>,
    /// `Done` or `Failed`; the pipeline itself is back to `Idle`.
    pub final_state: PipelineState,
}

impl AnalysisResult {
    pub fn is_success(&self) -> bool {
        self.final_state == PipelineState::Done
    }
}

#[derive(Default)]
struct RunProgress {
    state: PipelineState,
    caption: Option<String>,
}

/// Validate, caption, then insight; one run at a time.
pub struct AnalysisPipeline<C, I> {
    captioner: C,
    insight: I,
    control: AnalyzeControl,
}

impl<C: CaptionService, I: InsightService> AnalysisPipeline<C, I> {
    pub fn new(captioner: C, insight: I) -> Self {
        Self::with_control(captioner, insight, AnalyzeControl::new())
    }

    pub fn with_control(captioner: C, insight: I, control: AnalyzeControl) -> Self {
        Self {
            captioner,
            insight,
            control,
        }
    }

    pub fn control(&self) -> &AnalyzeControl {
        &self.control
    }

    /// Runs to `Done` or `Failed` and always returns to `Idle` with the
    /// control re-enabled. Errors are published, never propagated.
    pub fn run(
        &self,
        request: &AnalysisRequest<'_>,
        store: &mut CredentialStore,
        observer: &mut dyn AnalysisObserver,
    ) -> AnalysisResult {
        let Some(guard) = self.control.try_acquire() else {
            tracing::warn!("analyze requested while a run is in progress");
            return AnalysisResult {
                caption: None,
                insight: None,
                error: Some(AnalysisError::Busy),
                final_state: PipelineState::Failed,
            };
        };
        observer.set_analyze_enabled(false);

        let mut progress = RunProgress::default();
        let result = match self.execute(request, store, observer, &mut progress) {
            Ok(insight) => {
                observer.state_changed(PipelineState::Done);
                observer.set_status(StatusTone::Success, STATUS_DONE);
                tracing::info!("analysis finished");
                AnalysisResult {
                    caption: progress.caption,
                    insight: Some(insight),
                    error: None,
                    final_state: PipelineState::Done,
                }
            }
            Err(err) => {
                tracing::warn!(
                    stage = progress.state.as_str(),
                    kind = err.kind(),
                    error = %err,
                    "analysis failed"
                );
                observer.state_changed(PipelineState::Failed);
                observer.set_status(StatusTone::Error, &format!("{ERROR_PREFIX}{err}"));
                mark_unavailable(observer, progress.state);
                AnalysisResult {
                    caption: progress.caption,
                    insight: None,
                    error: Some(err),
                    final_state: PipelineState::Failed,
                }
            }
        };

        observer.state_changed(PipelineState::Idle);
        drop(guard);
        observer.set_analyze_enabled(true);
        result
    }

    fn execute(
        &self,
        request: &AnalysisRequest<'_>,
        store: &mut CredentialStore,
        observer: &mut dyn AnalysisObserver,
        progress: &mut RunProgress,
    ) -> Result<String, AnalysisError> {
        enter(observer, progress, PipelineState::Validating, STATUS_VALIDATING);
        let credentials = request.credentials;
        let caption_key = required(&credentials.caption_api_key, MissingField::CaptionApiKey)?;
        let insight_key = required(&credentials.insight_api_key, MissingField::InsightApiKey)?;
        let image = request.image.ok_or(AnalysisError::Validation {
            field: MissingField::Image,
        })?;

        credentials.persist(store);

        enter(observer, progress, PipelineState::Captioning, STATUS_CAPTIONING);
        observer.set_caption_output(CAPTION_PENDING);
        // Clear any insight left over from an earlier run.
        observer.set_insight_output(INSIGHT_INITIAL);
        let caption = self.captioner.caption(
            caption_key,
            credentials.caption_model.trim(),
            image.bytes(),
            image.display_name(),
        )?;
        observer.set_caption_output(&caption);
        progress.caption = Some(caption.clone());

        enter(observer, progress, PipelineState::Insighting, STATUS_INSIGHTING);
        observer.set_insight_output(INSIGHT_PENDING);
        let insight = self.insight.insight(
            insight_key,
            credentials.insight_model.trim(),
            request.prompt.trim(),
            &caption,
        )?;
        observer.set_insight_output(&insight);
        Ok(insight)
    }
}

fn enter(
    observer: &mut dyn AnalysisObserver,
    progress: &mut RunProgress,
    state: PipelineState,
    status: &str,
) {
    tracing::debug!(state = state.as_str(), "pipeline state");
    progress.state = state;
    observer.state_changed(state);
    observer.set_status(StatusTone::Info, status);
}

fn required(value: &str, field: MissingField) -> Result<&str, AnalysisError> {
    match value.trim() {
        "" => Err(AnalysisError::Validation { field }),
        trimmed => Ok(trimmed),
    }
}

/// Replaces in-progress placeholders after a failure. Anything already
/// published stays, and a failed caption leaves the insight output alone.
fn mark_unavailable(observer: &mut dyn AnalysisObserver, failed_in: PipelineState) {
    let caption = observer.caption_output();
    if caption.trim().is_empty() || caption == CAPTION_PENDING {
        observer.set_caption_output(CAPTION_UNAVAILABLE);
    }
    if failed_in == PipelineState::Insighting {
        let insight = observer.insight_output();
        if insight.trim().is_empty() || insight == INSIGHT_PENDING {
            observer.set_insight_output(INSIGHT_UNAVAILABLE);
        }
    }
}

#[cfg(test)]
mod tests {
    use std::cell::{Cell, RefCell};

    use vision_contracts::models::ModelRegistry;
    use vision_contracts::settings::StorageKey;

    use super::{
        AnalysisPipeline, AnalysisRequest, AnalyzeControl, PipelineState, StatusTone,
        CAPTION_INITIAL, CAPTION_UNAVAILABLE, INSIGHT_INITIAL, INSIGHT_UNAVAILABLE,
        STATUS_DONE,
    };
    use crate::caption::CaptionService;
    use crate::credentials::{CredentialStore, Credentials};
    use crate::error::{AnalysisError, MissingField, Service};
    use crate::insight::InsightService;
    use crate::panel::OutputPanel;
    use crate::selection::ImageSelection;

    struct StubCaption {
        reply: Result<String, AnalysisError>,
        calls: Cell<usize>,
        seen: RefCell<Vec<(String, String, String)>>,
        control: RefCell<Option<AnalyzeControl>>,
        enabled_during_call: Cell<Option<bool>>,
    }

    impl StubCaption {
        fn replying(reply: Result<String, AnalysisError>) -> Self {
            Self {
                reply,
                calls: Cell::new(0),
                seen: RefCell::new(Vec::new()),
                control: RefCell::new(None),
                enabled_during_call: Cell::new(None),
            }
        }
    }

    impl CaptionService for StubCaption {
        fn caption(
            &self,
            api_key: &str,
            model: &str,
            _image: &[u8],
            file_name: &str,
        ) -> Result<String, AnalysisError> {
            self.calls.set(self.calls.get() + 1);
            self.seen.borrow_mut().push((
                api_key.to_string(),
                model.to_string(),
                file_name.to_string(),
            ));
            if let Some(control) = self.control.borrow().as_ref() {
                self.enabled_during_call.set(Some(control.is_enabled()));
            }
            self.reply.clone()
        }
    }

    struct StubInsight {
        reply: Result<String, AnalysisError>,
        calls: Cell<usize>,
        seen: RefCell<Vec<(String, String, String)>>,
    }

    impl StubInsight {
        fn replying(reply: Result<String, AnalysisError>) -> Self {
            Self {
                reply,
                calls: Cell::new(0),
                seen: RefCell::new(Vec::new()),
            }
        }
    }

    impl InsightService for StubInsight {
        fn insight(
            &self,
            _api_key: &str,
            model: &str,
            prompt: &str,
            caption: &str,
        ) -> Result<String, AnalysisError> {
            self.calls.set(self.calls.get() + 1);
            self.seen
                .borrow_mut()
                .push((model.to_string(), prompt.to_string(), caption.to_string()));
            self.reply.clone()
        }
    }

    fn filled_credentials() -> Credentials {
        let mut credentials = Credentials::with_defaults(&ModelRegistry::default());
        credentials.set(StorageKey::CaptionApiKey, "hf_token");
        credentials.set(StorageKey::InsightApiKey, "sk-or-token");
        credentials
    }

    fn unauthorized() -> AnalysisError {
        AnalysisError::AuthOrTransport {
            service: Service::HuggingFace,
            status: 401,
            body: "Invalid username or password.".to_string(),
        }
    }

    #[test]
    fn full_run_publishes_caption_then_insight() {
        let pipeline = AnalysisPipeline::new(
            StubCaption::replying(Ok("a burnt circuit board".to_string())),
            StubInsight::replying(Ok("Inspect for corrosion.".to_string())),
        );
        *pipeline.captioner.control.borrow_mut() = Some(pipeline.control().clone());
        let mut selection = ImageSelection::default();
        let image = selection.select_from_bytes(b"jpeg".to_vec(), "burnt_pcb.jpg");
        let credentials = filled_credentials();
        let mut store = CredentialStore::in_memory();
        let mut panel = OutputPanel::new();

        let result = pipeline.run(
            &AnalysisRequest {
                credentials: &credentials,
                prompt: "  What should I check?  ",
                image: Some(image),
            },
            &mut store,
            &mut panel,
        );

        assert!(result.is_success());
        assert_eq!(result.caption.as_deref(), Some("a burnt circuit board"));
        assert_eq!(result.insight.as_deref(), Some("Inspect for corrosion."));
        assert_eq!(
            panel.trail(),
            [
                PipelineState::Validating,
                PipelineState::Captioning,
                PipelineState::Insighting,
                PipelineState::Done,
                PipelineState::Idle,
            ]
        );
        assert_eq!(panel.caption(), "a burnt circuit board");
        assert_eq!(panel.insight(), "Inspect for corrosion.");
        assert_eq!(panel.status(), STATUS_DONE);
        assert_eq!(panel.tone(), StatusTone::Success);
        assert!(panel.analyze_enabled());
        assert!(pipeline.control().is_enabled());
        assert_eq!(pipeline.captioner.enabled_during_call.get(), Some(false));

        let seen = pipeline.captioner.seen.borrow();
        assert_eq!(
            seen[0],
            (
                "hf_token".to_string(),
                "Salesforce/blip-image-captioning-large".to_string(),
                "burnt_pcb.jpg".to_string()
            )
        );
        let insight_seen = pipeline.insight.seen.borrow();
        assert_eq!(insight_seen[0].1, "What should I check?");
        assert_eq!(insight_seen[0].2, "a burnt circuit board");
    }

    #[test]
    fn blank_caption_key_fails_validation_without_network() {
        let pipeline = AnalysisPipeline::new(
            StubCaption::replying(Ok("unused".to_string())),
            StubInsight::replying(Ok("unused".to_string())),
        );
        let mut selection = ImageSelection::default();
        let image = selection.select_from_bytes(b"jpeg".to_vec(), "x.jpg");
        let mut credentials = filled_credentials();
        credentials.set(StorageKey::CaptionApiKey, "   ");
        let mut store = CredentialStore::in_memory();
        let mut panel = OutputPanel::new();

        let result = pipeline.run(
            &AnalysisRequest {
                credentials: &credentials,
                prompt: "p",
                image: Some(image),
            },
            &mut store,
            &mut panel,
        );

        assert_eq!(
            result.error,
            Some(AnalysisError::Validation {
                field: MissingField::CaptionApiKey
            })
        );
        assert_eq!(pipeline.captioner.calls.get(), 0);
        assert_eq!(pipeline.insight.calls.get(), 0);
        assert_eq!(panel.status(), "❌ Please enter your Hugging Face token.");
        assert_eq!(panel.tone(), StatusTone::Error);
        assert_eq!(panel.caption(), CAPTION_INITIAL);
        assert_eq!(panel.insight(), INSIGHT_INITIAL);
        assert!(panel.analyze_enabled());
        // Validation failed, so nothing was persisted.
        assert_eq!(store.get(StorageKey::InsightApiKey), None);
    }

    #[test]
    fn validation_checks_insight_key_then_image() {
        let pipeline = AnalysisPipeline::new(
            StubCaption::replying(Ok("unused".to_string())),
            StubInsight::replying(Ok("unused".to_string())),
        );
        let mut store = CredentialStore::in_memory();
        let mut panel = OutputPanel::new();

        let mut no_insight_key = filled_credentials();
        no_insight_key.set(StorageKey::InsightApiKey, "");
        let result = pipeline.run(
            &AnalysisRequest {
                credentials: &no_insight_key,
                prompt: "p",
                image: None,
            },
            &mut store,
            &mut panel,
        );
        assert_eq!(
            result.error,
            Some(AnalysisError::Validation {
                field: MissingField::InsightApiKey
            })
        );

        let result = pipeline.run(
            &AnalysisRequest {
                credentials: &filled_credentials(),
                prompt: "p",
                image: None,
            },
            &mut store,
            &mut panel,
        );
        assert_eq!(
            result.error,
            Some(AnalysisError::Validation {
                field: MissingField::Image
            })
        );
        assert_eq!(
            panel.status(),
            "❌ Choose a sample image or upload your own before analyzing."
        );
        assert_eq!(pipeline.captioner.calls.get(), 0);
    }

    #[test]
    fn caption_failure_leaves_insight_untouched() {
        let pipeline = AnalysisPipeline::new(
            StubCaption::replying(Err(unauthorized())),
            StubInsight::replying(Ok("unused".to_string())),
        );
        let mut selection = ImageSelection::default();
        let image = selection.select_from_bytes(b"jpeg".to_vec(), "x.jpg");
        let credentials = filled_credentials();
        let mut store = CredentialStore::in_memory();
        let mut panel = OutputPanel::new();

        let result = pipeline.run(
            &AnalysisRequest {
                credentials: &credentials,
                prompt: "p",
                image: Some(image),
            },
            &mut store,
            &mut panel,
        );

        assert_eq!(result.final_state, PipelineState::Failed);
        assert_eq!(result.error.as_ref().and_then(|err| err.status_code()), Some(401));
        assert_eq!(
            panel.trail(),
            [
                PipelineState::Validating,
                PipelineState::Captioning,
                PipelineState::Failed,
                PipelineState::Idle,
            ]
        );
        assert_eq!(panel.caption(), CAPTION_UNAVAILABLE);
        assert_eq!(panel.insight(), INSIGHT_INITIAL);
        assert_eq!(pipeline.insight.calls.get(), 0);
        assert!(panel.analyze_enabled());
        assert!(pipeline.control().is_enabled());
    }

    #[test]
    fn caption_failure_after_success_drops_earlier_insight() {
        let mut selection = ImageSelection::default();
        let credentials = filled_credentials();
        let mut store = CredentialStore::in_memory();
        let mut panel = OutputPanel::new();

        let first = AnalysisPipeline::new(
            StubCaption::replying(Ok("a burnt circuit board".to_string())),
            StubInsight::replying(Ok("Inspect for corrosion.".to_string())),
        );
        let image = selection.select_from_bytes(b"pcb".to_vec(), "burnt_pcb.jpg");
        let result = first.run(
            &AnalysisRequest {
                credentials: &credentials,
                prompt: "p",
                image: Some(image),
            },
            &mut store,
            &mut panel,
        );
        assert!(result.is_success());
        assert_eq!(panel.insight(), "Inspect for corrosion.");

        let second = AnalysisPipeline::new(
            StubCaption::replying(Err(unauthorized())),
            StubInsight::replying(Ok("unused".to_string())),
        );
        let image = selection.select_from_bytes(b"lab".to_vec(), "lab_equipment.jpg");
        let result = second.run(
            &AnalysisRequest {
                credentials: &credentials,
                prompt: "p",
                image: Some(image),
            },
            &mut store,
            &mut panel,
        );

        assert_eq!(result.final_state, PipelineState::Failed);
        assert_eq!(panel.caption(), CAPTION_UNAVAILABLE);
        assert_eq!(panel.insight(), INSIGHT_INITIAL);
        assert_eq!(second.insight.calls.get(), 0);
        assert!(panel.analyze_enabled());
    }

    #[test]
    fn insight_failure_keeps_published_caption() {
        let pipeline = AnalysisPipeline::new(
            StubCaption::replying(Ok("a microscope on a bench".to_string())),
            StubInsight::replying(Err(AnalysisError::EmptyResponse {
                service: Service::OpenRouter,
            })),
        );
        let mut selection = ImageSelection::default();
        let image = selection.select_from_bytes(b"jpeg".to_vec(), "lab.jpg");
        let credentials = filled_credentials();
        let mut store = CredentialStore::in_memory();
        let mut panel = OutputPanel::new();

        let result = pipeline.run(
            &AnalysisRequest {
                credentials: &credentials,
                prompt: "p",
                image: Some(image),
            },
            &mut store,
            &mut panel,
        );

        assert_eq!(result.caption.as_deref(), Some("a microscope on a bench"));
        assert_eq!(result.insight, None);
        assert_eq!(panel.caption(), "a microscope on a bench");
        assert_eq!(panel.insight(), INSIGHT_UNAVAILABLE);
        assert_eq!(panel.status(), "❌ OpenRouter returned an empty response.");
        assert!(panel.analyze_enabled());
    }

    #[test]
    fn successful_validation_persists_all_fields() {
        let pipeline = AnalysisPipeline::new(
            StubCaption::replying(Err(unauthorized())),
            StubInsight::replying(Ok("unused".to_string())),
        );
        let mut selection = ImageSelection::default();
        let image = selection.select_from_bytes(b"jpeg".to_vec(), "x.jpg");
        let mut credentials = filled_credentials();
        credentials.set(StorageKey::InsightModel, "google/gemini-2.0-flash-001");
        let mut store = CredentialStore::in_memory();

        pipeline.run(
            &AnalysisRequest {
                credentials: &credentials,
                prompt: "p",
                image: Some(image),
            },
            &mut store,
            &mut OutputPanel::new(),
        );

        assert_eq!(store.get(StorageKey::CaptionApiKey).as_deref(), Some("hf_token"));
        assert_eq!(
            store.get(StorageKey::InsightApiKey).as_deref(),
            Some("sk-or-token")
        );
        assert_eq!(
            store.get(StorageKey::CaptionModel).as_deref(),
            Some("Salesforce/blip-image-captioning-large")
        );
        assert_eq!(
            store.get(StorageKey::InsightModel).as_deref(),
            Some("google/gemini-2.0-flash-001")
        );
    }

    #[test]
    fn run_is_rejected_while_control_is_held() {
        let pipeline = AnalysisPipeline::new(
            StubCaption::replying(Ok("unused".to_string())),
            StubInsight::replying(Ok("unused".to_string())),
        );
        let held = pipeline.control().try_acquire();
        assert!(held.is_some());
        assert!(pipeline.control().try_acquire().is_none());

        let credentials = filled_credentials();
        let mut panel = OutputPanel::new();
        let result = pipeline.run(
            &AnalysisRequest {
                credentials: &credentials,
                prompt: "p",
                image: None,
            },
            &mut CredentialStore::in_memory(),
            &mut panel,
        );
        assert_eq!(result.error, Some(AnalysisError::Busy));
        assert!(panel.trail().is_empty());
        assert_eq!(pipeline.captioner.calls.get(), 0);

        drop(held);
        assert!(pipeline.control().is_enabled());
    }
}
