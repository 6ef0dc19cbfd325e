use std::path::{Component, Path, PathBuf};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender, TryRecvError};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use reqwest::blocking::Client as HttpClient;
use reqwest::header::{CACHE_CONTROL, PRAGMA};
use vision_contracts::samples::{SampleCatalog, SampleDefinition};

use crate::config::EngineConfig;
use crate::error::AnalysisError;
use crate::selection::{ImageSelection, PreviewStore, SelectionToken};

pub const STATUS_SAMPLE_LOADING: &str = "📸 Loading sample image...";
pub const STATUS_SAMPLE_RECHECKING: &str = "🔄 Checking for newly added sample image...";
pub const STATUS_SAMPLE_READY: &str = "✅ Sample image ready. Add your keys to analyze.";
pub const STATUS_CUSTOM_READY: &str = "📂 Custom image ready. Provide keys to continue.";
pub const SAMPLE_WARNING_PREFIX: &str = "⚠️ ";

/// Status shown when a load starts; samples last seen missing are re-checked.
pub fn loading_status(catalog: &SampleCatalog, sample: &SampleDefinition) -> &'static str {
    match catalog.is_missing(&sample.path) {
        Some(true) => STATUS_SAMPLE_RECHECKING,
        _ => STATUS_SAMPLE_LOADING,
    }
}

/// Where bundled sample images are read from.
pub trait SampleSource: Send + Sync {
    fn fetch(&self, path: &str) -> Result<Vec<u8>, AnalysisError>;
    fn describe(&self) -> String;
}

/// Samples read from a local directory, re-read on every fetch.
#[derive(Debug, Clone)]
pub struct DirSampleSource {
    root: PathBuf,
}

impl DirSampleSource {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn resolve(&self, path: &str) -> Option<PathBuf> {
        let relative = Path::new(path);
        let escapes = relative
            .components()
            .any(|part| !matches!(part, Component::Normal(_) | Component::CurDir));
        (!escapes).then(|| self.root.join(relative))
    }
}

impl SampleSource for DirSampleSource {
    fn fetch(&self, path: &str) -> Result<Vec<u8>, AnalysisError> {
        let load_error = |reason: String| AnalysisError::SampleLoad {
            path: path.to_string(),
            reason,
        };
        let full = self
            .resolve(path)
            .ok_or_else(|| load_error("path escapes sample directory".to_string()))?;
        let bytes = std::fs::read(&full).map_err(|err| load_error(err.to_string()))?;
        if bytes.is_empty() {
            return Err(load_error("file is empty".to_string()));
        }
        Ok(bytes)
    }

    fn describe(&self) -> String {
        self.root.display().to_string()
    }
}

/// Samples served over HTTP; every fetch bypasses caches so a file that was
/// added after a failed attempt is picked up.
#[derive(Debug, Clone)]
pub struct HttpSampleSource {
    base: String,
    http: HttpClient,
}

impl HttpSampleSource {
    pub fn new(base: impl Into<String>, http: HttpClient) -> Self {
        Self {
            base: base.into().trim_end_matches('/').to_string(),
            http,
        }
    }

    fn url_for(&self, path: &str) -> String {
        format!("{}/{}", self.base, path.trim_start_matches('/'))
    }
}

impl SampleSource for HttpSampleSource {
    fn fetch(&self, path: &str) -> Result<Vec<u8>, AnalysisError> {
        let load_error = |reason: String| AnalysisError::SampleLoad {
            path: path.to_string(),
            reason,
        };
        let response = self
            .http
            .get(self.url_for(path))
            .header(CACHE_CONTROL, "no-cache")
            .header(PRAGMA, "no-cache")
            .send()
            .map_err(|err| load_error(err.to_string()))?;
        let status = response.status();
        if !status.is_success() {
            return Err(load_error(format!("status {}", status.as_u16())));
        }
        let bytes = response.bytes().map_err(|err| load_error(err.to_string()))?;
        Ok(bytes.to_vec())
    }

    fn describe(&self) -> String {
        self.base.clone()
    }
}

/// `SVC_SAMPLES_URL` when configured, otherwise the samples directory.
pub fn source_from_config(config: &EngineConfig) -> anyhow::Result<Arc<dyn SampleSource>> {
    Ok(match &config.samples_url {
        Some(base) => Arc::new(HttpSampleSource::new(base.clone(), config.http_client()?)),
        None => Arc::new(DirSampleSource::new(config.samples_dir.clone())),
    })
}

#[derive(Debug)]
pub struct SampleLoadOutcome {
    pub token: SelectionToken,
    pub sample: SampleDefinition,
    pub result: Result<Vec<u8>, AnalysisError>,
}

/// Fetches samples on worker threads and hands results back over a channel.
///
/// Outcomes arrive in completion order; callers feed them to
/// [`apply_outcome`], which drops the ones a newer selection superseded.
pub struct SampleLoader {
    source: Arc<dyn SampleSource>,
    tx: Sender<SampleLoadOutcome>,
    rx: Receiver<SampleLoadOutcome>,
    in_flight: usize,
}

impl SampleLoader {
    pub fn new(source: Arc<dyn SampleSource>) -> Self {
        let (tx, rx) = mpsc::channel();
        Self {
            source,
            tx,
            rx,
            in_flight: 0,
        }
    }

    pub fn source(&self) -> &dyn SampleSource {
        self.source.as_ref()
    }

    pub fn start(&mut self, token: SelectionToken, sample: SampleDefinition) {
        let source = Arc::clone(&self.source);
        let tx = self.tx.clone();
        self.in_flight += 1;
        tracing::debug!(path = %sample.path, ?token, "loading sample");
        thread::spawn(move || {
            let result = source.fetch(&sample.path);
            // The receiver only goes away with the loader itself.
            let _ = tx.send(SampleLoadOutcome {
                token,
                sample,
                result,
            });
        });
    }

    pub fn in_flight(&self) -> usize {
        self.in_flight
    }

    pub fn try_next(&mut self) -> Option<SampleLoadOutcome> {
        match self.rx.try_recv() {
            Ok(outcome) => {
                self.in_flight = self.in_flight.saturating_sub(1);
                Some(outcome)
            }
            Err(TryRecvError::Empty | TryRecvError::Disconnected) => None,
        }
    }

    /// Blocks until the next outcome, or `None` when nothing is in flight or
    /// the timeout passes.
    pub fn wait_next(&mut self, timeout: Duration) -> Option<SampleLoadOutcome> {
        if self.in_flight == 0 {
            return None;
        }
        match self.rx.recv_timeout(timeout) {
            Ok(outcome) => {
                self.in_flight = self.in_flight.saturating_sub(1);
                Some(outcome)
            }
            Err(RecvTimeoutError::Timeout | RecvTimeoutError::Disconnected) => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum SampleApplied {
    Selected { name: String },
    Failed(AnalysisError),
    /// A newer selection or clear superseded this load.
    Stale,
}

/// Folds a finished load into the selection and the catalog's missing flags.
pub fn apply_outcome<P: PreviewStore>(
    selection: &mut ImageSelection<P>,
    catalog: &mut SampleCatalog,
    outcome: SampleLoadOutcome,
) -> SampleApplied {
    let SampleLoadOutcome {
        token,
        sample,
        result,
    } = outcome;
    catalog.mark_missing(&sample.path, result.is_err());
    match result {
        Ok(bytes) => match selection.complete_load(token, bytes, sample.file_name()) {
            Some(image) => SampleApplied::Selected {
                name: image.display_name().to_string(),
            },
            None => SampleApplied::Stale,
        },
        Err(err) => {
            if selection.fail_load(token) {
                tracing::warn!(path = %sample.path, error = ?err, "sample load failed");
                SampleApplied::Failed(err)
            } else {
                SampleApplied::Stale
            }
        }
    }
}
