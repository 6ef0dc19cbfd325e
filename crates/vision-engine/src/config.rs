use std::env;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::Context;
use reqwest::blocking::Client as HttpClient;

pub const DEFAULT_HF_API_BASE: &str = "https://api-inference.huggingface.co/models";
pub const DEFAULT_OPENROUTER_API_BASE: &str = "https://openrouter.ai/api/v1";
pub const DEFAULT_HTTP_REFERER: &str = "http://localhost";
pub const DEFAULT_APP_TITLE: &str = "Smart Vision Captioner Agent";
const SETTINGS_DIR_NAME: &str = "smart-vision-captioner";

/// Endpoint and storage settings, resolved from `SVC_*` environment
/// variables with built-in defaults.
#[derive(Debug, Clone, PartialEq)]
pub struct EngineConfig {
    pub hf_api_base: String,
    pub openrouter_api_base: String,
    pub http_referer: String,
    pub app_title: String,
    /// `None` leaves requests unbounded.
    pub request_timeout: Option<Duration>,
    pub settings_path: Option<PathBuf>,
    pub samples_dir: PathBuf,
    pub samples_url: Option<String>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            hf_api_base: DEFAULT_HF_API_BASE.to_string(),
            openrouter_api_base: DEFAULT_OPENROUTER_API_BASE.to_string(),
            http_referer: DEFAULT_HTTP_REFERER.to_string(),
            app_title: DEFAULT_APP_TITLE.to_string(),
            request_timeout: None,
            settings_path: default_settings_path(),
            samples_dir: PathBuf::from("."),
            samples_url: None,
        }
    }
}

impl EngineConfig {
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            hf_api_base: non_empty_env("SVC_HF_API_BASE")
                .map(|value| normalize_base(&value))
                .unwrap_or(defaults.hf_api_base),
            openrouter_api_base: non_empty_env("SVC_OPENROUTER_API_BASE")
                .map(|value| normalize_base(&value))
                .unwrap_or(defaults.openrouter_api_base),
            http_referer: non_empty_env("SVC_HTTP_REFERER").unwrap_or(defaults.http_referer),
            app_title: non_empty_env("SVC_X_TITLE").unwrap_or(defaults.app_title),
            request_timeout: non_empty_env("SVC_REQUEST_TIMEOUT_SECS")
                .and_then(|raw| parse_timeout(&raw)),
            settings_path: non_empty_env("SVC_SETTINGS_PATH")
                .map(PathBuf::from)
                .or(defaults.settings_path),
            samples_dir: non_empty_env("SVC_SAMPLES_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.samples_dir),
            samples_url: non_empty_env("SVC_SAMPLES_URL").map(|value| normalize_base(&value)),
        }
    }

    /// Blocking client shared by the caption, insight and sample fetchers.
    pub fn http_client(&self) -> anyhow::Result<HttpClient> {
        // The blocking builder defaults to a 30s timeout; only bound requests
        // when one was configured.
        HttpClient::builder()
            .timeout(self.request_timeout)
            .build()
            .context("failed building HTTP client")
    }
}

pub fn default_settings_path() -> Option<PathBuf> {
    dirs::config_dir().map(|dir| dir.join(SETTINGS_DIR_NAME).join("settings.json"))
}

fn normalize_base(raw: &str) -> String {
    raw.trim().trim_end_matches('/').to_string()
}

fn parse_timeout(raw: &str) -> Option<Duration> {
    match raw.trim().parse::<f64>() {
        Ok(secs) if secs.is_finite() && secs > 0.0 => Some(Duration::from_secs_f64(secs)),
        _ => {
            tracing::warn!(value = raw, "ignoring invalid SVC_REQUEST_TIMEOUT_SECS");
            None
        }
    }
}

fn non_empty_env(key: &str) -> Option<String> {
    env::var(key)
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}
