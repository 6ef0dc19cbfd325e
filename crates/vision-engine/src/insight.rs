use reqwest::blocking::Client as HttpClient;
use serde_json::{json, Value};

use crate::config::EngineConfig;
use crate::error::{AnalysisError, Service};
use crate::http::{response_text_or_error, transport_error};

pub const INSIGHT_SYSTEM_PROMPT: &str = "You are SmartVisionAgent, a precise and concise assistant for turning raw image captions into practical insights.";
pub const INSIGHT_TEMPERATURE: f64 = 0.4;
pub const INSIGHT_MAX_TOKENS: u64 = 200;

pub trait InsightService {
    /// One chat-completion request; no retries.
    fn insight(
        &self,
        api_key: &str,
        model: &str,
        prompt: &str,
        caption: &str,
    ) -> Result<String, AnalysisError>;
}

/// OpenRouter chat-completions client.
#[derive(Debug, Clone)]
pub struct InsightClient {
    api_base: String,
    http: HttpClient,
    referer: String,
    title: String,
}

impl InsightClient {
    pub fn new(
        api_base: impl Into<String>,
        http: HttpClient,
        referer: impl Into<String>,
        title: impl Into<String>,
    ) -> Self {
        Self {
            api_base: api_base.into(),
            http,
            referer: referer.into(),
            title: title.into(),
        }
    }

    pub fn from_config(config: &EngineConfig) -> anyhow::Result<Self> {
        Ok(Self::new(
            config.openrouter_api_base.clone(),
            config.http_client()?,
            config.http_referer.clone(),
            config.app_title.clone(),
        ))
    }

    pub fn endpoint(&self) -> String {
        format!("{}/chat/completions", self.api_base.trim_end_matches('/'))
    }
}

impl InsightService for InsightClient {
    fn insight(
        &self,
        api_key: &str,
        model: &str,
        prompt: &str,
        caption: &str,
    ) -> Result<String, AnalysisError> {
        let endpoint = self.endpoint();
        let payload = build_insight_payload(model, prompt, caption);
        tracing::debug!(%endpoint, %model, "requesting insight");
        let response = self
            .http
            .post(&endpoint)
            .bearer_auth(api_key)
            .header("HTTP-Referer", &self.referer)
            .header("X-Title", &self.title)
            .json(&payload)
            .send()
            .map_err(|err| transport_error(Service::OpenRouter, &err))?;
        let body = response_text_or_error(Service::OpenRouter, response)?;
        parse_insight_payload(&body)
    }
}

pub fn user_message(prompt: &str, caption: &str) -> String {
    format!("{prompt}\n\nRaw caption: \"{caption}\"")
}

pub fn build_insight_payload(model: &str, prompt: &str, caption: &str) -> Value {
    json!({
        "model": model,
        "messages": [
            {"role": "system", "content": INSIGHT_SYSTEM_PROMPT},
            {"role": "user", "content": user_message(prompt, caption)},
        ],
        "temperature": INSIGHT_TEMPERATURE,
        "max_tokens": INSIGHT_MAX_TOKENS,
    })
}

/// Trimmed `choices[0].message.content`.
pub fn parse_insight_payload(body: &str) -> Result<String, AnalysisError> {
    let payload: Value = serde_json::from_str(body).map_err(|_| {
        AnalysisError::UnexpectedResponse {
            service: Service::OpenRouter,
        }
    })?;
    payload
        .pointer("/choices/0/message/content")
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|content| !content.is_empty())
        .map(str::to_string)
        .ok_or(AnalysisError::EmptyResponse {
            service: Service::OpenRouter,
        })
}
