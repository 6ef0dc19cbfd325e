use reqwest::blocking::multipart::{Form as MultipartForm, Part as MultipartPart};
use reqwest::blocking::Client as HttpClient;
use reqwest::Url;
use serde_json::Value;

use crate::config::EngineConfig;
use crate::error::{AnalysisError, Service};
use crate::http::{response_text_or_error, transport_error};
use crate::selection::{image_mime_type, DEFAULT_IMAGE_NAME};

pub trait CaptionService {
    /// One captioning request; no retries.
    fn caption(
        &self,
        api_key: &str,
        model: &str,
        image: &[u8],
        file_name: &str,
    ) -> Result<String, AnalysisError>;
}

/// Hugging Face inference API client for image-to-text models.
#[derive(Debug, Clone)]
pub struct CaptionClient {
    api_base: String,
    http: HttpClient,
}

impl CaptionClient {
    pub fn new(api_base: impl Into<String>, http: HttpClient) -> Self {
        Self {
            api_base: api_base.into(),
            http,
        }
    }

    pub fn from_config(config: &EngineConfig) -> anyhow::Result<Self> {
        Ok(Self::new(config.hf_api_base.clone(), config.http_client()?))
    }

    pub fn endpoint(&self, model: &str) -> Result<Url, AnalysisError> {
        caption_endpoint(&self.api_base, model)
    }
}

/// `<base>/<model>` with the model id as a single percent-encoded segment,
/// so `Salesforce/blip` becomes `Salesforce%2Fblip`.
pub fn caption_endpoint(api_base: &str, model: &str) -> Result<Url, AnalysisError> {
    let invalid = |message: String| AnalysisError::Transport {
        service: Service::HuggingFace,
        message,
    };
    let mut url = Url::parse(api_base)
        .map_err(|err| invalid(format!("invalid API base '{api_base}': {err}")))?;
    url.path_segments_mut()
        .map_err(|_| invalid(format!("API base '{api_base}' cannot take a path")))?
        .pop_if_empty()
        .push(model);
    Ok(url)
}

impl CaptionService for CaptionClient {
    fn caption(
        &self,
        api_key: &str,
        model: &str,
        image: &[u8],
        file_name: &str,
    ) -> Result<String, AnalysisError> {
        let endpoint = self.endpoint(model)?;
        let file_name = match file_name.trim() {
            "" => DEFAULT_IMAGE_NAME,
            trimmed => trimmed,
        };
        let part = MultipartPart::bytes(image.to_vec())
            .file_name(file_name.to_string())
            .mime_str(image_mime_type(image))
            .map_err(|err| transport_error(Service::HuggingFace, &err))?;
        let form = MultipartForm::new().part("inputs", part);

        tracing::debug!(%endpoint, bytes = image.len(), "requesting caption");
        let response = self
            .http
            .post(endpoint)
            .bearer_auth(api_key)
            .multipart(form)
            .send()
            .map_err(|err| transport_error(Service::HuggingFace, &err))?;
        let body = response_text_or_error(Service::HuggingFace, response)?;
        parse_caption_payload(&body)
    }
}

/// Extracts `[0].generated_text`, or surfaces the API's `error` field.
pub fn parse_caption_payload(body: &str) -> Result<String, AnalysisError> {
    let unexpected = AnalysisError::UnexpectedResponse {
        service: Service::HuggingFace,
    };
    let Ok(payload) = serde_json::from_str::<Value>(body) else {
        return Err(unexpected);
    };

    let generated = payload
        .as_array()
        .and_then(|items| items.first())
        .and_then(|first| first.get("generated_text"))
        .and_then(Value::as_str)
        .filter(|text| !text.is_empty());
    if let Some(text) = generated {
        return Ok(text.to_string());
    }

    match payload.get("error") {
        Some(Value::Null) | None => Err(unexpected),
        Some(Value::String(message)) if message.is_empty() => Err(unexpected),
        Some(Value::String(message)) => Err(AnalysisError::Remote {
            service: Service::HuggingFace,
            message: message.clone(),
        }),
        Some(other) => Err(AnalysisError::Remote {
            service: Service::HuggingFace,
            message: other.to_string(),
        }),
    }
}
