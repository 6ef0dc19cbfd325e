use std::fmt;

/// Remote collaborator an error came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Service {
    HuggingFace,
    OpenRouter,
    Samples,
}

impl fmt::Display for Service {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Service::HuggingFace => f.write_str("Hugging Face"),
            Service::OpenRouter => f.write_str("OpenRouter"),
            Service::Samples => f.write_str("Sample"),
        }
    }
}

/// Input the pipeline refuses to run without.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MissingField {
    CaptionApiKey,
    InsightApiKey,
    Image,
}

impl MissingField {
    pub fn message(self) -> &'static str {
        match self {
            MissingField::CaptionApiKey => "Please enter your Hugging Face token.",
            MissingField::InsightApiKey => "Please enter your OpenRouter API key.",
            MissingField::Image => "Choose a sample image or upload your own before analyzing.",
        }
    }
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum AnalysisError {
    #[error("{}", field.message())]
    Validation { field: MissingField },

    #[error("{service} error ({status}): {body}")]
    AuthOrTransport {
        service: Service,
        status: u16,
        body: String,
    },

    /// The request never produced an HTTP status (DNS, TLS, connection reset).
    #[error("{service} request failed: {message}")]
    Transport { service: Service, message: String },

    #[error("{service} error: {message}")]
    Remote { service: Service, message: String },

    #[error("Unexpected response from {service} API.")]
    UnexpectedResponse { service: Service },

    #[error("{service} returned an empty response.")]
    EmptyResponse { service: Service },

    #[error("Unable to load sample image. Place a file at {path}.")]
    SampleLoad { path: String, reason: String },

    #[error("An analysis is already running.")]
    Busy,
}

impl AnalysisError {
    pub fn status_code(&self) -> Option<u16> {
        match self {
            AnalysisError::AuthOrTransport { status, .. } => Some(*status),
            _ => None,
        }
    }

    pub fn is_validation(&self) -> bool {
        matches!(self, AnalysisError::Validation { .. })
    }

    /// Stable tag used in event logs.
    pub fn kind(&self) -> &'static str {
        match self {
            AnalysisError::Validation { .. } => "validation",
            AnalysisError::AuthOrTransport { .. } => "auth_or_transport",
            AnalysisError::Transport { .. } => "transport",
            AnalysisError::Remote { .. } => "remote",
            AnalysisError::UnexpectedResponse { .. } => "unexpected_response",
            AnalysisError::EmptyResponse { .. } => "empty_response",
            AnalysisError::SampleLoad { .. } => "sample_load",
            AnalysisError::Busy => "busy",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{AnalysisError, MissingField, Service};

    #[test]
    fn messages_match_user_facing_wording() {
        let validation = AnalysisError::Validation {
            field: MissingField::InsightApiKey,
        };
        assert_eq!(
            validation.to_string(),
            "Please enter your OpenRouter API key."
        );

        let status = AnalysisError::AuthOrTransport {
            service: Service::HuggingFace,
            status: 401,
            body: "{\"error\":\"Invalid token\"}".to_string(),
        };
        assert_eq!(
            status.to_string(),
            "Hugging Face error (401): {\"error\":\"Invalid token\"}"
        );
        assert_eq!(status.status_code(), Some(401));

        assert_eq!(
            AnalysisError::UnexpectedResponse {
                service: Service::HuggingFace
            }
            .to_string(),
            "Unexpected response from Hugging Face API."
        );
        assert_eq!(
            AnalysisError::EmptyResponse {
                service: Service::OpenRouter
            }
            .to_string(),
            "OpenRouter returned an empty response."
        );
        assert_eq!(
            AnalysisError::SampleLoad {
                path: "samples/classroom.jpg".to_string(),
                reason: "status 404".to_string(),
            }
            .to_string(),
            "Unable to load sample image. Place a file at samples/classroom.jpg."
        );
    }
}
