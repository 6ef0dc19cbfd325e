use reqwest::blocking::Response as HttpResponse;

use crate::error::{AnalysisError, Service};

const LOG_BODY_MAX_CHARS: usize = 512;

pub(crate) fn transport_error(service: Service, err: &reqwest::Error) -> AnalysisError {
    AnalysisError::Transport {
        service,
        message: err.to_string(),
    }
}

/// Reads the body, turning a non-success status into `AuthOrTransport`
/// with the raw body attached.
pub(crate) fn response_text_or_error(
    service: Service,
    response: HttpResponse,
) -> Result<String, AnalysisError> {
    let status = response.status();
    let code = status.as_u16();
    let body = response
        .text()
        .map_err(|err| transport_error(service, &err))?;
    if !status.is_success() {
        tracing::warn!(
            %service,
            status = code,
            body = %truncate_text(&body, LOG_BODY_MAX_CHARS),
            "request rejected"
        );
        return Err(AnalysisError::AuthOrTransport {
            service,
            status: code,
            body,
        });
    }
    Ok(body)
}

pub(crate) fn truncate_text(value: &str, max_chars: usize) -> String {
    if value.chars().count() <= max_chars {
        return value.to_string();
    }
    value.chars().take(max_chars).collect::<String>() + "…"
}
