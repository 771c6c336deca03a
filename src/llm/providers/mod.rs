//! Concrete model-client implementations.

mod anthropic;
mod openai;

pub use anthropic::AnthropicClient;
pub use openai::OpenAiCompatClient;

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use super::ModelClient;
use crate::error::FailureKind;

/// Provider wire protocol.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Protocol {
    /// OpenAI-style chat completions (OpenAI, OpenRouter, Groq, local
    /// gateways).
    #[default]
    OpenAi,
    /// Anthropic messages API.
    Anthropic,
}

/// Provider connection settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderSettings {
    /// Base URL for the API.
    pub base_url: String,
    /// API key, if the endpoint requires one.
    pub api_key: Option<String>,
    /// Wire protocol.
    pub protocol: Protocol,
}

impl ProviderSettings {
    /// Settings for an OpenAI-compatible endpoint.
    pub fn openai_compat(base_url: impl Into<String>, api_key: Option<String>) -> Self {
        Self {
            base_url: base_url.into(),
            api_key,
            protocol: Protocol::OpenAi,
        }
    }

    /// Settings for the Anthropic messages API.
    pub fn anthropic(base_url: impl Into<String>, api_key: Option<String>) -> Self {
        Self {
            base_url: base_url.into(),
            api_key,
            protocol: Protocol::Anthropic,
        }
    }
}

/// Create a client for the given settings.
#[must_use]
pub fn create_client(settings: ProviderSettings) -> Arc<dyn ModelClient> {
    match settings.protocol {
        Protocol::OpenAi => Arc::new(OpenAiCompatClient::new(settings)),
        Protocol::Anthropic => Arc::new(AnthropicClient::new(settings)),
    }
}

/// Classify an HTTP status into a failure kind.
pub(crate) fn classify_status(status: u16) -> FailureKind {
    match status {
        401 | 403 => FailureKind::Auth,
        402 => FailureKind::BudgetExhausted,
        429 => FailureKind::RateLimited,
        400 | 404 | 413 | 422 => FailureKind::InvalidRequest,
        503 => FailureKind::Unavailable,
        _ => FailureKind::Transient,
    }
}

/// Classify a transport error into a failure kind.
pub(crate) fn classify_transport(err: &reqwest::Error) -> FailureKind {
    if err.is_timeout() {
        FailureKind::Timeout
    } else if err.is_connect() {
        FailureKind::Unavailable
    } else {
        FailureKind::Transient
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classify_status() {
        assert_eq!(classify_status(401), FailureKind::Auth);
        assert_eq!(classify_status(402), FailureKind::BudgetExhausted);
        assert_eq!(classify_status(429), FailureKind::RateLimited);
        assert_eq!(classify_status(400), FailureKind::InvalidRequest);
        assert_eq!(classify_status(503), FailureKind::Unavailable);
        assert_eq!(classify_status(500), FailureKind::Transient);
    }

    #[test]
    fn test_create_client_dispatch() {
        let openai = create_client(ProviderSettings::openai_compat(
            "https://api.openai.com",
            None,
        ));
        let anthropic = create_client(ProviderSettings::anthropic(
            "https://api.anthropic.com",
            None,
        ));
        // Both resolve to working trait objects.
        let _ = (openai, anthropic);
    }
}
