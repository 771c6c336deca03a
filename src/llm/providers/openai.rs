//! OpenAI-compatible chat completions client.
//!
//! Works against OpenAI, OpenRouter, Groq, and any gateway speaking the
//! same wire format. Non-streaming: the debate runtime consumes whole
//! turns.

use std::time::{Duration, Instant};

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;

use super::{classify_status, classify_transport, ProviderSettings};
use crate::error::{FailureKind, InvokeError};
use crate::llm::{Completion, FinishReason, ModelClient, ModelId, Prompt};

/// OpenAI-compatible chat completions client.
#[derive(Debug, Clone)]
pub struct OpenAiCompatClient {
    settings: ProviderSettings,
    client: Client,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<Choice>,
    #[serde(default)]
    usage: Option<Usage>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: ChoiceMessage,
    #[serde(default)]
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ChoiceMessage {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Debug, Deserialize, Default)]
struct Usage {
    #[serde(default)]
    prompt_tokens: u32,
    #[serde(default)]
    completion_tokens: u32,
}

impl OpenAiCompatClient {
    /// Create a new client for the given settings.
    #[must_use]
    pub fn new(settings: ProviderSettings) -> Self {
        let client = Client::builder()
            .build()
            .unwrap_or_else(|_| Client::new());

        Self { settings, client }
    }

    fn api_url(&self) -> String {
        format!(
            "{}/v1/chat/completions",
            self.settings.base_url.trim_end_matches('/')
        )
    }

    fn parse_finish_reason(reason: Option<&str>) -> FinishReason {
        match reason {
            Some("stop") => FinishReason::Stop,
            Some("length") => FinishReason::Length,
            Some("content_filter") => FinishReason::ContentFilter,
            _ => FinishReason::Other,
        }
    }
}

#[async_trait]
impl ModelClient for OpenAiCompatClient {
    async fn invoke(
        &self,
        model: &ModelId,
        prompt: &Prompt,
        deadline: Duration,
    ) -> Result<Completion, InvokeError> {
        let body = serde_json::json!({
            "model": model,
            "messages": prompt.messages,
            "temperature": prompt.temperature,
            "max_tokens": prompt.max_tokens,
        });

        let mut request = self.client.post(self.api_url()).json(&body);
        if let Some(key) = &self.settings.api_key {
            request = request.bearer_auth(key);
        }

        let start = Instant::now();
        let response = tokio::time::timeout(deadline, request.send())
            .await
            .map_err(|_| {
                InvokeError::new(
                    FailureKind::Timeout,
                    model.clone(),
                    format!("deadline of {deadline:?} elapsed"),
                )
            })?
            .map_err(|e| InvokeError::new(classify_transport(&e), model.clone(), e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let detail = response.text().await.unwrap_or_default();
            return Err(InvokeError::new(
                classify_status(status.as_u16()),
                model.clone(),
                format!("HTTP {status}: {detail}"),
            ));
        }

        let parsed: ChatResponse = tokio::time::timeout(deadline, response.json())
            .await
            .map_err(|_| {
                InvokeError::new(FailureKind::Timeout, model.clone(), "body read timed out")
            })?
            .map_err(|e| {
                InvokeError::new(FailureKind::Transient, model.clone(), e.to_string())
            })?;

        let choice = parsed.choices.into_iter().next().ok_or_else(|| {
            InvokeError::new(
                FailureKind::InvalidRequest,
                model.clone(),
                "response carried no choices",
            )
        })?;

        let usage = parsed.usage.unwrap_or_default();
        #[allow(clippy::cast_possible_truncation)]
        let latency_ms = start.elapsed().as_millis() as u64;

        tracing::debug!(
            model = %model,
            latency_ms = latency_ms,
            tokens = usage.prompt_tokens + usage.completion_tokens,
            "Chat completion received"
        );

        Ok(Completion {
            text: choice.message.content.unwrap_or_default(),
            input_tokens: usage.prompt_tokens,
            output_tokens: usage.completion_tokens,
            latency_ms,
            finish_reason: Self::parse_finish_reason(choice.finish_reason.as_deref()),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_api_url_trims_trailing_slash() {
        let client = OpenAiCompatClient::new(ProviderSettings::openai_compat(
            "https://openrouter.ai/api/",
            None,
        ));
        assert_eq!(
            client.api_url(),
            "https://openrouter.ai/api/v1/chat/completions"
        );
    }

    #[test]
    fn test_parse_finish_reason() {
        assert_eq!(
            OpenAiCompatClient::parse_finish_reason(Some("stop")),
            FinishReason::Stop
        );
        assert_eq!(
            OpenAiCompatClient::parse_finish_reason(Some("length")),
            FinishReason::Length
        );
        assert_eq!(
            OpenAiCompatClient::parse_finish_reason(None),
            FinishReason::Other
        );
    }

    #[test]
    fn test_response_parsing() {
        let raw = r#"{
            "choices": [{"message": {"content": "hello"}, "finish_reason": "stop"}],
            "usage": {"prompt_tokens": 12, "completion_tokens": 4}
        }"#;
        let parsed: ChatResponse = serde_json::from_str(raw).unwrap();
        assert_eq!(parsed.choices[0].message.content.as_deref(), Some("hello"));
        assert_eq!(parsed.usage.unwrap().prompt_tokens, 12);
    }
}
