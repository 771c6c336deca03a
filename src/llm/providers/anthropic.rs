//! Anthropic messages API client.

use std::time::{Duration, Instant};

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;

use super::{classify_status, classify_transport, ProviderSettings};
use crate::error::{FailureKind, InvokeError};
use crate::llm::{ChatRole, Completion, FinishReason, ModelClient, ModelId, Prompt};

/// Anthropic messages API client.
#[derive(Debug, Clone)]
pub struct AnthropicClient {
    settings: ProviderSettings,
    client: Client,
}

#[derive(Debug, Deserialize)]
struct MessagesResponse {
    #[serde(default)]
    content: Vec<ContentBlock>,
    #[serde(default)]
    stop_reason: Option<String>,
    #[serde(default)]
    usage: Option<Usage>,
}

#[derive(Debug, Deserialize)]
struct ContentBlock {
    #[serde(default)]
    text: Option<String>,
}

#[derive(Debug, Deserialize, Default)]
struct Usage {
    #[serde(default)]
    input_tokens: u32,
    #[serde(default)]
    output_tokens: u32,
}

impl AnthropicClient {
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
            "{}/v1/messages",
            self.settings.base_url.trim_end_matches('/')
        )
    }

    /// Split a prompt into the system string and user/assistant turns.
    fn convert_messages(prompt: &Prompt) -> (Option<String>, Vec<serde_json::Value>) {
        let mut system = None;
        let mut converted = Vec::new();

        for msg in &prompt.messages {
            match msg.role {
                ChatRole::System => system = Some(msg.content.clone()),
                ChatRole::User => converted.push(serde_json::json!({
                    "role": "user",
                    "content": msg.content,
                })),
                ChatRole::Assistant => converted.push(serde_json::json!({
                    "role": "assistant",
                    "content": msg.content,
                })),
            }
        }

        (system, converted)
    }

    fn parse_stop_reason(reason: Option<&str>) -> FinishReason {
        match reason {
            Some("end_turn" | "stop_sequence") => FinishReason::Stop,
            Some("max_tokens") => FinishReason::Length,
            _ => FinishReason::Other,
        }
    }
}

#[async_trait]
impl ModelClient for AnthropicClient {
    async fn invoke(
        &self,
        model: &ModelId,
        prompt: &Prompt,
        deadline: Duration,
    ) -> Result<Completion, InvokeError> {
        let (system, messages) = Self::convert_messages(prompt);

        let mut body = serde_json::json!({
            "model": model,
            "messages": messages,
            "temperature": prompt.temperature,
            "max_tokens": prompt.max_tokens,
        });
        if let Some(system) = system {
            body["system"] = serde_json::Value::String(system);
        }

        let mut request = self
            .client
            .post(self.api_url())
            .header("anthropic-version", "2023-06-01")
            .json(&body);
        if let Some(key) = &self.settings.api_key {
            request = request.header("x-api-key", key);
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

        let parsed: MessagesResponse = tokio::time::timeout(deadline, response.json())
            .await
            .map_err(|_| {
                InvokeError::new(FailureKind::Timeout, model.clone(), "body read timed out")
            })?
            .map_err(|e| {
                InvokeError::new(FailureKind::Transient, model.clone(), e.to_string())
            })?;

        let text = parsed
            .content
            .into_iter()
            .filter_map(|block| block.text)
            .collect::<Vec<_>>()
            .join("");

        let usage = parsed.usage.unwrap_or_default();
        #[allow(clippy::cast_possible_truncation)]
        let latency_ms = start.elapsed().as_millis() as u64;

        Ok(Completion {
            text,
            input_tokens: usage.input_tokens,
            output_tokens: usage.output_tokens,
            latency_ms,
            finish_reason: Self::parse_stop_reason(parsed.stop_reason.as_deref()),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_convert_messages_extracts_system() {
        let prompt = Prompt::new("You are the judge.", "Deliver the verdict.");
        let (system, messages) = AnthropicClient::convert_messages(&prompt);
        assert_eq!(system.as_deref(), Some("You are the judge."));
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0]["role"], "user");
    }

    #[test]
    fn test_parse_stop_reason() {
        assert_eq!(
            AnthropicClient::parse_stop_reason(Some("end_turn")),
            FinishReason::Stop
        );
        assert_eq!(
            AnthropicClient::parse_stop_reason(Some("max_tokens")),
            FinishReason::Length
        );
        assert_eq!(
            AnthropicClient::parse_stop_reason(None),
            FinishReason::Other
        );
    }

    #[test]
    fn test_response_parsing() {
        let raw = r#"{
            "content": [{"type": "text", "text": "verdict"}],
            "stop_reason": "end_turn",
            "usage": {"input_tokens": 100, "output_tokens": 20}
        }"#;
        let parsed: MessagesResponse = serde_json::from_str(raw).unwrap();
        assert_eq!(parsed.content[0].text.as_deref(), Some("verdict"));
        assert_eq!(parsed.usage.unwrap().output_tokens, 20);
    }
}
