//! OpenAI-compatible `/chat/completions` client.

use std::time::Duration;

use async_trait::async_trait;
use funnel::{Completion, CompletionOptions, LlmProvider, ProviderError};
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::{build_client, check_status, lenient_u64, map_transport};
use crate::config::OpenAiEndpoint;

pub const PROVIDER_NAME: &str = "openai";

pub struct OpenAiChatProvider {
    client: reqwest::Client,
    endpoint: OpenAiEndpoint,
    timeout: Duration,
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    temperature: f32,
    max_tokens: u32,
}

#[derive(Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<Choice>,
    #[serde(default)]
    usage: Usage,
}

#[derive(Deserialize)]
struct Choice {
    message: ChoiceMessage,
}

#[derive(Deserialize)]
struct ChoiceMessage {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Deserialize, Default)]
struct Usage {
    #[serde(default, deserialize_with = "lenient_u64")]
    prompt_tokens: u64,
    #[serde(default, deserialize_with = "lenient_u64")]
    completion_tokens: u64,
}

impl OpenAiChatProvider {
    pub fn new(endpoint: OpenAiEndpoint, timeout: Duration) -> Result<Self, ProviderError> {
        Ok(Self {
            client: build_client(timeout)?,
            endpoint,
            timeout,
        })
    }

    fn url(&self) -> String {
        format!("{}/chat/completions", self.endpoint.url.trim_end_matches('/'))
    }
}

pub fn parse_chat(body: &str) -> Result<Completion, ProviderError> {
    let response: ChatResponse =
        serde_json::from_str(body).map_err(|e| ProviderError::Malformed(e.to_string()))?;
    let text = response
        .choices
        .into_iter()
        .next()
        .and_then(|c| c.message.content)
        .ok_or_else(|| ProviderError::Malformed("no message content in response".into()))?;
    Ok(Completion {
        text,
        input_tokens: response.usage.prompt_tokens,
        output_tokens: response.usage.completion_tokens,
    })
}

#[async_trait]
impl LlmProvider for OpenAiChatProvider {
    fn name(&self) -> &str {
        PROVIDER_NAME
    }

    fn model(&self) -> &str {
        &self.endpoint.model
    }

    async fn complete(
        &self,
        prompt: &str,
        options: &CompletionOptions,
    ) -> Result<Completion, ProviderError> {
        let mut messages = Vec::with_capacity(2);
        if let Some(system) = options.system_prompt.as_deref() {
            messages.push(ChatMessage { role: "system", content: system });
        }
        messages.push(ChatMessage { role: "user", content: prompt });

        let request = ChatRequest {
            model: &self.endpoint.model,
            messages,
            temperature: options.temperature,
            max_tokens: options.max_tokens,
        };

        debug!(provider = PROVIDER_NAME, model = %self.endpoint.model, "Calling chat completions");
        let response = self
            .client
            .post(self.url())
            .bearer_auth(&self.endpoint.api_key)
            .json(&request)
            .send()
            .await
            .map_err(|e| map_transport(e, self.timeout))?;
        let body = check_status(response)
            .await?
            .text()
            .await
            .map_err(|e| map_transport(e, self.timeout))?;
        parse_chat(&body)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_chat_response() {
        let body = r#"{
            "id": "chatcmpl-1",
            "choices": [{"index": 0, "message": {"role": "assistant", "content": "{\"scenario_id\": 7, \"confidence\": 0.9}"}}],
            "usage": {"prompt_tokens": 210, "completion_tokens": 14, "total_tokens": 224}
        }"#;
        let completion = parse_chat(body).unwrap();
        assert!(completion.text.contains("scenario_id"));
        assert_eq!(completion.input_tokens, 210);
        assert_eq!(completion.output_tokens, 14);
    }

    #[test]
    fn test_null_content_is_malformed() {
        let body = r#"{"choices": [{"message": {"role": "assistant", "content": null}}]}"#;
        assert!(matches!(parse_chat(body), Err(ProviderError::Malformed(_))));
    }

    #[test]
    fn test_url_joins_without_double_slash() {
        let provider = OpenAiChatProvider::new(
            OpenAiEndpoint {
                url: "http://localhost:8080/v1/".into(),
                api_key: "sk".into(),
                model: "gpt-4o-mini".into(),
            },
            Duration::from_secs(1),
        )
        .unwrap();
        assert_eq!(provider.url(), "http://localhost:8080/v1/chat/completions");
    }
}
