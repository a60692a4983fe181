//! YandexGPT foundation-models completion client.
//!
//! Usage counters come back as strings (`"inputTextTokens": "118"`), so
//! they go through [`lenient_u64`](super::lenient_u64).

use std::time::Duration;

use async_trait::async_trait;
use funnel::{Completion, CompletionOptions, LlmProvider, ProviderError};
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::{build_client, check_status, lenient_u64, map_transport};
use crate::config::YandexEndpoint;

pub const PROVIDER_NAME: &str = "yandex";

pub struct YandexGptProvider {
    client: reqwest::Client,
    endpoint: YandexEndpoint,
    timeout: Duration,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct CompletionRequest<'a> {
    model_uri: String,
    completion_options: RequestOptions,
    messages: Vec<Message<'a>>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct RequestOptions {
    stream: bool,
    temperature: f32,
    max_tokens: u32,
}

#[derive(Serialize)]
struct Message<'a> {
    role: &'a str,
    text: &'a str,
}

#[derive(Deserialize)]
struct CompletionResponse {
    result: CompletionResult,
}

#[derive(Deserialize)]
struct CompletionResult {
    alternatives: Vec<Alternative>,
    #[serde(default)]
    usage: Usage,
}

#[derive(Deserialize)]
struct Alternative {
    message: AlternativeMessage,
}

#[derive(Deserialize)]
struct AlternativeMessage {
    text: String,
}

#[derive(Deserialize, Default)]
#[serde(rename_all = "camelCase")]
struct Usage {
    #[serde(default, deserialize_with = "lenient_u64")]
    input_text_tokens: u64,
    #[serde(default, deserialize_with = "lenient_u64")]
    completion_tokens: u64,
}

impl YandexGptProvider {
    pub fn new(endpoint: YandexEndpoint, timeout: Duration) -> Result<Self, ProviderError> {
        Ok(Self {
            client: build_client(timeout)?,
            endpoint,
            timeout,
        })
    }

    fn model_uri(&self) -> String {
        format!("gpt://{}/{}/latest", self.endpoint.folder_id, self.endpoint.model)
    }
}

/// Extract text and usage from a completion response body.
pub fn parse_completion(body: &str) -> Result<Completion, ProviderError> {
    let response: CompletionResponse =
        serde_json::from_str(body).map_err(|e| ProviderError::Malformed(e.to_string()))?;
    let text = response
        .result
        .alternatives
        .into_iter()
        .next()
        .map(|a| a.message.text)
        .ok_or_else(|| ProviderError::Malformed("no alternatives in response".into()))?;
    Ok(Completion {
        text,
        input_tokens: response.result.usage.input_text_tokens,
        output_tokens: response.result.usage.completion_tokens,
    })
}

#[async_trait]
impl LlmProvider for YandexGptProvider {
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
            messages.push(Message { role: "system", text: system });
        }
        messages.push(Message { role: "user", text: prompt });

        let request = CompletionRequest {
            model_uri: self.model_uri(),
            completion_options: RequestOptions {
                stream: false,
                temperature: options.temperature,
                max_tokens: options.max_tokens,
            },
            messages,
        };

        debug!(provider = PROVIDER_NAME, model = %self.endpoint.model, "Calling YandexGPT");
        let response = self
            .client
            .post(&self.endpoint.url)
            .bearer_auth(&self.endpoint.api_key)
            .header("x-folder-id", &self.endpoint.folder_id)
            .json(&request)
            .send()
            .await
            .map_err(|e| map_transport(e, self.timeout))?;
        let body = check_status(response)
            .await?
            .text()
            .await
            .map_err(|e| map_transport(e, self.timeout))?;
        parse_completion(&body)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_completion_with_string_usage() {
        let body = r#"{
            "result": {
                "alternatives": [
                    {"message": {"role": "assistant", "text": "СЦЕНАРИЙ: 12\nУВЕРЕННОСТЬ: 0,8"}, "status": "ALTERNATIVE_STATUS_FINAL"}
                ],
                "usage": {"inputTextTokens": "118", "completionTokens": "9", "totalTokens": "127"},
                "modelVersion": "23.10.2024"
            }
        }"#;
        let completion = parse_completion(body).unwrap();
        assert!(completion.text.starts_with("СЦЕНАРИЙ: 12"));
        assert_eq!(completion.input_tokens, 118);
        assert_eq!(completion.output_tokens, 9);
    }

    #[test]
    fn test_parse_completion_without_alternatives() {
        let err = parse_completion(r#"{"result": {"alternatives": []}}"#).unwrap_err();
        assert!(matches!(err, ProviderError::Malformed(_)));
    }

    #[test]
    fn test_request_shape() {
        let request = CompletionRequest {
            model_uri: "gpt://b1g/yandexgpt-lite/latest".into(),
            completion_options: RequestOptions {
                stream: false,
                temperature: 0.3,
                max_tokens: 500,
            },
            messages: vec![Message { role: "user", text: "течёт кран" }],
        };
        let json = serde_json::to_value(&request).unwrap();
        assert_eq!(json["modelUri"], "gpt://b1g/yandexgpt-lite/latest");
        assert_eq!(json["completionOptions"]["maxTokens"], 500);
        assert_eq!(json["messages"][0]["text"], "течёт кран");
    }

    #[test]
    fn test_model_uri_uses_folder() {
        let provider = YandexGptProvider::new(
            YandexEndpoint {
                url: "http://localhost".into(),
                api_key: "k".into(),
                folder_id: "b1gfolder".into(),
                model: "yandexgpt-lite".into(),
            },
            Duration::from_secs(1),
        )
        .unwrap();
        assert_eq!(provider.model_uri(), "gpt://b1gfolder/yandexgpt-lite/latest");
        assert_eq!(provider.name(), "yandex");
    }
}
