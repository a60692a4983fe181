//! HTTP clients implementing the funnel's provider traits.
//!
//! Shared plumbing (client construction, status and transport error
//! mapping, lenient token counts) lives here; each vendor module only
//! knows its own request and response shapes.

pub mod openai;
pub mod yandex;

use std::time::Duration;

use funnel::ProviderError;
use serde::{Deserialize, Deserializer};

pub use openai::OpenAiChatProvider;
pub use yandex::YandexGptProvider;

/// Longest error body kept in a `ProviderError::Http`.
const MAX_ERROR_BODY: usize = 512;

pub(crate) fn build_client(timeout: Duration) -> Result<reqwest::Client, ProviderError> {
    reqwest::Client::builder()
        .timeout(timeout)
        .build()
        .map_err(|e| ProviderError::NotConfigured(format!("HTTP client: {e}")))
}

pub(crate) fn map_transport(err: reqwest::Error, timeout: Duration) -> ProviderError {
    if err.is_timeout() {
        ProviderError::Timeout(timeout)
    } else if err.is_decode() {
        ProviderError::Malformed(err.to_string())
    } else {
        ProviderError::Transport(err.to_string())
    }
}

/// Turn a non-2xx response into an error; pass 2xx through.
pub(crate) async fn check_status(
    response: reqwest::Response,
) -> Result<reqwest::Response, ProviderError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let mut body = response.text().await.unwrap_or_default();
    truncate_utf8(&mut body, MAX_ERROR_BODY);
    Err(status_error(status.as_u16(), body))
}

pub(crate) fn status_error(status: u16, body: String) -> ProviderError {
    if status == 429 {
        ProviderError::RateLimited(body)
    } else {
        ProviderError::Http { status, body }
    }
}

fn truncate_utf8(s: &mut String, max: usize) {
    if s.len() <= max {
        return;
    }
    let mut end = max;
    while !s.is_char_boundary(end) {
        end -= 1;
    }
    s.truncate(end);
}

/// Token count that may arrive as a number, a numeric string or null.
pub(crate) fn lenient_u64<'de, D: Deserializer<'de>>(d: D) -> Result<u64, D::Error> {
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Num(u64),
        Str(String),
    }
    match Option::<Raw>::deserialize(d)? {
        Some(Raw::Num(n)) => Ok(n),
        Some(Raw::Str(s)) => s.trim().parse().map_err(serde::de::Error::custom),
        None => Ok(0),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Deserialize)]
    struct Usage {
        #[serde(default, deserialize_with = "lenient_u64")]
        tokens: u64,
    }

    #[test]
    fn test_lenient_token_counts() {
        let parse = |s: &str| serde_json::from_str::<Usage>(s).unwrap().tokens;
        assert_eq!(parse(r#"{"tokens": 12}"#), 12);
        assert_eq!(parse(r#"{"tokens": "34"}"#), 34);
        assert_eq!(parse(r#"{"tokens": null}"#), 0);
        assert_eq!(parse(r#"{}"#), 0);
        assert!(serde_json::from_str::<Usage>(r#"{"tokens": "many"}"#).is_err());
    }

    #[test]
    fn test_status_mapping() {
        assert!(matches!(status_error(429, "slow down".into()), ProviderError::RateLimited(_)));
        let err = status_error(503, "busy".into());
        assert!(err.is_retriable());
        assert!(!status_error(401, "no".into()).is_retriable());
    }

    #[test]
    fn test_truncate_respects_char_boundaries() {
        let mut s = "ошибка".repeat(100);
        truncate_utf8(&mut s, 5);
        assert_eq!(s, "ош");
    }
}
