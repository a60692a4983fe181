//! Provider endpoints and file locations for the `dispatch-agents` binary.
//!
//! Everything comes from `DISPATCH_*` environment variables; funnel
//! tuning (thresholds, budgets, timeouts) lives in the TOML file named by
//! [`ENV_FUNNEL_CONFIG`] and the `FUNNEL_*` overrides.

use std::path::PathBuf;
use std::time::Duration;

pub const ENV_YANDEX_URL: &str = "DISPATCH_YANDEX_URL";
pub const ENV_YANDEX_API_KEY: &str = "DISPATCH_YANDEX_API_KEY";
pub const ENV_YANDEX_FOLDER_ID: &str = "DISPATCH_YANDEX_FOLDER_ID";
pub const ENV_YANDEX_MODEL: &str = "DISPATCH_YANDEX_MODEL";
pub const ENV_OPENAI_URL: &str = "DISPATCH_OPENAI_URL";
pub const ENV_OPENAI_API_KEY: &str = "DISPATCH_OPENAI_API_KEY";
pub const ENV_OPENAI_MODEL: &str = "DISPATCH_OPENAI_MODEL";
pub const ENV_EMBED_URL: &str = "DISPATCH_EMBED_URL";
pub const ENV_EMBED_API_KEY: &str = "DISPATCH_EMBED_API_KEY";
pub const ENV_EMBED_MODEL: &str = "DISPATCH_EMBED_MODEL";
pub const ENV_EMBED_INDEX: &str = "DISPATCH_EMBED_INDEX";
pub const ENV_CATALOG: &str = "DISPATCH_CATALOG";
pub const ENV_COST_LOG: &str = "DISPATCH_COST_LOG";
pub const ENV_STATE_DB: &str = "DISPATCH_STATE_DB";
pub const ENV_STATE_LOG: &str = "DISPATCH_STATE_LOG";
pub const ENV_FUNNEL_CONFIG: &str = "DISPATCH_FUNNEL_CONFIG";
pub const ENV_HTTP_TIMEOUT_MS: &str = "DISPATCH_HTTP_TIMEOUT_MS";

pub const DEFAULT_YANDEX_URL: &str =
    "https://llm.api.cloud.yandex.net/foundationModels/v1/completion";
pub const DEFAULT_YANDEX_MODEL: &str = "yandexgpt-lite";
pub const DEFAULT_OPENAI_URL: &str = "https://api.openai.com/v1";
pub const DEFAULT_OPENAI_MODEL: &str = "gpt-4o-mini";
pub const DEFAULT_EMBED_MODEL: &str = "text-embedding-3-small";

/// YandexGPT foundation-models endpoint.
#[derive(Debug, Clone, PartialEq)]
pub struct YandexEndpoint {
    pub url: String,
    pub api_key: String,
    pub folder_id: String,
    pub model: String,
}

/// OpenAI-compatible chat completions endpoint (fallback provider).
#[derive(Debug, Clone, PartialEq)]
pub struct OpenAiEndpoint {
    pub url: String,
    pub api_key: String,
    pub model: String,
}

/// OpenAI-compatible embeddings endpoint plus the precomputed scenario
/// index it is compared against.
#[derive(Debug, Clone, PartialEq)]
pub struct EmbeddingEndpoint {
    pub url: String,
    pub api_key: String,
    pub model: String,
    pub index_path: PathBuf,
}

#[derive(Debug, Clone, PartialEq)]
pub struct DispatchConfig {
    /// Primary LLM (optional)
    pub yandex: Option<YandexEndpoint>,
    /// Fallback LLM (optional)
    pub openai: Option<OpenAiEndpoint>,
    /// Vector stage is skipped when unset.
    pub embeddings: Option<EmbeddingEndpoint>,
    /// JSON array of scenarios.
    pub catalog_path: PathBuf,
    /// JSONL cost ledger.
    pub cost_log: PathBuf,
    /// RocksDB directory, used with the `heavy-state` feature.
    pub state_db: PathBuf,
    /// JSONL conversation log, used without `heavy-state`.
    pub state_log: PathBuf,
    pub funnel_config: Option<PathBuf>,
    /// Per-request HTTP client timeout; the funnel applies its own stage
    /// deadlines on top.
    pub http_timeout: Duration,
}

impl DispatchConfig {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from an arbitrary key lookup. Blank values count as unset.
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let yandex = match (get(ENV_YANDEX_API_KEY), get(ENV_YANDEX_FOLDER_ID)) {
            (Some(api_key), Some(folder_id)) => Some(YandexEndpoint {
                url: get(ENV_YANDEX_URL).unwrap_or_else(|| DEFAULT_YANDEX_URL.into()),
                api_key,
                folder_id,
                model: get(ENV_YANDEX_MODEL).unwrap_or_else(|| DEFAULT_YANDEX_MODEL.into()),
            }),
            _ => None,
        };

        let openai = get(ENV_OPENAI_API_KEY).map(|api_key| OpenAiEndpoint {
            url: get(ENV_OPENAI_URL).unwrap_or_else(|| DEFAULT_OPENAI_URL.into()),
            api_key,
            model: get(ENV_OPENAI_MODEL).unwrap_or_else(|| DEFAULT_OPENAI_MODEL.into()),
        });

        let embeddings = get(ENV_EMBED_INDEX).and_then(|index| {
            let api_key = get(ENV_EMBED_API_KEY).or_else(|| get(ENV_OPENAI_API_KEY))?;
            Some(EmbeddingEndpoint {
                url: get(ENV_EMBED_URL)
                    .or_else(|| get(ENV_OPENAI_URL))
                    .unwrap_or_else(|| DEFAULT_OPENAI_URL.into()),
                api_key,
                model: get(ENV_EMBED_MODEL).unwrap_or_else(|| DEFAULT_EMBED_MODEL.into()),
                index_path: PathBuf::from(index),
            })
        });

        let http_timeout = get(ENV_HTTP_TIMEOUT_MS)
            .and_then(|v| v.trim().parse::<u64>().ok())
            .filter(|ms| *ms > 0)
            .map(Duration::from_millis)
            .unwrap_or(Duration::from_secs(30));

        Self {
            yandex,
            openai,
            embeddings,
            catalog_path: get(ENV_CATALOG)
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from("catalog.json")),
            cost_log: get(ENV_COST_LOG)
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from(".dispatch-costs.jsonl")),
            state_db: get(ENV_STATE_DB)
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from(".dispatch-state")),
            state_log: get(ENV_STATE_LOG)
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from(".dispatch-conversations.jsonl")),
            funnel_config: get(ENV_FUNNEL_CONFIG).map(PathBuf::from),
            http_timeout,
        }
    }

    /// Names of the configured LLM providers, primary first.
    pub fn llm_chain(&self) -> Vec<&'static str> {
        let mut chain = Vec::new();
        if self.yandex.is_some() {
            chain.push("yandex");
        }
        if self.openai.is_some() {
            chain.push("openai");
        }
        chain
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_empty_environment_has_no_providers() {
        let config = DispatchConfig::from_lookup(lookup(&[]));
        assert!(config.yandex.is_none());
        assert!(config.openai.is_none());
        assert!(config.embeddings.is_none());
        assert_eq!(config.catalog_path, PathBuf::from("catalog.json"));
        assert_eq!(config.state_log, PathBuf::from(".dispatch-conversations.jsonl"));
        assert_eq!(config.http_timeout, Duration::from_secs(30));
        assert!(config.llm_chain().is_empty());
    }

    #[test]
    fn test_yandex_needs_key_and_folder() {
        let only_key = DispatchConfig::from_lookup(lookup(&[(ENV_YANDEX_API_KEY, "k")]));
        assert!(only_key.yandex.is_none());

        let config = DispatchConfig::from_lookup(lookup(&[
            (ENV_YANDEX_API_KEY, "k"),
            (ENV_YANDEX_FOLDER_ID, "b1g"),
            (ENV_OPENAI_API_KEY, "sk"),
        ]));
        let yandex = config.yandex.as_ref().unwrap();
        assert_eq!(yandex.url, DEFAULT_YANDEX_URL);
        assert_eq!(yandex.model, DEFAULT_YANDEX_MODEL);
        assert_eq!(config.llm_chain(), vec!["yandex", "openai"]);
    }

    #[test]
    fn test_embeddings_fall_back_to_openai_key() {
        let config = DispatchConfig::from_lookup(lookup(&[
            (ENV_OPENAI_API_KEY, "sk"),
            (ENV_EMBED_INDEX, "index.json"),
        ]));
        let embed = config.embeddings.unwrap();
        assert_eq!(embed.api_key, "sk");
        assert_eq!(embed.model, DEFAULT_EMBED_MODEL);
        assert_eq!(embed.index_path, PathBuf::from("index.json"));
    }

    #[test]
    fn test_blank_values_are_unset_and_bad_timeout_ignored() {
        let config = DispatchConfig::from_lookup(lookup(&[
            (ENV_OPENAI_API_KEY, "  "),
            (ENV_HTTP_TIMEOUT_MS, "soon"),
        ]));
        assert!(config.openai.is_none());
        assert_eq!(config.http_timeout, Duration::from_secs(30));
    }
}
