//! Per-provider/model token pricing.

use serde::{Deserialize, Serialize};

/// Price of one provider/model pair, in account currency per 1000 tokens.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PriceEntry {
    pub provider: String,
    /// `None` applies to every model of the provider.
    #[serde(default)]
    pub model: Option<String>,
    pub input_per_1k: f64,
    pub output_per_1k: f64,
}

impl PriceEntry {
    pub fn new(provider: &str, model: Option<&str>, input_per_1k: f64, output_per_1k: f64) -> Self {
        Self {
            provider: provider.to_string(),
            model: model.map(str::to_string),
            input_per_1k,
            output_per_1k,
        }
    }

    /// Cost of a call with the given token usage.
    pub fn cost(&self, input_tokens: u64, output_tokens: u64) -> f64 {
        (input_tokens as f64 / 1000.0) * self.input_per_1k
            + (output_tokens as f64 / 1000.0) * self.output_per_1k
    }
}

/// Lookup table: an exact `(provider, model)` entry wins over a
/// provider-wide entry. Unknown pairs are free.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PricingTable {
    entries: Vec<PriceEntry>,
}

impl PricingTable {
    pub fn new(entries: Vec<PriceEntry>) -> Self {
        Self { entries }
    }

    pub fn empty() -> Self {
        Self::new(Vec::new())
    }

    pub fn entries(&self) -> &[PriceEntry] {
        &self.entries
    }

    pub fn lookup(&self, provider: &str, model: &str) -> Option<&PriceEntry> {
        self.entries
            .iter()
            .find(|e| e.provider == provider && e.model.as_deref() == Some(model))
            .or_else(|| {
                self.entries
                    .iter()
                    .find(|e| e.provider == provider && e.model.is_none())
            })
    }

    pub fn cost(&self, provider: &str, model: &str, input_tokens: u64, output_tokens: u64) -> f64 {
        match self.lookup(provider, model) {
            Some(entry) => entry.cost(input_tokens, output_tokens),
            None => {
                tracing::debug!(provider, model, "No price entry, recording zero cost");
                0.0
            }
        }
    }
}

impl Default for PricingTable {
    /// YandexGPT list prices (rub per 1k tokens) plus OpenAI-compatible
    /// chat and embedding models (usd per 1k tokens).
    fn default() -> Self {
        Self::new(vec![
            PriceEntry::new("yandex", Some("yandexgpt-lite"), 0.20, 0.20),
            PriceEntry::new("yandex", Some("yandexgpt"), 1.20, 1.20),
            PriceEntry::new("yandex", None, 0.20, 0.20),
            PriceEntry::new("openai", Some("gpt-4o-mini"), 0.00015, 0.0006),
            PriceEntry::new("openai", Some("text-embedding-3-small"), 0.00002, 0.0),
        ])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exact_model_beats_provider_wildcard() {
        let table = PricingTable::default();
        let lite = table.lookup("yandex", "yandexgpt-lite").unwrap();
        assert_eq!(lite.input_per_1k, 0.20);
        let pro = table.lookup("yandex", "yandexgpt").unwrap();
        assert_eq!(pro.input_per_1k, 1.20);
        let other = table.lookup("yandex", "summarization").unwrap();
        assert!(other.model.is_none());
    }

    #[test]
    fn test_cost_per_thousand_tokens() {
        let table = PricingTable::new(vec![PriceEntry::new("p", None, 1.0, 2.0)]);
        let cost = table.cost("p", "m", 500, 250);
        assert!((cost - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_unknown_provider_is_free() {
        assert_eq!(PricingTable::empty().cost("nobody", "x", 10_000, 10_000), 0.0);
    }

    #[test]
    fn test_table_deserializes_from_list() {
        let table: PricingTable = serde_json::from_str(
            r#"[{"provider":"openai","input_per_1k":0.5,"output_per_1k":1.5}]"#,
        )
        .unwrap();
        assert_eq!(table.entries().len(), 1);
        assert!(table.lookup("openai", "anything").is_some());
    }
}
