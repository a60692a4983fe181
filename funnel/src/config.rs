//! Funnel configuration.
//!
//! ## Precedence (highest to lowest)
//!
//! 1. `FUNNEL_*` environment variables
//! 2. TOML file
//! 3. Built-in defaults
//!
//! The built-in thresholds are calibration defaults. Deployments are
//! expected to tune them against labelled traffic; `validate()` only
//! enforces the range and the ordering
//! `min_floor <= tag <= semantic <= vector <= confirm`.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::arbiter::ArbiterConfig;
use crate::ledger::{BudgetCeiling, PricingTable};
use crate::matchers::semantic::default_rules;
use crate::matchers::{ConceptRule, VectorMatcherConfig};

const ENV_MIN_FLOOR: &str = "FUNNEL_MIN_FLOOR";
const ENV_TAG_THRESHOLD: &str = "FUNNEL_TAG_THRESHOLD";
const ENV_SEMANTIC_THRESHOLD: &str = "FUNNEL_SEMANTIC_THRESHOLD";
const ENV_VECTOR_THRESHOLD: &str = "FUNNEL_VECTOR_THRESHOLD";
const ENV_CONFIRM_THRESHOLD: &str = "FUNNEL_CONFIRM_THRESHOLD";
const ENV_MARGIN: &str = "FUNNEL_MARGIN";
const ENV_TURN_TIMEOUT_MS: &str = "FUNNEL_TURN_TIMEOUT_MS";
const ENV_LLM_TIMEOUT_MS: &str = "FUNNEL_LLM_TIMEOUT_MS";
const ENV_VECTOR_TOP_K: &str = "FUNNEL_VECTOR_TOP_K";
const ENV_DAILY_BUDGET: &str = "FUNNEL_DAILY_BUDGET";
const ENV_MONTHLY_BUDGET: &str = "FUNNEL_MONTHLY_BUDGET";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Invalid value for {key}: '{value}'")]
    InvalidValue { key: String, value: String },

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// Confidence gates, all in `[0, 1]`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Thresholds {
    /// Lowest confidence ever accepted as a fallback decision.
    pub min_floor: f64,
    pub tag: f64,
    pub semantic: f64,
    pub vector: f64,
    /// Decisions below this need user confirmation.
    pub confirm: f64,
    /// Required lead of the top candidate over the runner-up.
    pub margin: f64,
}

impl Default for Thresholds {
    fn default() -> Self {
        Self {
            min_floor: 0.35,
            tag: 0.6,
            semantic: 0.65,
            vector: 0.75,
            confirm: 0.85,
            margin: 0.1,
        }
    }
}

impl Thresholds {
    pub fn validate(&self) -> Result<(), ConfigError> {
        let named = [
            ("min_floor", self.min_floor),
            ("tag", self.tag),
            ("semantic", self.semantic),
            ("vector", self.vector),
            ("confirm", self.confirm),
            ("margin", self.margin),
        ];
        for (name, value) in named {
            if !(0.0..=1.0).contains(&value) {
                return Err(ConfigError::Invalid(format!(
                    "threshold {name} must be in [0, 1], got {value}"
                )));
            }
        }
        let ordered = [self.min_floor, self.tag, self.semantic, self.vector, self.confirm];
        if ordered.windows(2).any(|w| w[0] > w[1]) {
            return Err(ConfigError::Invalid(format!(
                "thresholds must satisfy min_floor <= tag <= semantic <= vector <= confirm, got {:?}",
                ordered
            )));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FunnelConfig {
    pub thresholds: Thresholds,
    /// Raw trigram similarity below which a tag hit is discarded.
    pub tag_min_similarity: f64,
    pub vector: VectorMatcherConfig,
    pub arbiter: ArbiterConfig,
    pub budget: BudgetCeiling,
    /// Whole-turn processing budget.
    #[serde(with = "duration_ms")]
    pub turn_timeout: Duration,
    pub semantic_rules: Vec<ConceptRule>,
    pub pricing: PricingTable,
    /// Alternatives returned with an outcome for a clarifying question.
    pub clarify_candidates: usize,
}

impl Default for FunnelConfig {
    fn default() -> Self {
        Self {
            thresholds: Thresholds::default(),
            tag_min_similarity: 0.45,
            vector: VectorMatcherConfig::default(),
            arbiter: ArbiterConfig::default(),
            budget: BudgetCeiling::default(),
            turn_timeout: Duration::from_secs(20),
            semantic_rules: default_rules(),
            pricing: PricingTable::default(),
            clarify_candidates: 3,
        }
    }
}

fn parse_env<T: std::str::FromStr>(key: &str, raw: &str) -> Result<T, ConfigError> {
    raw.trim().parse().map_err(|_| ConfigError::InvalidValue {
        key: key.to_string(),
        value: raw.to_string(),
    })
}

impl FunnelConfig {
    pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
        let mut config: Self = toml::from_str(text)?;
        config.semantic_rules = std::mem::take(&mut config.semantic_rules)
            .into_iter()
            .map(ConceptRule::normalized)
            .collect();
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&text)
    }

    /// File (or defaults), then environment overrides, then validation.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut config = match path {
            Some(p) => Self::from_file(p)?,
            None => Self::default(),
        };
        config.apply_overrides(|key| std::env::var(key).ok())?;
        config.validate()?;
        Ok(config)
    }

    /// Apply `FUNNEL_*` overrides read through `lookup`.
    pub fn apply_overrides<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let t = &mut self.thresholds;
        for (key, slot) in [
            (ENV_MIN_FLOOR, &mut t.min_floor),
            (ENV_TAG_THRESHOLD, &mut t.tag),
            (ENV_SEMANTIC_THRESHOLD, &mut t.semantic),
            (ENV_VECTOR_THRESHOLD, &mut t.vector),
            (ENV_CONFIRM_THRESHOLD, &mut t.confirm),
            (ENV_MARGIN, &mut t.margin),
        ] {
            if let Some(raw) = lookup(key) {
                *slot = parse_env(key, &raw)?;
            }
        }
        if let Some(raw) = lookup(ENV_TURN_TIMEOUT_MS) {
            self.turn_timeout = Duration::from_millis(parse_env(ENV_TURN_TIMEOUT_MS, &raw)?);
        }
        if let Some(raw) = lookup(ENV_LLM_TIMEOUT_MS) {
            self.arbiter.call_timeout = Duration::from_millis(parse_env(ENV_LLM_TIMEOUT_MS, &raw)?);
        }
        if let Some(raw) = lookup(ENV_VECTOR_TOP_K) {
            self.vector.top_k = parse_env(ENV_VECTOR_TOP_K, &raw)?;
        }
        if let Some(raw) = lookup(ENV_DAILY_BUDGET) {
            self.budget.daily = Some(parse_env(ENV_DAILY_BUDGET, &raw)?);
        }
        if let Some(raw) = lookup(ENV_MONTHLY_BUDGET) {
            self.budget.monthly = Some(parse_env(ENV_MONTHLY_BUDGET, &raw)?);
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.thresholds.validate()?;
        if !(0.0..=1.0).contains(&self.tag_min_similarity) {
            return Err(ConfigError::Invalid(format!(
                "tag_min_similarity must be in [0, 1], got {}",
                self.tag_min_similarity
            )));
        }
        if self.turn_timeout.is_zero() {
            return Err(ConfigError::Invalid("turn_timeout must be > 0".into()));
        }
        if self.arbiter.call_timeout.is_zero() || self.vector.call_timeout.is_zero() {
            return Err(ConfigError::Invalid("provider call timeouts must be > 0".into()));
        }
        if self.vector.top_k == 0 {
            return Err(ConfigError::Invalid("vector.top_k must be > 0".into()));
        }
        for (name, limit) in [("daily", self.budget.daily), ("monthly", self.budget.monthly)] {
            if limit.is_some_and(|l| !l.is_finite() || l < 0.0) {
                return Err(ConfigError::Invalid(format!(
                    "{name} budget must be a non-negative number"
                )));
            }
        }
        if !(0.0..=1.0).contains(&self.arbiter.default_confidence) {
            return Err(ConfigError::Invalid(
                "arbiter.default_confidence must be in [0, 1]".into(),
            ));
        }
        Ok(())
    }
}

/// `Duration` as integer milliseconds.
pub mod duration_ms {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(d.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        Ok(Duration::from_millis(u64::deserialize(d)?))
    }
}
