//! Fuzzy tag matching.
//!
//! Each active tag is compared to the turn text with trigram phrase
//! similarity. A hit contributes `similarity * weight`; hits of the same
//! scenario combine as `1 - prod(1 - hit)`, so several weak tags add up
//! without ever exceeding 1.0.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use super::{rank, MatchCandidate, MatcherError, Scorer, Stage, TurnText};
use crate::catalog::{CatalogSnapshot, ScenarioRef};
use crate::text::phrase_similarity;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TagMatcherConfig {
    /// Hits with raw similarity below this are discarded.
    pub min_similarity: f64,
    /// Score granted to a tag found verbatim in the text, whatever its
    /// weight. Set to the tag stage threshold.
    pub exact_floor: f64,
}

impl Default for TagMatcherConfig {
    fn default() -> Self {
        Self {
            min_similarity: 0.45,
            exact_floor: 0.6,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct TagMatcher {
    config: TagMatcherConfig,
}

impl TagMatcher {
    pub fn new(config: TagMatcherConfig) -> Self {
        Self { config }
    }

    /// Synchronous core, also used directly in tests.
    pub fn score_text(&self, normalized: &str, catalog: &CatalogSnapshot) -> Vec<MatchCandidate> {
        let mut candidates = Vec::new();
        for scenario in catalog.iter() {
            let mut miss_product = 1.0;
            let mut evidence = Vec::new();
            for tag in scenario.active_tags() {
                let tag_text = crate::text::normalize(&tag.name);
                if tag_text.is_empty() {
                    continue;
                }
                let similarity = phrase_similarity(normalized, &tag_text);
                if similarity < self.config.min_similarity {
                    continue;
                }
                let mut hit = (similarity * tag.weight).clamp(0.0, 1.0);
                if similarity >= 1.0 {
                    hit = hit.max(self.config.exact_floor);
                }
                miss_product *= 1.0 - hit;
                evidence.push(tag.name.clone());
            }
            if evidence.is_empty() {
                continue;
            }
            candidates.push(MatchCandidate::new(
                ScenarioRef::from(scenario),
                1.0 - miss_product,
                Stage::Tag,
                evidence,
            ));
        }
        rank(&mut candidates);
        candidates
    }
}

#[async_trait]
impl Scorer for TagMatcher {
    fn stage(&self) -> Stage {
        Stage::Tag
    }

    async fn score(
        &self,
        turn: &TurnText,
        catalog: &CatalogSnapshot,
    ) -> Result<Vec<MatchCandidate>, MatcherError> {
        Ok(self.score_text(&turn.normalized, catalog))
    }
}
