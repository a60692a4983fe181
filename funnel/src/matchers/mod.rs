//! Scoring stages of the funnel.
//!
//! Every stage implements [`Scorer`]: given the turn text and the current
//! catalog snapshot it returns zero or more [`MatchCandidate`]s. The
//! coordinator composes a fixed, ordered list of scorers and gates each
//! one on the previous stage's [`StageVerdict`].
//!
//! # Ranking
//!
//! ```text
//! confidence desc  ->  scenario id asc
//! ```
//!
//! The secondary key makes equal-confidence candidates deterministic.

pub mod filter;
pub mod semantic;
pub mod tag;
pub mod vector;

use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::time::Instant;

use crate::catalog::{CatalogSnapshot, ScenarioId, ScenarioRef};
use crate::ledger::LedgerError;
use crate::providers::ProviderError;

pub use filter::{FilterProfile, IncidentKind, LocationKind};
pub use semantic::{ConceptRule, SemanticMatcher};
pub use tag::{TagMatcher, TagMatcherConfig};
pub use vector::{VectorMatcher, VectorMatcherConfig};

/// Funnel stage that produced a candidate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Tag,
    Semantic,
    Vector,
    Llm,
}

impl std::fmt::Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Tag => write!(f, "tag"),
            Self::Semantic => write!(f, "semantic"),
            Self::Vector => write!(f, "vector"),
            Self::Llm => write!(f, "llm"),
        }
    }
}

/// One scored scenario. Ephemeral, never persisted as-is.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MatchCandidate {
    pub scenario: ScenarioRef,
    /// In `[0, 1]`.
    pub confidence: f64,
    pub stage: Stage,
    /// Tag names, concept names or snippets that produced the score.
    pub evidence: Vec<String>,
}

impl MatchCandidate {
    pub fn new(scenario: ScenarioRef, confidence: f64, stage: Stage, evidence: Vec<String>) -> Self {
        Self {
            scenario,
            confidence: confidence.clamp(0.0, 1.0),
            stage,
            evidence,
        }
    }

    pub fn scenario_id(&self) -> ScenarioId {
        self.scenario.id
    }
}

/// Text of one turn, normalized once and shared by all stages.
#[derive(Debug, Clone, PartialEq)]
pub struct TurnText {
    pub conversation_id: String,
    pub user_id: String,
    pub raw: String,
    pub normalized: String,
    /// Turn processing deadline; stages making network calls stop there.
    pub deadline: Option<Instant>,
}

impl TurnText {
    pub fn new(conversation_id: &str, user_id: &str, raw: &str) -> Self {
        Self {
            conversation_id: conversation_id.to_string(),
            user_id: user_id.to_string(),
            raw: raw.to_string(),
            normalized: crate::text::normalize(raw),
            deadline: None,
        }
    }

    pub fn with_deadline(mut self, deadline: Instant) -> Self {
        self.deadline = Some(deadline);
        self
    }

    /// The earlier of the turn deadline and `now + budget`.
    pub fn call_deadline(&self, budget: Duration) -> Instant {
        let own = Instant::now() + budget;
        match self.deadline {
            Some(turn) if turn < own => turn,
            _ => own,
        }
    }
}

#[derive(Debug, Error)]
pub enum MatcherError {
    #[error(transparent)]
    Provider(#[from] ProviderError),

    #[error("Cost ledger write failed: {0}")]
    Ledger(#[from] LedgerError),
}

/// Uniform scoring capability shared by every funnel stage.
#[async_trait]
pub trait Scorer: Send + Sync {
    fn stage(&self) -> Stage;

    /// Candidates for `turn`, ranked. Scenarios absent from `catalog`
    /// are never returned.
    async fn score(
        &self,
        turn: &TurnText,
        catalog: &CatalogSnapshot,
    ) -> Result<Vec<MatchCandidate>, MatcherError>;
}

fn ranking_order(a: &MatchCandidate, b: &MatchCandidate) -> Ordering {
    b.confidence
        .total_cmp(&a.confidence)
        .then_with(|| a.scenario.id.cmp(&b.scenario.id))
}

/// Sort candidates best first, ties broken by scenario id ascending.
pub fn rank(candidates: &mut [MatchCandidate]) {
    candidates.sort_by(ranking_order);
}

/// Merge per-stage lists into one ranked list, keeping each scenario's
/// highest-confidence candidate.
pub fn merge_ranked<'a>(lists: impl IntoIterator<Item = &'a [MatchCandidate]>) -> Vec<MatchCandidate> {
    let mut best: BTreeMap<ScenarioId, MatchCandidate> = BTreeMap::new();
    for list in lists {
        for candidate in list {
            match best.get(&candidate.scenario.id) {
                Some(existing) if existing.confidence >= candidate.confidence => {}
                _ => {
                    best.insert(candidate.scenario.id, candidate.clone());
                }
            }
        }
    }
    let mut merged: Vec<MatchCandidate> = best.into_values().collect();
    rank(&mut merged);
    merged
}

/// Outcome of gating one stage's ranked list.
#[derive(Debug, Clone, PartialEq)]
pub enum StageVerdict {
    /// Top candidate clears the threshold and leads by the margin.
    Matched(MatchCandidate),
    /// Top candidate clears the threshold but the runner-up is too close.
    Conflicting {
        top: MatchCandidate,
        runner_up: MatchCandidate,
    },
    /// Nothing clears the threshold.
    BelowThreshold(Option<MatchCandidate>),
}

impl StageVerdict {
    pub fn is_match(&self) -> bool {
        matches!(self, Self::Matched(_))
    }

    pub fn top(&self) -> Option<&MatchCandidate> {
        match self {
            Self::Matched(c) => Some(c),
            Self::Conflicting { top, .. } => Some(top),
            Self::BelowThreshold(c) => c.as_ref(),
        }
    }
}

/// Gate a ranked list: match iff `top >= threshold` and
/// `top - second >= margin`.
pub fn evaluate(ranked: &[MatchCandidate], threshold: f64, margin: f64) -> StageVerdict {
    let Some(top) = ranked.first() else {
        return StageVerdict::BelowThreshold(None);
    };
    if top.confidence < threshold {
        return StageVerdict::BelowThreshold(Some(top.clone()));
    }
    match ranked.get(1) {
        Some(second) if top.confidence - second.confidence < margin => StageVerdict::Conflicting {
            top: top.clone(),
            runner_up: second.clone(),
        },
        _ => StageVerdict::Matched(top.clone()),
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;

    pub fn candidate(id: ScenarioId, confidence: f64) -> MatchCandidate {
        MatchCandidate::new(
            ScenarioRef {
                id,
                name: format!("scenario {id}"),
                category: "test".to_string(),
            },
            confidence,
            Stage::Tag,
            vec![],
        )
    }
}
