//! Per-turn funnel state machine.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::matchers::Stage;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FunnelState {
    New,
    TagMatched,
    TagInconclusive,
    SemanticMatched,
    SemanticInconclusive,
    VectorMatched,
    VectorInconclusive,
    LlmDecided,
    LlmUnavailable,
    Decided,
    NeedsMoreInfo,
}

impl FunnelState {
    pub fn matched(stage: Stage) -> Self {
        match stage {
            Stage::Tag => Self::TagMatched,
            Stage::Semantic => Self::SemanticMatched,
            Stage::Vector => Self::VectorMatched,
            Stage::Llm => Self::LlmDecided,
        }
    }

    pub fn inconclusive(stage: Stage) -> Self {
        match stage {
            Stage::Tag => Self::TagInconclusive,
            Stage::Semantic => Self::SemanticInconclusive,
            Stage::Vector => Self::VectorInconclusive,
            Stage::Llm => Self::LlmUnavailable,
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Decided | Self::NeedsMoreInfo)
    }

    fn is_inconclusive(self) -> bool {
        matches!(
            self,
            Self::TagInconclusive | Self::SemanticInconclusive | Self::VectorInconclusive
        )
    }

    pub fn can_advance_to(self, next: Self) -> bool {
        use FunnelState::*;
        match (self, next) {
            (New, TagMatched | TagInconclusive | NeedsMoreInfo) => true,
            (TagInconclusive, SemanticMatched | SemanticInconclusive) => true,
            (SemanticInconclusive, VectorMatched | VectorInconclusive) => true,
            (VectorInconclusive, LlmDecided | LlmUnavailable) => true,
            (TagMatched | SemanticMatched | VectorMatched, Decided) => true,
            (LlmDecided | LlmUnavailable, Decided | NeedsMoreInfo) => true,
            // Turn deadline: fall back from wherever the funnel stopped.
            (s, Decided | NeedsMoreInfo) if s.is_inconclusive() => true,
            _ => false,
        }
    }
}

impl std::fmt::Display for FunnelState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::New => "NEW",
            Self::TagMatched => "TAG_MATCHED",
            Self::TagInconclusive => "TAG_INCONCLUSIVE",
            Self::SemanticMatched => "SEMANTIC_MATCHED",
            Self::SemanticInconclusive => "SEMANTIC_INCONCLUSIVE",
            Self::VectorMatched => "VECTOR_MATCHED",
            Self::VectorInconclusive => "VECTOR_INCONCLUSIVE",
            Self::LlmDecided => "LLM_DECIDED",
            Self::LlmUnavailable => "LLM_UNAVAILABLE",
            Self::Decided => "DECIDED",
            Self::NeedsMoreInfo => "NEEDS_MORE_INFO",
        };
        write!(f, "{name}")
    }
}

#[derive(Debug, Error, PartialEq)]
#[error("Invalid funnel transition {from} -> {to}")]
pub struct FunnelTransitionError {
    pub from: FunnelState,
    pub to: FunnelState,
}

/// Ordered record of the states one turn went through.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FunnelTrace {
    states: Vec<FunnelState>,
}

impl Default for FunnelTrace {
    fn default() -> Self {
        Self::new()
    }
}

impl FunnelTrace {
    pub fn new() -> Self {
        Self {
            states: vec![FunnelState::New],
        }
    }

    pub fn current(&self) -> FunnelState {
        self.states.last().copied().unwrap_or(FunnelState::New)
    }

    pub fn advance(&mut self, next: FunnelState) -> Result<(), FunnelTransitionError> {
        let from = self.current();
        if !from.can_advance_to(next) {
            return Err(FunnelTransitionError { from, to: next });
        }
        tracing::trace!(%from, to = %next, "Funnel transition");
        self.states.push(next);
        Ok(())
    }

    pub fn contains(&self, state: FunnelState) -> bool {
        self.states.contains(&state)
    }

    pub fn states(&self) -> &[FunnelState] {
        &self.states
    }
}
