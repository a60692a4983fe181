//! Persisted per-conversation state.

use std::collections::BTreeSet;

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::context::ConversationContext;
use crate::address::AddressFragments;
use crate::catalog::{ScenarioId, ScenarioRef};
use crate::matchers::{MatchCandidate, Stage};

/// Lifecycle of a conversation. Moves forward only, except for the
/// `Active <-> AwaitingConfirmation` loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConversationStatus {
    #[default]
    Active,
    AwaitingConfirmation,
    Resolved,
    Abandoned,
}

impl ConversationStatus {
    pub fn can_transition_to(self, next: Self) -> bool {
        use ConversationStatus::*;
        match (self, next) {
            (a, b) if a == b => true,
            (Active, AwaitingConfirmation | Resolved | Abandoned) => true,
            (AwaitingConfirmation, Active | Resolved | Abandoned) => true,
            _ => false,
        }
    }

    pub fn is_closed(self) -> bool {
        matches!(self, Self::Resolved | Self::Abandoned)
    }
}

impl std::fmt::Display for ConversationStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Active => write!(f, "active"),
            Self::AwaitingConfirmation => write!(f, "awaiting_confirmation"),
            Self::Resolved => write!(f, "resolved"),
            Self::Abandoned => write!(f, "abandoned"),
        }
    }
}

#[derive(Debug, Error, PartialEq)]
#[error("Invalid status transition {from} -> {to}")]
pub struct TransitionError {
    pub from: ConversationStatus,
    pub to: ConversationStatus,
}

/// A candidate service attached to the conversation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServiceContext {
    pub scenario: ScenarioRef,
    pub confidence: f64,
    pub stage: Stage,
    pub detected_at: DateTime<Utc>,
}

impl ServiceContext {
    pub fn from_candidate(candidate: &MatchCandidate, at: DateTime<Utc>) -> Self {
        Self {
            scenario: candidate.scenario.clone(),
            confidence: candidate.confidence,
            stage: candidate.stage,
            detected_at: at,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Disposition {
    /// The user said it was wrong.
    Rejected,
    /// A later turn produced a different candidate.
    Superseded,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServiceHistoryEntry {
    pub service: ServiceContext,
    pub disposition: Disposition,
    pub at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConversationState {
    pub conversation_id: String,
    pub user_id: String,
    pub user_name: Option<String>,
    #[serde(default)]
    pub address: AddressFragments,
    pub current_service: Option<ServiceContext>,
    #[serde(default)]
    pub service_history: Vec<ServiceHistoryEntry>,
    #[serde(default)]
    pub context: ConversationContext,
    pub status: ConversationStatus,
    pub message_count: u64,
    pub ai_requests_count: u64,
    pub ai_cost_total: f64,
    /// Incremented on every successful save; used for compare-and-swap.
    pub version: u64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub last_activity_at: DateTime<Utc>,
}

impl ConversationState {
    pub fn new(conversation_id: &str, user_id: &str, now: DateTime<Utc>) -> Self {
        Self {
            conversation_id: conversation_id.to_string(),
            user_id: user_id.to_string(),
            user_name: None,
            address: AddressFragments::default(),
            current_service: None,
            service_history: Vec::new(),
            context: ConversationContext::default(),
            status: ConversationStatus::Active,
            message_count: 0,
            ai_requests_count: 0,
            ai_cost_total: 0.0,
            version: 0,
            created_at: now,
            updated_at: now,
            last_activity_at: now,
        }
    }

    /// Advance `updated_at` and `last_activity_at`. Timestamps never move
    /// backwards or stand still, even if the clock does.
    pub fn touch(&mut self, now: DateTime<Utc>) {
        let floor = self.updated_at.max(self.last_activity_at) + ChronoDuration::microseconds(1);
        let at = now.max(floor);
        self.updated_at = at;
        self.last_activity_at = at;
    }

    pub fn set_status(&mut self, next: ConversationStatus) -> Result<(), TransitionError> {
        if !self.status.can_transition_to(next) {
            return Err(TransitionError {
                from: self.status,
                to: next,
            });
        }
        self.status = next;
        Ok(())
    }

    /// Make `service` current. A different previous candidate goes to the
    /// history as superseded.
    pub fn propose_service(&mut self, service: ServiceContext, now: DateTime<Utc>) {
        if let Some(previous) = self.current_service.take() {
            if previous.scenario.id != service.scenario.id {
                self.service_history.push(ServiceHistoryEntry {
                    service: previous,
                    disposition: Disposition::Superseded,
                    at: now,
                });
            }
        }
        self.current_service = Some(service);
    }

    /// Move the current candidate to the history as rejected.
    pub fn reject_current(&mut self, now: DateTime<Utc>) -> Option<ScenarioId> {
        let previous = self.current_service.take()?;
        let id = previous.scenario.id;
        self.service_history.push(ServiceHistoryEntry {
            service: previous,
            disposition: Disposition::Rejected,
            at: now,
        });
        Some(id)
    }

    pub fn rejected_ids(&self) -> BTreeSet<ScenarioId> {
        self.service_history
            .iter()
            .filter(|h| h.disposition == Disposition::Rejected)
            .map(|h| h.service.scenario.id)
            .collect()
    }

    pub fn record_ai_usage(&mut self, requests: u64, cost: f64) {
        self.ai_requests_count += requests;
        self.ai_cost_total += cost;
    }
}
