//! Funnel coordinator: runs one conversation turn end to end.
//!
//! # Design
//!
//! ```text
//! lock(conversation)
//!   load_or_create state, count message, merge address/name
//!   resolved?      -> replay stored decision
//!   abandoned?     -> NEEDS_MORE_INFO
//!   awaiting?      -> yes: resolve / no: reject / "no, <text>": reject
//!                     and score <text> / other: re-score
//!   catalog        -> CatalogUnavailable is the only hard error
//!   tag -> semantic -> vector -> narrow -> LLM arbiter -> fallback
//!   persist state
//! unlock
//! ```
//!
//! Stages run in order and stop at the first one whose top candidate
//! clears its threshold by the configured margin. Candidates from every
//! stage are merged so the fallback can use the best one seen. When two
//! or more merged candidates clear the floor, [`FilterProfile`] narrows
//! them by scenario attributes before the LLM sees them; the resulting
//! shortlist is also returned to the caller for a clarifying question.

pub mod confirm;
pub mod state;

use std::sync::Arc;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tokio::time::Instant;

use crate::address::{extract_address, extract_user_name, AddressFragments};
use crate::arbiter::{ArbiterOutcome, LlmArbiter};
use crate::catalog::{CatalogProvider, CatalogSnapshot, ScenarioRef};
use crate::config::FunnelConfig;
use crate::dialog::{ConversationState, ConversationStatus, DialogMemory, ServiceContext};
use crate::error::FunnelError;
use crate::ledger::{BudgetView, CostLedger};
use crate::matchers::{
    evaluate, merge_ranked, FilterProfile, MatchCandidate, Scorer, SemanticMatcher, Stage, StageVerdict,
    TagMatcher, TagMatcherConfig, TurnText, VectorMatcher,
};
use crate::providers::{EmbeddingProvider, LlmProvider};

pub use confirm::{classify_reply, Reply};
pub use state::{FunnelState, FunnelTrace, FunnelTransitionError};

/// Inbound turn.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TurnRequest {
    pub conversation_id: String,
    pub user_id: String,
    pub user_name: Option<String>,
    pub text: String,
}

impl TurnRequest {
    pub fn new(conversation_id: &str, user_id: &str, text: &str) -> Self {
        Self {
            conversation_id: conversation_id.to_string(),
            user_id: user_id.to_string(),
            user_name: None,
            text: text.to_string(),
        }
    }

    pub fn with_user_name(mut self, name: &str) -> Self {
        self.user_name = Some(name.to_string());
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DecisionStatus {
    Decided,
    NeedsMoreInfo,
    AwaitingConfirmation,
}

impl std::fmt::Display for DecisionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Decided => write!(f, "DECIDED"),
            Self::NeedsMoreInfo => write!(f, "NEEDS_MORE_INFO"),
            Self::AwaitingConfirmation => write!(f, "AWAITING_CONFIRMATION"),
        }
    }
}

/// What the caller gets back for a turn.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TurnOutcome {
    pub status: DecisionStatus,
    pub service: Option<ScenarioRef>,
    pub confidence: Option<f64>,
    /// Stage that produced the service.
    pub stage: Option<Stage>,
    /// Address accumulated over the conversation so far.
    pub extracted_address: AddressFragments,
    pub user_name: Option<String>,
    pub conversation_status: ConversationStatus,
    /// Funnel states visited this turn; empty when the funnel did not run.
    pub trace: Vec<FunnelState>,
    /// Ranked alternatives from this turn, best first, for a clarifying
    /// question. Empty when the funnel did not run.
    pub candidates: Vec<MatchCandidate>,
}

impl TurnOutcome {
    fn from_state(status: DecisionStatus, state: &ConversationState, trace: Vec<FunnelState>) -> Self {
        let service = match status {
            DecisionStatus::NeedsMoreInfo => None,
            _ => state.current_service.as_ref(),
        };
        Self {
            status,
            service: service.map(|s| s.scenario.clone()),
            confidence: service.map(|s| s.confidence),
            stage: service.map(|s| s.stage),
            extracted_address: state.address.clone(),
            user_name: state.user_name.clone(),
            conversation_status: state.status,
            trace,
            candidates: Vec::new(),
        }
    }

    fn with_candidates(mut self, candidates: Vec<MatchCandidate>) -> Self {
        self.candidates = candidates;
        self
    }
}

/// Result of running the stages once.
struct FunnelRun {
    trace: FunnelTrace,
    decision: Option<MatchCandidate>,
    /// Merged candidates after narrowing, best first.
    shortlist: Vec<MatchCandidate>,
    deepest: Option<Stage>,
    llm_attempts: u64,
    llm_cost: f64,
}

struct StageSlot {
    scorer: Box<dyn Scorer>,
    threshold: f64,
}

pub struct FunnelCoordinator {
    catalog: Arc<dyn CatalogProvider>,
    memory: Arc<DialogMemory>,
    ledger: CostLedger,
    stages: Vec<StageSlot>,
    vector: Option<StageSlot>,
    arbiter: Option<LlmArbiter>,
    config: FunnelConfig,
}

impl FunnelCoordinator {
    /// Coordinator with the lexical stages only. Add the paid stages with
    /// [`with_embeddings`](Self::with_embeddings) and
    /// [`with_llm_providers`](Self::with_llm_providers).
    pub fn new(
        catalog: Arc<dyn CatalogProvider>,
        memory: Arc<DialogMemory>,
        ledger: CostLedger,
        config: FunnelConfig,
    ) -> Self {
        let t = config.thresholds;
        let stages = vec![
            StageSlot {
                scorer: Box::new(TagMatcher::new(TagMatcherConfig {
                    min_similarity: config.tag_min_similarity,
                    exact_floor: t.tag,
                })),
                threshold: t.tag,
            },
            StageSlot {
                scorer: Box::new(SemanticMatcher::new(config.semantic_rules.clone())),
                threshold: t.semantic,
            },
        ];
        Self {
            catalog,
            memory,
            ledger,
            stages,
            vector: None,
            arbiter: None,
            config,
        }
    }

    pub fn with_embeddings(mut self, provider: Arc<dyn EmbeddingProvider>) -> Self {
        self.vector = Some(StageSlot {
            scorer: Box::new(VectorMatcher::new(
                provider,
                self.ledger.clone(),
                self.config.vector,
            )),
            threshold: self.config.thresholds.vector,
        });
        self
    }

    /// Primary provider first, fallbacks after.
    pub fn with_llm_providers(mut self, providers: Vec<Arc<dyn LlmProvider>>) -> Self {
        if !providers.is_empty() {
            self.arbiter = Some(LlmArbiter::new(
                providers,
                self.ledger.clone(),
                self.config.arbiter.clone(),
            ));
        }
        self
    }

    pub fn memory(&self) -> &Arc<DialogMemory> {
        &self.memory
    }

    pub fn ledger(&self) -> &CostLedger {
        &self.ledger
    }

    pub fn config(&self) -> &FunnelConfig {
        &self.config
    }

    /// Process one user turn. Turns of the same conversation are
    /// serialized; different conversations proceed in parallel.
    pub async fn process_turn(&self, request: &TurnRequest) -> Result<TurnOutcome, FunnelError> {
        let guard = self.memory.lock(&request.conversation_id).await;
        let started = Instant::now();
        let mut state = self
            .memory
            .load_or_create(&guard, &request.user_id, Utc::now())?;
        state.message_count += 1;
        self.absorb_incidental_facts(&mut state, request);

        let outcome = match state.status {
            ConversationStatus::Resolved => {
                tracing::debug!(conversation_id = %request.conversation_id, "Replaying resolved decision");
                TurnOutcome::from_state(DecisionStatus::Decided, &state, Vec::new())
            }
            ConversationStatus::Abandoned => {
                TurnOutcome::from_state(DecisionStatus::NeedsMoreInfo, &state, Vec::new())
            }
            ConversationStatus::AwaitingConfirmation => match classify_reply(&request.text) {
                Reply::Affirm => {
                    state.set_status(ConversationStatus::Resolved)?;
                    state.context.clear_problem();
                    TurnOutcome::from_state(DecisionStatus::Decided, &state, Vec::new())
                }
                Reply::Deny => {
                    Self::reject_pending(&mut state)?;
                    TurnOutcome::from_state(DecisionStatus::NeedsMoreInfo, &state, Vec::new())
                }
                Reply::Correct(text) => {
                    Self::reject_pending(&mut state)?;
                    self.run_turn(&guard, &mut state, request, &text, started).await?
                }
                Reply::Other => {
                    self.run_turn(&guard, &mut state, request, &request.text, started)
                        .await?
                }
            },
            ConversationStatus::Active => {
                self.run_turn(&guard, &mut state, request, &request.text, started)
                    .await?
            }
        };

        self.memory.persist(&guard, &mut state, Utc::now())?;
        tracing::info!(
            conversation_id = %request.conversation_id,
            status = %outcome.status,
            scenario_id = outcome.service.as_ref().map(|s| s.id),
            confidence = outcome.confidence,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Turn processed"
        );
        Ok(outcome)
    }

    fn reject_pending(state: &mut ConversationState) -> Result<(), FunnelError> {
        if let Some(id) = state.reject_current(Utc::now()) {
            tracing::info!(conversation_id = %state.conversation_id, scenario_id = id, "Candidate rejected by user");
        }
        state.set_status(ConversationStatus::Active)?;
        Ok(())
    }

    fn absorb_incidental_facts(&self, state: &mut ConversationState, request: &TurnRequest) {
        match request.user_name.as_deref().map(str::trim) {
            Some(name) if !name.is_empty() => state.user_name = Some(name.to_string()),
            _ if state.user_name.is_none() => state.user_name = extract_user_name(&request.text),
            _ => {}
        }
        let updated = state.address.merge_from(&extract_address(&request.text));
        if !updated.is_empty() {
            tracing::debug!(
                conversation_id = %state.conversation_id,
                fields = ?updated,
                "Address fragments merged"
            );
        }
    }

    /// Run the funnel on `text` for an active (or re-describing)
    /// conversation and apply the result to `state`.
    async fn run_turn(
        &self,
        guard: &crate::dialog::ConversationGuard,
        state: &mut ConversationState,
        request: &TurnRequest,
        text: &str,
        started: Instant,
    ) -> Result<TurnOutcome, FunnelError> {
        let scenarios = match self.catalog.scenarios().await {
            Ok(s) => s,
            Err(e) => {
                tracing::error!(conversation_id = %request.conversation_id, error = %e, "Catalog unavailable");
                self.memory.persist(guard, state, Utc::now())?;
                return Err(FunnelError::CatalogUnavailable(e.to_string()));
            }
        };
        let catalog = CatalogSnapshot::new(scenarios).excluding(&state.rejected_ids());

        let was_awaiting = state.status == ConversationStatus::AwaitingConfirmation;
        if was_awaiting {
            state.context.clear_problem();
        }
        state.context.push_problem(text);
        let turn = TurnText::new(
            &request.conversation_id,
            &request.user_id,
            &state.context.problem_text(),
        )
        .with_deadline(started + self.config.turn_timeout);

        let budget = self.current_budget();
        let run = self.run_funnel(&turn, &catalog, &budget).await?;
        state.record_ai_usage(run.llm_attempts, run.llm_cost);
        if run.deepest.is_some() {
            state.context.last_stage = run.deepest;
        }
        let trace = run.trace.states().to_vec();
        let mut shortlist = run.shortlist;
        shortlist.truncate(self.config.clarify_candidates);

        let Some(decision) = run.decision else {
            // A side remark while confirming keeps the pending question.
            let status = if was_awaiting && state.current_service.is_some() {
                DecisionStatus::AwaitingConfirmation
            } else {
                DecisionStatus::NeedsMoreInfo
            };
            return Ok(TurnOutcome::from_state(status, state, trace).with_candidates(shortlist));
        };

        let now = Utc::now();
        state.propose_service(ServiceContext::from_candidate(&decision, now), now);
        state.context.clear_problem();
        let status = if decision.confidence >= self.config.thresholds.confirm {
            state.set_status(ConversationStatus::Resolved)?;
            DecisionStatus::Decided
        } else {
            state.set_status(ConversationStatus::AwaitingConfirmation)?;
            DecisionStatus::AwaitingConfirmation
        };
        Ok(TurnOutcome::from_state(status, state, trace).with_candidates(shortlist))
    }

    fn current_budget(&self) -> BudgetView {
        match self.ledger.budget_view(&self.config.budget, Utc::now()) {
            Ok(view) => view,
            Err(e) => {
                // Without a spend reading the ceiling cannot be honoured.
                tracing::warn!(error = %e, "Budget read failed, treating LLM budget as exhausted");
                BudgetView {
                    daily_spent: f64::INFINITY,
                    monthly_spent: f64::INFINITY,
                    ceiling: crate::ledger::BudgetCeiling {
                        daily: Some(0.0),
                        monthly: Some(0.0),
                    },
                }
            }
        }
    }

    fn deadline_passed(turn: &TurnText) -> bool {
        turn.deadline.is_some_and(|d| d <= Instant::now())
    }

    /// Best shortlisted candidate if it clears the floor.
    fn fallback(&self, shortlist: &[MatchCandidate]) -> Option<MatchCandidate> {
        shortlist
            .first()
            .filter(|c| c.confidence >= self.config.thresholds.min_floor)
            .cloned()
    }

    /// Narrow the contenders (candidates at or above the floor) by the
    /// attributes named in the text. Without two contenders, or when
    /// nothing narrows, the merged list stands.
    fn shortlist(&self, turn: &TurnText, catalog: &CatalogSnapshot, merged: &[MatchCandidate]) -> Vec<MatchCandidate> {
        let floor = self.config.thresholds.min_floor;
        let contenders: Vec<MatchCandidate> = merged
            .iter()
            .filter(|c| c.confidence >= floor)
            .cloned()
            .collect();
        if contenders.len() < 2 {
            return merged.to_vec();
        }
        let narrowed = FilterProfile::detect(&turn.normalized).narrow(&contenders, catalog);
        if narrowed.len() == contenders.len() {
            return merged.to_vec();
        }
        tracing::debug!(
            conversation_id = %turn.conversation_id,
            before = contenders.len(),
            after = narrowed.len(),
            "Contenders narrowed by attributes"
        );
        narrowed
    }

    async fn run_funnel(
        &self,
        turn: &TurnText,
        catalog: &CatalogSnapshot,
        budget: &BudgetView,
    ) -> Result<FunnelRun, FunnelError> {
        let mut run = FunnelRun {
            trace: FunnelTrace::new(),
            decision: None,
            shortlist: Vec::new(),
            deepest: None,
            llm_attempts: 0,
            llm_cost: 0.0,
        };
        if turn.normalized.is_empty() || catalog.is_empty() {
            run.trace.advance(FunnelState::NeedsMoreInfo)?;
            return Ok(run);
        }

        let margin = self.config.thresholds.margin;
        let mut merged: Vec<MatchCandidate> = Vec::new();
        let slots = self.stages.iter().chain(self.vector.iter());
        for slot in slots {
            let stage = slot.scorer.stage();
            if Self::deadline_passed(turn) {
                tracing::warn!(conversation_id = %turn.conversation_id, %stage, "Turn deadline reached");
                run.shortlist = self.shortlist(turn, catalog, &merged);
                run.decision = self.fallback(&run.shortlist);
                run.trace.advance(terminal_for(&run.decision))?;
                return Ok(run);
            }
            run.deepest = Some(stage);
            let ranked = match slot.scorer.score(turn, catalog).await {
                Ok(ranked) => ranked,
                Err(e) => {
                    tracing::warn!(conversation_id = %turn.conversation_id, %stage, error = %e, "Stage failed, continuing");
                    Vec::new()
                }
            };
            merged = merge_ranked([merged.as_slice(), ranked.as_slice()]);
            let verdict = evaluate(&ranked, slot.threshold, margin);
            tracing::debug!(
                conversation_id = %turn.conversation_id,
                %stage,
                candidates = ranked.len(),
                confidence = verdict.top().map(|c| c.confidence),
                matched = verdict.is_match(),
                "Stage evaluated"
            );
            if let StageVerdict::Matched(top) = verdict {
                run.shortlist = merged;
                run.trace.advance(FunnelState::matched(stage))?;
                run.trace.advance(FunnelState::Decided)?;
                run.decision = Some(top);
                return Ok(run);
            }
            run.trace.advance(FunnelState::inconclusive(stage))?;
        }
        if self.vector.is_none() {
            run.trace.advance(FunnelState::VectorInconclusive)?;
        }
        run.shortlist = self.shortlist(turn, catalog, &merged);

        if Self::deadline_passed(turn) {
            run.decision = self.fallback(&run.shortlist);
            run.trace.advance(terminal_for(&run.decision))?;
            return Ok(run);
        }

        let Some(arbiter) = &self.arbiter else {
            run.trace.advance(FunnelState::LlmUnavailable)?;
            run.decision = self.fallback(&run.shortlist);
            run.trace.advance(terminal_for(&run.decision))?;
            return Ok(run);
        };

        run.deepest = Some(Stage::Llm);
        let report = arbiter.arbitrate(turn, &run.shortlist, catalog, budget).await;
        run.llm_attempts = report.attempts;
        run.llm_cost = report.cost;
        match report.outcome {
            ArbiterOutcome::Decided(choice) => {
                run.trace.advance(FunnelState::LlmDecided)?;
                run.trace.advance(FunnelState::Decided)?;
                run.decision = Some(choice);
            }
            ArbiterOutcome::NoneFit { reason } => {
                tracing::info!(conversation_id = %turn.conversation_id, reason = ?reason, "LLM found no fitting scenario");
                run.trace.advance(FunnelState::LlmDecided)?;
                run.trace.advance(FunnelState::NeedsMoreInfo)?;
            }
            ArbiterOutcome::Unavailable(reason) => {
                tracing::info!(conversation_id = %turn.conversation_id, %reason, "LLM stage unavailable, using best prior candidate");
                run.trace.advance(FunnelState::LlmUnavailable)?;
                run.decision = self.fallback(&run.shortlist);
                run.trace.advance(terminal_for(&run.decision))?;
            }
        }
        Ok(run)
    }
}

fn terminal_for(decision: &Option<MatchCandidate>) -> FunnelState {
    if decision.is_some() {
        FunnelState::Decided
    } else {
        FunnelState::NeedsMoreInfo
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::{ServiceScenario, StaticCatalog, Tag};

    fn scenarios() -> Vec<ServiceScenario> {
        vec![
            ServiceScenario::new(1, "Течь крана", "Сантехника").with_tag(Tag::new("течет кран", 1.0)),
            ServiceScenario::new(2, "Уборка подъезда", "Уборка").with_tag(Tag::new("грязно в подъезде", 0.7)),
        ]
    }

    fn coordinator_with(scenarios: Vec<ServiceScenario>, config: FunnelConfig) -> FunnelCoordinator {
        FunnelCoordinator::new(
            Arc::new(StaticCatalog::new(scenarios)),
            Arc::new(DialogMemory::in_memory()),
            CostLedger::in_memory(),
            config,
        )
    }

    fn coordinator() -> FunnelCoordinator {
        coordinator_with(scenarios(), FunnelConfig::default())
    }

    #[tokio::test]
    async fn test_exact_tag_resolves_immediately() {
        let c = coordinator();
        let out = c
            .process_turn(&TurnRequest::new("c1", "u1", "У меня течёт кран"))
            .await
            .unwrap();
        assert_eq!(out.status, DecisionStatus::Decided);
        assert_eq!(out.service.unwrap().id, 1);
        assert_eq!(out.conversation_status, ConversationStatus::Resolved);
        assert_eq!(
            out.trace,
            vec![FunnelState::New, FunnelState::TagMatched, FunnelState::Decided]
        );
    }

    #[tokio::test]
    async fn test_confirmation_cycle() {
        let c = coordinator();
        let out = c
            .process_turn(&TurnRequest::new("c1", "u1", "грязно в подъезде"))
            .await
            .unwrap();
        assert_eq!(out.status, DecisionStatus::AwaitingConfirmation);
        assert_eq!(out.conversation_status, ConversationStatus::AwaitingConfirmation);

        let out = c.process_turn(&TurnRequest::new("c1", "u1", "нет")).await.unwrap();
        assert_eq!(out.status, DecisionStatus::NeedsMoreInfo);
        let state = c.memory().get("c1").unwrap().unwrap();
        assert_eq!(state.status, ConversationStatus::Active);
        assert!(state.rejected_ids().contains(&2));

        // The rejected scenario is no longer offered.
        let out = c
            .process_turn(&TurnRequest::new("c1", "u1", "грязно в подъезде"))
            .await
            .unwrap();
        assert_eq!(out.status, DecisionStatus::NeedsMoreInfo);
    }

    #[tokio::test]
    async fn test_affirmation_resolves_and_replays() {
        let c = coordinator();
        c.process_turn(&TurnRequest::new("c1", "u1", "грязно в подъезде"))
            .await
            .unwrap();
        let out = c.process_turn(&TurnRequest::new("c1", "u1", "да")).await.unwrap();
        assert_eq!(out.status, DecisionStatus::Decided);
        assert_eq!(out.conversation_status, ConversationStatus::Resolved);

        let replay = c
            .process_turn(&TurnRequest::new("c1", "u1", "что-то ещё"))
            .await
            .unwrap();
        assert_eq!(replay.status, DecisionStatus::Decided);
        assert_eq!(replay.service.unwrap().id, 2);
        assert!(replay.trace.is_empty());
        assert_eq!(c.memory().get("c1").unwrap().unwrap().message_count, 3);
    }

    #[tokio::test]
    async fn test_user_name_and_problem_accumulation() {
        let c = coordinator();
        let out = c
            .process_turn(&TurnRequest::new("c1", "u1", "Здравствуйте, меня зовут Елена"))
            .await
            .unwrap();
        assert_eq!(out.status, DecisionStatus::NeedsMoreInfo);
        assert_eq!(out.user_name.as_deref(), Some("Елена"));

        let state = c.memory().get("c1").unwrap().unwrap();
        assert_eq!(state.context.pending_problem.len(), 1);

        let out = c
            .process_turn(&TurnRequest::new("c1", "u1", "течет кран").with_user_name("Елена Петровна"))
            .await
            .unwrap();
        assert_eq!(out.status, DecisionStatus::Decided);
        assert_eq!(out.user_name.as_deref(), Some("Елена Петровна"));
        let state = c.memory().get("c1").unwrap().unwrap();
        assert!(state.context.pending_problem.is_empty());
    }

    #[tokio::test]
    async fn test_complaint_starting_with_net_is_scored_not_rejected() {
        let mut s = scenarios();
        s.push(
            ServiceScenario::new(3, "Освещение подъезда", "Электрика")
                .with_tag(Tag::new("нет света", 1.0)),
        );
        let c = coordinator_with(s, FunnelConfig::default());
        let out = c
            .process_turn(&TurnRequest::new("c1", "u1", "грязно в подъезде"))
            .await
            .unwrap();
        assert_eq!(out.status, DecisionStatus::AwaitingConfirmation);

        let out = c
            .process_turn(&TurnRequest::new("c1", "u1", "нет света в подъезде"))
            .await
            .unwrap();
        assert_eq!(out.status, DecisionStatus::Decided);
        assert_eq!(out.service.unwrap().id, 3);
        let state = c.memory().get("c1").unwrap().unwrap();
        assert!(state.rejected_ids().is_empty());
    }

    #[tokio::test]
    async fn test_denial_with_description_rejects_and_rescores() {
        let c = coordinator();
        c.process_turn(&TurnRequest::new("c1", "u1", "грязно в подъезде"))
            .await
            .unwrap();
        let out = c
            .process_turn(&TurnRequest::new("c1", "u1", "нет, течет кран"))
            .await
            .unwrap();
        assert_eq!(out.status, DecisionStatus::Decided);
        assert_eq!(out.service.unwrap().id, 1);
        let state = c.memory().get("c1").unwrap().unwrap();
        assert!(state.rejected_ids().contains(&2));
    }

    fn leak_scenarios() -> Vec<ServiceScenario> {
        vec![
            ServiceScenario::new(10, "Протечка в квартире", "Сантехника")
                .with_localization("Индивидуальное")
                .with_tag(Tag::new("протечка", 0.5)),
            ServiceScenario::new(11, "Протечка в подъезде", "Сантехника")
                .with_localization("Общедомовое")
                .with_tag(Tag::new("протечка", 0.5)),
        ]
    }

    #[tokio::test]
    async fn test_location_breaks_a_tie_and_candidates_are_offered() {
        let config = FunnelConfig {
            semantic_rules: Vec::new(),
            ..FunnelConfig::default()
        };
        let c = coordinator_with(leak_scenarios(), config.clone());
        let out = c
            .process_turn(&TurnRequest::new("c1", "u1", "протечка в подъезде"))
            .await
            .unwrap();
        assert_eq!(out.status, DecisionStatus::AwaitingConfirmation);
        assert_eq!(out.service.unwrap().id, 11);
        assert_eq!(out.candidates.iter().map(|c| c.scenario.id).collect::<Vec<_>>(), vec![11]);

        // Nothing to narrow by: both stay on offer.
        let c = coordinator_with(leak_scenarios(), config);
        let out = c
            .process_turn(&TurnRequest::new("c2", "u1", "протечка"))
            .await
            .unwrap();
        assert_eq!(out.candidates.len(), 2);
    }
}
