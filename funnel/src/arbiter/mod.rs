//! LLM arbitration: the last and most expensive funnel stage.
//!
//! # Design
//!
//! ```text
//! budget exhausted? ── yes ──> Unavailable(BudgetExceeded), no calls
//!        │ no
//!        v
//! for provider in chain (open circuits skipped):
//!   ├─ Ok + valid scenario  -> Decided
//!   ├─ Ok + NONE            -> NoneFit
//!   ├─ Ok + unusable answer -> next provider
//!   └─ Err / timeout        -> next provider
//! all attempts failed ──────> Unavailable(AllProvidersFailed)
//! ```
//!
//! Every attempt writes exactly one cost row. Failures never escape as
//! errors; the coordinator only sees an [`ArbitrationReport`].

pub mod chain;
pub mod prompt;

use std::time::{Duration, Instant as StdInstant};

use chrono::Utc;
use serde::{Deserialize, Serialize};

use crate::catalog::{CatalogSnapshot, ScenarioRef};
use crate::ledger::{BudgetView, CallRecord, CostLedger, STAGE_LLM_ARBITER};
use crate::matchers::{MatchCandidate, Stage, TurnText};
use crate::providers::{Completion, CompletionOptions, LlmProvider, ProviderError};

pub use chain::{CircuitBreaker, CircuitState, ProviderChain};
pub use prompt::{build_prompt, parse_response, LlmVerdict};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ArbiterConfig {
    /// Upper bound for a single provider call.
    #[serde(with = "crate::config::duration_ms")]
    pub call_timeout: Duration,
    /// Candidates sent to the model.
    pub max_candidates: usize,
    /// Catalog entries offered when no stage produced candidates.
    pub catalog_context_limit: usize,
    /// Used when the model names a scenario without a confidence.
    pub default_confidence: f64,
    pub failure_threshold: u32,
    #[serde(with = "crate::config::duration_ms")]
    pub circuit_cooldown: Duration,
    pub completion: CompletionOptions,
}

impl Default for ArbiterConfig {
    fn default() -> Self {
        Self {
            call_timeout: Duration::from_secs(10),
            max_candidates: 5,
            catalog_context_limit: 20,
            default_confidence: 0.5,
            failure_threshold: 3,
            circuit_cooldown: Duration::from_secs(60),
            completion: CompletionOptions {
                temperature: 0.3,
                max_tokens: 500,
                system_prompt: Some(prompt::SYSTEM_PROMPT.to_string()),
            },
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UnavailableReason {
    BudgetExceeded,
    NoProviders,
    AllProvidersFailed,
    DeadlineExceeded,
}

impl std::fmt::Display for UnavailableReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::BudgetExceeded => write!(f, "budget_exceeded"),
            Self::NoProviders => write!(f, "no_providers"),
            Self::AllProvidersFailed => write!(f, "all_providers_failed"),
            Self::DeadlineExceeded => write!(f, "deadline_exceeded"),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum ArbiterOutcome {
    Decided(MatchCandidate),
    /// The model said none of the options fit.
    NoneFit { reason: Option<String> },
    Unavailable(UnavailableReason),
}

/// Outcome plus what it cost.
#[derive(Debug, Clone, PartialEq)]
pub struct ArbitrationReport {
    pub outcome: ArbiterOutcome,
    /// Provider calls made (each one has a cost row).
    pub attempts: u64,
    pub cost: f64,
}

impl ArbitrationReport {
    fn without_calls(reason: UnavailableReason) -> Self {
        Self {
            outcome: ArbiterOutcome::Unavailable(reason),
            attempts: 0,
            cost: 0.0,
        }
    }
}

pub struct LlmArbiter {
    chain: ProviderChain,
    ledger: CostLedger,
    config: ArbiterConfig,
}

impl LlmArbiter {
    pub fn new(providers: Vec<std::sync::Arc<dyn LlmProvider>>, ledger: CostLedger, config: ArbiterConfig) -> Self {
        let breaker = CircuitBreaker::new(config.failure_threshold, config.circuit_cooldown);
        Self {
            chain: ProviderChain::new(providers, breaker),
            ledger,
            config,
        }
    }

    pub fn chain(&self) -> &ProviderChain {
        &self.chain
    }

    pub fn config(&self) -> &ArbiterConfig {
        &self.config
    }

    /// Ask the chain to pick one scenario for `turn`.
    ///
    /// `budget` is the caller's read of current spend; when exhausted no
    /// provider is contacted.
    pub async fn arbitrate(
        &self,
        turn: &TurnText,
        candidates: &[MatchCandidate],
        catalog: &CatalogSnapshot,
        budget: &BudgetView,
    ) -> ArbitrationReport {
        if budget.is_exhausted() {
            tracing::info!(
                conversation_id = %turn.conversation_id,
                daily_spent = budget.daily_spent,
                monthly_spent = budget.monthly_spent,
                "LLM budget exhausted, skipping arbitration"
            );
            return ArbitrationReport::without_calls(UnavailableReason::BudgetExceeded);
        }
        if !self.chain.any_available() {
            return ArbitrationReport::without_calls(UnavailableReason::NoProviders);
        }

        let prompt = build_prompt(
            &turn.raw,
            candidates,
            catalog,
            self.config.max_candidates,
            self.config.catalog_context_limit,
        );

        let mut report = ArbitrationReport::without_calls(UnavailableReason::AllProvidersFailed);
        for provider in self.chain.providers() {
            if turn_deadline_passed(turn) {
                report.outcome = ArbiterOutcome::Unavailable(UnavailableReason::DeadlineExceeded);
                break;
            }
            if !self.chain.try_acquire(provider.name()) {
                continue;
            }
            let result = self.attempt(turn, provider.as_ref(), &prompt).await;
            report.attempts += 1;
            let completion = match result {
                Ok((completion, cost)) => {
                    report.cost += cost;
                    self.chain.record_success(provider.name());
                    completion
                }
                Err(e) => {
                    // Cut short by the turn deadline: not the provider's fault.
                    let cut_short = matches!(e, ProviderError::Timeout(_)) && turn_deadline_passed(turn);
                    if cut_short {
                        self.chain.release(provider.name());
                    } else {
                        self.chain.record_failure(provider.name());
                    }
                    tracing::warn!(
                        conversation_id = %turn.conversation_id,
                        provider = provider.name(),
                        retriable = e.is_retriable(),
                        cut_short,
                        error = %e,
                        "Arbitration attempt failed"
                    );
                    continue;
                }
            };

            match self.interpret(&completion.text, catalog) {
                Some(outcome) => {
                    tracing::info!(
                        conversation_id = %turn.conversation_id,
                        provider = provider.name(),
                        outcome = ?outcome,
                        "Arbitration finished"
                    );
                    report.outcome = outcome;
                    return report;
                }
                None => {
                    tracing::warn!(
                        conversation_id = %turn.conversation_id,
                        provider = provider.name(),
                        "Arbitration answer unusable, trying next provider"
                    );
                }
            }
        }
        if report.attempts == 0
            && report.outcome == ArbiterOutcome::Unavailable(UnavailableReason::AllProvidersFailed)
        {
            report.outcome = ArbiterOutcome::Unavailable(UnavailableReason::NoProviders);
        }
        report
    }

    /// One provider call, bounded by the per-call timeout and the turn
    /// deadline. Always writes a cost row.
    async fn attempt(
        &self,
        turn: &TurnText,
        provider: &dyn LlmProvider,
        prompt: &str,
    ) -> Result<(Completion, f64), ProviderError> {
        let call = CallRecord::new(&turn.user_id, provider.name(), provider.model(), STAGE_LLM_ARBITER)
            .conversation(Some(turn.conversation_id.as_str()))
            .started_at(Utc::now());
        let started = StdInstant::now();
        let deadline = turn.call_deadline(self.config.call_timeout);

        let result = match tokio::time::timeout_at(
            deadline,
            provider.complete(prompt, &self.config.completion),
        )
        .await
        {
            Ok(result) => result,
            Err(_) => Err(ProviderError::Timeout(started.elapsed())),
        };

        let call = call.latency(started.elapsed());
        let call = match &result {
            Ok(c) => call.tokens(c.input_tokens, c.output_tokens),
            Err(e) => call.failed(e),
        };
        let cost = match self.ledger.record(call) {
            Ok(record) => record.cost,
            Err(e) => {
                tracing::error!(provider = provider.name(), error = %e, "Failed to write cost record");
                0.0
            }
        };
        result.map(|c| (c, cost))
    }

    fn interpret(&self, text: &str, catalog: &CatalogSnapshot) -> Option<ArbiterOutcome> {
        match parse_response(text) {
            Ok(LlmVerdict::NoneFit { reason }) => Some(ArbiterOutcome::NoneFit { reason }),
            Ok(LlmVerdict::Scenario {
                key,
                confidence,
                reason,
            }) => {
                let scenario = catalog.resolve(&key)?;
                let evidence = reason.into_iter().collect();
                Some(ArbiterOutcome::Decided(MatchCandidate::new(
                    ScenarioRef::from(scenario),
                    confidence.unwrap_or(self.config.default_confidence),
                    Stage::Llm,
                    evidence,
                )))
            }
            Err(e) => {
                tracing::debug!(error = %e, "Could not parse arbitration answer");
                None
            }
        }
    }
}

fn turn_deadline_passed(turn: &TurnText) -> bool {
    turn.deadline.is_some_and(|d| d <= tokio::time::Instant::now())
}
