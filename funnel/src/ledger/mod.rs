//! Cost ledger: one immutable row per paid external call.
//!
//! Every LLM completion and embedding request (successful or not) is
//! written here with its token usage, latency and computed cost. The
//! ledger also answers the aggregate questions the rest of the system
//! asks: spend for a period ([`CostLedger::summary`]) and remaining
//! budget ([`CostLedger::budget_view`]), which the arbiter receives as a
//! plain value instead of reading global state.

pub mod pricing;
pub mod store;

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Datelike, NaiveTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

pub use pricing::{PriceEntry, PricingTable};
pub use store::{CostQuery, CostStore, InMemoryCostStore};

/// Stage label for embedding calls made by the vector matcher.
pub const STAGE_VECTOR_EMBEDDING: &str = "vector_embedding";
/// Stage label for arbitration completions.
pub const STAGE_LLM_ARBITER: &str = "llm_arbiter";

#[derive(Debug, Error)]
pub enum LedgerError {
    #[error("Cost store failure: {0}")]
    Storage(String),

    #[error("Cost record {0} already exists")]
    Duplicate(Uuid),

    #[error("Cost record serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// A persisted cost row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CostRecord {
    pub id: Uuid,
    pub conversation_id: Option<String>,
    pub user_id: String,
    pub provider: String,
    pub model: String,
    /// Which part of the system paid for the call (`llm_arbiter`,
    /// `vector_embedding`, ...).
    pub stage: String,
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub total_tokens: u64,
    pub cost: f64,
    pub requested_at: DateTime<Utc>,
    pub latency_ms: u64,
    pub success: bool,
    pub error: Option<String>,
}

/// Caller-side description of a finished call; [`CostLedger::record`]
/// turns it into a [`CostRecord`].
#[derive(Debug, Clone)]
pub struct CallRecord {
    pub conversation_id: Option<String>,
    pub user_id: String,
    pub provider: String,
    pub model: String,
    pub stage: String,
    pub input_tokens: u64,
    pub output_tokens: u64,
    /// Overrides `input + output` when the provider reports its own total.
    pub total_tokens: Option<u64>,
    /// Overrides the pricing table.
    pub cost: Option<f64>,
    pub requested_at: DateTime<Utc>,
    pub latency: Duration,
    pub error: Option<String>,
}

impl CallRecord {
    pub fn new(user_id: &str, provider: &str, model: &str, stage: &str) -> Self {
        Self {
            conversation_id: None,
            user_id: user_id.to_string(),
            provider: provider.to_string(),
            model: model.to_string(),
            stage: stage.to_string(),
            input_tokens: 0,
            output_tokens: 0,
            total_tokens: None,
            cost: None,
            requested_at: Utc::now(),
            latency: Duration::ZERO,
            error: None,
        }
    }

    pub fn conversation(mut self, conversation_id: Option<&str>) -> Self {
        self.conversation_id = conversation_id.map(str::to_string);
        self
    }

    pub fn tokens(mut self, input: u64, output: u64) -> Self {
        self.input_tokens = input;
        self.output_tokens = output;
        self
    }

    pub fn total_tokens(mut self, total: u64) -> Self {
        self.total_tokens = Some(total);
        self
    }

    pub fn cost(mut self, cost: f64) -> Self {
        self.cost = Some(cost);
        self
    }

    pub fn started_at(mut self, at: DateTime<Utc>) -> Self {
        self.requested_at = at;
        self
    }

    pub fn latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    pub fn failed(mut self, error: impl std::fmt::Display) -> Self {
        self.error = Some(error.to_string());
        self
    }
}

/// Aggregates over a set of cost rows.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CostSummary {
    pub requests: u64,
    pub successes: u64,
    pub failures: u64,
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub total_tokens: u64,
    pub total_cost: f64,
    pub avg_latency_ms: f64,
    pub cost_by_provider: BTreeMap<String, f64>,
    pub cost_by_stage: BTreeMap<String, f64>,
}

impl CostSummary {
    pub fn from_records<'a>(records: impl IntoIterator<Item = &'a CostRecord>) -> Self {
        let mut summary = Self::default();
        let mut latency_total: u64 = 0;
        for r in records {
            summary.requests += 1;
            if r.success {
                summary.successes += 1;
            } else {
                summary.failures += 1;
            }
            summary.input_tokens = summary.input_tokens.saturating_add(r.input_tokens);
            summary.output_tokens = summary.output_tokens.saturating_add(r.output_tokens);
            summary.total_tokens = summary.total_tokens.saturating_add(r.total_tokens);
            summary.total_cost += r.cost;
            latency_total = latency_total.saturating_add(r.latency_ms);
            *summary.cost_by_provider.entry(r.provider.clone()).or_default() += r.cost;
            *summary.cost_by_stage.entry(r.stage.clone()).or_default() += r.cost;
        }
        if summary.requests > 0 {
            summary.avg_latency_ms = latency_total as f64 / summary.requests as f64;
        }
        summary
    }
}

/// Spend ceilings for paid calls. `None` means unlimited.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct BudgetCeiling {
    pub daily: Option<f64>,
    pub monthly: Option<f64>,
}

/// Snapshot of spend against the ceilings at a point in time.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct BudgetView {
    pub daily_spent: f64,
    pub monthly_spent: f64,
    pub ceiling: BudgetCeiling,
}

impl BudgetView {
    pub fn unlimited() -> Self {
        Self::default()
    }

    pub fn is_exhausted(&self) -> bool {
        let daily = self.ceiling.daily.is_some_and(|limit| self.daily_spent >= limit);
        let monthly = self
            .ceiling
            .monthly
            .is_some_and(|limit| self.monthly_spent >= limit);
        daily || monthly
    }

    /// Smallest remaining allowance, if any ceiling is set.
    pub fn remaining(&self) -> Option<f64> {
        let daily = self.ceiling.daily.map(|l| (l - self.daily_spent).max(0.0));
        let monthly = self.ceiling.monthly.map(|l| (l - self.monthly_spent).max(0.0));
        match (daily, monthly) {
            (Some(d), Some(m)) => Some(d.min(m)),
            (d, m) => d.or(m),
        }
    }
}

/// Ledger facade over a [`CostStore`] and a [`PricingTable`].
#[derive(Clone)]
pub struct CostLedger {
    store: Arc<dyn CostStore>,
    pricing: PricingTable,
}

impl std::fmt::Debug for CostLedger {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CostLedger")
            .field("pricing", &self.pricing)
            .finish_non_exhaustive()
    }
}

impl CostLedger {
    pub fn new(store: Arc<dyn CostStore>, pricing: PricingTable) -> Self {
        Self { store, pricing }
    }

    /// In-memory ledger with default pricing.
    pub fn in_memory() -> Self {
        Self::new(Arc::new(InMemoryCostStore::new()), PricingTable::default())
    }

    pub fn pricing(&self) -> &PricingTable {
        &self.pricing
    }

    /// Append one row for a finished call. Failed calls cost nothing
    /// unless the caller supplies a cost.
    pub fn record(&self, call: CallRecord) -> Result<CostRecord, LedgerError> {
        let success = call.error.is_none();
        let total_tokens = call
            .total_tokens
            .unwrap_or(call.input_tokens.saturating_add(call.output_tokens));
        let cost = match call.cost {
            Some(cost) => cost,
            None if success => {
                self.pricing
                    .cost(&call.provider, &call.model, call.input_tokens, call.output_tokens)
            }
            None => 0.0,
        };
        let record = CostRecord {
            id: Uuid::new_v4(),
            conversation_id: call.conversation_id,
            user_id: call.user_id,
            provider: call.provider,
            model: call.model,
            stage: call.stage,
            input_tokens: call.input_tokens,
            output_tokens: call.output_tokens,
            total_tokens,
            cost,
            requested_at: call.requested_at,
            latency_ms: call.latency.as_millis() as u64,
            success,
            error: call.error,
        };
        self.store.append(&record)?;
        tracing::debug!(
            provider = %record.provider,
            model = %record.model,
            stage = %record.stage,
            tokens = record.total_tokens,
            cost = record.cost,
            success = record.success,
            "Cost record appended"
        );
        Ok(record)
    }

    pub fn records(&self, query: &CostQuery) -> Result<Vec<CostRecord>, LedgerError> {
        self.store.query(query)
    }

    pub fn summary(&self, query: &CostQuery) -> Result<CostSummary, LedgerError> {
        let records = self.store.query(query)?;
        Ok(CostSummary::from_records(&records))
    }

    /// Spend of the UTC day and UTC month containing `now`.
    pub fn budget_view(
        &self,
        ceiling: &BudgetCeiling,
        now: DateTime<Utc>,
    ) -> Result<BudgetView, LedgerError> {
        let day_start = Utc.from_utc_datetime(&now.date_naive().and_time(NaiveTime::default()));
        let month_start = now
            .date_naive()
            .with_day(1)
            .map(|d| Utc.from_utc_datetime(&d.and_time(NaiveTime::default())))
            .unwrap_or(day_start);

        let month = self.store.query(&CostQuery {
            from: Some(month_start),
            ..CostQuery::default()
        })?;
        let monthly_spent: f64 = month.iter().map(|r| r.cost).sum();
        let daily_spent: f64 = month
            .iter()
            .filter(|r| r.requested_at >= day_start)
            .map(|r| r.cost)
            .sum();

        Ok(BudgetView {
            daily_spent,
            monthly_spent,
            ceiling: *ceiling,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration as ChronoDuration;

    fn ledger() -> CostLedger {
        CostLedger::new(
            Arc::new(InMemoryCostStore::new()),
            PricingTable::new(vec![PriceEntry::new("yandex", None, 1.0, 1.0)]),
        )
    }

    #[test]
    fn test_total_tokens_defaults_to_sum() {
        let l = ledger();
        let rec = l
            .record(CallRecord::new("u1", "yandex", "lite", STAGE_LLM_ARBITER).tokens(120, 30))
            .unwrap();
        assert_eq!(rec.total_tokens, 150);
        assert!((rec.cost - 0.15).abs() < 1e-9);
        assert!(rec.success);
    }

    #[test]
    fn test_huge_token_counts_saturate() {
        let l = ledger();
        let rec = l
            .record(CallRecord::new("u1", "yandex", "lite", STAGE_LLM_ARBITER).tokens(u64::MAX, 7))
            .unwrap();
        assert_eq!(rec.total_tokens, u64::MAX);
        l.record(CallRecord::new("u1", "yandex", "lite", STAGE_LLM_ARBITER).tokens(5, 5))
            .unwrap();
        let summary = l.summary(&CostQuery::all()).unwrap();
        assert_eq!(summary.total_tokens, u64::MAX);
        assert_eq!(summary.input_tokens, u64::MAX);
    }

    #[test]
    fn test_total_tokens_override_is_kept() {
        let l = ledger();
        let rec = l
            .record(
                CallRecord::new("u1", "yandex", "lite", STAGE_LLM_ARBITER)
                    .tokens(10, 10)
                    .total_tokens(25),
            )
            .unwrap();
        assert_eq!(rec.total_tokens, 25);
    }

    #[test]
    fn test_failed_call_is_zero_cost() {
        let l = ledger();
        let rec = l
            .record(
                CallRecord::new("u1", "yandex", "lite", STAGE_LLM_ARBITER)
                    .tokens(100, 0)
                    .failed("timeout"),
            )
            .unwrap();
        assert!(!rec.success);
        assert_eq!(rec.cost, 0.0);
        assert_eq!(rec.error.as_deref(), Some("timeout"));
    }

    #[test]
    fn test_summary_filters_and_aggregates() {
        let l = ledger();
        l.record(
            CallRecord::new("u1", "yandex", "lite", STAGE_LLM_ARBITER)
                .conversation(Some("c1"))
                .tokens(1000, 0)
                .latency(Duration::from_millis(100)),
        )
        .unwrap();
        l.record(
            CallRecord::new("u1", "yandex", "lite", STAGE_LLM_ARBITER)
                .conversation(Some("c1"))
                .latency(Duration::from_millis(300))
                .failed("http 500"),
        )
        .unwrap();
        l.record(CallRecord::new("u2", "yandex", "lite", STAGE_VECTOR_EMBEDDING).tokens(1000, 0))
            .unwrap();

        let s = l.summary(&CostQuery::all().for_conversation("c1")).unwrap();
        assert_eq!(s.requests, 2);
        assert_eq!(s.successes, 1);
        assert_eq!(s.failures, 1);
        assert!((s.total_cost - 1.0).abs() < 1e-9);
        assert!((s.avg_latency_ms - 200.0).abs() < 1e-9);

        let by_stage = l.summary(&CostQuery::all()).unwrap().cost_by_stage;
        assert!((by_stage[STAGE_VECTOR_EMBEDDING] - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_budget_view_splits_day_and_month() {
        let l = ledger();
        let now = Utc.with_ymd_and_hms(2026, 3, 15, 12, 0, 0).unwrap();
        l.record(
            CallRecord::new("u", "yandex", "lite", STAGE_LLM_ARBITER)
                .tokens(2000, 0)
                .started_at(now - ChronoDuration::days(3)),
        )
        .unwrap();
        l.record(
            CallRecord::new("u", "yandex", "lite", STAGE_LLM_ARBITER)
                .tokens(1000, 0)
                .started_at(now - ChronoDuration::hours(1)),
        )
        .unwrap();
        l.record(
            CallRecord::new("u", "yandex", "lite", STAGE_LLM_ARBITER)
                .tokens(5000, 0)
                .started_at(now - ChronoDuration::days(30)),
        )
        .unwrap();

        let ceiling = BudgetCeiling {
            daily: Some(1.0),
            monthly: Some(10.0),
        };
        let view = l.budget_view(&ceiling, now).unwrap();
        assert!((view.daily_spent - 1.0).abs() < 1e-9);
        assert!((view.monthly_spent - 3.0).abs() < 1e-9);
        assert!(view.is_exhausted());
        assert_eq!(view.remaining(), Some(0.0));
    }

    #[test]
    fn test_unlimited_budget_never_exhausted() {
        let view = BudgetView {
            daily_spent: 1e9,
            monthly_spent: 1e9,
            ceiling: BudgetCeiling::default(),
        };
        assert!(!view.is_exhausted());
        assert_eq!(view.remaining(), None);
    }
}
