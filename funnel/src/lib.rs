//! Accuracy funnel for municipal-service requests.
//!
//! Classifies a resident's free-text complaint into one catalog scenario
//! through an ordered chain of increasingly expensive stages:
//!
//! ```text
//! text -> tag match -> semantic match -> vector match -> LLM arbiter
//!            |              |                 |               |
//!            +--------------+-----------------+---------------+--> decision
//! ```
//!
//! Each stage runs only when the previous one was inconclusive. The
//! conversation state (current service, address, history) lives in
//! [`dialog::DialogMemory`]; every paid call is written to the
//! [`ledger::CostLedger`].
//!
//! # Features
//!
//! - `heavy-state`: RocksDB-backed [`store::RocksStore`] for conversations
//!   and cost records.

#![allow(clippy::uninlined_format_args)]

pub mod address;
pub mod arbiter;
pub mod catalog;
pub mod config;
pub mod coordinator;
pub mod dialog;
pub mod error;
pub mod ledger;
pub mod matchers;
pub mod providers;
#[cfg(feature = "heavy-state")]
pub mod store;
pub mod text;

pub use address::{extract_address, extract_user_name, AddressFragments};
pub use arbiter::{ArbiterConfig, ArbiterOutcome, LlmArbiter, UnavailableReason};
pub use catalog::{
    CatalogError, CatalogProvider, CatalogSnapshot, ScenarioId, ScenarioRef, ServiceScenario,
    StaticCatalog, Tag, Urgency,
};
pub use config::{ConfigError, FunnelConfig, Thresholds};
pub use coordinator::{
    DecisionStatus, FunnelCoordinator, FunnelState, FunnelTrace, TurnOutcome, TurnRequest,
};
pub use dialog::{
    ConversationState, ConversationStatus, ConversationStore, DialogMemory,
    InMemoryConversationStore, StoreError,
};
pub use error::FunnelError;
pub use ledger::{
    BudgetCeiling, CallRecord, CostLedger, CostQuery, CostRecord, CostStore, CostSummary,
    InMemoryCostStore, LedgerError, PricingTable,
};
pub use matchers::{FilterProfile, MatchCandidate, Stage};
pub use providers::{
    Completion, CompletionOptions, Embedding, EmbeddingProvider, LlmProvider, ProviderError,
};
