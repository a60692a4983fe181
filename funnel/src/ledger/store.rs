//! Append-only cost record persistence.

use std::sync::RwLock;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{CostRecord, LedgerError};

/// Filter for reading cost records back. Empty fields match everything;
/// the time range is `[from, to)`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CostQuery {
    pub user_id: Option<String>,
    pub conversation_id: Option<String>,
    pub provider: Option<String>,
    pub stage: Option<String>,
    pub from: Option<DateTime<Utc>>,
    pub to: Option<DateTime<Utc>>,
}

impl CostQuery {
    pub fn all() -> Self {
        Self::default()
    }

    pub fn between(from: DateTime<Utc>, to: DateTime<Utc>) -> Self {
        Self {
            from: Some(from),
            to: Some(to),
            ..Self::default()
        }
    }

    pub fn for_user(mut self, user_id: &str) -> Self {
        self.user_id = Some(user_id.to_string());
        self
    }

    pub fn for_conversation(mut self, conversation_id: &str) -> Self {
        self.conversation_id = Some(conversation_id.to_string());
        self
    }

    pub fn for_provider(mut self, provider: &str) -> Self {
        self.provider = Some(provider.to_string());
        self
    }

    pub fn for_stage(mut self, stage: &str) -> Self {
        self.stage = Some(stage.to_string());
        self
    }

    pub fn matches(&self, record: &CostRecord) -> bool {
        if let Some(user) = &self.user_id {
            if &record.user_id != user {
                return false;
            }
        }
        if let Some(conv) = &self.conversation_id {
            if record.conversation_id.as_ref() != Some(conv) {
                return false;
            }
        }
        if let Some(provider) = &self.provider {
            if &record.provider != provider {
                return false;
            }
        }
        if let Some(stage) = &self.stage {
            if &record.stage != stage {
                return false;
            }
        }
        if let Some(from) = self.from {
            if record.requested_at < from {
                return false;
            }
        }
        if let Some(to) = self.to {
            if record.requested_at >= to {
                return false;
            }
        }
        true
    }
}

/// Storage for cost rows. Implementations never update or delete a row
/// once appended.
pub trait CostStore: Send + Sync {
    fn append(&self, record: &CostRecord) -> Result<(), LedgerError>;

    /// Matching records in append order.
    fn query(&self, query: &CostQuery) -> Result<Vec<CostRecord>, LedgerError>;
}

/// Process-local store, used by tests and the single-shot CLI.
#[derive(Debug, Default)]
pub struct InMemoryCostStore {
    records: RwLock<Vec<CostRecord>>,
}

impl InMemoryCostStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.records.read().map(|r| r.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl CostStore for InMemoryCostStore {
    fn append(&self, record: &CostRecord) -> Result<(), LedgerError> {
        let mut records = self
            .records
            .write()
            .map_err(|_| LedgerError::Storage("cost store lock poisoned".into()))?;
        if records.iter().any(|r| r.id == record.id) {
            return Err(LedgerError::Duplicate(record.id));
        }
        records.push(record.clone());
        Ok(())
    }

    fn query(&self, query: &CostQuery) -> Result<Vec<CostRecord>, LedgerError> {
        let records = self
            .records
            .read()
            .map_err(|_| LedgerError::Storage("cost store lock poisoned".into()))?;
        Ok(records.iter().filter(|r| query.matches(r)).cloned().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ledger::{CallRecord, CostLedger, PricingTable, STAGE_LLM_ARBITER, STAGE_VECTOR_EMBEDDING};
    use chrono::{Duration, TimeZone};
    use std::sync::Arc;

    #[test]
    fn test_query_filters_and_half_open_range() {
        let store = Arc::new(InMemoryCostStore::new());
        let ledger = CostLedger::new(store.clone(), PricingTable::empty());
        let t = Utc.with_ymd_and_hms(2026, 3, 10, 12, 0, 0).unwrap();
        ledger
            .record(
                CallRecord::new("u1", "yandex", "yandexgpt-lite", STAGE_LLM_ARBITER)
                    .conversation(Some("c1"))
                    .started_at(t),
            )
            .unwrap();
        ledger
            .record(
                CallRecord::new("u2", "openai", "text-embedding-3-small", STAGE_VECTOR_EMBEDDING)
                    .started_at(t + Duration::hours(1)),
            )
            .unwrap();
        assert_eq!(store.len(), 2);

        let at_t = CostQuery::between(t, t + Duration::hours(1));
        assert_eq!(store.query(&at_t).unwrap().len(), 1);
        assert_eq!(store.query(&CostQuery::all().for_conversation("c1")).unwrap().len(), 1);
        assert_eq!(store.query(&CostQuery::all().for_provider("openai")).unwrap()[0].user_id, "u2");
        assert!(store
            .query(&CostQuery::all().for_user("u1").for_stage(STAGE_VECTOR_EMBEDDING))
            .unwrap()
            .is_empty());
    }

    #[test]
    fn test_duplicate_id_is_rejected() {
        let store = InMemoryCostStore::new();
        let ledger = CostLedger::in_memory();
        let record = ledger
            .record(CallRecord::new("u1", "yandex", "yandexgpt-lite", STAGE_LLM_ARBITER))
            .unwrap();
        store.append(&record).unwrap();
        assert!(matches!(store.append(&record), Err(LedgerError::Duplicate(_))));
        assert_eq!(store.len(), 1);
    }
}
