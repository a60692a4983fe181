use std::path::PathBuf;
use std::sync::{Arc, RwLock};

use chrono::{DateTime, Utc};
use rocksdb::{ColumnFamilyDescriptor, Direction, IteratorMode, Options, DB};
use serde::{de::DeserializeOwned, Serialize};

use super::schema::{self, keys, ALL_CFS};
use crate::dialog::store::check_version;
use crate::dialog::{ConversationState, ConversationStore, StoreError};
use crate::ledger::{CostQuery, CostRecord, CostStore, LedgerError};

/// Low-level failure, mapped into the trait error types at the boundary.
#[derive(Debug, thiserror::Error)]
pub enum RocksError {
    #[error("RocksDB error: {0}")]
    RocksDb(#[from] rocksdb::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Lock poisoned")]
    LockPoisoned,

    #[error("Column family not found: {0}")]
    ColumnFamilyNotFound(String),
}

impl From<RocksError> for StoreError {
    fn from(e: RocksError) -> Self {
        match e {
            RocksError::Serialization(e) => StoreError::Serialization(e),
            other => StoreError::Backend(other.to_string()),
        }
    }
}

impl From<RocksError> for LedgerError {
    fn from(e: RocksError) -> Self {
        match e {
            RocksError::Serialization(e) => LedgerError::Serialization(e),
            other => LedgerError::Storage(other.to_string()),
        }
    }
}

type RocksResult<T> = Result<T, RocksError>;

pub type SharedRocksStore = Arc<RocksStore>;

/// Implements both [`ConversationStore`] and [`CostStore`].
pub struct RocksStore {
    db: RwLock<DB>,
    path: PathBuf,
}

impl RocksStore {
    pub fn open(path: impl Into<PathBuf>) -> RocksResult<Self> {
        let path = path.into();

        let mut opts = Options::default();
        opts.create_if_missing(true);
        opts.create_missing_column_families(true);

        let cf_descriptors: Vec<ColumnFamilyDescriptor> = ALL_CFS
            .iter()
            .map(|name| ColumnFamilyDescriptor::new(*name, Options::default()))
            .collect();

        let db = DB::open_cf_descriptors(&opts, &path, cf_descriptors)?;
        tracing::info!(path = %path.display(), "Opened RocksDB store");

        Ok(Self {
            db: RwLock::new(db),
            path,
        })
    }

    pub fn shared(self) -> SharedRocksStore {
        Arc::new(self)
    }

    pub fn path(&self) -> &PathBuf {
        &self.path
    }

    fn put<T: Serialize>(db: &DB, cf_name: &str, key: &str, value: &T) -> RocksResult<()> {
        let cf = db
            .cf_handle(cf_name)
            .ok_or_else(|| RocksError::ColumnFamilyNotFound(cf_name.to_string()))?;
        let bytes = serde_json::to_vec(value)?;
        db.put_cf(&cf, key.as_bytes(), bytes)?;
        Ok(())
    }

    fn get<T: DeserializeOwned>(db: &DB, cf_name: &str, key: &str) -> RocksResult<Option<T>> {
        let cf = db
            .cf_handle(cf_name)
            .ok_or_else(|| RocksError::ColumnFamilyNotFound(cf_name.to_string()))?;
        match db.get_cf(&cf, key.as_bytes())? {
            Some(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            None => Ok(None),
        }
    }

    /// Values under `prefix`, starting at `start` (inclusive), until `keep`
    /// returns false.
    fn scan<T: DeserializeOwned>(
        &self,
        cf_name: &str,
        prefix: &str,
        start: &str,
        mut keep: impl FnMut(&T) -> bool,
    ) -> RocksResult<Vec<T>> {
        let db = self.db.read().map_err(|_| RocksError::LockPoisoned)?;
        let cf = db
            .cf_handle(cf_name)
            .ok_or_else(|| RocksError::ColumnFamilyNotFound(cf_name.to_string()))?;

        let mut values = Vec::new();
        let iter = db.iterator_cf(&cf, IteratorMode::From(start.as_bytes(), Direction::Forward));
        for item in iter {
            let (key, bytes) = item?;
            if !key.starts_with(prefix.as_bytes()) {
                break;
            }
            let value: T = serde_json::from_slice(&bytes)?;
            if !keep(&value) {
                break;
            }
            values.push(value);
        }
        Ok(values)
    }

    fn all_conversations(&self) -> RocksResult<Vec<ConversationState>> {
        self.scan(
            schema::CF_CONVERSATIONS,
            keys::CONVERSATION_PREFIX,
            keys::CONVERSATION_PREFIX,
            |_: &ConversationState| true,
        )
    }
}

impl ConversationStore for RocksStore {
    fn load(&self, conversation_id: &str) -> Result<Option<ConversationState>, StoreError> {
        let db = self.db.read().map_err(|_| RocksError::LockPoisoned)?;
        Ok(Self::get(&db, schema::CF_CONVERSATIONS, &keys::conversation(conversation_id))?)
    }

    fn save(&self, state: &ConversationState) -> Result<(), StoreError> {
        // Write lock makes the version check and the put atomic.
        let db = self.db.write().map_err(|_| RocksError::LockPoisoned)?;
        let key = keys::conversation(&state.conversation_id);
        let stored: Option<ConversationState> = Self::get(&db, schema::CF_CONVERSATIONS, &key)?;
        check_version(stored.as_ref(), state)?;
        Self::put(&db, schema::CF_CONVERSATIONS, &key, state)?;
        Ok(())
    }

    fn list_by_user(&self, user_id: &str) -> Result<Vec<ConversationState>, StoreError> {
        let mut found: Vec<_> = self
            .all_conversations()?
            .into_iter()
            .filter(|s| s.user_id == user_id)
            .collect();
        found.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        Ok(found)
    }

    fn list_active_between(
        &self,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<ConversationState>, StoreError> {
        let mut found: Vec<_> = self
            .all_conversations()?
            .into_iter()
            .filter(|s| s.last_activity_at >= from && s.last_activity_at < to)
            .collect();
        found.sort_by(|a, b| a.last_activity_at.cmp(&b.last_activity_at));
        Ok(found)
    }
}

impl CostStore for RocksStore {
    fn append(&self, record: &CostRecord) -> Result<(), LedgerError> {
        let db = self.db.write().map_err(|_| RocksError::LockPoisoned)?;
        let key = keys::cost(record.requested_at, record.id);
        if Self::get::<CostRecord>(&db, schema::CF_COST_RECORDS, &key)?.is_some() {
            return Err(LedgerError::Duplicate(record.id));
        }
        Self::put(&db, schema::CF_COST_RECORDS, &key, record)?;
        Ok(())
    }

    fn query(&self, query: &CostQuery) -> Result<Vec<CostRecord>, LedgerError> {
        let start = query
            .from
            .map(keys::cost_from)
            .unwrap_or_else(|| keys::COST_PREFIX.to_string());
        let to = query.to;
        let in_range = self.scan(
            schema::CF_COST_RECORDS,
            keys::COST_PREFIX,
            &start,
            |r: &CostRecord| to.map_or(true, |t| r.requested_at < t),
        )?;
        Ok(in_range.into_iter().filter(|r| query.matches(r)).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ledger::{CallRecord, CostLedger, PricingTable, STAGE_LLM_ARBITER};
    use chrono::{Duration, TimeZone};
    use tempfile::tempdir;

    fn test_store() -> (SharedRocksStore, tempfile::TempDir) {
        let dir = tempdir().unwrap();
        let store = RocksStore::open(dir.path().join("funnel.db")).unwrap();
        (store.shared(), dir)
    }

    #[test]
    fn test_conversation_cas_and_reopen() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("funnel.db");
        {
            let store = RocksStore::open(&path).unwrap();
            let mut s = ConversationState::new("c1", "u1", Utc::now());
            s.version = 1;
            s.context.ext.insert("channel", serde_json::json!("tg")).unwrap();
            store.save(&s).unwrap();
            assert!(matches!(
                store.save(&s),
                Err(StoreError::VersionConflict { .. })
            ));
        }
        let store = RocksStore::open(&path).unwrap();
        let loaded = store.load("c1").unwrap().unwrap();
        assert_eq!(loaded.version, 1);
        assert_eq!(loaded.context.ext.get("channel"), Some(&serde_json::json!("tg")));
        assert_eq!(store.list_by_user("u1").unwrap().len(), 1);
    }

    #[test]
    fn test_cost_records_query_by_range() {
        let (store, _dir) = test_store();
        let ledger = CostLedger::new(store.clone(), PricingTable::default());
        let t = Utc.with_ymd_and_hms(2026, 4, 2, 10, 0, 0).unwrap();
        for h in 0..4 {
            ledger
                .record(
                    CallRecord::new("u1", "yandex", "yandexgpt-lite", STAGE_LLM_ARBITER)
                        .tokens(1000, 0)
                        .started_at(t + Duration::hours(h)),
                )
                .unwrap();
        }
        let window = CostQuery::between(t + Duration::hours(1), t + Duration::hours(3));
        let rows = store.query(&window).unwrap();
        assert_eq!(rows.len(), 2);
        assert!(rows[0].requested_at < rows[1].requested_at);
        assert_eq!(store.query(&CostQuery::all().for_user("u2")).unwrap().len(), 0);
    }
}
