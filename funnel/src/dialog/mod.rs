//! Dialog memory: per-conversation state with serialized access.
//!
//! All mutation of a conversation happens inside a critical section keyed
//! by conversation id:
//!
//! ```text
//! lock(id) -> load_or_create -> mutate -> persist -> unlock
//! ```
//!
//! Different conversations never contend. The store additionally rejects
//! stale writes by version, so a second process writing the same store
//! fails loudly instead of losing an update.

pub mod context;
pub mod state;
pub mod store;

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

use chrono::{DateTime, Utc};
use tokio::sync::OwnedMutexGuard;

pub use context::{ContextError, ContextMap, ConversationContext};
pub use state::{
    ConversationState, ConversationStatus, Disposition, ServiceContext, ServiceHistoryEntry,
    TransitionError,
};
pub use store::{ConversationStore, InMemoryConversationStore, StoreError};

/// Idle lock entries are pruned once the table grows past this size.
const LOCK_TABLE_PRUNE_AT: usize = 256;

/// Proof that the holder owns the critical section of one conversation.
pub struct ConversationGuard {
    conversation_id: String,
    _guard: OwnedMutexGuard<()>,
}

impl ConversationGuard {
    pub fn conversation_id(&self) -> &str {
        &self.conversation_id
    }
}

pub struct DialogMemory {
    store: Arc<dyn ConversationStore>,
    locks: Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>,
}

impl DialogMemory {
    pub fn new(store: Arc<dyn ConversationStore>) -> Self {
        Self {
            store,
            locks: Mutex::new(HashMap::new()),
        }
    }

    pub fn in_memory() -> Self {
        Self::new(Arc::new(InMemoryConversationStore::new()))
    }

    pub fn store(&self) -> &Arc<dyn ConversationStore> {
        &self.store
    }

    /// Wait for exclusive access to `conversation_id`.
    pub async fn lock(&self, conversation_id: &str) -> ConversationGuard {
        let mutex = {
            let mut locks = self.locks.lock().unwrap_or_else(PoisonError::into_inner);
            if locks.len() >= LOCK_TABLE_PRUNE_AT {
                locks.retain(|_, m| Arc::strong_count(m) > 1);
            }
            locks
                .entry(conversation_id.to_string())
                .or_insert_with(|| Arc::new(tokio::sync::Mutex::new(())))
                .clone()
        };
        ConversationGuard {
            conversation_id: conversation_id.to_string(),
            _guard: mutex.lock_owned().await,
        }
    }

    /// Stored state, or a fresh one for a first turn.
    pub fn load_or_create(
        &self,
        guard: &ConversationGuard,
        user_id: &str,
        now: DateTime<Utc>,
    ) -> Result<ConversationState, StoreError> {
        match self.store.load(guard.conversation_id())? {
            Some(state) => Ok(state),
            None => {
                tracing::debug!(
                    conversation_id = guard.conversation_id(),
                    user_id,
                    "Creating conversation state"
                );
                Ok(ConversationState::new(guard.conversation_id(), user_id, now))
            }
        }
    }

    /// Touch timestamps, bump the version and write `state`.
    pub fn persist(
        &self,
        guard: &ConversationGuard,
        state: &mut ConversationState,
        now: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        if guard.conversation_id() != state.conversation_id {
            return Err(StoreError::Backend(format!(
                "guard for {} used to persist {}",
                guard.conversation_id(),
                state.conversation_id
            )));
        }
        state.touch(now);
        state.version += 1;
        if let Err(e) = self.store.save(state) {
            state.version -= 1;
            return Err(e);
        }
        tracing::debug!(
            conversation_id = %state.conversation_id,
            version = state.version,
            status = %state.status,
            "Conversation state persisted"
        );
        Ok(())
    }

    /// Read-only snapshot, without taking the lock.
    pub fn get(&self, conversation_id: &str) -> Result<Option<ConversationState>, StoreError> {
        self.store.load(conversation_id)
    }

    pub fn list_by_user(&self, user_id: &str) -> Result<Vec<ConversationState>, StoreError> {
        self.store.list_by_user(user_id)
    }

    pub fn list_active_between(
        &self,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<ConversationState>, StoreError> {
        self.store.list_active_between(from, to)
    }

    #[cfg(test)]
    fn lock_table_len(&self) -> usize {
        self.locks.lock().unwrap_or_else(PoisonError::into_inner).len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn test_persist_bumps_version() {
        let memory = DialogMemory::in_memory();
        let guard = memory.lock("c1").await;
        let mut state = memory.load_or_create(&guard, "u1", Utc::now()).unwrap();
        assert_eq!(state.version, 0);
        memory.persist(&guard, &mut state, Utc::now()).unwrap();
        memory.persist(&guard, &mut state, Utc::now()).unwrap();
        assert_eq!(memory.get("c1").unwrap().unwrap().version, 2);
    }

    #[tokio::test]
    async fn test_persist_requires_matching_guard() {
        let memory = DialogMemory::in_memory();
        let guard = memory.lock("c1").await;
        let mut other = ConversationState::new("c2", "u", Utc::now());
        assert!(memory.persist(&guard, &mut other, Utc::now()).is_err());
        assert_eq!(other.version, 0);
    }

    #[tokio::test]
    async fn test_lock_serializes_same_conversation() {
        let memory = Arc::new(DialogMemory::in_memory());
        let first = memory.lock("c1").await;

        let m = memory.clone();
        let waiter = tokio::spawn(async move {
            let _g = m.lock("c1").await;
        });
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!waiter.is_finished());

        // A different conversation is not blocked.
        let _other = memory.lock("c2").await;

        drop(first);
        waiter.await.unwrap();
    }

    #[tokio::test]
    async fn test_idle_locks_pruned() {
        let memory = DialogMemory::in_memory();
        for i in 0..(LOCK_TABLE_PRUNE_AT + 10) {
            let _g = memory.lock(&format!("c{i}")).await;
        }
        assert!(memory.lock_table_len() <= LOCK_TABLE_PRUNE_AT);
    }
}
