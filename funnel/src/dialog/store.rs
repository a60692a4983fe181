//! Conversation state persistence.

use std::collections::HashMap;
use std::sync::RwLock;

use chrono::{DateTime, Utc};
use thiserror::Error;

use super::state::ConversationState;

#[derive(Debug, Error)]
pub enum StoreError {
    /// Stored version differs from the one the writer loaded.
    #[error("Version conflict for conversation {conversation_id}: expected {expected}, found {found}")]
    VersionConflict {
        conversation_id: String,
        expected: u64,
        found: u64,
    },

    #[error("Storage backend failure: {0}")]
    Backend(String),

    #[error("Serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Keyed conversation storage with compare-and-swap writes.
///
/// `save` accepts `state` only if the stored version is
/// `state.version - 1` (or nothing is stored and `state.version == 1`).
pub trait ConversationStore: Send + Sync {
    fn load(&self, conversation_id: &str) -> Result<Option<ConversationState>, StoreError>;

    fn save(&self, state: &ConversationState) -> Result<(), StoreError>;

    fn list_by_user(&self, user_id: &str) -> Result<Vec<ConversationState>, StoreError>;

    /// Conversations whose last activity falls in `[from, to)`.
    fn list_active_between(
        &self,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<ConversationState>, StoreError>;
}

/// Check the compare-and-swap rule against what is currently stored.
pub fn check_version(
    stored: Option<&ConversationState>,
    incoming: &ConversationState,
) -> Result<(), StoreError> {
    let found = stored.map(|s| s.version).unwrap_or(0);
    let expected = incoming.version.saturating_sub(1);
    if incoming.version == 0 || found != expected {
        return Err(StoreError::VersionConflict {
            conversation_id: incoming.conversation_id.clone(),
            expected,
            found,
        });
    }
    Ok(())
}

#[derive(Debug, Default)]
pub struct InMemoryConversationStore {
    states: RwLock<HashMap<String, ConversationState>>,
}

impl InMemoryConversationStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn poisoned() -> StoreError {
        StoreError::Backend("conversation store lock poisoned".into())
    }
}

impl ConversationStore for InMemoryConversationStore {
    fn load(&self, conversation_id: &str) -> Result<Option<ConversationState>, StoreError> {
        let states = self.states.read().map_err(|_| Self::poisoned())?;
        Ok(states.get(conversation_id).cloned())
    }

    fn save(&self, state: &ConversationState) -> Result<(), StoreError> {
        let mut states = self.states.write().map_err(|_| Self::poisoned())?;
        check_version(states.get(&state.conversation_id), state)?;
        states.insert(state.conversation_id.clone(), state.clone());
        Ok(())
    }

    fn list_by_user(&self, user_id: &str) -> Result<Vec<ConversationState>, StoreError> {
        let states = self.states.read().map_err(|_| Self::poisoned())?;
        let mut found: Vec<_> = states
            .values()
            .filter(|s| s.user_id == user_id)
            .cloned()
            .collect();
        found.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        Ok(found)
    }

    fn list_active_between(
        &self,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<ConversationState>, StoreError> {
        let states = self.states.read().map_err(|_| Self::poisoned())?;
        let mut found: Vec<_> = states
            .values()
            .filter(|s| s.last_activity_at >= from && s.last_activity_at < to)
            .cloned()
            .collect();
        found.sort_by(|a, b| a.last_activity_at.cmp(&b.last_activity_at));
        Ok(found)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};

    fn state(id: &str, user: &str, version: u64) -> ConversationState {
        let mut s = ConversationState::new(id, user, Utc.with_ymd_and_hms(2026, 2, 1, 8, 0, 0).unwrap());
        s.version = version;
        s
    }

    #[test]
    fn test_cas_accepts_next_version_only() {
        let store = InMemoryConversationStore::new();
        store.save(&state("c1", "u", 1)).unwrap();
        store.save(&state("c1", "u", 2)).unwrap();
        let err = store.save(&state("c1", "u", 2)).unwrap_err();
        assert!(matches!(
            err,
            StoreError::VersionConflict {
                expected: 1,
                found: 2,
                ..
            }
        ));
        assert!(store.save(&state("c2", "u", 0)).is_err());
        assert!(store.save(&state("c3", "u", 5)).is_err());
    }

    #[test]
    fn test_list_queries() {
        let store = InMemoryConversationStore::new();
        let mut a = state("a", "u1", 1);
        let mut b = state("b", "u1", 1);
        let c = state("c", "u2", 1);
        a.touch(a.created_at + Duration::hours(1));
        b.touch(b.created_at + Duration::hours(3));
        for s in [&a, &b, &c] {
            store.save(s).unwrap();
        }
        assert_eq!(store.list_by_user("u1").unwrap().len(), 2);
        assert!(store.list_by_user("nobody").unwrap().is_empty());

        let from = a.created_at + Duration::minutes(30);
        let to = a.created_at + Duration::hours(2);
        let active = store.list_active_between(from, to).unwrap();
        assert_eq!(active.len(), 1);
        assert_eq!(active[0].conversation_id, "a");
    }
}
