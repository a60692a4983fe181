//! Column family definitions for the RocksDB store.

/// Conversation states, one row per conversation id.
pub const CF_CONVERSATIONS: &str = "conversations";

/// Append-only cost rows, keyed in request-time order.
pub const CF_COST_RECORDS: &str = "cost_records";

pub const ALL_CFS: &[&str] = &[CF_CONVERSATIONS, CF_COST_RECORDS];

/// Key prefixes for compound keys
pub mod keys {
    use chrono::{DateTime, Utc};
    use uuid::Uuid;

    pub const CONVERSATION_PREFIX: &str = "conv:";
    pub const COST_PREFIX: &str = "cost:";

    pub fn conversation(conversation_id: &str) -> String {
        format!("{CONVERSATION_PREFIX}{conversation_id}")
    }

    /// Zero-padded microsecond timestamp first so keys sort by time.
    pub fn cost(requested_at: DateTime<Utc>, id: Uuid) -> String {
        format!("{COST_PREFIX}{}:{id}", time_component(requested_at))
    }

    /// Smallest key at or after `at`.
    pub fn cost_from(at: DateTime<Utc>) -> String {
        format!("{COST_PREFIX}{}", time_component(at))
    }

    fn time_component(at: DateTime<Utc>) -> String {
        format!("{:020}", at.timestamp_micros().max(0))
    }
}
