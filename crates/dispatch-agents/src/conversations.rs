//! JSONL conversation log.
//!
//! Every accepted save appends the full [`ConversationState`] as one line.
//! Opening the log replays it and keeps the highest version per
//! conversation, so consecutive CLI invocations continue the same
//! dialog. Writes are compare-and-swap against the replayed view; the log
//! assumes one writing process at a time.

use std::collections::HashMap;
use std::fs::{File, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

use chrono::{DateTime, Utc};
use funnel::dialog::store::check_version;
use funnel::{ConversationState, ConversationStore, StoreError};
use tracing::{debug, info};

pub struct JsonlConversationStore {
    path: PathBuf,
    /// Latest state per conversation; also serializes appends.
    states: Mutex<HashMap<String, ConversationState>>,
}

impl JsonlConversationStore {
    /// Open (or lazily create) the log at `path` and replay it.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let path = path.into();
        let mut states: HashMap<String, ConversationState> = HashMap::new();
        for state in read_states(&path)? {
            match states.get(&state.conversation_id) {
                Some(existing) if existing.version > state.version => {}
                _ => {
                    states.insert(state.conversation_id.clone(), state);
                }
            }
        }
        info!(path = %path.display(), conversations = states.len(), "Opened conversation log");
        Ok(Self {
            path,
            states: Mutex::new(states),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn lock(&self) -> Result<MutexGuard<'_, HashMap<String, ConversationState>>, StoreError> {
        self.states
            .lock()
            .map_err(|_| StoreError::Backend("conversation log lock poisoned".into()))
    }

    fn filtered<F>(&self, keep: F) -> Result<Vec<ConversationState>, StoreError>
    where
        F: Fn(&ConversationState) -> bool,
    {
        Ok(self.lock()?.values().filter(|s| keep(s)).cloned().collect())
    }
}

fn io_error(path: &Path, e: std::io::Error) -> StoreError {
    StoreError::Backend(format!("{}: {e}", path.display()))
}

/// Every state line in the log, oldest first; a missing file is empty.
pub fn read_states(path: &Path) -> Result<Vec<ConversationState>, StoreError> {
    let file = match File::open(path) {
        Ok(file) => file,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(io_error(path, e)),
    };
    let mut states = Vec::new();
    for line in BufReader::new(file).lines() {
        let line = line.map_err(|e| io_error(path, e))?;
        if line.trim().is_empty() {
            continue;
        }
        states.push(serde_json::from_str(&line)?);
    }
    Ok(states)
}

impl ConversationStore for JsonlConversationStore {
    fn load(&self, conversation_id: &str) -> Result<Option<ConversationState>, StoreError> {
        Ok(self.lock()?.get(conversation_id).cloned())
    }

    fn save(&self, state: &ConversationState) -> Result<(), StoreError> {
        let mut states = self.lock()?;
        check_version(states.get(&state.conversation_id), state)?;
        let json = serde_json::to_string(state)?;
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .map_err(|e| io_error(&self.path, e))?;
        writeln!(file, "{json}").map_err(|e| io_error(&self.path, e))?;
        states.insert(state.conversation_id.clone(), state.clone());
        debug!(
            path = %self.path.display(),
            conversation_id = %state.conversation_id,
            version = state.version,
            "Appended conversation state"
        );
        Ok(())
    }

    fn list_by_user(&self, user_id: &str) -> Result<Vec<ConversationState>, StoreError> {
        let mut found = self.filtered(|s| s.user_id == user_id)?;
        found.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        Ok(found)
    }

    fn list_active_between(
        &self,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<ConversationState>, StoreError> {
        let mut found = self.filtered(|s| s.last_activity_at >= from && s.last_activity_at < to)?;
        found.sort_by(|a, b| a.last_activity_at.cmp(&b.last_activity_at));
        Ok(found)
    }
}
