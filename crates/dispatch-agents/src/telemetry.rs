//! JSONL cost log.
//!
//! Each line of the log is one complete [`CostRecord`]. Appends are
//! serialized behind a mutex and never rewrite earlier lines; reads
//! stream the file and filter with [`CostQuery::matches`].

use std::collections::HashSet;
use std::fs::{File, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use funnel::{CostQuery, CostRecord, CostStore, LedgerError};
use tracing::{debug, info};
use uuid::Uuid;

pub struct JsonlCostStore {
    path: PathBuf,
    /// Ids already in the file; also serializes appends.
    seen: Mutex<HashSet<Uuid>>,
}

impl JsonlCostStore {
    /// Open (or lazily create) the log at `path`, indexing existing ids.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, LedgerError> {
        let path = path.into();
        let seen: HashSet<Uuid> = read_records(&path)?.into_iter().map(|r| r.id).collect();
        info!(path = %path.display(), records = seen.len(), "Opened cost log");
        Ok(Self {
            path,
            seen: Mutex::new(seen),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

/// All records in the log; a missing file is an empty log.
pub fn read_records(path: &Path) -> Result<Vec<CostRecord>, LedgerError> {
    let file = match File::open(path) {
        Ok(file) => file,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(e.into()),
    };
    let reader = BufReader::new(file);
    let mut records = Vec::new();
    for line in reader.lines() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        records.push(serde_json::from_str(&line)?);
    }
    Ok(records)
}

impl CostStore for JsonlCostStore {
    fn append(&self, record: &CostRecord) -> Result<(), LedgerError> {
        let mut seen = self
            .seen
            .lock()
            .map_err(|_| LedgerError::Storage("cost log lock poisoned".into()))?;
        if seen.contains(&record.id) {
            return Err(LedgerError::Duplicate(record.id));
        }
        let json = serde_json::to_string(record)?;
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;
        writeln!(file, "{json}")?;
        seen.insert(record.id);
        debug!(
            path = %self.path.display(),
            provider = %record.provider,
            stage = %record.stage,
            cost = record.cost,
            "Appended cost record"
        );
        Ok(())
    }

    fn query(&self, query: &CostQuery) -> Result<Vec<CostRecord>, LedgerError> {
        // Hold the lock so a read never sees a half-written line.
        let _guard = self
            .seen
            .lock()
            .map_err(|_| LedgerError::Storage("cost log lock poisoned".into()))?;
        Ok(read_records(&self.path)?
            .into_iter()
            .filter(|r| query.matches(r))
            .collect())
    }
}
