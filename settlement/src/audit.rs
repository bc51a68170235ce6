//! Audit trail
//!
//! Append-only JSONL log of security-relevant validation events with a
//! SHA-256 hash chain for tamper detection. Entries reference codes by
//! `code_id` only; the clear code value never reaches the trail.
//!
//! Auditing is best-effort relative to settlement: a failed append is
//! logged and dropped, it never rolls back a committed settlement.

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fs::{File, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use uuid::Uuid;
use validation_core::types::ActorId;

/// Audit event type
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum AuditEventType {
    /// Code issued for a delivery
    CodeGenerated,
    /// Code administratively revoked
    CodeRevoked,
    /// Attempt matched and the delivery settled
    ValidationSucceeded,
    /// Attempt rejected (mismatch, expired, or consumed code)
    ValidationFailed,
    /// Attempt refused by the lockout window
    LockoutTriggered,
    /// Maintenance sweep pass finished
    SweepCompleted,
}

/// One audit trail entry
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditEntry {
    /// Unique entry ID
    pub entry_id: Uuid,

    /// Entry timestamp
    pub timestamp: DateTime<Utc>,

    /// Event type
    pub event_type: AuditEventType,

    /// Acting principal
    pub actor: String,

    /// Delivery involved, if any
    pub delivery_id: Option<Uuid>,

    /// Code involved, by row ID only
    pub code_id: Option<Uuid>,

    /// Additional structured context
    pub detail: serde_json::Value,

    /// Hash of the previous entry (empty for the first)
    pub previous_hash: String,

    /// Hash of this entry
    pub hash: String,
}

impl AuditEntry {
    /// Create a new entry. The hash is finalized when the sink links it
    /// into the chain.
    pub fn new(
        event_type: AuditEventType,
        actor: &ActorId,
        timestamp: DateTime<Utc>,
    ) -> Self {
        let mut entry = Self {
            entry_id: Uuid::new_v4(),
            timestamp,
            event_type,
            actor: actor.to_string(),
            delivery_id: None,
            code_id: None,
            detail: serde_json::Value::Null,
            previous_hash: String::new(),
            hash: String::new(),
        };
        entry.hash = entry.compute_hash();
        entry
    }

    /// Attach the delivery reference
    pub fn with_delivery(mut self, delivery_id: Uuid) -> Self {
        self.delivery_id = Some(delivery_id);
        self.hash = self.compute_hash();
        self
    }

    /// Attach the code reference
    pub fn with_code(mut self, code_id: Uuid) -> Self {
        self.code_id = Some(code_id);
        self.hash = self.compute_hash();
        self
    }

    /// Attach structured context
    pub fn with_detail(mut self, detail: serde_json::Value) -> Self {
        self.detail = detail;
        self.hash = self.compute_hash();
        self
    }

    fn compute_hash(&self) -> String {
        let mut hasher = Sha256::new();
        hasher.update(self.entry_id.as_bytes());
        hasher.update(self.timestamp.to_rfc3339().as_bytes());
        hasher.update(format!("{:?}", self.event_type).as_bytes());
        hasher.update(self.actor.as_bytes());
        if let Some(delivery_id) = &self.delivery_id {
            hasher.update(delivery_id.as_bytes());
        }
        if let Some(code_id) = &self.code_id {
            hasher.update(code_id.as_bytes());
        }
        hasher.update(self.detail.to_string().as_bytes());
        hasher.update(self.previous_hash.as_bytes());
        hex::encode(hasher.finalize())
    }

    /// Verify this entry's hash against its contents
    pub fn verify_hash(&self) -> bool {
        self.hash == self.compute_hash()
    }

    fn set_previous_hash(&mut self, previous_hash: String) {
        self.previous_hash = previous_hash;
        self.hash = self.compute_hash();
    }
}

/// Audit trail sink
pub trait AuditSink: Send + Sync {
    /// Append one entry to the trail
    fn append(&self, entry: AuditEntry) -> anyhow::Result<()>;
}

/// Chain state guarded together so concurrent appends stay ordered
struct LogState {
    file: File,
    last_hash: String,
}

/// File-backed JSONL audit log with hash chaining
pub struct JsonlAuditLog {
    path: PathBuf,
    state: Mutex<LogState>,
}

impl JsonlAuditLog {
    /// Open (or create) the log and recover the chain head from the last line
    pub fn open(path: impl Into<PathBuf>) -> anyhow::Result<Self> {
        let path = path.into();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let file = OpenOptions::new().create(true).append(true).open(&path)?;
        let last_hash = Self::recover_last_hash(&path)?;

        Ok(Self {
            path,
            state: Mutex::new(LogState { file, last_hash }),
        })
    }

    fn recover_last_hash(path: &Path) -> anyhow::Result<String> {
        let file = File::open(path)?;
        let reader = BufReader::new(file);

        match reader.lines().last() {
            Some(line) => {
                let entry: AuditEntry = serde_json::from_str(&line?)?;
                Ok(entry.hash)
            }
            None => Ok(String::new()),
        }
    }

    /// Walk the whole file and verify every hash and every link
    pub fn verify_chain(&self) -> anyhow::Result<u64> {
        let file = File::open(&self.path)?;
        let reader = BufReader::new(file);

        let mut previous_hash = String::new();
        let mut verified: u64 = 0;

        for (i, line) in reader.lines().enumerate() {
            let entry: AuditEntry = serde_json::from_str(&line?)?;

            if !entry.verify_hash() {
                anyhow::bail!("Entry hash mismatch at line {}", i + 1);
            }
            if entry.previous_hash != previous_hash {
                anyhow::bail!("Hash chain broken at line {}", i + 1);
            }

            previous_hash = entry.hash.clone();
            verified += 1;
        }

        Ok(verified)
    }
}

impl AuditSink for JsonlAuditLog {
    fn append(&self, mut entry: AuditEntry) -> anyhow::Result<()> {
        let mut state = self.state.lock();

        entry.set_previous_hash(state.last_hash.clone());

        let mut json = serde_json::to_string(&entry)?;
        json.push('\n');
        state.file.write_all(json.as_bytes())?;
        state.file.flush()?;

        state.last_hash = entry.hash;
        Ok(())
    }
}
