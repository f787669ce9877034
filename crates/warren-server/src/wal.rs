//! Write-ahead log records.
//!
//! The durable log (`warren-store`'s segment file) stores two record
//! kinds: log entries wrapped in the stable command envelope, and commit
//! markers. The fsync discipline makes commits durable before anything is
//! acknowledged or applied:
//!
//! 1. An entry is appended (and synced) before its PrepareOk leaves the
//!    node.
//! 2. A commit marker is appended and synced before the entries it covers
//!    are applied to the store or a submitter sees success.
//!
//! Recovery folds the records back: entries deduplicate by op (a view
//! change may rewrite an uncommitted tail, so later occurrences win), and
//! the highest commit marker bounds what is replayed into the store.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use warren_types::Timestamp;
use warren_vsr::{LogEntry, OpNumber, ViewNumber};
use warren_wire::CommandEnvelope;

use crate::{Result, ServerError};

/// One durable record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum WalRecord {
    /// A log entry, command wrapped in the versioned envelope.
    Entry {
        op: u64,
        view: u64,
        timestamp: Timestamp,
        envelope: CommandEnvelope,
    },
    /// Everything at or below this op is committed.
    Commit { op: u64 },
}

impl WalRecord {
    pub fn from_entry(entry: &LogEntry) -> Result<Self> {
        let envelope = CommandEnvelope::encode(&entry.command)?;
        Ok(WalRecord::Entry {
            op: entry.op.as_u64(),
            view: entry.view.as_u64(),
            timestamp: entry.timestamp,
            envelope,
        })
    }

    pub fn encode(&self) -> Result<Vec<u8>> {
        postcard::to_allocvec(self).map_err(|e| ServerError::Recovery(e.to_string()))
    }

    pub fn decode(bytes: &[u8]) -> Result<Self> {
        postcard::from_bytes(bytes).map_err(|e| ServerError::Recovery(e.to_string()))
    }
}

/// What recovery reads back from the durable log.
#[derive(Debug, Default)]
pub struct RecoveredLog {
    /// Entries by op, later occurrences already folded in.
    pub entries: BTreeMap<u64, LogEntry>,
    /// Highest durably recorded commit point.
    pub commit: u64,
}

/// Folds raw records into the recovered view of the log.
pub fn fold_records(raw: &[Vec<u8>]) -> Result<RecoveredLog> {
    let mut recovered = RecoveredLog::default();
    for bytes in raw {
        match WalRecord::decode(bytes)? {
            WalRecord::Entry {
                op,
                view,
                timestamp,
                envelope,
            } => {
                let command = envelope
                    .decode()
                    .map_err(|e| ServerError::Recovery(format!("op {op}: {e}")))?;
                recovered.entries.insert(
                    op,
                    LogEntry {
                        op: OpNumber::new(op),
                        view: ViewNumber::new(view),
                        timestamp,
                        command,
                    },
                );
            }
            WalRecord::Commit { op } => {
                recovered.commit = recovered.commit.max(op);
            }
        }
    }
    Ok(recovered)
}
