//! Protocol-level types: replica identity, views, op numbers, log entries.

use std::fmt::{self, Display};

use serde::{Deserialize, Serialize};
use warren_kernel::Command;
use warren_types::Timestamp;

/// Index of a replica within the configured voting set.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default,
)]
pub struct ReplicaId(u8);

impl ReplicaId {
    pub fn new(id: u8) -> Self {
        Self(id)
    }

    pub fn as_u8(self) -> u8 {
        self.0
    }
}

impl Display for ReplicaId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "r{}", self.0)
    }
}

/// Monotonically increasing view number. The leader of view `v` is
/// `v mod replica_count`.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default,
)]
pub struct ViewNumber(u64);

impl ViewNumber {
    pub const ZERO: ViewNumber = ViewNumber(0);

    pub fn new(view: u64) -> Self {
        Self(view)
    }

    pub fn as_u64(self) -> u64 {
        self.0
    }

    pub fn next(self) -> ViewNumber {
        ViewNumber(self.0 + 1)
    }
}

impl Display for ViewNumber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "v{}", self.0)
    }
}

/// Position in the replicated log. Op 0 is "nothing"; the first entry is 1.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default,
)]
pub struct OpNumber(u64);

impl OpNumber {
    pub const ZERO: OpNumber = OpNumber(0);

    pub fn new(op: u64) -> Self {
        Self(op)
    }

    pub fn as_u64(self) -> u64 {
        self.0
    }

    pub fn next(self) -> OpNumber {
        OpNumber(self.0 + 1)
    }
}

impl Display for OpNumber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "op{}", self.0)
    }
}

/// Protocol status of a replica.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum ReplicaStatus {
    /// Participating in normal operation under the current view's leader.
    #[default]
    Normal,
    /// Voting in a view change; no submissions accepted.
    ViewChange,
}

/// One ordered, replicated command.
///
/// The timestamp is stamped by the leader at append time and is the only
/// clock the apply path ever sees.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogEntry {
    pub op: OpNumber,
    pub view: ViewNumber,
    pub timestamp: Timestamp,
    pub command: Command,
}

impl LogEntry {
    /// Canonical encoding used for the durable log and the wire.
    pub fn encode(&self) -> Result<Vec<u8>, postcard::Error> {
        postcard::to_allocvec(self)
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, postcard::Error> {
        postcard::from_bytes(bytes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use warren_types::ServiceId;

    #[test]
    fn log_entry_round_trips() {
        let entry = LogEntry {
            op: OpNumber::new(7),
            view: ViewNumber::new(2),
            timestamp: Timestamp::from_millis(1_234),
            command: Command::DeleteService {
                id: ServiceId::new("svc"),
            },
        };
        let bytes = entry.encode().unwrap();
        assert_eq!(LogEntry::decode(&bytes).unwrap(), entry);
    }
}
