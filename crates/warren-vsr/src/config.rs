//! Static cluster configuration for the consensus core.

use serde::{Deserialize, Serialize};

use crate::types::{ReplicaId, ViewNumber};

/// The voting set. Replica IDs are dense indices `0..replica_count`; the
/// driver maps them onto peer addresses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct VsrConfig {
    pub replica_count: u8,
}

impl VsrConfig {
    pub fn new(replica_count: u8) -> Self {
        assert!(replica_count >= 1, "cluster needs at least one replica");
        Self { replica_count }
    }

    /// Strict majority of the voting set: `⌈(n+1)/2⌉`.
    pub fn quorum(&self) -> usize {
        usize::from(self.replica_count) / 2 + 1
    }

    /// The deterministic leader of a view.
    pub fn leader_of(&self, view: ViewNumber) -> ReplicaId {
        ReplicaId::new((view.as_u64() % u64::from(self.replica_count)) as u8)
    }

    /// All replica IDs in the voting set.
    pub fn replicas(&self) -> impl Iterator<Item = ReplicaId> {
        (0..self.replica_count).map(ReplicaId::new)
    }

    /// True for the degenerate single-replica cluster, where submissions
    /// commit immediately.
    pub fn is_solo(&self) -> bool {
        self.replica_count == 1
    }
}
