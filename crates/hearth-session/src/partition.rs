//! Cluster ownership of session ids.

use crate::config::ManagerConfig;
use crate::id::SessionId;

/// Decides which node owns a session from the routing digit(s) at the
/// front of its id.
///
/// With the single-digit encoding the owner is `decode(id[0]) % node_count`.
/// With the two-digit encoding the first two characters form the group.
/// Without a cluster every node owns every id.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PartitionOracle {
    node_count: u32,
    wide: bool,
}

impl PartitionOracle {
    pub fn new(node_count: u32, wide: bool) -> Self {
        Self { node_count, wide }
    }

    pub fn from_config(config: &ManagerConfig) -> Self {
        Self::new(config.cluster.node_count, config.wide_codes())
    }

    pub fn node_count(&self) -> u32 {
        self.node_count
    }

    pub fn is_clustered(&self) -> bool {
        self.node_count > 0
    }

    /// The raw group encoded in the id.
    pub fn group_of(&self, id: &SessionId) -> Option<u32> {
        if self.wide {
            id.wide_group()
        } else {
            id.group_digit()
        }
    }

    /// Index of the node owning `id`.
    ///
    /// `None` without a cluster, or when the id does not start with
    /// alphabet digits.
    pub fn owner_of(&self, id: &SessionId) -> Option<u32> {
        if !self.is_clustered() {
            return None;
        }
        self.group_of(id).map(|group| group % self.node_count)
    }

    /// Whether node `self_index` owns `id`.
    pub fn owns(&self, id: &SessionId, self_index: u32) -> bool {
        !self.is_clustered() || self.owner_of(id) == Some(self_index)
    }
}
