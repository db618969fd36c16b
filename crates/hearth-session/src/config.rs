//! Configuration for the session manager.

use std::time::Duration;

use hearth_types::config_defaults as defaults;
use hearth_types::{HasClusterConfig, HasIdentifierConfig, HasSessionConfig, SavePolicy};

/// Requested ids shorter than this are never reused.
pub const MIN_REQUESTED_ID_LENGTH: usize = 4;

/// Shape of generated session identifiers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IdentifierConfig {
    /// Random/time digits after the routing prefix. Never below
    /// [`defaults::MIN_ID_LENGTH`].
    pub length: usize,

    /// Append `.<node index>` for operators reading logs.
    pub append_node_index: bool,

    /// Encode each routing code with two digits even when the ring has at
    /// most 64 members.
    pub two_digit_index: bool,
}

impl Default for IdentifierConfig {
    fn default() -> Self {
        Self {
            length: defaults::ID_LENGTH,
            append_node_index: false,
            two_digit_index: false,
        }
    }
}

impl IdentifierConfig {
    /// Set the body length, clamped to the minimum.
    pub fn with_length(mut self, length: usize) -> Self {
        self.length = defaults::clamp_id_length(length);
        self
    }

    /// Append the node index to generated ids.
    pub fn with_node_index_suffix(mut self, enabled: bool) -> Self {
        self.append_node_index = enabled;
        self
    }

    /// Force the two-digit routing encoding.
    pub fn with_two_digit_index(mut self, enabled: bool) -> Self {
        self.two_digit_index = enabled;
        self
    }
}

/// This node's place in the cluster ring.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ClusterConfig {
    /// Index of this node.
    pub node_index: u32,

    /// Ring size; 0 disables partitioning.
    pub node_count: u32,
}

impl ClusterConfig {
    /// A ring of `node_count` members with this node at `node_index`.
    pub fn new(node_index: u32, node_count: u32) -> Self {
        Self {
            node_index,
            node_count,
        }
    }

    /// Whether a ring is configured at all.
    pub fn is_clustered(&self) -> bool {
        self.node_count > 0
    }

    /// Whether routing codes need two base-64 digits.
    pub fn needs_wide_codes(&self) -> bool {
        self.node_count > 64
    }
}

/// Configuration for the session manager.
#[derive(Debug, Clone)]
pub struct ManagerConfig {
    /// Maximum number of sessions to cache before LRU eviction.
    pub max_sessions: usize,

    /// Default idle interval after which a session may be reaped.
    pub session_timeout: Duration,

    /// Interval between reaper cycles.
    pub reap_interval: Duration,

    /// When saved sessions are written to the backing store.
    pub save_policy: SavePolicy,

    /// Whether an inbound id may be reused.
    pub reuse_session_id: bool,

    /// Identifier shape.
    pub id: IdentifierConfig,

    /// Cluster ring position.
    pub cluster: ClusterConfig,
}

impl Default for ManagerConfig {
    fn default() -> Self {
        Self {
            max_sessions: defaults::MAX_SESSIONS,
            session_timeout: defaults::session_timeout(),
            reap_interval: defaults::reap_interval(),
            save_policy: SavePolicy::default(),
            reuse_session_id: true,
            id: IdentifierConfig::default(),
            cluster: ClusterConfig::default(),
        }
    }
}

impl ManagerConfig {
    /// Create a new configuration with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a configuration from any provider of the shared config traits.
    pub fn from_provider<C>(provider: &C) -> Self
    where
        C: HasSessionConfig + HasIdentifierConfig + HasClusterConfig,
    {
        Self {
            max_sessions: provider.max_sessions(),
            session_timeout: provider.session_timeout(),
            reap_interval: provider.reap_interval(),
            save_policy: provider.save_policy(),
            reuse_session_id: provider.reuse_session_id(),
            id: IdentifierConfig::default()
                .with_length(provider.id_length())
                .with_node_index_suffix(provider.append_node_index())
                .with_two_digit_index(provider.two_digit_index()),
            cluster: ClusterConfig::new(provider.node_index(), provider.node_count()),
        }
    }

    /// Set the maximum number of sessions to cache.
    pub fn with_max_sessions(mut self, max: usize) -> Self {
        self.max_sessions = max;
        self
    }

    /// Set the idle timeout.
    pub fn with_session_timeout(mut self, timeout: Duration) -> Self {
        self.session_timeout = timeout;
        self
    }

    /// Set the reaper interval.
    pub fn with_reap_interval(mut self, interval: Duration) -> Self {
        self.reap_interval = interval;
        self
    }

    /// Set the save policy.
    pub fn with_save_policy(mut self, policy: SavePolicy) -> Self {
        self.save_policy = policy;
        self
    }

    /// Allow or forbid reuse of inbound ids.
    pub fn with_reuse_session_id(mut self, reuse: bool) -> Self {
        self.reuse_session_id = reuse;
        self
    }

    /// Set the identifier shape.
    pub fn with_identifier(mut self, id: IdentifierConfig) -> Self {
        self.id = id;
        self
    }

    /// Set the cluster position.
    pub fn with_cluster(mut self, cluster: ClusterConfig) -> Self {
        self.cluster = cluster;
        self
    }

    /// Whether routing codes use the two-digit encoding.
    pub fn wide_codes(&self) -> bool {
        self.cluster.needs_wide_codes() || self.id.two_digit_index
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hearth_types::SessionConfigProvider;

    #[test]
    fn test_from_provider() {
        let provider = SessionConfigProvider {
            max_sessions: 12,
            id_length: 2,
            node_index: 1,
            node_count: 3,
            save_policy: SavePolicy::Always,
            ..Default::default()
        };

        let config = ManagerConfig::from_provider(&provider);
        assert_eq!(config.max_sessions, 12);
        assert_eq!(config.id.length, defaults::MIN_ID_LENGTH);
        assert_eq!(config.cluster, ClusterConfig::new(1, 3));
        assert_eq!(config.save_policy, SavePolicy::Always);
        assert!(!config.wide_codes());
    }

    #[test]
    fn test_wide_codes_boundary() {
        let at_limit = ManagerConfig::new().with_cluster(ClusterConfig::new(0, 64));
        assert!(!at_limit.wide_codes());

        let over_limit = ManagerConfig::new().with_cluster(ClusterConfig::new(0, 65));
        assert!(over_limit.wide_codes());

        let forced = ManagerConfig::new()
            .with_identifier(IdentifierConfig::default().with_two_digit_index(true));
        assert!(forced.wide_codes());
    }
}
