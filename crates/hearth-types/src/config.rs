//! Configuration traits for decoupled config passing between crates.
//!
//! The session core only depends on these capabilities; the TOML schema in
//! `hearth-config` implements them, and tests can use
//! [`SessionConfigProvider`] directly.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Base trait for all configuration types.
///
/// Implementations should be cheaply cloneable and thread-safe.
pub trait ConfigProvider: Clone + Send + Sync + 'static {}

/// When checked-in session content is written to the backing store.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SavePolicy {
    /// Persist on save only when the checkout modified the content.
    #[default]
    OnChange,
    /// Persist on every save, modified or not.
    Always,
    /// Defer all persistence to the shutdown drain.
    OnShutdown,
}

/// Session cache behaviour: capacity, idle timeout and persistence policy.
pub trait HasSessionConfig: ConfigProvider {
    /// Maximum number of sessions to keep in cache before LRU eviction.
    fn max_sessions(&self) -> usize;

    /// Idle interval after which a session may be reaped.
    fn session_timeout(&self) -> Duration;

    /// Interval between reaper cycles.
    fn reap_interval(&self) -> Duration;

    /// When sessions are written to the backing store.
    fn save_policy(&self) -> SavePolicy {
        SavePolicy::default()
    }

    /// Whether an inbound session id may be reused when it passes the
    /// length and partition checks.
    fn reuse_session_id(&self) -> bool {
        true
    }
}

/// Session identifier shape.
pub trait HasIdentifierConfig: ConfigProvider {
    /// Number of random/time digits after the routing prefix.
    fn id_length(&self) -> usize;

    /// Append `.<node index>` to generated ids.
    fn append_node_index(&self) -> bool {
        false
    }

    /// Force two base-64 digits per routing code even in small clusters.
    fn two_digit_index(&self) -> bool {
        false
    }
}

/// Position of this node in the cluster ring.
pub trait HasClusterConfig: ConfigProvider {
    /// Index of this node, `0..node_count`.
    fn node_index(&self) -> u32;

    /// Number of nodes in the ring; 0 means no cluster.
    fn node_count(&self) -> u32;
}

/// Default configuration values.
pub mod defaults {
    use std::time::Duration;

    pub const MAX_SESSIONS: usize = 4096;
    pub const SESSION_TIMEOUT_MINS: u64 = 30;
    pub const REAP_INTERVAL_SECS: u64 = 60;
    pub const ID_LENGTH: usize = 18;
    /// Generated ids never carry fewer body digits than this.
    pub const MIN_ID_LENGTH: usize = 7;

    /// Timeout used when sessions should effectively never expire.
    pub const NEVER_EXPIRE: Duration = Duration::from_millis(i64::MAX as u64 / 2);

    pub fn session_timeout() -> Duration {
        session_timeout_from_mins(SESSION_TIMEOUT_MINS)
    }

    pub fn reap_interval() -> Duration {
        Duration::from_secs(REAP_INTERVAL_SECS)
    }

    /// Convert a timeout in minutes, treating 0 or an absurdly large value
    /// as "never expire".
    pub fn session_timeout_from_mins(mins: u64) -> Duration {
        if mins == 0 || mins > (i32::MAX / 2) as u64 {
            NEVER_EXPIRE
        } else {
            Duration::from_secs(mins * 60)
        }
    }

    /// Clamp an id length to [`MIN_ID_LENGTH`].
    pub fn clamp_id_length(length: usize) -> usize {
        length.max(MIN_ID_LENGTH)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Standalone provider
// ─────────────────────────────────────────────────────────────────────────────

/// Standalone configuration implementing every provider trait.
#[derive(Debug, Clone)]
pub struct SessionConfigProvider {
    pub max_sessions: usize,
    pub session_timeout: Duration,
    pub reap_interval: Duration,
    pub save_policy: SavePolicy,
    pub reuse_session_id: bool,
    pub id_length: usize,
    pub append_node_index: bool,
    pub two_digit_index: bool,
    pub node_index: u32,
    pub node_count: u32,
}

impl Default for SessionConfigProvider {
    fn default() -> Self {
        Self {
            max_sessions: defaults::MAX_SESSIONS,
            session_timeout: defaults::session_timeout(),
            reap_interval: defaults::reap_interval(),
            save_policy: SavePolicy::default(),
            reuse_session_id: true,
            id_length: defaults::ID_LENGTH,
            append_node_index: false,
            two_digit_index: false,
            node_index: 0,
            node_count: 0,
        }
    }
}

impl ConfigProvider for SessionConfigProvider {}

impl HasSessionConfig for SessionConfigProvider {
    fn max_sessions(&self) -> usize {
        self.max_sessions
    }

    fn session_timeout(&self) -> Duration {
        self.session_timeout
    }

    fn reap_interval(&self) -> Duration {
        self.reap_interval
    }

    fn save_policy(&self) -> SavePolicy {
        self.save_policy
    }

    fn reuse_session_id(&self) -> bool {
        self.reuse_session_id
    }
}

impl HasIdentifierConfig for SessionConfigProvider {
    fn id_length(&self) -> usize {
        self.id_length
    }

    fn append_node_index(&self) -> bool {
        self.append_node_index
    }

    fn two_digit_index(&self) -> bool {
        self.two_digit_index
    }
}

impl HasClusterConfig for SessionConfigProvider {
    fn node_index(&self) -> u32 {
        self.node_index
    }

    fn node_count(&self) -> u32 {
        self.node_count
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_session_config_defaults() {
        let config = SessionConfigProvider::default();
        assert_eq!(config.max_sessions(), defaults::MAX_SESSIONS);
        assert_eq!(config.session_timeout(), Duration::from_secs(30 * 60));
        assert_eq!(config.reap_interval(), defaults::reap_interval());
        assert_eq!(config.save_policy(), SavePolicy::OnChange);
        assert!(config.reuse_session_id());
        assert_eq!(config.node_count(), 0);
    }

    #[test]
    fn test_zero_timeout_never_expires() {
        assert_eq!(
            defaults::session_timeout_from_mins(0),
            defaults::NEVER_EXPIRE
        );
        assert_eq!(
            defaults::session_timeout_from_mins(u64::MAX),
            defaults::NEVER_EXPIRE
        );
        assert_eq!(
            defaults::session_timeout_from_mins(5),
            Duration::from_secs(300)
        );
    }

    #[test]
    fn test_id_length_clamped() {
        assert_eq!(defaults::clamp_id_length(3), defaults::MIN_ID_LENGTH);
        assert_eq!(defaults::clamp_id_length(24), 24);
    }

    #[test]
    fn test_save_policy_kebab_case() {
        #[derive(Deserialize)]
        struct Wrapper {
            policy: SavePolicy,
        }

        let parsed: Wrapper = toml::from_str(r#"policy = "on-shutdown""#).unwrap();
        assert_eq!(parsed.policy, SavePolicy::OnShutdown);
    }
}
