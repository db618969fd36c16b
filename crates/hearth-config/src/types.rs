//! Configuration types mapping to the TOML schema.
//!
//! Top-level config:
//! ```toml
//! [session]                # cache capacity, timeouts, save policy
//! [session.id]             # identifier shape
//! [cluster]                # this node's position in the ring
//! [logging]                # tracing filter and output format
//! ```

use std::path::PathBuf;
use std::time::Duration;

use hearth_types::{
    ConfigProvider, HasClusterConfig, HasIdentifierConfig, HasSessionConfig, SavePolicy,
    config_defaults as defaults,
};
use serde::{Deserialize, Serialize};

use crate::{ConfigError, Result};

// ─────────────────────────────────────────────────────────────────────────────
// Top-level Config
// ─────────────────────────────────────────────────────────────────────────────

/// Root configuration structure.
///
/// All sections are optional so that partial configs (e.g., project-local
/// overrides) can be loaded and merged. Missing sections read as defaults
/// through the provider traits.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HearthConfig {
    /// Session cache configuration.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub session: Option<SessionConfig>,

    /// Cluster membership.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cluster: Option<ClusterConfig>,

    /// Logging configuration.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub logging: Option<LoggingConfig>,
}

impl HearthConfig {
    /// Create an empty config.
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse from a TOML string.
    pub fn from_toml(toml_str: &str) -> Result<Self> {
        Ok(toml::from_str(toml_str)?)
    }

    /// Serialize to a TOML string.
    pub fn to_toml(&self) -> Result<String> {
        Ok(toml::to_string_pretty(self)?)
    }

    /// Merge another config on top of this one (other takes priority).
    ///
    /// Sections are replaced whole.
    pub fn merge(&mut self, other: HearthConfig) {
        if other.session.is_some() {
            self.session = other.session;
        }

        if other.cluster.is_some() {
            self.cluster = other.cluster;
        }

        if other.logging.is_some() {
            self.logging = other.logging;
        }
    }

    /// Effective session section.
    pub fn session(&self) -> SessionConfig {
        self.session.clone().unwrap_or_default()
    }

    /// Effective cluster section.
    pub fn cluster(&self) -> ClusterConfig {
        self.cluster.unwrap_or_default()
    }

    /// Effective logging section.
    pub fn logging(&self) -> LoggingConfig {
        self.logging.clone().unwrap_or_default()
    }

    /// Reject values the session cache cannot run with.
    pub fn validate(&self) -> Result<()> {
        let session = self.session();
        if session.max_sessions == 0 {
            return Err(invalid("session.max_sessions", "must be at least 1"));
        }
        if session.reap_interval_secs == 0 {
            return Err(invalid("session.reap_interval_secs", "must be at least 1"));
        }

        let cluster = self.cluster();
        if cluster.node_count > 0 && cluster.node_index >= cluster.node_count {
            return Err(invalid(
                "cluster.node_index",
                &format!(
                    "{} is outside a cluster of {} nodes",
                    cluster.node_index, cluster.node_count
                ),
            ));
        }
        if cluster.node_count == 0 && cluster.node_index != 0 {
            return Err(invalid(
                "cluster.node_index",
                "must be 0 when cluster.node_count is 0",
            ));
        }

        Ok(())
    }
}

fn invalid(field: &str, reason: &str) -> ConfigError {
    ConfigError::Invalid {
        field: field.to_string(),
        reason: reason.to_string(),
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Session Configuration
// ─────────────────────────────────────────────────────────────────────────────

/// Session cache configuration.
///
/// ```toml
/// [session]
/// max_sessions = 4096
/// timeout_mins = 30
/// reap_interval_secs = 60
/// save_policy = "on-change"
/// reuse_session_id = true
///
/// [session.id]
/// length = 18
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Maximum number of idle sessions kept in memory.
    pub max_sessions: usize,
    /// Idle timeout in minutes. 0 means sessions never time out.
    pub timeout_mins: u64,
    /// Seconds between reaper cycles.
    pub reap_interval_secs: u64,
    /// When sessions are written to the backing store.
    pub save_policy: SavePolicy,
    /// Whether ids presented by clients may be reused.
    pub reuse_session_id: bool,
    /// Identifier shape.
    pub id: IdConfig,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            max_sessions: defaults::MAX_SESSIONS,
            timeout_mins: defaults::SESSION_TIMEOUT_MINS,
            reap_interval_secs: defaults::REAP_INTERVAL_SECS,
            save_policy: SavePolicy::default(),
            reuse_session_id: true,
            id: IdConfig::default(),
        }
    }
}

/// Identifier shape (`[session.id]`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct IdConfig {
    /// Random and time digits after the routing code. Clamped to a minimum.
    pub length: usize,
    /// Append `.<node_index>` to generated ids.
    pub append_node_index: bool,
    /// Force two-digit routing codes even in small clusters.
    pub two_digit_index: bool,
}

impl Default for IdConfig {
    fn default() -> Self {
        Self {
            length: defaults::ID_LENGTH,
            append_node_index: false,
            two_digit_index: false,
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Cluster Configuration
// ─────────────────────────────────────────────────────────────────────────────

/// This node's position in the cluster ring.
///
/// ```toml
/// [cluster]
/// node_index = 1
/// node_count = 3
/// ```
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClusterConfig {
    pub node_index: u32,
    /// Ring size; 0 runs standalone.
    pub node_count: u32,
}

// ─────────────────────────────────────────────────────────────────────────────
// Logging Configuration
// ─────────────────────────────────────────────────────────────────────────────

/// Logging configuration section.
///
/// ```toml
/// [logging]
/// filter = "hearth_session=debug,info"
/// json = false
/// file_dir = "/var/log/hearth"
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// `EnvFilter` directive for console output. `RUST_LOG` wins when set.
    pub filter: String,
    /// Emit console logs as JSON lines.
    pub json: bool,
    /// Also write daily-rotated JSON logs into this directory.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub file_dir: Option<PathBuf>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            filter: "hearth_session=info,hearth_config=info,warn".to_string(),
            json: false,
            file_dir: None,
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Provider impls
// ─────────────────────────────────────────────────────────────────────────────

impl ConfigProvider for HearthConfig {}

impl HasSessionConfig for HearthConfig {
    fn max_sessions(&self) -> usize {
        self.session().max_sessions
    }

    fn session_timeout(&self) -> Duration {
        defaults::session_timeout_from_mins(self.session().timeout_mins)
    }

    fn reap_interval(&self) -> Duration {
        Duration::from_secs(self.session().reap_interval_secs)
    }

    fn save_policy(&self) -> SavePolicy {
        self.session().save_policy
    }

    fn reuse_session_id(&self) -> bool {
        self.session().reuse_session_id
    }
}

impl HasIdentifierConfig for HearthConfig {
    fn id_length(&self) -> usize {
        defaults::clamp_id_length(self.session().id.length)
    }

    fn append_node_index(&self) -> bool {
        self.session().id.append_node_index
    }

    fn two_digit_index(&self) -> bool {
        self.session().id.two_digit_index
    }
}

impl HasClusterConfig for HearthConfig {
    fn node_index(&self) -> u32 {
        self.cluster().node_index
    }

    fn node_count(&self) -> u32 {
        self.cluster().node_count
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
