//! Runtime configuration.
//!
//! Each component takes its own config struct. All of them carry sensible
//! defaults and are checked with `validate(self)` before use. [`EquivConfig`]
//! aggregates them so a deployment can load everything from one TOML file;
//! any section or field left out falls back to its default.

use std::collections::BTreeSet;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{EquivError, ValidationError};
use crate::id::Id;
use crate::propgraph::MAX_DEPTH;

fn invalid(field: &str, reason: impl Into<String>) -> ValidationError {
    ValidationError::InvalidConfig {
        field: field.to_string(),
        reason: reason.into(),
    }
}

/// Read/write consistency requested from the graph tables.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ConsistencyLevel {
    One,
    LocalQuorum,
    #[default]
    Quorum,
    All,
}

/// Configuration for the keyed multi-lock used by graph updates.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LockConfig {
    /// Maximum time to wait for a full key set. `None` waits indefinitely.
    pub timeout_ms: Option<u64>,
    /// Attempts at locking a stable key set before giving up.
    pub max_attempts: u32,
    /// Pause between attempts when the key set grew under us.
    pub retry_backoff_ms: u64,
}

impl Default for LockConfig {
    fn default() -> Self {
        Self {
            timeout_ms: Some(30_000),
            max_attempts: 5,
            retry_backoff_ms: 5,
        }
    }
}

impl LockConfig {
    #[must_use]
    pub fn timeout(&self) -> Option<Duration> {
        self.timeout_ms.map(Duration::from_millis)
    }

    #[must_use]
    pub const fn retry_backoff(&self) -> Duration {
        Duration::from_millis(self.retry_backoff_ms)
    }

    pub fn validate(self) -> Result<Self, ValidationError> {
        if self.max_attempts == 0 {
            return Err(invalid("lock.max_attempts", "must be at least 1"));
        }
        if self.timeout_ms == Some(0) {
            return Err(invalid("lock.timeout_ms", "must be positive when set"));
        }
        Ok(self)
    }
}

/// Configuration for the equivalence graph store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct GraphStoreConfig {
    /// Deadline for each call into the graph tables.
    pub backend_timeout_ms: u64,
    pub read_consistency: ConsistencyLevel,
    pub write_consistency: ConsistencyLevel,
    /// Updates slower than this are logged at warn.
    pub slow_update_ms: u64,
    /// Graphs with more members than this are logged at warn.
    pub large_graph_members: usize,
    /// Resources whose assertions are rejected outright.
    pub blocked_ids: BTreeSet<Id>,
}

impl Default for GraphStoreConfig {
    fn default() -> Self {
        Self {
            backend_timeout_ms: 10_000,
            read_consistency: ConsistencyLevel::Quorum,
            write_consistency: ConsistencyLevel::Quorum,
            slow_update_ms: 2_000,
            large_graph_members: 150,
            blocked_ids: BTreeSet::new(),
        }
    }
}

impl GraphStoreConfig {
    #[must_use]
    pub const fn backend_timeout(&self) -> Duration {
        Duration::from_millis(self.backend_timeout_ms)
    }

    #[must_use]
    pub const fn slow_update(&self) -> Duration {
        Duration::from_millis(self.slow_update_ms)
    }

    pub fn validate(self) -> Result<Self, ValidationError> {
        if self.backend_timeout_ms == 0 {
            return Err(invalid("graph_store.backend_timeout_ms", "must be positive"));
        }
        if self.large_graph_members == 0 {
            return Err(invalid("graph_store.large_graph_members", "must be at least 1"));
        }
        Ok(self)
    }
}

/// Configuration for an outbound notifier worker.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct NotifierConfig {
    /// Max queued messages before new ones are dropped.
    pub queue_capacity: usize,
    /// Name of the draining thread.
    pub thread_name: String,
}

impl Default for NotifierConfig {
    fn default() -> Self {
        Self {
            queue_capacity: 4096,
            thread_name: "equivgraph-notifier".to_string(),
        }
    }
}

impl NotifierConfig {
    pub fn validate(self) -> Result<Self, ValidationError> {
        if self.queue_capacity == 0 {
            return Err(invalid("notifier.queue_capacity", "must be at least 1"));
        }
        if self.thread_name.trim().is_empty() {
            return Err(invalid("notifier.thread_name", "must not be empty"));
        }
        Ok(self)
    }
}

/// Configuration for the bounded equivalent-set resolver.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ResolverConfig {
    /// Maximum number of hops from the starting node, at most [`MAX_DEPTH`].
    pub max_depth: usize,
    /// Deadline for a whole traversal.
    pub timeout_ms: u64,
}

impl Default for ResolverConfig {
    fn default() -> Self {
        Self {
            max_depth: MAX_DEPTH,
            timeout_ms: 5_000,
        }
    }
}

impl ResolverConfig {
    #[must_use]
    pub const fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    pub fn validate(self) -> Result<Self, ValidationError> {
        if self.max_depth == 0 || self.max_depth > MAX_DEPTH {
            return Err(invalid("resolver.max_depth", "must be between 1 and 8"));
        }
        if self.timeout_ms == 0 {
            return Err(invalid("resolver.timeout_ms", "must be positive"));
        }
        Ok(self)
    }
}

/// All component configs, as loaded from a single TOML document.
///
/// # Examples
///
/// ```
/// use equivgraph::config::EquivConfig;
///
/// let cfg = EquivConfig::from_toml_str(
///     r#"
///     [lock]
///     max_attempts = 3
///
///     [graph_store]
///     blocked_ids = [42]
///     "#,
/// )
/// .unwrap();
/// assert_eq!(cfg.lock.max_attempts, 3);
/// assert_eq!(cfg.resolver.max_depth, 8);
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct EquivConfig {
    pub lock: LockConfig,
    pub graph_store: GraphStoreConfig,
    pub notifier: NotifierConfig,
    pub resolver: ResolverConfig,
}

impl EquivConfig {
    /// Parses and validates a TOML document.
    pub fn from_toml_str(input: &str) -> Result<Self, EquivError> {
        let cfg: Self = toml::from_str(input).map_err(|e| invalid("toml", e.message().to_string()))?;
        Ok(cfg.validate()?)
    }

    pub fn validate(self) -> Result<Self, ValidationError> {
        Ok(Self {
            lock: self.lock.validate()?,
            graph_store: self.graph_store.validate()?,
            notifier: self.notifier.validate()?,
            resolver: self.resolver.validate()?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_validate() {
        assert!(EquivConfig::default().validate().is_ok());
    }

    #[test]
    fn empty_document_yields_defaults() {
        let cfg = EquivConfig::from_toml_str("").unwrap();
        assert_eq!(cfg, EquivConfig::default());
    }

    #[test]
    fn partial_sections_keep_other_defaults() {
        let cfg = EquivConfig::from_toml_str(
            r#"
            [graph_store]
            read_consistency = "one"
            slow_update_ms = 500
            "#,
        )
        .unwrap();
        assert_eq!(cfg.graph_store.read_consistency, ConsistencyLevel::One);
        assert_eq!(cfg.graph_store.write_consistency, ConsistencyLevel::Quorum);
        assert_eq!(cfg.graph_store.slow_update(), Duration::from_millis(500));
        assert_eq!(cfg.graph_store.large_graph_members, 150);
    }

    #[test]
    fn zero_attempts_is_rejected() {
        let err = EquivConfig::from_toml_str("[lock]\nmax_attempts = 0\n").unwrap_err();
        assert!(err.is_validation());
        assert!(err.to_string().contains("max_attempts"));
    }

    #[test]
    fn malformed_toml_is_a_validation_error() {
        let err = EquivConfig::from_toml_str("[lock\n").unwrap_err();
        assert!(err.is_validation());
    }

    #[test]
    fn blocked_ids_parse_as_ids() {
        let cfg = EquivConfig::from_toml_str("[graph_store]\nblocked_ids = [3, 1]\n").unwrap();
        let ids: Vec<Id> = cfg.graph_store.blocked_ids.into_iter().collect();
        assert_eq!(ids, vec![Id::new(1), Id::new(3)]);
    }

    #[test]
    fn resolver_depth_cannot_exceed_the_hop_limit() {
        let err = EquivConfig::from_toml_str("[resolver]\nmax_depth = 9\n").unwrap_err();
        assert!(err.to_string().contains("max_depth"));
        assert!(EquivConfig::from_toml_str("[resolver]\nmax_depth = 8\n").is_ok());
    }
}
