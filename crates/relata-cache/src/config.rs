//! Cache policy configuration and process-wide defaults

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use service_builder::builder;
use std::time::Duration;

/// Default time-to-live for cached relations
pub const DEFAULT_TTL: Duration = Duration::from_secs(300);

/// Default number of entries kept per relation
pub const DEFAULT_MAX_SIZE: usize = 1000;

/// Effective caching behaviour for one relation.
///
/// A `ttl` of `None` or zero never expires. A `max_size` of `None` or zero is
/// unbounded. Fields are read through the `get_*` getters and changed
/// through the `set_*` setters, or built with [`CachePolicyBuilder`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[builder]
pub struct CachePolicy {
    /// Whether results are cached at all
    #[builder(default = "true", getter, setter)]
    enabled: bool,

    /// Time to live for cached entries
    #[builder(default = "Some(Duration::from_secs(300))", getter, setter)]
    ttl: Option<Duration>,

    /// Maximum number of entries per relation
    #[builder(default = "Some(1000)", getter, setter)]
    max_size: Option<usize>,
}

impl Default for CachePolicy {
    fn default() -> Self {
        Self {
            enabled: true,
            ttl: Some(DEFAULT_TTL),
            max_size: Some(DEFAULT_MAX_SIZE),
        }
    }
}

impl CachePolicy {
    /// A policy that never stores anything
    pub fn disabled() -> Self {
        Self {
            enabled: false,
            ..Self::default()
        }
    }

    /// TTL that actually applies, with zero folded into "no expiry"
    pub fn effective_ttl(&self) -> Option<Duration> {
        self.ttl.filter(|ttl| !ttl.is_zero())
    }

    /// Size limit that actually applies, with zero folded into "unbounded"
    pub fn effective_max_size(&self) -> Option<usize> {
        self.max_size.filter(|max| *max > 0)
    }
}

impl CachePolicyBuilder {
    /// Entries never expire
    pub fn no_expiry(self) -> Self {
        self.ttl(None)
    }

    /// No limit on entries per relation
    pub fn unbounded(self) -> Self {
        self.max_size(None)
    }

    /// Short-lived, small caches for tests
    pub fn testing() -> Self {
        CachePolicyBuilder::new()
            .ttl(Some(Duration::from_millis(200)))
            .max_size(Some(16))
    }
}

/// Per-relation overrides of the process-wide defaults.
///
/// Every `None` falls back to the corresponding field of the defaults at the
/// moment the cache is used.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheOptions {
    pub enabled: Option<bool>,
    pub ttl: Option<Duration>,
    pub max_size: Option<usize>,
}

impl CacheOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn enabled(mut self, enabled: bool) -> Self {
        self.enabled = Some(enabled);
        self
    }

    /// Override the TTL. `Duration::ZERO` disables expiry for this relation.
    pub fn ttl(mut self, ttl: Duration) -> Self {
        self.ttl = Some(ttl);
        self
    }

    /// Override the size limit. Zero makes this relation unbounded.
    pub fn max_size(mut self, max_size: usize) -> Self {
        self.max_size = Some(max_size);
        self
    }

    /// Shorthand for `enabled(false)`
    pub fn disabled() -> Self {
        Self::new().enabled(false)
    }

    /// Merge these overrides over `defaults`
    pub fn resolve(&self, defaults: &CachePolicy) -> CachePolicy {
        CachePolicy {
            enabled: self.enabled.unwrap_or(defaults.enabled),
            ttl: self.ttl.or(defaults.ttl),
            max_size: self.max_size.or(defaults.max_size),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.enabled.is_none() && self.ttl.is_none() && self.max_size.is_none()
    }
}

impl From<CachePolicy> for CacheOptions {
    fn from(policy: CachePolicy) -> Self {
        Self {
            enabled: Some(policy.enabled),
            ttl: Some(policy.ttl.unwrap_or(Duration::ZERO)),
            max_size: Some(policy.max_size.unwrap_or(0)),
        }
    }
}

/// Process-wide cache defaults shared by every relation of a registry.
///
/// Passed explicitly into [`crate::CacheStore::new`]; changes are visible to
/// the next cache operation of every relation that did not override them.
#[derive(Debug, Default)]
pub struct CacheDefaults {
    policy: RwLock<CachePolicy>,
}

impl CacheDefaults {
    pub fn new(policy: CachePolicy) -> Self {
        Self {
            policy: RwLock::new(policy),
        }
    }

    /// Snapshot of the current defaults
    pub fn get(&self) -> CachePolicy {
        self.policy.read().clone()
    }

    /// Replace the defaults
    pub fn set(&self, policy: CachePolicy) {
        tracing::debug!(?policy, "updating cache defaults");
        *self.policy.write() = policy;
    }

    /// Modify the defaults in place
    pub fn update<F>(&self, f: F)
    where
        F: FnOnce(&mut CachePolicy),
    {
        let mut policy = self.policy.write();
        f(&mut policy);
        tracing::debug!(policy = ?*policy, "updated cache defaults");
    }
}
