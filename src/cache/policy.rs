//! Retention classes and their stale / garbage-collection windows.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// How long a class of data is trusted and kept.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RetentionClass {
    /// Ordinary reads. Stale after 5 minutes, evicted 10 minutes after the
    /// last subscriber leaves.
    #[default]
    Standard,
    /// Data that rarely changes (configuration, roles). 30 minutes / 1 hour.
    Static,
    /// Data kept current by realtime pushes (leads, devis, chantiers).
    /// Always stale, so every read after an invalidation re-fetches.
    /// Evicted 5 minutes after the last subscriber leaves.
    Live,
}

impl RetentionClass {
    pub fn as_str(&self) -> &'static str {
        match self {
            RetentionClass::Standard => "standard",
            RetentionClass::Static => "static",
            RetentionClass::Live => "live",
        }
    }
}

/// Stale and eviction windows for one retention class.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetentionPolicy {
    /// Age after which cached data is re-validated before being served.
    pub stale_time: Duration,
    /// Time an entry may sit without subscribers before it is evictable.
    pub gc_time: Duration,
}

impl RetentionPolicy {
    pub const fn new(stale_time: Duration, gc_time: Duration) -> Self {
        Self {
            stale_time,
            gc_time,
        }
    }
}

/// Retention windows for every class.
///
/// ```rust
/// # use tuile::{CacheConfig, RetentionClass, RetentionPolicy};
/// # use std::time::Duration;
/// let config = CacheConfig::new().policy_for(
///     RetentionClass::Live,
///     RetentionPolicy::new(Duration::ZERO, Duration::from_secs(60)),
/// );
/// assert_eq!(config.policy(RetentionClass::Live).gc_time, Duration::from_secs(60));
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheConfig {
    pub standard: RetentionPolicy,
    pub static_data: RetentionPolicy,
    pub live: RetentionPolicy,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            standard: RetentionPolicy::new(Duration::from_secs(5 * 60), Duration::from_secs(10 * 60)),
            static_data: RetentionPolicy::new(
                Duration::from_secs(30 * 60),
                Duration::from_secs(60 * 60),
            ),
            live: RetentionPolicy::new(Duration::ZERO, Duration::from_secs(5 * 60)),
        }
    }
}

impl CacheConfig {
    /// Create a config with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Policy for a retention class.
    pub fn policy(&self, class: RetentionClass) -> RetentionPolicy {
        match class {
            RetentionClass::Standard => self.standard,
            RetentionClass::Static => self.static_data,
            RetentionClass::Live => self.live,
        }
    }

    /// Override the policy of one class.
    pub fn policy_for(mut self, class: RetentionClass, policy: RetentionPolicy) -> Self {
        match class {
            RetentionClass::Standard => self.standard = policy,
            RetentionClass::Static => self.static_data = policy,
            RetentionClass::Live => self.live = policy,
        }
        self
    }
}
