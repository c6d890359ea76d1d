//! # relata-cache
//!
//! The in-memory cache behind relata's relation resolution.
//!
//! ## Features
//!
//! - **Scoped entries**: values are addressed by a scope (one relation of one
//!   entity type) and an owner (one entity instance)
//! - **TTL support**: entries expire once their age reaches the policy TTL
//! - **Bounded scopes**: a full scope drops its oldest insertions first
//! - **Live defaults**: per-scope overrides fall back to process-wide defaults
//!   read at the moment of use
//!
//! ## Quick Start
//!
//! ```rust
//! use relata_cache::{CacheDefaults, CacheKey, CacheOptions, CacheStore};
//! use std::sync::Arc;
//! use std::time::Duration;
//!
//! let defaults = Arc::new(CacheDefaults::default());
//! let store: CacheStore<&str, u64, Arc<String>> = CacheStore::new(defaults);
//!
//! let policy = store.policy_for(&CacheOptions::new().ttl(Duration::from_secs(60)));
//! store.set(CacheKey::new("User.posts", 1), Arc::new("cached".to_string()), &policy);
//!
//! let hit = store.get(&CacheKey::new("User.posts", 1), &policy);
//! assert_eq!(hit.as_deref().map(String::as_str), Some("cached"));
//! ```

pub mod config;
pub mod stats;
pub mod store;

pub use config::*;
pub use stats::CacheStats;
pub use store::*;
