//! Query result cache.
//!
//! ```text
//! CacheAside (get_or_compute, invalidate, invalidate_namespace, clear_all)
//!     ↓ derive_key(namespace, params) = "<namespace>:<sha256[..16] hex>"
//!     ↓
//!     ├─→ RedisCache      (SET EX / SCAN MATCH + DEL / FLUSHDB)
//!     └─→ InMemoryCache   (tests, local runs)
//! ```

pub mod aside;
pub mod backend;
pub mod key;
pub mod memory;
pub mod redis;

pub use aside::{CacheAside, CacheStats, SEARCH_NAMESPACE, STATS_NAMESPACE};
pub use backend::{CacheBackend, CacheError};
pub use key::{canonical_json, derive_key, stable_hash};
pub use memory::InMemoryCache;
pub use self::redis::RedisCache;
