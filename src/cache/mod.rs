// Response cache module.
// Holds GET responses in memory under canonical (path, query) keys.

pub mod key;
pub mod store;

pub use key::{cache_key, key_path};
pub use store::{CacheEntry, CacheStats, DEFAULT_MAX_ENTRIES, DEFAULT_TTL, ResponseCache};
