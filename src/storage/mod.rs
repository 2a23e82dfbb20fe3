// Persisted client state.
// Key-value storage, the auth session and local search history.

pub mod history;
pub mod kv;
pub mod paths;
pub mod session;

pub use history::{HistoryUpdate, MAX_HISTORY, SearchHistory, SearchHistoryItem};
pub use kv::{FileStore, KeyValueStore, MemoryStore};
pub use session::{AuthSession, SessionStore};
