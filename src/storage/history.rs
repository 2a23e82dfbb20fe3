// Local search history.
// Most-recent-first list of queries with per-query counters, capped at 30 entries.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::error::Result;

use super::kv::KeyValueStore;

pub const HISTORY_KEY: &str = "mediacms_search_history";

/// Maximum number of remembered queries.
pub const MAX_HISTORY: usize = 30;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchHistoryItem {
    pub id: i64,
    pub query: String,
    pub search_count: u32,
    pub last_searched: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
}

/// Outcome of [`SearchHistory::add`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HistoryUpdate {
    Empty,
    Added,
    Incremented,
}

pub struct SearchHistory {
    store: Arc<dyn KeyValueStore>,
    /// Held across each read-modify-write of the stored list.
    write_lock: Mutex<()>,
}

impl SearchHistory {
    pub fn new(store: Arc<dyn KeyValueStore>) -> Self {
        Self {
            store,
            write_lock: Mutex::new(()),
        }
    }

    fn lock(&self) -> MutexGuard<'_, ()> {
        self.write_lock.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Load the stored history. A corrupt entry reads as empty.
    pub fn list(&self) -> Result<Vec<SearchHistoryItem>> {
        let Some(raw) = self.store.get(HISTORY_KEY)? else {
            return Ok(Vec::new());
        };
        match serde_json::from_str(&raw) {
            Ok(items) => Ok(items),
            Err(e) => {
                warn!(error = %e, "Discarding unreadable search history");
                Ok(Vec::new())
            }
        }
    }

    /// Record a query. Repeats (case-insensitive) bump the counter and move to the front.
    pub fn add(&self, query: &str) -> Result<HistoryUpdate> {
        self.add_at(query, Utc::now())
    }

    fn add_at(&self, query: &str, now: DateTime<Utc>) -> Result<HistoryUpdate> {
        let query = query.trim();
        if query.is_empty() {
            return Ok(HistoryUpdate::Empty);
        }

        let _guard = self.lock();
        let mut items = self.list()?;
        let lowered = query.to_lowercase();

        let update = match items
            .iter()
            .position(|item| item.query.to_lowercase() == lowered)
        {
            Some(index) => {
                let mut item = items.remove(index);
                item.search_count += 1;
                item.last_searched = now;
                items.insert(0, item);
                HistoryUpdate::Incremented
            }
            None => {
                items.insert(
                    0,
                    SearchHistoryItem {
                        id: now.timestamp_millis(),
                        query: query.to_string(),
                        search_count: 1,
                        last_searched: now,
                        created_at: now,
                    },
                );
                HistoryUpdate::Added
            }
        };

        items.truncate(MAX_HISTORY);
        self.save(&items)?;
        Ok(update)
    }

    /// Remove one query. Returns whether it was present.
    pub fn remove(&self, query: &str) -> Result<bool> {
        let lowered = query.trim().to_lowercase();
        let _guard = self.lock();
        let mut items = self.list()?;
        let before = items.len();
        items.retain(|item| item.query.to_lowercase() != lowered);
        if items.len() == before {
            return Ok(false);
        }
        self.save(&items)?;
        Ok(true)
    }

    pub fn clear(&self) -> Result<()> {
        let _guard = self.lock();
        self.store.remove(HISTORY_KEY)
    }

    fn save(&self, items: &[SearchHistoryItem]) -> Result<()> {
        self.store.set(HISTORY_KEY, &serde_json::to_string(items)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::kv::MemoryStore;

    fn history() -> SearchHistory {
        SearchHistory::new(Arc::new(MemoryStore::new()))
    }

    #[test]
    fn test_blank_query_ignored() {
        let history = history();
        assert_eq!(history.add("   ").unwrap(), HistoryUpdate::Empty);
        assert!(history.list().unwrap().is_empty());
    }

    #[test]
    fn test_repeat_increments_and_moves_to_front() {
        let history = history();
        history.add("cats").unwrap();
        history.add("dogs").unwrap();
        assert_eq!(history.add("CATS").unwrap(), HistoryUpdate::Incremented);

        let items = history.list().unwrap();
        assert_eq!(items.len(), 2);
        assert_eq!(items[0].query, "cats");
        assert_eq!(items[0].search_count, 2);
        assert_eq!(items[1].query, "dogs");
        assert_eq!(items[1].search_count, 1);
    }

    #[test]
    fn test_capped_at_thirty_most_recent_first() {
        let history = history();
        for i in 0..45 {
            history.add(&format!("query {}", i)).unwrap();
        }

        let items = history.list().unwrap();
        assert_eq!(items.len(), MAX_HISTORY);
        assert_eq!(items[0].query, "query 44");
        assert_eq!(items[MAX_HISTORY - 1].query, "query 15");
    }

    #[test]
    fn test_query_is_trimmed() {
        let history = history();
        history.add("  sunset  ").unwrap();
        assert_eq!(history.list().unwrap()[0].query, "sunset");
    }

    #[test]
    fn test_remove_and_clear() {
        let history = history();
        history.add("a").unwrap();
        history.add("b").unwrap();

        assert!(history.remove("A").unwrap());
        assert!(!history.remove("missing").unwrap());
        assert_eq!(history.list().unwrap().len(), 1);

        history.clear().unwrap();
        assert!(history.list().unwrap().is_empty());
    }

    #[test]
    fn test_concurrent_adds_keep_every_count() {
        let history = history();
        std::thread::scope(|scope| {
            for i in 0..50 {
                let history = &history;
                scope.spawn(move || history.add(&format!("query {}", i % 20)).unwrap());
            }
        });

        let items = history.list().unwrap();
        assert_eq!(items.len(), 20);
        let total: u32 = items.iter().map(|item| item.search_count).sum();
        assert_eq!(total, 50);
    }

    #[test]
    fn test_corrupt_history_reads_empty() {
        let store = Arc::new(MemoryStore::new());
        store.set(HISTORY_KEY, "[{").unwrap();
        let history = SearchHistory::new(store);
        assert!(history.list().unwrap().is_empty());
        history.add("fresh").unwrap();
        assert_eq!(history.list().unwrap().len(), 1);
    }
}
