// Auth session state.
// In-memory session mirrored to durable storage under the keys the web clients use.

use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use chrono::{DateTime, Utc};

use crate::error::Result;

use super::kv::KeyValueStore;

pub const TOKEN_KEY: &str = "token";
pub const REFRESH_TOKEN_KEY: &str = "refreshToken";
pub const TOKEN_EXPIRY_KEY: &str = "tokenExpiry";
pub const REMEMBER_ME_KEY: &str = "rememberMe";

/// Credentials for the current user.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AuthSession {
    pub access_token: Option<String>,
    pub refresh_token: Option<String>,
    pub expiry: Option<DateTime<Utc>>,
    pub remember_me: bool,
}

impl AuthSession {
    pub fn is_logged_in(&self) -> bool {
        self.access_token.is_some()
    }

    /// Whether the access token has a known expiry in the past.
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expiry.is_some_and(|expiry| expiry <= now)
    }
}

/// Shared session with write-through persistence.
///
/// Mutations update the in-memory session first so later requests see the
/// change immediately, then write to the backing store.
pub struct SessionStore {
    session: RwLock<AuthSession>,
    store: Arc<dyn KeyValueStore>,
}

impl std::fmt::Debug for SessionStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionStore")
            .field("logged_in", &self.read().is_logged_in())
            .finish()
    }
}

impl SessionStore {
    /// Load the persisted session from `store`.
    pub fn load(store: Arc<dyn KeyValueStore>) -> Result<Self> {
        let expiry = store
            .get(TOKEN_EXPIRY_KEY)?
            .and_then(|v| v.parse::<i64>().ok())
            .and_then(DateTime::from_timestamp_millis);

        let session = AuthSession {
            access_token: store.get(TOKEN_KEY)?.filter(|t| !t.is_empty()),
            refresh_token: store.get(REFRESH_TOKEN_KEY)?.filter(|t| !t.is_empty()),
            expiry,
            remember_me: store.get(REMEMBER_ME_KEY)?.as_deref() == Some("true"),
        };

        Ok(Self {
            session: RwLock::new(session),
            store,
        })
    }

    fn read(&self) -> RwLockReadGuard<'_, AuthSession> {
        self.session.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, AuthSession> {
        self.session.write().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn snapshot(&self) -> AuthSession {
        self.read().clone()
    }

    pub fn access_token(&self) -> Option<String> {
        self.read().access_token.clone()
    }

    pub fn refresh_token(&self) -> Option<String> {
        self.read().refresh_token.clone()
    }

    pub fn is_logged_in(&self) -> bool {
        self.read().is_logged_in()
    }

    /// Replace the session after a successful login.
    pub fn store_login(
        &self,
        token: &str,
        refresh_token: Option<&str>,
        expiry: Option<DateTime<Utc>>,
        remember_me: bool,
    ) -> Result<()> {
        *self.write() = AuthSession {
            access_token: Some(token.to_string()),
            refresh_token: refresh_token.map(String::from),
            expiry,
            remember_me,
        };

        self.store.set(TOKEN_KEY, token)?;
        self.store.set(REMEMBER_ME_KEY, if remember_me { "true" } else { "false" })?;
        match refresh_token {
            Some(refresh) => self.store.set(REFRESH_TOKEN_KEY, refresh)?,
            None => self.store.remove(REFRESH_TOKEN_KEY)?,
        }
        self.persist_expiry(expiry)
    }

    /// Store a refreshed access token. A missing expiry keeps the previous one.
    pub fn store_refreshed(&self, token: &str, expiry: Option<DateTime<Utc>>) -> Result<()> {
        {
            let mut session = self.write();
            session.access_token = Some(token.to_string());
            if expiry.is_some() {
                session.expiry = expiry;
            }
        }

        self.store.set(TOKEN_KEY, token)?;
        if expiry.is_some() {
            self.persist_expiry(expiry)?;
        }
        Ok(())
    }

    /// Drop the access token only, keeping the refresh token.
    pub fn clear_access_token(&self) -> Result<()> {
        self.write().access_token = None;
        self.store.remove(TOKEN_KEY)
    }

    /// Drop every auth field (logout, blocked account).
    pub fn clear(&self) -> Result<()> {
        *self.write() = AuthSession::default();

        for key in [TOKEN_KEY, REMEMBER_ME_KEY, REFRESH_TOKEN_KEY, TOKEN_EXPIRY_KEY] {
            self.store.remove(key)?;
        }
        Ok(())
    }

    pub fn flush(&self) -> Result<()> {
        self.store.flush()
    }

    fn persist_expiry(&self, expiry: Option<DateTime<Utc>>) -> Result<()> {
        match expiry {
            Some(expiry) => self
                .store
                .set(TOKEN_EXPIRY_KEY, &expiry.timestamp_millis().to_string()),
            None => self.store.remove(TOKEN_EXPIRY_KEY),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::kv::MemoryStore;

    fn new_store() -> (Arc<MemoryStore>, SessionStore) {
        let backing = Arc::new(MemoryStore::new());
        let session = SessionStore::load(backing.clone()).unwrap();
        (backing, session)
    }

    #[test]
    fn test_load_empty() {
        let (_, session) = new_store();
        assert_eq!(session.snapshot(), AuthSession::default());
        assert!(!session.is_logged_in());
    }

    #[test]
    fn test_login_persists_all_fields() {
        let (backing, session) = new_store();
        let expiry = DateTime::from_timestamp_millis(1_900_000_000_000).unwrap();

        session
            .store_login("abc", Some("refresh-1"), Some(expiry), true)
            .unwrap();

        assert_eq!(backing.get(TOKEN_KEY).unwrap().as_deref(), Some("abc"));
        assert_eq!(
            backing.get(REFRESH_TOKEN_KEY).unwrap().as_deref(),
            Some("refresh-1")
        );
        assert_eq!(
            backing.get(TOKEN_EXPIRY_KEY).unwrap().as_deref(),
            Some("1900000000000")
        );
        assert_eq!(backing.get(REMEMBER_ME_KEY).unwrap().as_deref(), Some("true"));

        let reloaded = SessionStore::load(backing).unwrap();
        assert_eq!(reloaded.snapshot(), session.snapshot());
    }

    #[test]
    fn test_refresh_keeps_refresh_token() {
        let (_, session) = new_store();
        session.store_login("old", Some("r"), None, false).unwrap();
        session.store_refreshed("new", None).unwrap();

        let snapshot = session.snapshot();
        assert_eq!(snapshot.access_token.as_deref(), Some("new"));
        assert_eq!(snapshot.refresh_token.as_deref(), Some("r"));
    }

    #[test]
    fn test_clear_access_token_only() {
        let (backing, session) = new_store();
        session.store_login("abc", Some("r"), None, true).unwrap();
        session.clear_access_token().unwrap();

        assert_eq!(session.access_token(), None);
        assert_eq!(session.refresh_token().as_deref(), Some("r"));
        assert_eq!(backing.get(TOKEN_KEY).unwrap(), None);
    }

    #[test]
    fn test_clear_removes_everything() {
        let (backing, session) = new_store();
        session.store_login("abc", Some("r"), None, true).unwrap();
        session.clear().unwrap();

        assert_eq!(session.snapshot(), AuthSession::default());
        for key in [TOKEN_KEY, REMEMBER_ME_KEY, REFRESH_TOKEN_KEY, TOKEN_EXPIRY_KEY] {
            assert_eq!(backing.get(key).unwrap(), None);
        }
    }

    #[test]
    fn test_is_expired() {
        let now = Utc::now();
        let session = AuthSession {
            expiry: Some(now - chrono::Duration::seconds(1)),
            ..Default::default()
        };
        assert!(session.is_expired(now));
        assert!(!AuthSession::default().is_expired(now));
    }
}
