// API client context.
// Owns the transport, auth interceptor, response cache, in-flight map and session for one backend.

use std::sync::Arc;

use reqwest::header::HeaderMap;
use serde::de::DeserializeOwned;
use serde_json::Value;
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

use crate::cache::{CacheStats, ResponseCache};
use crate::config::ClientConfig;
use crate::error::{ClientError, Result};
use crate::events::{ClientEvent, EventBus, NotifyLevel};
use crate::storage::{KeyValueStore, SearchHistory, SessionStore};

use super::auth::{AuthInterceptor, Recovery, ReplayTurn};
use super::dedup::InFlight;
use super::request::RequestDescriptor;
use super::transport::Transport;

struct ClientInner {
    config: Arc<ClientConfig>,
    transport: Transport,
    auth: AuthInterceptor,
    cache: ResponseCache<Value>,
    in_flight: InFlight<Value>,
    session: Arc<SessionStore>,
    history: SearchHistory,
    events: EventBus,
}

/// Request pipeline bound to one backend. Cheap to clone.
#[derive(Clone)]
pub struct ApiClient {
    inner: Arc<ClientInner>,
}

impl ApiClient {
    /// Build the pipeline and load the persisted session from `store`.
    pub fn init(config: ClientConfig, store: Arc<dyn KeyValueStore>) -> Result<Self> {
        config.validate()?;
        let config = Arc::new(config);
        let events = EventBus::new();
        let session = Arc::new(SessionStore::load(Arc::clone(&store))?);
        let transport = Transport::new(Arc::clone(&config))?;
        let auth = AuthInterceptor::new(Arc::clone(&config), Arc::clone(&session), events.clone());
        let cache = ResponseCache::new(config.cache.ttl(), config.cache.max_entries);

        info!(
            base_url = %config.base_url,
            logged_in = session.is_logged_in(),
            "API client initialised"
        );

        Ok(Self {
            inner: Arc::new(ClientInner {
                transport,
                auth,
                cache,
                in_flight: InFlight::new(),
                session,
                history: SearchHistory::new(store),
                events,
                config,
            }),
        })
    }

    /// Drop cached and pending responses and flush persisted state.
    pub fn teardown(&self) -> Result<()> {
        self.inner.cache.clear();
        self.inner.in_flight.clear();
        self.inner.session.flush()?;
        debug!("API client torn down");
        Ok(())
    }

    pub fn config(&self) -> &ClientConfig {
        &self.inner.config
    }

    pub fn session(&self) -> &SessionStore {
        &self.inner.session
    }

    pub fn history(&self) -> &SearchHistory {
        &self.inner.history
    }

    pub fn cache(&self) -> &ResponseCache<Value> {
        &self.inner.cache
    }

    pub fn cache_stats(&self) -> CacheStats {
        self.inner.cache.stats()
    }

    pub fn in_flight(&self) -> &InFlight<Value> {
        &self.inner.in_flight
    }

    pub fn events(&self) -> &EventBus {
        &self.inner.events
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ClientEvent> {
        self.inner.events.subscribe()
    }

    pub fn is_logged_in(&self) -> bool {
        self.inner.session.is_logged_in()
    }

    /// Force a token refresh, joining one already in progress.
    pub async fn refresh_token(&self) -> Result<String> {
        self.inner.auth.refresh_token(&self.inner.transport).await
    }

    /// Run a request through the pipeline and return the response body.
    ///
    /// Reads go through the cache and the deduplicator. Writes bypass both
    /// and invalidate cached entries under their path.
    pub async fn request(&self, req: RequestDescriptor) -> Result<Value> {
        if req.is_read() {
            self.read(req).await
        } else {
            self.write(req).await
        }
    }

    /// Deserialize the body of a request into `T`.
    pub async fn request_json<T: DeserializeOwned>(&self, req: RequestDescriptor) -> Result<T> {
        let body = self.request(req).await?;
        Ok(serde_json::from_value(body)?)
    }

    async fn read(&self, req: RequestDescriptor) -> Result<Value> {
        let cacheable = self.inner.config.cache.enabled && req.use_cache;
        let cache_key = req.cache_key();

        if cacheable {
            if let Some(cached) = self.inner.cache.get(&cache_key) {
                debug!(key = %cache_key, "Cache hit");
                return Ok(cached);
            }
        }

        let client = self.clone();
        self.inner
            .in_flight
            .dedupe(&req.dedup_key(), move || async move {
                let body = client.execute(req).await?;
                if cacheable {
                    client.inner.cache.set(cache_key, body.clone(), None);
                }
                Ok(body)
            })
            .await
    }

    async fn write(&self, req: RequestDescriptor) -> Result<Value> {
        let path = req.path.clone();
        let body = self.execute(req).await?;

        if self.inner.config.cache.invalidate_on_write {
            let prefix = path.trim_end_matches('/');
            let dropped = self.inner.cache.invalidate_prefix(prefix);
            if dropped > 0 {
                debug!(path = %prefix, dropped = dropped, "Invalidated cached responses");
            }
        }
        Ok(body)
    }

    /// Send with auth, classify the reply and replay once after a refresh.
    async fn execute(&self, mut req: RequestDescriptor) -> Result<Value> {
        let inner = &self.inner;
        let mut token_override = None;
        let mut turn: Option<ReplayTurn> = None;

        loop {
            // Replays after a shared refresh go out in the order their requests joined it
            if let Some(turn) = turn.as_mut() {
                turn.ready().await;
            }

            let mut headers = HeaderMap::new();
            let sent_token = inner
                .auth
                .apply(&mut headers, &inner.transport, token_override.take())?;
            req.mark_sent();

            let sent = inner.transport.send(&req, &headers).await;
            // Releases the next replay in line
            drop(turn.take());

            let reply = match sent {
                Ok(reply) => reply,
                Err(e) => {
                    req.settle();
                    return Err(self.report(&req, e));
                }
            };

            if reply.is_success() {
                req.settle();
                return Ok(reply.body);
            }

            match inner
                .auth
                .recover(&inner.transport, &mut req, reply, sent_token.as_deref())
                .await
            {
                Recovery::Replay {
                    token,
                    turn: replay_turn,
                } => {
                    debug!(path = %req.path, "Replaying request with refreshed token");
                    token_override = Some(token);
                    turn = replay_turn;
                }
                Recovery::Fail(e) => {
                    req.settle();
                    return Err(self.report(&req, e));
                }
            }
        }
    }

    /// Log a failed request and raise a notification for it.
    ///
    /// Auth outcomes already emit their own signals.
    fn report(&self, req: &RequestDescriptor, err: ClientError) -> ClientError {
        match &err {
            ClientError::AuthExpired(_) | ClientError::AccountBlocked(_) => {
                debug!(method = %req.method, path = %req.path, error = %err, "Request rejected");
            }
            ClientError::ValidationFailed(_) => {
                self.inner.events.notify(NotifyLevel::Warn, err.user_message());
            }
            _ => {
                warn!(method = %req.method, path = %req.path, error = %err, "Request failed");
                self.inner.events.notify(NotifyLevel::Error, err.user_message());
            }
        }
        err
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemoryStore;

    fn client() -> ApiClient {
        ApiClient::init(ClientConfig::default(), Arc::new(MemoryStore::new())).unwrap()
    }

    #[test]
    fn test_init_loads_persisted_session() {
        let store = Arc::new(MemoryStore::new());
        store.set("token", "persisted").unwrap();

        let client = ApiClient::init(ClientConfig::default(), store).unwrap();
        assert!(client.is_logged_in());
        assert_eq!(client.session().access_token().as_deref(), Some("persisted"));
    }

    #[test]
    fn test_init_rejects_invalid_config() {
        let config = ClientConfig::new("");
        assert!(ApiClient::init(config, Arc::new(MemoryStore::new())).is_err());
    }

    #[test]
    fn test_teardown_clears_cache() {
        let client = client();
        client
            .cache()
            .set("/v1/media", serde_json::json!({"count": 0}), None);
        client.teardown().unwrap();
        assert!(client.cache().is_empty());
        assert!(client.in_flight().is_empty());
    }

    #[tokio::test]
    async fn test_cached_read_skips_network() {
        let client = client();
        let req = RequestDescriptor::get("/v1/media").query("page", 1);
        client
            .cache()
            .set(req.cache_key(), serde_json::json!({"count": 3}), None);

        // Nothing listens on the default base URL; a hit never touches it
        let body = client.request(req).await.unwrap();
        assert_eq!(body["count"], 3);
        assert_eq!(client.cache_stats().hits, 1);
    }
}
