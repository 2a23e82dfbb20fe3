// Auth interceptor.
// Attaches token and CSRF headers, detects blocked accounts and runs single-flight token refresh.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use chrono::{DateTime, Utc};
use reqwest::{
    StatusCode,
    header::{HeaderMap, HeaderName, HeaderValue},
};
use serde_json::Value;
use tokio::sync::oneshot;
use tracing::{debug, info, warn};

use crate::config::ClientConfig;
use crate::error::{ClientError, Result};
use crate::events::{ClientEvent, EventBus, NotifyLevel};
use crate::storage::SessionStore;

use super::blocked::BlockDetector;
use super::request::RequestDescriptor;
use super::transport::{HttpReply, Transport};

type RefreshOutcome = Result<String>;

/// What the pipeline should do after a failed reply.
#[derive(Debug)]
pub enum Recovery {
    /// Send the request again with this token. The descriptor is marked as retried.
    ///
    /// Requests that joined a refresh carry a turn: the replay must wait for
    /// it, and drop it once the replay has been sent.
    Replay {
        token: String,
        turn: Option<ReplayTurn>,
    },
    Fail(ClientError),
}

/// Position of one request in the replay order of a refresh round.
///
/// The leader holds the first turn. Each later turn opens when the one
/// before it is dropped.
#[derive(Debug)]
pub struct ReplayTurn {
    previous: Option<oneshot::Receiver<()>>,
    _done: oneshot::Sender<()>,
}

impl ReplayTurn {
    /// Wait until the request ahead has been sent. Cancel-safe.
    pub async fn ready(&mut self) {
        if let Some(previous) = self.previous.as_mut() {
            // The sender never sends; a drop is the signal
            let _ = previous.await;
            self.previous = None;
        }
    }

    pub fn is_ready(&self) -> bool {
        self.previous.is_none()
    }
}

/// Single-flight bookkeeping for token refresh.
#[derive(Debug, Default)]
struct RefreshState {
    in_progress: bool,
    waiters: VecDeque<oneshot::Sender<RefreshOutcome>>,
    /// Opens once the most recently issued turn of this round is dropped.
    last_turn: Option<oneshot::Receiver<()>>,
}

impl RefreshState {
    /// Issue the next turn of the current round.
    fn next_turn(&mut self) -> ReplayTurn {
        let (done, opened) = oneshot::channel();
        ReplayTurn {
            previous: self.last_turn.replace(opened),
            _done: done,
        }
    }
}

/// Either lead a new refresh or wait for the one in progress.
enum RefreshRole {
    Leader,
    Waiter(oneshot::Receiver<RefreshOutcome>),
}

pub struct AuthInterceptor {
    config: Arc<ClientConfig>,
    session: Arc<SessionStore>,
    events: EventBus,
    detector: BlockDetector,
    refresh: Arc<Mutex<RefreshState>>,
}

/// Releases the refresh slot even if the leading future is dropped mid-flight.
struct RefreshSlot {
    state: Arc<Mutex<RefreshState>>,
    settled: bool,
}

impl RefreshSlot {
    /// Clear the in-progress mark, then release waiters in enqueue order.
    fn settle(mut self, outcome: &RefreshOutcome) {
        self.release(outcome);
        self.settled = true;
    }

    fn release(&self, outcome: &RefreshOutcome) {
        let waiters = {
            let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
            state.in_progress = false;
            state.last_turn = None;
            std::mem::take(&mut state.waiters)
        };
        debug!(waiters = waiters.len(), ok = outcome.is_ok(), "Token refresh settled");
        for waiter in waiters {
            let _ = waiter.send(outcome.clone());
        }
    }
}

impl Drop for RefreshSlot {
    fn drop(&mut self) {
        if !self.settled {
            self.release(&Err(ClientError::Aborted("token refresh cancelled".into())));
        }
    }
}

impl AuthInterceptor {
    pub fn new(config: Arc<ClientConfig>, session: Arc<SessionStore>, events: EventBus) -> Self {
        let detector = BlockDetector::new(&config.auth.blocked_phrases);
        Self {
            config,
            session,
            events,
            detector,
            refresh: Arc::new(Mutex::new(RefreshState::default())),
        }
    }

    fn lock_refresh(&self) -> MutexGuard<'_, RefreshState> {
        self.refresh.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Whether a refresh call is currently outstanding.
    pub fn is_refreshing(&self) -> bool {
        self.lock_refresh().in_progress
    }

    /// Attach auth and CSRF headers. Returns the token that was attached.
    ///
    /// `token` overrides the session token, used when replaying after refresh.
    pub fn apply(
        &self,
        headers: &mut HeaderMap,
        transport: &Transport,
        token: Option<String>,
    ) -> Result<Option<String>> {
        let token = token.or_else(|| self.session.access_token());
        if let Some(token) = &token {
            let name = header_name(&self.config.auth.access_header)?;
            let value = format!("{} {}", self.config.auth.access_prefix, token);
            headers.insert(name, HeaderValue::from_str(&value)?);
        }
        self.apply_csrf(headers, transport)?;
        Ok(token)
    }

    fn apply_csrf(&self, headers: &mut HeaderMap, transport: &Transport) -> Result<()> {
        if !self.config.auth.use_csrf {
            return Ok(());
        }
        if let Some(csrf) = transport.cookie(&self.config.auth.csrf_cookie) {
            let name = header_name(&self.config.auth.csrf_header)?;
            headers.insert(name, HeaderValue::from_str(&csrf)?);
        }
        Ok(())
    }

    /// Decide how to handle a failed reply.
    pub async fn recover(
        &self,
        transport: &Transport,
        req: &mut RequestDescriptor,
        reply: HttpReply,
        sent_token: Option<&str>,
    ) -> Recovery {
        if let Some(message) = self.detector.detect(reply.status, &reply.body) {
            return Recovery::Fail(self.handle_blocked(message));
        }

        if reply.status != StatusCode::UNAUTHORIZED {
            return Recovery::Fail(reply.into_error());
        }

        if !req.begin_refresh() {
            warn!(path = %req.path, "Replayed request rejected again, not refreshing");
            return Recovery::Fail(reply.into_error());
        }

        // A refresh that finished after this request went out already fixed the token
        if let Some(current) = self.session.access_token() {
            if sent_token != Some(current.as_str()) {
                debug!(path = %req.path, "Token changed since send, replaying");
                req.mark_retried();
                return Recovery::Replay {
                    token: current,
                    turn: None,
                };
            }
        }

        let (outcome, turn) = self.join_refresh(transport).await;
        match outcome {
            Ok(token) => {
                req.mark_retried();
                Recovery::Replay {
                    token,
                    turn: Some(turn),
                }
            }
            Err(err) => Recovery::Fail(err),
        }
    }

    /// Obtain a fresh access token, joining a refresh already in progress.
    pub async fn refresh_token(&self, transport: &Transport) -> RefreshOutcome {
        let (outcome, _turn) = self.join_refresh(transport).await;
        outcome
    }

    /// Lead or join the current refresh round and take the next replay turn.
    async fn join_refresh(&self, transport: &Transport) -> (RefreshOutcome, ReplayTurn) {
        let (role, turn) = {
            let mut state = self.lock_refresh();
            if state.in_progress {
                let (tx, rx) = oneshot::channel();
                state.waiters.push_back(tx);
                (RefreshRole::Waiter(rx), state.next_turn())
            } else {
                state.in_progress = true;
                state.last_turn = None;
                (RefreshRole::Leader, state.next_turn())
            }
        };

        let outcome = match role {
            RefreshRole::Waiter(rx) => {
                debug!("Waiting for in-progress token refresh");
                rx.await.unwrap_or_else(|_| {
                    Err(ClientError::Aborted("token refresh dropped".into()))
                })
            }
            RefreshRole::Leader => {
                let slot = RefreshSlot {
                    state: Arc::clone(&self.refresh),
                    settled: false,
                };
                let outcome = self.perform_refresh(transport).await;
                slot.settle(&outcome);
                outcome
            }
        };
        (outcome, turn)
    }

    async fn perform_refresh(&self, transport: &Transport) -> RefreshOutcome {
        let Some(refresh_token) = self.session.refresh_token() else {
            return Err(self.handle_refresh_failure(ClientError::AuthExpired(
                "no refresh token available".into(),
            )));
        };

        info!("Refreshing access token");
        let req = RequestDescriptor::post(&self.config.auth.refresh_endpoint)
            .form(vec![("refresh_token".to_string(), refresh_token)]);
        let mut headers = HeaderMap::new();
        if let Err(e) = self.apply_csrf(&mut headers, transport) {
            return Err(self.handle_refresh_failure(e));
        }

        let reply = match transport.send(&req, &headers).await {
            Ok(reply) => reply,
            Err(e) => return Err(self.handle_refresh_failure(e)),
        };

        if !reply.is_success() {
            if let Some(message) = self.detector.detect(reply.status, &reply.body) {
                return Err(self.handle_blocked(message));
            }
            return Err(self.handle_refresh_failure(reply.into_error()));
        }

        let Some(token) = extract_token(&reply.body) else {
            return Err(self.handle_refresh_failure(ClientError::AuthExpired(
                "no access token in refresh response".into(),
            )));
        };

        if let Err(e) = self.session.store_refreshed(&token, extract_expiry(&reply.body)) {
            // The in-memory session already holds the new token
            warn!(error = %e, "Failed to persist refreshed token");
        }
        info!("Access token refreshed");
        Ok(token)
    }

    fn handle_refresh_failure(&self, err: ClientError) -> ClientError {
        warn!(error = %err, "Token refresh failed");
        if let Err(e) = self.session.clear_access_token() {
            warn!(error = %e, "Failed to clear stored access token");
        }

        self.events.emit(ClientEvent::SessionExpired);
        self.events
            .notify(NotifyLevel::Error, "Your session has expired, please log in again");
        self.events.emit(ClientEvent::NavigateToLogin {
            reason: "session expired".into(),
        });

        match err {
            ClientError::AuthExpired(_) => err,
            other => ClientError::AuthExpired(other.to_string()),
        }
    }

    /// Clear every auth field and raise the blocked signal. Never refreshes.
    fn handle_blocked(&self, message: String) -> ClientError {
        warn!(message = %message, "Account blocked, clearing session");
        if let Err(e) = self.session.clear() {
            warn!(error = %e, "Failed to clear stored session");
        }

        self.events.emit(ClientEvent::AccountBlocked {
            message: message.clone(),
        });
        self.events.emit(ClientEvent::NavigateToLogin {
            reason: "account blocked".into(),
        });
        ClientError::AccountBlocked(message)
    }
}

fn header_name(name: &str) -> Result<HeaderName> {
    HeaderName::from_bytes(name.as_bytes()).map_err(|e| ClientError::InvalidHeader(e.to_string()))
}

/// Token from `access`, `access_token` or `token`.
fn extract_token(body: &Value) -> Option<String> {
    ["access", "access_token", "token"]
        .iter()
        .find_map(|field| body.get(*field).and_then(Value::as_str))
        .filter(|token| !token.is_empty())
        .map(String::from)
}

/// Expiry from `tokenExpiry` (unix ms) or `expiresIn` / `expires_in` (seconds from now).
fn extract_expiry(body: &Value) -> Option<DateTime<Utc>> {
    if let Some(ms) = body.get("tokenExpiry").and_then(Value::as_i64) {
        return DateTime::from_timestamp_millis(ms);
    }
    ["expiresIn", "expires_in"]
        .iter()
        .find_map(|field| body.get(*field).and_then(Value::as_i64))
        .map(|secs| Utc::now() + chrono::Duration::seconds(secs))
}
