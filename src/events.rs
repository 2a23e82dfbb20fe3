// Client event bus.
// Broadcasts auth outcomes so unrelated UI surfaces can react without owning retry logic.

use tokio::sync::broadcast;

const DEFAULT_BUFFER_SIZE: usize = 64;

/// Severity of a user-facing notification.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NotifyLevel {
    Info,
    Warn,
    Error,
}

/// Signals emitted by the request pipeline.
#[derive(Debug, Clone, PartialEq)]
pub enum ClientEvent {
    /// The backend reported a block condition. Raised instead of a session-expiry signal.
    AccountBlocked { message: String },
    /// The access token could not be refreshed.
    SessionExpired,
    /// The routing layer should show the login view.
    NavigateToLogin { reason: String },
    /// A human-readable message for the notification surface.
    Notify { level: NotifyLevel, message: String },
}

/// Multi-subscriber event bus backed by a tokio broadcast channel.
#[derive(Debug, Clone)]
pub struct EventBus {
    sender: broadcast::Sender<ClientEvent>,
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

impl EventBus {
    pub fn new() -> Self {
        let (sender, _) = broadcast::channel(DEFAULT_BUFFER_SIZE);
        Self { sender }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ClientEvent> {
        self.sender.subscribe()
    }

    /// Emit an event. Returns the number of subscribers that received it.
    pub fn emit(&self, event: ClientEvent) -> usize {
        self.sender.send(event).unwrap_or_default()
    }

    pub fn notify(&self, level: NotifyLevel, message: impl Into<String>) -> usize {
        self.emit(ClientEvent::Notify {
            level,
            message: message.into(),
        })
    }
}
