use tokio::sync::broadcast::{self, Receiver, Sender};
use tracing::{debug, info, warn};

const BUFFER_SIZE: usize = 50;

/// Lifecycle events for notification collaborators (e.g. email dispatch).
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum DomainEvent {
    /// `reset_url` contains the secret token; subscribers must not log it.
    PasswordResetRequested { user_id: String, reset_url: String },
    PasswordChanged { user_id: String },
}

impl DomainEvent {
    pub fn name(&self) -> &'static str {
        match self {
            DomainEvent::PasswordResetRequested { .. } => "user-password-reset",
            DomainEvent::PasswordChanged { .. } => "user-password-change",
        }
    }

    pub fn user_id(&self) -> &str {
        match self {
            DomainEvent::PasswordResetRequested { user_id, .. } => user_id,
            DomainEvent::PasswordChanged { user_id } => user_id,
        }
    }
}

#[derive(Clone, Debug)]
pub struct EventPublisher {
    sender: Sender<DomainEvent>,
}

impl EventPublisher {
    pub fn new() -> Self {
        let (sender, _) = broadcast::channel(BUFFER_SIZE);
        Self { sender }
    }

    pub fn subscribe(&self) -> Receiver<DomainEvent> {
        self.sender.subscribe()
    }

    /// Having no subscriber is not an error.
    pub fn publish(&self, event: DomainEvent) {
        let name = event.name();
        match self.sender.send(event) {
            Ok(receivers) => debug!("event {} delivered to {} subscribers", name, receivers),
            Err(_) => debug!("event {} dropped, no subscribers", name),
        }
    }
}

impl Default for EventPublisher {
    fn default() -> Self {
        Self::new()
    }
}

/// Logs every event without its secret parts until the channel closes.
pub async fn log_events(mut receiver: Receiver<DomainEvent>) -> anyhow::Result<()> {
    loop {
        match receiver.recv().await {
            Ok(event) => info!(event = event.name(), user_id = event.user_id(), "domain event"),
            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                warn!("event listener lagged, {} events skipped", skipped)
            }
            Err(broadcast::error::RecvError::Closed) => return Ok(()),
        }
    }
}
