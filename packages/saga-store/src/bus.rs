//! Action channel shared by the gateway, `take` waiters and other observers.
//!
//! # Guarantees
//!
//! - **Ordered**: envelopes are received in the order they were emitted
//! - **At-most-once delivery**: slow receivers may miss envelopes
//! - **In-memory only**: actions are not persisted
//! - **No replay**: receivers only see envelopes emitted after they subscribed
//!
//! Effect routing does not rely on this channel: the router has its own
//! unbounded queue, fed by the gateway next to every emit here.

use tokio::sync::broadcast;

use crate::core::ActionEnvelope;

/// Default channel capacity for the action bus.
pub(crate) const DEFAULT_CAPACITY: usize = 10000;

/// Broadcast channel carrying correlated actions.
///
/// # Example
///
/// ```ignore
/// let bus = ActionBus::new();
/// let mut receiver = bus.subscribe();
///
/// bus.emit(ActionEnvelope::new(cid, Action::new("todos/fetch")));
///
/// let envelope = receiver.recv().await?;
/// assert_eq!(envelope.action_type(), "todos/fetch");
/// ```
#[derive(Clone)]
pub struct ActionBus {
    sender: broadcast::Sender<ActionEnvelope>,
}

impl ActionBus {
    /// Create a new action bus with default capacity.
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CAPACITY)
    }

    /// Create a new action bus with the specified capacity.
    ///
    /// The capacity determines how many envelopes can be buffered before
    /// slow receivers start lagging.
    pub fn with_capacity(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    /// Emit an envelope to all subscribers.
    ///
    /// Returns the number of receivers that received it.
    pub fn emit(&self, envelope: ActionEnvelope) -> usize {
        self.sender.send(envelope).unwrap_or(0)
    }

    /// Subscribe to envelopes emitted from now on.
    pub fn subscribe(&self) -> broadcast::Receiver<ActionEnvelope> {
        self.sender.subscribe()
    }

    /// Returns the number of active subscribers.
    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for ActionBus {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for ActionBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ActionBus")
            .field("subscriber_count", &self.subscriber_count())
            .finish()
    }
}
