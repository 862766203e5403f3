//! Event bus for execution lifecycle events
//!
//! Pub/sub over a Tokio broadcast channel. Publishing never blocks and
//! never fails the caller: with no subscribers the event is dropped, and a
//! lagging subscriber loses the oldest events rather than slowing executors.

use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::debug;

use super::types::ExecutionEvent;

/// Channel capacity for broadcast
const CHANNEL_CAPACITY: usize = 256;

/// Shared reference to EventBus
pub type SharedEventBus = Arc<EventBus>;

/// Broadcast event bus
#[derive(Debug)]
pub struct EventBus {
    sender: broadcast::Sender<ExecutionEvent>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::with_capacity(CHANNEL_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    /// Create a shared reference to this event bus
    pub fn shared(self) -> SharedEventBus {
        Arc::new(self)
    }

    /// Publish an event to all subscribers
    pub fn publish(&self, event: ExecutionEvent) {
        let event_type = event.event_type();
        match self.sender.send(event) {
            Ok(receivers) => debug!(event_type, receivers, "Event published"),
            Err(_) => debug!(event_type, "Event published (no receivers)"),
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ExecutionEvent> {
        self.sender.subscribe()
    }

    /// Subscribe to events of a single task
    pub fn subscribe_task(&self, task_id: impl Into<String>) -> TaskReceiver {
        TaskReceiver {
            receiver: self.subscribe(),
            task_id: task_id.into(),
        }
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

/// Receiver that only yields one task's events
pub struct TaskReceiver {
    receiver: broadcast::Receiver<ExecutionEvent>,
    task_id: String,
}

impl TaskReceiver {
    /// Receive the next event for this task
    pub async fn recv(&mut self) -> Result<ExecutionEvent, broadcast::error::RecvError> {
        loop {
            let event = self.receiver.recv().await?;
            if event.task_id() == self.task_id {
                return Ok(event);
            }
        }
    }
}
