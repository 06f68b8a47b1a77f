use serde::Serialize;
use tokio::sync::broadcast;
use tracing::debug;

/// A named event published by an agent after a successful attempt.
#[derive(Debug, Clone, Serialize)]
pub struct BusEvent {
    /// Event name as configured in the agent's `emit_events`.
    pub name: String,
    /// JSON payload.
    pub payload: serde_json::Value,
}

/// Fire-and-forget event emission. Implementations must not block the caller.
pub trait EventBus: Send + Sync {
    /// Publish `payload` under `name`. Delivery failures are swallowed.
    fn emit(&self, name: &str, payload: serde_json::Value);
}

/// Event bus backed by a tokio broadcast channel.
pub struct BroadcastEventBus {
    tx: broadcast::Sender<BusEvent>,
}

impl BroadcastEventBus {
    /// Create a bus retaining at most `capacity` undelivered events per subscriber.
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx }
    }

    /// Subscribe to all future events.
    pub fn subscribe(&self) -> broadcast::Receiver<BusEvent> {
        self.tx.subscribe()
    }
}

impl Default for BroadcastEventBus {
    fn default() -> Self {
        Self::new(256)
    }
}

impl EventBus for BroadcastEventBus {
    fn emit(&self, name: &str, payload: serde_json::Value) {
        let event = BusEvent {
            name: name.to_string(),
            payload,
        };
        // No subscribers is not an error for a fire-and-forget bus.
        if self.tx.send(event).is_err() {
            debug!(event = %name, "Event emitted with no subscribers");
        }
    }
}

/// Bus that drops every event.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopEventBus;

impl EventBus for NoopEventBus {
    fn emit(&self, _name: &str, _payload: serde_json::Value) {}
}
