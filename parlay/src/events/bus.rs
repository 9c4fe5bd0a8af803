//! Event bus for floor-control updates
//!
//! Pub/sub over a Tokio broadcast channel. Viewers subscribe and may narrow
//! the stream to one session or a set of event types.

use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::debug;

use super::types::FloorEvent;
use crate::floor::SessionId;

/// Default channel capacity for broadcast
pub const DEFAULT_CHANNEL_CAPACITY: usize = 256;

/// Shared reference to EventBus
pub type SharedEventBus = Arc<EventBus>;

/// Event bus with broadcast channels
#[derive(Debug)]
pub struct EventBus {
    sender: broadcast::Sender<FloorEvent>,
}

impl EventBus {
    /// Create a new event bus with the default capacity
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CHANNEL_CAPACITY)
    }

    /// Create an event bus buffering up to `capacity` events per subscriber
    pub fn with_capacity(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    /// Create a shared reference to this event bus
    pub fn shared(self) -> SharedEventBus {
        Arc::new(self)
    }

    /// Publish an event to all subscribers
    pub fn publish(&self, event: FloorEvent) {
        let event_type = event.event_type();
        let session_id = event.session_id();

        // Broadcast to subscribers (ignore if no receivers)
        match self.sender.send(event) {
            Ok(count) => {
                debug!(event_type, %session_id, receivers = count, "Event published");
            }
            Err(_) => {
                debug!(event_type, %session_id, "Event published (no receivers)");
            }
        }
    }

    /// Subscribe to receive events
    pub fn subscribe(&self) -> broadcast::Receiver<FloorEvent> {
        self.sender.subscribe()
    }

    /// Get the number of current subscribers
    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }

    /// Check if the bus has any subscribers
    pub fn has_subscribers(&self) -> bool {
        self.sender.receiver_count() > 0
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

/// Event filter for selective subscription
#[derive(Debug, Clone, Default)]
pub struct EventFilter {
    /// Filter by session
    pub session_id: Option<SessionId>,
    /// Filter by event types
    pub event_types: Option<Vec<String>>,
}

impl EventFilter {
    /// Create a new empty filter (matches all events)
    pub fn new() -> Self {
        Self::default()
    }

    /// Filter by session
    pub fn session(mut self, session_id: SessionId) -> Self {
        self.session_id = Some(session_id);
        self
    }

    /// Filter by event types
    pub fn types(mut self, event_types: Vec<&str>) -> Self {
        self.event_types = Some(event_types.into_iter().map(String::from).collect());
        self
    }

    /// Check if an event matches this filter
    pub fn matches(&self, event: &FloorEvent) -> bool {
        if self.session_id.is_some_and(|sid| sid != event.session_id()) {
            return false;
        }

        if let Some(ref types) = self.event_types {
            if !types.iter().any(|t| t == event.event_type()) {
                return false;
            }
        }

        true
    }
}

/// Filtered event receiver that only yields matching events
pub struct FilteredReceiver {
    receiver: broadcast::Receiver<FloorEvent>,
    filter: EventFilter,
}

impl FilteredReceiver {
    /// Create a new filtered receiver
    pub fn new(receiver: broadcast::Receiver<FloorEvent>, filter: EventFilter) -> Self {
        Self { receiver, filter }
    }

    /// Receive the next matching event
    pub async fn recv(&mut self) -> Result<FloorEvent, broadcast::error::RecvError> {
        loop {
            let event = self.receiver.recv().await?;
            if self.filter.matches(&event) {
                return Ok(event);
            }
        }
    }

    /// Next matching event already buffered, without waiting
    pub fn try_recv(&mut self) -> Result<FloorEvent, broadcast::error::TryRecvError> {
        loop {
            let event = self.receiver.try_recv()?;
            if self.filter.matches(&event) {
                return Ok(event);
            }
        }
    }
}

/// Extension trait for subscribing with filters
pub trait EventBusExt {
    /// Subscribe with a filter
    fn subscribe_filtered(&self, filter: EventFilter) -> FilteredReceiver;
}

impl EventBusExt for EventBus {
    fn subscribe_filtered(&self, filter: EventFilter) -> FilteredReceiver {
        FilteredReceiver::new(self.subscribe(), filter)
    }
}

impl EventBusExt for SharedEventBus {
    fn subscribe_filtered(&self, filter: EventFilter) -> FilteredReceiver {
        FilteredReceiver::new(self.subscribe(), filter)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::floor::{BotId, Participant};
    use chrono::Utc;

    fn started(session: u64) -> FloorEvent {
        FloorEvent::SessionStarted {
            session_id: SessionId(session),
            timestamp: Utc::now(),
        }
    }

    fn granted(session: u64, bot: u64) -> FloorEvent {
        FloorEvent::FloorGranted {
            session_id: SessionId(session),
            participant: Participant::Bot(BotId(bot)),
            participant_name: format!("bot-{bot}"),
            score: Some(80),
            timestamp: Utc::now(),
        }
    }

    #[tokio::test]
    async fn test_publish_subscribe() {
        let bus = EventBus::new();
        let mut receiver = bus.subscribe();

        bus.publish(started(1));

        let received = receiver.recv().await.unwrap();
        assert_eq!(received.event_type(), "session_started");
    }

    #[test]
    fn test_publish_without_subscribers() {
        let bus = EventBus::with_capacity(4);
        assert!(!bus.has_subscribers());
        bus.publish(started(1));
    }

    #[tokio::test]
    async fn test_multiple_subscribers() {
        let bus = EventBus::new().shared();
        let mut rx1 = bus.subscribe();
        let mut rx2 = bus.subscribe();

        assert_eq!(bus.subscriber_count(), 2);

        bus.publish(granted(1, 3));

        let e1 = rx1.recv().await.unwrap();
        let e2 = rx2.recv().await.unwrap();
        assert_eq!(e1, e2);
    }

    #[test]
    fn test_event_filter() {
        let filter = EventFilter::new()
            .session(SessionId(1))
            .types(vec!["floor_granted", "floor_released"]);

        assert!(filter.matches(&granted(1, 2)));
        assert!(!filter.matches(&granted(2, 2)));
        assert!(!filter.matches(&started(1)));
        assert!(EventFilter::new().matches(&started(9)));
    }

    #[tokio::test]
    async fn test_filtered_receiver() {
        let bus = EventBus::new().shared();
        let mut filtered = bus.subscribe_filtered(EventFilter::new().session(SessionId(7)));

        let publisher = bus.clone();
        tokio::spawn(async move {
            publisher.publish(granted(1, 1));
            publisher.publish(granted(7, 2));
        });

        let event = filtered.recv().await.unwrap();
        assert_eq!(event.session_id(), SessionId(7));
        assert_eq!(event.participant(), Some(Participant::Bot(BotId(2))));
    }

    #[test]
    fn test_filtered_try_recv_skips_other_sessions() {
        let bus = EventBus::new();
        let mut filtered = bus.subscribe_filtered(EventFilter::new().session(SessionId(2)));
        bus.publish(started(1));
        bus.publish(started(2));

        assert_eq!(filtered.try_recv().unwrap().session_id(), SessionId(2));
        assert!(filtered.try_recv().is_err());
    }
}
