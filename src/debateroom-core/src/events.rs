//! Typed publish/subscribe between sessions and the transport layer.
//!
//! Handlers run synchronously in the publishing task, in subscription order.
//! Nothing is persisted or replayed; a handler that fails or panics is logged
//! and skipped without affecting the others.

use serde::{Deserialize, Serialize};
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};
use tracing::{debug, warn};

use crate::error::BusError;
use crate::message::Message;
use crate::participant::Role;

/// Outbound topics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Topic {
    /// Incremental reveal of an agent's response.
    AgentMessage,
    /// Finalized response with its audio, ready for playback.
    AgentResponse,
    /// An interrupted response should be removed from view.
    ClearResponse,
    Notification,
    /// Echo of what the user sent or is typing.
    UserMessage,
}

/// Events produced by sessions.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event", rename_all = "kebab-case")]
pub enum SessionEvent {
    AgentMessage { session: String, message: Message },
    AgentResponse { session: String, message: Message },
    ClearResponse { session: String, role: Role },
    Notification { session: String, text: String },
    UserMessage {
        session: String,
        role: Role,
        text: String,
        is_typing: bool,
    },
}

impl SessionEvent {
    pub fn topic(&self) -> Topic {
        match self {
            SessionEvent::AgentMessage { .. } => Topic::AgentMessage,
            SessionEvent::AgentResponse { .. } => Topic::AgentResponse,
            SessionEvent::ClearResponse { .. } => Topic::ClearResponse,
            SessionEvent::Notification { .. } => Topic::Notification,
            SessionEvent::UserMessage { .. } => Topic::UserMessage,
        }
    }

    /// Code of the session that produced the event.
    pub fn session(&self) -> &str {
        match self {
            SessionEvent::AgentMessage { session, .. }
            | SessionEvent::AgentResponse { session, .. }
            | SessionEvent::ClearResponse { session, .. }
            | SessionEvent::Notification { session, .. }
            | SessionEvent::UserMessage { session, .. } => session,
        }
    }
}

/// Events consumed from the transport layer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum InboundEvent {
    /// Finalized text the user sent to one side.
    UserMessage { role: Role, text: String },
    /// Live keystrokes the user is typing to one side.
    Typing { role: Role, text: String },
    /// The client finished playing a side's audio.
    PlaybackFinished { role: Role },
    /// The user picked the debate topic.
    SendTopic { topic: String },
}

/// Callback for session events.
pub type Handler = Arc<dyn Fn(&SessionEvent) -> Result<(), BusError> + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

struct Subscriber {
    id: SubscriptionId,
    topic: Topic,
    handler: Handler,
}

/// Shared reference to EventBus
pub type SharedEventBus = Arc<EventBus>;

#[derive(Default)]
pub struct EventBus {
    subscribers: RwLock<Vec<Subscriber>>,
    next_id: AtomicU64,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn shared(self) -> SharedEventBus {
        Arc::new(self)
    }

    pub fn subscribe<F>(&self, topic: Topic, handler: F) -> SubscriptionId
    where
        F: Fn(&SessionEvent) -> Result<(), BusError> + Send + Sync + 'static,
    {
        let id = SubscriptionId(self.next_id.fetch_add(1, Ordering::Relaxed));
        let mut subscribers = self.subscribers.write().unwrap_or_else(|e| e.into_inner());
        subscribers.push(Subscriber {
            id,
            topic,
            handler: Arc::new(handler),
        });
        id
    }

    /// Returns whether the subscription existed.
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let mut subscribers = self.subscribers.write().unwrap_or_else(|e| e.into_inner());
        let before = subscribers.len();
        subscribers.retain(|s| s.id != id);
        subscribers.len() != before
    }

    pub fn subscriber_count(&self, topic: Topic) -> usize {
        self.subscribers
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .iter()
            .filter(|s| s.topic == topic)
            .count()
    }

    /// Deliver `event` to every subscriber of its topic. Returns how many
    /// handlers completed successfully.
    pub fn publish(&self, event: SessionEvent) -> usize {
        let topic = event.topic();

        // Snapshot so handlers may subscribe or publish themselves.
        let handlers: Vec<Handler> = self
            .subscribers
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .iter()
            .filter(|s| s.topic == topic)
            .map(|s| s.handler.clone())
            .collect();

        let mut delivered = 0;
        for handler in &handlers {
            let outcome = catch_unwind(AssertUnwindSafe(|| handler(&event)))
                .unwrap_or_else(|panic| Err(BusError::HandlerPanicked(panic_message(&panic))));

            match outcome {
                Ok(()) => delivered += 1,
                Err(e) => warn!(?topic, session = event.session(), error = %e, "event handler failed"),
            }
        }

        debug!(?topic, session = event.session(), receivers = handlers.len(), delivered, "event published");
        delivered
    }
}

pub(crate) fn panic_message(panic: &Box<dyn std::any::Any + Send>) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    fn note(text: &str) -> SessionEvent {
        SessionEvent::Notification {
            session: "AB".into(),
            text: text.into(),
        }
    }

    #[test]
    fn test_fan_out_in_subscription_order() {
        let bus = EventBus::new();
        let seen = Arc::new(Mutex::new(Vec::new()));

        for tag in ["first", "second", "third"] {
            let seen = seen.clone();
            bus.subscribe(Topic::Notification, move |_| {
                seen.lock().unwrap().push(tag);
                Ok(())
            });
        }

        assert_eq!(bus.publish(note("hi")), 3);
        assert_eq!(*seen.lock().unwrap(), vec!["first", "second", "third"]);
    }

    #[test]
    fn test_only_matching_topic_receives() {
        let bus = EventBus::new();
        let hits = Arc::new(AtomicU64::new(0));
        let counter = hits.clone();
        bus.subscribe(Topic::ClearResponse, move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(())
        });

        assert_eq!(bus.publish(note("ignored")), 0);
        bus.publish(SessionEvent::ClearResponse {
            session: "AB".into(),
            role: Role::Cons,
        });
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_failing_and_panicking_handlers_are_contained() {
        let bus = EventBus::new();
        let reached = Arc::new(AtomicU64::new(0));

        bus.subscribe(Topic::Notification, |_| Err(BusError::HandlerFailed("socket closed".into())));
        bus.subscribe(Topic::Notification, |_| panic!("handler bug"));
        let counter = reached.clone();
        bus.subscribe(Topic::Notification, move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(())
        });

        assert_eq!(bus.publish(note("hi")), 1);
        assert_eq!(reached.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_unsubscribe() {
        let bus = EventBus::new();
        let id = bus.subscribe(Topic::Notification, |_| Ok(()));
        assert_eq!(bus.subscriber_count(Topic::Notification), 1);
        assert!(bus.unsubscribe(id));
        assert!(!bus.unsubscribe(id));
        assert_eq!(bus.publish(note("nobody")), 0);
    }

    #[test]
    fn test_inbound_event_wire_format() {
        let event: InboundEvent =
            serde_json::from_str(r#"{"type":"playback-finished","role":"cons"}"#).unwrap();
        assert_eq!(event, InboundEvent::PlaybackFinished { role: Role::Cons });

        let event: InboundEvent =
            serde_json::from_str(r#"{"type":"typing","role":"pros","text":"학교"}"#).unwrap();
        assert!(matches!(event, InboundEvent::Typing { role: Role::Pros, .. }));
    }

    #[test]
    fn test_outbound_event_wire_format() {
        let json = serde_json::to_value(SessionEvent::ClearResponse {
            session: "QX".into(),
            role: Role::Pros,
        })
        .unwrap();
        assert_eq!(json["event"], "clear-response");
        assert_eq!(json["role"], "pros");
    }
}
