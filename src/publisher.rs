//! Order event publishing
//!
//! Events go out only after their transaction has committed. A failed publish
//! is logged and otherwise ignored: the order change already happened.

use async_trait::async_trait;
use tracing::{debug, warn};

use crate::domain::events::{EventEnvelope, OrderEvent};

#[async_trait]
pub trait EventPublisher: Send + Sync {
    async fn publish(&self, event: OrderEvent);
}

#[derive(Clone, Debug)]
pub struct NatsPublisher { client: async_nats::Client }

impl NatsPublisher {
    pub fn new(client: async_nats::Client) -> Self { Self { client } }
}

#[async_trait]
impl EventPublisher for NatsPublisher {
    async fn publish(&self, event: OrderEvent) {
        let envelope = EventEnvelope::new(event);
        let subject = envelope.subject();
        let payload = match serde_json::to_vec(&envelope) {
            Ok(payload) => payload,
            Err(e) => {
                warn!(event_id = %envelope.event_id, error = %e, "Failed to encode order event");
                return;
            }
        };
        match self.client.publish(subject.clone(), payload.into()).await {
            Ok(()) => debug!(event_id = %envelope.event_id, %subject, order_id = %envelope.event.order_id(), "Order event published"),
            Err(e) => warn!(event_id = %envelope.event_id, %subject, error = %e, "Failed to publish order event"),
        }
    }
}

#[derive(Clone, Copy, Debug, Default)]
pub struct NoopPublisher;

#[async_trait]
impl EventPublisher for NoopPublisher {
    async fn publish(&self, event: OrderEvent) {
        debug!(kind = event.kind(), order_id = %event.order_id(), "No event sink configured, dropping order event");
    }
}
