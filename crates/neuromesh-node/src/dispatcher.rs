//! Topic bus -- decouples channel decode loops from application managers.
//!
//! Subscribers register a bounded sender per topic (message name); channels
//! publish decoded messages without knowing who consumes them. Delivery is
//! `try_send`: a slow subscriber loses messages rather than stalling the
//! drain loop.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;

use neuromesh_protocol::{Body, MsgHeader};
use tokio::sync::{mpsc, RwLock};

/// A decoded message handed to a subscriber.
#[derive(Debug, Clone)]
pub struct Envelope {
    pub topic: String,
    /// Session id of the originating channel.
    pub session_id: String,
    /// Remote address of the originating channel.
    pub peer_addr: SocketAddr,
    pub header: MsgHeader,
    pub body: Body,
}

/// Topic → single subscriber map.
#[derive(Clone, Default)]
pub struct Dispatcher {
    topics: Arc<RwLock<HashMap<String, mpsc::Sender<Envelope>>>>,
}

impl Dispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `sender` for `topic`.
    ///
    /// A topic has exactly one subscriber: subscribing again REPLACES the
    /// previous registration, and only the latest subscriber receives
    /// publishes. Callers sharing a topic must coordinate externally.
    pub async fn subscribe(&self, topic: &str, sender: mpsc::Sender<Envelope>) {
        let previous = self
            .topics
            .write()
            .await
            .insert(topic.to_string(), sender);
        if previous.is_some() {
            tracing::warn!(topic, "subscriber replaced; previous handler detached");
        }
    }

    /// Deliver to the topic's subscriber, if any. Unroutable and overflowed
    /// messages are dropped with a log line; publishing never blocks.
    pub async fn publish(&self, envelope: Envelope) {
        let topics = self.topics.read().await;
        let Some(sender) = topics.get(&envelope.topic) else {
            tracing::debug!(topic = %envelope.topic, "unroutable message dropped");
            return;
        };

        match sender.try_send(envelope) {
            Ok(()) => {}
            Err(mpsc::error::TrySendError::Full(envelope)) => {
                tracing::warn!(
                    topic = %envelope.topic,
                    session = %envelope.session_id,
                    "subscriber queue full, message dropped"
                );
            }
            Err(mpsc::error::TrySendError::Closed(envelope)) => {
                tracing::warn!(
                    topic = %envelope.topic,
                    "subscriber receiver dropped, message lost"
                );
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use neuromesh_protocol::SHAKE_HAND_REQ;

    fn envelope(topic: &str) -> Envelope {
        Envelope {
            topic: topic.to_string(),
            session_id: "s-1".into(),
            peer_addr: "127.0.0.1:21107".parse().unwrap(),
            header: MsgHeader::new(1, topic),
            body: Body::Empty,
        }
    }

    #[tokio::test]
    async fn test_publish_reaches_subscriber() {
        let bus = Dispatcher::new();
        let (tx, mut rx) = mpsc::channel(8);
        bus.subscribe(SHAKE_HAND_REQ, tx).await;

        bus.publish(envelope(SHAKE_HAND_REQ)).await;

        let received = rx.recv().await.unwrap();
        assert_eq!(received.topic, SHAKE_HAND_REQ);
    }

    #[tokio::test]
    async fn test_second_subscriber_wins() {
        let bus = Dispatcher::new();
        let (tx1, mut rx1) = mpsc::channel(8);
        let (tx2, mut rx2) = mpsc::channel(8);

        bus.subscribe("topic-a", tx1).await;
        bus.subscribe("topic-a", tx2).await;

        bus.publish(envelope("topic-a")).await;

        assert_eq!(rx2.recv().await.unwrap().topic, "topic-a");
        assert!(rx1.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_unroutable_is_dropped_silently() {
        let bus = Dispatcher::new();
        // No subscriber registered; must not panic or block
        bus.publish(envelope("nobody-home")).await;
    }

    #[tokio::test]
    async fn test_full_subscriber_queue_drops() {
        let bus = Dispatcher::new();
        let (tx, mut rx) = mpsc::channel(1);
        bus.subscribe("topic-b", tx).await;

        bus.publish(envelope("topic-b")).await;
        bus.publish(envelope("topic-b")).await; // dropped, queue is full

        assert!(rx.recv().await.is_some());
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_one_sender_may_serve_many_topics() {
        let bus = Dispatcher::new();
        let (tx, mut rx) = mpsc::channel(8);
        bus.subscribe("topic-a", tx.clone()).await;
        bus.subscribe("topic-b", tx).await;

        bus.publish(envelope("topic-a")).await;
        bus.publish(envelope("topic-b")).await;

        assert_eq!(rx.recv().await.unwrap().topic, "topic-a");
        assert_eq!(rx.recv().await.unwrap().topic, "topic-b");
    }
}
