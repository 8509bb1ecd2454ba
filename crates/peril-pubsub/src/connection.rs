//! The broker connection seam and the consumer demultiplexer shared by
//! its implementations.

use std::collections::HashMap;

use peril_protocol::{ChannelId, Delivery, Reply, Request};
use tokio::sync::{Mutex, mpsc};

use crate::PubSubError;

/// A live connection to the broker.
///
/// Everything above this trait (channels, publishers, subscription loops)
/// is written against it, so the same game code runs over an in-process
/// broker ([`LocalConnection`](crate::LocalConnection)) or a remote one
/// ([`RemoteConnection`](crate::RemoteConnection)).
///
/// # Trait bounds
///
/// - `Send + Sync + 'static` → shared as `Arc<C>` by every subscription
///   task and the command loop.
pub trait BrokerConnection: Send + Sync + 'static {
    /// Allocates a channel id and opens it on the broker.
    fn open_channel(&self) -> impl Future<Output = Result<ChannelId, PubSubError>> + Send;

    /// Sends one request on a channel and waits for the reply.
    fn request(
        &self,
        channel: ChannelId,
        request: Request,
    ) -> impl Future<Output = Result<Reply, PubSubError>> + Send;

    /// Registers a consumer tag and returns the stream its deliveries
    /// arrive on. Must be called before the `Consume` request so no
    /// delivery is missed.
    fn register_consumer(
        &self,
        consumer_tag: &str,
    ) -> impl Future<Output = mpsc::UnboundedReceiver<Delivery>> + Send;

    /// Forgets a consumer tag. Its receiver sees the end of the stream.
    fn unregister_consumer(&self, consumer_tag: &str) -> impl Future<Output = ()> + Send;

    /// Closes the connection. Every subscription loop on it ends.
    fn close(&self) -> impl Future<Output = Result<(), PubSubError>> + Send;
}

/// Routes a connection's deliveries to per-consumer streams by tag.
#[derive(Default)]
pub(crate) struct ConsumerRouter {
    consumers: Mutex<HashMap<String, mpsc::UnboundedSender<Delivery>>>,
}

impl ConsumerRouter {
    pub(crate) async fn register(&self, consumer_tag: &str) -> mpsc::UnboundedReceiver<Delivery> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.consumers
            .lock()
            .await
            .insert(consumer_tag.to_string(), tx);
        rx
    }

    pub(crate) async fn unregister(&self, consumer_tag: &str) {
        self.consumers.lock().await.remove(consumer_tag);
    }

    /// Hands a delivery to its consumer's stream.
    pub(crate) async fn route(&self, delivery: Delivery) {
        let mut consumers = self.consumers.lock().await;
        let tag = delivery.consumer_tag.clone();
        match consumers.get(&tag) {
            Some(tx) => {
                if tx.send(delivery).is_err() {
                    // Loop is gone; the message stays unacked until the
                    // channel closes.
                    consumers.remove(&tag);
                    tracing::debug!(consumer_tag = %tag, "consumer stream closed, dropping route");
                }
            }
            None => {
                tracing::warn!(consumer_tag = %tag, "delivery for unknown consumer");
            }
        }
    }

    /// Ends every consumer stream.
    pub(crate) async fn close_all(&self) {
        self.consumers.lock().await.clear();
    }
}
