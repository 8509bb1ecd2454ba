//! Subscription loops.
//!
//! A subscription binds a queue, starts a consumer on its own channel, and
//! spawns a task that runs until the connection closes:
//!
//! ```text
//! delivery ─▶ decode ─▶ handler ─▶ AckType ─▶ ack / nack(requeue) / nack(discard)
//!               │
//!               └─ failure ─▶ DecodeFailurePolicy
//! ```

use std::sync::Arc;

use peril_protocol::{BincodeCodec, Codec, Delivery, JsonCodec};
use serde::de::DeserializeOwned;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::channel::ack_failure;
use crate::{BrokerConnection, Channel, PubSubError, SimpleQueueType, declare_and_bind};

/// Default cap on unacknowledged deliveries per subscription.
pub const DEFAULT_PREFETCH: u16 = 10;

/// What a handler wants done with the message it was given.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AckType {
    /// Processed; remove it from the queue.
    Ack,
    /// Not processed now; put it back for another try.
    NackRequeue,
    /// Never processable; dead-letter it.
    NackDiscard,
}

/// What the loop does with a delivery that doesn't decode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DecodeFailurePolicy {
    /// Stop the loop and report the error on the subscription.
    #[default]
    Fatal,
    /// Dead-letter the delivery and keep going.
    Discard,
}

/// Tunables for [`subscribe`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SubscribeOptions {
    /// Unacknowledged deliveries allowed in flight.
    pub prefetch: u16,
    pub decode_failure: DecodeFailurePolicy,
}

impl Default for SubscribeOptions {
    fn default() -> Self {
        Self {
            prefetch: DEFAULT_PREFETCH,
            decode_failure: DecodeFailurePolicy::Fatal,
        }
    }
}

/// Business logic run for every decoded delivery.
///
/// Implemented for any `Fn(T) -> impl Future<Output = AckType>`, so plain
/// async closures work:
///
/// ```rust,ignore
/// subscribe_json(&conn, "peril_direct", "pause.alice", "pause",
///     SimpleQueueType::Transient,
///     |state: PlayingState| async move { AckType::Ack },
///     SubscribeOptions::default()).await?;
/// ```
pub trait Handler<T>: Send + Sync + 'static {
    fn handle(&self, value: T) -> impl Future<Output = AckType> + Send;
}

impl<T, F, Fut> Handler<T> for F
where
    F: Fn(T) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = AckType> + Send,
{
    fn handle(&self, value: T) -> impl Future<Output = AckType> + Send {
        self(value)
    }
}

/// A running subscription loop.
pub struct Subscription {
    queue: String,
    handle: JoinHandle<Result<(), PubSubError>>,
}

impl Subscription {
    /// The queue this subscription consumes.
    pub fn queue(&self) -> &str {
        &self.queue
    }

    /// `true` once the loop has ended, cleanly or not.
    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }

    /// Stops the loop without waiting for it.
    pub fn abort(&self) {
        self.handle.abort();
    }

    /// Waits for the loop to end and returns how it ended.
    ///
    /// `Ok(())` means the connection closed. An error means a fatal decode
    /// failure or a failed ack.
    pub async fn join(self) -> Result<(), PubSubError> {
        match self.handle.await {
            Ok(result) => result,
            Err(e) if e.is_cancelled() => Ok(()),
            Err(e) => Err(PubSubError::Transport(format!("subscription task failed: {e}"))),
        }
    }
}

/// Binds `queue_name` to `exchange` under `key`, applies the prefetch
/// limit, and spawns a loop feeding decoded deliveries to `handler`.
///
/// Returns as soon as the loop is running.
#[allow(clippy::too_many_arguments)]
pub async fn subscribe<C, K, T, H>(
    conn: &Arc<C>,
    exchange: &str,
    queue_name: &str,
    key: &str,
    queue_type: SimpleQueueType,
    codec: K,
    handler: H,
    options: SubscribeOptions,
) -> Result<Subscription, PubSubError>
where
    C: BrokerConnection,
    K: Codec,
    T: DeserializeOwned + Send + 'static,
    H: Handler<T>,
{
    let (channel, _) = declare_and_bind(conn, exchange, queue_name, key, queue_type).await?;
    channel.qos(options.prefetch).await?;
    let (consumer_tag, deliveries) = channel.consume(queue_name).await?;

    tracing::info!(
        queue = queue_name,
        exchange,
        key,
        %consumer_tag,
        prefetch = options.prefetch,
        "subscribed"
    );

    let queue = queue_name.to_string();
    let handle = tokio::spawn(consume_loop(
        channel,
        deliveries,
        codec,
        handler,
        options.decode_failure,
        queue.clone(),
    ));

    Ok(Subscription { queue, handle })
}

/// [`subscribe`] with [`JsonCodec`].
pub async fn subscribe_json<C, T, H>(
    conn: &Arc<C>,
    exchange: &str,
    queue_name: &str,
    key: &str,
    queue_type: SimpleQueueType,
    handler: H,
    options: SubscribeOptions,
) -> Result<Subscription, PubSubError>
where
    C: BrokerConnection,
    T: DeserializeOwned + Send + 'static,
    H: Handler<T>,
{
    subscribe(conn, exchange, queue_name, key, queue_type, JsonCodec, handler, options).await
}

/// [`subscribe`] with [`BincodeCodec`].
pub async fn subscribe_bincode<C, T, H>(
    conn: &Arc<C>,
    exchange: &str,
    queue_name: &str,
    key: &str,
    queue_type: SimpleQueueType,
    handler: H,
    options: SubscribeOptions,
) -> Result<Subscription, PubSubError>
where
    C: BrokerConnection,
    T: DeserializeOwned + Send + 'static,
    H: Handler<T>,
{
    subscribe(conn, exchange, queue_name, key, queue_type, BincodeCodec, handler, options).await
}

async fn consume_loop<C, K, T, H>(
    channel: Channel<C>,
    deliveries: mpsc::UnboundedReceiver<Delivery>,
    codec: K,
    handler: H,
    policy: DecodeFailurePolicy,
    queue: String,
) -> Result<(), PubSubError>
where
    C: BrokerConnection,
    K: Codec,
    T: DeserializeOwned + Send + 'static,
    H: Handler<T>,
{
    let result = run_deliveries(&channel, deliveries, &codec, &handler, policy, &queue).await;
    match &result {
        Ok(()) => tracing::info!(queue = %queue, "delivery stream closed, subscription ended"),
        Err(e) => {
            tracing::error!(queue = %queue, error = %e, "subscription failed");
            // Hand unacked deliveries back to the broker.
            let _ = channel.close().await;
        }
    }
    result
}

async fn run_deliveries<C, K, T, H>(
    channel: &Channel<C>,
    mut deliveries: mpsc::UnboundedReceiver<Delivery>,
    codec: &K,
    handler: &H,
    policy: DecodeFailurePolicy,
    queue: &str,
) -> Result<(), PubSubError>
where
    C: BrokerConnection,
    K: Codec,
    T: DeserializeOwned + Send + 'static,
    H: Handler<T>,
{
    while let Some(delivery) = deliveries.recv().await {
        let tag = delivery.delivery_tag;

        let value: T = match codec.decode(&delivery.message.body) {
            Ok(value) => value,
            Err(e) => match policy {
                DecodeFailurePolicy::Fatal => return Err(e.into()),
                DecodeFailurePolicy::Discard => {
                    tracing::warn!(
                        queue,
                        delivery_tag = tag,
                        content_type = %delivery.message.content_type,
                        error = %e,
                        "undecodable delivery discarded"
                    );
                    channel.nack(tag, false).await.map_err(ack_failure)?;
                    continue;
                }
            },
        };

        let ack = handler.handle(value).await;
        let acked = match ack {
            AckType::Ack => channel.ack(tag).await,
            AckType::NackRequeue => channel.nack(tag, true).await,
            AckType::NackDiscard => channel.nack(tag, false).await,
        };
        match acked {
            Ok(()) => {}
            // Closed while the handler ran; the broker requeues the delivery.
            Err(e) if e.is_closed() => {
                tracing::debug!(queue, delivery_tag = tag, "connection closed before ack");
                return Ok(());
            }
            Err(e) => return Err(ack_failure(e)),
        }

        tracing::debug!(
            queue,
            delivery_tag = tag,
            redelivered = delivery.redelivered,
            ?ack,
            "delivery handled"
        );
    }
    Ok(())
}
