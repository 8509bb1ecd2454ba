//! Typed wrapper around one broker channel.

use std::fmt;
use std::sync::Arc;

use peril_protocol::{
    ChannelId, Delivery, ExchangeKind, Message, QueueInfo, QueueOptions, Reply, Request,
};
use tokio::sync::mpsc;

use crate::{BrokerConnection, PubSubError};

/// A channel on a broker connection.
///
/// Each subscription owns one, so its prefetch window and delivery tags
/// are independent of every other subscription. Publishers usually share
/// a single channel.
pub struct Channel<C: BrokerConnection> {
    conn: Arc<C>,
    id: ChannelId,
}

impl<C: BrokerConnection> Clone for Channel<C> {
    fn clone(&self) -> Self {
        Self {
            conn: Arc::clone(&self.conn),
            id: self.id,
        }
    }
}

impl<C: BrokerConnection> fmt::Debug for Channel<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Channel").field("id", &self.id).finish()
    }
}

impl<C: BrokerConnection> Channel<C> {
    /// Opens a fresh channel on the connection.
    pub async fn open(conn: &Arc<C>) -> Result<Self, PubSubError> {
        let id = conn.open_channel().await?;
        Ok(Self {
            conn: Arc::clone(conn),
            id,
        })
    }

    /// The channel's id on its connection.
    pub fn id(&self) -> ChannelId {
        self.id
    }

    async fn call(&self, request: Request) -> Result<Reply, PubSubError> {
        self.conn.request(self.id, request).await
    }

    pub async fn declare_exchange(&self, exchange: &str, kind: ExchangeKind) -> Result<(), PubSubError> {
        self.call(Request::DeclareExchange {
            exchange: exchange.to_string(),
            kind,
        })
        .await?;
        Ok(())
    }

    /// Declares a queue, or checks an existing one has the same options.
    pub async fn declare_queue(&self, queue: &str, options: QueueOptions) -> Result<QueueInfo, PubSubError> {
        match self
            .call(Request::DeclareQueue {
                queue: queue.to_string(),
                options,
            })
            .await?
        {
            Reply::QueueDeclared(info) => Ok(info),
            other => Err(unexpected("DeclareQueue", &other)),
        }
    }

    pub async fn bind_queue(&self, queue: &str, exchange: &str, routing_key: &str) -> Result<(), PubSubError> {
        self.call(Request::BindQueue {
            queue: queue.to_string(),
            exchange: exchange.to_string(),
            routing_key: routing_key.to_string(),
        })
        .await?;
        Ok(())
    }

    /// Caps unacknowledged deliveries on this channel.
    pub async fn qos(&self, prefetch_count: u16) -> Result<(), PubSubError> {
        self.call(Request::Qos { prefetch_count }).await?;
        Ok(())
    }

    /// Starts a consumer on `queue` under a fresh tag and returns the tag
    /// with the stream of its deliveries.
    pub async fn consume(
        &self,
        queue: &str,
    ) -> Result<(String, mpsc::UnboundedReceiver<Delivery>), PubSubError> {
        let consumer_tag = format!("ctag-{queue}-{:08x}", rand::random::<u32>());
        let deliveries = self.conn.register_consumer(&consumer_tag).await;

        let started = self
            .call(Request::Consume {
                queue: queue.to_string(),
                consumer_tag: consumer_tag.clone(),
            })
            .await;
        if let Err(e) = started {
            self.conn.unregister_consumer(&consumer_tag).await;
            return Err(e);
        }
        Ok((consumer_tag, deliveries))
    }

    pub async fn cancel(&self, consumer_tag: &str) -> Result<(), PubSubError> {
        self.call(Request::Cancel {
            consumer_tag: consumer_tag.to_string(),
        })
        .await?;
        self.conn.unregister_consumer(consumer_tag).await;
        Ok(())
    }

    /// Publishes a message. Returns once the broker has routed it.
    pub async fn publish(&self, exchange: &str, routing_key: &str, message: Message) -> Result<(), PubSubError> {
        self.call(Request::Publish {
            exchange: exchange.to_string(),
            routing_key: routing_key.to_string(),
            message,
        })
        .await?;
        Ok(())
    }

    pub async fn ack(&self, delivery_tag: u64) -> Result<(), PubSubError> {
        self.call(Request::Ack { delivery_tag }).await?;
        Ok(())
    }

    pub async fn nack(&self, delivery_tag: u64, requeue: bool) -> Result<(), PubSubError> {
        self.call(Request::Nack {
            delivery_tag,
            requeue,
        })
        .await?;
        Ok(())
    }

    /// Closes the channel; anything it still holds unacked is requeued.
    pub async fn close(&self) -> Result<(), PubSubError> {
        self.call(Request::CloseChannel).await?;
        Ok(())
    }
}

/// Ack and nack failures are transport failures, whatever the broker's
/// reason.
pub(crate) fn ack_failure(e: PubSubError) -> PubSubError {
    match e {
        PubSubError::Binding(msg) => PubSubError::Transport(msg),
        other => other,
    }
}

fn unexpected(request: &str, reply: &Reply) -> PubSubError {
    PubSubError::Transport(format!("unexpected reply to {request}: {reply:?}"))
}
