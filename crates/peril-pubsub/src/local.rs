//! In-process connection to a broker actor.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU16, Ordering};

use peril_broker::{BrokerHandle, ConnectionKey};
use peril_protocol::{ChannelId, Delivery, Reply, Request};
use tokio::sync::mpsc;

use crate::connection::ConsumerRouter;
use crate::{BrokerConnection, PubSubError};

/// A connection to a broker running in the same process.
///
/// Used by tests and by the single-process setups of the CLI. Behaves
/// exactly like a [`RemoteConnection`](crate::RemoteConnection) minus the
/// socket.
pub struct LocalConnection {
    broker: BrokerHandle,
    key: ConnectionKey,
    router: Arc<ConsumerRouter>,
    next_channel: AtomicU16,
    closed: AtomicBool,
}

impl LocalConnection {
    /// Registers a new connection with the broker.
    pub async fn open(broker: &BrokerHandle) -> Result<Self, PubSubError> {
        let (sink, mut deliveries) = mpsc::unbounded_channel::<Delivery>();
        let key = broker.connect(sink).await?;
        let router = Arc::new(ConsumerRouter::default());

        let demux = Arc::clone(&router);
        tokio::spawn(async move {
            while let Some(delivery) = deliveries.recv().await {
                demux.route(delivery).await;
            }
            // The broker dropped our sink: connection is gone.
            demux.close_all().await;
        });

        tracing::debug!(connection = key, "local broker connection opened");
        Ok(Self {
            broker: broker.clone(),
            key,
            router,
            next_channel: AtomicU16::new(1),
            closed: AtomicBool::new(false),
        })
    }

    fn ensure_open(&self) -> Result<(), PubSubError> {
        if self.closed.load(Ordering::Acquire) {
            return Err(PubSubError::closed());
        }
        Ok(())
    }
}

impl BrokerConnection for LocalConnection {
    async fn open_channel(&self) -> Result<ChannelId, PubSubError> {
        let channel = ChannelId(self.next_channel.fetch_add(1, Ordering::Relaxed));
        self.request(channel, Request::OpenChannel).await?;
        Ok(channel)
    }

    async fn request(&self, channel: ChannelId, request: Request) -> Result<Reply, PubSubError> {
        self.ensure_open()?;
        match self.broker.call(self.key, channel, request).await {
            Ok(reply) => Ok(reply),
            // The connection was torn down while the call was queued.
            Err(_) if self.closed.load(Ordering::Acquire) => Err(PubSubError::closed()),
            Err(e) => Err(e.into()),
        }
    }

    async fn register_consumer(&self, consumer_tag: &str) -> mpsc::UnboundedReceiver<Delivery> {
        self.router.register(consumer_tag).await
    }

    async fn unregister_consumer(&self, consumer_tag: &str) {
        self.router.unregister(consumer_tag).await;
    }

    async fn close(&self) -> Result<(), PubSubError> {
        if self.closed.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        tracing::debug!(connection = self.key, "closing local broker connection");
        self.broker.disconnect(self.key).await?;
        Ok(())
    }
}

impl Drop for LocalConnection {
    fn drop(&mut self) {
        if !self.closed.load(Ordering::Acquire) {
            self.broker.disconnect_now(self.key);
        }
    }
}
