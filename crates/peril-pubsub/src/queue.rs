//! Queue declaration and binding.

use std::fmt;
use std::sync::Arc;

use peril_protocol::{QueueInfo, QueueOptions};

use crate::{BrokerConnection, Channel, PubSubError};

/// Exchange every Peril queue dead-letters into.
pub const DEAD_LETTER_EXCHANGE: &str = "peril_dlx";

/// How long a queue lives.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SimpleQueueType {
    /// Shared by name, survives its consumers.
    Durable,
    /// Private to the declaring connection, removed with it.
    Transient,
}

impl SimpleQueueType {
    /// Broker options for this queue type, dead-lettering into
    /// [`DEAD_LETTER_EXCHANGE`].
    pub fn options(self) -> QueueOptions {
        let durable = self == Self::Durable;
        QueueOptions {
            durable,
            exclusive: !durable,
            auto_delete: !durable,
            dead_letter_exchange: Some(DEAD_LETTER_EXCHANGE.to_string()),
        }
    }
}

impl fmt::Display for SimpleQueueType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Durable => write!(f, "durable"),
            Self::Transient => write!(f, "transient"),
        }
    }
}

/// Opens a channel, declares `queue_name` with the options of
/// `queue_type`, and binds it to `exchange` under `key`.
///
/// Re-declaring an existing queue with the same type is a no-op.
///
/// # Errors
///
/// [`PubSubError::Binding`] for empty names, a missing exchange, a queue
/// that already exists with another type, or an exclusive queue owned by
/// another connection.
pub async fn declare_and_bind<C: BrokerConnection>(
    conn: &Arc<C>,
    exchange: &str,
    queue_name: &str,
    key: &str,
    queue_type: SimpleQueueType,
) -> Result<(Channel<C>, QueueInfo), PubSubError> {
    if queue_name.is_empty() {
        return Err(PubSubError::Binding("queue name must not be empty".into()));
    }
    if key.is_empty() {
        return Err(PubSubError::Binding("routing key must not be empty".into()));
    }

    let channel = Channel::open(conn).await?;
    let declared = async {
        let info = channel.declare_queue(queue_name, queue_type.options()).await?;
        channel.bind_queue(queue_name, exchange, key).await?;
        Ok::<_, PubSubError>(info)
    }
    .await;

    match declared {
        Ok(info) => {
            tracing::debug!(queue = queue_name, exchange, key, %queue_type, "queue declared and bound");
            Ok((channel, info))
        }
        Err(e) => {
            let _ = channel.close().await;
            Err(e)
        }
    }
}
