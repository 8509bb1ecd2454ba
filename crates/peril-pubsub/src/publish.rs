//! Encoding publishers.

use peril_protocol::{BincodeCodec, Codec, JsonCodec, Message};
use serde::Serialize;

use crate::{BrokerConnection, Channel, PubSubError};

/// Encodes `value` with `codec` and publishes it to `exchange` under
/// `key`, tagged with the codec's content type.
///
/// No retries: the first failure is returned to the caller.
pub async fn publish<C, K, T>(
    channel: &Channel<C>,
    codec: &K,
    exchange: &str,
    key: &str,
    value: &T,
) -> Result<(), PubSubError>
where
    C: BrokerConnection,
    K: Codec,
    T: Serialize,
{
    let body = codec.encode(value)?;
    channel
        .publish(exchange, key, Message::new(codec.content_type(), body))
        .await?;
    tracing::trace!(exchange, key, content_type = codec.content_type(), "published");
    Ok(())
}

/// [`publish`] with [`JsonCodec`].
pub async fn publish_json<C, T>(
    channel: &Channel<C>,
    exchange: &str,
    key: &str,
    value: &T,
) -> Result<(), PubSubError>
where
    C: BrokerConnection,
    T: Serialize,
{
    publish(channel, &JsonCodec, exchange, key, value).await
}

/// [`publish`] with [`BincodeCodec`].
pub async fn publish_bincode<C, T>(
    channel: &Channel<C>,
    exchange: &str,
    key: &str,
    value: &T,
) -> Result<(), PubSubError>
where
    C: BrokerConnection,
    T: Serialize,
{
    publish(channel, &BincodeCodec, exchange, key, value).await
}
