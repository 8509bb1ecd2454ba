//! The exchanges and queues every Peril process expects to exist.

use peril_broker::BrokerConfig;
use peril_game::routing::{
    DEAD_LETTER_QUEUE, EXCHANGE_PERIL_DIRECT, EXCHANGE_PERIL_DLX, EXCHANGE_PERIL_TOPIC,
};
use peril_protocol::{ExchangeKind, QueueOptions};

/// Broker configuration with the Peril exchanges pre-declared, and a
/// durable `peril_dlq` holding every rejected message.
pub fn broker_config() -> BrokerConfig {
    BrokerConfig::default()
        .with_exchange(EXCHANGE_PERIL_TOPIC, ExchangeKind::Topic)
        .with_exchange(EXCHANGE_PERIL_DIRECT, ExchangeKind::Direct)
        .with_exchange(EXCHANGE_PERIL_DLX, ExchangeKind::Fanout)
        .with_queue(
            DEAD_LETTER_QUEUE,
            QueueOptions {
                durable: true,
                ..QueueOptions::default()
            },
        )
        .with_binding(DEAD_LETTER_QUEUE, EXCHANGE_PERIL_DLX, "#")
}
