//! Broker configuration.

use std::time::Duration;

use peril_protocol::{ExchangeKind, QueueOptions};

/// A binding declared at startup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueBinding {
    pub queue: String,
    pub exchange: String,
    pub routing_key: String,
}

/// Configuration for a broker instance.
///
/// The exchanges, queues, and bindings listed here are declared when the
/// broker starts, so clients can bind and publish without declaring
/// topology themselves. Pre-declared queues belong to the broker and
/// cannot be exclusive.
#[derive(Debug, Clone)]
pub struct BrokerConfig {
    /// Exchanges to pre-declare, in order.
    pub exchanges: Vec<(String, ExchangeKind)>,

    /// Queues to pre-declare, after the exchanges.
    pub queues: Vec<(String, QueueOptions)>,

    /// Bindings to add once exchanges and queues exist.
    pub bindings: Vec<QueueBinding>,

    /// Capacity of the broker actor's command channel. Callers wait
    /// when it is full.
    pub command_buffer: usize,

    /// How long a new connection has to send its `Hello` frame.
    pub handshake_timeout: Duration,
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            exchanges: Vec::new(),
            queues: Vec::new(),
            bindings: Vec::new(),
            command_buffer: 256,
            handshake_timeout: Duration::from_secs(5),
        }
    }
}

impl BrokerConfig {
    /// Adds an exchange to pre-declare.
    pub fn with_exchange(mut self, name: impl Into<String>, kind: ExchangeKind) -> Self {
        self.exchanges.push((name.into(), kind));
        self
    }

    /// Adds a queue to pre-declare.
    pub fn with_queue(mut self, name: impl Into<String>, options: QueueOptions) -> Self {
        self.queues.push((name.into(), options));
        self
    }

    /// Binds a pre-declared queue to an exchange at startup.
    pub fn with_binding(
        mut self,
        queue: impl Into<String>,
        exchange: impl Into<String>,
        routing_key: impl Into<String>,
    ) -> Self {
        self.bindings.push(QueueBinding {
            queue: queue.into(),
            exchange: exchange.into(),
            routing_key: routing_key.into(),
        });
        self
    }
}
