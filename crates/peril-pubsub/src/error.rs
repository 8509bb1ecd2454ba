//! Error types for the pub/sub layer.

use peril_broker::BrokerError;
use peril_protocol::{BrokerFault, ProtocolError};
use peril_transport::TransportError;

/// Errors surfaced by publishing, binding, and subscription loops.
#[derive(Debug, thiserror::Error)]
pub enum PubSubError {
    /// A payload could not be encoded, or a delivery could not be
    /// decoded.
    #[error("encoding error: {0}")]
    Encoding(#[from] ProtocolError),

    /// The broker refused a topology operation or a publish: missing
    /// exchange, inequivalent queue options, exclusive queue held by
    /// another connection, or an empty name.
    #[error("binding error: {0}")]
    Binding(String),

    /// Sending, receiving, acking, or the connection itself failed.
    #[error("transport error: {0}")]
    Transport(String),

    /// The connection was closed by this side.
    #[error("connection closed")]
    Closed,
}

impl PubSubError {
    pub(crate) fn closed() -> Self {
        Self::Closed
    }

    /// `true` when the call failed only because this side already closed
    /// the connection.
    pub fn is_closed(&self) -> bool {
        matches!(self, Self::Closed)
    }
}

impl From<BrokerFault> for PubSubError {
    fn from(fault: BrokerFault) -> Self {
        Self::Binding(fault.to_string())
    }
}

impl From<TransportError> for PubSubError {
    fn from(e: TransportError) -> Self {
        Self::Transport(e.to_string())
    }
}

impl From<BrokerError> for PubSubError {
    fn from(e: BrokerError) -> Self {
        match e {
            BrokerError::Fault(fault) => fault.into(),
            BrokerError::Protocol(e) => Self::Encoding(e),
            other => Self::Transport(other.to_string()),
        }
    }
}
