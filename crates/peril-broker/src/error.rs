//! Error types for the broker.

use peril_protocol::{BrokerFault, FaultCode, ProtocolError};
use peril_transport::TransportError;

/// Errors that can occur while running or talking to the broker.
#[derive(Debug, thiserror::Error)]
pub enum BrokerError {
    /// The broker refused a request (unknown exchange, inequivalent
    /// queue arguments, exclusive queue held elsewhere, ...).
    #[error("broker refused request: {0}")]
    Fault(BrokerFault),

    /// The broker actor has stopped, or its command channel is full.
    #[error("broker is unavailable")]
    Unavailable,

    /// The handshake credentials were rejected by the
    /// [`Authenticator`](crate::Authenticator).
    #[error("authentication failed: {0}")]
    AuthFailed(String),

    /// A transport-level error on a client connection.
    #[error(transparent)]
    Transport(#[from] TransportError),

    /// A frame could not be encoded or decoded.
    #[error(transparent)]
    Protocol(#[from] ProtocolError),
}

impl BrokerError {
    /// Converts this error into the fault reported on the wire.
    pub fn into_fault(self) -> BrokerFault {
        match self {
            Self::Fault(fault) => fault,
            Self::AuthFailed(message) => BrokerFault {
                code: FaultCode::AccessRefused,
                message,
            },
            other => BrokerFault {
                code: FaultCode::NotAllowed,
                message: other.to_string(),
            },
        }
    }
}

impl From<BrokerFault> for BrokerError {
    fn from(fault: BrokerFault) -> Self {
        Self::Fault(fault)
    }
}
