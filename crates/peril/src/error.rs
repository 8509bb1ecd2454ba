//! Unified error type for the Peril application layer.

use peril_broker::BrokerError;
use peril_game::GameError;
use peril_protocol::ProtocolError;
use peril_pubsub::PubSubError;
use peril_transport::TransportError;

/// Top-level error that wraps all crate-specific errors.
///
/// The `#[from]` attribute on each variant auto-generates `From` impls,
/// so the `?` operator converts sub-crate errors automatically.
#[derive(Debug, thiserror::Error)]
pub enum PerilError {
    /// A transport-level error (connect, send, recv).
    #[error(transparent)]
    Transport(#[from] TransportError),

    /// A protocol-level error (encode, decode, invalid frame).
    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    /// The in-process broker refused or went away.
    #[error(transparent)]
    Broker(#[from] BrokerError),

    /// Publishing, subscribing, or topology failed.
    #[error(transparent)]
    PubSub(#[from] PubSubError),

    /// A game command was rejected.
    #[error(transparent)]
    Game(#[from] GameError),

    /// A bad environment value or broker URL.
    #[error("configuration error: {0}")]
    Config(String),

    /// The game log file couldn't be opened or written.
    #[error("game log: {0}")]
    Io(#[from] std::io::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_transport_error() {
        let err = TransportError::ConnectionClosed("gone".into());
        let peril_err: PerilError = err.into();
        assert!(matches!(peril_err, PerilError::Transport(_)));
        assert!(peril_err.to_string().contains("gone"));
    }

    #[test]
    fn test_from_pubsub_error() {
        let err = PubSubError::Binding("no exchange".into());
        let peril_err: PerilError = err.into();
        assert!(matches!(peril_err, PerilError::PubSub(_)));
        assert!(peril_err.to_string().contains("no exchange"));
    }

    #[test]
    fn test_from_game_error() {
        let peril_err: PerilError = GameError::Paused.into();
        assert!(matches!(peril_err, PerilError::Game(GameError::Paused)));
    }
}
