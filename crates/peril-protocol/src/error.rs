//! Error types for the protocol layer.
//!
//! A `ProtocolError` always means bytes could not be turned into a value
//! (or back). Broker-side refusals travel as [`BrokerFault`](crate::BrokerFault)
//! instead, because they are data on the wire, not local failures.

/// Errors that can occur in the protocol layer.
#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    /// JSON serialization failed.
    #[cfg(feature = "json")]
    #[error("encode failed: {0}")]
    Encode(serde_json::Error),

    /// JSON deserialization failed.
    ///
    /// Common causes: malformed JSON, missing required fields,
    /// wrong data types, or truncated messages.
    #[cfg(feature = "json")]
    #[error("decode failed: {0}")]
    Decode(serde_json::Error),

    /// Bincode serialization failed.
    #[cfg(feature = "bincode")]
    #[error("bincode encode failed: {0}")]
    BincodeEncode(bincode::Error),

    /// Bincode deserialization failed.
    ///
    /// Bincode is not self-describing, so a payload written for a
    /// different type usually fails here with an unexpected-end or
    /// invalid-length error rather than a field name.
    #[cfg(feature = "bincode")]
    #[error("bincode decode failed: {0}")]
    BincodeDecode(bincode::Error),

    /// The message is invalid at the protocol level.
    ///
    /// This is for logical errors that pass deserialization but
    /// violate protocol rules, e.g. a frame that arrives before the
    /// handshake completed.
    #[error("invalid message: {0}")]
    InvalidMessage(String),
}

impl ProtocolError {
    /// Returns `true` if this error came from turning bytes into a value.
    pub fn is_decode(&self) -> bool {
        match self {
            #[cfg(feature = "json")]
            Self::Decode(_) => true,
            #[cfg(feature = "bincode")]
            Self::BincodeDecode(_) => true,
            _ => false,
        }
    }
}
