//! Codec trait and implementations for serializing/deserializing payloads.
//!
//! A "codec" (coder/decoder) converts between Rust types and raw bytes.
//! Publishers and subscribers don't care HOW a payload is serialized;
//! they only need something that implements [`Codec`]. Two
//! implementations ship with this crate:
//!
//! - [`JsonCodec`]: human-readable and schema-flexible. Used for the
//!   gameplay events (moves, wars, pause state) whose shape changes often.
//! - [`BincodeCodec`]: compact binary. Used for the game log stream,
//!   where one kind of process writes and another only reads.
//!
//! Every codec also names the content type it stamps on published
//! messages, so a consumer can tell what it is looking at.

use serde::{Serialize, de::DeserializeOwned};

use crate::ProtocolError;

/// A codec that can encode Rust types to bytes and decode bytes back.
///
/// ## Trait bounds explained
///
/// - `Send + Sync` → safe to share between threads (subscription loops
///   run on Tokio's thread pool).
/// - `'static` → the codec owns everything it needs, so it can be moved
///   into a long-lived delivery task.
///
/// `DeserializeOwned` (vs plain `Deserialize`) means the decoded value
/// doesn't borrow from the input bytes, so the delivery buffer can be
/// dropped right after decoding.
pub trait Codec: Send + Sync + 'static {
    /// MIME type stamped on messages produced by this codec.
    const CONTENT_TYPE: &'static str;

    /// Serializes a value into bytes.
    ///
    /// # Errors
    /// Returns an encode variant of [`ProtocolError`] if the value cannot
    /// be represented in this format.
    fn encode<T: Serialize>(&self, value: &T) -> Result<Vec<u8>, ProtocolError>;

    /// Deserializes bytes back into a value.
    ///
    /// # Errors
    /// Returns a decode variant of [`ProtocolError`] if the bytes are
    /// malformed, incomplete, or don't match the expected type.
    fn decode<T: DeserializeOwned>(&self, data: &[u8]) -> Result<T, ProtocolError>;

    /// Returns [`Self::CONTENT_TYPE`]; handy when the codec is generic.
    fn content_type(&self) -> &'static str {
        Self::CONTENT_TYPE
    }
}

// ---------------------------------------------------------------------------
// JsonCodec
// ---------------------------------------------------------------------------

/// A [`Codec`] that uses JSON (via `serde_json`).
///
/// ## Example
///
/// ```rust
/// use peril_protocol::{Codec, JsonCodec};
///
/// let codec = JsonCodec;
/// let bytes = codec.encode(&vec!["europe", "asia"]).unwrap();
/// let decoded: Vec<String> = codec.decode(&bytes).unwrap();
/// assert_eq!(decoded, ["europe", "asia"]);
/// assert_eq!(codec.content_type(), "application/json");
/// ```
#[cfg(feature = "json")]
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonCodec;

#[cfg(feature = "json")]
impl Codec for JsonCodec {
    const CONTENT_TYPE: &'static str = "application/json";

    fn encode<T: Serialize>(&self, value: &T) -> Result<Vec<u8>, ProtocolError> {
        serde_json::to_vec(value).map_err(ProtocolError::Encode)
    }

    fn decode<T: DeserializeOwned>(&self, data: &[u8]) -> Result<T, ProtocolError> {
        serde_json::from_slice(data).map_err(ProtocolError::Decode)
    }
}

// ---------------------------------------------------------------------------
// BincodeCodec
// ---------------------------------------------------------------------------

/// A [`Codec`] that uses bincode's compact binary format.
///
/// Bincode is not self-describing: the reader must decode into exactly
/// the type the writer encoded. That is fine for the log stream, and it
/// is why gameplay events stay on JSON.
///
/// Types that rely on `deserialize_any` (internally tagged enums,
/// `serde_json::Value`) cannot go through this codec.
#[cfg(feature = "bincode")]
#[derive(Debug, Clone, Copy, Default)]
pub struct BincodeCodec;

#[cfg(feature = "bincode")]
impl Codec for BincodeCodec {
    const CONTENT_TYPE: &'static str = "application/x-bincode";

    fn encode<T: Serialize>(&self, value: &T) -> Result<Vec<u8>, ProtocolError> {
        bincode::serialize(value).map_err(ProtocolError::BincodeEncode)
    }

    fn decode<T: DeserializeOwned>(&self, data: &[u8]) -> Result<T, ProtocolError> {
        bincode::deserialize(data).map_err(ProtocolError::BincodeDecode)
    }
}
