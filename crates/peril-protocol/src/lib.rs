//! Wire protocol for Peril.
//!
//! This crate defines the "language" spoken between game processes and
//! the broker, and how typed payloads become bytes:
//!
//! - **Codec** ([`Codec`] trait, [`JsonCodec`], [`BincodeCodec`]): how
//!   payloads are converted to/from bytes, and which content type they
//!   carry.
//! - **Types** ([`Request`], [`Reply`], [`Delivery`], frames, topology
//!   vocabulary): what travels between a process and the broker.
//! - **Errors** ([`ProtocolError`]): what can go wrong during
//!   encoding/decoding.
//!
//! # Architecture
//!
//! ```text
//! Transport (bytes) → Protocol (frames) → Broker / Pub-Sub client
//! ```

mod codec;
mod error;
mod types;

pub use codec::Codec;
#[cfg(feature = "bincode")]
pub use codec::BincodeCodec;
#[cfg(feature = "json")]
pub use codec::JsonCodec;
pub use error::ProtocolError;
pub use types::{
    BrokerFault, ChannelId, ClientFrame, Delivery, ExchangeKind, FaultCode,
    Message, PROTOCOL_VERSION, QueueInfo, QueueOptions, Reply, Request,
    ServerFrame,
};
