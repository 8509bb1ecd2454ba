//! Typed publish/subscribe for Peril.
//!
//! Game processes never speak the broker protocol directly. They publish
//! typed values and subscribe typed handlers through this crate:
//!
//! - **Connections** ([`BrokerConnection`], [`LocalConnection`],
//!   [`RemoteConnection`]): in-process or over WebSocket.
//! - **Channels** ([`Channel`]): topology, flow control, ack/nack.
//! - **Queues** ([`declare_and_bind`], [`SimpleQueueType`]).
//! - **Publishing** ([`publish`], [`publish_json`], [`publish_bincode`]).
//! - **Subscribing** ([`subscribe`], [`subscribe_json`],
//!   [`subscribe_bincode`], [`Handler`], [`AckType`]).
//!
//! # Architecture
//!
//! ```text
//! game logic → pub/sub (typed) → protocol (frames) → transport (bytes) → broker
//! ```

#![allow(async_fn_in_trait)]

mod channel;
mod connection;
mod error;
mod local;
mod publish;
mod queue;
mod remote;
mod subscribe;

pub use channel::Channel;
pub use connection::BrokerConnection;
pub use error::PubSubError;
pub use local::LocalConnection;
pub use publish::{publish, publish_bincode, publish_json};
pub use queue::{DEAD_LETTER_EXCHANGE, SimpleQueueType, declare_and_bind};
pub use remote::RemoteConnection;
pub use subscribe::{
    AckType, DEFAULT_PREFETCH, DecodeFailurePolicy, Handler, SubscribeOptions,
    Subscription, subscribe, subscribe_bincode, subscribe_json,
};
