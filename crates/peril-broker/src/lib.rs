//! In-memory message broker for Peril.
//!
//! All game traffic flows through exchanges and queues owned by one
//! broker actor (a Tokio task). Processes reach it either in-process,
//! through a [`BrokerHandle`], or over WebSocket via [`BrokerServer`].
//!
//! # Key types
//!
//! - [`BrokerHandle`]: send commands to the running broker actor
//! - [`BrokerServer`]: WebSocket front end with a handshake
//! - [`BrokerConfig`]: pre-declared exchanges and limits
//! - [`Authenticator`]: credential check run on every handshake
//!
//! # Semantics
//!
//! - Exchanges are `direct`, `topic` (`*` / `#` wildcards), or `fanout`.
//!   The default exchange `""` routes to the queue named by the key.
//! - Queues are durable or transient (exclusive + auto-delete).
//!   Re-declaring with different options is `PRECONDITION_FAILED`.
//! - Each channel has a prefetch window; consumers of a shared queue get
//!   messages round-robin.
//! - `Nack { requeue: true }` puts the message back at the head with
//!   `redelivered` set. `requeue: false` sends it to the queue's
//!   dead-letter exchange, if any.
//! - When a connection goes away its unacked messages are requeued and
//!   its exclusive queues are deleted.

#![allow(async_fn_in_trait)]

mod auth;
mod broker;
mod config;
mod error;
mod handler;
mod routing;
mod server;
mod state;

pub use auth::{Authenticator, StaticCredentials};
pub use broker::{BrokerHandle, spawn_broker};
pub use config::{BrokerConfig, QueueBinding};
pub use error::BrokerError;
pub use routing::{binding_matches, topic_matches};
pub use server::{BrokerServer, BrokerServerBuilder};
pub use state::{ConnectionKey, DEATH_HEADER, DeliverySink};
