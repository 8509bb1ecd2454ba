//! # Peril
//!
//! A multiplayer war game played entirely over a pub/sub broker. Each
//! player runs a client process; a server process controls pausing and
//! collects the war log.
//!
//! This crate wires the game rules ([`peril_game`]) to the broker
//! ([`peril_pubsub`]):
//!
//! - [`client::ClientSession`]: one player's subscriptions and commands.
//! - [`server::ServerSession`]: pause broadcasts and the war log.
//! - [`connect`]: dial a broker from a `ws://user:pass@host:port` URL.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//!
//! use peril::{PerilConfig, client::ClientSession};
//!
//! # async fn run() -> Result<(), peril::PerilError> {
//! let config = PerilConfig::from_env()?;
//! let conn = Arc::new(peril::connect(&config.broker_url).await?);
//! let session = ClientSession::start(conn, "alice", config.subscribe_options()).await?;
//! session.spawn(peril_game::Rank::Infantry, "europe".into()).await;
//! session.shutdown().await
//! # }
//! ```

pub mod client;
pub mod config;
mod error;
pub mod logging;
pub mod server;
pub mod topology;

pub use config::{BrokerUrl, PerilConfig};
pub use error::PerilError;

use peril_pubsub::RemoteConnection;

/// Connects to the broker at `url` (`ws://user:pass@host:port`).
pub async fn connect(url: &str) -> Result<RemoteConnection, PerilError> {
    let broker = BrokerUrl::parse(url)?;
    let conn = RemoteConnection::connect(&broker.address, &broker.username, &broker.password).await?;
    tracing::info!(
        address = %broker.address,
        username = %broker.username,
        connection = conn.connection_number(),
        "connected"
    );
    Ok(conn)
}
