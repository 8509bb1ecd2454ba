//! `BrokerServer` builder and accept loop.
//!
//! Puts the broker actor on the network: every accepted WebSocket
//! connection gets a handler task that speaks [`ClientFrame`] /
//! [`ServerFrame`](peril_protocol::ServerFrame) JSON and forwards calls to
//! the shared [`BrokerHandle`].
//!
//! [`ClientFrame`]: peril_protocol::ClientFrame

use std::sync::Arc;
use std::time::Duration;

use peril_protocol::{Codec, JsonCodec};
use peril_transport::{Transport, WebSocketTransport};

use crate::handler::handle_connection;
use crate::{Authenticator, BrokerConfig, BrokerError, BrokerHandle, spawn_broker};

/// Shared state passed to each connection handler task.
pub(crate) struct ServerState<A: Authenticator, C: Codec> {
    pub(crate) broker: BrokerHandle,
    pub(crate) auth: A,
    pub(crate) codec: C,
    pub(crate) handshake_timeout: Duration,
}

/// Builder for configuring and starting a broker server.
///
/// # Example
///
/// ```rust,ignore
/// let server = BrokerServer::builder()
///     .bind("127.0.0.1:5672")
///     .config(BrokerConfig::default().with_exchange("peril_topic", ExchangeKind::Topic))
///     .build(StaticCredentials::single("guest", "guest"))
///     .await?;
/// server.run().await
/// ```
pub struct BrokerServerBuilder {
    bind_addr: String,
    config: BrokerConfig,
}

impl BrokerServerBuilder {
    /// Creates a new builder with default settings.
    pub fn new() -> Self {
        Self {
            bind_addr: "127.0.0.1:5672".to_string(),
            config: BrokerConfig::default(),
        }
    }

    /// Sets the address to bind the server to.
    pub fn bind(mut self, addr: &str) -> Self {
        self.bind_addr = addr.to_string();
        self
    }

    /// Sets the broker configuration.
    pub fn config(mut self, config: BrokerConfig) -> Self {
        self.config = config;
        self
    }

    /// Binds the listener, starts the broker actor, and returns the
    /// server ready to [`run`](BrokerServer::run).
    pub async fn build<A: Authenticator>(
        self,
        auth: A,
    ) -> Result<BrokerServer<A, JsonCodec>, BrokerError> {
        let transport = WebSocketTransport::bind(&self.bind_addr).await?;
        let broker = spawn_broker(&self.config)?;

        let state = Arc::new(ServerState {
            broker,
            auth,
            codec: JsonCodec,
            handshake_timeout: self.config.handshake_timeout,
        });

        Ok(BrokerServer { transport, state })
    }
}

impl Default for BrokerServerBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// A broker listening for WebSocket connections.
///
/// Call [`run()`](Self::run) to start accepting connections.
pub struct BrokerServer<A: Authenticator, C: Codec> {
    transport: WebSocketTransport,
    state: Arc<ServerState<A, C>>,
}

impl BrokerServer<crate::StaticCredentials, JsonCodec> {
    /// Creates a new builder.
    pub fn builder() -> BrokerServerBuilder {
        BrokerServerBuilder::new()
    }
}

impl<A, C> BrokerServer<A, C>
where
    A: Authenticator,
    C: Codec,
{
    /// Returns the local address the server is bound to.
    pub fn local_addr(&self) -> std::io::Result<std::net::SocketAddr> {
        self.transport.local_addr()
    }

    /// Returns a handle to the broker behind this server, for in-process
    /// clients and shutdown.
    pub fn handle(&self) -> BrokerHandle {
        self.state.broker.clone()
    }

    /// Runs the accept loop until the broker actor stops.
    pub async fn run(mut self) -> Result<(), BrokerError> {
        tracing::info!(addr = ?self.transport.local_addr().ok(), "broker server running");

        loop {
            if self.state.broker.is_closed() {
                tracing::info!("broker stopped, server exiting");
                return Ok(());
            }
            match self.transport.accept().await {
                Ok(conn) => {
                    let state = Arc::clone(&self.state);
                    tokio::spawn(async move {
                        if let Err(e) = handle_connection(conn, state).await {
                            tracing::debug!(error = %e, "connection ended with error");
                        }
                    });
                }
                Err(e) => {
                    tracing::error!(error = %e, "accept failed");
                }
            }
        }
    }
}
