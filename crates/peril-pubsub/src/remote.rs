//! WebSocket connection to a broker in another process.
//!
//! One reader task owns the receive half of the socket. It resolves
//! pending calls by request id and pushes deliveries to consumers by tag:
//!
//! ```text
//!  request() ──Call{id}──▶ socket ──▶ broker
//!      ▲                                 │
//!      └── pending[id] ◀── reader ◀──────┤ Reply{id}
//!   consumer stream ◀── router ◀─ reader ◀┘ Deliver{tag}
//! ```

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU16, AtomicU64, Ordering};

use peril_protocol::{
    BrokerFault, ChannelId, ClientFrame, Codec, Delivery, JsonCodec, PROTOCOL_VERSION,
    Reply, Request, ServerFrame,
};
use peril_transport::{Connection, WebSocketConnection};
use tokio::sync::{Mutex, mpsc, oneshot};
use tokio::task::JoinHandle;

use crate::connection::ConsumerRouter;
use crate::{BrokerConnection, PubSubError};

type Pending = Mutex<HashMap<u64, oneshot::Sender<Result<Reply, BrokerFault>>>>;

/// A broker connection over WebSocket.
pub struct RemoteConnection {
    socket: Arc<WebSocketConnection>,
    codec: JsonCodec,
    pending: Arc<Pending>,
    router: Arc<ConsumerRouter>,
    next_id: AtomicU64,
    next_channel: AtomicU16,
    closed: AtomicBool,
    connection: u64,
    reader: JoinHandle<()>,
}

impl RemoteConnection {
    /// Dials the broker at `url` (`ws://host:port`) and performs the
    /// handshake with the given credentials.
    pub async fn connect(url: &str, username: &str, password: &str) -> Result<Self, PubSubError> {
        let socket = WebSocketConnection::connect(url).await?;
        let codec = JsonCodec;

        let hello = ClientFrame::Hello {
            version: PROTOCOL_VERSION,
            username: username.to_string(),
            password: password.to_string(),
        };
        socket.send(&codec.encode(&hello)?).await?;

        let data = socket
            .recv()
            .await?
            .ok_or_else(|| PubSubError::Transport("broker closed during handshake".into()))?;
        let connection = match codec.decode::<ServerFrame>(&data)? {
            ServerFrame::Welcome { connection } => connection,
            ServerFrame::Refused { fault } => {
                return Err(PubSubError::Transport(format!("handshake refused: {fault}")));
            }
            other => {
                return Err(PubSubError::Transport(format!(
                    "unexpected frame during handshake: {other:?}"
                )));
            }
        };

        let socket = Arc::new(socket);
        let pending: Arc<Pending> = Arc::new(Mutex::new(HashMap::new()));
        let router = Arc::new(ConsumerRouter::default());
        let reader = tokio::spawn(read_frames(
            Arc::clone(&socket),
            Arc::clone(&pending),
            Arc::clone(&router),
        ));

        tracing::info!(url, connection, "connected to broker");
        Ok(Self {
            socket,
            codec,
            pending,
            router,
            next_id: AtomicU64::new(1),
            next_channel: AtomicU16::new(1),
            closed: AtomicBool::new(false),
            connection,
            reader,
        })
    }

    /// Broker-assigned connection number from the handshake.
    pub fn connection_number(&self) -> u64 {
        self.connection
    }
}

/// Reader task: runs until the socket closes or fails, then fails every
/// pending call and ends every consumer stream.
async fn read_frames(
    socket: Arc<WebSocketConnection>,
    pending: Arc<Pending>,
    router: Arc<ConsumerRouter>,
) {
    let codec = JsonCodec;
    loop {
        let data = match socket.recv().await {
            Ok(Some(data)) => data,
            Ok(None) => {
                tracing::debug!("broker connection closed");
                break;
            }
            Err(e) => {
                tracing::warn!(error = %e, "broker connection failed");
                break;
            }
        };

        match codec.decode::<ServerFrame>(&data) {
            Ok(ServerFrame::Reply { id, result }) => {
                if let Some(tx) = pending.lock().await.remove(&id) {
                    let _ = tx.send(result);
                }
            }
            Ok(ServerFrame::Deliver { delivery }) => router.route(delivery).await,
            Ok(other) => tracing::debug!(frame = ?other, "ignoring unexpected frame"),
            Err(e) => tracing::warn!(error = %e, "undecodable frame from broker"),
        }
    }

    pending.lock().await.clear();
    router.close_all().await;
}

fn connection_lost() -> PubSubError {
    PubSubError::Transport("broker connection lost".into())
}

impl BrokerConnection for RemoteConnection {
    async fn open_channel(&self) -> Result<ChannelId, PubSubError> {
        let channel = ChannelId(self.next_channel.fetch_add(1, Ordering::Relaxed));
        self.request(channel, Request::OpenChannel).await?;
        Ok(channel)
    }

    async fn request(&self, channel: ChannelId, request: Request) -> Result<Reply, PubSubError> {
        if self.closed.load(Ordering::Acquire) {
            return Err(PubSubError::closed());
        }
        if self.reader.is_finished() {
            return Err(connection_lost());
        }
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let bytes = self.codec.encode(&ClientFrame::Call {
            id,
            channel,
            request,
        })?;

        let (tx, rx) = oneshot::channel();
        self.pending.lock().await.insert(id, tx);
        if let Err(e) = self.socket.send(&bytes).await {
            self.pending.lock().await.remove(&id);
            return Err(e.into());
        }

        match rx.await {
            Ok(Ok(reply)) => Ok(reply),
            Ok(Err(fault)) => Err(fault.into()),
            Err(_) if self.closed.load(Ordering::Acquire) => Err(PubSubError::closed()),
            Err(_) => Err(connection_lost()),
        }
    }

    async fn register_consumer(&self, consumer_tag: &str) -> mpsc::UnboundedReceiver<Delivery> {
        self.router.register(consumer_tag).await
    }

    async fn unregister_consumer(&self, consumer_tag: &str) {
        self.router.unregister(consumer_tag).await;
    }

    async fn close(&self) -> Result<(), PubSubError> {
        if self.closed.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        tracing::info!(connection = self.connection, "closing broker connection");

        if let Ok(bytes) = self.codec.encode(&ClientFrame::Goodbye) {
            let _ = self.socket.send(&bytes).await;
        }
        if let Err(e) = self.socket.close().await {
            tracing::debug!(error = %e, "socket already closed");
        }

        self.reader.abort();
        self.pending.lock().await.clear();
        self.router.close_all().await;
        Ok(())
    }
}

impl Drop for RemoteConnection {
    fn drop(&mut self) {
        self.reader.abort();
    }
}
