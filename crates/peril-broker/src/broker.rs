//! Broker actor: one Tokio task that owns all broker state.
//!
//! Connection handlers, in-process clients, and tests talk to the broker
//! through a [`BrokerHandle`]. Every command goes through a single mpsc
//! channel, so requests are applied one at a time, in arrival order.

use peril_protocol::{BrokerFault, ChannelId, QueueInfo, Reply, Request};
use tokio::sync::{mpsc, oneshot};

use crate::state::{BrokerState, ConnectionKey, DeliverySink};
use crate::{BrokerConfig, BrokerError};

/// Commands sent to the broker actor through its channel.
///
/// The `oneshot::Sender` in some variants is a reply channel: the caller
/// sends a command and waits for the response on it.
pub(crate) enum BrokerCommand {
    /// Register a connection and the sink its deliveries go to.
    Connect {
        sink: DeliverySink,
        reply: oneshot::Sender<ConnectionKey>,
    },

    /// Drop a connection. Its unacked messages are requeued.
    Disconnect { connection: ConnectionKey },

    /// Execute one channel request.
    Call {
        connection: ConnectionKey,
        channel: ChannelId,
        request: Request,
        reply: oneshot::Sender<Result<Reply, BrokerFault>>,
    },

    /// Look up a queue's counters.
    QueueInfo {
        queue: String,
        reply: oneshot::Sender<Option<QueueInfo>>,
    },

    /// Stop the actor.
    Shutdown,
}

/// Handle to a running broker actor.
///
/// Cheap to clone: it's just an `mpsc::Sender` wrapper.
#[derive(Clone)]
pub struct BrokerHandle {
    sender: mpsc::Sender<BrokerCommand>,
}

impl BrokerHandle {
    /// Registers a new connection. Deliveries for its consumers are
    /// pushed into `sink`.
    pub async fn connect(&self, sink: DeliverySink) -> Result<ConnectionKey, BrokerError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.sender
            .send(BrokerCommand::Connect {
                sink,
                reply: reply_tx,
            })
            .await
            .map_err(|_| BrokerError::Unavailable)?;
        reply_rx.await.map_err(|_| BrokerError::Unavailable)
    }

    /// Drops a connection (fire-and-forget).
    pub async fn disconnect(&self, connection: ConnectionKey) -> Result<(), BrokerError> {
        self.sender
            .send(BrokerCommand::Disconnect { connection })
            .await
            .map_err(|_| BrokerError::Unavailable)
    }

    /// Like [`disconnect`](Self::disconnect) but usable from `Drop`.
    pub fn disconnect_now(&self, connection: ConnectionKey) {
        let sender = self.sender.clone();
        if sender
            .try_send(BrokerCommand::Disconnect { connection })
            .is_err()
        {
            tokio::spawn(async move {
                let _ = sender.send(BrokerCommand::Disconnect { connection }).await;
            });
        }
    }

    /// Executes a channel request and waits for the broker's answer.
    ///
    /// The outer `Result` is about reaching the broker; a refusal comes
    /// back as [`BrokerError::Fault`].
    pub async fn call(
        &self,
        connection: ConnectionKey,
        channel: ChannelId,
        request: Request,
    ) -> Result<Reply, BrokerError> {
        self.call_raw(connection, channel, request)
            .await?
            .map_err(BrokerError::Fault)
    }

    /// Same as [`call`](Self::call), but keeps the fault as a value so a
    /// server can forward it to its client verbatim.
    pub async fn call_raw(
        &self,
        connection: ConnectionKey,
        channel: ChannelId,
        request: Request,
    ) -> Result<Result<Reply, BrokerFault>, BrokerError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.sender
            .send(BrokerCommand::Call {
                connection,
                channel,
                request,
                reply: reply_tx,
            })
            .await
            .map_err(|_| BrokerError::Unavailable)?;
        reply_rx.await.map_err(|_| BrokerError::Unavailable)
    }

    /// Returns the queue's counters, or `None` if it doesn't exist.
    pub async fn queue_info(&self, queue: impl Into<String>) -> Result<Option<QueueInfo>, BrokerError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.sender
            .send(BrokerCommand::QueueInfo {
                queue: queue.into(),
                reply: reply_tx,
            })
            .await
            .map_err(|_| BrokerError::Unavailable)?;
        reply_rx.await.map_err(|_| BrokerError::Unavailable)
    }

    /// Tells the broker to shut down.
    pub async fn shutdown(&self) -> Result<(), BrokerError> {
        self.sender
            .send(BrokerCommand::Shutdown)
            .await
            .map_err(|_| BrokerError::Unavailable)
    }

    /// Returns `true` once the actor has stopped.
    pub fn is_closed(&self) -> bool {
        self.sender.is_closed()
    }
}

/// The internal actor. Runs inside a Tokio task.
struct BrokerActor {
    state: BrokerState,
    receiver: mpsc::Receiver<BrokerCommand>,
}

impl BrokerActor {
    /// Runs the actor loop, processing commands until shutdown.
    async fn run(mut self) {
        tracing::info!("broker actor started");

        while let Some(cmd) = self.receiver.recv().await {
            match cmd {
                BrokerCommand::Connect { sink, reply } => {
                    let key = self.state.connect(sink);
                    if reply.send(key).is_err() {
                        // Caller gave up before hearing back.
                        self.state.disconnect(key);
                    }
                }
                BrokerCommand::Disconnect { connection } => {
                    self.state.disconnect(connection);
                }
                BrokerCommand::Call {
                    connection,
                    channel,
                    request,
                    reply,
                } => {
                    let result = self.state.handle(connection, channel, request);
                    if let Err(fault) = &result {
                        tracing::debug!(connection, %channel, %fault, "request refused");
                    }
                    let _ = reply.send(result);
                }
                BrokerCommand::QueueInfo { queue, reply } => {
                    let _ = reply.send(self.state.queue_info(&queue));
                }
                BrokerCommand::Shutdown => {
                    tracing::info!(
                        connections = self.state.connection_count(),
                        "broker shutting down"
                    );
                    break;
                }
            }
        }

        tracing::info!("broker actor stopped");
    }
}

/// Spawns the broker actor, declares the configured topology, and
/// returns a handle to it.
///
/// Fails if two configured exchanges share a name with different kinds,
/// a configured queue is exclusive or conflicts with another, or a
/// binding names an unknown queue or exchange.
pub fn spawn_broker(config: &BrokerConfig) -> Result<BrokerHandle, BrokerError> {
    let mut state = BrokerState::new();
    for (name, kind) in &config.exchanges {
        state.declare_exchange(name, *kind)?;
    }
    for (name, options) in &config.queues {
        state.declare_broker_queue(name, options.clone())?;
    }
    for binding in &config.bindings {
        state.bind_broker_queue(&binding.queue, &binding.exchange, &binding.routing_key)?;
    }

    let (tx, rx) = mpsc::channel(config.command_buffer);
    let actor = BrokerActor {
        state,
        receiver: rx,
    };
    tokio::spawn(actor.run());

    Ok(BrokerHandle { sender: tx })
}
