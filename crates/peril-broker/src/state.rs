//! Broker state: exchanges, queues, connections, channels, consumers.
//!
//! `BrokerState` is plain synchronous data. It is owned by exactly one
//! task (the broker actor in `broker.rs`) and never shared, so it needs
//! no locking of its own.
//!
//! # Delivery model
//!
//! ```text
//! publish ──▶ exchange ──(bindings)──▶ queue.ready ──dispatch──▶ consumer sink
//!                                          ▲                       │
//!                                          │ nack(requeue)         ▼
//!                                          └────────────── channel.unacked
//!                                                                  │ nack(discard)
//!                                                                  ▼
//!                                                          dead-letter exchange
//! ```
//!
//! A consumer only receives a message while its channel has room in its
//! prefetch window. Acks free room and trigger another dispatch pass.

use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};

use peril_protocol::{
    BrokerFault, ChannelId, Delivery, ExchangeKind, FaultCode, Message,
    QueueInfo, QueueOptions, Reply, Request,
};
use tokio::sync::mpsc;

use crate::routing::binding_matches;

/// Where the broker pushes deliveries for one connection.
pub type DeliverySink = mpsc::UnboundedSender<Delivery>;

/// Broker-assigned connection number.
pub type ConnectionKey = u64;

/// Owner of queues declared from [`BrokerConfig`](crate::BrokerConfig).
/// Client connections are numbered from 1.
const BROKER_OWNER: ConnectionKey = 0;

/// Header the broker stamps on dead-lettered messages.
pub const DEATH_HEADER: &str = "x-death";

struct Exchange {
    kind: ExchangeKind,
    bindings: Vec<Binding>,
}

#[derive(PartialEq, Eq)]
struct Binding {
    queue: String,
    routing_key: String,
}

/// A message sitting in a queue or in flight to a consumer.
#[derive(Clone)]
struct Queued {
    exchange: String,
    routing_key: String,
    message: Message,
    redelivered: bool,
}

struct Queue {
    options: QueueOptions,
    /// Connection that declared the queue. Only meaningful for exclusive
    /// queues.
    owner: ConnectionKey,
    ready: VecDeque<Queued>,
    /// Round-robin order of consumers.
    consumers: Vec<(ConnectionKey, String)>,
    cursor: usize,
    had_consumer: bool,
}

impl Queue {
    fn info(&self, name: &str) -> QueueInfo {
        QueueInfo {
            name: name.to_string(),
            message_count: self.ready.len(),
            consumer_count: self.consumers.len(),
        }
    }
}

struct Consumer {
    channel: ChannelId,
    queue: String,
}

#[derive(Default)]
struct ChannelState {
    prefetch: u16,
    last_tag: u64,
    unacked: BTreeMap<u64, InFlight>,
}

impl ChannelState {
    fn has_capacity(&self) -> bool {
        self.prefetch == 0 || self.unacked.len() < usize::from(self.prefetch)
    }
}

struct InFlight {
    queue: String,
    item: Queued,
}

struct ConnectionState {
    sink: DeliverySink,
    channels: HashMap<ChannelId, ChannelState>,
    consumers: HashMap<String, Consumer>,
}

fn fault(code: FaultCode, message: impl Into<String>) -> BrokerFault {
    BrokerFault {
        code,
        message: message.into(),
    }
}

/// The whole broker: topology plus per-connection bookkeeping.
pub(crate) struct BrokerState {
    exchanges: HashMap<String, Exchange>,
    queues: HashMap<String, Queue>,
    connections: HashMap<ConnectionKey, ConnectionState>,
    next_connection: ConnectionKey,
}

impl BrokerState {
    pub(crate) fn new() -> Self {
        Self {
            exchanges: HashMap::new(),
            queues: HashMap::new(),
            connections: HashMap::new(),
            next_connection: 1,
        }
    }

    // -- Connections ------------------------------------------------------

    pub(crate) fn connect(&mut self, sink: DeliverySink) -> ConnectionKey {
        let key = self.next_connection;
        self.next_connection += 1;
        self.connections.insert(
            key,
            ConnectionState {
                sink,
                channels: HashMap::new(),
                consumers: HashMap::new(),
            },
        );
        tracing::info!(connection = key, "connection opened");
        key
    }

    /// Closes every channel of the connection, then drops its exclusive
    /// queues. Unacked deliveries go back to their queues.
    pub(crate) fn disconnect(&mut self, conn: ConnectionKey) {
        let Some(connection) = self.connections.get(&conn) else {
            return;
        };
        let channels: Vec<ChannelId> = connection.channels.keys().copied().collect();
        for channel in channels {
            self.close_channel(conn, channel);
        }
        self.connections.remove(&conn);

        self.queues.retain(|name, queue| {
            let owned = queue.options.exclusive && queue.owner == conn;
            if owned {
                tracing::debug!(queue = %name, "exclusive queue deleted with its connection");
            }
            !owned
        });
        self.prune_bindings();
        tracing::info!(connection = conn, "connection closed");
    }

    pub(crate) fn connection_count(&self) -> usize {
        self.connections.len()
    }

    // -- Requests ---------------------------------------------------------

    /// Executes one channel request for a connection.
    pub(crate) fn handle(
        &mut self,
        conn: ConnectionKey,
        channel: ChannelId,
        request: Request,
    ) -> Result<Reply, BrokerFault> {
        let connection = self
            .connections
            .get_mut(&conn)
            .ok_or_else(|| fault(FaultCode::NotFound, "connection is closed"))?;

        if let Request::OpenChannel = request {
            if connection.channels.contains_key(&channel) {
                return Err(fault(
                    FaultCode::NotAllowed,
                    format!("channel {channel} is already open"),
                ));
            }
            connection.channels.insert(channel, ChannelState::default());
            return Ok(Reply::Ok);
        }
        if !connection.channels.contains_key(&channel) {
            return Err(fault(
                FaultCode::NotFound,
                format!("channel {channel} is not open"),
            ));
        }

        match request {
            Request::OpenChannel => Ok(Reply::Ok),
            Request::CloseChannel => {
                self.close_channel(conn, channel);
                Ok(Reply::Ok)
            }
            Request::DeclareExchange { exchange, kind } => {
                self.declare_exchange(&exchange, kind)?;
                Ok(Reply::Ok)
            }
            Request::DeclareQueue { queue, options } => self
                .declare_queue(conn, &queue, options)
                .map(Reply::QueueDeclared),
            Request::BindQueue {
                queue,
                exchange,
                routing_key,
            } => {
                self.bind_queue(conn, &queue, &exchange, &routing_key)?;
                Ok(Reply::Ok)
            }
            Request::Qos { prefetch_count } => {
                if let Some(state) = self.channel_mut(conn, channel) {
                    state.prefetch = prefetch_count;
                }
                self.dispatch_channel(conn, channel);
                Ok(Reply::Ok)
            }
            Request::Consume {
                queue,
                consumer_tag,
            } => self.consume(conn, channel, &queue, consumer_tag),
            Request::Cancel { consumer_tag } => {
                self.cancel(conn, channel, &consumer_tag)?;
                Ok(Reply::Ok)
            }
            Request::Publish {
                exchange,
                routing_key,
                message,
            } => {
                self.route(&exchange, &routing_key, message)?;
                Ok(Reply::Ok)
            }
            Request::Ack { delivery_tag } => {
                self.take_in_flight(conn, channel, delivery_tag)?;
                self.dispatch_channel(conn, channel);
                Ok(Reply::Ok)
            }
            Request::Nack {
                delivery_tag,
                requeue,
            } => {
                let in_flight = self.take_in_flight(conn, channel, delivery_tag)?;
                if requeue {
                    self.requeue(in_flight);
                } else {
                    self.dead_letter(in_flight);
                }
                self.dispatch_channel(conn, channel);
                Ok(Reply::Ok)
            }
        }
    }

    pub(crate) fn declare_exchange(
        &mut self,
        name: &str,
        kind: ExchangeKind,
    ) -> Result<(), BrokerFault> {
        if name.is_empty() {
            return Err(fault(
                FaultCode::NotAllowed,
                "the default exchange cannot be redeclared",
            ));
        }
        if let Some(existing) = self.exchanges.get(name) {
            if existing.kind != kind {
                return Err(fault(
                    FaultCode::PreconditionFailed,
                    format!(
                        "inequivalent arg 'type' for exchange '{name}': received '{kind}' but current is '{}'",
                        existing.kind
                    ),
                ));
            }
            return Ok(());
        }
        self.exchanges.insert(
            name.to_string(),
            Exchange {
                kind,
                bindings: Vec::new(),
            },
        );
        tracing::debug!(exchange = name, %kind, "exchange declared");
        Ok(())
    }

    /// Declares a queue owned by the broker itself.
    pub(crate) fn declare_broker_queue(
        &mut self,
        name: &str,
        options: QueueOptions,
    ) -> Result<(), BrokerFault> {
        if options.exclusive {
            return Err(fault(
                FaultCode::NotAllowed,
                format!("configured queue '{name}' cannot be exclusive"),
            ));
        }
        self.declare_queue(BROKER_OWNER, name, options)?;
        Ok(())
    }

    pub(crate) fn bind_broker_queue(
        &mut self,
        queue: &str,
        exchange: &str,
        routing_key: &str,
    ) -> Result<(), BrokerFault> {
        self.bind_queue(BROKER_OWNER, queue, exchange, routing_key)
    }

    fn declare_queue(
        &mut self,
        conn: ConnectionKey,
        name: &str,
        options: QueueOptions,
    ) -> Result<QueueInfo, BrokerFault> {
        if name.is_empty() {
            return Err(fault(FaultCode::NotAllowed, "queue name must not be empty"));
        }
        if let Some(existing) = self.queues.get(name) {
            check_access(name, existing, conn)?;
            let current = &existing.options;
            let mismatch = if current.durable != options.durable {
                Some("durable")
            } else if current.exclusive != options.exclusive {
                Some("exclusive")
            } else if current.auto_delete != options.auto_delete {
                Some("auto_delete")
            } else if current.dead_letter_exchange != options.dead_letter_exchange {
                Some("x-dead-letter-exchange")
            } else {
                None
            };
            if let Some(arg) = mismatch {
                return Err(fault(
                    FaultCode::PreconditionFailed,
                    format!("inequivalent arg '{arg}' for queue '{name}'"),
                ));
            }
            return Ok(existing.info(name));
        }

        tracing::debug!(
            queue = name,
            durable = options.durable,
            exclusive = options.exclusive,
            "queue declared"
        );
        let queue = Queue {
            options,
            owner: conn,
            ready: VecDeque::new(),
            consumers: Vec::new(),
            cursor: 0,
            had_consumer: false,
        };
        let info = queue.info(name);
        self.queues.insert(name.to_string(), queue);
        Ok(info)
    }

    fn bind_queue(
        &mut self,
        conn: ConnectionKey,
        queue: &str,
        exchange: &str,
        routing_key: &str,
    ) -> Result<(), BrokerFault> {
        let existing = self
            .queues
            .get(queue)
            .ok_or_else(|| fault(FaultCode::NotFound, format!("no queue '{queue}'")))?;
        check_access(queue, existing, conn)?;

        let ex = self.exchanges.get_mut(exchange).ok_or_else(|| {
            fault(FaultCode::NotFound, format!("no exchange '{exchange}'"))
        })?;
        let binding = Binding {
            queue: queue.to_string(),
            routing_key: routing_key.to_string(),
        };
        if !ex.bindings.contains(&binding) {
            ex.bindings.push(binding);
            tracing::debug!(queue, exchange, routing_key, "queue bound");
        }
        Ok(())
    }

    fn consume(
        &mut self,
        conn: ConnectionKey,
        channel: ChannelId,
        queue: &str,
        consumer_tag: String,
    ) -> Result<Reply, BrokerFault> {
        let existing = self
            .queues
            .get(queue)
            .ok_or_else(|| fault(FaultCode::NotFound, format!("no queue '{queue}'")))?;
        check_access(queue, existing, conn)?;
        if consumer_tag.is_empty() {
            return Err(fault(FaultCode::NotAllowed, "consumer tag must not be empty"));
        }

        let connection = self
            .connections
            .get_mut(&conn)
            .ok_or_else(|| fault(FaultCode::NotFound, "connection is closed"))?;
        if connection.consumers.contains_key(&consumer_tag) {
            return Err(fault(
                FaultCode::NotAllowed,
                format!("attempt to reuse consumer tag '{consumer_tag}'"),
            ));
        }
        connection.consumers.insert(
            consumer_tag.clone(),
            Consumer {
                channel,
                queue: queue.to_string(),
            },
        );
        if let Some(q) = self.queues.get_mut(queue) {
            q.consumers.push((conn, consumer_tag.clone()));
            q.had_consumer = true;
        }
        tracing::debug!(connection = conn, %channel, queue, consumer_tag, "consumer started");

        self.dispatch(queue);
        Ok(Reply::ConsumeStarted { consumer_tag })
    }

    fn cancel(
        &mut self,
        conn: ConnectionKey,
        channel: ChannelId,
        consumer_tag: &str,
    ) -> Result<(), BrokerFault> {
        let on_channel = self
            .connections
            .get(&conn)
            .and_then(|c| c.consumers.get(consumer_tag))
            .is_some_and(|c| c.channel == channel);
        if !on_channel {
            return Err(fault(
                FaultCode::NotFound,
                format!("no consumer '{consumer_tag}' on channel {channel}"),
            ));
        }
        self.remove_consumer(conn, consumer_tag);
        Ok(())
    }

    /// Routes a message through an exchange into every matching queue.
    ///
    /// The default exchange (`""`) routes straight to the queue named by
    /// the routing key. Unroutable messages are dropped.
    fn route(
        &mut self,
        exchange: &str,
        routing_key: &str,
        message: Message,
    ) -> Result<usize, BrokerFault> {
        let targets: Vec<String> = if exchange.is_empty() {
            if self.queues.contains_key(routing_key) {
                vec![routing_key.to_string()]
            } else {
                Vec::new()
            }
        } else {
            let ex = self.exchanges.get(exchange).ok_or_else(|| {
                fault(FaultCode::NotFound, format!("no exchange '{exchange}'"))
            })?;
            let mut targets: Vec<String> = Vec::new();
            for binding in &ex.bindings {
                if binding_matches(ex.kind, &binding.routing_key, routing_key)
                    && !targets.contains(&binding.queue)
                {
                    targets.push(binding.queue.clone());
                }
            }
            targets
        };

        if targets.is_empty() {
            tracing::debug!(exchange, routing_key, "message unroutable, dropped");
            return Ok(0);
        }

        for name in &targets {
            if let Some(queue) = self.queues.get_mut(name) {
                queue.ready.push_back(Queued {
                    exchange: exchange.to_string(),
                    routing_key: routing_key.to_string(),
                    message: message.clone(),
                    redelivered: false,
                });
            }
        }
        for name in &targets {
            self.dispatch(name);
        }
        Ok(targets.len())
    }

    fn take_in_flight(
        &mut self,
        conn: ConnectionKey,
        channel: ChannelId,
        delivery_tag: u64,
    ) -> Result<InFlight, BrokerFault> {
        self.channel_mut(conn, channel)
            .and_then(|state| state.unacked.remove(&delivery_tag))
            .ok_or_else(|| {
                fault(
                    FaultCode::PreconditionFailed,
                    format!("unknown delivery tag {delivery_tag}"),
                )
            })
    }

    fn requeue(&mut self, in_flight: InFlight) {
        let InFlight { queue, mut item } = in_flight;
        if let Some(q) = self.queues.get_mut(&queue) {
            item.redelivered = true;
            q.ready.push_front(item);
            self.dispatch(&queue);
        }
    }

    fn dead_letter(&mut self, in_flight: InFlight) {
        let InFlight { queue, item } = in_flight;
        let dlx = self
            .queues
            .get(&queue)
            .and_then(|q| q.options.dead_letter_exchange.clone());
        let Some(dlx) = dlx else {
            tracing::debug!(queue = %queue, "message rejected without dead-letter exchange, dropped");
            return;
        };

        let mut message = item.message;
        message
            .headers
            .insert(DEATH_HEADER.to_string(), format!("rejected:{queue}"));
        match self.route(&dlx, &item.routing_key, message) {
            Ok(_) => {
                tracing::debug!(queue = %queue, exchange = %dlx, "message dead-lettered");
            }
            Err(f) => {
                tracing::warn!(queue = %queue, exchange = %dlx, fault = %f, "dead-lettering failed, dropped");
            }
        }
    }

    // -- Channels and consumers -------------------------------------------

    fn channel_mut(
        &mut self,
        conn: ConnectionKey,
        channel: ChannelId,
    ) -> Option<&mut ChannelState> {
        self.connections.get_mut(&conn)?.channels.get_mut(&channel)
    }

    fn close_channel(&mut self, conn: ConnectionKey, channel: ChannelId) {
        let Some(connection) = self.connections.get_mut(&conn) else {
            return;
        };
        let Some(state) = connection.channels.remove(&channel) else {
            return;
        };
        let tags: Vec<String> = connection
            .consumers
            .iter()
            .filter(|(_, c)| c.channel == channel)
            .map(|(tag, _)| tag.clone())
            .collect();

        // Back to the head of their queues, oldest first.
        let mut touched = HashSet::new();
        for (_, in_flight) in state.unacked.into_iter().rev() {
            if let Some(queue) = self.queues.get_mut(&in_flight.queue) {
                let mut item = in_flight.item;
                item.redelivered = true;
                queue.ready.push_front(item);
                touched.insert(in_flight.queue);
            }
        }
        for tag in tags {
            self.remove_consumer(conn, &tag);
        }
        for queue in touched {
            self.dispatch(&queue);
        }
        tracing::debug!(connection = conn, %channel, "channel closed");
    }

    fn remove_consumer(&mut self, conn: ConnectionKey, consumer_tag: &str) {
        let Some(consumer) = self
            .connections
            .get_mut(&conn)
            .and_then(|c| c.consumers.remove(consumer_tag))
        else {
            return;
        };
        let Some(queue) = self.queues.get_mut(&consumer.queue) else {
            return;
        };
        queue
            .consumers
            .retain(|(c, tag)| !(*c == conn && tag == consumer_tag));
        if queue.cursor >= queue.consumers.len() {
            queue.cursor = 0;
        }
        if queue.options.auto_delete && queue.had_consumer && queue.consumers.is_empty() {
            self.queues.remove(&consumer.queue);
            self.prune_bindings();
            tracing::debug!(queue = %consumer.queue, "auto-delete queue removed");
        }
    }

    fn prune_bindings(&mut self) {
        let queues = &self.queues;
        for exchange in self.exchanges.values_mut() {
            exchange
                .bindings
                .retain(|binding| queues.contains_key(&binding.queue));
        }
    }

    // -- Dispatch ---------------------------------------------------------

    fn dispatch_channel(&mut self, conn: ConnectionKey, channel: ChannelId) {
        let queues: HashSet<String> = match self.connections.get(&conn) {
            Some(connection) => connection
                .consumers
                .values()
                .filter(|c| c.channel == channel)
                .map(|c| c.queue.clone())
                .collect(),
            None => return,
        };
        for queue in queues {
            self.dispatch(&queue);
        }
    }

    /// Hands ready messages to consumers with room in their prefetch
    /// window, round-robin, until the queue is empty or nobody has room.
    fn dispatch(&mut self, queue_name: &str) {
        let mut dead: Vec<ConnectionKey> = Vec::new();

        loop {
            let Some(queue) = self.queues.get_mut(queue_name) else {
                break;
            };
            if queue.ready.is_empty() || queue.consumers.is_empty() {
                break;
            }

            let n = queue.consumers.len();
            let mut picked = None;
            for offset in 0..n {
                let idx = (queue.cursor + offset) % n;
                let (conn, tag) = &queue.consumers[idx];
                if dead.contains(conn) {
                    continue;
                }
                let has_room = self
                    .connections
                    .get(conn)
                    .and_then(|c| {
                        let consumer = c.consumers.get(tag)?;
                        c.channels.get(&consumer.channel)
                    })
                    .is_some_and(ChannelState::has_capacity);
                if has_room {
                    picked = Some(idx);
                    break;
                }
            }
            let Some(idx) = picked else {
                break;
            };
            queue.cursor = (idx + 1) % n;
            let (conn, tag) = queue.consumers[idx].clone();

            let Some(connection) = self.connections.get_mut(&conn) else {
                break;
            };
            let Some(channel) = connection.consumers.get(&tag).map(|c| c.channel) else {
                break;
            };
            let Some(state) = connection.channels.get_mut(&channel) else {
                break;
            };
            let Some(item) = queue.ready.pop_front() else {
                break;
            };

            state.last_tag += 1;
            let delivery_tag = state.last_tag;
            let delivery = Delivery {
                channel,
                consumer_tag: tag,
                delivery_tag,
                redelivered: item.redelivered,
                exchange: item.exchange.clone(),
                routing_key: item.routing_key.clone(),
                message: item.message.clone(),
            };

            if connection.sink.send(delivery).is_err() {
                // Receiver gone: the connection is dead even if nobody
                // told us yet.
                queue.ready.push_front(item);
                dead.push(conn);
                continue;
            }
            state.unacked.insert(
                delivery_tag,
                InFlight {
                    queue: queue_name.to_string(),
                    item,
                },
            );
        }

        for conn in dead {
            tracing::debug!(connection = conn, "delivery sink closed, dropping connection");
            self.disconnect(conn);
        }
    }

    // -- Introspection ----------------------------------------------------

    pub(crate) fn queue_info(&self, name: &str) -> Option<QueueInfo> {
        self.queues.get(name).map(|q| q.info(name))
    }
}

fn check_access(name: &str, queue: &Queue, conn: ConnectionKey) -> Result<(), BrokerFault> {
    if queue.options.exclusive && queue.owner != conn {
        return Err(fault(
            FaultCode::ResourceLocked,
            format!("cannot obtain exclusive access to locked queue '{name}'"),
        ));
    }
    Ok(())
}

// =========================================================================
// Tests
// =========================================================================

#[cfg(test)]
mod tests {
    //! Unit tests for `BrokerState`, driven synchronously without the
    //! actor. Deliveries are read straight off the connection sink.

    use super::*;

    const CH: ChannelId = ChannelId(1);

    fn durable() -> QueueOptions {
        QueueOptions {
            durable: true,
            dead_letter_exchange: Some("dlx".into()),
            ..QueueOptions::default()
        }
    }

    fn transient() -> QueueOptions {
        QueueOptions {
            exclusive: true,
            auto_delete: true,
            dead_letter_exchange: Some("dlx".into()),
            ..QueueOptions::default()
        }
    }

    fn broker() -> BrokerState {
        let mut state = BrokerState::new();
        state.declare_exchange("topic", ExchangeKind::Topic).unwrap();
        state.declare_exchange("direct", ExchangeKind::Direct).unwrap();
        state.declare_exchange("dlx", ExchangeKind::Fanout).unwrap();
        state
    }

    fn connect(state: &mut BrokerState) -> (ConnectionKey, mpsc::UnboundedReceiver<Delivery>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let conn = state.connect(tx);
        state.handle(conn, CH, Request::OpenChannel).unwrap();
        (conn, rx)
    }

    fn call(state: &mut BrokerState, conn: ConnectionKey, request: Request) -> Result<Reply, BrokerFault> {
        state.handle(conn, CH, request)
    }

    fn declare(state: &mut BrokerState, conn: ConnectionKey, queue: &str, options: QueueOptions) {
        call(state, conn, Request::DeclareQueue { queue: queue.into(), options }).unwrap();
    }

    fn bind(state: &mut BrokerState, conn: ConnectionKey, queue: &str, exchange: &str, key: &str) {
        call(
            state,
            conn,
            Request::BindQueue {
                queue: queue.into(),
                exchange: exchange.into(),
                routing_key: key.into(),
            },
        )
        .unwrap();
    }

    fn consume(state: &mut BrokerState, conn: ConnectionKey, queue: &str, tag: &str) {
        call(
            state,
            conn,
            Request::Consume {
                queue: queue.into(),
                consumer_tag: tag.into(),
            },
        )
        .unwrap();
    }

    fn publish(state: &mut BrokerState, conn: ConnectionKey, exchange: &str, key: &str, body: &str) {
        call(
            state,
            conn,
            Request::Publish {
                exchange: exchange.into(),
                routing_key: key.into(),
                message: Message::new("text/plain", body.as_bytes().to_vec()),
            },
        )
        .unwrap();
    }

    fn body(delivery: &Delivery) -> &str {
        std::str::from_utf8(&delivery.message.body).unwrap()
    }

    // =====================================================================
    // Declarations
    // =====================================================================

    #[test]
    fn test_declare_queue_same_options_is_idempotent() {
        let mut state = broker();
        let (conn, _rx) = connect(&mut state);
        declare(&mut state, conn, "war", durable());
        let again = call(&mut state, conn, Request::DeclareQueue {
            queue: "war".into(),
            options: durable(),
        });
        assert!(matches!(again, Ok(Reply::QueueDeclared(info)) if info.name == "war"));
    }

    #[test]
    fn test_declare_queue_durability_conflict_is_precondition_failed() {
        let mut state = broker();
        let (conn, _rx) = connect(&mut state);
        declare(&mut state, conn, "war", durable());

        let err = call(&mut state, conn, Request::DeclareQueue {
            queue: "war".into(),
            options: QueueOptions {
                durable: false,
                ..durable()
            },
        })
        .unwrap_err();
        assert_eq!(err.code, FaultCode::PreconditionFailed);
        assert!(err.message.contains("durable"));
    }

    #[test]
    fn test_declare_exclusive_queue_from_other_connection_is_locked() {
        let mut state = broker();
        let (alice, _a) = connect(&mut state);
        let (bob, _b) = connect(&mut state);
        declare(&mut state, alice, "pause.alice", transient());

        let err = call(&mut state, bob, Request::DeclareQueue {
            queue: "pause.alice".into(),
            options: transient(),
        })
        .unwrap_err();
        assert_eq!(err.code, FaultCode::ResourceLocked);
    }

    #[test]
    fn test_bind_to_missing_exchange_is_not_found() {
        let mut state = broker();
        let (conn, _rx) = connect(&mut state);
        declare(&mut state, conn, "q", durable());
        let err = call(&mut state, conn, Request::BindQueue {
            queue: "q".into(),
            exchange: "nope".into(),
            routing_key: "k".into(),
        })
        .unwrap_err();
        assert_eq!(err.code, FaultCode::NotFound);
    }

    #[test]
    fn test_declare_exchange_kind_conflict_is_precondition_failed() {
        let mut state = broker();
        let err = state
            .declare_exchange("topic", ExchangeKind::Direct)
            .unwrap_err();
        assert_eq!(err.code, FaultCode::PreconditionFailed);
    }

    #[test]
    fn test_request_on_unopened_channel_is_not_found() {
        let mut state = broker();
        let (conn, _rx) = connect(&mut state);
        let err = state
            .handle(conn, ChannelId(9), Request::Qos { prefetch_count: 1 })
            .unwrap_err();
        assert_eq!(err.code, FaultCode::NotFound);
    }

    // =====================================================================
    // Routing and delivery
    // =====================================================================

    #[test]
    fn test_publish_topic_reaches_matching_queue_only() {
        let mut state = broker();
        let (conn, mut rx) = connect(&mut state);
        declare(&mut state, conn, "moves", transient());
        bind(&mut state, conn, "moves", "topic", "army_moves.*");
        consume(&mut state, conn, "moves", "c1");

        publish(&mut state, conn, "topic", "war.alice", "ignored");
        publish(&mut state, conn, "topic", "army_moves.alice", "move");

        let d = rx.try_recv().unwrap();
        assert_eq!(body(&d), "move");
        assert_eq!(d.routing_key, "army_moves.alice");
        assert_eq!(d.delivery_tag, 1);
        assert!(!d.redelivered);
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_publish_to_missing_exchange_is_not_found() {
        let mut state = broker();
        let (conn, _rx) = connect(&mut state);
        let err = call(&mut state, conn, Request::Publish {
            exchange: "missing".into(),
            routing_key: "k".into(),
            message: Message::new("text/plain", vec![]),
        })
        .unwrap_err();
        assert_eq!(err.code, FaultCode::NotFound);
    }

    #[test]
    fn test_messages_wait_in_queue_until_consumer_arrives() {
        let mut state = broker();
        let (conn, mut rx) = connect(&mut state);
        declare(&mut state, conn, "logs", durable());
        bind(&mut state, conn, "logs", "topic", "game_logs.*");
        publish(&mut state, conn, "topic", "game_logs.alice", "one");
        assert_eq!(state.queue_info("logs").unwrap().message_count, 1);

        consume(&mut state, conn, "logs", "c1");
        assert_eq!(body(&rx.try_recv().unwrap()), "one");
        assert_eq!(state.queue_info("logs").unwrap().message_count, 0);
    }

    #[test]
    fn test_prefetch_limits_unacked_deliveries() {
        let mut state = broker();
        let (conn, mut rx) = connect(&mut state);
        declare(&mut state, conn, "logs", durable());
        bind(&mut state, conn, "logs", "topic", "game_logs.*");
        call(&mut state, conn, Request::Qos { prefetch_count: 2 }).unwrap();
        consume(&mut state, conn, "logs", "c1");

        for i in 0..5 {
            publish(&mut state, conn, "topic", "game_logs.alice", &i.to_string());
        }
        let first = rx.try_recv().unwrap();
        let _second = rx.try_recv().unwrap();
        assert!(rx.try_recv().is_err(), "window of 2 is full");
        assert_eq!(state.queue_info("logs").unwrap().message_count, 3);

        call(&mut state, conn, Request::Ack { delivery_tag: first.delivery_tag }).unwrap();
        assert_eq!(body(&rx.try_recv().unwrap()), "2");
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_round_robin_between_consumers_of_shared_queue() {
        let mut state = broker();
        let (alice, mut a) = connect(&mut state);
        let (bob, mut b) = connect(&mut state);
        declare(&mut state, alice, "war", durable());
        declare(&mut state, bob, "war", durable());
        bind(&mut state, alice, "war", "topic", "war.*");
        consume(&mut state, alice, "war", "ca");
        consume(&mut state, bob, "war", "cb");

        publish(&mut state, alice, "topic", "war.alice", "w1");
        publish(&mut state, alice, "topic", "war.alice", "w2");

        assert_eq!(body(&a.try_recv().unwrap()), "w1");
        assert_eq!(body(&b.try_recv().unwrap()), "w2");
    }

    #[test]
    fn test_nack_requeue_redelivers_with_flag() {
        let mut state = broker();
        let (conn, mut rx) = connect(&mut state);
        declare(&mut state, conn, "war", durable());
        bind(&mut state, conn, "war", "topic", "war.*");
        call(&mut state, conn, Request::Qos { prefetch_count: 1 }).unwrap();
        consume(&mut state, conn, "war", "c1");
        publish(&mut state, conn, "topic", "war.bob", "w");

        let first = rx.try_recv().unwrap();
        call(&mut state, conn, Request::Nack {
            delivery_tag: first.delivery_tag,
            requeue: true,
        })
        .unwrap();

        let again = rx.try_recv().unwrap();
        assert_eq!(body(&again), "w");
        assert!(again.redelivered);
        assert_eq!(again.delivery_tag, first.delivery_tag + 1);
    }

    #[test]
    fn test_nack_discard_dead_letters_with_header() {
        let mut state = broker();
        let (conn, mut rx) = connect(&mut state);
        declare(&mut state, conn, "moves", transient());
        bind(&mut state, conn, "moves", "topic", "army_moves.*");
        declare(&mut state, conn, "dead", durable());
        bind(&mut state, conn, "dead", "dlx", "");
        consume(&mut state, conn, "moves", "c1");

        publish(&mut state, conn, "topic", "army_moves.alice", "self-move");
        let d = rx.try_recv().unwrap();
        call(&mut state, conn, Request::Nack {
            delivery_tag: d.delivery_tag,
            requeue: false,
        })
        .unwrap();

        assert_eq!(state.queue_info("moves").unwrap().message_count, 0);
        assert_eq!(state.queue_info("dead").unwrap().message_count, 1);
    }

    #[test]
    fn test_ack_unknown_tag_is_precondition_failed() {
        let mut state = broker();
        let (conn, _rx) = connect(&mut state);
        let err = call(&mut state, conn, Request::Ack { delivery_tag: 42 }).unwrap_err();
        assert_eq!(err.code, FaultCode::PreconditionFailed);
    }

    // =====================================================================
    // Lifecycle
    // =====================================================================

    #[test]
    fn test_disconnect_requeues_unacked_and_drops_exclusive_queues() {
        let mut state = broker();
        let (alice, mut a) = connect(&mut state);
        let (bob, mut b) = connect(&mut state);
        declare(&mut state, alice, "pause.alice", transient());
        declare(&mut state, alice, "war", durable());
        bind(&mut state, alice, "war", "topic", "war.*");
        consume(&mut state, alice, "war", "ca");
        publish(&mut state, bob, "topic", "war.bob", "w");
        let _held = a.try_recv().unwrap();

        state.disconnect(alice);

        assert!(state.queue_info("pause.alice").is_none());
        let info = state.queue_info("war").unwrap();
        assert_eq!(info.message_count, 1);
        assert_eq!(info.consumer_count, 0);

        consume(&mut state, bob, "war", "cb");
        let d = b.try_recv().unwrap();
        assert!(d.redelivered);
        assert_eq!(state.connection_count(), 1);
    }

    #[test]
    fn test_closed_sink_disconnects_connection() {
        let mut state = broker();
        let (conn, rx) = connect(&mut state);
        declare(&mut state, conn, "logs", durable());
        bind(&mut state, conn, "logs", "topic", "game_logs.*");
        consume(&mut state, conn, "logs", "c1");
        drop(rx);

        let (other, _keep) = connect(&mut state);
        publish(&mut state, other, "topic", "game_logs.bob", "entry");

        assert_eq!(state.connection_count(), 1);
        assert_eq!(state.queue_info("logs").unwrap().message_count, 1);
    }

    #[test]
    fn test_cancel_last_consumer_removes_auto_delete_queue() {
        let mut state = broker();
        let (conn, _rx) = connect(&mut state);
        declare(&mut state, conn, "army_moves.alice", transient());
        bind(&mut state, conn, "army_moves.alice", "topic", "army_moves.*");
        consume(&mut state, conn, "army_moves.alice", "c1");

        call(&mut state, conn, Request::Cancel { consumer_tag: "c1".into() }).unwrap();
        assert!(state.queue_info("army_moves.alice").is_none());
    }

    #[test]
    fn test_default_exchange_routes_by_queue_name() {
        let mut state = broker();
        let (conn, mut rx) = connect(&mut state);
        declare(&mut state, conn, "direct_q", durable());
        consume(&mut state, conn, "direct_q", "c1");
        publish(&mut state, conn, "", "direct_q", "hi");
        assert_eq!(body(&rx.try_recv().unwrap()), "hi");
    }
}
