//! Broker wire types.
//!
//! Everything in this module travels between a Peril process and the
//! broker: the topology vocabulary (exchanges, queues), the messages
//! themselves, the request/reply calls a channel makes, and the frames
//! that carry them over a transport.
//!
//! ```text
//! client                         broker
//!   │── Hello{version, user} ──────▶│
//!   │◀───────────── Welcome{conn} ──│
//!   │── Call{id, channel, req} ────▶│
//!   │◀────────── Reply{id, result} ─│
//!   │◀──────── Deliver{delivery} ───│  (pushed, unsolicited)
//! ```

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

/// Wire protocol version. Clients must send this in their `Hello` or be
/// refused.
pub const PROTOCOL_VERSION: u32 = 1;

// ---------------------------------------------------------------------------
// Identity types
// ---------------------------------------------------------------------------

/// Identifies a channel within one connection.
///
/// Channels are allocated by the client; the broker keys per-channel
/// state (prefetch window, delivery tags, unacked messages) by
/// `(connection, channel)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ChannelId(pub u16);

impl fmt::Display for ChannelId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ch-{}", self.0)
    }
}

// ---------------------------------------------------------------------------
// Topology
// ---------------------------------------------------------------------------

/// How an exchange matches routing keys against queue bindings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExchangeKind {
    /// Binding key must equal the routing key.
    Direct,
    /// Dot-delimited pattern; `*` matches one word, `#` zero or more.
    Topic,
    /// Every bound queue receives every message.
    Fanout,
}

impl fmt::Display for ExchangeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Direct => write!(f, "direct"),
            Self::Topic => write!(f, "topic"),
            Self::Fanout => write!(f, "fanout"),
        }
    }
}

/// Options a queue is declared with.
///
/// Re-declaring an existing queue is a no-op when `durable` and
/// `exclusive` match and a precondition failure otherwise.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueOptions {
    /// Survives broker restarts.
    pub durable: bool,
    /// Owned by the declaring connection; nobody else may use it.
    pub exclusive: bool,
    /// Removed when its owning connection goes away.
    pub auto_delete: bool,
    /// Exchange that receives messages rejected without requeue.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dead_letter_exchange: Option<String>,
}

/// What the broker reports back after a queue declaration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueInfo {
    /// The queue's name.
    pub name: String,
    /// Ready (not in-flight) messages.
    pub message_count: usize,
    /// Active consumers.
    pub consumer_count: usize,
}

// ---------------------------------------------------------------------------
// Messages
// ---------------------------------------------------------------------------

/// A published message: properties plus an opaque body.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    /// MIME type of `body`, set from the publishing codec.
    pub content_type: String,
    /// Free-form string headers. The broker adds `x-death` when it
    /// dead-letters a message.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub headers: BTreeMap<String, String>,
    /// Encoded payload.
    pub body: Vec<u8>,
}

impl Message {
    /// Creates a message with no headers.
    pub fn new(content_type: impl Into<String>, body: Vec<u8>) -> Self {
        Self {
            content_type: content_type.into(),
            headers: BTreeMap::new(),
            body,
        }
    }
}

/// A message handed to a consumer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Delivery {
    /// Channel the consumer lives on; acks go back through it.
    pub channel: ChannelId,
    /// Consumer the broker picked for this message.
    pub consumer_tag: String,
    /// Per-channel, monotonically increasing tag used to ack/nack.
    pub delivery_tag: u64,
    /// `true` if this message was delivered before and requeued.
    pub redelivered: bool,
    /// Exchange the message was originally published to.
    pub exchange: String,
    /// Routing key the message was originally published with.
    pub routing_key: String,
    /// The message itself.
    pub message: Message,
}

// ---------------------------------------------------------------------------
// Calls
// ---------------------------------------------------------------------------

/// A call made on a channel. Every request gets exactly one reply.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum Request {
    /// Opens the channel. Must precede every other request on it.
    OpenChannel,
    /// Closes the channel, requeueing whatever it still holds unacked.
    CloseChannel,
    /// Declares an exchange (idempotent for a matching kind).
    DeclareExchange { exchange: String, kind: ExchangeKind },
    /// Declares a queue (idempotent for matching options).
    DeclareQueue { queue: String, options: QueueOptions },
    /// Binds a queue to an exchange under a routing key pattern.
    BindQueue {
        queue: String,
        exchange: String,
        routing_key: String,
    },
    /// Limits unacknowledged deliveries on this channel. 0 = unlimited.
    Qos { prefetch_count: u16 },
    /// Starts a consumer on a queue.
    Consume { queue: String, consumer_tag: String },
    /// Stops a consumer.
    Cancel { consumer_tag: String },
    /// Publishes a message to an exchange.
    Publish {
        exchange: String,
        routing_key: String,
        message: Message,
    },
    /// Positively acknowledges a delivery.
    Ack { delivery_tag: u64 },
    /// Rejects a delivery, either back to its queue or to dead letters.
    Nack { delivery_tag: u64, requeue: bool },
}

/// Successful result of a [`Request`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum Reply {
    /// The request succeeded and has nothing to report.
    Ok,
    /// Result of `DeclareQueue`.
    QueueDeclared(QueueInfo),
    /// Result of `Consume`.
    ConsumeStarted { consumer_tag: String },
}

/// Category of a broker refusal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FaultCode {
    /// Exchange, queue, channel, consumer, or delivery tag is unknown.
    NotFound,
    /// Re-declaration with different options.
    PreconditionFailed,
    /// Exclusive queue owned by another connection.
    ResourceLocked,
    /// Request is malformed or not allowed in the current state.
    NotAllowed,
    /// Credentials were rejected.
    AccessRefused,
}

impl fmt::Display for FaultCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::NotFound => "NOT_FOUND",
            Self::PreconditionFailed => "PRECONDITION_FAILED",
            Self::ResourceLocked => "RESOURCE_LOCKED",
            Self::NotAllowed => "NOT_ALLOWED",
            Self::AccessRefused => "ACCESS_REFUSED",
        };
        f.write_str(s)
    }
}

/// A refusal reported by the broker for one request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BrokerFault {
    pub code: FaultCode,
    pub message: String,
}

impl fmt::Display for BrokerFault {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} - {}", self.code, self.message)
    }
}

// ---------------------------------------------------------------------------
// Frames
// ---------------------------------------------------------------------------

/// Frames a client sends to the broker.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ClientFrame {
    /// First frame on every connection.
    Hello {
        version: u32,
        username: String,
        password: String,
    },
    /// A request on a channel, correlated to its reply by `id`.
    Call {
        id: u64,
        channel: ChannelId,
        request: Request,
    },
    /// Graceful close.
    Goodbye,
}

/// Frames the broker sends to a client.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ServerFrame {
    /// Handshake accepted.
    Welcome { connection: u64 },
    /// Handshake rejected; the broker closes the socket after this.
    Refused { fault: BrokerFault },
    /// Answer to the `Call` with the same `id`.
    Reply {
        id: u64,
        result: Result<Reply, BrokerFault>,
    },
    /// A message for one of this connection's consumers.
    Deliver { delivery: Delivery },
}

// =========================================================================
// Tests
// =========================================================================
