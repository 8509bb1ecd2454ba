//! Integration tests for the broker actor and its WebSocket server.

use std::time::Duration;

use peril_broker::{
    BrokerConfig, BrokerError, BrokerHandle, BrokerServerBuilder, ConnectionKey,
    StaticCredentials, spawn_broker,
};
use peril_protocol::{
    ChannelId, ClientFrame, Codec, Delivery, ExchangeKind, FaultCode, JsonCodec,
    Message, PROTOCOL_VERSION, QueueOptions, Reply, Request, ServerFrame,
};
use peril_transport::{Connection, WebSocketConnection};
use tokio::sync::mpsc;

// =========================================================================
// Helpers
// =========================================================================

const CH: ChannelId = ChannelId(1);

fn config() -> BrokerConfig {
    BrokerConfig::default()
        .with_exchange("peril_topic", ExchangeKind::Topic)
        .with_exchange("peril_direct", ExchangeKind::Direct)
        .with_exchange("peril_dlx", ExchangeKind::Fanout)
}

fn transient() -> QueueOptions {
    QueueOptions {
        exclusive: true,
        auto_delete: true,
        dead_letter_exchange: Some("peril_dlx".into()),
        ..QueueOptions::default()
    }
}

async fn open(broker: &BrokerHandle) -> (ConnectionKey, mpsc::UnboundedReceiver<Delivery>) {
    let (tx, rx) = mpsc::unbounded_channel();
    let conn = broker.connect(tx).await.expect("should connect");
    broker
        .call(conn, CH, Request::OpenChannel)
        .await
        .expect("should open channel");
    (conn, rx)
}

async fn next(rx: &mut mpsc::UnboundedReceiver<Delivery>) -> Delivery {
    tokio::time::timeout(Duration::from_secs(1), rx.recv())
        .await
        .expect("delivery should arrive")
        .expect("sink should be open")
}

fn text(body: &str) -> Message {
    Message::new("text/plain", body.as_bytes().to_vec())
}

// =========================================================================
// In-process broker
// =========================================================================

#[tokio::test]
async fn test_pause_broadcast_reaches_every_player_queue() {
    let broker = spawn_broker(&config()).unwrap();
    let (alice, mut a) = open(&broker).await;
    let (bob, mut b) = open(&broker).await;

    for (conn, name) in [(alice, "pause.alice"), (bob, "pause.bob")] {
        broker
            .call(conn, CH, Request::DeclareQueue { queue: name.into(), options: transient() })
            .await
            .unwrap();
        broker
            .call(conn, CH, Request::BindQueue {
                queue: name.into(),
                exchange: "peril_direct".into(),
                routing_key: "pause".into(),
            })
            .await
            .unwrap();
        broker
            .call(conn, CH, Request::Consume { queue: name.into(), consumer_tag: format!("c-{name}") })
            .await
            .unwrap();
    }

    let (server, _s) = open(&broker).await;
    broker
        .call(server, CH, Request::Publish {
            exchange: "peril_direct".into(),
            routing_key: "pause".into(),
            message: text("paused"),
        })
        .await
        .unwrap();

    assert_eq!(next(&mut a).await.message.body, b"paused");
    assert_eq!(next(&mut b).await.message.body, b"paused");
}

#[tokio::test]
async fn test_call_fault_surfaces_as_broker_error() {
    let broker = spawn_broker(&config()).unwrap();
    let (conn, _rx) = open(&broker).await;

    let err = broker
        .call(conn, CH, Request::BindQueue {
            queue: "missing".into(),
            exchange: "peril_topic".into(),
            routing_key: "war.*".into(),
        })
        .await
        .unwrap_err();
    match err {
        BrokerError::Fault(fault) => assert_eq!(fault.code, FaultCode::NotFound),
        other => panic!("expected fault, got {other:?}"),
    }
}

#[tokio::test]
async fn test_disconnect_removes_exclusive_queue() {
    let broker = spawn_broker(&config()).unwrap();
    let (conn, _rx) = open(&broker).await;
    broker
        .call(conn, CH, Request::DeclareQueue { queue: "army_moves.alice".into(), options: transient() })
        .await
        .unwrap();
    assert!(broker.queue_info("army_moves.alice").await.unwrap().is_some());

    broker.disconnect(conn).await.unwrap();
    assert!(broker.queue_info("army_moves.alice").await.unwrap().is_none());
}

#[tokio::test]
async fn test_shutdown_makes_handle_unavailable() {
    let broker = spawn_broker(&config()).unwrap();
    broker.shutdown().await.unwrap();
    tokio::time::sleep(Duration::from_millis(10)).await;

    assert!(broker.is_closed());
    let (tx, _rx) = mpsc::unbounded_channel();
    assert!(matches!(broker.connect(tx).await, Err(BrokerError::Unavailable)));
}

#[tokio::test]
async fn test_conflicting_configured_exchanges_fail_to_spawn() {
    let config = BrokerConfig::default()
        .with_exchange("x", ExchangeKind::Topic)
        .with_exchange("x", ExchangeKind::Fanout);
    assert!(matches!(spawn_broker(&config), Err(BrokerError::Fault(_))));
}

#[tokio::test]
async fn test_configured_dead_letter_queue_keeps_rejected_messages() {
    let config = config()
        .with_queue("peril_dlq", QueueOptions { durable: true, ..QueueOptions::default() })
        .with_binding("peril_dlq", "peril_dlx", "#");
    let broker = spawn_broker(&config).unwrap();
    let (conn, mut rx) = open(&broker).await;

    broker
        .call(conn, CH, Request::DeclareQueue { queue: "army_moves.alice".into(), options: transient() })
        .await
        .unwrap();
    broker
        .call(conn, CH, Request::BindQueue {
            queue: "army_moves.alice".into(),
            exchange: "peril_topic".into(),
            routing_key: "army_moves.*".into(),
        })
        .await
        .unwrap();
    broker
        .call(conn, CH, Request::Consume { queue: "army_moves.alice".into(), consumer_tag: "moves".into() })
        .await
        .unwrap();
    broker
        .call(conn, CH, Request::Publish {
            exchange: "peril_topic".into(),
            routing_key: "army_moves.alice".into(),
            message: text("echo"),
        })
        .await
        .unwrap();

    let delivery = next(&mut rx).await;
    broker
        .call(conn, CH, Request::Nack { delivery_tag: delivery.delivery_tag, requeue: false })
        .await
        .unwrap();

    // The dead-letter queue outlives the connection that rejected the message.
    broker.disconnect(conn).await.unwrap();
    let info = broker.queue_info("peril_dlq").await.unwrap().expect("dlq should exist");
    assert_eq!(info.message_count, 1);

    let (reader, mut dead) = open(&broker).await;
    broker
        .call(reader, CH, Request::Consume { queue: "peril_dlq".into(), consumer_tag: "dead".into() })
        .await
        .unwrap();
    let letter = next(&mut dead).await;
    assert_eq!(letter.message.body, b"echo");
    assert_eq!(letter.routing_key, "army_moves.alice");
    assert_eq!(
        letter.message.headers.get("x-death").map(String::as_str),
        Some("rejected:army_moves.alice")
    );
}

#[tokio::test]
async fn test_configured_exclusive_queue_fails_to_spawn() {
    let config = config().with_queue("mine", QueueOptions { exclusive: true, ..QueueOptions::default() });
    assert!(matches!(spawn_broker(&config), Err(BrokerError::Fault(_))));
}

#[tokio::test]
async fn test_configured_binding_to_unknown_exchange_fails_to_spawn() {
    let config = config()
        .with_queue("peril_dlq", QueueOptions { durable: true, ..QueueOptions::default() })
        .with_binding("peril_dlq", "nope", "#");
    assert!(matches!(spawn_broker(&config), Err(BrokerError::Fault(_))));
}

// =========================================================================
// WebSocket server
// =========================================================================

async fn start_server() -> (String, BrokerHandle) {
    let server = BrokerServerBuilder::new()
        .bind("127.0.0.1:0")
        .config(config())
        .build(StaticCredentials::single("guest", "guest"))
        .await
        .expect("server should build");
    let addr = server.local_addr().expect("should have local addr").to_string();
    let handle = server.handle();

    tokio::spawn(async move {
        let _ = server.run().await;
    });
    tokio::time::sleep(Duration::from_millis(10)).await;
    (addr, handle)
}

async fn send(conn: &WebSocketConnection, frame: &ClientFrame) {
    let bytes = JsonCodec.encode(frame).unwrap();
    conn.send(&bytes).await.expect("send should succeed");
}

async fn recv(conn: &WebSocketConnection) -> ServerFrame {
    let data = tokio::time::timeout(Duration::from_secs(2), conn.recv())
        .await
        .expect("frame should arrive")
        .expect("recv should succeed")
        .expect("connection should be open");
    JsonCodec.decode(&data).unwrap()
}

async fn hello(addr: &str, password: &str) -> (WebSocketConnection, ServerFrame) {
    let conn = WebSocketConnection::connect(&format!("ws://{addr}")).await.unwrap();
    send(&conn, &ClientFrame::Hello {
        version: PROTOCOL_VERSION,
        username: "guest".into(),
        password: password.into(),
    })
    .await;
    let frame = recv(&conn).await;
    (conn, frame)
}

async fn call(conn: &WebSocketConnection, id: u64, request: Request) -> ServerFrame {
    send(conn, &ClientFrame::Call { id, channel: CH, request }).await;
    recv(conn).await
}

#[tokio::test]
async fn test_server_handshake_welcomes_valid_credentials() {
    let (addr, _broker) = start_server().await;
    let (_conn, frame) = hello(&addr, "guest").await;
    assert!(matches!(frame, ServerFrame::Welcome { .. }));
}

#[tokio::test]
async fn test_server_handshake_refuses_bad_password() {
    let (addr, _broker) = start_server().await;
    let (_conn, frame) = hello(&addr, "wrong").await;
    match frame {
        ServerFrame::Refused { fault } => assert_eq!(fault.code, FaultCode::AccessRefused),
        other => panic!("expected Refused, got {other:?}"),
    }
}

#[tokio::test]
async fn test_server_handshake_refuses_wrong_version() {
    let (addr, _broker) = start_server().await;
    let conn = WebSocketConnection::connect(&format!("ws://{addr}")).await.unwrap();
    send(&conn, &ClientFrame::Hello {
        version: PROTOCOL_VERSION + 1,
        username: "guest".into(),
        password: "guest".into(),
    })
    .await;
    match recv(&conn).await {
        ServerFrame::Refused { fault } => assert_eq!(fault.code, FaultCode::NotAllowed),
        other => panic!("expected Refused, got {other:?}"),
    }
}

#[tokio::test]
async fn test_server_round_trip_publish_and_deliver() {
    let (addr, _broker) = start_server().await;
    let (conn, _) = hello(&addr, "guest").await;

    assert_eq!(
        call(&conn, 1, Request::OpenChannel).await,
        ServerFrame::Reply { id: 1, result: Ok(Reply::Ok) }
    );
    let declared = call(&conn, 2, Request::DeclareQueue {
        queue: "war".into(),
        options: QueueOptions { durable: true, ..QueueOptions::default() },
    })
    .await;
    assert!(matches!(declared, ServerFrame::Reply { id: 2, result: Ok(Reply::QueueDeclared(_)) }));
    call(&conn, 3, Request::BindQueue {
        queue: "war".into(),
        exchange: "peril_topic".into(),
        routing_key: "war.*".into(),
    })
    .await;
    call(&conn, 4, Request::Consume { queue: "war".into(), consumer_tag: "c1".into() }).await;
    call(&conn, 5, Request::Publish {
        exchange: "peril_topic".into(),
        routing_key: "war.alice".into(),
        message: text("declared"),
    })
    .await;

    // The delivery and the publish reply may arrive in either order.
    let mut delivered = None;
    for _ in 0..2 {
        if let ServerFrame::Deliver { delivery } = recv(&conn).await {
            delivered = Some(delivery);
            break;
        }
    }
    let delivery = delivered.expect("delivery should arrive");
    assert_eq!(delivery.routing_key, "war.alice");
    assert_eq!(delivery.consumer_tag, "c1");
    assert_eq!(delivery.message.body, b"declared");
}

#[tokio::test]
async fn test_server_requeues_unacked_when_client_drops() {
    let (addr, broker) = start_server().await;
    let (conn, _) = hello(&addr, "guest").await;

    call(&conn, 1, Request::OpenChannel).await;
    call(&conn, 2, Request::DeclareQueue {
        queue: "game_logs".into(),
        options: QueueOptions { durable: true, ..QueueOptions::default() },
    })
    .await;
    call(&conn, 3, Request::Consume { queue: "game_logs".into(), consumer_tag: "c1".into() }).await;
    send(&conn, &ClientFrame::Call {
        id: 4,
        channel: CH,
        request: Request::Publish {
            exchange: String::new(),
            routing_key: "game_logs".into(),
            message: text("entry"),
        },
    })
    .await;

    // Wait until the message is in flight, then hang up without acking.
    let mut in_flight = false;
    for _ in 0..2 {
        if matches!(recv(&conn).await, ServerFrame::Deliver { .. }) {
            in_flight = true;
            break;
        }
    }
    assert!(in_flight);
    send(&conn, &ClientFrame::Goodbye).await;
    drop(conn);

    let mut requeued = false;
    for _ in 0..50 {
        let info = broker.queue_info("game_logs").await.unwrap().unwrap();
        if info.message_count == 1 && info.consumer_count == 0 {
            requeued = true;
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert!(requeued, "unacked message should return to the queue");
}
