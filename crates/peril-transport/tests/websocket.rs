//! Integration tests for the WebSocket transport.
//!
//! These spin up a real listener on an OS-assigned port and dial it with
//! [`WebSocketConnection::connect`], so both ends of the transport are
//! exercised over the network.

#[cfg(feature = "websocket")]
mod websocket {
    use std::time::Duration;

    use peril_transport::{
        Connection, Transport, TransportError, WebSocketConnection,
        WebSocketTransport,
    };

    async fn pair() -> (WebSocketConnection, WebSocketConnection) {
        let mut transport = WebSocketTransport::bind("127.0.0.1:0")
            .await
            .expect("should bind");
        let addr = transport.local_addr().expect("should have addr");

        let server = tokio::spawn(async move {
            transport.accept().await.expect("should accept")
        });

        let client = WebSocketConnection::connect(&format!("ws://{addr}"))
            .await
            .expect("client should connect");
        let server_conn = server.await.expect("task should complete");
        (server_conn, client)
    }

    #[tokio::test]
    async fn test_websocket_send_receive_both_directions() {
        let (server, client) = pair().await;
        assert_ne!(server.id(), client.id());

        server.send(b"hello from broker").await.expect("send");
        let got = client.recv().await.expect("recv").expect("data");
        assert_eq!(got, b"hello from broker");

        client.send(b"hello from client").await.expect("send");
        let got = server.recv().await.expect("recv").expect("data");
        assert_eq!(got, b"hello from client");
    }

    #[tokio::test]
    async fn test_websocket_send_while_reader_parked() {
        // A reader blocked in recv must not hold up writers on the
        // same connection.
        let (server, client) = pair().await;
        let client = std::sync::Arc::new(client);

        let reader = {
            let client = std::sync::Arc::clone(&client);
            tokio::spawn(async move { client.recv().await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;

        tokio::time::timeout(Duration::from_secs(2), client.send(b"ping"))
            .await
            .expect("send must not block on the parked reader")
            .expect("send should succeed");
        let got = server.recv().await.expect("recv").expect("data");
        assert_eq!(got, b"ping");

        server.send(b"pong").await.expect("send");
        let got = reader.await.expect("join").expect("recv").expect("data");
        assert_eq!(got, b"pong");
    }

    #[tokio::test]
    async fn test_websocket_recv_returns_none_on_peer_close() {
        let (server, client) = pair().await;

        client.close().await.expect("close should succeed");

        let result = server.recv().await.expect("recv should not error");
        assert!(result.is_none(), "should return None on client close");
    }

    #[tokio::test]
    async fn test_websocket_connect_refused_returns_connect_failed() {
        // Bind then drop to get a port nothing listens on.
        let transport = WebSocketTransport::bind("127.0.0.1:0")
            .await
            .expect("should bind");
        let addr = transport.local_addr().expect("addr");
        drop(transport);

        let result = WebSocketConnection::connect(&format!("ws://{addr}")).await;
        assert!(matches!(result, Err(TransportError::ConnectFailed { .. })));
    }
}
