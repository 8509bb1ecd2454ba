//! Per-connection handler: handshake, auth, and frame routing.
//!
//! Each accepted connection gets its own Tokio task running this handler.
//! The flow is:
//!   1. Receive `Hello` → validate version
//!   2. Authenticate username/password
//!   3. Register with the broker → send `Welcome`
//!   4. Loop: forward `Call`s to the broker, push deliveries back out

use std::sync::Arc;

use peril_protocol::{
    BrokerFault, ClientFrame, Codec, Delivery, FaultCode, PROTOCOL_VERSION,
    ProtocolError, ServerFrame,
};
use peril_transport::{Connection, WebSocketConnection};
use tokio::sync::mpsc;

use crate::server::ServerState;
use crate::state::ConnectionKey;
use crate::{Authenticator, BrokerError, BrokerHandle};

/// Drop guard that unregisters the connection from the broker when the
/// handler exits, so unacked deliveries get requeued even on a panic.
struct ConnectionGuard {
    connection: ConnectionKey,
    broker: BrokerHandle,
}

impl Drop for ConnectionGuard {
    fn drop(&mut self) {
        self.broker.disconnect_now(self.connection);
    }
}

/// Handles a single connection from accept to close.
pub(crate) async fn handle_connection<A, C>(
    conn: WebSocketConnection,
    state: Arc<ServerState<A, C>>,
) -> Result<(), BrokerError>
where
    A: Authenticator,
    C: Codec,
{
    let conn_id = conn.id();
    tracing::debug!(%conn_id, "handling new connection");

    // --- Step 1: Handshake ---
    let username = perform_handshake(&conn, &state).await?;

    // --- Step 2: Register ---
    let (sink, mut deliveries) = mpsc::unbounded_channel::<Delivery>();
    let connection = state.broker.connect(sink).await?;
    let _guard = ConnectionGuard {
        connection,
        broker: state.broker.clone(),
    };
    send_frame(&conn, &state.codec, &ServerFrame::Welcome { connection }).await?;
    tracing::info!(%conn_id, connection, %username, "client connected");

    // --- Step 3: Frame loop ---
    loop {
        tokio::select! {
            incoming = conn.recv() => {
                let data = match incoming {
                    Ok(Some(data)) => data,
                    Ok(None) => {
                        tracing::info!(connection, "connection closed by peer");
                        break;
                    }
                    Err(e) => {
                        tracing::debug!(connection, error = %e, "recv error");
                        break;
                    }
                };

                let frame: ClientFrame = match state.codec.decode(&data) {
                    Ok(frame) => frame,
                    Err(e) => {
                        tracing::debug!(connection, error = %e, "failed to decode frame");
                        continue;
                    }
                };

                match frame {
                    ClientFrame::Call { id, channel, request } => {
                        let result = state.broker.call_raw(connection, channel, request).await?;
                        send_frame(&conn, &state.codec, &ServerFrame::Reply { id, result }).await?;
                    }
                    ClientFrame::Goodbye => {
                        tracing::info!(connection, "client said goodbye");
                        break;
                    }
                    ClientFrame::Hello { .. } => {
                        tracing::debug!(connection, "ignoring repeated Hello");
                    }
                }
            }
            Some(delivery) = deliveries.recv() => {
                send_frame(&conn, &state.codec, &ServerFrame::Deliver { delivery }).await?;
            }
        }
    }

    let _ = conn.close().await;
    // _guard drops here → broker disconnect fires.
    Ok(())
}

/// Receives `Hello`, checks the version and credentials. Answers
/// `Refused` and closes on any failure.
async fn perform_handshake<A, C>(
    conn: &WebSocketConnection,
    state: &Arc<ServerState<A, C>>,
) -> Result<String, BrokerError>
where
    A: Authenticator,
    C: Codec,
{
    let data = match tokio::time::timeout(state.handshake_timeout, conn.recv()).await {
        Ok(Ok(Some(data))) => data,
        Ok(Ok(None)) => {
            return Err(BrokerError::Protocol(ProtocolError::InvalidMessage(
                "connection closed before handshake".into(),
            )));
        }
        Ok(Err(e)) => return Err(BrokerError::Transport(e)),
        Err(_) => {
            return Err(BrokerError::Protocol(ProtocolError::InvalidMessage(
                "handshake timed out".into(),
            )));
        }
    };

    let frame: ClientFrame = state.codec.decode(&data)?;
    let (version, username, password) = match frame {
        ClientFrame::Hello {
            version,
            username,
            password,
        } => (version, username, password),
        _ => {
            refuse(conn, &state.codec, FaultCode::NotAllowed, "expected Hello").await?;
            return Err(BrokerError::Protocol(ProtocolError::InvalidMessage(
                "first frame must be Hello".into(),
            )));
        }
    };

    if version != PROTOCOL_VERSION {
        refuse(
            conn,
            &state.codec,
            FaultCode::NotAllowed,
            &format!("version mismatch: expected {PROTOCOL_VERSION}, got {version}"),
        )
        .await?;
        return Err(BrokerError::Protocol(ProtocolError::InvalidMessage(
            "protocol version mismatch".into(),
        )));
    }

    if let Err(e) = state.auth.authenticate(&username, &password).await {
        let fault = e.into_fault();
        tracing::info!(%username, %fault, "handshake refused");
        send_frame(conn, &state.codec, &ServerFrame::Refused { fault: fault.clone() }).await?;
        let _ = conn.close().await;
        return Err(BrokerError::AuthFailed(fault.message));
    }

    Ok(username)
}

async fn refuse(
    conn: &WebSocketConnection,
    codec: &impl Codec,
    code: FaultCode,
    message: &str,
) -> Result<(), BrokerError> {
    let fault = BrokerFault {
        code,
        message: message.to_string(),
    };
    send_frame(conn, codec, &ServerFrame::Refused { fault }).await?;
    let _ = conn.close().await;
    Ok(())
}

async fn send_frame(
    conn: &WebSocketConnection,
    codec: &impl Codec,
    frame: &ServerFrame,
) -> Result<(), BrokerError> {
    let bytes = codec.encode(frame)?;
    conn.send(&bytes).await?;
    Ok(())
}
