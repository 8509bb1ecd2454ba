//! The game server process: pause control and the war log.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use peril_game::GameLog;
use peril_game::routing::{
    EXCHANGE_PERIL_DIRECT, EXCHANGE_PERIL_TOPIC, GAME_LOG_SLUG, PAUSE_KEY, any_player,
};
use peril_game::PlayingState;
use peril_pubsub::{
    AckType, BrokerConnection, Channel, Handler, SimpleQueueType, SubscribeOptions, Subscription,
    publish_json, subscribe_bincode,
};
use tokio::fs::{File, OpenOptions};
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;

use crate::PerilError;

/// Appends war log lines to a file.
pub struct GameLogWriter {
    path: PathBuf,
    file: Mutex<File>,
    echo: bool,
}

impl GameLogWriter {
    /// Opens `path` for appending, creating it if needed.
    pub async fn open(path: impl Into<PathBuf>) -> Result<Self, PerilError> {
        let path = path.into();
        let file = OpenOptions::new().create(true).append(true).open(&path).await?;
        tracing::info!(path = %path.display(), "game log opened");
        Ok(Self {
            path,
            file: Mutex::new(file),
            echo: false,
        })
    }

    /// Also print every entry to stdout.
    pub fn with_echo(mut self, echo: bool) -> Self {
        self.echo = echo;
        self
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Writes one `<time> <username>: <message>` line.
    pub async fn write(&self, log: &GameLog) -> std::io::Result<()> {
        let line = format!("{log}\n");
        let mut file = self.file.lock().await;
        file.write_all(line.as_bytes()).await?;
        file.flush().await
    }
}

/// Records every war log entry. Always acks: a failed write is logged
/// and the entry is dropped.
pub fn handler_log(writer: Arc<GameLogWriter>) -> impl Handler<GameLog> {
    move |log: GameLog| {
        let writer = Arc::clone(&writer);
        async move {
            if writer.echo {
                println!("{log}");
            }
            if let Err(e) = writer.write(&log).await {
                tracing::error!(
                    error = %e,
                    path = %writer.path().display(),
                    username = %log.username,
                    "failed to write game log"
                );
            }
            AckType::Ack
        }
    }
}

/// The server's connection: consumes the shared `game_logs` queue and
/// broadcasts pause state.
pub struct ServerSession<C: BrokerConnection> {
    conn: Arc<C>,
    publisher: Channel<C>,
    logs: Subscription,
}

impl<C: BrokerConnection> ServerSession<C> {
    pub async fn start(
        conn: Arc<C>,
        writer: Arc<GameLogWriter>,
        options: SubscribeOptions,
    ) -> Result<Self, PerilError> {
        let publisher = Channel::open(&conn).await?;
        let logs = subscribe_bincode(
            &conn,
            EXCHANGE_PERIL_TOPIC,
            GAME_LOG_SLUG,
            &any_player(GAME_LOG_SLUG),
            SimpleQueueType::Durable,
            handler_log(writer),
            options,
        )
        .await?;

        tracing::info!("server session started");
        Ok(Self {
            conn,
            publisher,
            logs,
        })
    }

    pub async fn pause(&self) -> Result<(), PerilError> {
        self.broadcast(PlayingState { is_paused: true }).await
    }

    pub async fn resume(&self) -> Result<(), PerilError> {
        self.broadcast(PlayingState { is_paused: false }).await
    }

    async fn broadcast(&self, state: PlayingState) -> Result<(), PerilError> {
        publish_json(&self.publisher, EXCHANGE_PERIL_DIRECT, PAUSE_KEY, &state).await?;
        tracing::info!(paused = state.is_paused, "playing state published");
        Ok(())
    }

    /// `true` once the log subscription has ended.
    pub fn has_stopped(&self) -> bool {
        self.logs.is_finished()
    }

    /// Closes the connection and waits for the log loop.
    pub async fn shutdown(self) -> Result<(), PerilError> {
        let closed = self.conn.close().await;
        self.logs.join().await?;
        closed?;
        Ok(())
    }
}
