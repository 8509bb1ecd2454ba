//! Exchange names, routing keys, and the two messages that aren't game
//! events proper: the pause broadcast and the war log.

use std::fmt;

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};

/// Topic exchange carrying moves, wars, and logs.
pub const EXCHANGE_PERIL_TOPIC: &str = "peril_topic";
/// Direct exchange carrying the pause broadcast.
pub const EXCHANGE_PERIL_DIRECT: &str = "peril_direct";
/// Fanout exchange receiving dead letters.
pub const EXCHANGE_PERIL_DLX: &str = "peril_dlx";
/// Durable queue collecting everything sent to [`EXCHANGE_PERIL_DLX`].
pub const DEAD_LETTER_QUEUE: &str = "peril_dlq";

pub const ARMY_MOVES_PREFIX: &str = "army_moves";
pub const WAR_RECOGNITIONS_PREFIX: &str = "war";
pub const PAUSE_KEY: &str = "pause";
pub const GAME_LOG_SLUG: &str = "game_logs";

/// `army_moves.<username>`: where a player publishes moves, and the name
/// of their private move queue.
pub fn army_moves_key(username: &str) -> String {
    format!("{ARMY_MOVES_PREFIX}.{username}")
}

/// `war.<username>`
pub fn war_key(username: &str) -> String {
    format!("{WAR_RECOGNITIONS_PREFIX}.{username}")
}

/// `game_logs.<username>`
pub fn game_log_key(username: &str) -> String {
    format!("{GAME_LOG_SLUG}.{username}")
}

/// `pause.<username>`: a player's private pause queue.
pub fn pause_queue(username: &str) -> String {
    format!("{PAUSE_KEY}.{username}")
}

/// `<prefix>.*`
pub fn any_player(prefix: &str) -> String {
    format!("{prefix}.*")
}

/// The server's pause/resume broadcast. Last write wins.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlayingState {
    pub is_paused: bool,
}

/// One line of the war log.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GameLog {
    pub username: String,
    pub current_time: DateTime<Utc>,
    pub message: String,
}

impl GameLog {
    /// A log entry stamped with the current time.
    pub fn new(username: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            current_time: Utc::now(),
            message: message.into(),
        }
    }
}

/// `<RFC3339 time> <username>: <message>`, the log file line format.
impl fmt::Display for GameLog {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {}: {}",
            self.current_time.to_rfc3339_opts(SecondsFormat::Secs, true),
            self.username,
            self.message
        )
    }
}
