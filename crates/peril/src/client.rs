//! The player process: three subscriptions feeding one shared
//! [`GameState`], plus the publishing side of the player's commands.
//!
//! ```text
//! pause.<user>       ← peril_direct  "pause"        → handler_pause
//! army_moves.<user>  ← peril_topic   "army_moves.*" → handler_move → war.<user>
//! war (durable)      ← peril_topic   "war.*"        → handler_war  → game_logs.<user>
//! ```
//!
//! Handlers lock the state, decide, and release the lock before any
//! publish.

use std::sync::Arc;

use peril_game::routing::{
    ARMY_MOVES_PREFIX, EXCHANGE_PERIL_DIRECT, EXCHANGE_PERIL_TOPIC, PAUSE_KEY,
    WAR_RECOGNITIONS_PREFIX, any_player, army_moves_key, game_log_key, pause_queue, war_key,
};
use peril_game::{
    ArmyMove, GameLog, GameState, Location, MoveOutcome, PlayingState, Rank, RecognitionOfWar,
    StatusReport, Unit, WarOutcome,
};
use peril_pubsub::{
    AckType, BrokerConnection, Channel, Handler, SimpleQueueType, SubscribeOptions, Subscription,
    publish_bincode, publish_json, subscribe_json,
};
use tokio::sync::Mutex;

use crate::PerilError;

/// Game state shared between the command loop and the handlers.
pub type SharedGameState = Arc<Mutex<GameState>>;

/// Applies pause broadcasts. Always acks.
pub fn handler_pause(state: SharedGameState) -> impl Handler<PlayingState> {
    move |playing: PlayingState| {
        let state = Arc::clone(&state);
        async move {
            state.lock().await.handle_pause(playing);
            AckType::Ack
        }
    }
}

/// Tracks other players' moves and declares war when one lands on our
/// units.
///
/// Our own echoed moves are discarded. A war declaration that fails to
/// publish requeues the move.
pub fn handler_move<C: BrokerConnection>(
    state: SharedGameState,
    publisher: Channel<C>,
) -> impl Handler<ArmyMove> {
    move |mv: ArmyMove| {
        let state = Arc::clone(&state);
        let publisher = publisher.clone();
        async move {
            let (outcome, defender) = {
                let mut gs = state.lock().await;
                let outcome = gs.handle_move(&mv);
                (outcome, gs.player_snapshot())
            };

            match outcome {
                MoveOutcome::Safe => AckType::Ack,
                MoveOutcome::SamePlayer => AckType::NackDiscard,
                MoveOutcome::MakeWar => {
                    let key = war_key(&defender.username);
                    let declaration = RecognitionOfWar {
                        attacker: mv.player,
                        defender,
                    };
                    match publish_json(&publisher, EXCHANGE_PERIL_TOPIC, &key, &declaration).await {
                        Ok(()) => {
                            tracing::info!(
                                attacker = %declaration.attacker.username,
                                location = %mv.to_location,
                                "war declared"
                            );
                            AckType::Ack
                        }
                        Err(e) => {
                            tracing::error!(error = %e, %key, "failed to publish war declaration");
                            AckType::NackRequeue
                        }
                    }
                }
            }
        }
    }
}

/// Resolves war declarations and logs the result.
///
/// Declarations for other players go back to the shared queue for
/// someone else; declarations with nothing left to fight over are
/// discarded.
pub fn handler_war<C: BrokerConnection>(
    state: SharedGameState,
    publisher: Channel<C>,
) -> impl Handler<RecognitionOfWar> {
    move |declaration: RecognitionOfWar| {
        let state = Arc::clone(&state);
        let publisher = publisher.clone();
        async move {
            let (resolution, username) = {
                let mut gs = state.lock().await;
                (gs.handle_war(&declaration), gs.username().to_string())
            };

            if !resolution.outcome.is_terminal() {
                tracing::debug!(outcome = ?resolution.outcome, "war not fought here");
                return match resolution.outcome {
                    WarOutcome::NotInvolved => AckType::NackRequeue,
                    _ => AckType::NackDiscard,
                };
            }

            let Some(message) = resolution.log_message() else {
                return AckType::NackDiscard;
            };
            let log = GameLog::new(&username, message);
            let key = game_log_key(&username);
            match publish_bincode(&publisher, EXCHANGE_PERIL_TOPIC, &key, &log).await {
                Ok(()) => AckType::Ack,
                Err(e) => {
                    tracing::error!(error = %e, %key, "failed to publish game log");
                    AckType::NackRequeue
                }
            }
        }
    }
}

/// A connected player.
pub struct ClientSession<C: BrokerConnection> {
    conn: Arc<C>,
    state: SharedGameState,
    publisher: Channel<C>,
    subscriptions: Vec<Subscription>,
}

impl<C: BrokerConnection> ClientSession<C> {
    /// Subscribes the player's three queues and returns once every loop
    /// is running.
    pub async fn start(
        conn: Arc<C>,
        username: &str,
        options: SubscribeOptions,
    ) -> Result<Self, PerilError> {
        if username.trim().is_empty() {
            return Err(PerilError::Config("username must not be empty".into()));
        }

        let state: SharedGameState = Arc::new(Mutex::new(GameState::new(username)));
        let publisher = Channel::open(&conn).await?;

        let pause = subscribe_json(
            &conn,
            EXCHANGE_PERIL_DIRECT,
            &pause_queue(username),
            PAUSE_KEY,
            SimpleQueueType::Transient,
            handler_pause(Arc::clone(&state)),
            options,
        )
        .await?;
        let moves = subscribe_json(
            &conn,
            EXCHANGE_PERIL_TOPIC,
            &army_moves_key(username),
            &any_player(ARMY_MOVES_PREFIX),
            SimpleQueueType::Transient,
            handler_move(Arc::clone(&state), publisher.clone()),
            options,
        )
        .await?;
        let wars = subscribe_json(
            &conn,
            EXCHANGE_PERIL_TOPIC,
            WAR_RECOGNITIONS_PREFIX,
            &any_player(WAR_RECOGNITIONS_PREFIX),
            SimpleQueueType::Durable,
            handler_war(Arc::clone(&state), publisher.clone()),
            options,
        )
        .await?;

        tracing::info!(username, "client session started");
        Ok(Self {
            conn,
            state,
            publisher,
            subscriptions: vec![pause, moves, wars],
        })
    }

    pub fn state(&self) -> &SharedGameState {
        &self.state
    }

    pub async fn username(&self) -> String {
        self.state.lock().await.username().to_string()
    }

    pub async fn spawn(&self, rank: Rank, location: Location) -> Unit {
        self.state.lock().await.spawn(rank, location)
    }

    /// Moves units locally and publishes the move on
    /// `army_moves.<username>`.
    pub async fn move_units(&self, location: Location, unit_ids: &[u32]) -> Result<ArmyMove, PerilError> {
        let mv = self.state.lock().await.move_units(location, unit_ids)?;
        let key = army_moves_key(&mv.player.username);
        publish_json(&self.publisher, EXCHANGE_PERIL_TOPIC, &key, &mv).await?;
        tracing::info!(units = mv.units.len(), location = %mv.to_location, "move published");
        Ok(mv)
    }

    pub async fn status(&self) -> StatusReport {
        self.state.lock().await.status()
    }

    /// `true` once any subscription loop has ended. On a live connection
    /// that only happens after a fatal error.
    pub fn has_stopped(&self) -> bool {
        self.subscriptions.iter().any(Subscription::is_finished)
    }

    /// Closes the connection and waits for every loop. Returns the first
    /// loop error, if any ended with one.
    pub async fn shutdown(self) -> Result<(), PerilError> {
        let closed = self.conn.close().await;
        let mut first_error = None;
        for subscription in self.subscriptions {
            let queue = subscription.queue().to_string();
            if let Err(e) = subscription.join().await {
                tracing::error!(%queue, error = %e, "subscription failed");
                first_error.get_or_insert(e);
            }
        }
        closed?;
        match first_error {
            Some(e) => Err(e.into()),
            None => Ok(()),
        }
    }
}
