//! One process's view of the match.

use std::collections::BTreeMap;
use std::fmt;

use crate::routing::PlayingState;
use crate::war::{Battle, WarId, WarLedger, WarOutcome, WarResolution, contested_location, fight};
use crate::{ArmyMove, GameError, Location, Player, Rank, RecognitionOfWar, Unit};

/// How an incoming move relates to the local player.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MoveOutcome {
    /// Our own move echoed back.
    SamePlayer,
    /// The mover landed where we have no units.
    Safe,
    /// The mover landed on our units: declare war.
    MakeWar,
}

/// The local player, what we know of everybody else, and the wars we've
/// resolved.
///
/// Shared between the command loop and the subscription handlers behind
/// one `tokio::sync::Mutex`; every method here is synchronous.
#[derive(Debug, Clone)]
pub struct GameState {
    player: Player,
    paused: bool,
    others: BTreeMap<String, Player>,
    ledger: WarLedger,
    next_unit_id: u32,
}

impl GameState {
    pub fn new(username: impl Into<String>) -> Self {
        Self {
            player: Player::new(username),
            paused: false,
            others: BTreeMap::new(),
            ledger: WarLedger::default(),
            next_unit_id: 1,
        }
    }

    pub fn username(&self) -> &str {
        &self.player.username
    }

    pub fn player(&self) -> &Player {
        &self.player
    }

    /// A copy of the local player, for publishing.
    pub fn player_snapshot(&self) -> Player {
        self.player.clone()
    }

    pub fn is_paused(&self) -> bool {
        self.paused
    }

    /// Last known state of another player, as seen through their moves.
    pub fn known_player(&self, username: &str) -> Option<&Player> {
        self.others.get(username)
    }

    pub fn ledger(&self) -> &WarLedger {
        &self.ledger
    }

    // -- Local commands -----------------------------------------------------

    /// Adds a unit at `location` under the next free id.
    pub fn spawn(&mut self, rank: Rank, location: Location) -> Unit {
        let unit = Unit {
            id: self.next_unit_id,
            rank,
            location,
        };
        self.next_unit_id += 1;
        self.player.units.insert(unit.id, unit.clone());
        tracing::debug!(unit = unit.id, rank = %unit.rank, location = %unit.location, "unit spawned");
        unit
    }

    /// Relocates our units and returns the move to publish.
    ///
    /// # Errors
    ///
    /// [`GameError::Paused`] while paused, [`GameError::UnknownUnit`] if
    /// any id isn't ours (nothing moves in that case),
    /// [`GameError::Usage`] if no unit is given.
    pub fn move_units(&mut self, to: Location, unit_ids: &[u32]) -> Result<ArmyMove, GameError> {
        if self.paused {
            return Err(GameError::Paused);
        }
        if unit_ids.is_empty() {
            return Err(GameError::Usage(crate::commands::MOVE_USAGE));
        }
        if let Some(missing) = unit_ids.iter().find(|id| !self.player.units.contains_key(*id)) {
            return Err(GameError::UnknownUnit(*missing));
        }

        let mut moved = Vec::with_capacity(unit_ids.len());
        for id in unit_ids {
            if let Some(unit) = self.player.units.get_mut(id) {
                unit.location = to.clone();
                moved.push(unit.clone());
            }
        }
        tracing::debug!(units = moved.len(), location = %to, "units moved");

        Ok(ArmyMove {
            player: self.player.clone(),
            units: moved,
            to_location: to,
        })
    }

    /// What `status` prints.
    pub fn status(&self) -> StatusReport {
        StatusReport {
            username: self.player.username.clone(),
            paused: self.paused,
            units: self.player.units.values().cloned().collect(),
            known_players: self
                .others
                .values()
                .map(|p| (p.username.clone(), p.units.len()))
                .collect(),
        }
    }

    // -- Remote events -------------------------------------------------------

    /// Applies the server's pause broadcast.
    pub fn handle_pause(&mut self, state: PlayingState) {
        self.paused = state.is_paused;
        if state.is_paused {
            tracing::info!("game paused by server");
        } else {
            tracing::info!("game resumed by server");
        }
    }

    /// Records another player's move and says whether it starts a war.
    pub fn handle_move(&mut self, mv: &ArmyMove) -> MoveOutcome {
        if mv.player.username == self.player.username {
            return MoveOutcome::SamePlayer;
        }

        let mut mover = mv.player.clone();
        for unit in &mv.units {
            let mut unit = unit.clone();
            unit.location = mv.to_location.clone();
            mover.units.insert(unit.id, unit);
        }
        self.others.insert(mover.username.clone(), mover);

        if self.player.occupies(&mv.to_location) {
            tracing::info!(
                mover = %mv.player.username,
                location = %mv.to_location,
                "enemy moved onto our units"
            );
            MoveOutcome::MakeWar
        } else {
            tracing::debug!(mover = %mv.player.username, location = %mv.to_location, "move is safe");
            MoveOutcome::Safe
        }
    }

    /// Resolves a war declaration from the local player's side.
    ///
    /// Redelivery of a war this process already resolved returns the same
    /// resolution and changes nothing. Losing (or drawing) removes our
    /// units at the contested location.
    pub fn handle_war(&mut self, rw: &RecognitionOfWar) -> WarResolution {
        let me = self.player.username.as_str();
        let local_is_attacker = rw.attacker.username == me;
        let local_is_defender = rw.defender.username == me;
        if !local_is_attacker && !local_is_defender {
            return WarResolution::unresolved(WarOutcome::NotInvolved);
        }
        if local_is_attacker && local_is_defender {
            tracing::warn!(player = %me, "war declared against oneself, ignoring");
            return WarResolution::unresolved(WarOutcome::NoUnits);
        }

        let Some(location) = contested_location(&rw.attacker, &rw.defender) else {
            return WarResolution::unresolved(WarOutcome::NoUnits);
        };
        let attacker_units: Vec<&Unit> = rw.attacker.units_at(&location).collect();
        let defender_units: Vec<&Unit> = rw.defender.units_at(&location).collect();
        let war_id = WarId::compute(
            &rw.attacker.username,
            &rw.defender.username,
            &location,
            &attacker_units,
            &defender_units,
        );

        let opponent = if local_is_attacker {
            rw.defender.username.clone()
        } else {
            rw.attacker.username.clone()
        };
        if let Some(cached) = self.ledger.lookup(&opponent, &war_id) {
            tracing::debug!(%war_id, %opponent, "war already resolved");
            return cached.clone();
        }

        if !self.player.occupies(&location) {
            return WarResolution::unresolved(WarOutcome::NoUnits);
        }

        let battle = fight(&attacker_units, &defender_units);
        let (winner, loser) = match battle {
            Battle::Defender => (&rw.defender.username, &rw.attacker.username),
            Battle::Attacker | Battle::Draw => (&rw.attacker.username, &rw.defender.username),
        };
        let outcome = match battle {
            Battle::Draw => WarOutcome::Draw,
            _ if winner == me => WarOutcome::YouWon,
            _ => WarOutcome::OpponentWon,
        };
        let resolution = WarResolution {
            outcome,
            winner: winner.clone(),
            loser: loser.clone(),
        };

        if matches!(outcome, WarOutcome::OpponentWon | WarOutcome::Draw) {
            let lost = self.remove_units_at(&location);
            tracing::info!(%location, lost, "units lost in war");
        }
        tracing::info!(
            %war_id,
            %opponent,
            %location,
            outcome = ?resolution.outcome,
            "war resolved"
        );

        self.ledger.record(&opponent, war_id, resolution.clone());
        resolution
    }

    fn remove_units_at(&mut self, location: &Location) -> usize {
        let before = self.player.units.len();
        self.player.units.retain(|_, u| &u.location != location);
        before - self.player.units.len()
    }
}

/// Snapshot for the `status` command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusReport {
    pub username: String,
    pub paused: bool,
    pub units: Vec<Unit>,
    /// Other players we've seen, with their unit counts.
    pub known_players: Vec<(String, usize)>,
}

impl fmt::Display for StatusReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Player: {}", self.username)?;
        writeln!(f, "Game: {}", if self.paused { "paused" } else { "running" })?;
        if self.units.is_empty() {
            writeln!(f, "Units: none")?;
        } else {
            writeln!(f, "Units:")?;
            for unit in &self.units {
                writeln!(f, "  * {}: {} at {}", unit.id, unit.rank, unit.location)?;
            }
        }
        for (name, count) in &self.known_players {
            writeln!(f, "Known: {name} ({count} units)")?;
        }
        Ok(())
    }
}
