//! War resolution.
//!
//! A war is fought at the contested location: the first location, in
//! sorted order, where both the attacker's and the defender's snapshots
//! have units. Both processes that could receive the declaration compute
//! the same battle from the same snapshots, so they agree on the winner.

use std::collections::BTreeMap;
use std::fmt;

use sha2::{Digest, Sha256};

use crate::{Location, Player, Rank, Unit};

/// How a war declaration turned out for the local player.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WarOutcome {
    /// The local player is neither attacker nor defender.
    NotInvolved,
    /// There is nothing to fight over: no contested location, or the
    /// local player has already left it.
    NoUnits,
    OpponentWon,
    YouWon,
    Draw,
}

impl WarOutcome {
    /// `true` for outcomes that end the war and get logged.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::OpponentWon | Self::YouWon | Self::Draw)
    }
}

/// Result of [`GameState::handle_war`](crate::GameState::handle_war).
///
/// `winner` and `loser` are usernames. For a draw they hold the attacker
/// and the defender; for non-terminal outcomes they are empty.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WarResolution {
    pub outcome: WarOutcome,
    pub winner: String,
    pub loser: String,
}

impl WarResolution {
    pub(crate) fn unresolved(outcome: WarOutcome) -> Self {
        Self {
            outcome,
            winner: String::new(),
            loser: String::new(),
        }
    }

    /// The war log line for a terminal outcome.
    pub fn log_message(&self) -> Option<String> {
        match self.outcome {
            WarOutcome::YouWon | WarOutcome::OpponentWon => {
                Some(format!("{} won a war against {}", self.winner, self.loser))
            }
            WarOutcome::Draw => Some(format!(
                "A war between {} and {} resulted in a draw",
                self.winner, self.loser
            )),
            WarOutcome::NotInvolved | WarOutcome::NoUnits => None,
        }
    }
}

/// Identifies one war: who fought, where, and with which units.
///
/// Truncated SHA-256 over the attacker and defender names, the contested
/// location, and both sides' unit ids there. A redelivered declaration
/// hashes to the same id.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct WarId(String);

impl WarId {
    const HEX_LEN: usize = 16;

    pub(crate) fn compute(
        attacker: &str,
        defender: &str,
        location: &Location,
        attacker_units: &[&Unit],
        defender_units: &[&Unit],
    ) -> Self {
        let mut hasher = Sha256::new();
        for field in [attacker, defender, location.as_str()] {
            hasher.update((field.len() as u64).to_be_bytes());
            hasher.update(field.as_bytes());
        }
        for side in [attacker_units, defender_units] {
            hasher.update((side.len() as u64).to_be_bytes());
            for unit in side {
                hasher.update(unit.id.to_be_bytes());
            }
        }
        let digest = hex::encode(hasher.finalize());
        Self(digest[..Self::HEX_LEN].to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for WarId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Wars this process has already resolved, one entry per opponent.
#[derive(Debug, Clone, Default)]
pub struct WarLedger {
    entries: BTreeMap<String, (WarId, WarResolution)>,
}

impl WarLedger {
    /// The cached resolution if the last war against `opponent` was
    /// `war_id`.
    pub fn lookup(&self, opponent: &str, war_id: &WarId) -> Option<&WarResolution> {
        self.entries
            .get(opponent)
            .filter(|(id, _)| id == war_id)
            .map(|(_, resolution)| resolution)
    }

    /// Records the resolution of the latest war against `opponent`.
    pub fn record(&mut self, opponent: &str, war_id: WarId, resolution: WarResolution) {
        self.entries
            .insert(opponent.to_string(), (war_id, resolution));
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Which army won a battle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Battle {
    Attacker,
    Defender,
    Draw,
}

/// First location, in sorted order, where both players have units.
pub(crate) fn contested_location(attacker: &Player, defender: &Player) -> Option<Location> {
    let mut locations: Vec<&Location> = attacker.units.values().map(|u| &u.location).collect();
    locations.sort();
    locations.dedup();
    locations
        .into_iter()
        .find(|loc| defender.occupies(loc))
        .cloned()
}

/// The rank with the most units; ties go to the later rank in
/// infantry < cavalry < artillery order.
fn dominant_rank(units: &[&Unit]) -> Option<Rank> {
    Rank::ALL
        .into_iter()
        .map(|rank| (units.iter().filter(|u| u.rank == rank).count(), rank))
        .filter(|(count, _)| *count > 0)
        .max()
        .map(|(_, rank)| rank)
}

/// Fights a battle between the units each side has at the contested
/// location.
pub(crate) fn fight(attacker: &[&Unit], defender: &[&Unit]) -> Battle {
    match (dominant_rank(attacker), dominant_rank(defender)) {
        (Some(a), Some(d)) if a != d => {
            if a.beats(d) {
                Battle::Attacker
            } else {
                Battle::Defender
            }
        }
        _ => match attacker.len().cmp(&defender.len()) {
            std::cmp::Ordering::Greater => Battle::Attacker,
            std::cmp::Ordering::Less => Battle::Defender,
            std::cmp::Ordering::Equal => Battle::Draw,
        },
    }
}
