//! Game vocabulary: ranks, units, players, and the events they exchange.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::GameError;

/// A unit's rank. Decides who beats whom in a war.
///
/// Ranks beat each other in a cycle: cavalry beats infantry, infantry
/// beats artillery, artillery beats cavalry. The declaration order
/// (infantry < cavalry < artillery) breaks ties when picking a side's
/// dominant rank.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Rank {
    Infantry,
    Cavalry,
    Artillery,
}

impl Rank {
    /// Every rank, in tie-break order.
    pub const ALL: [Rank; 3] = [Rank::Infantry, Rank::Cavalry, Rank::Artillery];

    /// Returns `true` if this rank wins against `other`.
    pub fn beats(self, other: Rank) -> bool {
        matches!(
            (self, other),
            (Rank::Cavalry, Rank::Infantry)
                | (Rank::Infantry, Rank::Artillery)
                | (Rank::Artillery, Rank::Cavalry)
        )
    }
}

impl fmt::Display for Rank {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Infantry => write!(f, "infantry"),
            Self::Cavalry => write!(f, "cavalry"),
            Self::Artillery => write!(f, "artillery"),
        }
    }
}

impl FromStr for Rank {
    type Err = GameError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "infantry" => Ok(Self::Infantry),
            "cavalry" => Ok(Self::Cavalry),
            "artillery" => Ok(Self::Artillery),
            _ => Err(GameError::UnknownRank(s.to_string())),
        }
    }
}

/// A place on the map. Any token is accepted.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Location(pub String);

impl Location {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for Location {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl fmt::Display for Location {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// One unit of a player's army.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Unit {
    /// Unique within the owning player.
    pub id: u32,
    pub rank: Rank,
    pub location: Location,
}

/// A player and their army.
///
/// Also used as a snapshot: moves and war declarations carry a copy of
/// the sending player as it was when the event was published.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Player {
    pub username: String,
    pub units: BTreeMap<u32, Unit>,
}

impl Player {
    pub fn new(username: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            units: BTreeMap::new(),
        }
    }

    /// Units standing at `location`, in id order.
    pub fn units_at<'a>(&'a self, location: &'a Location) -> impl Iterator<Item = &'a Unit> + 'a {
        self.units.values().filter(move |u| &u.location == location)
    }

    /// Returns `true` if any unit stands at `location`.
    pub fn occupies(&self, location: &Location) -> bool {
        self.units_at(location).next().is_some()
    }
}

/// Units relocated by one player. Published on
/// `army_moves.<username>`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArmyMove {
    /// The mover, after the move.
    pub player: Player,
    /// The units that moved.
    pub units: Vec<Unit>,
    pub to_location: Location,
}

/// A war declaration: the mover (attacker) walked into a location the
/// defender holds. Published on `war.<defender>`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecognitionOfWar {
    pub attacker: Player,
    pub defender: Player,
}
