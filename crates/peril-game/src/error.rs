//! Error types for game commands.

/// Why a local command was rejected. Handlers for remote events never
/// fail; they classify instead (see [`MoveOutcome`](crate::MoveOutcome)
/// and [`WarOutcome`](crate::WarOutcome)).
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum GameError {
    /// Not one of infantry, cavalry, artillery.
    #[error("unknown unit rank '{0}'")]
    UnknownRank(String),

    /// The player owns no unit with this id.
    #[error("unit {0} not found")]
    UnknownUnit(u32),

    /// A unit id that isn't a number.
    #[error("invalid unit id '{0}'")]
    InvalidUnitId(String),

    /// Moves are refused while the server has the game paused.
    #[error("the game is paused, you can not move units")]
    Paused,

    /// Wrong number or shape of arguments; carries the usage line.
    #[error("usage: {0}")]
    Usage(&'static str),

    /// First word isn't a known command.
    #[error("unknown command '{0}'")]
    UnknownCommand(String),
}
