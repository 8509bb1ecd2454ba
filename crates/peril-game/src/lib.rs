//! Peril game rules.
//!
//! Everything here is synchronous and transport-free: [`GameState`] holds
//! one process's view of the match, and the `handle_*` methods classify
//! incoming events into outcomes the application turns into acks.
//!
//! # Example
//!
//! ```
//! use peril_game::{ArmyMove, GameState, MoveOutcome, Rank};
//!
//! let mut bob = GameState::new("bob");
//! bob.spawn(Rank::Cavalry, "europe".into());
//!
//! let mut alice = GameState::new("alice");
//! alice.spawn(Rank::Infantry, "americas".into());
//! let mv: ArmyMove = alice.move_units("europe".into(), &[1]).unwrap();
//!
//! assert_eq!(bob.handle_move(&mv), MoveOutcome::MakeWar);
//! ```

pub mod commands;
mod error;
pub mod routing;
mod state;
mod types;
mod war;

pub use commands::{CLIENT_HELP, ClientCommand, SERVER_HELP, ServerCommand};
pub use error::GameError;
pub use routing::{GameLog, PlayingState};
pub use state::{GameState, MoveOutcome, StatusReport};
pub use types::{ArmyMove, Location, Player, Rank, RecognitionOfWar, Unit};
pub use war::{WarId, WarLedger, WarOutcome, WarResolution};
