//! REPL command parsing.

use crate::{GameError, Location, Rank};

pub(crate) const SPAWN_USAGE: &str = "spawn <rank> <location>";
pub(crate) const MOVE_USAGE: &str = "move <location> <unit_id> [unit_id...]";

/// A parsed client command line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientCommand {
    Spawn { rank: Rank, location: Location },
    Move { location: Location, unit_ids: Vec<u32> },
    Status,
    Help,
    Spam,
    Quit,
}

/// A parsed server command line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServerCommand {
    Pause,
    Resume,
    Help,
    Quit,
}

/// Splits a line into its lowercased command word and the remaining
/// arguments as typed. `None` for a blank line.
fn split_command(line: &str) -> Option<(String, Vec<&str>)> {
    let mut words = line.split_whitespace();
    let command = words.next()?.to_lowercase();
    Some((command, words.collect()))
}

impl ClientCommand {
    /// Parses a line. `Ok(None)` for a blank line.
    pub fn parse(line: &str) -> Result<Option<Self>, GameError> {
        let Some((first, args)) = split_command(line) else {
            return Ok(None);
        };

        let command = match first.as_str() {
            "spawn" => {
                let [rank, location] = args[..] else {
                    return Err(GameError::Usage(SPAWN_USAGE));
                };
                Self::Spawn {
                    rank: rank.parse()?,
                    location: Location::from(location),
                }
            }
            "move" => {
                let Some((location, ids)) = args.split_first() else {
                    return Err(GameError::Usage(MOVE_USAGE));
                };
                if ids.is_empty() {
                    return Err(GameError::Usage(MOVE_USAGE));
                }
                let unit_ids = ids
                    .iter()
                    .map(|id| id.parse::<u32>().map_err(|_| GameError::InvalidUnitId(id.to_string())))
                    .collect::<Result<Vec<_>, _>>()?;
                Self::Move {
                    location: Location::from(*location),
                    unit_ids,
                }
            }
            "status" => Self::Status,
            "help" => Self::Help,
            "spam" => Self::Spam,
            "quit" => Self::Quit,
            other => return Err(GameError::UnknownCommand(other.to_string())),
        };
        Ok(Some(command))
    }
}

impl ServerCommand {
    /// Parses a line. `Ok(None)` for a blank line.
    pub fn parse(line: &str) -> Result<Option<Self>, GameError> {
        let Some((first, _)) = split_command(line) else {
            return Ok(None);
        };
        let command = match first.as_str() {
            "pause" => Self::Pause,
            "resume" => Self::Resume,
            "help" => Self::Help,
            "quit" => Self::Quit,
            other => return Err(GameError::UnknownCommand(other.to_string())),
        };
        Ok(Some(command))
    }
}

pub const CLIENT_HELP: &str = "\
Possible commands:
* move <location> <unitID> <unitID> <unitID>...
    example:
    move asia 1
* spawn <rank> <location>
    example:
    spawn infantry europe
* status
* spam <n>
* quit
* help";

pub const SERVER_HELP: &str = "\
Possible commands:
* pause
* resume
* quit
* help";
