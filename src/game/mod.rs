pub mod commands;
pub mod dungeon;

pub use commands::{handle_line, CommandOutcome, CommandReply, PlayerSession};
pub use dungeon::{AttackOutcome, Dungeon};
