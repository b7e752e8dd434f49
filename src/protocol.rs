use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::game::{CommandOutcome, CommandReply};
use crate::monster::MonsterEvent;

// ── Client → Server messages ───────────────────────────────────────

/// Binary (msgpack) input from a client. Text frames skip this and are
/// treated as a bare command line.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ClientMessage {
    /// One line of player input, e.g. `attack 10`.
    Command { line: String },
}

// ── Server → Client messages ───────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ServerMessage {
    /// Greeting sent once per connection.
    Welcome { lines: Vec<String> },
    /// The answer to one command.
    Reply {
        lines: Vec<String>,
        outcome: Option<CommandOutcome>,
    },
    /// Something happened to a shared monster, possibly in another room.
    Monster {
        event: MonsterEvent,
        announcement: Option<String>,
    },
    /// The session is closing.
    Goodbye,
}

impl ServerMessage {
    pub fn reply(reply: &CommandReply) -> Self {
        ServerMessage::Reply {
            lines: reply.lines.clone(),
            outcome: reply.outcome.clone(),
        }
    }

    pub fn monster(event: MonsterEvent) -> Self {
        let announcement = event.announcement();
        ServerMessage::Monster {
            event,
            announcement,
        }
    }

    /// Plain-text rendering for text-frame clients. `None` means there is
    /// nothing worth showing.
    pub fn to_text(&self) -> Option<String> {
        match self {
            ServerMessage::Welcome { lines } | ServerMessage::Reply { lines, .. } => {
                Some(lines.join("\n"))
            }
            ServerMessage::Monster { announcement, .. } => announcement.clone(),
            ServerMessage::Goodbye => None,
        }
    }
}

// ── Codec ──────────────────────────────────────────────────────────

pub fn encode(msg: &ServerMessage) -> Result<Vec<u8>> {
    Ok(rmp_serde::to_vec_named(msg)?)
}

pub fn decode(bytes: &[u8]) -> Result<ClientMessage> {
    Ok(rmp_serde::from_slice(bytes)?)
}
