use serde::{Deserialize, Serialize};
use tracing::debug;

use super::dungeon::{AttackOutcome, Dungeon, GameStart};
use crate::error::{DungeonError, Result};

const NOT_IN_DUNGEON: &str = "You are not in the dungeon. Use 'startgame' to begin.";

const HELP: &[&str] = &[
    "Commands:",
    "  startgame        start a new game or reset your current one",
    "  resetgame        reset the game to its initial state",
    "  attack [amount]  attack the monster in this room",
    "  look [monster]   look around, or at the monster",
    "  go <room>        walk to another dungeon room",
    "  rooms            list the dungeon rooms",
    "  quit             leave",
    "Admin:",
    "  monsters              list shared monsters",
    "  removemonster [room]  take the monster out of a room",
    "  deletemonster         destroy the shared monster record",
];

#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    StartGame,
    ResetGame,
    Attack { damage: Option<u32> },
    Look { target: Option<String> },
    Go { room: String },
    Rooms,
    Help,
    Quit,
    Monsters,
    RemoveMonster { room: Option<String> },
    DeleteMonster,
}

impl Command {
    /// Parse one line of player input. Blank lines are rejected as an
    /// empty unknown command.
    pub fn parse(line: &str) -> Result<Self> {
        let mut words = line.split_whitespace();
        let verb = words.next().unwrap_or_default().to_ascii_lowercase();
        let rest: Vec<&str> = words.collect();
        let rest = rest.join(" ");

        let command = match verb.as_str() {
            "startgame" => Command::StartGame,
            "resetgame" => Command::ResetGame,
            "attack" | "hit" => Command::Attack {
                damage: if rest.is_empty() {
                    None
                } else {
                    Some(parse_damage(&rest)?)
                },
            },
            "look" | "l" => Command::Look {
                target: (!rest.is_empty()).then_some(rest),
            },
            "go" | "enter" if !rest.is_empty() => Command::Go { room: rest },
            "go" | "enter" | "rooms" => Command::Rooms,
            "help" | "?" => Command::Help,
            "quit" | "exit" => Command::Quit,
            "monsters" => Command::Monsters,
            "removemonster" => Command::RemoveMonster {
                room: (!rest.is_empty()).then_some(rest),
            },
            "deletemonster" => Command::DeleteMonster,
            _ => return Err(DungeonError::UnknownCommand(verb)),
        };
        Ok(command)
    }
}

/// Validate a player-supplied damage amount before it gets anywhere near
/// the monster.
pub fn parse_damage(raw: &str) -> Result<u32> {
    let raw = raw.trim();
    match raw.parse::<i64>() {
        Ok(v) if v >= 0 => u32::try_from(v).map_err(|_| DungeonError::InvalidDamage(raw.to_string())),
        _ => Err(DungeonError::InvalidDamage(raw.to_string())),
    }
}

// ── Sessions and replies ─────────────────────────────────────────────

/// Per-connection player state. The dungeon itself is shared.
#[derive(Debug, Default)]
pub struct PlayerSession {
    pub room: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum CommandOutcome {
    Attack(AttackOutcome),
    GameStarted(GameStart),
}

#[derive(Debug, Clone, PartialEq)]
pub struct CommandReply {
    pub lines: Vec<String>,
    pub outcome: Option<CommandOutcome>,
    pub quit: bool,
}

impl CommandReply {
    fn text(lines: Vec<String>) -> Self {
        Self {
            lines,
            outcome: None,
            quit: false,
        }
    }

    fn line(line: impl Into<String>) -> Self {
        Self::text(vec![line.into()])
    }
}

/// Parse and run one input line. Returns `None` for blank input.
pub fn handle_line(dungeon: &mut Dungeon, session: &mut PlayerSession, line: &str) -> Option<CommandReply> {
    if line.trim().is_empty() {
        return None;
    }
    let reply = match Command::parse(line) {
        Ok(command) => dispatch(dungeon, session, command),
        Err(DungeonError::UnknownCommand(verb)) => {
            CommandReply::line(format!("Huh? '{}' is not a command. Type 'help'.", verb))
        }
        Err(e) => CommandReply::line(e.to_string()),
    };
    Some(reply)
}

pub fn dispatch(dungeon: &mut Dungeon, session: &mut PlayerSession, command: Command) -> CommandReply {
    debug!("Dispatching {:?} for player in {:?}", command, session.room);
    match command {
        Command::StartGame => {
            let start = dungeon.start_or_reset_game();
            session.room = dungeon.first_room().map(str::to_string);
            let mut lines =
                vec!["You find yourself in a dark dungeon. A fearsome monster lurks nearby!".to_string()];
            lines.extend(look_lines(dungeon, session));
            CommandReply {
                lines,
                outcome: Some(CommandOutcome::GameStarted(start)),
                quit: false,
            }
        }

        Command::ResetGame => match dungeon.reset_game() {
            Ok(start) => {
                session.room = dungeon.first_room().map(str::to_string);
                let mut lines = vec![
                    "The game has been reset. You find yourself back in the dungeon with a fully healed monster!"
                        .to_string(),
                ];
                lines.extend(look_lines(dungeon, session));
                CommandReply {
                    lines,
                    outcome: Some(CommandOutcome::GameStarted(start)),
                    quit: false,
                }
            }
            Err(e) => CommandReply::line(e.to_string()),
        },

        Command::Attack { damage } => {
            let room = match &session.room {
                Some(room) => room.clone(),
                None => return CommandReply::line(DungeonError::NoMonsterHere.to_string()),
            };
            let damage = damage.unwrap_or_else(|| dungeon.attack_damage());
            match dungeon.attack(&room, damage) {
                Ok(outcome) => {
                    let mut lines = vec![format!("You attack the monster for {} damage!", damage)];
                    if outcome.defeated {
                        lines.push("You have defeated the monster!".to_string());
                    } else {
                        lines.push(format!(
                            "The monster has {} health remaining.",
                            outcome.new_health
                        ));
                    }
                    CommandReply {
                        lines,
                        outcome: Some(CommandOutcome::Attack(outcome)),
                        quit: false,
                    }
                }
                Err(e) => CommandReply::line(e.to_string()),
            }
        }

        Command::Look { target: None } => CommandReply::text(look_lines(dungeon, session)),

        Command::Look { target: Some(target) } => {
            let Some(room) = &session.room else {
                return CommandReply::line(NOT_IN_DUNGEON);
            };
            if !target.eq_ignore_ascii_case("monster") {
                return CommandReply::line(format!("You don't see {} here.", target));
            }
            match dungeon.describe_monster(room) {
                Ok(text) => CommandReply::line(text),
                Err(_) => CommandReply::line("You don't see any monster here."),
            }
        }

        Command::Go { room } => {
            if session.room.is_none() {
                return CommandReply::line(NOT_IN_DUNGEON);
            }
            match dungeon.find_room(&room) {
                Some(key) => {
                    session.room = Some(key);
                    CommandReply::text(look_lines(dungeon, session))
                }
                None => CommandReply::line(format!("There is no room called {}.", room)),
            }
        }

        Command::Rooms => {
            let rooms = dungeon.room_keys();
            if rooms.is_empty() {
                CommandReply::line("The dungeon has not been built yet. Use 'startgame'.")
            } else {
                CommandReply::line(format!("Rooms: {}", rooms.join(", ")))
            }
        }

        Command::Help => CommandReply::text(HELP.iter().map(|l| l.to_string()).collect()),

        Command::Quit => CommandReply {
            lines: vec!["Goodbye.".to_string()],
            outcome: None,
            quit: true,
        },

        Command::Monsters => {
            let monsters = dungeon.monsters();
            if monsters.is_empty() {
                return CommandReply::line("No shared monsters exist.");
            }
            CommandReply::text(
                monsters
                    .iter()
                    .map(|m| {
                        format!(
                            "{}: {} {}/{} ({})",
                            m.key,
                            m.name,
                            m.health,
                            m.max_health,
                            m.state.label()
                        )
                    })
                    .collect(),
            )
        }

        Command::RemoveMonster { room } => {
            let key = match room {
                Some(name) => match dungeon.find_room(&name) {
                    Some(key) => key,
                    None => return CommandReply::line(format!("There is no room called {}.", name)),
                },
                None => match &session.room {
                    Some(key) => key.clone(),
                    None => return CommandReply::line(NOT_IN_DUNGEON),
                },
            };
            if dungeon.remove_monster(&key) {
                CommandReply::line(format!("The monster in {} fades away.", key))
            } else {
                CommandReply::line(format!("There is no monster in {}.", key))
            }
        }

        Command::DeleteMonster => {
            if dungeon.delete_monster() {
                CommandReply::line("The shared monster dissolves into the void.")
            } else {
                CommandReply::line("There is no shared monster to delete.")
            }
        }
    }
}

fn look_lines(dungeon: &Dungeon, session: &PlayerSession) -> Vec<String> {
    match &session.room {
        Some(room) => dungeon
            .look(room)
            .unwrap_or_else(|e| vec![e.to_string()]),
        None => vec![NOT_IN_DUNGEON.to_string()],
    }
}
