use thiserror::Error;

/// Errors surfaced by the dungeon and its shared-monster core.
///
/// Stale dependents never show up here: they are pruned during
/// notification and only logged.
#[derive(Debug, Error)]
pub enum DungeonError {
    #[error("invalid damage amount: {0}")]
    InvalidDamage(String),

    #[error("monster in room {room} has lost its shared monster")]
    MissingCanonicalReference { room: String },

    #[error("There's no monster here to attack!")]
    NoMonsterHere,

    #[error("The monster is already dead. You can't attack it.")]
    MonsterAlreadyDead,

    #[error("unknown room: {0}")]
    UnknownRoom(String),

    #[error("Error: Dungeon not found. Please use 'startgame' to create a new game.")]
    GameNotStarted,

    #[error("unknown command: {0}")]
    UnknownCommand(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Encode error: {0}")]
    Encode(#[from] rmp_serde::encode::Error),

    #[error("Decode error: {0}")]
    Decode(#[from] rmp_serde::decode::Error),
}

pub type Result<T> = std::result::Result<T, DungeonError>;
