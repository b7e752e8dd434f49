pub mod proxy;
pub mod registry;
pub mod shared;
pub mod store;

use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};

pub use proxy::MonsterProxy;
pub use registry::MonsterRegistry;
pub use shared::SharedMonster;
pub use store::{JsonFileStore, MemoryStore, MonsterStore, StoreWriter};

/// Registry key of the one monster shared by every dungeon room.
pub const SHARED_MONSTER_KEY: &str = "THE_SHARED_MONSTER";

/// Name players see for the shared monster.
pub const MONSTER_NAME: &str = "Monster";

pub const ALIVE_DESC: &str = "A fearsome monster with glowing red eyes.";

pub fn defeat_desc(name: &str) -> String {
    format!("The lifeless body of the {} lies here.", name)
}

// ── State ──────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MonsterState {
    Alive,
    Dead,
}

impl MonsterState {
    /// The only state consistent with `health`.
    pub fn for_health(health: u32) -> Self {
        if health == 0 {
            MonsterState::Dead
        } else {
            MonsterState::Alive
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            MonsterState::Alive => "Alive",
            MonsterState::Dead => "Dead",
        }
    }
}

/// Point-in-time copy of a shared monster's authoritative fields.
///
/// This is both what gets pushed to proxies and what the store persists.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MonsterSnapshot {
    pub key: String,
    pub name: String,
    pub health: u32,
    pub max_health: u32,
    pub state: MonsterState,
    pub desc: String,
    /// Unix seconds of the last return to full health.
    pub last_reset: u64,
    /// Bumped on every mutation.
    pub version: u64,
}

// ── Events ─────────────────────────────────────────────────────────

/// Broadcast after every mutation so hosts can announce it in rooms.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum MonsterEvent {
    Damaged {
        key: String,
        amount: u32,
        health: u32,
        max_health: u32,
    },
    Defeated {
        key: String,
        name: String,
    },
    Reset {
        key: String,
        name: String,
        health: u32,
    },
}

impl MonsterEvent {
    /// Room announcement for the event, if it warrants one.
    pub fn announcement(&self) -> Option<String> {
        match self {
            MonsterEvent::Damaged { .. } => None,
            MonsterEvent::Defeated { name, .. } => Some(format!("The {} has been defeated!", name)),
            MonsterEvent::Reset { name, .. } => Some(format!(
                "The {} has respawned and looks ready for battle!",
                name
            )),
        }
    }
}

// ── Helpers ────────────────────────────────────────────────────────

/// Locks a mutex, recovering the guard if a panicking holder poisoned it.
/// Every critical section here leaves the data consistent before any
/// call that could panic.
pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

pub(crate) fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}
