use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use tracing::{info, warn};

pub const DEFAULT_BIND_ADDR: &str = "127.0.0.1:9001";
pub const DEFAULT_MAX_HEALTH: u32 = 1000;
pub const DEFAULT_RESET_DELAY_SECS: u64 = 60;
pub const DEFAULT_ATTACK_DAMAGE: u32 = 10;
pub const DEFAULT_ROOM: &str = "Dungeon";

// ── Monster tuning ─────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct MonsterConfig {
    pub max_health: u32,
    /// Delay between a defeat and the automatic respawn.
    pub reset_delay: Duration,
}

impl Default for MonsterConfig {
    fn default() -> Self {
        Self {
            max_health: DEFAULT_MAX_HEALTH,
            reset_delay: Duration::from_secs(DEFAULT_RESET_DELAY_SECS),
        }
    }
}

// ── Storage selection ──────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq)]
pub enum StoreConfig {
    Memory,
    JsonDir(PathBuf),
}

// ── Server config ──────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub bind_addr: String,
    pub monster: MonsterConfig,
    pub attack_damage: u32,
    /// Dungeon rooms that each get a monster proxy. The first one is
    /// where `startgame` drops the player.
    pub rooms: Vec<String>,
    pub store: StoreConfig,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: DEFAULT_BIND_ADDR.to_string(),
            monster: MonsterConfig::default(),
            attack_damage: DEFAULT_ATTACK_DAMAGE,
            rooms: vec![DEFAULT_ROOM.to_string()],
            store: StoreConfig::Memory,
        }
    }
}

impl ServerConfig {
    /// Build the config from the process environment, loading `.env`
    /// first when one is present.
    pub fn from_env() -> Self {
        if let Ok(path) = dotenvy::dotenv() {
            info!("Loaded environment from {}", path.display());
        }
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build the config from an arbitrary key lookup. Malformed values
    /// fall back to their defaults.
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();

        let bind_addr = lookup("QD_BIND_ADDR")
            .filter(|v| !v.trim().is_empty())
            .unwrap_or(defaults.bind_addr);

        let max_health = parse_or(&lookup, "QD_MONSTER_MAX_HEALTH", DEFAULT_MAX_HEALTH);
        let max_health = if max_health == 0 {
            warn!("QD_MONSTER_MAX_HEALTH must be positive, using {}", DEFAULT_MAX_HEALTH);
            DEFAULT_MAX_HEALTH
        } else {
            max_health
        };

        let reset_delay_secs = parse_or(&lookup, "QD_RESET_DELAY_SECS", DEFAULT_RESET_DELAY_SECS);
        let attack_damage = parse_or(&lookup, "QD_ATTACK_DAMAGE", DEFAULT_ATTACK_DAMAGE);

        let rooms = lookup("QD_ROOMS").map(|raw| parse_rooms(&raw)).unwrap_or_default();
        let rooms = if rooms.is_empty() { defaults.rooms } else { rooms };

        let store = match lookup("QD_STORE").as_deref().map(str::trim) {
            Some("memory") => StoreConfig::Memory,
            _ => match lookup("QD_STORE_DIR").filter(|v| !v.trim().is_empty()) {
                Some(dir) => StoreConfig::JsonDir(PathBuf::from(dir)),
                None => default_store_dir()
                    .map(StoreConfig::JsonDir)
                    .unwrap_or(StoreConfig::Memory),
            },
        };

        Self {
            bind_addr,
            monster: MonsterConfig {
                max_health,
                reset_delay: Duration::from_secs(reset_delay_secs),
            },
            attack_damage,
            rooms,
            store,
        }
    }
}

/// Comma separated room names, trimmed. Room lookup ignores case, so a
/// repeat in any case is dropped and the first spelling wins.
fn parse_rooms(raw: &str) -> Vec<String> {
    let mut rooms: Vec<String> = Vec::new();
    for room in raw.split(',').map(str::trim).filter(|r| !r.is_empty()) {
        if rooms.iter().any(|seen| seen.eq_ignore_ascii_case(room)) {
            warn!("Ignoring duplicate room {:?} in QD_ROOMS", room);
            continue;
        }
        rooms.push(room.to_string());
    }
    rooms
}

fn default_store_dir() -> Option<PathBuf> {
    dirs::data_dir().map(|d| d.join("quantum-dungeon"))
}

fn parse_or<F, T>(lookup: &F, key: &str, default: T) -> T
where
    F: Fn(&str) -> Option<String>,
    T: FromStr + std::fmt::Display + Copy,
{
    match lookup(key) {
        Some(raw) => match raw.trim().parse::<T>() {
            Ok(v) => v,
            Err(_) => {
                warn!("Ignoring malformed {}={:?}, using {}", key, raw, default);
                default
            }
        },
        None => default,
    }
}
