use std::collections::HashMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::error::{DungeonError, Result};
use crate::monster::{
    MonsterProxy, MonsterRegistry, MonsterSnapshot, MonsterState, SharedMonster,
    SHARED_MONSTER_KEY,
};

pub const ROOM_DESC: &str =
    "You are in a dark, damp dungeon room. A fearsome monster lurks in the shadows.";

// ── Results handed back to the command layer ─────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AttackOutcome {
    pub room: String,
    pub damage: u32,
    pub new_health: u32,
    pub max_health: u32,
    pub state: MonsterState,
    /// True only for the attack that landed the killing blow.
    pub defeated: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GameStart {
    pub rooms_initialized: Vec<String>,
    pub monster_health: u32,
}

// ── Rooms ────────────────────────────────────────────────────────────

pub struct Room {
    pub key: String,
    pub desc: String,
    monster: Option<Arc<MonsterProxy>>,
}

impl Room {
    fn new(key: &str) -> Self {
        Self {
            key: key.to_string(),
            desc: ROOM_DESC.to_string(),
            monster: None,
        }
    }

    pub fn monster(&self) -> Option<&Arc<MonsterProxy>> {
        self.monster.as_ref()
    }
}

// ── Dungeon ──────────────────────────────────────────────────────────

/// The room graph and its per-room monster proxies, all backed by the
/// one shared monster in the registry.
pub struct Dungeon {
    registry: Arc<MonsterRegistry>,
    room_order: Vec<String>,
    rooms: HashMap<String, Room>,
    started: bool,
    attack_damage: u32,
}

impl Dungeon {
    pub fn new(registry: Arc<MonsterRegistry>, rooms: Vec<String>, attack_damage: u32) -> Self {
        Self {
            registry,
            room_order: rooms,
            rooms: HashMap::new(),
            started: false,
            attack_damage,
        }
    }

    pub fn is_started(&self) -> bool {
        self.started
    }

    pub fn attack_damage(&self) -> u32 {
        self.attack_damage
    }

    /// Where `startgame` puts players.
    pub fn first_room(&self) -> Option<&str> {
        self.room_order.first().map(String::as_str)
    }

    /// Rooms that currently exist, in configured order.
    pub fn room_keys(&self) -> Vec<String> {
        self.room_order
            .iter()
            .filter(|k| self.rooms.contains_key(*k))
            .cloned()
            .collect()
    }

    /// Case-insensitive room lookup, returning the canonical key.
    pub fn find_room(&self, name: &str) -> Option<String> {
        let name = name.trim();
        self.room_keys()
            .into_iter()
            .find(|k| k.eq_ignore_ascii_case(name))
    }

    /// Build any missing rooms and proxies, then fully heal the monster.
    pub fn start_or_reset_game(&mut self) -> GameStart {
        let monster = self.registry.get_or_create(SHARED_MONSTER_KEY);

        for key in &self.room_order {
            let room = self
                .rooms
                .entry(key.clone())
                .or_insert_with(|| Room::new(key));
            match room.monster.clone() {
                Some(proxy) => {
                    let bound = proxy
                        .canonical()
                        .map(|c| Arc::ptr_eq(&c, &monster))
                        .unwrap_or(false);
                    if !bound {
                        proxy.rebind(&monster);
                    }
                }
                None => room.monster = Some(MonsterProxy::create(key, &monster)),
            }
        }

        let snapshot = monster.reset();
        self.started = true;
        info!(
            "Game started with {} rooms, monster at {}/{}",
            self.room_order.len(),
            snapshot.health,
            snapshot.max_health
        );

        GameStart {
            rooms_initialized: self.room_order.clone(),
            monster_health: snapshot.health,
        }
    }

    /// Like `start_or_reset_game`, but only for a game that was started.
    pub fn reset_game(&mut self) -> Result<GameStart> {
        if !self.started {
            return Err(DungeonError::GameNotStarted);
        }
        Ok(self.start_or_reset_game())
    }

    /// Hit the monster in `room_key` for `damage`.
    pub fn attack(&self, room_key: &str, damage: u32) -> Result<AttackOutcome> {
        let proxy = self.proxy_in(room_key)?;
        self.resolve(proxy);

        let report = proxy.forward_damage(damage)?;
        if report.snapshot.state == MonsterState::Dead && !report.defeated {
            return Err(DungeonError::MonsterAlreadyDead);
        }

        Ok(AttackOutcome {
            room: room_key.to_string(),
            damage,
            new_health: report.snapshot.health,
            max_health: report.snapshot.max_health,
            state: report.snapshot.state,
            defeated: report.defeated,
        })
    }

    /// Room description lines as shown by `look`.
    pub fn look(&self, room_key: &str) -> Result<Vec<String>> {
        let room = self
            .rooms
            .get(room_key)
            .ok_or_else(|| DungeonError::UnknownRoom(room_key.to_string()))?;

        let mut lines = vec![room.key.clone(), room.desc.clone()];
        if let Some(proxy) = &room.monster {
            self.resolve(proxy);
            lines.push(format!("You see: {}", proxy.display_name()));
        }

        let exits: Vec<String> = self
            .room_keys()
            .into_iter()
            .filter(|k| k != room_key)
            .collect();
        if !exits.is_empty() {
            lines.push(format!("Exits: {}", exits.join(", ")));
        }
        Ok(lines)
    }

    pub fn describe_monster(&self, room_key: &str) -> Result<String> {
        let proxy = self.proxy_in(room_key)?;
        self.resolve(proxy);
        Ok(proxy.describe())
    }

    /// Take the monster out of a room. The next `startgame` puts it back.
    pub fn remove_monster(&mut self, room_key: &str) -> bool {
        match self.rooms.get_mut(room_key).and_then(|r| r.monster.take()) {
            Some(proxy) => {
                proxy.detach();
                info!("Monster removed from {}", proxy.room_key());
                true
            }
            None => false,
        }
    }

    /// Drop the shared monster and its stored record. Rooms re-resolve a
    /// fresh one the next time they touch it.
    pub fn delete_monster(&mut self) -> bool {
        self.registry.delete(SHARED_MONSTER_KEY)
    }

    /// Every shared monster the registry currently holds, by key.
    pub fn monsters(&self) -> Vec<MonsterSnapshot> {
        self.registry
            .keys()
            .iter()
            .filter_map(|key| self.registry.get(key))
            .map(|monster| monster.snapshot())
            .collect()
    }

    fn proxy_in(&self, room_key: &str) -> Result<&Arc<MonsterProxy>> {
        self.rooms
            .get(room_key)
            .ok_or_else(|| DungeonError::UnknownRoom(room_key.to_string()))?
            .monster
            .as_ref()
            .ok_or(DungeonError::NoMonsterHere)
    }

    /// Make sure `proxy` points at a live shared monster, re-resolving it
    /// through the registry if its reference went away.
    fn resolve(&self, proxy: &Arc<MonsterProxy>) -> Arc<SharedMonster> {
        match proxy.canonical() {
            Ok(canonical) => canonical,
            Err(e) => {
                warn!("{}; re-resolving through the registry", e);
                let canonical = self.registry.get_or_create(SHARED_MONSTER_KEY);
                proxy.rebind(&canonical);
                canonical
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::MonsterConfig;
    use crate::monster::MemoryStore;
    use std::time::Duration;

    fn dungeon(rooms: &[&str]) -> Dungeon {
        let registry = Arc::new(MonsterRegistry::new(
            MonsterConfig {
                max_health: 1000,
                reset_delay: Duration::from_secs(60),
            },
            Arc::new(MemoryStore::default()),
        ));
        Dungeon::new(registry, rooms.iter().map(|r| r.to_string()).collect(), 10)
    }

    #[test]
    fn start_builds_every_room() {
        let mut d = dungeon(&["Dungeon", "Crypt"]);
        assert!(!d.is_started());
        let start = d.start_or_reset_game();
        assert_eq!(start.rooms_initialized, vec!["Dungeon", "Crypt"]);
        assert_eq!(start.monster_health, 1000);
        assert_eq!(d.room_keys(), vec!["Dungeon", "Crypt"]);

        let monster = d.registry.get(SHARED_MONSTER_KEY).unwrap();
        assert_eq!(monster.dependent_count(), 2);
    }

    #[test]
    fn restart_does_not_duplicate_proxies() {
        let mut d = dungeon(&["Dungeon", "Crypt"]);
        d.start_or_reset_game();
        d.attack("Dungeon", 300).unwrap();
        let start = d.start_or_reset_game();
        assert_eq!(start.monster_health, 1000);
        let monster = d.registry.get(SHARED_MONSTER_KEY).unwrap();
        assert_eq!(monster.dependent_count(), 2);
    }

    #[test]
    fn attacks_in_one_room_show_in_another() {
        let mut d = dungeon(&["Dungeon", "Crypt"]);
        d.start_or_reset_game();

        let outcome = d.attack("Dungeon", 10).unwrap();
        assert_eq!(outcome.new_health, 990);
        assert!(!outcome.defeated);

        let outcome = d.attack("Crypt", 10).unwrap();
        assert_eq!(outcome.new_health, 980);
        assert_eq!(
            d.describe_monster("Dungeon").unwrap(),
            "A fearsome Monster with glowing red eyes. It has 980/1000 health."
        );
    }

    #[test]
    fn killing_blow_then_already_dead() {
        let mut d = dungeon(&["Dungeon", "Crypt"]);
        d.start_or_reset_game();

        let outcome = d.attack("Crypt", 1000).unwrap();
        assert!(outcome.defeated);
        assert_eq!(outcome.state, MonsterState::Dead);
        assert_eq!(outcome.new_health, 0);

        assert!(matches!(
            d.attack("Dungeon", 10),
            Err(DungeonError::MonsterAlreadyDead)
        ));
        assert_eq!(
            d.describe_monster("Dungeon").unwrap(),
            "The lifeless body of the Monster lies here."
        );
    }

    #[test]
    fn reset_requires_a_started_game() {
        let mut d = dungeon(&["Dungeon"]);
        assert!(matches!(d.reset_game(), Err(DungeonError::GameNotStarted)));
        d.start_or_reset_game();
        d.attack("Dungeon", 1000).unwrap();
        let start = d.reset_game().unwrap();
        assert_eq!(start.monster_health, 1000);
        assert_eq!(d.attack("Dungeon", 10).unwrap().new_health, 990);
    }

    #[test]
    fn unknown_room_and_empty_room() {
        let mut d = dungeon(&["Dungeon", "Crypt"]);
        d.start_or_reset_game();
        assert!(matches!(
            d.attack("Attic", 10),
            Err(DungeonError::UnknownRoom(_))
        ));

        assert!(d.remove_monster("Crypt"));
        assert!(!d.remove_monster("Crypt"));
        assert!(matches!(
            d.attack("Crypt", 10),
            Err(DungeonError::NoMonsterHere)
        ));
        let monster = d.registry.get(SHARED_MONSTER_KEY).unwrap();
        assert_eq!(monster.dependent_count(), 1);
    }

    #[test]
    fn look_lists_monster_and_exits() {
        let mut d = dungeon(&["Dungeon", "Crypt"]);
        d.start_or_reset_game();
        let lines = d.look("Dungeon").unwrap();
        assert_eq!(lines[0], "Dungeon");
        assert_eq!(lines[1], ROOM_DESC);
        assert_eq!(lines[2], "You see: Monster (Alive)");
        assert_eq!(lines[3], "Exits: Crypt");

        d.attack("Crypt", 1000).unwrap();
        assert_eq!(d.look("Dungeon").unwrap()[2], "You see: Monster (Dead)");
    }

    #[test]
    fn deleted_monster_is_re_resolved() {
        let mut d = dungeon(&["Dungeon", "Crypt"]);
        d.start_or_reset_game();
        d.attack("Dungeon", 500).unwrap();

        assert!(d.registry.delete(SHARED_MONSTER_KEY));
        let outcome = d.attack("Dungeon", 10).unwrap();
        assert_eq!(outcome.new_health, 990);

        // The other room picks up the new monster on its next look.
        assert_eq!(
            d.describe_monster("Crypt").unwrap(),
            "A fearsome Monster with glowing red eyes. It has 990/1000 health."
        );
    }

    #[test]
    fn admin_delete_and_listing() {
        let mut d = dungeon(&["Dungeon", "Crypt"]);
        assert!(d.monsters().is_empty());
        assert!(!d.delete_monster());

        d.start_or_reset_game();
        d.attack("Crypt", 100).unwrap();
        let listed = d.monsters();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].key, SHARED_MONSTER_KEY);
        assert_eq!(listed[0].health, 900);

        assert!(d.delete_monster());
        assert!(d.monsters().is_empty());
        assert_eq!(d.attack("Dungeon", 10).unwrap().new_health, 990);
        assert_eq!(d.monsters()[0].health, 990);
    }

    #[test]
    fn removed_monster_comes_back_on_start() {
        let mut d = dungeon(&["Dungeon", "Crypt"]);
        d.start_or_reset_game();
        assert!(d.remove_monster("Dungeon"));
        assert_eq!(d.look("Dungeon").unwrap().len(), 3);

        d.start_or_reset_game();
        assert_eq!(d.look("Dungeon").unwrap()[2], "You see: Monster (Alive)");
        let monster = d.registry.get(SHARED_MONSTER_KEY).unwrap();
        assert_eq!(monster.dependent_count(), 2);
    }

    #[test]
    fn find_room_ignores_case() {
        let mut d = dungeon(&["Dungeon", "Crypt"]);
        assert!(d.find_room("crypt").is_none());
        d.start_or_reset_game();
        assert_eq!(d.find_room(" crypt ").as_deref(), Some("Crypt"));
        assert!(d.find_room("attic").is_none());
    }
}
