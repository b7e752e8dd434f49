use std::sync::{Arc, Mutex, RwLock, Weak};

use tracing::{debug, info, warn};

use super::shared::{DamageReport, SharedMonster};
use super::{lock, MonsterSnapshot, MonsterState};
use crate::error::{DungeonError, Result};

/// What a room currently knows about the shared monster.
#[derive(Debug, Clone, PartialEq)]
pub struct ProxyMirror {
    pub name: String,
    pub health: u32,
    pub max_health: u32,
    pub state: MonsterState,
    pub desc: String,
}

/// A room's stand-in for the shared monster.
///
/// The proxy is owned by its room and only holds a weak reference to the
/// shared monster, which in turn holds a weak reference back.
pub struct MonsterProxy {
    room_key: String,
    canonical: RwLock<Weak<SharedMonster>>,
    mirror: Mutex<ProxyMirror>,
}

impl MonsterProxy {
    /// Place a new proxy for `canonical` in `room_key`, register it and
    /// pull the current state.
    pub fn create(room_key: &str, canonical: &Arc<SharedMonster>) -> Arc<Self> {
        let proxy = Arc::new(Self {
            room_key: room_key.to_string(),
            canonical: RwLock::new(Arc::downgrade(canonical)),
            mirror: Mutex::new(ProxyMirror {
                name: canonical.name().to_string(),
                health: 0,
                max_health: canonical.max_health(),
                state: MonsterState::Dead,
                desc: String::new(),
            }),
        });
        canonical.register_dependent(&proxy);
        canonical.sync_proxy(&proxy);
        info!("Monster instance created in {}", room_key);
        proxy
    }

    pub fn room_key(&self) -> &str {
        &self.room_key
    }

    /// Resolve the shared monster this proxy stands in for.
    pub fn canonical(&self) -> Result<Arc<SharedMonster>> {
        let weak = self
            .canonical
            .read()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        weak.upgrade()
            .ok_or_else(|| DungeonError::MissingCanonicalReference {
                room: self.room_key.clone(),
            })
    }

    /// Point this proxy at a (new) shared monster.
    pub fn rebind(self: &Arc<Self>, canonical: &Arc<SharedMonster>) {
        {
            let mut weak = self
                .canonical
                .write()
                .unwrap_or_else(std::sync::PoisonError::into_inner);
            *weak = Arc::downgrade(canonical);
        }
        canonical.register_dependent(self);
        canonical.sync_proxy(self);
        info!("Monster instance in {} rebound to {}", self.room_key, canonical.key());
    }

    /// Hand damage to the shared monster, then pull its state so this
    /// room is current even before any notification lands.
    pub fn forward_damage(&self, amount: u32) -> Result<DamageReport> {
        let canonical = self.canonical()?;
        let report = canonical.apply_damage(amount);
        canonical.sync_proxy(self);
        Ok(report)
    }

    /// Pull the shared monster's state into the mirror.
    pub fn sync(&self) -> Result<()> {
        let canonical = self.canonical()?;
        canonical.sync_proxy(self);
        Ok(())
    }

    /// Long description, as seen with `look monster`.
    pub fn describe(&self) -> String {
        self.sync_or_keep();
        let mirror = self.mirror();
        match mirror.state {
            MonsterState::Alive => format!(
                "A fearsome {} with glowing red eyes. It has {}/{} health.",
                mirror.name, mirror.health, mirror.max_health
            ),
            MonsterState::Dead => mirror.desc,
        }
    }

    /// Short name used in room listings.
    pub fn display_name(&self) -> String {
        self.sync_or_keep();
        let mirror = self.mirror();
        format!("{} ({})", mirror.name, mirror.state.label())
    }

    pub fn mirror(&self) -> ProxyMirror {
        lock(&self.mirror).clone()
    }

    /// Destruction path: stop receiving updates.
    pub fn detach(&self) {
        match self.canonical() {
            Ok(canonical) => canonical.unregister_dependent(self),
            Err(_) => debug!("Monster instance in {} had nothing to detach from", self.room_key),
        }
        info!("Monster instance in {} removed", self.room_key);
    }

    pub(super) fn apply_snapshot(&self, snapshot: &MonsterSnapshot) {
        let mut mirror = lock(&self.mirror);
        mirror.name = snapshot.name.clone();
        mirror.health = snapshot.health;
        mirror.max_health = snapshot.max_health;
        mirror.state = snapshot.state;
        mirror.desc = snapshot.desc.clone();
    }

    /// Rendering falls back to the last mirrored state when the shared
    /// monster is gone.
    fn sync_or_keep(&self) {
        if let Err(e) = self.sync() {
            warn!("{}; showing last known state", e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::MonsterConfig;
    use crate::monster::store::{MemoryStore, StoreWriter};
    use crate::monster::{ALIVE_DESC, MONSTER_NAME, SHARED_MONSTER_KEY};
    use std::time::Duration;
    use tokio::sync::broadcast;

    fn shared(max_health: u32) -> Arc<SharedMonster> {
        let (tx, _rx) = broadcast::channel(16);
        SharedMonster::open(
            SHARED_MONSTER_KEY,
            MONSTER_NAME,
            &MonsterConfig {
                max_health,
                reset_delay: Duration::from_secs(60),
            },
            StoreWriter::new(Arc::new(MemoryStore::default())),
            tx,
            None,
        )
    }

    fn assert_mirrors(proxy: &MonsterProxy, canonical: &SharedMonster) {
        let snap = canonical.snapshot();
        let mirror = proxy.mirror();
        assert_eq!(mirror.health, snap.health);
        assert_eq!(mirror.max_health, snap.max_health);
        assert_eq!(mirror.state, snap.state);
        assert_eq!(mirror.desc, snap.desc);
    }

    #[test]
    fn create_syncs_immediately() {
        let monster = shared(1000);
        monster.apply_damage(25);
        let proxy = MonsterProxy::create("Dungeon", &monster);
        assert_eq!(proxy.mirror().health, 975);
        assert_eq!(proxy.mirror().desc, ALIVE_DESC);
        assert_eq!(monster.dependent_count(), 1);
    }

    #[test]
    fn damage_through_one_proxy_reaches_all() {
        let monster = shared(1000);
        let p1 = MonsterProxy::create("Dungeon", &monster);
        let p2 = MonsterProxy::create("Crypt", &monster);

        let report = p1.forward_damage(10).unwrap();
        assert_eq!(report.snapshot.health, 990);
        assert_mirrors(&p1, &monster);
        assert_mirrors(&p2, &monster);

        monster.reset();
        assert_mirrors(&p1, &monster);
        assert_mirrors(&p2, &monster);
    }

    #[test]
    fn both_rooms_see_the_same_corpse() {
        let monster = shared(1000);
        let p1 = MonsterProxy::create("Dungeon", &monster);
        let p2 = MonsterProxy::create("Crypt", &monster);

        p2.forward_damage(1000).unwrap();

        let text = "The lifeless body of the Monster lies here.";
        assert_eq!(p1.describe(), text);
        assert_eq!(p2.describe(), text);
        assert_eq!(p1.display_name(), "Monster (Dead)");
        assert_eq!(p2.display_name(), "Monster (Dead)");
    }

    #[test]
    fn alive_description_shows_health() {
        let monster = shared(1000);
        let proxy = MonsterProxy::create("Dungeon", &monster);
        proxy.forward_damage(30).unwrap();
        assert_eq!(
            proxy.describe(),
            "A fearsome Monster with glowing red eyes. It has 970/1000 health."
        );
        assert_eq!(proxy.display_name(), "Monster (Alive)");
    }

    #[test]
    fn missing_canonical_is_reported_then_recovered() {
        let monster = shared(100);
        let proxy = MonsterProxy::create("Dungeon", &monster);
        proxy.forward_damage(40).unwrap();
        drop(monster);

        assert!(matches!(
            proxy.forward_damage(1),
            Err(DungeonError::MissingCanonicalReference { .. })
        ));
        // Rendering keeps the last known state.
        assert_eq!(
            proxy.describe(),
            "A fearsome Monster with glowing red eyes. It has 60/100 health."
        );

        let replacement = shared(100);
        proxy.rebind(&replacement);
        assert_eq!(proxy.mirror().health, 100);
        assert_eq!(replacement.dependent_count(), 1);
        proxy.forward_damage(1).unwrap();
        assert_eq!(replacement.snapshot().health, 99);
    }

    #[test]
    fn detach_stops_updates() {
        let monster = shared(100);
        let proxy = MonsterProxy::create("Dungeon", &monster);
        proxy.detach();
        assert_eq!(monster.dependent_count(), 0);

        monster.apply_damage(50);
        assert_eq!(proxy.mirror().health, 100);
        // An explicit describe still pulls fresh state.
        proxy.describe();
        assert_eq!(proxy.mirror().health, 50);
    }
}
