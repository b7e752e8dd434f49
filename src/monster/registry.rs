use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use tokio::sync::broadcast;
use tracing::{debug, info, warn};

use super::shared::SharedMonster;
use super::store::{MonsterStore, StoreWriter};
use super::{lock, MonsterEvent, MONSTER_NAME};
use crate::config::MonsterConfig;

const EVENT_CAPACITY: usize = 256;

/// Owns every shared monster in the process, keyed by name.
pub struct MonsterRegistry {
    config: MonsterConfig,
    store: Arc<dyn MonsterStore>,
    writer: StoreWriter,
    monsters: Mutex<HashMap<String, Arc<SharedMonster>>>,
    events: broadcast::Sender<MonsterEvent>,
}

impl MonsterRegistry {
    pub fn new(config: MonsterConfig, store: Arc<dyn MonsterStore>) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            config,
            writer: StoreWriter::new(store.clone()),
            store,
            monsters: Mutex::new(HashMap::new()),
            events,
        }
    }

    /// Return the monster for `key`, creating it on first use.
    ///
    /// The lookup and the insert happen under one lock, so two callers
    /// racing on a fresh key still end up with the same monster.
    pub fn get_or_create(&self, key: &str) -> Arc<SharedMonster> {
        let mut monsters = lock(&self.monsters);
        if let Some(existing) = monsters.get(key) {
            debug!("Retrieved existing SharedMonster with key {}", key);
            return existing.clone();
        }

        let stored = match self.store.load(key) {
            Ok(stored) => stored,
            Err(e) => {
                warn!("Could not load SharedMonster {}: {}. Starting fresh.", key, e);
                None
            }
        };

        let monster = SharedMonster::open(
            key,
            MONSTER_NAME,
            &self.config,
            self.writer.clone(),
            self.events.clone(),
            stored,
        );
        monsters.insert(key.to_string(), monster.clone());
        info!("Registered SharedMonster with key {}", key);
        monster
    }

    pub fn get(&self, key: &str) -> Option<Arc<SharedMonster>> {
        lock(&self.monsters).get(key).cloned()
    }

    /// Drop a monster and its stored record. Proxies still pointing at it
    /// will find their reference gone and re-resolve.
    pub fn delete(&self, key: &str) -> bool {
        let removed = lock(&self.monsters).remove(key);
        match removed {
            Some(monster) => {
                monster.shutdown();
                self.writer.remove(key);
                info!("Deleted SharedMonster with key {}", key);
                true
            }
            None => false,
        }
    }

    pub fn keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = lock(&self.monsters).keys().cloned().collect();
        keys.sort();
        keys
    }

    /// Wait for queued record writes to land in the store.
    pub async fn flush(&self) {
        self.writer.flush().await;
    }

    /// Every damage, defeat and reset of any monster in this registry.
    pub fn subscribe(&self) -> broadcast::Receiver<MonsterEvent> {
        self.events.subscribe()
    }
}
