use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use tokio::sync::{mpsc, oneshot};
use tracing::{debug, error, info, warn};

use super::{lock, MonsterSnapshot};
use crate::error::Result;

/// Durable home for shared monster records, one per registry key.
pub trait MonsterStore: Send + Sync {
    fn load(&self, key: &str) -> Result<Option<MonsterSnapshot>>;
    fn save(&self, snapshot: &MonsterSnapshot) -> Result<()>;
    fn remove(&self, key: &str) -> Result<()>;
}

// ── In-memory ──────────────────────────────────────────────────────

#[derive(Default)]
pub struct MemoryStore {
    records: Mutex<HashMap<String, MonsterSnapshot>>,
}

impl MonsterStore for MemoryStore {
    fn load(&self, key: &str) -> Result<Option<MonsterSnapshot>> {
        Ok(lock(&self.records).get(key).cloned())
    }

    fn save(&self, snapshot: &MonsterSnapshot) -> Result<()> {
        lock(&self.records).insert(snapshot.key.clone(), snapshot.clone());
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<()> {
        lock(&self.records).remove(key);
        Ok(())
    }
}

// ── JSON files ─────────────────────────────────────────────────────

/// One pretty-printed JSON file per key. Writes go to a temp file that is
/// then renamed over the old record.
pub struct JsonFileStore {
    dir: PathBuf,
}

impl JsonFileStore {
    pub fn open(dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        std::fs::create_dir_all(&dir)?;
        info!("Monster store at {}", dir.display());
        Ok(Self { dir })
    }

    fn path_for(&self, key: &str) -> PathBuf {
        let file: String = key
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() || c == '_' || c == '-' { c } else { '_' })
            .collect();
        self.dir.join(format!("{}.json", file))
    }
}

impl MonsterStore for JsonFileStore {
    fn load(&self, key: &str) -> Result<Option<MonsterSnapshot>> {
        let path = self.path_for(key);
        match std::fs::read_to_string(&path) {
            Ok(contents) => Ok(Some(serde_json::from_str(&contents)?)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn save(&self, snapshot: &MonsterSnapshot) -> Result<()> {
        let path = self.path_for(&snapshot.key);
        let tmp = path.with_extension("json.tmp");
        let json = serde_json::to_string_pretty(snapshot)?;
        std::fs::write(&tmp, json)?;
        std::fs::rename(&tmp, &path)?;
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<()> {
        match std::fs::remove_file(self.path_for(key)) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

// ── Background writer ──────────────────────────────────────────────

enum StoreOp {
    Save(MonsterSnapshot),
    Remove(String),
    Flush(oneshot::Sender<()>),
}

/// Queues saves and removals for one writer task, so callers holding a
/// monster lock never touch the disk. Operations are applied in the order
/// they were submitted. Without a tokio runtime they are applied inline.
#[derive(Clone)]
pub struct StoreWriter {
    store: Arc<dyn MonsterStore>,
    queue: Option<mpsc::UnboundedSender<StoreOp>>,
}

impl StoreWriter {
    pub fn new(store: Arc<dyn MonsterStore>) -> Self {
        let queue = match tokio::runtime::Handle::try_current() {
            Ok(runtime) => {
                let (tx, rx) = mpsc::unbounded_channel();
                runtime.spawn(write_loop(store.clone(), rx));
                Some(tx)
            }
            Err(_) => {
                debug!("No async runtime, monster records are written inline");
                None
            }
        };
        Self { store, queue }
    }

    pub fn save(&self, snapshot: MonsterSnapshot) {
        self.submit(StoreOp::Save(snapshot));
    }

    /// Removal takes effect at once, so a lookup right after it cannot
    /// load the old record, and is queued again behind any pending saves.
    pub fn remove(&self, key: &str) {
        apply(&*self.store, StoreOp::Remove(key.to_string()));
        if self.queue.is_some() {
            self.submit(StoreOp::Remove(key.to_string()));
        }
    }

    /// Wait until everything queued so far has reached the store.
    pub async fn flush(&self) {
        let Some(queue) = &self.queue else { return };
        let (done, wait) = oneshot::channel();
        if queue.send(StoreOp::Flush(done)).is_ok() {
            let _ = wait.await;
        }
    }

    fn submit(&self, op: StoreOp) {
        match &self.queue {
            Some(queue) => {
                if let Err(mpsc::error::SendError(op)) = queue.send(op) {
                    warn!("Store writer is gone, writing inline");
                    apply(&*self.store, op);
                }
            }
            None => apply(&*self.store, op),
        }
    }
}

async fn write_loop(store: Arc<dyn MonsterStore>, mut ops: mpsc::UnboundedReceiver<StoreOp>) {
    while let Some(op) = ops.recv().await {
        let store = store.clone();
        if let Err(e) = tokio::task::spawn_blocking(move || apply(&*store, op)).await {
            error!("Monster store write panicked: {}", e);
        }
    }
    debug!("Store writer shutting down");
}

fn apply(store: &dyn MonsterStore, op: StoreOp) {
    match op {
        StoreOp::Save(snapshot) => {
            if let Err(e) = store.save(&snapshot) {
                warn!("Failed to persist SharedMonster {}: {}", snapshot.key, e);
            }
        }
        StoreOp::Remove(key) => {
            if let Err(e) = store.remove(&key) {
                warn!("Could not remove stored SharedMonster {}: {}", key, e);
            }
        }
        StoreOp::Flush(done) => {
            let _ = done.send(());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::DungeonError;
    use crate::monster::{MonsterState, ALIVE_DESC, MONSTER_NAME, SHARED_MONSTER_KEY};
    use tempfile::TempDir;

    fn record(health: u32) -> MonsterSnapshot {
        MonsterSnapshot {
            key: SHARED_MONSTER_KEY.into(),
            name: MONSTER_NAME.into(),
            health,
            max_health: 1000,
            state: MonsterState::for_health(health),
            desc: ALIVE_DESC.into(),
            last_reset: 1_700_000_000,
            version: 3,
        }
    }

    #[test]
    fn memory_store_keeps_latest() {
        let store = MemoryStore::default();
        assert!(store.load(SHARED_MONSTER_KEY).unwrap().is_none());
        store.save(&record(900)).unwrap();
        store.save(&record(800)).unwrap();
        assert_eq!(store.load(SHARED_MONSTER_KEY).unwrap().unwrap().health, 800);
        store.remove(SHARED_MONSTER_KEY).unwrap();
        assert!(store.load(SHARED_MONSTER_KEY).unwrap().is_none());
    }

    #[test]
    fn json_store_survives_reopen() {
        let temp_dir = TempDir::new().expect("Failed to create temp dir");
        {
            let store = JsonFileStore::open(temp_dir.path()).unwrap();
            store.save(&record(420)).unwrap();
        }
        let store = JsonFileStore::open(temp_dir.path()).unwrap();
        let loaded = store.load(SHARED_MONSTER_KEY).unwrap().unwrap();
        assert_eq!(loaded, record(420));
        assert!(temp_dir.path().join("THE_SHARED_MONSTER.json").exists());
        assert!(!temp_dir.path().join("THE_SHARED_MONSTER.json.tmp").exists());

        store.remove(SHARED_MONSTER_KEY).unwrap();
        store.remove(SHARED_MONSTER_KEY).unwrap();
        assert!(store.load(SHARED_MONSTER_KEY).unwrap().is_none());
    }

    #[test]
    fn json_store_creates_nested_dirs() {
        let temp_dir = TempDir::new().expect("Failed to create temp dir");
        let nested = temp_dir.path().join("saves").join("monsters");
        let store = JsonFileStore::open(&nested).unwrap();
        store.save(&record(1)).unwrap();
        assert!(nested.join("THE_SHARED_MONSTER.json").exists());
    }

    #[test]
    fn json_store_rejects_garbage() {
        let temp_dir = TempDir::new().expect("Failed to create temp dir");
        let store = JsonFileStore::open(temp_dir.path()).unwrap();
        std::fs::write(temp_dir.path().join("THE_SHARED_MONSTER.json"), "not json").unwrap();
        assert!(matches!(
            store.load(SHARED_MONSTER_KEY),
            Err(DungeonError::Serialization(_))
        ));
    }

    #[test]
    fn keys_are_sanitised_into_file_names() {
        let temp_dir = TempDir::new().expect("Failed to create temp dir");
        let store = JsonFileStore::open(temp_dir.path()).unwrap();
        assert_eq!(
            store.path_for("../evil key"),
            temp_dir.path().join("___evil_key.json")
        );
    }

    #[test]
    fn writer_without_runtime_writes_inline() {
        let store = Arc::new(MemoryStore::default());
        let writer = StoreWriter::new(store.clone());
        writer.save(record(500));
        assert_eq!(store.load(SHARED_MONSTER_KEY).unwrap().unwrap().health, 500);
        writer.remove(SHARED_MONSTER_KEY);
        assert!(store.load(SHARED_MONSTER_KEY).unwrap().is_none());
    }

    #[tokio::test]
    async fn writer_applies_ops_in_order() {
        let store = Arc::new(MemoryStore::default());
        let writer = StoreWriter::new(store.clone());

        writer.save(record(900));
        writer.save(record(800));
        writer.remove(SHARED_MONSTER_KEY);
        writer.flush().await;
        assert!(store.load(SHARED_MONSTER_KEY).unwrap().is_none());

        writer.save(record(700));
        writer.flush().await;
        assert_eq!(store.load(SHARED_MONSTER_KEY).unwrap().unwrap().health, 700);
    }

    #[tokio::test]
    async fn remove_is_visible_immediately() {
        let store = Arc::new(MemoryStore::default());
        let writer = StoreWriter::new(store.clone());
        writer.save(record(600));
        writer.flush().await;

        writer.remove(SHARED_MONSTER_KEY);
        assert!(store.load(SHARED_MONSTER_KEY).unwrap().is_none());
        writer.flush().await;
        assert!(store.load(SHARED_MONSTER_KEY).unwrap().is_none());
    }

    #[tokio::test]
    async fn writer_reaches_json_files() {
        let temp_dir = TempDir::new().expect("Failed to create temp dir");
        let store = Arc::new(JsonFileStore::open(temp_dir.path()).unwrap());
        let writer = StoreWriter::new(store.clone());
        writer.save(record(123));
        writer.flush().await;
        assert_eq!(store.load(SHARED_MONSTER_KEY).unwrap().unwrap().health, 123);
    }
}
