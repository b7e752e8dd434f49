use std::sync::{Arc, Mutex, Weak};
use std::time::Duration;

use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::proxy::MonsterProxy;
use super::store::StoreWriter;
use super::{
    defeat_desc, lock, unix_now, MonsterEvent, MonsterSnapshot, MonsterState, ALIVE_DESC,
};
use crate::config::MonsterConfig;

/// The result of one `apply_damage` call.
#[derive(Debug, Clone, PartialEq)]
pub struct DamageReport {
    pub snapshot: MonsterSnapshot,
    /// Health actually removed. Zero when the monster was already dead.
    pub applied: u32,
    /// True only for the call that took the monster to zero.
    pub defeated: bool,
}

struct PendingReset {
    generation: u64,
    handle: JoinHandle<()>,
}

/// Mutable half of a shared monster. Only ever touched under its mutex.
struct MonsterCore {
    health: u32,
    state: MonsterState,
    desc: String,
    last_reset: u64,
    version: u64,
    dependents: Vec<Weak<MonsterProxy>>,
    pending_reset: Option<PendingReset>,
    reset_generation: u64,
}

/// The canonical monster whose state every room proxy mirrors.
///
/// Damage and resets run as critical sections on one mutex, and the new
/// state is pushed to every live dependent before that mutex is released.
/// Lock order is always monster then proxy.
pub struct SharedMonster {
    key: String,
    name: String,
    max_health: u32,
    reset_delay: Duration,
    core: Mutex<MonsterCore>,
    store: StoreWriter,
    events: broadcast::Sender<MonsterEvent>,
    this: Weak<SharedMonster>,
}

impl SharedMonster {
    /// Build a shared monster, restoring it from `stored` when a record
    /// exists. A monster restored dead re-arms its automatic reset.
    pub fn open(
        key: &str,
        name: &str,
        config: &MonsterConfig,
        store: StoreWriter,
        events: broadcast::Sender<MonsterEvent>,
        stored: Option<MonsterSnapshot>,
    ) -> Arc<Self> {
        let max_health = config.max_health.max(1);
        let fresh = stored.is_none();

        let (health, last_reset, version) = match stored {
            Some(record) => (record.health.min(max_health), record.last_reset, record.version),
            None => (max_health, unix_now(), 0),
        };
        let state = MonsterState::for_health(health);
        let desc = match state {
            MonsterState::Alive => ALIVE_DESC.to_string(),
            MonsterState::Dead => defeat_desc(name),
        };

        let monster = Arc::new_cyclic(|this| SharedMonster {
            key: key.to_string(),
            name: name.to_string(),
            max_health,
            reset_delay: config.reset_delay,
            core: Mutex::new(MonsterCore {
                health,
                state,
                desc,
                last_reset,
                version,
                dependents: Vec::new(),
                pending_reset: None,
                reset_generation: 0,
            }),
            store,
            events,
            this: this.clone(),
        });

        {
            let mut core = lock(&monster.core);
            if fresh {
                let snapshot = monster.snapshot_of(&core);
                monster.persist(&snapshot);
                info!("SharedMonster created with key {}", monster.key);
            } else {
                info!(
                    "SharedMonster {} restored at {}/{} ({})",
                    monster.key,
                    core.health,
                    monster.max_health,
                    core.state.label()
                );
            }
            if core.state == MonsterState::Dead {
                monster.schedule_reset(&mut core);
            }
        }

        monster
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn max_health(&self) -> u32 {
        self.max_health
    }

    pub fn snapshot(&self) -> MonsterSnapshot {
        let core = lock(&self.core);
        self.snapshot_of(&core)
    }

    // ── Mutations ────────────────────────────────────────────────────

    /// Remove `amount` health, clamping at zero. Hitting zero kills the
    /// monster and arms the automatic reset. Damage to a dead monster
    /// changes nothing.
    pub fn apply_damage(&self, amount: u32) -> DamageReport {
        let mut core = lock(&self.core);

        if core.state == MonsterState::Dead {
            debug!("SharedMonster {} is already dead, ignoring {} damage", self.key, amount);
            let snapshot = self.snapshot_of(&core);
            self.push_to_dependents(&mut core, &snapshot);
            return DamageReport {
                snapshot,
                applied: 0,
                defeated: false,
            };
        }

        let before = core.health;
        core.health = core.health.saturating_sub(amount);
        core.version += 1;
        let applied = before - core.health;
        info!(
            "SharedMonster {} took {} damage. Health: {}/{}",
            self.key, applied, core.health, self.max_health
        );

        let defeated = core.health == 0;
        if defeated {
            core.state = MonsterState::Dead;
            core.desc = defeat_desc(&self.name);
            self.schedule_reset(&mut core);
        }

        let snapshot = self.snapshot_of(&core);
        self.persist(&snapshot);
        self.push_to_dependents(&mut core, &snapshot);
        if defeated {
            info!(
                "SharedMonster {} defeated. Instances: {}",
                self.key,
                core.dependents.len()
            );
        }
        drop(core);

        self.emit(MonsterEvent::Damaged {
            key: self.key.clone(),
            amount: applied,
            health: snapshot.health,
            max_health: self.max_health,
        });
        if defeated {
            self.emit(MonsterEvent::Defeated {
                key: self.key.clone(),
                name: self.name.clone(),
            });
        }

        DamageReport {
            snapshot,
            applied,
            defeated,
        }
    }

    /// Bring the monster back to full health and cancel any pending
    /// automatic reset.
    pub fn reset(&self) -> MonsterSnapshot {
        let mut core = lock(&self.core);
        if let Some(pending) = core.pending_reset.take() {
            pending.handle.abort();
            debug!("Cancelled pending reset of {}", self.key);
        }
        self.reset_locked(core)
    }

    /// Timer entry point. Only the timer armed as `generation` may reset;
    /// anything older was superseded by a manual reset or a later defeat.
    fn auto_reset(&self, generation: u64) {
        let mut core = lock(&self.core);
        match &core.pending_reset {
            Some(pending) if pending.generation == generation => {}
            _ => {
                debug!("Stale reset timer {} for {} ignored", generation, self.key);
                return;
            }
        }
        // We are running inside that task, so just detach the handle.
        core.pending_reset = None;
        info!("Automatic reset of {} after defeat", self.key);
        self.reset_locked(core);
    }

    fn reset_locked(&self, mut core: std::sync::MutexGuard<'_, MonsterCore>) -> MonsterSnapshot {
        core.health = self.max_health;
        core.state = MonsterState::Alive;
        core.desc = ALIVE_DESC.to_string();
        core.last_reset = unix_now();
        core.version += 1;

        let snapshot = self.snapshot_of(&core);
        self.persist(&snapshot);
        self.push_to_dependents(&mut core, &snapshot);
        info!(
            "SharedMonster {} reset. Instances: {}",
            self.key,
            core.dependents.len()
        );
        drop(core);

        self.emit(MonsterEvent::Reset {
            key: self.key.clone(),
            name: self.name.clone(),
            health: snapshot.health,
        });
        snapshot
    }

    /// Abort any pending automatic reset. Used when the monster is
    /// deleted from its registry.
    pub fn shutdown(&self) {
        let mut core = lock(&self.core);
        if let Some(pending) = core.pending_reset.take() {
            pending.handle.abort();
        }
    }

    pub fn has_pending_reset(&self) -> bool {
        lock(&self.core).pending_reset.is_some()
    }

    // ── Dependents ───────────────────────────────────────────────────

    pub fn register_dependent(&self, proxy: &Arc<MonsterProxy>) {
        let mut core = lock(&self.core);
        let ptr = Arc::as_ptr(proxy);
        if core.dependents.iter().any(|w| w.as_ptr() == ptr) {
            return;
        }
        core.dependents.push(Arc::downgrade(proxy));
        info!(
            "Added new instance to SharedMonster {}. Total instances: {}",
            self.key,
            core.dependents.len()
        );
    }

    pub fn unregister_dependent(&self, proxy: &MonsterProxy) {
        let mut core = lock(&self.core);
        let ptr: *const MonsterProxy = proxy;
        core.dependents
            .retain(|w| w.as_ptr() != ptr && w.strong_count() > 0);
        debug!(
            "Removed instance from SharedMonster {}. Total instances: {}",
            self.key,
            core.dependents.len()
        );
    }

    /// Push the current state to every live dependent.
    pub fn notify_dependents(&self) {
        let mut core = lock(&self.core);
        let snapshot = self.snapshot_of(&core);
        self.push_to_dependents(&mut core, &snapshot);
    }

    /// Number of registered dependents that are still alive.
    pub fn dependent_count(&self) -> usize {
        lock(&self.core)
            .dependents
            .iter()
            .filter(|w| w.strong_count() > 0)
            .count()
    }

    /// Copy the current state into one proxy, under the monster lock.
    pub(super) fn sync_proxy(&self, proxy: &MonsterProxy) {
        let core = lock(&self.core);
        proxy.apply_snapshot(&self.snapshot_of(&core));
    }

    // ── Internals ────────────────────────────────────────────────────

    fn snapshot_of(&self, core: &MonsterCore) -> MonsterSnapshot {
        MonsterSnapshot {
            key: self.key.clone(),
            name: self.name.clone(),
            health: core.health,
            max_health: self.max_health,
            state: core.state,
            desc: core.desc.clone(),
            last_reset: core.last_reset,
            version: core.version,
        }
    }

    fn push_to_dependents(&self, core: &mut MonsterCore, snapshot: &MonsterSnapshot) {
        let before = core.dependents.len();
        let mut live = Vec::with_capacity(before);
        core.dependents.retain(|weak| match weak.upgrade() {
            Some(proxy) => {
                live.push(proxy);
                true
            }
            None => false,
        });

        let pruned = before - core.dependents.len();
        if pruned > 0 {
            debug!("Pruned {} stale instances of SharedMonster {}", pruned, self.key);
        }

        for proxy in &live {
            proxy.apply_snapshot(snapshot);
        }
    }

    fn schedule_reset(&self, core: &mut MonsterCore) {
        if let Some(old) = core.pending_reset.take() {
            old.handle.abort();
        }

        let runtime = match tokio::runtime::Handle::try_current() {
            Ok(rt) => rt,
            Err(_) => {
                warn!(
                    "No async runtime to schedule the reset of {}; it stays dead until reset manually",
                    self.key
                );
                return;
            }
        };

        core.reset_generation += 1;
        let generation = core.reset_generation;
        let delay = self.reset_delay;
        let this = self.this.clone();

        let handle = runtime.spawn(async move {
            tokio::time::sleep(delay).await;
            if let Some(monster) = this.upgrade() {
                monster.auto_reset(generation);
            }
        });
        core.pending_reset = Some(PendingReset { generation, handle });
        debug!("Reset of {} scheduled in {:?}", self.key, delay);
    }

    fn persist(&self, snapshot: &MonsterSnapshot) {
        self.store.save(snapshot.clone());
    }

    fn emit(&self, event: MonsterEvent) {
        // No subscribers is fine.
        let _ = self.events.send(event);
    }
}
