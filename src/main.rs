use std::sync::{Arc, Mutex};

use tracing::{error, info};

use quantum_dungeon_server::config::{ServerConfig, StoreConfig};
use quantum_dungeon_server::game::Dungeon;
use quantum_dungeon_server::monster::{JsonFileStore, MemoryStore, MonsterRegistry, MonsterStore};
use quantum_dungeon_server::network::GameServer;

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt::init();

    let config = ServerConfig::from_env();
    info!("Starting with {:?}", config);

    let store: Arc<dyn MonsterStore> = match &config.store {
        StoreConfig::Memory => Arc::new(MemoryStore::default()),
        StoreConfig::JsonDir(dir) => match JsonFileStore::open(dir) {
            Ok(store) => Arc::new(store),
            Err(e) => {
                error!(
                    "Cannot use monster store at {}: {}. Falling back to memory.",
                    dir.display(),
                    e
                );
                Arc::new(MemoryStore::default())
            }
        },
    };

    let registry = Arc::new(MonsterRegistry::new(config.monster.clone(), store));
    let dungeon = Arc::new(Mutex::new(Dungeon::new(
        registry.clone(),
        config.rooms.clone(),
        config.attack_damage,
    )));

    let server = match GameServer::bind(&config.bind_addr, dungeon, registry.clone()).await {
        Ok(server) => server,
        Err(e) => {
            error!("Failed to bind {}: {}", config.bind_addr, e);
            return;
        }
    };

    tokio::select! {
        _ = server.run() => {}
        _ = tokio::signal::ctrl_c() => {
            info!("Shutting down, flushing monster records");
            registry.flush().await;
        }
    }
}
