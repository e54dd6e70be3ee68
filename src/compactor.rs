use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info, warn};

use crate::archive::Archive;
use crate::engine::{CellStore, Engine, EngineError};

/// How often the compactor checks the journal.
const CHECK_INTERVAL: Duration = Duration::from_secs(30);

/// Compact the journal once more than `threshold` events were appended since
/// the last compaction. Returns whether a compaction ran.
pub async fn compact_if_needed<S: CellStore, A: Archive>(
    engine: &Engine<S, A>,
    threshold: u64,
) -> Result<bool, EngineError> {
    let appends = engine.wal_appends_since_compact().await;
    if appends <= threshold {
        return Ok(false);
    }
    engine.compact_wal().await?;
    metrics::counter!(crate::observability::WAL_COMPACTIONS_TOTAL).increment(1);
    info!("compacted journal after {appends} appends");
    Ok(true)
}

/// Background task: keeps the journal from growing without bound.
pub async fn run_compactor<S: CellStore, A: Archive>(engine: Arc<Engine<S, A>>, threshold: u64) {
    let mut interval = tokio::time::interval(CHECK_INTERVAL);
    loop {
        interval.tick().await;
        match compact_if_needed(&engine, threshold).await {
            Ok(true) => {}
            Ok(false) => debug!("journal below compaction threshold"),
            Err(e) => warn!("journal compaction failed: {e}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::archive::MemoryArchive;
    use crate::engine::InMemoryStore;
    use crate::model::*;
    use crate::registry::TableRegistry;
    use std::path::PathBuf;

    fn test_wal_path(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join("floorbook_test_compactor");
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join(name);
        let _ = std::fs::remove_file(&path);
        path
    }

    #[tokio::test]
    async fn compacts_only_past_threshold() {
        let path = test_wal_path("threshold.wal");
        let engine = Engine::open(
            path,
            Arc::new(TableRegistry::default_floor()),
            InMemoryStore::new(),
            MemoryArchive::new(),
        )
        .unwrap();
        let actor = Actor::staff("s1");

        let id = engine.walk_in("A01", 2, String::new(), &actor).await.unwrap().booking_id;
        engine.merge("A01", "A02", id, &actor).await.unwrap();
        assert!(!compact_if_needed(&engine, 2).await.unwrap());

        engine.split("A02", id, &actor).await.unwrap();
        assert!(compact_if_needed(&engine, 2).await.unwrap());
        assert_eq!(engine.wal_appends_since_compact().await, 0);
        assert_eq!(engine.booking(id).await.unwrap().tables, vec!["A01"]);
    }
}
