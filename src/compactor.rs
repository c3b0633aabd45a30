use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, error};

use crate::engine::Engine;

const CHECK_INTERVAL: Duration = Duration::from_secs(30);

/// Background task that rewrites a tenant's WAL once enough events pile up.
pub async fn run_compactor(engine: Arc<Engine>, threshold: u64) {
    let mut interval = tokio::time::interval(CHECK_INTERVAL);
    loop {
        interval.tick().await;
        compact_if_due(&engine, threshold).await;
    }
}

/// Compact when at least `threshold` events were appended since the last rewrite.
/// Returns whether a compaction ran.
pub async fn compact_if_due(engine: &Engine, threshold: u64) -> bool {
    let appended = engine.wal_appends_since_compact().await;
    if appended < threshold {
        debug!("compactor skip: {appended}/{threshold} appends");
        return false;
    }
    match engine.compact_wal().await {
        Ok(()) => true,
        Err(e) => {
            error!("WAL compaction failed: {e}");
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::*;
    use std::path::PathBuf;

    fn test_wal_path(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join("covers_test_compactor");
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join(name);
        let _ = std::fs::remove_file(&path);
        path
    }

    fn restaurant(name: &str) -> NewRestaurant {
        NewRestaurant {
            name: Some(name.into()),
            open_time: Some(9 * 3_600_000),
            close_time: Some(23 * 3_600_000),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn compacts_only_past_threshold() {
        let path = test_wal_path("threshold.wal");
        let engine = Engine::new(path).unwrap();

        engine.create_restaurant(restaurant("One")).await.unwrap();
        assert!(!compact_if_due(&engine, 3).await);
        assert_eq!(engine.wal_appends_since_compact().await, 1);

        engine.create_restaurant(restaurant("Two")).await.unwrap();
        engine.create_restaurant(restaurant("Three")).await.unwrap();
        assert!(compact_if_due(&engine, 3).await);
        assert_eq!(engine.wal_appends_since_compact().await, 0);
        assert_eq!(engine.list_restaurants().await.len(), 3);
    }
}
