use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info, warn};

use crate::engine::{Engine, EngineError};
use crate::observability::COMPACTIONS_TOTAL;

const CHECK_INTERVAL: Duration = Duration::from_secs(30);

/// Compact the engine's WAL once `threshold` events were appended since the
/// last compaction. Returns whether a compaction ran.
pub async fn compact_if_needed(engine: &Engine, threshold: u64) -> Result<bool, EngineError> {
    let appended = engine.wal_appends_since_compact().await;
    if appended < threshold {
        debug!("compactor: {appended} appends since last compaction, threshold {threshold}");
        return Ok(false);
    }
    match engine.compact_wal().await {
        Ok(()) => {
            metrics::counter!(COMPACTIONS_TOTAL, "status" => "ok").increment(1);
            info!("compacted WAL after {appended} appends");
            Ok(true)
        }
        Err(e) => {
            metrics::counter!(COMPACTIONS_TOTAL, "status" => "error").increment(1);
            Err(e)
        }
    }
}

/// Background task that periodically compacts one tenant's WAL.
pub async fn run_compactor(engine: Arc<Engine>, threshold: u64) {
    let mut interval = tokio::time::interval(CHECK_INTERVAL);
    loop {
        interval.tick().await;
        if let Err(e) = compact_if_needed(&engine, threshold).await {
            warn!("WAL compaction failed: {e}");
        }
    }
}
