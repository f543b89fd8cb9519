mod audit;
mod availability;
mod conflict;
mod constraints;
mod error;
mod mutations;
mod queries;
mod sequence;
mod store;
mod validate;

pub use audit::{audit_floor, lane_overlaps, FloorConflict, FloorConflictKind};
pub use availability::{find_valid_slot, SlotQuery};
pub use conflict::{first_machine_conflict, machine_conflicts};
pub use constraints::{constraints_for, ConstraintsBundle, NextOperation, PrevOperation};
pub use error::EngineError;
pub use mutations::ImportSummary;
pub use queries::OperationFilter;
pub use sequence::{check_sequence, ChainViolation, SequenceReport};
pub use store::{InMemoryStore, SharedMachineLane, SharedWorkOrder};
pub use validate::{
    validate_update, AcceptedUpdate, SequenceBreach, UpdateSnapshot, ValidationReport, Violation,
    ViolationKind,
};

use std::collections::{BTreeMap, BTreeSet};
use std::io;
use std::path::PathBuf;
use std::sync::Arc;

use tokio::sync::{mpsc, oneshot, OwnedRwLockWriteGuard, RwLock};
use tracing::info;

use crate::model::*;
use crate::wal::Wal;

use store::{apply_to_lane, apply_to_work_order, ReplayedState};

// ── Group-commit WAL channel ─────────────────────────────

pub(super) enum WalCommand {
    /// Events that become durable together or not at all.
    Append {
        events: Vec<Event>,
        response: oneshot::Sender<io::Result<()>>,
    },
    Compact {
        events: Vec<Event>,
        response: oneshot::Sender<io::Result<()>>,
    },
    AppendsSinceCompact {
        response: oneshot::Sender<u64>,
    },
}

type PendingAppend = (Vec<Event>, oneshot::Sender<io::Result<()>>);

/// Background task that owns the WAL and batches appends for group commit.
/// 1. Block until the first Append arrives.
/// 2. Buffer it (no fsync).
/// 3. Drain all immediately available Appends.
/// 4. One flush_sync for the whole batch.
/// 5. Respond to every sender with the batch result.
async fn wal_writer_loop(mut wal: Wal, mut rx: mpsc::Receiver<WalCommand>) {
    while let Some(cmd) = rx.recv().await {
        match cmd {
            WalCommand::Append { events, response } => {
                let mut batch = vec![(events, response)];
                let mut deferred = None;

                loop {
                    match rx.try_recv() {
                        Ok(WalCommand::Append { events, response }) => batch.push((events, response)),
                        Ok(other) => {
                            // Commit what we have before compaction sees the file.
                            deferred = Some(other);
                            break;
                        }
                        Err(_) => break,
                    }
                }

                commit_batch(&mut wal, &mut batch);
                if let Some(other) = deferred {
                    handle_non_append(&mut wal, other);
                }
            }
            other => handle_non_append(&mut wal, other),
        }
    }
}

fn commit_batch(wal: &mut Wal, batch: &mut Vec<PendingAppend>) {
    let event_count: usize = batch.iter().map(|(events, _)| events.len()).sum();
    metrics::histogram!(crate::observability::WAL_FLUSH_BATCH_SIZE).record(event_count as f64);
    let flush_start = std::time::Instant::now();
    let result = flush_batch(wal, batch, event_count as u64);
    metrics::histogram!(crate::observability::WAL_FLUSH_DURATION_SECONDS)
        .record(flush_start.elapsed().as_secs_f64());
    if let Err(e) = &result {
        tracing::error!("WAL flush failed for {event_count} events: {e}");
    }
    respond_batch(batch, &result);
}

/// Buffer and fsync every event of the batch. On failure the log is cut back
/// to where the batch began, so a failed commit never reappears on replay.
fn flush_batch(wal: &mut Wal, batch: &[PendingAppend], event_count: u64) -> io::Result<()> {
    let mark = wal.end_offset()?;
    let written = batch
        .iter()
        .flat_map(|(events, _)| events)
        .try_for_each(|event| wal.append_buffered(event))
        .and_then(|()| wal.flush_sync());
    if let Err(e) = written {
        if let Err(truncate_err) = wal.truncate_to(mark, event_count) {
            tracing::error!("WAL rollback to offset {mark} failed: {truncate_err}");
        }
        return Err(e);
    }
    Ok(())
}

fn respond_batch(batch: &mut Vec<PendingAppend>, result: &io::Result<()>) {
    for (_, tx) in batch.drain(..) {
        let r = match result {
            Ok(()) => Ok(()),
            Err(e) => Err(io::Error::new(e.kind(), e.to_string())),
        };
        let _ = tx.send(r);
    }
}

fn handle_non_append(wal: &mut Wal, cmd: WalCommand) {
    match cmd {
        WalCommand::Compact { events, response } => {
            let result = Wal::write_compact_file(wal.path(), &events)
                .and_then(|()| wal.swap_compact_file());
            let _ = response.send(result);
        }
        WalCommand::AppendsSinceCompact { response } => {
            let _ = response.send(wal.appends_since_compact());
        }
        WalCommand::Append { events, response } => {
            let mut batch = vec![(events, response)];
            commit_batch(wal, &mut batch);
        }
    }
}

/// One shop floor: work orders, machine lanes and the WAL that makes them durable.
///
/// Lock order, everywhere: `commit_gate` (shared), then work order locks in
/// sorted id order, then machine lane locks in sorted id order. Mutations hold
/// the gate shared for their whole read-validate-commit sequence; compaction
/// takes it exclusively so its snapshot and the log it replaces agree.
pub struct Engine {
    pub store: InMemoryStore,
    pub(super) wal_tx: mpsc::Sender<WalCommand>,
    pub(super) commit_gate: RwLock<()>,
}

impl Engine {
    pub fn new(wal_path: PathBuf) -> io::Result<Self> {
        let events = Wal::replay(&wal_path)?;
        let wal = Wal::open(&wal_path)?;
        let (wal_tx, wal_rx) = mpsc::channel(4096);
        tokio::spawn(wal_writer_loop(wal, wal_rx));

        // Replay into plain state first; nothing is shared until it is complete.
        let mut replayed = ReplayedState::default();
        for event in &events {
            replayed.apply(event);
        }
        let store = InMemoryStore::from_replay(replayed);
        if !events.is_empty() {
            info!(
                "replayed {} events from {}: {} work orders, {} operations",
                events.len(),
                wal_path.display(),
                store.work_order_count(),
                store.operation_count()
            );
        }

        Ok(Self {
            store,
            wal_tx,
            commit_gate: RwLock::new(()),
        })
    }

    /// Write event to WAL via the background group-commit writer.
    pub(super) async fn wal_append(&self, event: &Event) -> Result<(), EngineError> {
        self.wal_append_all(vec![event.clone()]).await
    }

    /// Make `events` durable as one unit: all of them reach the log or none do.
    pub(super) async fn wal_append_all(&self, events: Vec<Event>) -> Result<(), EngineError> {
        let (tx, rx) = oneshot::channel();
        self.wal_tx
            .send(WalCommand::Append { events, response: tx })
            .await
            .map_err(|_| EngineError::WalError("WAL writer shut down".into()))?;
        rx.await
            .map_err(|_| EngineError::WalError("WAL writer dropped response".into()))?
            .map_err(|e| EngineError::WalError(e.to_string()))
    }

    /// WAL-append, then apply to the locked work order and machine lane.
    pub(super) async fn persist_and_apply(
        &self,
        wo: &mut WorkOrderState,
        lane: &mut MachineLane,
        event: &Event,
    ) -> Result<(), EngineError> {
        self.wal_append(event).await?;
        apply_to_work_order(wo, event);
        apply_to_lane(lane, event);
        Ok(())
    }

    /// Lookup operation → work order, acquire the work order's write lock.
    pub(super) async fn resolve_operation_write(
        &self,
        operation_id: &str,
    ) -> Result<(SharedWorkOrder, OwnedRwLockWriteGuard<WorkOrderState>), EngineError> {
        let work_order_id = self
            .store
            .work_order_for_operation(operation_id)
            .ok_or_else(|| EngineError::NotFound(operation_id.to_string()))?;
        let shared = self
            .store
            .get_work_order(&work_order_id)
            .ok_or_else(|| EngineError::NotFound(work_order_id.clone()))?;
        let guard = shared.clone().write_owned().await;
        Ok((shared, guard))
    }

    /// False once the work order was deleted (or replaced) while the caller waited for its lock.
    pub(super) fn is_current_work_order(&self, id: &str, shared: &SharedWorkOrder) -> bool {
        self.store
            .get_work_order(id)
            .is_some_and(|current| Arc::ptr_eq(&current, shared))
    }

    /// Write-lock machine lanes in sorted id order, creating lanes on first use.
    pub(super) async fn lock_lanes(
        &self,
        machine_ids: impl IntoIterator<Item = MachineId>,
    ) -> BTreeMap<MachineId, OwnedRwLockWriteGuard<MachineLane>> {
        let ids: BTreeSet<MachineId> = machine_ids.into_iter().collect();
        let mut guards = BTreeMap::new();
        for id in ids {
            let lane = self.store.machine_or_insert(&id);
            guards.insert(id, lane.write_owned().await);
        }
        guards
    }
}
