use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::sync::Arc;

use tokio::sync::{oneshot, OwnedRwLockWriteGuard, RwLock};
use tracing::{debug, info, warn};

use crate::limits::*;
use crate::model::*;
use crate::observability::{RESCHEDULES_TOTAL, RULE_VIOLATIONS_TOTAL};

use super::conflict::{now_ms, validate_instants};
use super::store::{apply_to_lane, apply_to_work_order};
use super::validate::{validate_update, AcceptedUpdate, UpdateSnapshot};
use super::{Engine, EngineError, WalCommand};

/// What a seed import did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ImportSummary {
    pub created: usize,
    pub skipped: usize,
    pub operations: usize,
}

fn check_id(kind: &str, id: &str) -> Result<(), EngineError> {
    if id.is_empty() {
        return Err(EngineError::InvalidInput(format!("{kind} id must not be empty")));
    }
    if id.len() > MAX_ID_LEN {
        return Err(EngineError::LimitExceeded("id too long"));
    }
    Ok(())
}

fn check_name(name: &str) -> Result<(), EngineError> {
    if name.len() > MAX_NAME_LEN {
        return Err(EngineError::LimitExceeded("name too long"));
    }
    Ok(())
}

fn check_new_operation(op: &Operation) -> Result<(), EngineError> {
    check_id("operation", &op.id)?;
    check_id("work order", &op.work_order_id)?;
    check_id("machine", &op.machine_id)?;
    check_name(&op.name)?;
    validate_instants(op.start(), op.end())?;
    if op.start() >= op.end() {
        return Err(EngineError::InvalidInput(format!(
            "operation {}: start must be before end",
            op.id
        )));
    }
    Ok(())
}

/// Structural checks that need no locks: well-formed fields and no id or
/// `(work order, index)` slot repeated inside the batch.
fn check_batch(ops: &[Operation]) -> Result<(), EngineError> {
    if ops.len() > MAX_BATCH_SIZE {
        return Err(EngineError::LimitExceeded("batch too large"));
    }
    let mut seen_ids = HashSet::new();
    let mut seen_slots = HashSet::new();
    for op in ops {
        check_new_operation(op)?;
        if !seen_ids.insert(op.id.as_str()) {
            return Err(EngineError::AlreadyExists(op.id.clone()));
        }
        if !seen_slots.insert((op.work_order_id.as_str(), op.index)) {
            return Err(EngineError::DuplicateIndex {
                work_order_id: op.work_order_id.clone(),
                index: op.index,
            });
        }
    }
    Ok(())
}

impl Engine {
    pub async fn create_work_order(
        &self,
        id: WorkOrderId,
        product: String,
        qty: u32,
    ) -> Result<(), EngineError> {
        check_id("work order", &id)?;
        check_name(&product)?;
        if self.store.work_order_count() >= MAX_WORK_ORDERS_PER_TENANT {
            return Err(EngineError::LimitExceeded("too many work orders"));
        }

        let _gate = self.commit_gate.read().await;

        // Reserve the id while holding its lock so readers wait for the WAL outcome.
        let shared = Arc::new(RwLock::new(WorkOrderState::new(id.clone(), product.clone(), qty)));
        let _reserved = shared.clone().write_owned().await;
        if !self.store.try_insert_work_order(id.clone(), shared) {
            return Err(EngineError::AlreadyExists(id));
        }

        let event = Event::WorkOrderCreated {
            id: id.clone(),
            product,
            qty,
        };
        if let Err(e) = self.wal_append(&event).await {
            self.store.remove_work_order(&id);
            return Err(e);
        }
        debug!("created work order {id}");
        Ok(())
    }

    /// Delete a work order and every operation it owns. Returns the number of
    /// operations removed.
    pub async fn delete_work_order(&self, id: &str) -> Result<usize, EngineError> {
        let _gate = self.commit_gate.read().await;

        let shared = self
            .store
            .get_work_order(id)
            .ok_or_else(|| EngineError::NotFound(id.to_string()))?;
        let wo = shared.clone().write_owned().await;
        if !self.is_current_work_order(id, &shared) {
            return Err(EngineError::NotFound(id.to_string()));
        }

        let mut lanes = self
            .lock_lanes(wo.operations.iter().map(|op| op.machine_id.clone()))
            .await;

        let event = Event::WorkOrderDeleted { id: id.to_string() };
        self.wal_append(&event).await?;
        for lane in lanes.values_mut() {
            apply_to_lane(lane, &event);
        }
        for op in &wo.operations {
            self.store.unindex_operation(&op.id);
        }
        self.store.remove_work_order(id);

        info!("deleted work order {id} with {} operations", wo.operations.len());
        Ok(wo.operations.len())
    }

    /// Bulk-create operations for existing work orders. All-or-nothing: every
    /// operation is checked before any is written, and the whole batch is one
    /// WAL commit.
    ///
    /// Only structural rules apply here (unique ids, unique index per work
    /// order, well-formed spans). Sequence and machine exclusivity are not
    /// enforced, since imported plans may already break them; `audit_floor`
    /// reports such data.
    pub async fn add_operations(&self, ops: Vec<Operation>) -> Result<usize, EngineError> {
        if ops.is_empty() {
            return Ok(0);
        }
        check_batch(&ops)?;

        let _gate = self.commit_gate.read().await;

        let work_order_ids: BTreeSet<WorkOrderId> =
            ops.iter().map(|op| op.work_order_id.clone()).collect();
        let mut work_orders = BTreeMap::new();
        for id in work_order_ids {
            let shared = self
                .store
                .get_work_order(&id)
                .ok_or_else(|| EngineError::NotFound(id.clone()))?;
            let guard = shared.clone().write_owned().await;
            if !self.is_current_work_order(&id, &shared) {
                return Err(EngineError::NotFound(id));
            }
            work_orders.insert(id, guard);
        }
        let mut lanes = self
            .lock_lanes(ops.iter().map(|op| op.machine_id.clone()))
            .await;

        let added = self
            .commit_operations(Vec::new(), ops, &mut work_orders, &mut lanes)
            .await?;
        debug!("added {added} operations");
        Ok(added)
    }

    /// Check `ops` against the locked work orders and lanes, claim their ids,
    /// then make `leading` plus one `OperationAdded` per operation durable as a
    /// single WAL commit and apply them. Nothing is applied unless the commit
    /// succeeds, and claimed ids are released on any failure.
    ///
    /// Ids are claimed in the shared operation index, not under a lock, since
    /// two batches naming the same id may share no work order or machine.
    async fn commit_operations(
        &self,
        leading: Vec<Event>,
        ops: Vec<Operation>,
        work_orders: &mut BTreeMap<WorkOrderId, OwnedRwLockWriteGuard<WorkOrderState>>,
        lanes: &mut BTreeMap<MachineId, OwnedRwLockWriteGuard<MachineLane>>,
    ) -> Result<usize, EngineError> {
        let mut per_work_order: HashMap<&str, usize> = HashMap::new();
        let mut per_machine: HashMap<&str, usize> = HashMap::new();
        for op in &ops {
            if let Some(wo) = work_orders.get(&op.work_order_id)
                && wo.operation_at(op.index).is_some()
            {
                return Err(EngineError::DuplicateIndex {
                    work_order_id: op.work_order_id.clone(),
                    index: op.index,
                });
            }
            *per_work_order.entry(op.work_order_id.as_str()).or_default() += 1;
            *per_machine.entry(op.machine_id.as_str()).or_default() += 1;
        }
        for (id, added) in &per_work_order {
            if let Some(wo) = work_orders.get(*id)
                && wo.operations.len() + added > MAX_OPERATIONS_PER_WORK_ORDER
            {
                return Err(EngineError::LimitExceeded("too many operations in work order"));
            }
        }
        for (id, added) in &per_machine {
            if let Some(lane) = lanes.get(*id)
                && lane.operations.len() + added > MAX_OPERATIONS_PER_MACHINE
            {
                return Err(EngineError::LimitExceeded("too many operations on machine"));
            }
        }

        let mut claimed: Vec<&str> = Vec::with_capacity(ops.len());
        for op in &ops {
            if !self.store.try_reserve_operation(&op.id, &op.work_order_id) {
                self.release_operations(&claimed);
                return Err(EngineError::AlreadyExists(op.id.clone()));
            }
            claimed.push(&op.id);
        }

        let mut events = leading;
        events.extend(
            ops.iter()
                .cloned()
                .map(|operation| Event::OperationAdded { operation }),
        );
        if let Err(e) = self.wal_append_all(events.clone()).await {
            self.release_operations(&claimed);
            return Err(e);
        }

        for (event, op) in events.iter().skip(events.len() - ops.len()).zip(&ops) {
            if let Some(wo) = work_orders.get_mut(&op.work_order_id) {
                apply_to_work_order(wo, event);
            }
            if let Some(lane) = lanes.get_mut(&op.machine_id) {
                apply_to_lane(lane, event);
            }
        }
        Ok(ops.len())
    }

    fn release_operations(&self, ids: &[&str]) {
        for id in ids {
            self.store.unindex_operation(id);
        }
    }

    /// Create a work order together with its operations as one WAL commit.
    /// `Ok(None)` when a work order with that id already exists.
    async fn create_work_order_with_operations(
        &self,
        info: WorkOrderInfo,
    ) -> Result<Option<usize>, EngineError> {
        check_id("work order", &info.id)?;
        check_name(&info.product)?;
        if self.store.work_order_count() >= MAX_WORK_ORDERS_PER_TENANT {
            return Err(EngineError::LimitExceeded("too many work orders"));
        }
        if !info.operations.is_empty() {
            check_batch(&info.operations)?;
        }

        let _gate = self.commit_gate.read().await;

        let id = info.id;
        let shared = Arc::new(RwLock::new(WorkOrderState::new(id.clone(), info.product.clone(), info.qty)));
        let guard = shared.clone().write_owned().await;
        if !self.store.try_insert_work_order(id.clone(), shared) {
            return Ok(None);
        }

        let mut work_orders = BTreeMap::from([(id.clone(), guard)]);
        let mut lanes = self
            .lock_lanes(info.operations.iter().map(|op| op.machine_id.clone()))
            .await;
        let created = Event::WorkOrderCreated {
            id: id.clone(),
            product: info.product,
            qty: info.qty,
        };
        match self
            .commit_operations(vec![created], info.operations, &mut work_orders, &mut lanes)
            .await
        {
            Ok(added) => Ok(Some(added)),
            Err(e) => {
                self.store.remove_work_order(&id);
                Err(e)
            }
        }
    }

    /// The validated update path: move an operation to `[start, end)` if every
    /// scheduling rule holds, otherwise return the violation and change nothing.
    ///
    /// The work order lock and the machine lane lock are both held from the
    /// snapshot read through the commit, so two moves onto the same machine
    /// (or within the same work order) cannot both pass on stale data.
    pub async fn reschedule_operation(
        &self,
        id: &str,
        start: Ms,
        end: Ms,
    ) -> Result<AcceptedUpdate, EngineError> {
        validate_instants(start, end)?;
        let _gate = self.commit_gate.read().await;

        let (shared, mut wo) = self.resolve_operation_write(id).await?;
        let op = wo
            .operation(id)
            .cloned()
            .ok_or_else(|| EngineError::NotFound(id.to_string()))?;
        let mut lane = self.store.machine_or_insert(&op.machine_id).write_owned().await;

        let snapshot = UpdateSnapshot {
            predecessor: wo.predecessor(op.index),
            successor: wo.successor(op.index),
            machine_operations: &lane.operations,
            work_order_exists: self.is_current_work_order(&op.work_order_id, &shared),
        };
        let accepted = match validate_update(&op, start, end, &snapshot, now_ms()) {
            Ok(accepted) => accepted,
            Err(violation) => {
                metrics::counter!(RESCHEDULES_TOTAL, "outcome" => "rejected").increment(1);
                metrics::counter!(RULE_VIOLATIONS_TOTAL, "kind" => violation.kind().as_str())
                    .increment(1);
                info!("rejected reschedule of {id}: {violation}");
                return Err(violation.into());
            }
        };

        let event = Event::OperationRescheduled {
            id: op.id.clone(),
            work_order_id: op.work_order_id.clone(),
            machine_id: op.machine_id.clone(),
            span: accepted.span,
        };
        self.persist_and_apply(&mut wo, &mut lane, &event).await?;

        metrics::counter!(RESCHEDULES_TOTAL, "outcome" => "accepted").increment(1);
        info!(
            "rescheduled {id} on {} to [{}, {})",
            op.machine_id,
            format_instant(accepted.span.start),
            format_instant(accepted.span.end)
        );
        Ok(accepted)
    }

    /// Create every work order not already present, with its operations.
    /// Existing work orders are left untouched.
    pub async fn import_seed(&self, work_orders: Vec<WorkOrderInfo>) -> Result<ImportSummary, EngineError> {
        let mut summary = ImportSummary::default();

        for wo in work_orders {
            if let Some(stray) = wo.operations.iter().find(|op| op.work_order_id != wo.id) {
                return Err(EngineError::InvalidInput(format!(
                    "operation {} does not belong to work order {}",
                    stray.id, wo.id
                )));
            }
            if self.store.contains_work_order(&wo.id) {
                warn!("seed: work order {} already exists, skipping", wo.id);
                summary.skipped += 1;
                continue;
            }

            let id = wo.id.clone();
            match self.create_work_order_with_operations(wo).await? {
                Some(added) => summary.operations += added,
                None => {
                    warn!("seed: work order {id} already exists, skipping");
                    summary.skipped += 1;
                    continue;
                }
            }
            summary.created += 1;
        }

        info!(
            "seed import: {} work orders created, {} skipped, {} operations",
            summary.created, summary.skipped, summary.operations
        );
        Ok(summary)
    }

    /// Rewrite the WAL as the minimal event set that recreates the current state.
    pub async fn compact_wal(&self) -> Result<(), EngineError> {
        let _gate = self.commit_gate.write().await;

        let mut events = Vec::new();
        for id in self.store.work_order_ids() {
            let Some(shared) = self.store.get_work_order(&id) else {
                continue;
            };
            let wo = shared.read().await;
            events.push(Event::WorkOrderCreated {
                id: wo.id.clone(),
                product: wo.product.clone(),
                qty: wo.qty,
            });
            events.extend(
                wo.operations
                    .iter()
                    .cloned()
                    .map(|operation| Event::OperationAdded { operation }),
            );
        }

        let count = events.len();
        let (tx, rx) = oneshot::channel();
        self.wal_tx
            .send(WalCommand::Compact { events, response: tx })
            .await
            .map_err(|_| EngineError::WalError("WAL writer shut down".into()))?;
        rx.await
            .map_err(|_| EngineError::WalError("WAL writer dropped response".into()))?
            .map_err(|e| EngineError::WalError(e.to_string()))?;

        info!("compacted WAL to {count} events");
        Ok(())
    }

    pub async fn wal_appends_since_compact(&self) -> u64 {
        let (tx, rx) = oneshot::channel();
        if self
            .wal_tx
            .send(WalCommand::AppendsSinceCompact { response: tx })
            .await
            .is_err()
        {
            return 0;
        }
        rx.await.unwrap_or(0)
    }
}
