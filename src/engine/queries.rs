use tokio::sync::RwLockReadGuard;

use crate::limits::MAX_SPAN_DURATION_MS;
use crate::model::*;
use crate::observability::SLOT_SEARCHES_TOTAL;

use super::audit::{self, FloorConflict};
use super::availability::{self, SlotQuery};
use super::conflict::{self, now_ms, validate_instants};
use super::constraints::{constraints_for, ConstraintsBundle};
use super::sequence::{self, SequenceReport};
use super::store::SharedMachineLane;
use super::validate::{validate_update, AcceptedUpdate, UpdateSnapshot, Violation};
use super::{Engine, EngineError};

/// Optional filters for listing operations. Both set means both must match.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OperationFilter {
    pub work_order_id: Option<WorkOrderId>,
    pub machine_id: Option<MachineId>,
}

async fn read_lane(lane: &Option<SharedMachineLane>) -> Option<RwLockReadGuard<'_, MachineLane>> {
    match lane {
        Some(lane) => Some(lane.read().await),
        None => None,
    }
}

impl Engine {
    pub fn work_order_count(&self) -> usize {
        self.store.work_order_count()
    }

    /// Work orders sorted by id, operations sorted by index.
    pub async fn list_work_orders(&self) -> Vec<WorkOrderInfo> {
        let mut result = Vec::with_capacity(self.store.work_order_count());
        for id in self.store.work_order_ids() {
            if let Some(shared) = self.store.get_work_order(&id) {
                result.push(shared.read().await.info());
            }
        }
        result
    }

    pub async fn get_work_order(&self, id: &str) -> Result<WorkOrderInfo, EngineError> {
        let shared = self
            .store
            .get_work_order(id)
            .ok_or_else(|| EngineError::NotFound(id.to_string()))?;
        let wo = shared.read().await;
        Ok(wo.info())
    }

    /// Operations in index order per work order, or in start order when only
    /// a machine is given.
    pub async fn list_operations(&self, filter: &OperationFilter) -> Vec<Operation> {
        match (&filter.work_order_id, &filter.machine_id) {
            (None, Some(machine_id)) => {
                let lane = self.store.get_machine(machine_id);
                read_lane(&lane)
                    .await
                    .map(|lane| lane.operations.clone())
                    .unwrap_or_default()
            }
            (Some(work_order_id), machine_id) => {
                let Some(shared) = self.store.get_work_order(work_order_id) else {
                    return Vec::new();
                };
                let wo = shared.read().await;
                wo.operations
                    .iter()
                    .filter(|op| machine_id.as_ref().is_none_or(|m| &op.machine_id == m))
                    .cloned()
                    .collect()
            }
            (None, None) => {
                let mut ops = Vec::with_capacity(self.store.operation_count());
                for id in self.store.work_order_ids() {
                    if let Some(shared) = self.store.get_work_order(&id) {
                        ops.extend(shared.read().await.operations.iter().cloned());
                    }
                }
                ops
            }
        }
    }

    /// Speculative update check: the same rules as `reschedule_operation`,
    /// evaluated under read locks, with nothing committed.
    pub async fn check_update(
        &self,
        id: &str,
        start: Ms,
        end: Ms,
    ) -> Result<Result<AcceptedUpdate, Violation>, EngineError> {
        validate_instants(start, end)?;

        let work_order_id = self
            .store
            .work_order_for_operation(id)
            .ok_or_else(|| EngineError::NotFound(id.to_string()))?;
        let shared = self
            .store
            .get_work_order(&work_order_id)
            .ok_or_else(|| EngineError::NotFound(work_order_id.clone()))?;
        let wo = shared.read().await;
        let op = wo
            .operation(id)
            .ok_or_else(|| EngineError::NotFound(id.to_string()))?;

        let lane = self.store.get_machine(&op.machine_id);
        let lane_guard = read_lane(&lane).await;
        let machine_operations = lane_guard
            .as_deref()
            .map_or(&[][..], |lane| lane.operations.as_slice());

        let snapshot = UpdateSnapshot {
            predecessor: wo.predecessor(op.index),
            successor: wo.successor(op.index),
            machine_operations,
            work_order_exists: self.is_current_work_order(&work_order_id, &shared),
        };
        Ok(validate_update(op, start, end, &snapshot, now_ms()))
    }

    /// Earliest feasible start on `machine_id` for a block of `duration` ms.
    ///
    /// When `work_order_id` and `index` are both given, the neighbors at
    /// `index - 1` and `index + 1` bound the search.
    pub async fn find_valid_slot(
        &self,
        machine_id: &str,
        duration: Ms,
        preferred_start: Ms,
        work_order_id: Option<&str>,
        index: Option<u32>,
        exclude: Option<&str>,
    ) -> Result<Option<Ms>, EngineError> {
        if duration > MAX_SPAN_DURATION_MS {
            return Err(EngineError::LimitExceeded("span too wide"));
        }
        if index.is_some() && work_order_id.is_none() {
            return Err(EngineError::InvalidInput(
                "index needs a work_order_id to bound the search".into(),
            ));
        }

        let (mut predecessor_end, mut successor_start) = (None, None);
        if let Some(work_order_id) = work_order_id {
            let shared = self
                .store
                .get_work_order(work_order_id)
                .ok_or_else(|| EngineError::NotFound(work_order_id.to_string()))?;
            let wo = shared.read().await;
            if let Some(index) = index {
                predecessor_end = wo.predecessor(index).map(|op| op.end());
                successor_start = wo.successor(index).map(|op| op.start());
            }
        }

        let lane = self.store.get_machine(machine_id);
        let lane_guard = read_lane(&lane).await;
        let machine_operations = lane_guard
            .as_deref()
            .map_or(&[][..], |lane| lane.operations.as_slice());

        let query = SlotQuery {
            machine_id,
            duration,
            preferred_start,
            now: now_ms(),
            predecessor_end,
            successor_start,
            exclude,
        };
        let slot = availability::find_valid_slot(&query, machine_operations);
        let outcome = if slot.is_some() { "found" } else { "none" };
        metrics::counter!(SLOT_SEARCHES_TOTAL, "outcome" => outcome).increment(1);
        Ok(slot)
    }

    pub async fn get_constraints(&self, operation_id: &str) -> Result<ConstraintsBundle, EngineError> {
        let work_order_id = self
            .store
            .work_order_for_operation(operation_id)
            .ok_or_else(|| EngineError::NotFound(operation_id.to_string()))?;
        let shared = self
            .store
            .get_work_order(&work_order_id)
            .ok_or_else(|| EngineError::NotFound(work_order_id.clone()))?;
        let wo = shared.read().await;
        let op = wo
            .operation(operation_id)
            .ok_or_else(|| EngineError::NotFound(operation_id.to_string()))?;

        let lane = self.store.get_machine(&op.machine_id);
        let lane_guard = read_lane(&lane).await;
        let machine_operations = lane_guard
            .as_deref()
            .map_or(&[][..], |lane| lane.operations.as_slice());

        Ok(constraints_for(
            op,
            wo.predecessor(op.index),
            wo.successor(op.index),
            machine_operations,
            now_ms(),
        ))
    }

    pub async fn check_sequence(&self, work_order_id: &str) -> Result<SequenceReport, EngineError> {
        let shared = self
            .store
            .get_work_order(work_order_id)
            .ok_or_else(|| EngineError::NotFound(work_order_id.to_string()))?;
        let wo = shared.read().await;
        Ok(sequence::check_sequence(&wo.operations))
    }

    /// Operations on `machine_id` overlapping `window`, sorted by start.
    pub async fn machine_conflicts(
        &self,
        machine_id: &str,
        window: &Span,
        exclude: Option<&str>,
    ) -> Vec<MachineConflict> {
        let lane = self.store.get_machine(machine_id);
        let Some(lane) = read_lane(&lane).await else {
            return Vec::new();
        };
        let candidates: Vec<Operation> = lane.overlapping(window).cloned().collect();
        conflict::machine_conflicts(machine_id, window, &candidates, exclude)
    }

    /// Every broken invariant currently stored: machine overlaps and chain breaks.
    pub async fn audit_floor(&self) -> Vec<FloorConflict> {
        let mut lanes = Vec::new();
        for id in self.store.machine_ids() {
            if let Some(lane) = self.store.get_machine(&id) {
                lanes.push(lane.read().await.operations.clone());
            }
        }
        let mut chains = Vec::new();
        for id in self.store.work_order_ids() {
            if let Some(shared) = self.store.get_work_order(&id) {
                chains.push(shared.read().await.operations.clone());
            }
        }
        audit::audit_floor(
            lanes.iter().map(Vec::as_slice),
            chains.iter().map(Vec::as_slice),
        )
    }
}
