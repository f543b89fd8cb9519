use std::collections::HashMap;
use std::sync::Arc;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use tokio::sync::RwLock;

use crate::model::*;

pub type SharedWorkOrder = Arc<RwLock<WorkOrderState>>;
pub type SharedMachineLane = Arc<RwLock<MachineLane>>;

/// Keyed record store behind the engine: work orders, machine lanes and the
/// operation → work order index. Holds no locks of its own beyond the map
/// shards; callers lock the per-record `RwLock`s.
pub struct InMemoryStore {
    work_orders: DashMap<WorkOrderId, SharedWorkOrder>,
    machines: DashMap<MachineId, SharedMachineLane>,
    operation_index: DashMap<OperationId, WorkOrderId>,
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self {
            work_orders: DashMap::new(),
            machines: DashMap::new(),
            operation_index: DashMap::new(),
        }
    }

    /// Build a store from state rebuilt off the WAL.
    pub fn from_replay(replayed: ReplayedState) -> Self {
        let store = Self::new();
        for (id, wo) in replayed.work_orders {
            for op in &wo.operations {
                store.operation_index.insert(op.id.clone(), id.clone());
            }
            store.work_orders.insert(id, Arc::new(RwLock::new(wo)));
        }
        for (id, lane) in replayed.machines {
            store.machines.insert(id, Arc::new(RwLock::new(lane)));
        }
        store
    }

    // ── Work orders ──────────────────────────────────────────

    pub fn work_order_count(&self) -> usize {
        self.work_orders.len()
    }

    pub fn contains_work_order(&self, id: &str) -> bool {
        self.work_orders.contains_key(id)
    }

    pub fn get_work_order(&self, id: &str) -> Option<SharedWorkOrder> {
        self.work_orders.get(id).map(|e| e.value().clone())
    }

    /// Insert only if the id is free. Returns false when it is taken.
    pub fn try_insert_work_order(&self, id: WorkOrderId, state: SharedWorkOrder) -> bool {
        match self.work_orders.entry(id) {
            Entry::Occupied(_) => false,
            Entry::Vacant(slot) => {
                slot.insert(state);
                true
            }
        }
    }

    pub fn remove_work_order(&self, id: &str) -> Option<SharedWorkOrder> {
        self.work_orders.remove(id).map(|(_, state)| state)
    }

    /// All work order ids, sorted.
    pub fn work_order_ids(&self) -> Vec<WorkOrderId> {
        let mut ids: Vec<_> = self.work_orders.iter().map(|e| e.key().clone()).collect();
        ids.sort();
        ids
    }

    // ── Machine lanes ────────────────────────────────────────

    pub fn get_machine(&self, id: &str) -> Option<SharedMachineLane> {
        self.machines.get(id).map(|e| e.value().clone())
    }

    /// Lanes spring into existence the first time an operation names the machine.
    pub fn machine_or_insert(&self, id: &str) -> SharedMachineLane {
        self.machines
            .entry(id.to_string())
            .or_insert_with(|| Arc::new(RwLock::new(MachineLane::new(id.to_string()))))
            .value()
            .clone()
    }

    /// All machine ids, sorted.
    pub fn machine_ids(&self) -> Vec<MachineId> {
        let mut ids: Vec<_> = self.machines.iter().map(|e| e.key().clone()).collect();
        ids.sort();
        ids
    }

    // ── Operation index ──────────────────────────────────────

    pub fn operation_count(&self) -> usize {
        self.operation_index.len()
    }

    pub fn contains_operation(&self, id: &str) -> bool {
        self.operation_index.contains_key(id)
    }

    pub fn work_order_for_operation(&self, id: &str) -> Option<WorkOrderId> {
        self.operation_index.get(id).map(|e| e.value().clone())
    }

    /// Claim an operation id for `work_order_id`. Returns false when the id is
    /// already indexed or claimed by a commit still in flight.
    pub fn try_reserve_operation(&self, id: &str, work_order_id: &str) -> bool {
        match self.operation_index.entry(id.to_string()) {
            Entry::Occupied(_) => false,
            Entry::Vacant(slot) => {
                slot.insert(work_order_id.to_string());
                true
            }
        }
    }

    pub fn unindex_operation(&self, id: &str) {
        self.operation_index.remove(id);
    }
}

// ── Event application ────────────────────────────────────────
//
// The same functions serve live commits (caller holds the write locks) and
// WAL replay (plain owned state, no locks yet).

pub fn apply_to_work_order(wo: &mut WorkOrderState, event: &Event) {
    match event {
        Event::OperationAdded { operation } => wo.insert_operation(operation.clone()),
        Event::OperationRescheduled { id, span, .. } => {
            wo.set_span(id, *span);
        }
        Event::WorkOrderCreated { .. } | Event::WorkOrderDeleted { .. } => {}
    }
}

pub fn apply_to_lane(lane: &mut MachineLane, event: &Event) {
    match event {
        Event::OperationAdded { operation } => lane.insert_operation(operation.clone()),
        Event::OperationRescheduled { id, span, .. } => {
            lane.reschedule(id, *span);
        }
        Event::WorkOrderDeleted { id } => lane.operations.retain(|op| &op.work_order_id != id),
        Event::WorkOrderCreated { .. } => {}
    }
}

/// Lock-free state rebuilt from a WAL, before it is shared.
#[derive(Debug, Default)]
pub struct ReplayedState {
    pub work_orders: HashMap<WorkOrderId, WorkOrderState>,
    pub machines: HashMap<MachineId, MachineLane>,
}

impl ReplayedState {
    pub fn apply(&mut self, event: &Event) {
        match event {
            Event::WorkOrderCreated { id, product, qty } => {
                self.work_orders
                    .insert(id.clone(), WorkOrderState::new(id.clone(), product.clone(), *qty));
            }
            Event::WorkOrderDeleted { id } => {
                if let Some(wo) = self.work_orders.remove(id) {
                    for op in &wo.operations {
                        if let Some(lane) = self.machines.get_mut(&op.machine_id) {
                            apply_to_lane(lane, event);
                        }
                    }
                }
            }
            Event::OperationAdded { operation } => {
                let Some(wo) = self.work_orders.get_mut(&operation.work_order_id) else {
                    return;
                };
                apply_to_work_order(wo, event);
                let lane = self
                    .machines
                    .entry(operation.machine_id.clone())
                    .or_insert_with(|| MachineLane::new(operation.machine_id.clone()));
                apply_to_lane(lane, event);
            }
            Event::OperationRescheduled {
                work_order_id,
                machine_id,
                ..
            } => {
                if let Some(wo) = self.work_orders.get_mut(work_order_id) {
                    apply_to_work_order(wo, event);
                }
                if let Some(lane) = self.machines.get_mut(machine_id) {
                    apply_to_lane(lane, event);
                }
            }
        }
    }
}
