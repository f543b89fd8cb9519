use chrono::{DateTime, SecondsFormat};
use serde::{Deserialize, Serialize};

/// Unix milliseconds, UTC. The only time type inside the engine.
pub type Ms = i64;

pub const HOUR_MS: Ms = 3_600_000;

pub type WorkOrderId = String;
pub type OperationId = String;
pub type MachineId = String;

/// Half-open interval intersection test: `max(starts) < min(ends)`.
/// Touching intervals (`a_end == b_start`) do not overlap.
pub fn overlaps(a_start: Ms, a_end: Ms, b_start: Ms, b_end: Ms) -> bool {
    a_start.max(b_start) < a_end.min(b_end)
}

/// Half-open interval `[start, end)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Span {
    pub start: Ms,
    pub end: Ms,
}

impl Span {
    pub fn new(start: Ms, end: Ms) -> Self {
        debug_assert!(start < end, "Span start must be before end");
        Self { start, end }
    }

    /// `None` unless `start < end`.
    pub fn try_new(start: Ms, end: Ms) -> Option<Self> {
        (start < end).then_some(Self { start, end })
    }

    pub fn duration_ms(&self) -> Ms {
        self.end - self.start
    }

    pub fn overlaps(&self, other: &Span) -> bool {
        overlaps(self.start, self.end, other.start, other.end)
    }
}

/// A single task bound to one machine for one interval, at a fixed position
/// (`index`) inside its work order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Operation {
    pub id: OperationId,
    pub work_order_id: WorkOrderId,
    pub index: u32,
    pub machine_id: MachineId,
    pub name: String,
    pub span: Span,
}

impl Operation {
    pub fn start(&self) -> Ms {
        self.span.start
    }

    pub fn end(&self) -> Ms {
        self.span.end
    }
}

/// A work order and the operations it owns.
#[derive(Debug, Clone)]
pub struct WorkOrderState {
    pub id: WorkOrderId,
    pub product: String,
    pub qty: u32,
    /// Sorted by `index`; indexes are unique within the work order.
    pub operations: Vec<Operation>,
}

impl WorkOrderState {
    pub fn new(id: WorkOrderId, product: String, qty: u32) -> Self {
        Self {
            id,
            product,
            qty,
            operations: Vec::new(),
        }
    }

    /// Insert keeping index order. An operation already at the same index is replaced.
    pub fn insert_operation(&mut self, op: Operation) {
        match self.operations.binary_search_by_key(&op.index, |o| o.index) {
            Ok(pos) => self.operations[pos] = op,
            Err(pos) => self.operations.insert(pos, op),
        }
    }

    pub fn operation(&self, id: &str) -> Option<&Operation> {
        self.operations.iter().find(|o| o.id == id)
    }

    pub fn operation_at(&self, index: u32) -> Option<&Operation> {
        self.operations
            .binary_search_by_key(&index, |o| o.index)
            .ok()
            .map(|pos| &self.operations[pos])
    }

    /// The operation at `index - 1`, if any.
    pub fn predecessor(&self, index: u32) -> Option<&Operation> {
        index.checked_sub(1).and_then(|i| self.operation_at(i))
    }

    /// The operation at `index + 1`, if any.
    pub fn successor(&self, index: u32) -> Option<&Operation> {
        index.checked_add(1).and_then(|i| self.operation_at(i))
    }

    /// Move an operation to a new span. Returns false if the id is unknown.
    pub fn set_span(&mut self, id: &str, span: Span) -> bool {
        match self.operations.iter_mut().find(|o| o.id == id) {
            Some(op) => {
                op.span = span;
                true
            }
            None => false,
        }
    }

    pub fn info(&self) -> WorkOrderInfo {
        WorkOrderInfo {
            id: self.id.clone(),
            product: self.product.clone(),
            qty: self.qty,
            operations: self.operations.clone(),
        }
    }
}

/// Every operation booked on one machine, across all work orders.
#[derive(Debug, Clone)]
pub struct MachineLane {
    pub id: MachineId,
    /// Sorted by `span.start`.
    pub operations: Vec<Operation>,
}

impl MachineLane {
    pub fn new(id: MachineId) -> Self {
        Self {
            id,
            operations: Vec::new(),
        }
    }

    /// Insert maintaining sort order by span.start.
    pub fn insert_operation(&mut self, op: Operation) {
        let pos = self
            .operations
            .binary_search_by_key(&op.span.start, |o| o.span.start)
            .unwrap_or_else(|e| e);
        self.operations.insert(pos, op);
    }

    pub fn remove_operation(&mut self, id: &str) -> Option<Operation> {
        let pos = self.operations.iter().position(|o| o.id == id)?;
        Some(self.operations.remove(pos))
    }

    /// Move an operation to a new span, keeping the lane sorted.
    pub fn reschedule(&mut self, id: &str, span: Span) -> bool {
        match self.remove_operation(id) {
            Some(mut op) => {
                op.span = span;
                self.insert_operation(op);
                true
            }
            None => false,
        }
    }

    /// Operations whose span overlaps the query window.
    /// Binary search skips everything starting at or after `query.end`.
    pub fn overlapping(&self, query: &Span) -> impl Iterator<Item = &Operation> {
        let right_bound = self
            .operations
            .partition_point(|o| o.span.start < query.end);
        self.operations[..right_bound]
            .iter()
            .filter(move |o| o.span.end > query.start)
    }
}

/// The event types. This is the WAL record format.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Event {
    WorkOrderCreated {
        id: WorkOrderId,
        product: String,
        qty: u32,
    },
    WorkOrderDeleted {
        id: WorkOrderId,
    },
    OperationAdded {
        operation: Operation,
    },
    OperationRescheduled {
        id: OperationId,
        work_order_id: WorkOrderId,
        machine_id: MachineId,
        span: Span,
    },
}

// ── Query result types ───────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkOrderInfo {
    pub id: WorkOrderId,
    pub product: String,
    pub qty: u32,
    pub operations: Vec<Operation>,
}

/// An operation occupying a machine during a queried window.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MachineConflict {
    pub operation_id: OperationId,
    pub work_order_id: WorkOrderId,
    pub name: String,
    #[serde(with = "iso_instant")]
    pub start: Ms,
    #[serde(with = "iso_instant")]
    pub end: Ms,
}

impl From<&Operation> for MachineConflict {
    fn from(op: &Operation) -> Self {
        Self {
            operation_id: op.id.clone(),
            work_order_id: op.work_order_id.clone(),
            name: op.name.clone(),
            start: op.span.start,
            end: op.span.end,
        }
    }
}

// ── Boundary time representation ─────────────────────────────────

/// Parse an ISO-8601 / RFC 3339 instant carrying an offset (`Z` or `±hh:mm`).
pub fn parse_instant(s: &str) -> Result<Ms, chrono::ParseError> {
    DateTime::parse_from_rfc3339(s.trim()).map(|dt| dt.timestamp_millis())
}

/// Format as ISO-8601 UTC with a `Z` suffix. Out-of-range values fall back to raw millis.
pub fn format_instant(ms: Ms) -> String {
    DateTime::from_timestamp_millis(ms)
        .map(|dt| dt.to_rfc3339_opts(SecondsFormat::AutoSi, true))
        .unwrap_or_else(|| ms.to_string())
}

/// Fractional hours to whole milliseconds. `None` for non-finite or non-positive input.
pub fn hours_to_ms(hours: f64) -> Option<Ms> {
    if !hours.is_finite() || hours <= 0.0 {
        return None;
    }
    let ms = (hours * HOUR_MS as f64).round();
    if ms < 1.0 || ms > Ms::MAX as f64 {
        return None;
    }
    Some(ms as Ms)
}

/// Serde adapter: `Ms` as an ISO-8601 string.
pub mod iso_instant {
    use serde::de::Error;
    use serde::{Deserialize, Deserializer, Serializer};

    use super::{format_instant, parse_instant, Ms};

    pub fn serialize<S: Serializer>(ms: &Ms, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(&format_instant(*ms))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Ms, D::Error> {
        let raw = String::deserialize(d)?;
        parse_instant(&raw).map_err(D::Error::custom)
    }
}

/// Serde adapter: `Option<Ms>` as an optional ISO-8601 string.
pub mod iso_instant_opt {
    use serde::Serializer;

    use super::{format_instant, Ms};

    pub fn serialize<S: Serializer>(ms: &Option<Ms>, s: S) -> Result<S::Ok, S::Error> {
        match ms {
            Some(ms) => s.serialize_str(&format_instant(*ms)),
            None => s.serialize_none(),
        }
    }
}
