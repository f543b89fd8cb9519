use std::fmt;

use serde::Serialize;
use serde_json::{json, Value};
use thiserror::Error;

use crate::model::*;

use super::conflict::first_machine_conflict;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ViolationKind {
    InvalidInterval,
    PastStart,
    NotFound,
    SequenceViolation,
    MachineConflict,
}

impl ViolationKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ViolationKind::InvalidInterval => "InvalidInterval",
            ViolationKind::PastStart => "PastStart",
            ViolationKind::NotFound => "NotFound",
            ViolationKind::SequenceViolation => "SequenceViolation",
            ViolationKind::MachineConflict => "MachineConflict",
        }
    }
}

impl fmt::Display for ViolationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Which neighbor in the work order the proposed interval collides with.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SequenceBreach {
    Predecessor {
        operation_id: OperationId,
        name: String,
        index: u32,
        end: Ms,
    },
    Successor {
        operation_id: OperationId,
        name: String,
        index: u32,
        start: Ms,
    },
}

impl fmt::Display for SequenceBreach {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SequenceBreach::Predecessor { index, .. } => {
                write!(f, "Operation must start after previous (idx {index} ends)")
            }
            SequenceBreach::Successor { index, .. } => {
                write!(f, "Operation must end before next (idx {index} starts)")
            }
        }
    }
}

/// Why a proposed interval was refused.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum Violation {
    #[error("Start must be before end")]
    InvalidInterval { start: Ms, end: Ms },
    #[error("Start cannot be before now")]
    PastStart { start: Ms, now: Ms },
    #[error("Work order {work_order_id} not found")]
    NotFound { work_order_id: WorkOrderId },
    #[error("{0}")]
    SequenceViolation(SequenceBreach),
    #[error("overlap in lane {machine_id} with {}", .conflict.operation_id)]
    MachineConflict {
        machine_id: MachineId,
        conflict: MachineConflict,
    },
}

impl Violation {
    pub fn kind(&self) -> ViolationKind {
        match self {
            Violation::InvalidInterval { .. } => ViolationKind::InvalidInterval,
            Violation::PastStart { .. } => ViolationKind::PastStart,
            Violation::NotFound { .. } => ViolationKind::NotFound,
            Violation::SequenceViolation(_) => ViolationKind::SequenceViolation,
            Violation::MachineConflict { .. } => ViolationKind::MachineConflict,
        }
    }

    /// Machine-readable payload. Instants are ISO-8601 strings.
    pub fn details(&self) -> Value {
        match self {
            Violation::InvalidInterval { start, end } => json!({
                "start": format_instant(*start),
                "end": format_instant(*end),
            }),
            Violation::PastStart { start, now } => json!({
                "start": format_instant(*start),
                "now": format_instant(*now),
            }),
            Violation::NotFound { work_order_id } => json!({ "workOrderId": work_order_id }),
            Violation::SequenceViolation(SequenceBreach::Predecessor {
                operation_id,
                name,
                index,
                end,
            }) => json!({
                "prevOperationId": operation_id,
                "prevName": name,
                "prevIndex": index,
                "prevEnd": format_instant(*end),
            }),
            Violation::SequenceViolation(SequenceBreach::Successor {
                operation_id,
                name,
                index,
                start,
            }) => json!({
                "nextOperationId": operation_id,
                "nextName": name,
                "nextIndex": index,
                "nextStart": format_instant(*start),
            }),
            Violation::MachineConflict {
                machine_id,
                conflict,
            } => json!({
                "machineId": machine_id,
                "conflictWith": conflict.operation_id,
                "conflict": conflict,
            }),
        }
    }
}

/// The read set a single update is judged against.
#[derive(Debug, Clone, Copy)]
pub struct UpdateSnapshot<'a> {
    pub predecessor: Option<&'a Operation>,
    pub successor: Option<&'a Operation>,
    /// Operations on the target machine. The operation being moved is skipped by id.
    pub machine_operations: &'a [Operation],
    pub work_order_exists: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AcceptedUpdate {
    pub operation_id: OperationId,
    pub span: Span,
}

/// Decide whether `op` may move to `[new_start, new_end)`.
///
/// Checks run in a fixed order and stop at the first failure: interval
/// sanity, not in the past, owning work order present, predecessor end,
/// successor start, then machine exclusivity. Nothing is mutated, so this
/// is safe to call speculatively.
pub fn validate_update(
    op: &Operation,
    new_start: Ms,
    new_end: Ms,
    snapshot: &UpdateSnapshot<'_>,
    now: Ms,
) -> Result<AcceptedUpdate, Violation> {
    let Some(span) = Span::try_new(new_start, new_end) else {
        return Err(Violation::InvalidInterval {
            start: new_start,
            end: new_end,
        });
    };

    if new_start < now {
        return Err(Violation::PastStart {
            start: new_start,
            now,
        });
    }

    if !snapshot.work_order_exists {
        return Err(Violation::NotFound {
            work_order_id: op.work_order_id.clone(),
        });
    }

    if let Some(prev) = snapshot.predecessor
        && new_start < prev.end()
    {
        return Err(Violation::SequenceViolation(SequenceBreach::Predecessor {
            operation_id: prev.id.clone(),
            name: prev.name.clone(),
            index: prev.index,
            end: prev.end(),
        }));
    }

    if let Some(next) = snapshot.successor
        && new_end > next.start()
    {
        return Err(Violation::SequenceViolation(SequenceBreach::Successor {
            operation_id: next.id.clone(),
            name: next.name.clone(),
            index: next.index,
            start: next.start(),
        }));
    }

    if let Some(hit) =
        first_machine_conflict(&op.machine_id, &span, snapshot.machine_operations, Some(&op.id))
    {
        return Err(Violation::MachineConflict {
            machine_id: op.machine_id.clone(),
            conflict: MachineConflict::from(hit),
        });
    }

    Ok(AcceptedUpdate {
        operation_id: op.id.clone(),
        span,
    })
}

/// Boundary shape of a validation decision.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ValidationReport {
    pub accepted: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub kind: Option<ViolationKind>,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<Value>,
}

impl From<&Result<AcceptedUpdate, Violation>> for ValidationReport {
    fn from(result: &Result<AcceptedUpdate, Violation>) -> Self {
        match result {
            Ok(_) => ValidationReport {
                accepted: true,
                kind: None,
                message: "ok".into(),
                details: None,
            },
            Err(violation) => ValidationReport {
                accepted: false,
                kind: Some(violation.kind()),
                message: violation.to_string(),
                details: Some(violation.details()),
            },
        }
    }
}
