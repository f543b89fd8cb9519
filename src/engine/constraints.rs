use serde::Serialize;

use crate::model::*;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PrevOperation {
    pub id: OperationId,
    pub name: String,
    #[serde(with = "iso_instant")]
    pub end: Ms,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NextOperation {
    pub id: OperationId,
    pub name: String,
    #[serde(with = "iso_instant")]
    pub start: Ms,
}

/// Everything a caller needs to place one operation by hand.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConstraintsBundle {
    pub operation_id: OperationId,
    pub work_order_id: WorkOrderId,
    pub machine_id: MachineId,
    pub index: u32,
    #[serde(with = "iso_instant")]
    pub min_start: Ms,
    #[serde(with = "iso_instant_opt", skip_serializing_if = "Option::is_none")]
    pub max_end: Option<Ms>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub prev_operation: Option<PrevOperation>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub next_operation: Option<NextOperation>,
    /// Every other operation on the machine, regardless of time.
    pub machine_conflicts: Vec<MachineConflict>,
}

pub fn constraints_for(
    op: &Operation,
    predecessor: Option<&Operation>,
    successor: Option<&Operation>,
    machine_operations: &[Operation],
    now: Ms,
) -> ConstraintsBundle {
    let min_start = predecessor.map_or(now, |prev| now.max(prev.end()));

    let mut machine_conflicts: Vec<MachineConflict> = machine_operations
        .iter()
        .filter(|other| other.machine_id == op.machine_id && other.id != op.id)
        .map(MachineConflict::from)
        .collect();
    machine_conflicts.sort_by(|a, b| {
        a.start
            .cmp(&b.start)
            .then_with(|| a.operation_id.cmp(&b.operation_id))
    });

    ConstraintsBundle {
        operation_id: op.id.clone(),
        work_order_id: op.work_order_id.clone(),
        machine_id: op.machine_id.clone(),
        index: op.index,
        min_start,
        max_end: successor.map(|next| next.start()),
        prev_operation: predecessor.map(|prev| PrevOperation {
            id: prev.id.clone(),
            name: prev.name.clone(),
            end: prev.end(),
        }),
        next_operation: successor.map(|next| NextOperation {
            id: next.id.clone(),
            name: next.name.clone(),
            start: next.start(),
        }),
        machine_conflicts,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const H: Ms = HOUR_MS;
    // 2030-01-01T00:00:00Z
    const DAY: Ms = 1_893_456_000_000;

    fn op(id: &str, index: u32, machine: &str, start: Ms, end: Ms) -> Operation {
        Operation {
            id: id.into(),
            work_order_id: "W1".into(),
            index,
            machine_id: machine.into(),
            name: format!("{id}-name"),
            span: Span::new(start, end),
        }
    }

    #[test]
    fn chained_operation_bundle() {
        let prev = op("O1", 0, "M1", DAY + H, DAY + 3 * H);
        let me = op("O2", 1, "M2", DAY + 3 * H, DAY + 4 * H);
        let next = op("O3", 2, "M1", DAY + 6 * H, DAY + 7 * H);
        let lane = vec![
            op("far", 0, "M2", DAY + 100 * H, DAY + 101 * H),
            me.clone(),
            op("near", 0, "M2", DAY, DAY + H),
        ];

        let bundle = constraints_for(&me, Some(&prev), Some(&next), &lane, DAY);
        assert_eq!(bundle.min_start, DAY + 3 * H);
        assert_eq!(bundle.max_end, Some(DAY + 6 * H));
        assert_eq!(bundle.prev_operation.as_ref().unwrap().id, "O1");
        assert_eq!(bundle.next_operation.as_ref().unwrap().start, DAY + 6 * H);
        let ids: Vec<_> = bundle
            .machine_conflicts
            .iter()
            .map(|c| c.operation_id.as_str())
            .collect();
        assert_eq!(ids, ["near", "far"]);
    }

    #[test]
    fn now_wins_over_stale_predecessor() {
        let prev = op("O1", 0, "M1", DAY - 5 * H, DAY - 4 * H);
        let me = op("O2", 1, "M1", DAY + H, DAY + 2 * H);
        let bundle = constraints_for(&me, Some(&prev), None, &[], DAY);
        assert_eq!(bundle.min_start, DAY);
        assert!(bundle.max_end.is_none());
    }

    #[test]
    fn lone_operation_serializes_without_neighbors() {
        let me = op("O1", 0, "M1", DAY + H, DAY + 2 * H);
        let bundle = constraints_for(&me, None, None, std::slice::from_ref(&me), DAY);
        let json = serde_json::to_value(&bundle).unwrap();
        assert_eq!(json["operationId"], "O1");
        assert_eq!(json["minStart"], "2030-01-01T00:00:00Z");
        assert!(json.get("maxEnd").is_none());
        assert!(json.get("prevOperation").is_none());
        assert!(json.get("nextOperation").is_none());
        assert_eq!(json["machineConflicts"], serde_json::json!([]));
    }
}
