use serde::Serialize;

use crate::model::*;

use super::sequence::check_sequence;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FloorConflictKind {
    MachineOverlap,
    SequenceViolation,
}

impl FloorConflictKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            FloorConflictKind::MachineOverlap => "machine_overlap",
            FloorConflictKind::SequenceViolation => "sequence_violation",
        }
    }
}

/// A broken invariant found in stored data.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FloorConflict {
    pub operation_id: OperationId,
    pub conflict_with: OperationId,
    pub kind: FloorConflictKind,
}

/// Every overlapping pair on one machine. The earlier-starting operation is
/// reported as `operation_id`.
pub fn lane_overlaps(operations: &[Operation]) -> Vec<FloorConflict> {
    let mut sorted: Vec<&Operation> = operations.iter().collect();
    sorted.sort_by(|a, b| a.start().cmp(&b.start()).then_with(|| a.id.cmp(&b.id)));

    let mut found = Vec::new();
    for (i, first) in sorted.iter().enumerate() {
        for second in &sorted[i + 1..] {
            // sorted by start: nothing further along can reach back into `first`
            if second.start() >= first.end() {
                break;
            }
            found.push(FloorConflict {
                operation_id: first.id.clone(),
                conflict_with: second.id.clone(),
                kind: FloorConflictKind::MachineOverlap,
            });
        }
    }
    found
}

/// Whole-floor consistency scan: machine overlaps per lane, then chain
/// breaks per work order. Imported data is never rule-checked, so this is
/// where bad seeds surface.
pub fn audit_floor<'a>(
    lanes: impl IntoIterator<Item = &'a [Operation]>,
    work_orders: impl IntoIterator<Item = &'a [Operation]>,
) -> Vec<FloorConflict> {
    let mut found: Vec<FloorConflict> = lanes.into_iter().flat_map(lane_overlaps).collect();

    for chain in work_orders {
        let report = check_sequence(chain);
        found.extend(report.violations.into_iter().map(|v| FloorConflict {
            operation_id: v.next_op,
            conflict_with: v.current_op,
            kind: FloorConflictKind::SequenceViolation,
        }));
    }
    found
}

#[cfg(test)]
mod tests {
    use super::*;

    fn op(id: &str, wo: &str, index: u32, start: Ms, end: Ms) -> Operation {
        Operation {
            id: id.into(),
            work_order_id: wo.into(),
            index,
            machine_id: "M1".into(),
            name: id.into(),
            span: Span::new(start, end),
        }
    }

    #[test]
    fn clean_lane_has_no_overlaps() {
        let lane = vec![op("A", "W1", 0, 0, 10), op("B", "W2", 0, 10, 20), op("C", "W3", 0, 25, 30)];
        assert!(lane_overlaps(&lane).is_empty());
    }

    #[test]
    fn finds_every_overlapping_pair() {
        let lane = vec![
            op("long", "W1", 0, 0, 100),
            op("mid", "W2", 0, 10, 20),
            op("tail", "W3", 0, 50, 120),
            op("after", "W4", 0, 120, 130),
        ];
        let pairs: Vec<_> = lane_overlaps(&lane)
            .into_iter()
            .map(|c| (c.operation_id, c.conflict_with))
            .collect();
        assert_eq!(
            pairs,
            [
                ("long".to_string(), "mid".to_string()),
                ("long".to_string(), "tail".to_string()),
            ]
        );
    }

    #[test]
    fn floor_combines_both_kinds() {
        let lane = vec![op("A", "W1", 0, 0, 10), op("X", "W2", 0, 5, 15)];
        let chain = vec![op("A", "W1", 0, 0, 10), op("B", "W1", 1, 8, 20)];
        let found = audit_floor([lane.as_slice()], [chain.as_slice()]);
        assert_eq!(found.len(), 2);
        assert_eq!(found[0].kind, FloorConflictKind::MachineOverlap);
        assert_eq!(found[1].kind, FloorConflictKind::SequenceViolation);
        assert_eq!(found[1].operation_id, "B");
        assert_eq!(found[1].conflict_with, "A");

        let json = serde_json::to_value(&found[1]).unwrap();
        assert_eq!(json["kind"], "sequence_violation");
        assert_eq!(json["conflictWith"], "A");
    }
}
