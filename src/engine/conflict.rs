use crate::limits::*;
use crate::model::*;

use super::EngineError;

pub(crate) fn now_ms() -> Ms {
    chrono::Utc::now().timestamp_millis()
}

/// Reject instants outside the supported range. Interval ordering is left to the validator.
pub(crate) fn validate_instants(start: Ms, end: Ms) -> Result<(), EngineError> {
    if start < MIN_VALID_TIMESTAMP_MS
        || end < MIN_VALID_TIMESTAMP_MS
        || start > MAX_VALID_TIMESTAMP_MS
        || end > MAX_VALID_TIMESTAMP_MS
    {
        return Err(EngineError::LimitExceeded("timestamp out of range"));
    }
    if end - start > MAX_SPAN_DURATION_MS {
        return Err(EngineError::LimitExceeded("span too wide"));
    }
    Ok(())
}

/// Every operation on `machine_id` other than `exclude` whose span overlaps
/// `candidate`, ordered by start (ties by id).
pub fn machine_conflicts(
    machine_id: &str,
    candidate: &Span,
    operations: &[Operation],
    exclude: Option<&str>,
) -> Vec<MachineConflict> {
    let mut conflicts: Vec<MachineConflict> = operations
        .iter()
        .filter(|op| is_sibling(op, machine_id, exclude))
        .filter(|op| op.span.overlaps(candidate))
        .map(MachineConflict::from)
        .collect();
    conflicts.sort_by(|a, b| {
        a.start
            .cmp(&b.start)
            .then_with(|| a.operation_id.cmp(&b.operation_id))
    });
    conflicts
}

/// The earliest-starting conflict for `candidate`, if any.
pub fn first_machine_conflict<'a>(
    machine_id: &str,
    candidate: &Span,
    operations: &'a [Operation],
    exclude: Option<&str>,
) -> Option<&'a Operation> {
    operations
        .iter()
        .filter(|op| is_sibling(op, machine_id, exclude))
        .filter(|op| op.span.overlaps(candidate))
        .min_by(|a, b| a.span.start.cmp(&b.span.start).then_with(|| a.id.cmp(&b.id)))
}

fn is_sibling(op: &Operation, machine_id: &str, exclude: Option<&str>) -> bool {
    op.machine_id == machine_id && exclude != Some(op.id.as_str())
}

#[cfg(test)]
mod tests {
    use super::*;

    const H: Ms = HOUR_MS;

    fn op(id: &str, wo: &str, machine: &str, start: Ms, end: Ms) -> Operation {
        Operation {
            id: id.into(),
            work_order_id: wo.into(),
            index: 0,
            machine_id: machine.into(),
            name: format!("{id} name"),
            span: Span::new(start, end),
        }
    }

    #[test]
    fn reports_overlapping_operation_with_identity() {
        let ops = vec![op("O2", "W2", "M1", 9 * H, 10 * H)];
        let conflicts = machine_conflicts("M1", &Span::new(9 * H + H / 2, 10 * H + H / 2), &ops, None);
        assert_eq!(conflicts.len(), 1);
        assert_eq!(conflicts[0].operation_id, "O2");
        assert_eq!(conflicts[0].work_order_id, "W2");
        assert_eq!(conflicts[0].name, "O2 name");
        assert_eq!(conflicts[0].start, 9 * H);
        assert_eq!(conflicts[0].end, 10 * H);
    }

    #[test]
    fn ignores_other_machines() {
        let ops = vec![op("O1", "W1", "M2", 0, 10 * H)];
        assert!(machine_conflicts("M1", &Span::new(H, 2 * H), &ops, None).is_empty());
    }

    #[test]
    fn excludes_moving_operation() {
        let ops = vec![op("O1", "W1", "M1", 0, 2 * H), op("O2", "W1", "M1", 3 * H, 4 * H)];
        let conflicts = machine_conflicts("M1", &Span::new(H, 5 * H), &ops, Some("O1"));
        let ids: Vec<_> = conflicts.iter().map(|c| c.operation_id.as_str()).collect();
        assert_eq!(ids, ["O2"]);
    }

    #[test]
    fn touching_intervals_are_free() {
        let ops = vec![op("A", "W1", "M1", 0, H), op("B", "W1", "M1", 2 * H, 3 * H)];
        assert!(machine_conflicts("M1", &Span::new(H, 2 * H), &ops, None).is_empty());
        assert!(first_machine_conflict("M1", &Span::new(H, 2 * H), &ops, None).is_none());
    }

    #[test]
    fn results_sorted_by_start() {
        let ops = vec![
            op("late", "W1", "M1", 5 * H, 6 * H),
            op("early", "W2", "M1", H, 2 * H),
            op("mid", "W3", "M1", 3 * H, 4 * H),
        ];
        let conflicts = machine_conflicts("M1", &Span::new(0, 10 * H), &ops, None);
        let ids: Vec<_> = conflicts.iter().map(|c| c.operation_id.as_str()).collect();
        assert_eq!(ids, ["early", "mid", "late"]);

        let first = first_machine_conflict("M1", &Span::new(0, 10 * H), &ops, None).unwrap();
        assert_eq!(first.id, "early");
    }

    #[test]
    fn instant_limits() {
        assert!(validate_instants(0, H).is_ok());
        assert!(matches!(
            validate_instants(-1, H),
            Err(EngineError::LimitExceeded("timestamp out of range"))
        ));
        assert!(matches!(
            validate_instants(0, MAX_VALID_TIMESTAMP_MS + 1),
            Err(EngineError::LimitExceeded("timestamp out of range"))
        ));
        assert!(matches!(
            validate_instants(0, MAX_SPAN_DURATION_MS + 1),
            Err(EngineError::LimitExceeded("span too wide"))
        ));
        // inverted spans pass: ordering is the validator's call
        assert!(validate_instants(2 * H, H).is_ok());
    }
}
