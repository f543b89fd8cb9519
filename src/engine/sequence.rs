use serde::Serialize;

use crate::model::*;

/// An adjacent pair in a work order whose intervals are out of order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ChainViolation {
    pub current_op: OperationId,
    pub next_op: OperationId,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SequenceReport {
    pub is_valid: bool,
    pub violations: Vec<ChainViolation>,
}

/// Whole-chain integrity check over an index-ordered operation list.
///
/// Every adjacent pair where the earlier operation ends after the later one
/// starts is reported. Read-only; the update path checks only immediate
/// neighbors and never calls this.
pub fn check_sequence(operations: &[Operation]) -> SequenceReport {
    let violations: Vec<ChainViolation> = operations
        .windows(2)
        .filter(|pair| pair[0].end() > pair[1].start())
        .map(|pair| {
            let (current, next) = (&pair[0], &pair[1]);
            ChainViolation {
                current_op: current.id.clone(),
                next_op: next.id.clone(),
                message: format!(
                    "{} (idx {}) ends at {} after {} (idx {}) starts at {}",
                    current.name,
                    current.index,
                    format_instant(current.end()),
                    next.name,
                    next.index,
                    format_instant(next.start()),
                ),
            }
        })
        .collect();

    SequenceReport {
        is_valid: violations.is_empty(),
        violations,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const H: Ms = HOUR_MS;

    fn op(id: &str, index: u32, start: Ms, end: Ms) -> Operation {
        Operation {
            id: id.into(),
            work_order_id: "W1".into(),
            index,
            machine_id: format!("M{index}"),
            name: id.to_lowercase(),
            span: Span::new(start, end),
        }
    }

    #[test]
    fn ordered_chain_is_valid() {
        let ops = vec![op("O1", 0, 0, H), op("O2", 1, H, 2 * H), op("O3", 2, 3 * H, 4 * H)];
        let report = check_sequence(&ops);
        assert!(report.is_valid);
        assert!(report.violations.is_empty());
    }

    #[test]
    fn empty_and_single_are_valid() {
        assert!(check_sequence(&[]).is_valid);
        assert!(check_sequence(&[op("O1", 0, 0, H)]).is_valid);
    }

    #[test]
    fn reports_every_broken_pair() {
        let ops = vec![
            op("O1", 0, 0, 2 * H),
            op("O2", 1, H, 3 * H),     // starts before O1 ends
            op("O3", 2, 3 * H, 4 * H), // fine
            op("O4", 3, 2 * H, 5 * H), // starts before O3 ends
        ];
        let report = check_sequence(&ops);
        assert!(!report.is_valid);
        let pairs: Vec<_> = report
            .violations
            .iter()
            .map(|v| (v.current_op.as_str(), v.next_op.as_str()))
            .collect();
        assert_eq!(pairs, [("O1", "O2"), ("O3", "O4")]);
        assert!(report.violations[0].message.contains("o1 (idx 0)"));
    }

    #[test]
    fn touching_neighbors_are_valid() {
        let ops = vec![op("O1", 0, 0, H), op("O2", 1, H, 2 * H), op("O3", 2, 2 * H, 3 * H)];
        assert!(check_sequence(&ops).is_valid);
    }

    #[test]
    fn report_serializes_camel_case() {
        let ops = vec![op("O1", 0, 0, 2 * H), op("O2", 1, H, 3 * H)];
        let json = serde_json::to_value(check_sequence(&ops)).unwrap();
        assert_eq!(json["isValid"], false);
        assert_eq!(json["violations"][0]["currentOp"], "O1");
        assert_eq!(json["violations"][0]["nextOp"], "O2");
    }
}
