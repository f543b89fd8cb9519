use crate::limits::MAX_VALID_TIMESTAMP_MS;
use crate::model::*;

/// Inputs to an earliest-fit search on one machine.
#[derive(Debug, Clone, Copy)]
pub struct SlotQuery<'a> {
    pub machine_id: &'a str,
    pub duration: Ms,
    pub preferred_start: Ms,
    pub now: Ms,
    /// End of the operation at `index - 1`, when searching on behalf of a chained operation.
    pub predecessor_end: Option<Ms>,
    /// Start of the operation at `index + 1`.
    pub successor_start: Option<Ms>,
    /// Booking to ignore, normally the operation being moved.
    pub exclude: Option<&'a str>,
}

/// Earliest start `>= max(now, preferred_start, predecessor_end)` where
/// `[start, start + duration)` is free on the machine and ends no later than
/// `successor_start` or the last representable instant.
///
/// Single pass over the machine's bookings in start order. The cursor only
/// moves forward, so a gap before an already-skipped booking is never
/// reconsidered. `None` means no feasible window exists.
pub fn find_valid_slot(query: &SlotQuery<'_>, machine_operations: &[Operation]) -> Option<Ms> {
    if query.duration <= 0 {
        return None;
    }

    let mut earliest = query.now.max(query.preferred_start);
    if let Some(pred_end) = query.predecessor_end {
        earliest = earliest.max(pred_end);
    }
    let latest_end = query
        .successor_start
        .map_or(MAX_VALID_TIMESTAMP_MS, |start| start.min(MAX_VALID_TIMESTAMP_MS));

    if earliest.saturating_add(query.duration) > latest_end {
        return None;
    }

    let mut bookings: Vec<&Span> = machine_operations
        .iter()
        .filter(|op| op.machine_id == query.machine_id)
        .filter(|op| query.exclude != Some(op.id.as_str()))
        .map(|op| &op.span)
        .collect();
    bookings.sort_by_key(|span| span.start);

    let mut cursor = earliest;
    for booking in bookings {
        if cursor.saturating_add(query.duration) <= booking.start {
            return Some(cursor);
        }
        if cursor < booking.end {
            cursor = booking.end;
        }
        if cursor.saturating_add(query.duration) > latest_end {
            return None;
        }
    }

    (cursor.saturating_add(query.duration) <= latest_end).then_some(cursor)
}
