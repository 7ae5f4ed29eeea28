use chrono::{Datelike, NaiveDate};
use ulid::Ulid;

use crate::limits::*;
use crate::model::{DateRange, VehicleState};

use super::EngineError;

// ── Availability Algorithm ────────────────────────────────────────
//
// A booking blocks every calendar day from its start through its end date,
// both inclusive (no same-day handover). Availability is therefore day-set
// arithmetic: union the blocked days of slot-holding bookings, subtract
// from the query window, and what remains are the free windows.

/// `start < end`, within the accepted calendar window, no longer than
/// `MAX_RANGE_DAYS`. Runs before any lookup.
pub(crate) fn validate_range(range: &DateRange) -> Result<(), EngineError> {
    if range.start >= range.end {
        return Err(EngineError::InvalidRange);
    }
    if range.start.year() < MIN_VALID_YEAR || range.end.year() > MAX_VALID_YEAR {
        return Err(EngineError::LimitExceeded("date out of accepted window"));
    }
    if range.total_days() > MAX_RANGE_DAYS {
        return Err(EngineError::LimitExceeded("rental too long"));
    }
    Ok(())
}

/// First slot-holding booking clashing with `range`, if any.
/// `exclude` skips one booking id (a booking never conflicts with itself
/// when rescheduled).
pub(crate) fn find_conflict(
    vehicle: &VehicleState,
    range: &DateRange,
    exclude: Option<Ulid>,
) -> Option<Ulid> {
    vehicle
        .overlapping(range)
        .filter(|b| b.status.holds_slot())
        .find(|b| exclude != Some(b.id))
        .map(|b| b.id)
}

fn next_day(d: NaiveDate) -> NaiveDate {
    // Dates are validated to MIN/MAX_VALID_YEAR; saturation only at the
    // NaiveDate bounds, far outside that window.
    d.succ_opt().unwrap_or(d)
}

fn prev_day(d: NaiveDate) -> NaiveDate {
    d.pred_opt().unwrap_or(d)
}

/// Merge sorted inclusive day-ranges, joining adjacent ones (a range ending
/// the day before another starts leaves no free day between them).
pub fn merge_blocked(sorted: &[DateRange]) -> Vec<DateRange> {
    let mut merged: Vec<DateRange> = Vec::new();
    for &range in sorted {
        if let Some(last) = merged.last_mut()
            && range.start <= next_day(last.end) {
                last.end = last.end.max(range.end);
                continue;
            }
        merged.push(range);
    }
    merged
}

/// Subtract merged blocked day-ranges from the query window, returning the
/// free windows (inclusive day-ranges) in order.
pub fn subtract_blocked(query: &DateRange, blocked: &[DateRange]) -> Vec<DateRange> {
    let mut free = Vec::new();
    let mut cursor = query.start;

    for b in blocked {
        if b.end < query.start || b.start > query.end {
            continue;
        }
        if b.start > cursor {
            free.push(DateRange {
                start: cursor,
                end: prev_day(b.start),
            });
        }
        cursor = cursor.max(next_day(b.end));
        if cursor > query.end {
            break;
        }
    }

    if cursor <= query.end {
        free.push(DateRange {
            start: cursor,
            end: query.end,
        });
    }

    free
}

/// Free windows of `vehicle` inside `query`: blocked days of slot-holding
/// bookings are merged and subtracted, and windows too short to host a
/// one-day rental (pick-up and return on distinct days) are dropped.
pub fn free_windows(vehicle: &VehicleState, query: &DateRange) -> Vec<DateRange> {
    let mut blocked: Vec<DateRange> = vehicle
        .overlapping(query)
        .filter(|b| b.status.holds_slot())
        .map(|b| b.range)
        .collect();
    blocked.sort_by_key(|r| r.start);
    let merged = merge_blocked(&blocked);

    subtract_blocked(query, &merged)
        .into_iter()
        .filter(|w| w.start < w.end)
        .collect()
}
