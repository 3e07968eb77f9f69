use crate::model::*;

use super::EngineError;

pub(crate) fn now_ms() -> Ms {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap()
        .as_millis() as Ms
}

pub(crate) fn validate_booking_span(padded: &Span) -> Result<(), EngineError> {
    use crate::limits::*;
    if padded.start < MIN_VALID_TIMESTAMP_MS || padded.end > MAX_VALID_TIMESTAMP_MS {
        return Err(EngineError::LimitExceeded("timestamp out of range"));
    }
    if padded.duration_ms() > MAX_BOOKING_DURATION_MS {
        return Err(EngineError::LimitExceeded("booking span too wide"));
    }
    Ok(())
}

pub(crate) fn validate_time_off_span(span: &Span) -> Result<(), EngineError> {
    use crate::limits::*;
    if span.start < MIN_VALID_TIMESTAMP_MS || span.end > MAX_VALID_TIMESTAMP_MS {
        return Err(EngineError::LimitExceeded("timestamp out of range"));
    }
    if span.duration_ms() > MAX_TIME_OFF_DURATION_MS {
        return Err(EngineError::LimitExceeded("time off span too wide"));
    }
    Ok(())
}

pub(crate) fn validate_transition(
    from: BookingStatus,
    to: BookingStatus,
) -> Result<(), EngineError> {
    if from.can_transition_to(to) {
        Ok(())
    } else {
        Err(EngineError::InvalidTransition { from, to })
    }
}

/// Reject `padded` if it collides with the schedule's blocking entries.
///
/// Entries are compared padded-to-padded: each side's buffers are already
/// baked into the stored `padded` span, so a booking ending at T with a
/// 10-minute after-buffer blocks candidates until T+10, while a candidate
/// starting exactly at a padded end does not collide (half-open intervals).
///
/// `capacity` 1 is the fast path; above 1 only the sweep-line saturated
/// ranges block (staff-less pools with `max_concurrent` > 1).
pub(crate) fn check_no_conflict(
    schedule: &ScheduleState,
    padded: &Span,
    capacity: u32,
) -> Result<(), EngineError> {
    if capacity <= 1 {
        for entry in schedule.overlapping(padded) {
            if entry.blocks() {
                return Err(EngineError::Conflict(entry.id));
            }
        }
        return Ok(());
    }

    // Time off is absolute regardless of capacity.
    for entry in schedule.overlapping(padded) {
        if matches!(entry.kind, EntryKind::TimeOff) {
            return Err(EngineError::Conflict(entry.id));
        }
    }

    let allocs = blocking_booking_spans(schedule, padded);
    let saturated = compute_saturated_spans(&allocs, capacity);
    for sat in &saturated {
        if sat.overlaps(padded) {
            return Err(EngineError::CapacityExceeded(capacity));
        }
    }
    Ok(())
}

/// Padded spans of blocking bookings overlapping the query, sorted by start.
fn blocking_booking_spans(schedule: &ScheduleState, query: &Span) -> Vec<Span> {
    let mut spans: Vec<Span> = schedule
        .overlapping(query)
        .filter(|e| e.is_booking() && e.blocks())
        .map(|e| e.padded)
        .collect();
    spans.sort_by_key(|s| s.start);
    spans
}

/// Sweep-line algorithm: find time ranges where allocation count >= capacity.
/// Returns sorted, merged spans representing fully-saturated time ranges.
pub fn compute_saturated_spans(allocs: &[Span], capacity: u32) -> Vec<Span> {
    if allocs.is_empty() || capacity == 0 {
        return Vec::new();
    }
    if capacity == 1 {
        return super::slots::merge_overlapping(allocs);
    }

    // Build sweep-line events: +1 at start, -1 at end
    let mut events: Vec<(Ms, i32)> = Vec::with_capacity(allocs.len() * 2);
    for a in allocs {
        events.push((a.start, 1));
        events.push((a.end, -1));
    }
    events.sort_by(|a, b| a.0.cmp(&b.0).then(a.1.cmp(&b.1)));

    let mut result = Vec::new();
    let mut count: u32 = 0;
    let mut saturated_start: Option<Ms> = None;

    for (time, delta) in &events {
        if *delta > 0 {
            count += *delta as u32;
        } else {
            count -= (-*delta) as u32;
        }

        if count >= capacity && saturated_start.is_none() {
            saturated_start = Some(*time);
        } else if count < capacity
            && let Some(start) = saturated_start.take()
            && *time > start
        {
            result.push(Span::new(start, *time));
        }
    }

    result
}
