use crate::model::*;

// ── Slot Generator ────────────────────────────────────────────────

/// Generate candidate slots for one day.
///
/// For each open window, candidate footprints (buffer_before + duration +
/// buffer_after) start at `window.start + k * granularity`; a candidate is
/// kept while its full footprint fits inside the window. The returned span
/// is the customer-visible interval — buffers are reserved but not shown
/// as bookable time.
///
/// Candidates whose visible start lies before `now` are dropped. Output is
/// ascending by start; a closed day or a too-short window yields nothing.
pub fn generate_slots(windows: &[Span], service: &Service, granularity: Ms, now: Ms) -> Vec<Span> {
    debug_assert!(granularity > 0, "granularity must be positive");
    let footprint = service.padded_len();
    let mut slots = Vec::new();

    let mut merged = windows.to_vec();
    merged.sort_by_key(|w| w.start);
    let merged = merge_overlapping(&merged);

    for window in &merged {
        if window.duration_ms() < service.duration {
            continue;
        }
        let mut anchor = window.start;
        while anchor + footprint <= window.end {
            let visible_start = anchor + service.buffer_before;
            if visible_start >= now {
                slots.push(Span::new(visible_start, visible_start + service.duration));
            }
            anchor += granularity;
        }
    }

    slots
}

/// Merge sorted overlapping/adjacent intervals into disjoint intervals.
pub fn merge_overlapping(sorted: &[Span]) -> Vec<Span> {
    let mut merged: Vec<Span> = Vec::new();
    for &span in sorted {
        if let Some(last) = merged.last_mut()
            && span.start <= last.end
        {
            last.end = last.end.max(span.end);
            continue;
        }
        merged.push(span);
    }
    merged
}

/// Subtract `to_remove` from `base`. Both inputs sorted by start.
pub fn subtract_intervals(base: &[Span], to_remove: &[Span]) -> Vec<Span> {
    let mut result = Vec::new();
    let mut ri = 0;

    for &b in base {
        let mut current_start = b.start;
        let current_end = b.end;

        while ri < to_remove.len() && to_remove[ri].end <= current_start {
            ri += 1;
        }

        let mut j = ri;
        while j < to_remove.len() && to_remove[j].start < current_end {
            let r = &to_remove[j];
            if r.start > current_start {
                result.push(Span::new(current_start, r.start));
            }
            current_start = current_start.max(r.end);
            j += 1;
        }

        if current_start < current_end {
            result.push(Span::new(current_start, current_end));
        }
    }

    result
}

/// Intersect two sorted disjoint interval lists (two-pointer sweep).
/// Used to bound staff working hours by tenant business hours.
pub fn intersect_intervals(a: &[Span], b: &[Span]) -> Vec<Span> {
    let mut result = Vec::new();
    let (mut i, mut j) = (0, 0);

    while i < a.len() && j < b.len() {
        let start = a[i].start.max(b[j].start);
        let end = a[i].end.min(b[j].end);
        if start < end {
            result.push(Span::new(start, end));
        }
        if a[i].end <= b[j].end {
            i += 1;
        } else {
            j += 1;
        }
    }

    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use ulid::Ulid;

    const H: Ms = 3_600_000;
    const M: Ms = 60_000;

    fn service(duration: Ms, before: Ms, after: Ms) -> Service {
        Service {
            id: Ulid::new(),
            name: None,
            duration,
            buffer_before: before,
            buffer_after: after,
            home_visit: false,
            max_concurrent: 1,
            active: true,
        }
    }

    // ── generate_slots ────────────────────────────────────

    #[test]
    fn slots_fill_window_at_granularity() {
        let windows = vec![Span::new(9 * H, 12 * H)];
        let svc = service(30 * M, 0, 0);
        let slots = generate_slots(&windows, &svc, 30 * M, 0);
        // 09:00, 09:30, ..., 11:30 — six candidates
        assert_eq!(slots.len(), 6);
        assert_eq!(slots[0], Span::new(9 * H, 9 * H + 30 * M));
        assert_eq!(slots[5], Span::new(11 * H + 30 * M, 12 * H));
    }

    #[test]
    fn slots_deterministic_and_ascending() {
        let windows = vec![Span::new(9 * H, 17 * H)];
        let svc = service(45 * M, 5 * M, 10 * M);
        let a = generate_slots(&windows, &svc, 15 * M, 0);
        let b = generate_slots(&windows, &svc, 15 * M, 0);
        assert_eq!(a, b);
        assert!(a.windows(2).all(|w| w[0].start < w[1].start));
    }

    #[test]
    fn slots_respect_buffers_in_footprint() {
        // 60-min window, 30-min service with 20 min of buffer: only the
        // first anchor fits (30+20=50 <= 60), the next (at +30) does not.
        let windows = vec![Span::new(9 * H, 10 * H)];
        let svc = service(30 * M, 10 * M, 10 * M);
        let slots = generate_slots(&windows, &svc, 30 * M, 0);
        assert_eq!(slots.len(), 1);
        // Visible slot starts after the leading buffer
        assert_eq!(slots[0], Span::new(9 * H + 10 * M, 9 * H + 40 * M));
    }

    #[test]
    fn window_shorter_than_duration_is_empty() {
        let windows = vec![Span::new(9 * H, 9 * H + 20 * M)];
        let svc = service(30 * M, 0, 0);
        assert!(generate_slots(&windows, &svc, 15 * M, 0).is_empty());
    }

    #[test]
    fn closed_day_is_empty_not_error() {
        let svc = service(30 * M, 0, 0);
        assert!(generate_slots(&[], &svc, 15 * M, 0).is_empty());
    }

    #[test]
    fn past_slots_excluded() {
        let windows = vec![Span::new(9 * H, 12 * H)];
        let svc = service(30 * M, 0, 0);
        // "now" is 10:15 — slots at 9:00, 9:30, ..., 10:00 are gone
        let slots = generate_slots(&windows, &svc, 30 * M, 10 * H + 15 * M);
        assert_eq!(slots.first().map(|s| s.start), Some(10 * H + 30 * M));
        assert_eq!(slots.len(), 3);
    }

    #[test]
    fn multiple_windows_all_covered() {
        let windows = vec![Span::new(9 * H, 11 * H), Span::new(14 * H, 16 * H)];
        let svc = service(60 * M, 0, 0);
        let slots = generate_slots(&windows, &svc, 60 * M, 0);
        assert_eq!(
            slots,
            vec![
                Span::new(9 * H, 10 * H),
                Span::new(10 * H, 11 * H),
                Span::new(14 * H, 15 * H),
                Span::new(15 * H, 16 * H),
            ]
        );
    }

    #[test]
    fn unsorted_windows_are_normalized() {
        let windows = vec![Span::new(14 * H, 16 * H), Span::new(9 * H, 11 * H)];
        let svc = service(60 * M, 0, 0);
        let slots = generate_slots(&windows, &svc, 60 * M, 0);
        assert_eq!(slots.first().map(|s| s.start), Some(9 * H));
    }

    // ── subtract_intervals ────────────────────────────────

    #[test]
    fn subtract_no_overlap() {
        let base = vec![Span::new(100, 200), Span::new(300, 400)];
        let remove = vec![Span::new(200, 300)];
        let result = subtract_intervals(&base, &remove);
        assert_eq!(result, base);
    }

    #[test]
    fn subtract_full_overlap() {
        let base = vec![Span::new(100, 200)];
        let remove = vec![Span::new(50, 250)];
        let result = subtract_intervals(&base, &remove);
        assert!(result.is_empty());
    }

    #[test]
    fn subtract_partial_left() {
        let base = vec![Span::new(100, 200)];
        let remove = vec![Span::new(50, 150)];
        let result = subtract_intervals(&base, &remove);
        assert_eq!(result, vec![Span::new(150, 200)]);
    }

    #[test]
    fn subtract_middle_punch() {
        let base = vec![Span::new(100, 300)];
        let remove = vec![Span::new(150, 200)];
        let result = subtract_intervals(&base, &remove);
        assert_eq!(result, vec![Span::new(100, 150), Span::new(200, 300)]);
    }

    #[test]
    fn subtract_multiple_punches() {
        let base = vec![Span::new(0, 1000)];
        let remove = vec![Span::new(100, 200), Span::new(400, 500), Span::new(800, 900)];
        let result = subtract_intervals(&base, &remove);
        assert_eq!(
            result,
            vec![
                Span::new(0, 100),
                Span::new(200, 400),
                Span::new(500, 800),
                Span::new(900, 1000),
            ]
        );
    }

    // ── merge_overlapping ────────────────────────────────

    #[test]
    fn merge_overlapping_basic() {
        let spans = vec![Span::new(100, 300), Span::new(200, 400), Span::new(500, 600)];
        let merged = merge_overlapping(&spans);
        assert_eq!(merged, vec![Span::new(100, 400), Span::new(500, 600)]);
    }

    #[test]
    fn merge_overlapping_adjacent() {
        let spans = vec![Span::new(100, 200), Span::new(200, 300)];
        let merged = merge_overlapping(&spans);
        assert_eq!(merged, vec![Span::new(100, 300)]);
    }

    // ── intersect_intervals ──────────────────────────────

    #[test]
    fn intersect_basic() {
        let a = vec![Span::new(9 * H, 17 * H)];
        let b = vec![Span::new(10 * H, 14 * H)];
        assert_eq!(intersect_intervals(&a, &b), vec![Span::new(10 * H, 14 * H)]);
    }

    #[test]
    fn intersect_disjoint() {
        let a = vec![Span::new(9 * H, 10 * H)];
        let b = vec![Span::new(11 * H, 12 * H)];
        assert!(intersect_intervals(&a, &b).is_empty());
    }

    #[test]
    fn intersect_multiple_fragments() {
        let a = vec![Span::new(0, 100), Span::new(200, 300)];
        let b = vec![Span::new(50, 250)];
        assert_eq!(
            intersect_intervals(&a, &b),
            vec![Span::new(50, 100), Span::new(200, 250)]
        );
    }

    #[test]
    fn intersect_adjacent_is_empty() {
        let a = vec![Span::new(0, 100)];
        let b = vec![Span::new(100, 200)];
        assert!(intersect_intervals(&a, &b).is_empty());
    }
}
