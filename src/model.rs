use chrono::{Datelike, NaiveDate, NaiveTime};
use serde::{Deserialize, Serialize};
use ulid::Ulid;

/// Unix milliseconds — the only time type.
pub type Ms = i64;

/// Money in integer cents. Surcharges never need sub-cent precision.
pub type Cents = i64;

pub const MINUTE_MS: Ms = 60_000;
pub const DAY_MS: Ms = 86_400_000;

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

    pub fn duration_ms(&self) -> Ms {
        self.end - self.start
    }

    pub fn overlaps(&self, other: &Span) -> bool {
        self.start < other.end && other.start < self.end
    }

    pub fn contains_instant(&self, t: Ms) -> bool {
        self.start <= t && t < self.end
    }

    /// Returns true if `self` fully contains `other`.
    pub fn contains_span(&self, other: &Span) -> bool {
        self.start <= other.start && other.end <= self.end
    }
}

/// One open range within a weekday, in minutes since midnight.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DayRange {
    pub open_min: u16,
    pub close_min: u16,
}

impl DayRange {
    pub fn to_span(&self, day_start: Ms) -> Span {
        Span::new(
            day_start + self.open_min as Ms * MINUTE_MS,
            day_start + self.close_min as Ms * MINUTE_MS,
        )
    }
}

/// Per-weekday open ranges. Index 0 = Monday.
#[derive(Debug, Clone, Default)]
pub struct WeeklyHours {
    days: [Vec<DayRange>; 7],
}

impl WeeklyHours {
    pub fn add_range(&mut self, weekday: usize, range: DayRange) {
        let day = &mut self.days[weekday];
        let pos = day
            .binary_search_by_key(&range.open_min, |r| r.open_min)
            .unwrap_or_else(|e| e);
        day.insert(pos, range);
    }

    pub fn clear_day(&mut self, weekday: usize) {
        self.days[weekday].clear();
    }

    pub fn day(&self, weekday: usize) -> &[DayRange] {
        &self.days[weekday]
    }

    /// True if any weekday has at least one range.
    pub fn is_configured(&self) -> bool {
        self.days.iter().any(|d| !d.is_empty())
    }

    /// Project this weekday pattern onto a concrete UTC date.
    pub fn windows_for(&self, date: NaiveDate) -> Vec<Span> {
        let day_start = date.and_time(NaiveTime::MIN).and_utc().timestamp_millis();
        let weekday = date.weekday().num_days_from_monday() as usize;
        self.days[weekday]
            .iter()
            .filter(|r| r.open_min < r.close_min)
            .map(|r| r.to_span(day_start))
            .collect()
    }
}

/// WGS84 coordinate for home-visit locations and service-area centers.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeoPoint {
    pub lat: f64,
    pub lng: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BookingStatus {
    Pending,
    Confirmed,
    Completed,
    Cancelled,
}

impl BookingStatus {
    /// pending → confirmed → completed; pending|confirmed → cancelled.
    /// Completed and cancelled are terminal.
    pub fn can_transition_to(self, next: BookingStatus) -> bool {
        use BookingStatus::*;
        matches!(
            (self, next),
            (Pending, Confirmed) | (Confirmed, Completed) | (Pending, Cancelled) | (Confirmed, Cancelled)
        )
    }

    /// Only pending and confirmed bookings occupy their interval.
    pub fn blocks(self) -> bool {
        matches!(self, BookingStatus::Pending | BookingStatus::Confirmed)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            BookingStatus::Pending => "pending",
            BookingStatus::Confirmed => "confirmed",
            BookingStatus::Completed => "completed",
            BookingStatus::Cancelled => "cancelled",
        }
    }

    pub fn parse(s: &str) -> Option<BookingStatus> {
        match s {
            "pending" => Some(BookingStatus::Pending),
            "confirmed" => Some(BookingStatus::Confirmed),
            "completed" => Some(BookingStatus::Completed),
            "cancelled" => Some(BookingStatus::Cancelled),
            _ => None,
        }
    }
}

impl std::fmt::Display for BookingStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Bookable service definition. Immutable during a single availability pass.
#[derive(Debug, Clone, PartialEq)]
pub struct Service {
    pub id: Ulid,
    pub name: Option<String>,
    pub duration: Ms,
    pub buffer_before: Ms,
    pub buffer_after: Ms,
    pub home_visit: bool,
    /// Concurrent bookings allowed on the staff-less pool (default 1).
    pub max_concurrent: u32,
    pub active: bool,
}

impl Service {
    /// Full footprint of one booking: buffers plus visible duration.
    pub fn padded_len(&self) -> Ms {
        self.buffer_before + self.duration + self.buffer_after
    }

    /// Expand a visible span by this service's buffers.
    pub fn pad(&self, visible: &Span) -> Span {
        Span::new(visible.start - self.buffer_before, visible.end + self.buffer_after)
    }
}

/// Circular service area with its surcharge table.
#[derive(Debug, Clone, PartialEq)]
pub struct ServiceArea {
    pub id: Ulid,
    pub name: Option<String>,
    pub center: GeoPoint,
    pub radius_km: f64,
    pub base_surcharge: Cents,
    pub per_km_surcharge: Cents,
}

/// Per-tenant knobs, WAL-logged so they survive restart.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TenantSettings {
    pub slot_granularity: Ms,
    pub travel_speed_kmh: f64,
}

impl Default for TenantSettings {
    fn default() -> Self {
        Self {
            slot_granularity: 15 * MINUTE_MS,
            travel_speed_kmh: 30.0,
        }
    }
}

/// What a schedule entry represents.
#[derive(Debug, Clone, PartialEq)]
pub enum EntryKind {
    /// Staff absence — always blocks.
    TimeOff,
    Booking {
        service_id: Ulid,
        staff_id: Option<Ulid>,
        status: BookingStatus,
        location: Option<GeoPoint>,
        /// Travel surcharge frozen at reservation time. Never recomputed.
        surcharge: Option<Cents>,
    },
}

/// A single entry on a schedule. `span` is the customer-visible interval;
/// `padded` includes the service's buffers and is what conflicts are tested on.
#[derive(Debug, Clone, PartialEq)]
pub struct ScheduleEntry {
    pub id: Ulid,
    pub span: Span,
    pub padded: Span,
    pub kind: EntryKind,
}

impl ScheduleEntry {
    pub fn blocks(&self) -> bool {
        match &self.kind {
            EntryKind::TimeOff => true,
            EntryKind::Booking { status, .. } => status.blocks(),
        }
    }

    pub fn is_booking(&self) -> bool {
        matches!(self.kind, EntryKind::Booking { .. })
    }
}

/// Who owns a schedule.
#[derive(Debug, Clone)]
pub enum ScheduleOwner {
    Staff {
        name: Option<String>,
        active: bool,
        /// Overrides tenant business hours when configured.
        weekly: WeeklyHours,
    },
    /// Staff-less bookings for one service share this pool.
    Pool { service_id: Ulid },
}

/// Timeline for one staff member or one service pool.
/// Entries are kept sorted by `padded.start`.
#[derive(Debug, Clone)]
pub struct ScheduleState {
    pub id: Ulid,
    pub owner: ScheduleOwner,
    pub entries: Vec<ScheduleEntry>,
}

impl ScheduleState {
    pub fn new(id: Ulid, owner: ScheduleOwner) -> Self {
        Self {
            id,
            owner,
            entries: Vec::new(),
        }
    }

    pub fn insert_entry(&mut self, entry: ScheduleEntry) {
        let pos = self
            .entries
            .binary_search_by_key(&entry.padded.start, |e| e.padded.start)
            .unwrap_or_else(|e| e);
        self.entries.insert(pos, entry);
    }

    pub fn remove_entry(&mut self, id: Ulid) -> Option<ScheduleEntry> {
        if let Some(pos) = self.entries.iter().position(|e| e.id == id) {
            Some(self.entries.remove(pos))
        } else {
            None
        }
    }

    pub fn entry(&self, id: Ulid) -> Option<&ScheduleEntry> {
        self.entries.iter().find(|e| e.id == id)
    }

    pub fn entry_mut(&mut self, id: Ulid) -> Option<&mut ScheduleEntry> {
        self.entries.iter_mut().find(|e| e.id == id)
    }

    /// Entries whose padded span overlaps the query window.
    /// Binary search skips entries starting at or after `query.end`.
    pub fn overlapping(&self, query: &Span) -> impl Iterator<Item = &ScheduleEntry> {
        let right_bound = self
            .entries
            .partition_point(|e| e.padded.start < query.end);
        self.entries[..right_bound]
            .iter()
            .filter(move |e| e.padded.end > query.start)
    }

    pub fn is_staff(&self) -> bool {
        matches!(self.owner, ScheduleOwner::Staff { .. })
    }
}

/// The event types — flat, no nesting. This is the WAL record format.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Event {
    ServiceCreated {
        id: Ulid,
        name: Option<String>,
        duration: Ms,
        buffer_before: Ms,
        buffer_after: Ms,
        home_visit: bool,
        max_concurrent: u32,
    },
    ServiceActiveSet {
        id: Ulid,
        active: bool,
    },
    ServiceDeleted {
        id: Ulid,
    },
    StaffCreated {
        id: Ulid,
        name: Option<String>,
    },
    StaffActiveSet {
        id: Ulid,
        active: bool,
    },
    StaffDeleted {
        id: Ulid,
    },
    StaffHoursAdded {
        staff_id: Ulid,
        weekday: u8,
        range: DayRange,
    },
    StaffHoursCleared {
        staff_id: Ulid,
        weekday: u8,
    },
    TimeOffAdded {
        id: Ulid,
        staff_id: Ulid,
        span: Span,
    },
    TimeOffRemoved {
        id: Ulid,
        staff_id: Ulid,
    },
    BusinessHoursAdded {
        weekday: u8,
        range: DayRange,
    },
    BusinessHoursCleared {
        weekday: u8,
    },
    AreaCreated {
        id: Ulid,
        name: Option<String>,
        center: GeoPoint,
        radius_km: f64,
        base_surcharge: Cents,
        per_km_surcharge: Cents,
    },
    AreaDeleted {
        id: Ulid,
    },
    SettingsChanged {
        slot_granularity: Ms,
        travel_speed_kmh: f64,
    },
    BookingReserved {
        id: Ulid,
        schedule_id: Ulid,
        service_id: Ulid,
        staff_id: Option<Ulid>,
        span: Span,
        padded: Span,
        location: Option<GeoPoint>,
        surcharge: Option<Cents>,
    },
    BookingStatusChanged {
        id: Ulid,
        schedule_id: Ulid,
        service_id: Ulid,
        status: BookingStatus,
    },
}

// ── Query result types ───────────────────────────────────────────

#[derive(Debug, Clone, PartialEq)]
pub struct StaffInfo {
    pub id: Ulid,
    pub name: Option<String>,
    pub active: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct BookingInfo {
    pub id: Ulid,
    pub service_id: Ulid,
    pub staff_id: Option<Ulid>,
    pub start: Ms,
    pub end: Ms,
    pub status: BookingStatus,
    pub surcharge: Option<Cents>,
}

/// Why a candidate slot is not bookable.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnavailableReason {
    Conflict,
    OutsideServiceArea,
    Travel,
}

impl UnavailableReason {
    pub fn as_str(self) -> &'static str {
        match self {
            UnavailableReason::Conflict => "conflict",
            UnavailableReason::OutsideServiceArea => "outside_service_area",
            UnavailableReason::Travel => "travel",
        }
    }
}

/// Ephemeral availability result — recomputed on every request, never stored.
#[derive(Debug, Clone, PartialEq)]
pub struct Slot {
    pub span: Span,
    pub available: bool,
    pub surcharge: Option<Cents>,
    pub within_service_area: bool,
    pub reason: Option<UnavailableReason>,
}
