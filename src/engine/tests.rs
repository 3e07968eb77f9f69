use std::path::PathBuf;
use std::sync::Arc;

use chrono::{NaiveDate, NaiveTime};
use ulid::Ulid;

use super::travel::{TravelEstimate, TravelModel};
use super::*;
use crate::model::*;
use crate::notify::NotifyHub;

const H: Ms = 3_600_000; // 1 hour in ms
const M: Ms = 60_000; // 1 minute in ms

fn test_wal_path(name: &str) -> PathBuf {
    let dir = std::env::temp_dir().join("slotd_test_engine");
    std::fs::create_dir_all(&dir).unwrap();
    let path = dir.join(name);
    let _ = std::fs::remove_file(&path);
    path
}

fn new_engine(name: &str) -> Engine {
    Engine::new(test_wal_path(name), Arc::new(NotifyHub::new())).unwrap()
}

/// A Monday far enough in the future that no generated slot is in the past.
fn monday() -> NaiveDate {
    NaiveDate::from_ymd_opt(2030, 1, 7).unwrap()
}

fn tuesday() -> NaiveDate {
    NaiveDate::from_ymd_opt(2030, 1, 8).unwrap()
}

fn at(date: NaiveDate, hour: i64, minute: i64) -> Ms {
    date.and_time(NaiveTime::MIN).and_utc().timestamp_millis() + hour * H + minute * M
}

/// Returns a fixed estimate regardless of the points involved.
struct FixedTravel {
    distance_km: f64,
    duration: Ms,
}

impl TravelModel for FixedTravel {
    fn estimate(&self, _from: &GeoPoint, _to: &GeoPoint) -> TravelEstimate {
        TravelEstimate { distance_km: self.distance_km, duration: self.duration }
    }
}

async fn monday_hours(engine: &Engine) {
    // Monday 09:00-17:00
    engine
        .add_business_hours(0, DayRange { open_min: 540, close_min: 1020 })
        .await
        .unwrap();
}

async fn make_service(engine: &Engine, duration: Ms, buffer_after: Ms, home_visit: bool) -> Ulid {
    let id = Ulid::new();
    engine
        .create_service(id, Some("Test service".into()), duration, 0, buffer_after, home_visit, 1)
        .await
        .unwrap();
    id
}

const BERLIN: GeoPoint = GeoPoint { lat: 52.52, lng: 13.405 };
const NEARBY: GeoPoint = GeoPoint { lat: 52.53, lng: 13.42 };
const REMOTE: GeoPoint = GeoPoint { lat: 40.71, lng: -74.0 };

async fn berlin_area(engine: &Engine, base: Cents, per_km: Cents) -> Ulid {
    let id = Ulid::new();
    engine
        .create_area(id, Some("City".into()), BERLIN, 25.0, base, per_km)
        .await
        .unwrap();
    id
}

// ── Availability reads ───────────────────────────────────

#[tokio::test]
async fn availability_basic_day() {
    let engine = new_engine("availability_basic.wal");
    monday_hours(&engine).await;
    let svc = make_service(&engine, 60 * M, 0, false).await;

    let slots = engine.get_availability(svc, monday(), None, None).await.unwrap();
    // 09:00 through 16:00 starts, 15-minute default granularity
    assert_eq!(slots.len(), 29);
    assert_eq!(slots[0].span, Span::new(at(monday(), 9, 0), at(monday(), 10, 0)));
    assert_eq!(
        slots.last().unwrap().span,
        Span::new(at(monday(), 16, 0), at(monday(), 17, 0))
    );
    assert!(slots.iter().all(|s| s.available));
}

#[tokio::test]
async fn availability_deterministic_and_ascending() {
    let engine = new_engine("availability_det.wal");
    monday_hours(&engine).await;
    let svc = make_service(&engine, 45 * M, 10 * M, false).await;

    let a = engine.get_availability(svc, monday(), None, None).await.unwrap();
    let b = engine.get_availability(svc, monday(), None, None).await.unwrap();
    assert_eq!(a, b);
    assert!(a.windows(2).all(|w| w[0].span.start < w[1].span.start));
}

#[tokio::test]
async fn closed_day_yields_empty_not_error() {
    let engine = new_engine("closed_day.wal");
    monday_hours(&engine).await;
    let svc = make_service(&engine, 60 * M, 0, false).await;

    let slots = engine.get_availability(svc, tuesday(), None, None).await.unwrap();
    assert!(slots.is_empty());
}

#[tokio::test]
async fn availability_unknown_service_is_not_found() {
    let engine = new_engine("availability_unknown.wal");
    monday_hours(&engine).await;
    let result = engine.get_availability(Ulid::new(), monday(), None, None).await;
    assert!(matches!(result, Err(EngineError::NotFound(_))));
}

#[tokio::test]
async fn booking_marks_overlapping_slots_unavailable() {
    let engine = new_engine("booking_blocks.wal");
    monday_hours(&engine).await;
    let svc = make_service(&engine, 60 * M, 0, false).await;

    engine
        .reserve_booking(Ulid::new(), svc, None, at(monday(), 10, 0), None)
        .await
        .unwrap();

    let slots = engine.get_availability(svc, monday(), None, None).await.unwrap();
    let find = |h: i64, m: i64| {
        slots
            .iter()
            .find(|s| s.span.start == at(monday(), h, m))
            .unwrap()
    };

    // Everything overlapping 10:00-11:00 is out
    assert!(!find(9, 15).available);
    assert!(!find(10, 0).available);
    assert!(!find(10, 45).available);
    assert_eq!(find(10, 0).reason, Some(UnavailableReason::Conflict));
    // A booking ending at 11:00 does not block the slot starting at 11:00
    assert!(find(11, 0).available);
    // Nor the one ending exactly at 10:00
    assert!(find(9, 0).available);
}

#[tokio::test]
async fn after_buffer_blocks_until_buffer_end() {
    let engine = new_engine("buffer_blocks.wal");
    monday_hours(&engine).await;
    // 30-minute service with a 10-minute after-buffer
    let svc = make_service(&engine, 30 * M, 10 * M, false).await;
    engine.set_settings(5 * M, 30.0).await.unwrap();

    engine
        .reserve_booking(Ulid::new(), svc, None, at(monday(), 9, 0), None)
        .await
        .unwrap();

    let slots = engine.get_availability(svc, monday(), None, None).await.unwrap();
    let find = |h: i64, m: i64| {
        slots
            .iter()
            .find(|s| s.span.start == at(monday(), h, m))
            .unwrap()
    };

    // Booked 09:00-09:30: candidates starting before 09:40 are blocked
    assert!(!find(9, 30).available);
    assert!(!find(9, 35).available);
    assert!(find(9, 40).available);
}

#[tokio::test]
async fn staff_hours_bound_availability() {
    let engine = new_engine("staff_hours.wal");
    monday_hours(&engine).await;
    let svc = make_service(&engine, 60 * M, 0, false).await;

    let staff = Ulid::new();
    engine.create_staff(staff, Some("Alice".into())).await.unwrap();
    // Alice works Monday 10:00-12:00 only
    engine
        .add_staff_hours(staff, 0, DayRange { open_min: 600, close_min: 720 })
        .await
        .unwrap();

    let slots = engine.get_availability(svc, monday(), Some(staff), None).await.unwrap();
    assert!(!slots.is_empty());
    assert!(slots.iter().all(|s| s.span.start >= at(monday(), 10, 0)));
    assert!(slots.iter().all(|s| s.span.end <= at(monday(), 12, 0)));
}

#[tokio::test]
async fn staff_without_hours_falls_back_to_business_hours() {
    let engine = new_engine("staff_fallback.wal");
    monday_hours(&engine).await;
    let svc = make_service(&engine, 60 * M, 0, false).await;

    let staff = Ulid::new();
    engine.create_staff(staff, None).await.unwrap();

    let slots = engine.get_availability(svc, monday(), Some(staff), None).await.unwrap();
    assert_eq!(slots.first().map(|s| s.span.start), Some(at(monday(), 9, 0)));
}

#[tokio::test]
async fn time_off_blocks_slots_and_reservations() {
    let engine = new_engine("time_off.wal");
    monday_hours(&engine).await;
    let svc = make_service(&engine, 60 * M, 0, false).await;

    let staff = Ulid::new();
    engine.create_staff(staff, None).await.unwrap();
    engine
        .add_time_off(Ulid::new(), staff, Span::new(at(monday(), 12, 0), at(monday(), 13, 0)))
        .await
        .unwrap();

    let slots = engine.get_availability(svc, monday(), Some(staff), None).await.unwrap();
    let noon = slots
        .iter()
        .find(|s| s.span.start == at(monday(), 12, 0))
        .unwrap();
    assert!(!noon.available);

    let result = engine
        .reserve_booking(Ulid::new(), svc, Some(staff), at(monday(), 12, 0), None)
        .await;
    assert!(matches!(result, Err(EngineError::Conflict(_))));
}

// ── Reservation write path ───────────────────────────────

#[tokio::test]
async fn exactly_one_concurrent_reservation_wins() {
    let engine = Arc::new(new_engine("race.wal"));
    monday_hours(&engine).await;
    let svc = make_service(&engine, 60 * M, 0, false).await;
    let staff = Ulid::new();
    engine.create_staff(staff, None).await.unwrap();

    let start = at(monday(), 10, 0);
    let mut handles = Vec::new();
    for _ in 0..8 {
        let engine = engine.clone();
        handles.push(tokio::spawn(async move {
            engine
                .reserve_booking(Ulid::new(), svc, Some(staff), start, None)
                .await
        }));
    }

    let mut won = 0;
    let mut lost = 0;
    for handle in handles {
        match handle.await.unwrap() {
            Ok(_) => won += 1,
            Err(EngineError::Conflict(_)) => lost += 1,
            Err(other) => panic!("unexpected error: {other}"),
        }
    }
    assert_eq!(won, 1, "exactly one racing reservation must win");
    assert_eq!(lost, 7);
}

#[tokio::test]
async fn boundary_reservations_do_not_conflict() {
    let engine = new_engine("boundary.wal");
    monday_hours(&engine).await;
    let svc = make_service(&engine, 60 * M, 0, false).await;

    engine
        .reserve_booking(Ulid::new(), svc, None, at(monday(), 10, 0), None)
        .await
        .unwrap();
    // Back-to-back booking starting exactly at the previous end
    engine
        .reserve_booking(Ulid::new(), svc, None, at(monday(), 11, 0), None)
        .await
        .unwrap();
}

#[tokio::test]
async fn reservation_outside_hours_rejected() {
    let engine = new_engine("outside_hours.wal");
    monday_hours(&engine).await;
    let svc = make_service(&engine, 60 * M, 0, false).await;

    let result = engine
        .reserve_booking(Ulid::new(), svc, None, at(monday(), 20, 0), None)
        .await;
    assert!(matches!(result, Err(EngineError::OutsideHours)));

    // Closed day
    let result = engine
        .reserve_booking(Ulid::new(), svc, None, at(tuesday(), 10, 0), None)
        .await;
    assert!(matches!(result, Err(EngineError::OutsideHours)));
}

#[tokio::test]
async fn cancelled_booking_frees_the_slot() {
    let engine = new_engine("cancel_frees.wal");
    monday_hours(&engine).await;
    let svc = make_service(&engine, 60 * M, 0, false).await;

    let first = Ulid::new();
    engine
        .reserve_booking(first, svc, None, at(monday(), 10, 0), None)
        .await
        .unwrap();
    let blocked = engine
        .reserve_booking(Ulid::new(), svc, None, at(monday(), 10, 0), None)
        .await;
    assert!(matches!(blocked, Err(EngineError::Conflict(_))));

    engine.cancel_booking(first).await.unwrap();
    engine
        .reserve_booking(Ulid::new(), svc, None, at(monday(), 10, 0), None)
        .await
        .unwrap();
}

#[tokio::test]
async fn pool_capacity_allows_configured_concurrency() {
    let engine = new_engine("pool_capacity.wal");
    monday_hours(&engine).await;
    let svc = Ulid::new();
    engine
        .create_service(svc, None, 60 * M, 0, 0, false, 2)
        .await
        .unwrap();

    let start = at(monday(), 10, 0);
    engine.reserve_booking(Ulid::new(), svc, None, start, None).await.unwrap();
    engine.reserve_booking(Ulid::new(), svc, None, start, None).await.unwrap();
    let third = engine.reserve_booking(Ulid::new(), svc, None, start, None).await;
    assert!(matches!(third, Err(EngineError::CapacityExceeded(2))));
}

#[tokio::test]
async fn staff_and_pool_schedules_are_independent() {
    let engine = new_engine("staff_pool_independent.wal");
    monday_hours(&engine).await;
    let svc = make_service(&engine, 60 * M, 0, false).await;
    let staff = Ulid::new();
    engine.create_staff(staff, None).await.unwrap();

    let start = at(monday(), 10, 0);
    engine.reserve_booking(Ulid::new(), svc, Some(staff), start, None).await.unwrap();
    // The staff booking does not occupy the staff-less pool
    engine.reserve_booking(Ulid::new(), svc, None, start, None).await.unwrap();
}

#[tokio::test]
async fn inactive_service_rejects_reads_and_writes() {
    let engine = new_engine("inactive_service.wal");
    monday_hours(&engine).await;
    let svc = make_service(&engine, 60 * M, 0, false).await;
    engine.set_service_active(svc, false).await.unwrap();

    assert!(matches!(
        engine.get_availability(svc, monday(), None, None).await,
        Err(EngineError::Inactive(_))
    ));
    assert!(matches!(
        engine
            .reserve_booking(Ulid::new(), svc, None, at(monday(), 10, 0), None)
            .await,
        Err(EngineError::Inactive(_))
    ));
}

#[tokio::test]
async fn unknown_staff_is_not_found() {
    let engine = new_engine("unknown_staff.wal");
    monday_hours(&engine).await;
    let svc = make_service(&engine, 60 * M, 0, false).await;

    let result = engine
        .reserve_booking(Ulid::new(), svc, Some(Ulid::new()), at(monday(), 10, 0), None)
        .await;
    assert!(matches!(result, Err(EngineError::NotFound(_))));
}

// ── Status lifecycle ─────────────────────────────────────

#[tokio::test]
async fn status_walk_through_lifecycle() {
    let engine = new_engine("lifecycle.wal");
    monday_hours(&engine).await;
    let svc = make_service(&engine, 60 * M, 0, false).await;

    let id = Ulid::new();
    let booking = engine
        .reserve_booking(id, svc, None, at(monday(), 10, 0), None)
        .await
        .unwrap();
    assert_eq!(booking.status, BookingStatus::Pending);

    let booking = engine.set_booking_status(id, BookingStatus::Confirmed).await.unwrap();
    assert_eq!(booking.status, BookingStatus::Confirmed);

    let booking = engine.set_booking_status(id, BookingStatus::Completed).await.unwrap();
    assert_eq!(booking.status, BookingStatus::Completed);
}

#[tokio::test]
async fn completed_booking_cannot_be_reconfirmed() {
    let engine = new_engine("transition_guard.wal");
    monday_hours(&engine).await;
    let svc = make_service(&engine, 60 * M, 0, false).await;

    let id = Ulid::new();
    engine
        .reserve_booking(id, svc, None, at(monday(), 10, 0), None)
        .await
        .unwrap();
    engine.set_booking_status(id, BookingStatus::Confirmed).await.unwrap();
    engine.set_booking_status(id, BookingStatus::Completed).await.unwrap();

    let result = engine.set_booking_status(id, BookingStatus::Confirmed).await;
    assert!(matches!(result, Err(EngineError::InvalidTransition { .. })));

    let result = engine.cancel_booking(id).await;
    assert!(matches!(result, Err(EngineError::InvalidTransition { .. })));
}

#[tokio::test]
async fn cancel_unknown_booking_is_not_found() {
    let engine = new_engine("cancel_unknown.wal");
    let result = engine.cancel_booking(Ulid::new()).await;
    assert!(matches!(result, Err(EngineError::NotFound(_))));
}

// ── Travel adjustment ────────────────────────────────────

#[tokio::test]
async fn travel_infeasible_slot_excluded_and_rejected() {
    // Staff busy 09:00-10:00 at A; candidate at 10:05 at B with 20 minutes
    // of travel: 10:00 + 20min = 10:20 > 10:05, so the slot is out.
    let engine = new_engine("travel_infeasible.wal")
        .with_travel_model(Arc::new(FixedTravel { distance_km: 8.0, duration: 20 * M }));
    monday_hours(&engine).await;
    berlin_area(&engine, 500, 100).await;
    let svc = make_service(&engine, 60 * M, 0, true).await;
    engine.set_settings(5 * M, 30.0).await.unwrap();

    let staff = Ulid::new();
    engine.create_staff(staff, None).await.unwrap();
    engine
        .reserve_booking(Ulid::new(), svc, Some(staff), at(monday(), 9, 0), Some(BERLIN))
        .await
        .unwrap();

    let slots = engine
        .get_availability(svc, monday(), Some(staff), Some(NEARBY))
        .await
        .unwrap();
    let find = |h: i64, m: i64| {
        slots
            .iter()
            .find(|s| s.span.start == at(monday(), h, m))
            .unwrap()
    };
    let infeasible = find(10, 5);
    assert!(!infeasible.available);
    assert_eq!(infeasible.reason, Some(UnavailableReason::Travel));
    let feasible = find(10, 20);
    assert!(feasible.available);
    assert_eq!(feasible.surcharge, Some(500 + 800));

    let result = engine
        .reserve_booking(Ulid::new(), svc, Some(staff), at(monday(), 10, 5), Some(NEARBY))
        .await;
    assert!(matches!(result, Err(EngineError::InfeasibleTravel { .. })));
}

#[tokio::test]
async fn first_home_visit_pays_base_surcharge_only() {
    let engine = new_engine("travel_base.wal")
        .with_travel_model(Arc::new(FixedTravel { distance_km: 8.0, duration: 20 * M }));
    monday_hours(&engine).await;
    berlin_area(&engine, 700, 100).await;
    let svc = make_service(&engine, 60 * M, 0, true).await;

    let booking = engine
        .reserve_booking(Ulid::new(), svc, None, at(monday(), 9, 0), Some(NEARBY))
        .await
        .unwrap();
    assert_eq!(booking.surcharge, Some(700));
}

#[tokio::test]
async fn out_of_area_location_excluded() {
    let engine = new_engine("out_of_area.wal");
    monday_hours(&engine).await;
    berlin_area(&engine, 500, 100).await;
    let svc = make_service(&engine, 60 * M, 0, true).await;

    let slots = engine
        .get_availability(svc, monday(), None, Some(REMOTE))
        .await
        .unwrap();
    assert!(!slots.is_empty());
    assert!(slots.iter().all(|s| !s.available && !s.within_service_area));
    assert!(slots.iter().all(|s| s.reason == Some(UnavailableReason::OutsideServiceArea)));

    let result = engine
        .reserve_booking(Ulid::new(), svc, None, at(monday(), 10, 0), Some(REMOTE))
        .await;
    assert!(matches!(result, Err(EngineError::OutOfServiceArea)));
}

#[tokio::test]
async fn location_on_non_home_visit_service_is_invalid() {
    let engine = new_engine("location_invalid.wal");
    monday_hours(&engine).await;
    let svc = make_service(&engine, 60 * M, 0, false).await;

    let result = engine
        .reserve_booking(Ulid::new(), svc, None, at(monday(), 10, 0), Some(BERLIN))
        .await;
    assert!(matches!(result, Err(EngineError::Invalid(_))));
}

#[tokio::test]
async fn confirmed_surcharge_survives_area_changes() {
    let engine = new_engine("surcharge_frozen.wal")
        .with_travel_model(Arc::new(FixedTravel { distance_km: 5.0, duration: 10 * M }));
    monday_hours(&engine).await;
    let area = berlin_area(&engine, 500, 100).await;
    let svc = make_service(&engine, 60 * M, 0, true).await;

    let id = Ulid::new();
    let booking = engine
        .reserve_booking(id, svc, None, at(monday(), 9, 0), Some(NEARBY))
        .await
        .unwrap();
    assert_eq!(booking.surcharge, Some(500));
    engine.set_booking_status(id, BookingStatus::Confirmed).await.unwrap();

    // Replace the area with a much more expensive one
    engine.delete_area(area).await.unwrap();
    berlin_area(&engine, 9_000, 500).await;

    let stored = engine.get_booking(id).await.unwrap();
    assert_eq!(stored.surcharge, Some(500), "historical surcharge must not move");
}

// ── Durability ───────────────────────────────────────────

#[tokio::test]
async fn replay_restores_bookings_and_config() {
    let path = test_wal_path("replay_restores.wal");
    let svc = Ulid::new();
    let staff = Ulid::new();
    let booking = Ulid::new();

    {
        let engine = Engine::new(path.clone(), Arc::new(NotifyHub::new())).unwrap();
        engine
            .add_business_hours(0, DayRange { open_min: 540, close_min: 1020 })
            .await
            .unwrap();
        engine
            .create_service(svc, Some("Massage".into()), 60 * M, 0, 0, false, 1)
            .await
            .unwrap();
        engine.create_staff(staff, Some("Alice".into())).await.unwrap();
        engine
            .reserve_booking(booking, svc, Some(staff), at(monday(), 10, 0), None)
            .await
            .unwrap();
        engine.set_booking_status(booking, BookingStatus::Confirmed).await.unwrap();
    }

    let engine = Engine::new(path, Arc::new(NotifyHub::new())).unwrap();
    let restored = engine.get_booking(booking).await.unwrap();
    assert_eq!(restored.status, BookingStatus::Confirmed);
    assert_eq!(restored.staff_id, Some(staff));

    // The restored booking still blocks its slot
    let result = engine
        .reserve_booking(Ulid::new(), svc, Some(staff), at(monday(), 10, 0), None)
        .await;
    assert!(matches!(result, Err(EngineError::Conflict(_))));
}

#[tokio::test]
async fn compaction_preserves_state() {
    let path = test_wal_path("compaction_preserves.wal");
    let svc = Ulid::new();
    let keep = Ulid::new();

    {
        let engine = Engine::new(path.clone(), Arc::new(NotifyHub::new())).unwrap();
        engine
            .add_business_hours(0, DayRange { open_min: 540, close_min: 1020 })
            .await
            .unwrap();
        engine.create_service(svc, None, 60 * M, 0, 0, false, 1).await.unwrap();

        // Churn: book and cancel a few times, then one that stays
        for _ in 0..5 {
            let id = Ulid::new();
            engine
                .reserve_booking(id, svc, None, at(monday(), 10, 0), None)
                .await
                .unwrap();
            engine.cancel_booking(id).await.unwrap();
        }
        engine
            .reserve_booking(keep, svc, None, at(monday(), 10, 0), None)
            .await
            .unwrap();
        engine.compact_wal().await.unwrap();
    }

    let engine = Engine::new(path, Arc::new(NotifyHub::new())).unwrap();
    let restored = engine.get_booking(keep).await.unwrap();
    assert_eq!(restored.status, BookingStatus::Pending);
    let result = engine
        .reserve_booking(Ulid::new(), svc, None, at(monday(), 10, 0), None)
        .await;
    assert!(matches!(result, Err(EngineError::Conflict(_))));
}

// ── Staff administration ─────────────────────────────────

#[tokio::test]
async fn staff_with_future_bookings_cannot_be_deleted() {
    let engine = new_engine("staff_delete_guard.wal");
    monday_hours(&engine).await;
    let svc = make_service(&engine, 60 * M, 0, false).await;
    let staff = Ulid::new();
    engine.create_staff(staff, None).await.unwrap();

    let id = Ulid::new();
    engine
        .reserve_booking(id, svc, Some(staff), at(monday(), 10, 0), None)
        .await
        .unwrap();
    assert!(matches!(engine.delete_staff(staff).await, Err(EngineError::HasBookings(_))));

    engine.cancel_booking(id).await.unwrap();
    engine.delete_staff(staff).await.unwrap();
    assert!(engine.get_schedule(&staff).is_none());
}

#[tokio::test]
async fn inactive_staff_rejects_reservations() {
    let engine = new_engine("inactive_staff.wal");
    monday_hours(&engine).await;
    let svc = make_service(&engine, 60 * M, 0, false).await;
    let staff = Ulid::new();
    engine.create_staff(staff, None).await.unwrap();
    engine.set_staff_active(staff, false).await.unwrap();

    let result = engine
        .reserve_booking(Ulid::new(), svc, Some(staff), at(monday(), 10, 0), None)
        .await;
    assert!(matches!(result, Err(EngineError::Inactive(_))));
}

#[tokio::test]
async fn duplicate_ids_rejected() {
    let engine = new_engine("duplicate_ids.wal");
    monday_hours(&engine).await;
    let svc = make_service(&engine, 60 * M, 0, false).await;

    let result = engine.create_service(svc, None, 30 * M, 0, 0, false, 1).await;
    assert!(matches!(result, Err(EngineError::AlreadyExists(_))));

    let id = Ulid::new();
    engine
        .reserve_booking(id, svc, None, at(monday(), 10, 0), None)
        .await
        .unwrap();
    let result = engine
        .reserve_booking(id, svc, None, at(monday(), 14, 0), None)
        .await;
    assert!(matches!(result, Err(EngineError::AlreadyExists(_))));
}

// ── Events ───────────────────────────────────────────────

#[tokio::test]
async fn booking_events_reach_service_and_staff_channels() {
    let notify = Arc::new(NotifyHub::new());
    let engine = Engine::new(test_wal_path("events.wal"), notify.clone()).unwrap();
    monday_hours(&engine).await;
    let svc = make_service(&engine, 60 * M, 0, false).await;
    let staff = Ulid::new();
    engine.create_staff(staff, None).await.unwrap();

    let mut service_rx = notify.subscribe(svc);
    let mut staff_rx = notify.subscribe(staff);

    let id = Ulid::new();
    engine
        .reserve_booking(id, svc, Some(staff), at(monday(), 10, 0), None)
        .await
        .unwrap();

    assert!(matches!(service_rx.try_recv(), Ok(Event::BookingReserved { .. })));
    assert!(matches!(staff_rx.try_recv(), Ok(Event::BookingReserved { .. })));

    engine.cancel_booking(id).await.unwrap();
    assert!(matches!(
        service_rx.try_recv(),
        Ok(Event::BookingStatusChanged { status: BookingStatus::Cancelled, .. })
    ));
}

#[tokio::test]
async fn listings_return_schedule_contents() {
    let engine = new_engine("listings.wal");
    monday_hours(&engine).await;
    let svc = make_service(&engine, 60 * M, 0, false).await;
    let staff = Ulid::new();
    engine.create_staff(staff, Some("Alice".into())).await.unwrap();

    engine
        .reserve_booking(Ulid::new(), svc, Some(staff), at(monday(), 10, 0), None)
        .await
        .unwrap();
    engine
        .reserve_booking(Ulid::new(), svc, None, at(monday(), 11, 0), None)
        .await
        .unwrap();

    let staff_bookings = engine.list_bookings_for_staff(staff).await.unwrap();
    assert_eq!(staff_bookings.len(), 1);

    let service_bookings = engine.list_bookings_for_service(svc).await.unwrap();
    assert_eq!(service_bookings.len(), 2);
    assert!(service_bookings[0].start <= service_bookings[1].start);

    let services = engine.list_services();
    assert_eq!(services.len(), 1);
    let staff_list = engine.list_staff().await;
    assert_eq!(staff_list.len(), 1);
    assert_eq!(staff_list[0].name.as_deref(), Some("Alice"));
}
