use std::sync::Arc;

use chrono::DateTime;
use tokio::sync::RwLock;
use ulid::Ulid;

use crate::limits::*;
use crate::model::*;

use super::conflict::{
    check_no_conflict, now_ms, validate_booking_span, validate_time_off_span, validate_transition,
};
use super::slots::{intersect_intervals, merge_overlapping};
use super::travel::{check_feasible, locate_area, preceding_located};
use super::{Engine, EngineError, SharedScheduleState};

fn validate_name(name: &Option<String>) -> Result<(), EngineError> {
    if let Some(n) = name
        && n.len() > MAX_NAME_LEN
    {
        return Err(EngineError::LimitExceeded("name too long"));
    }
    Ok(())
}

fn validate_day_range(weekday: u8, range: &DayRange) -> Result<(), EngineError> {
    if weekday >= 7 {
        return Err(EngineError::Invalid("weekday must be 0-6"));
    }
    if range.open_min >= range.close_min || range.close_min > 1440 {
        return Err(EngineError::Invalid("open/close minutes out of order"));
    }
    Ok(())
}

impl Engine {
    // ── Services ─────────────────────────────────────────────

    #[allow(clippy::too_many_arguments)]
    pub async fn create_service(
        &self,
        id: Ulid,
        name: Option<String>,
        duration: Ms,
        buffer_before: Ms,
        buffer_after: Ms,
        home_visit: bool,
        max_concurrent: u32,
    ) -> Result<(), EngineError> {
        if self.services.len() >= MAX_SERVICES_PER_TENANT {
            return Err(EngineError::LimitExceeded("too many services"));
        }
        validate_name(&name)?;
        if duration <= 0 {
            return Err(EngineError::Invalid("duration must be positive"));
        }
        if buffer_before < 0 || buffer_after < 0 {
            return Err(EngineError::Invalid("buffers must be non-negative"));
        }
        if max_concurrent == 0 {
            return Err(EngineError::Invalid("max_concurrent must be at least 1"));
        }
        if self.services.contains_key(&id) || self.schedules.contains_key(&id) {
            return Err(EngineError::AlreadyExists(id));
        }

        let event = Event::ServiceCreated {
            id,
            name: name.clone(),
            duration,
            buffer_before,
            buffer_after,
            home_visit,
            max_concurrent,
        };
        self.wal_append(&event).await?;
        self.services.insert(
            id,
            Service {
                id,
                name,
                duration,
                buffer_before,
                buffer_after,
                home_visit,
                max_concurrent,
                active: true,
            },
        );
        self.route_notifications(&event);
        Ok(())
    }

    pub async fn set_service_active(&self, id: Ulid, active: bool) -> Result<(), EngineError> {
        if !self.services.contains_key(&id) {
            return Err(EngineError::NotFound(id));
        }
        let event = Event::ServiceActiveSet { id, active };
        self.wal_append(&event).await?;
        if let Some(mut svc) = self.services.get_mut(&id) {
            svc.active = active;
        }
        self.route_notifications(&event);
        Ok(())
    }

    pub async fn delete_service(&self, id: Ulid) -> Result<(), EngineError> {
        if !self.services.contains_key(&id) {
            return Err(EngineError::NotFound(id));
        }
        if self.service_has_active_bookings(id).await {
            return Err(EngineError::HasBookings(id));
        }

        let event = Event::ServiceDeleted { id };
        self.wal_append(&event).await?;
        self.services.remove(&id);
        if let Some(rs) = self.get_schedule(&id) {
            let guard = rs.read().await;
            for entry in &guard.entries {
                self.entry_to_schedule.remove(&entry.id);
            }
            drop(guard);
            self.schedules.remove(&id);
        }
        self.route_notifications(&event);
        self.notify.remove(&id);
        Ok(())
    }

    /// Any pending/confirmed booking of this service that has not yet ended,
    /// on the pool or on any staff schedule.
    async fn service_has_active_bookings(&self, service_id: Ulid) -> bool {
        let now = now_ms();
        let schedules: Vec<SharedScheduleState> =
            self.schedules.iter().map(|e| e.value().clone()).collect();
        for rs in schedules {
            let guard = rs.read().await;
            let hit = guard.entries.iter().any(|e| match &e.kind {
                EntryKind::Booking { service_id: sid, status, .. } => {
                    *sid == service_id && status.blocks() && e.span.end > now
                }
                _ => false,
            });
            if hit {
                return true;
            }
        }
        false
    }

    // ── Staff ────────────────────────────────────────────────

    pub async fn create_staff(&self, id: Ulid, name: Option<String>) -> Result<(), EngineError> {
        let staff_count = {
            // Pools share the schedules map; only count staff schedules.
            let mut n = 0usize;
            for entry in self.schedules.iter() {
                if let Ok(guard) = entry.value().try_read()
                    && guard.is_staff()
                {
                    n += 1;
                }
            }
            n
        };
        if staff_count >= MAX_STAFF_PER_TENANT {
            return Err(EngineError::LimitExceeded("too many staff members"));
        }
        validate_name(&name)?;
        if self.schedules.contains_key(&id) || self.services.contains_key(&id) {
            return Err(EngineError::AlreadyExists(id));
        }

        let event = Event::StaffCreated { id, name: name.clone() };
        self.wal_append(&event).await?;
        let owner = ScheduleOwner::Staff {
            name,
            active: true,
            weekly: WeeklyHours::default(),
        };
        self.schedules
            .insert(id, Arc::new(RwLock::new(ScheduleState::new(id, owner))));
        self.route_notifications(&event);
        Ok(())
    }

    pub async fn set_staff_active(&self, id: Ulid, active: bool) -> Result<(), EngineError> {
        let rs = self.get_schedule(&id).ok_or(EngineError::NotFound(id))?;
        let mut guard = rs.write().await;
        if !guard.is_staff() {
            return Err(EngineError::NotFound(id));
        }
        let event = Event::StaffActiveSet { id, active };
        self.persist_and_apply(&mut guard, &event).await
    }

    pub async fn delete_staff(&self, id: Ulid) -> Result<(), EngineError> {
        let rs = self.get_schedule(&id).ok_or(EngineError::NotFound(id))?;
        let guard = rs.read().await;
        if !guard.is_staff() {
            return Err(EngineError::NotFound(id));
        }
        let now = now_ms();
        let active = guard
            .entries
            .iter()
            .any(|e| e.is_booking() && e.blocks() && e.span.end > now);
        if active {
            return Err(EngineError::HasBookings(id));
        }
        drop(guard);

        let event = Event::StaffDeleted { id };
        self.wal_append(&event).await?;
        if let Some((_, rs)) = self.schedules.remove(&id) {
            let guard = rs.read().await;
            for entry in &guard.entries {
                self.entry_to_schedule.remove(&entry.id);
            }
        }
        self.route_notifications(&event);
        self.notify.remove(&id);
        Ok(())
    }

    pub async fn add_staff_hours(
        &self,
        staff_id: Ulid,
        weekday: u8,
        range: DayRange,
    ) -> Result<(), EngineError> {
        validate_day_range(weekday, &range)?;
        let rs = self.get_schedule(&staff_id).ok_or(EngineError::NotFound(staff_id))?;
        let mut guard = rs.write().await;
        let ScheduleOwner::Staff { weekly, .. } = &guard.owner else {
            return Err(EngineError::NotFound(staff_id));
        };
        if weekly.day(weekday as usize).len() >= MAX_RANGES_PER_DAY {
            return Err(EngineError::LimitExceeded("too many ranges on weekday"));
        }

        let event = Event::StaffHoursAdded { staff_id, weekday, range };
        self.persist_and_apply(&mut guard, &event).await
    }

    pub async fn clear_staff_hours(&self, staff_id: Ulid, weekday: u8) -> Result<(), EngineError> {
        if weekday >= 7 {
            return Err(EngineError::Invalid("weekday must be 0-6"));
        }
        let rs = self.get_schedule(&staff_id).ok_or(EngineError::NotFound(staff_id))?;
        let mut guard = rs.write().await;
        if !guard.is_staff() {
            return Err(EngineError::NotFound(staff_id));
        }
        let event = Event::StaffHoursCleared { staff_id, weekday };
        self.persist_and_apply(&mut guard, &event).await
    }

    pub async fn add_time_off(
        &self,
        id: Ulid,
        staff_id: Ulid,
        span: Span,
    ) -> Result<(), EngineError> {
        validate_time_off_span(&span)?;
        if self.entry_to_schedule.contains_key(&id) {
            return Err(EngineError::AlreadyExists(id));
        }
        let rs = self.get_schedule(&staff_id).ok_or(EngineError::NotFound(staff_id))?;
        let mut guard = rs.write().await;
        if !guard.is_staff() {
            return Err(EngineError::NotFound(staff_id));
        }
        if guard.entries.len() >= MAX_ENTRIES_PER_SCHEDULE {
            return Err(EngineError::LimitExceeded("too many entries on schedule"));
        }

        let event = Event::TimeOffAdded { id, staff_id, span };
        self.persist_and_apply(&mut guard, &event).await
    }

    pub async fn remove_time_off(&self, id: Ulid) -> Result<Ulid, EngineError> {
        let (schedule_id, mut guard) = self.resolve_entry_write(&id).await?;
        match guard.entry(id) {
            Some(entry) if matches!(entry.kind, EntryKind::TimeOff) => {}
            Some(_) => return Err(EngineError::Invalid("entry is not time off")),
            None => return Err(EngineError::NotFound(id)),
        }
        let event = Event::TimeOffRemoved { id, staff_id: schedule_id };
        self.persist_and_apply(&mut guard, &event).await?;
        Ok(schedule_id)
    }

    // ── Tenant configuration ─────────────────────────────────

    pub async fn add_business_hours(&self, weekday: u8, range: DayRange) -> Result<(), EngineError> {
        validate_day_range(weekday, &range)?;
        let mut hours = self.business_hours.write().await;
        if hours.day(weekday as usize).len() >= MAX_RANGES_PER_DAY {
            return Err(EngineError::LimitExceeded("too many ranges on weekday"));
        }
        let event = Event::BusinessHoursAdded { weekday, range };
        self.wal_append(&event).await?;
        hours.add_range(weekday as usize, range);
        Ok(())
    }

    pub async fn clear_business_hours(&self, weekday: u8) -> Result<(), EngineError> {
        if weekday >= 7 {
            return Err(EngineError::Invalid("weekday must be 0-6"));
        }
        let mut hours = self.business_hours.write().await;
        let event = Event::BusinessHoursCleared { weekday };
        self.wal_append(&event).await?;
        hours.clear_day(weekday as usize);
        Ok(())
    }

    pub async fn create_area(
        &self,
        id: Ulid,
        name: Option<String>,
        center: GeoPoint,
        radius_km: f64,
        base_surcharge: Cents,
        per_km_surcharge: Cents,
    ) -> Result<(), EngineError> {
        if self.areas.len() >= MAX_AREAS_PER_TENANT {
            return Err(EngineError::LimitExceeded("too many service areas"));
        }
        validate_name(&name)?;
        if !(radius_km > 0.0) || !radius_km.is_finite() {
            return Err(EngineError::Invalid("radius must be positive"));
        }
        if !(-90.0..=90.0).contains(&center.lat) || !(-180.0..=180.0).contains(&center.lng) {
            return Err(EngineError::Invalid("coordinates out of range"));
        }
        if base_surcharge < 0 || per_km_surcharge < 0 {
            return Err(EngineError::Invalid("surcharges must be non-negative"));
        }
        if self.areas.contains_key(&id) {
            return Err(EngineError::AlreadyExists(id));
        }

        let event = Event::AreaCreated {
            id,
            name: name.clone(),
            center,
            radius_km,
            base_surcharge,
            per_km_surcharge,
        };
        self.wal_append(&event).await?;
        self.areas.insert(
            id,
            ServiceArea { id, name, center, radius_km, base_surcharge, per_km_surcharge },
        );
        Ok(())
    }

    pub async fn delete_area(&self, id: Ulid) -> Result<(), EngineError> {
        if !self.areas.contains_key(&id) {
            return Err(EngineError::NotFound(id));
        }
        let event = Event::AreaDeleted { id };
        self.wal_append(&event).await?;
        self.areas.remove(&id);
        Ok(())
    }

    pub async fn set_settings(
        &self,
        slot_granularity: Ms,
        travel_speed_kmh: f64,
    ) -> Result<(), EngineError> {
        if !(MIN_SLOT_GRANULARITY_MS..=MAX_SLOT_GRANULARITY_MS).contains(&slot_granularity) {
            return Err(EngineError::Invalid("granularity out of range"));
        }
        if !(travel_speed_kmh > 0.0) || !travel_speed_kmh.is_finite() {
            return Err(EngineError::Invalid("travel speed must be positive"));
        }
        let mut settings = self.settings.write().await;
        let event = Event::SettingsChanged { slot_granularity, travel_speed_kmh };
        self.wal_append(&event).await?;
        settings.slot_granularity = slot_granularity;
        settings.travel_speed_kmh = travel_speed_kmh;
        Ok(())
    }

    // ── Bookings ─────────────────────────────────────────────

    /// Atomic reserve: the schedule's write guard is the only
    /// synchronization point. Conflict and travel checks re-run under the
    /// guard, so of any set of racing reservations for overlapping spans,
    /// exactly one appends to the WAL and the rest get a typed conflict.
    pub async fn reserve_booking(
        &self,
        id: Ulid,
        service_id: Ulid,
        staff_id: Option<Ulid>,
        start: Ms,
        location: Option<GeoPoint>,
    ) -> Result<BookingInfo, EngineError> {
        if self.entry_to_schedule.contains_key(&id) {
            return Err(EngineError::AlreadyExists(id));
        }
        let service = self.get_service(&service_id).ok_or(EngineError::NotFound(service_id))?;
        if !service.active {
            return Err(EngineError::Inactive(service_id));
        }
        if location.is_some() && !service.home_visit {
            return Err(EngineError::Invalid("service is not offered as home visit"));
        }
        if let Some(loc) = &location
            && (!(-90.0..=90.0).contains(&loc.lat) || !(-180.0..=180.0).contains(&loc.lng))
        {
            return Err(EngineError::Invalid("coordinates out of range"));
        }

        let span = Span::new(start, start + service.duration);
        let padded = service.pad(&span);
        validate_booking_span(&padded)?;

        let date = DateTime::from_timestamp_millis(start)
            .ok_or(EngineError::Invalid("timestamp out of range"))?
            .date_naive();
        let business_windows = {
            let hours = self.business_hours.read().await;
            let mut w = hours.windows_for(date);
            w.sort_by_key(|s| s.start);
            merge_overlapping(&w)
        };

        let schedule_id = staff_id.unwrap_or(service_id);
        let schedule = match staff_id {
            Some(sid) => self.get_schedule(&sid).ok_or(EngineError::NotFound(sid))?,
            None => self.pool_schedule(service_id),
        };
        let mut guard = schedule.write().await;

        let windows = match &guard.owner {
            ScheduleOwner::Staff { active, weekly, .. } => {
                if !*active {
                    return Err(EngineError::Inactive(schedule_id));
                }
                if weekly.is_configured() {
                    let mut staff_windows = weekly.windows_for(date);
                    staff_windows.sort_by_key(|s| s.start);
                    let staff_windows = merge_overlapping(&staff_windows);
                    intersect_intervals(&business_windows, &staff_windows)
                } else {
                    business_windows
                }
            }
            ScheduleOwner::Pool { .. } => business_windows,
        };
        if !windows.iter().any(|w| w.contains_span(&padded)) {
            return Err(EngineError::OutsideHours);
        }

        if guard.entries.len() >= MAX_ENTRIES_PER_SCHEDULE {
            return Err(EngineError::LimitExceeded("too many entries on schedule"));
        }

        let capacity = if staff_id.is_some() { 1 } else { service.max_concurrent };
        check_no_conflict(&guard, &padded, capacity)?;

        let surcharge = if service.home_visit && let Some(loc) = location {
            let area = locate_area(self.areas.iter().map(|e| e.value().clone()), &loc)
                .ok_or(EngineError::OutOfServiceArea)?;
            let speed = self.settings.read().await.travel_speed_kmh;
            let model = self.travel_model(speed);
            let prev = preceding_located(&guard, span.start);
            Some(check_feasible(prev, span.start, &loc, &area, model.as_ref())?)
        } else {
            None
        };

        let event = Event::BookingReserved {
            id,
            schedule_id,
            service_id,
            staff_id,
            span,
            padded,
            location,
            surcharge,
        };
        self.persist_and_apply(&mut guard, &event).await?;

        Ok(BookingInfo {
            id,
            service_id,
            staff_id,
            start: span.start,
            end: span.end,
            status: BookingStatus::Pending,
            surcharge,
        })
    }

    fn pool_schedule(&self, service_id: Ulid) -> SharedScheduleState {
        self.schedules
            .entry(service_id)
            .or_insert_with(|| {
                Arc::new(RwLock::new(ScheduleState::new(
                    service_id,
                    ScheduleOwner::Pool { service_id },
                )))
            })
            .clone()
    }

    pub async fn set_booking_status(
        &self,
        id: Ulid,
        new_status: BookingStatus,
    ) -> Result<BookingInfo, EngineError> {
        let (schedule_id, mut guard) = self.resolve_entry_write(&id).await?;
        let entry = guard.entry(id).ok_or(EngineError::NotFound(id))?;
        let (service_id, staff_id, status, surcharge, span) = match &entry.kind {
            EntryKind::Booking { service_id, staff_id, status, surcharge, .. } => {
                (*service_id, *staff_id, *status, *surcharge, entry.span)
            }
            _ => return Err(EngineError::Invalid("entry is not a booking")),
        };
        validate_transition(status, new_status)?;

        let event = Event::BookingStatusChanged {
            id,
            schedule_id,
            service_id,
            status: new_status,
        };
        self.persist_and_apply(&mut guard, &event).await?;

        Ok(BookingInfo {
            id,
            service_id,
            staff_id,
            start: span.start,
            end: span.end,
            status: new_status,
            surcharge,
        })
    }

    /// Soft delete: the booking stays on the schedule, stops blocking,
    /// and a booking-cancelled event reaches downstream consumers.
    pub async fn cancel_booking(&self, id: Ulid) -> Result<BookingInfo, EngineError> {
        self.set_booking_status(id, BookingStatus::Cancelled).await
    }
}
