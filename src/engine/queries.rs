use chrono::NaiveDate;
use ulid::Ulid;

use crate::model::*;

use super::conflict::{check_no_conflict, now_ms};
use super::slots::{generate_slots, intersect_intervals, merge_overlapping};
use super::travel::{assess, locate_area, preceding_located};
use super::{Engine, EngineError, SharedScheduleState};

fn booking_info(entry: &ScheduleEntry) -> Option<BookingInfo> {
    match &entry.kind {
        EntryKind::Booking { service_id, staff_id, status, surcharge, .. } => Some(BookingInfo {
            id: entry.id,
            service_id: *service_id,
            staff_id: *staff_id,
            start: entry.span.start,
            end: entry.span.end,
            status: *status,
            surcharge: *surcharge,
        }),
        _ => None,
    }
}

impl Engine {
    /// Availability pipeline: slot generation from opening hours, conflict
    /// filtering against the schedule, then travel annotation for home
    /// visits. Slots are ephemeral — nothing is held or reserved by a read.
    pub async fn get_availability(
        &self,
        service_id: Ulid,
        date: NaiveDate,
        staff_id: Option<Ulid>,
        location: Option<GeoPoint>,
    ) -> Result<Vec<Slot>, EngineError> {
        let service = self.get_service(&service_id).ok_or(EngineError::NotFound(service_id))?;
        if !service.active {
            return Err(EngineError::Inactive(service_id));
        }
        if location.is_some() && !service.home_visit {
            return Err(EngineError::Invalid("service is not offered as home visit"));
        }

        let (granularity, speed) = {
            let settings = self.settings.read().await;
            (settings.slot_granularity, settings.travel_speed_kmh)
        };
        let business_windows = {
            let hours = self.business_hours.read().await;
            let mut w = hours.windows_for(date);
            w.sort_by_key(|s| s.start);
            merge_overlapping(&w)
        };

        let schedule_id = staff_id.unwrap_or(service_id);
        let schedule = self.get_schedule(&schedule_id);
        if let Some(sid) = staff_id
            && schedule.is_none()
        {
            return Err(EngineError::NotFound(sid));
        }
        let guard = match &schedule {
            Some(rs) => Some(rs.read().await),
            // Pool with no bookings yet — nothing to conflict with.
            None => None,
        };

        let windows = match guard.as_deref().map(|g| &g.owner) {
            Some(ScheduleOwner::Staff { active, weekly, .. }) => {
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
            _ => business_windows,
        };

        let now = now_ms();
        let candidates = generate_slots(&windows, &service, granularity, now);
        let capacity = if staff_id.is_some() { 1 } else { service.max_concurrent };

        let area = location
            .as_ref()
            .map(|loc| locate_area(self.areas.iter().map(|e| e.value().clone()), loc));
        let model = self.travel_model(speed);

        let mut slots = Vec::with_capacity(candidates.len());
        for span in candidates {
            let padded = service.pad(&span);
            let conflicted = match guard.as_deref() {
                Some(g) => check_no_conflict(g, &padded, capacity).is_err(),
                None => false,
            };
            let within_service_area = !matches!(&area, Some(None));

            let slot = if conflicted {
                Slot {
                    span,
                    available: false,
                    surcharge: None,
                    within_service_area,
                    reason: Some(UnavailableReason::Conflict),
                }
            } else {
                match (&area, &location) {
                    (Some(Some(area)), Some(loc)) => {
                        let prev = guard
                            .as_deref()
                            .and_then(|g| preceding_located(g, span.start));
                        let travel = assess(prev, span.start, loc, area, model.as_ref());
                        if travel.feasible {
                            Slot {
                                span,
                                available: true,
                                surcharge: Some(travel.surcharge),
                                within_service_area: true,
                                reason: None,
                            }
                        } else {
                            Slot {
                                span,
                                available: false,
                                surcharge: None,
                                within_service_area: true,
                                reason: Some(UnavailableReason::Travel),
                            }
                        }
                    }
                    (Some(None), _) => Slot {
                        span,
                        available: false,
                        surcharge: None,
                        within_service_area: false,
                        reason: Some(UnavailableReason::OutsideServiceArea),
                    },
                    _ => Slot {
                        span,
                        available: true,
                        surcharge: None,
                        within_service_area: true,
                        reason: None,
                    },
                }
            };
            slots.push(slot);
        }

        Ok(slots)
    }

    pub fn list_services(&self) -> Vec<Service> {
        let mut services: Vec<Service> =
            self.services.iter().map(|e| e.value().clone()).collect();
        services.sort_by_key(|s| s.id);
        services
    }

    pub fn list_areas(&self) -> Vec<ServiceArea> {
        let mut areas: Vec<ServiceArea> = self.areas.iter().map(|e| e.value().clone()).collect();
        areas.sort_by_key(|a| a.id);
        areas
    }

    pub async fn list_staff(&self) -> Vec<StaffInfo> {
        let schedules: Vec<SharedScheduleState> =
            self.schedules.iter().map(|e| e.value().clone()).collect();
        let mut staff = Vec::new();
        for rs in schedules {
            let guard = rs.read().await;
            if let ScheduleOwner::Staff { name, active, .. } = &guard.owner {
                staff.push(StaffInfo {
                    id: guard.id,
                    name: name.clone(),
                    active: *active,
                });
            }
        }
        staff.sort_by_key(|s| s.id);
        staff
    }

    pub async fn list_bookings_for_staff(
        &self,
        staff_id: Ulid,
    ) -> Result<Vec<BookingInfo>, EngineError> {
        let rs = self.get_schedule(&staff_id).ok_or(EngineError::NotFound(staff_id))?;
        let guard = rs.read().await;
        if !guard.is_staff() {
            return Err(EngineError::NotFound(staff_id));
        }
        Ok(guard.entries.iter().filter_map(booking_info).collect())
    }

    pub async fn list_bookings_for_service(
        &self,
        service_id: Ulid,
    ) -> Result<Vec<BookingInfo>, EngineError> {
        if !self.services.contains_key(&service_id) {
            return Err(EngineError::NotFound(service_id));
        }
        let schedules: Vec<SharedScheduleState> =
            self.schedules.iter().map(|e| e.value().clone()).collect();
        let mut bookings = Vec::new();
        for rs in schedules {
            let guard = rs.read().await;
            bookings.extend(
                guard
                    .entries
                    .iter()
                    .filter_map(booking_info)
                    .filter(|b| b.service_id == service_id),
            );
        }
        bookings.sort_by_key(|b| (b.start, b.id));
        Ok(bookings)
    }

    pub async fn get_booking(&self, id: Ulid) -> Result<BookingInfo, EngineError> {
        let schedule_id = self
            .get_schedule_for_entry(&id)
            .ok_or(EngineError::NotFound(id))?;
        let rs = self.get_schedule(&schedule_id).ok_or(EngineError::NotFound(schedule_id))?;
        let guard = rs.read().await;
        guard
            .entry(id)
            .and_then(booking_info)
            .ok_or(EngineError::NotFound(id))
    }
}
