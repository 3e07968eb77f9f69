mod conflict;
mod error;
mod mutations;
mod queries;
mod slots;
mod travel;
#[cfg(test)]
mod tests;

pub use conflict::compute_saturated_spans;
pub use error::EngineError;
pub use slots::{generate_slots, intersect_intervals, merge_overlapping, subtract_intervals};
pub use travel::{haversine_km, HaversineTravel, TravelEstimate, TravelModel};

use std::io;
use std::path::PathBuf;
use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::{mpsc, oneshot, RwLock};
use ulid::Ulid;

use crate::model::*;
use crate::notify::NotifyHub;
use crate::wal::Wal;

pub type SharedScheduleState = Arc<RwLock<ScheduleState>>;

// ── Group-commit WAL channel ─────────────────────────────

pub(super) enum WalCommand {
    Append {
        event: Event,
        response: oneshot::Sender<io::Result<()>>,
    },
    Compact {
        events: Vec<Event>,
        response: oneshot::Sender<io::Result<()>>,
    },
    AppendsSinceCompact {
        response: oneshot::Sender<u64>,
    },
}

/// Background task that owns the WAL and batches appends for group commit:
/// block for the first Append, drain whatever else is already queued, write
/// the whole batch with one fsync, then answer every waiting sender.
async fn wal_writer_loop(mut wal: Wal, mut rx: mpsc::Receiver<WalCommand>) {
    while let Some(cmd) = rx.recv().await {
        match cmd {
            WalCommand::Append { event, response } => {
                let mut batch = vec![(event, response)];

                // Drain all immediately available appends
                loop {
                    match rx.try_recv() {
                        Ok(WalCommand::Append { event, response }) => {
                            batch.push((event, response));
                        }
                        Ok(other) => {
                            // Flush current batch first, then handle the non-append command
                            metrics::histogram!(crate::observability::WAL_FLUSH_BATCH_SIZE)
                                .record(batch.len() as f64);
                            let flush_start = std::time::Instant::now();
                            let result = flush_batch(&mut wal, &mut batch);
                            metrics::histogram!(crate::observability::WAL_FLUSH_DURATION_SECONDS)
                                .record(flush_start.elapsed().as_secs_f64());
                            respond_batch(&mut batch, &result);
                            handle_non_append(&mut wal, other);
                            break;
                        }
                        Err(_) => break, // channel empty — flush batch
                    }
                }

                if !batch.is_empty() {
                    metrics::histogram!(crate::observability::WAL_FLUSH_BATCH_SIZE)
                        .record(batch.len() as f64);
                    let flush_start = std::time::Instant::now();
                    let result = flush_batch(&mut wal, &mut batch);
                    metrics::histogram!(crate::observability::WAL_FLUSH_DURATION_SECONDS)
                        .record(flush_start.elapsed().as_secs_f64());
                    respond_batch(&mut batch, &result);
                }
            }
            other => handle_non_append(&mut wal, other),
        }
    }
}

fn flush_batch(
    wal: &mut Wal,
    batch: &mut [(Event, oneshot::Sender<io::Result<()>>)],
) -> io::Result<()> {
    let mut append_err: Option<io::Error> = None;
    for (event, _) in batch.iter() {
        if let Err(e) = wal.push(event) {
            append_err = Some(e);
            break;
        }
    }
    // Sync even on a push error so partially buffered bytes don't leak
    // into the next batch (callers were told this batch failed).
    let flush_err = wal.sync().err();
    if let Some(e) = append_err {
        return Err(e);
    }
    if let Some(e) = flush_err {
        return Err(e);
    }
    Ok(())
}

fn respond_batch(batch: &mut Vec<(Event, oneshot::Sender<io::Result<()>>)>, result: &io::Result<()>) {
    for (_, tx) in batch.drain(..) {
        let r = match result {
            Ok(()) => Ok(()),
            Err(e) => Err(io::Error::new(e.kind(), e.to_string())),
        };
        let _ = tx.send(r);
    }
}

fn handle_non_append(wal: &mut Wal, cmd: WalCommand) {
    match cmd {
        WalCommand::Compact { events, response } => {
            let result = Wal::write_snapshot(wal.path(), &events)
                .and_then(|()| wal.swap_in_snapshot());
            let _ = response.send(result);
        }
        WalCommand::AppendsSinceCompact { response } => {
            let _ = response.send(wal.entries_since_compact());
        }
        WalCommand::Append { .. } => unreachable!(),
    }
}

/// One tenant's booking engine: configuration registries, per-schedule
/// timelines, and the WAL that makes all of it durable.
pub struct Engine {
    pub services: DashMap<Ulid, Service>,
    /// Keyed by staff id, or by service id for staff-less pools.
    pub schedules: DashMap<Ulid, SharedScheduleState>,
    pub areas: DashMap<Ulid, ServiceArea>,
    pub business_hours: RwLock<WeeklyHours>,
    pub settings: RwLock<TenantSettings>,
    pub notify: Arc<NotifyHub>,
    pub(super) wal_tx: mpsc::Sender<WalCommand>,
    /// Reverse lookup: entry (booking/time-off) id → schedule id
    pub(super) entry_to_schedule: DashMap<Ulid, Ulid>,
    travel_override: Option<Arc<dyn TravelModel>>,
}

impl std::fmt::Debug for Engine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Engine")
            .field("services", &self.services.len())
            .field("schedules", &self.schedules.len())
            .field("areas", &self.areas.len())
            .finish_non_exhaustive()
    }
}

/// Apply a schedule-level event (no locking — caller holds the lock).
fn apply_to_schedule(rs: &mut ScheduleState, event: &Event, entry_map: &DashMap<Ulid, Ulid>) {
    match event {
        Event::StaffHoursAdded { weekday, range, .. } => {
            if let ScheduleOwner::Staff { weekly, .. } = &mut rs.owner {
                weekly.add_range(*weekday as usize, *range);
            }
        }
        Event::StaffHoursCleared { weekday, .. } => {
            if let ScheduleOwner::Staff { weekly, .. } = &mut rs.owner {
                weekly.clear_day(*weekday as usize);
            }
        }
        Event::StaffActiveSet { active, .. } => {
            if let ScheduleOwner::Staff { active: a, .. } = &mut rs.owner {
                *a = *active;
            }
        }
        Event::TimeOffAdded { id, staff_id, span } => {
            rs.insert_entry(ScheduleEntry {
                id: *id,
                span: *span,
                padded: *span,
                kind: EntryKind::TimeOff,
            });
            entry_map.insert(*id, *staff_id);
        }
        Event::TimeOffRemoved { id, .. } => {
            rs.remove_entry(*id);
            entry_map.remove(id);
        }
        Event::BookingReserved {
            id,
            schedule_id,
            service_id,
            staff_id,
            span,
            padded,
            location,
            surcharge,
        } => {
            rs.insert_entry(ScheduleEntry {
                id: *id,
                span: *span,
                padded: *padded,
                kind: EntryKind::Booking {
                    service_id: *service_id,
                    staff_id: *staff_id,
                    status: BookingStatus::Pending,
                    location: *location,
                    surcharge: *surcharge,
                },
            });
            entry_map.insert(*id, *schedule_id);
        }
        Event::BookingStatusChanged { id, status, .. } => {
            if let Some(entry) = rs.entry_mut(*id)
                && let EntryKind::Booking { status: s, .. } = &mut entry.kind
            {
                *s = *status;
            }
        }
        // Everything else is registry-level, not schedule-level
        _ => {}
    }
}

/// Extract the schedule id from a schedule-level event.
fn event_schedule_id(event: &Event) -> Option<Ulid> {
    match event {
        Event::StaffHoursAdded { staff_id, .. }
        | Event::StaffHoursCleared { staff_id, .. }
        | Event::TimeOffAdded { staff_id, .. }
        | Event::TimeOffRemoved { staff_id, .. } => Some(*staff_id),
        Event::StaffActiveSet { id, .. } => Some(*id),
        Event::BookingReserved { schedule_id, .. }
        | Event::BookingStatusChanged { schedule_id, .. } => Some(*schedule_id),
        _ => None,
    }
}

impl Engine {
    pub fn new(wal_path: PathBuf, notify: Arc<NotifyHub>) -> io::Result<Self> {
        let events = Wal::replay(&wal_path)?;
        let wal = Wal::open(&wal_path)?;
        let (wal_tx, wal_rx) = mpsc::channel(4096);
        tokio::spawn(wal_writer_loop(wal, wal_rx));

        let engine = Self {
            services: DashMap::new(),
            schedules: DashMap::new(),
            areas: DashMap::new(),
            business_hours: RwLock::new(WeeklyHours::default()),
            settings: RwLock::new(TenantSettings::default()),
            notify,
            wal_tx,
            entry_to_schedule: DashMap::new(),
            travel_override: None,
        };

        // Replay events — we're the sole owner of these Arcs, so try_read/try_write
        // always succeed instantly (no contention). Never use blocking_read/blocking_write
        // here because this may run inside an async context (e.g. lazy tenant creation).
        for event in &events {
            engine.replay_event(event);
        }

        Ok(engine)
    }

    /// Substitute the travel estimator (routed backends, test doubles).
    pub fn with_travel_model(mut self, model: Arc<dyn TravelModel>) -> Self {
        self.travel_override = Some(model);
        self
    }

    pub(super) fn travel_model(&self, speed_kmh: f64) -> Arc<dyn TravelModel> {
        match &self.travel_override {
            Some(m) => m.clone(),
            None => Arc::new(HaversineTravel { speed_kmh }),
        }
    }

    fn replay_event(&self, event: &Event) {
        match event {
            Event::ServiceCreated {
                id,
                name,
                duration,
                buffer_before,
                buffer_after,
                home_visit,
                max_concurrent,
            } => {
                self.services.insert(
                    *id,
                    Service {
                        id: *id,
                        name: name.clone(),
                        duration: *duration,
                        buffer_before: *buffer_before,
                        buffer_after: *buffer_after,
                        home_visit: *home_visit,
                        max_concurrent: *max_concurrent,
                        active: true,
                    },
                );
            }
            Event::ServiceActiveSet { id, active } => {
                if let Some(mut svc) = self.services.get_mut(id) {
                    svc.active = *active;
                }
            }
            Event::ServiceDeleted { id } => {
                self.services.remove(id);
                self.drop_schedule(id);
            }
            Event::StaffCreated { id, name } => {
                let owner = ScheduleOwner::Staff {
                    name: name.clone(),
                    active: true,
                    weekly: WeeklyHours::default(),
                };
                self.schedules
                    .insert(*id, Arc::new(RwLock::new(ScheduleState::new(*id, owner))));
            }
            Event::StaffDeleted { id } => {
                self.drop_schedule(id);
            }
            Event::BusinessHoursAdded { weekday, range } => {
                if let Ok(mut hours) = self.business_hours.try_write() {
                    hours.add_range(*weekday as usize, *range);
                }
            }
            Event::BusinessHoursCleared { weekday } => {
                if let Ok(mut hours) = self.business_hours.try_write() {
                    hours.clear_day(*weekday as usize);
                }
            }
            Event::AreaCreated {
                id,
                name,
                center,
                radius_km,
                base_surcharge,
                per_km_surcharge,
            } => {
                self.areas.insert(
                    *id,
                    ServiceArea {
                        id: *id,
                        name: name.clone(),
                        center: *center,
                        radius_km: *radius_km,
                        base_surcharge: *base_surcharge,
                        per_km_surcharge: *per_km_surcharge,
                    },
                );
            }
            Event::AreaDeleted { id } => {
                self.areas.remove(id);
            }
            Event::SettingsChanged { slot_granularity, travel_speed_kmh } => {
                if let Ok(mut settings) = self.settings.try_write() {
                    settings.slot_granularity = *slot_granularity;
                    settings.travel_speed_kmh = *travel_speed_kmh;
                }
            }
            other => {
                let Some(schedule_id) = event_schedule_id(other) else {
                    return;
                };
                // Staff-less pools materialize on first booking.
                if let Event::BookingReserved { staff_id: None, service_id, .. } = other {
                    self.schedules.entry(schedule_id).or_insert_with(|| {
                        Arc::new(RwLock::new(ScheduleState::new(
                            schedule_id,
                            ScheduleOwner::Pool { service_id: *service_id },
                        )))
                    });
                }
                if let Some(entry) = self.schedules.get(&schedule_id) {
                    let rs_arc = entry.clone();
                    let mut guard = rs_arc.try_write().expect("replay: uncontended write");
                    apply_to_schedule(&mut guard, other, &self.entry_to_schedule);
                }
            }
        }
    }

    /// Remove a schedule and every index entry pointing into it.
    fn drop_schedule(&self, id: &Ulid) {
        if let Some((_, rs)) = self.schedules.remove(id) {
            let guard = rs.try_read().expect("drop_schedule: uncontended read");
            for entry in &guard.entries {
                self.entry_to_schedule.remove(&entry.id);
            }
        }
    }

    /// Write event to WAL via the background group-commit writer.
    pub(super) async fn wal_append(&self, event: &Event) -> Result<(), EngineError> {
        let (tx, rx) = oneshot::channel();
        self.wal_tx
            .send(WalCommand::Append {
                event: event.clone(),
                response: tx,
            })
            .await
            .map_err(|_| EngineError::WalError("WAL writer shut down".into()))?;
        rx.await
            .map_err(|_| EngineError::WalError("WAL writer dropped response".into()))?
            .map_err(|e| EngineError::WalError(e.to_string()))
    }

    pub fn get_schedule(&self, id: &Ulid) -> Option<SharedScheduleState> {
        self.schedules.get(id).map(|e| e.value().clone())
    }

    pub fn get_schedule_for_entry(&self, entry_id: &Ulid) -> Option<Ulid> {
        self.entry_to_schedule.get(entry_id).map(|e| *e.value())
    }

    pub fn get_service(&self, id: &Ulid) -> Option<Service> {
        self.services.get(id).map(|e| e.value().clone())
    }

    /// WAL-append + apply + notify in one call. Eliminates the repeated 3-line pattern.
    pub(super) async fn persist_and_apply(
        &self,
        rs: &mut ScheduleState,
        event: &Event,
    ) -> Result<(), EngineError> {
        self.wal_append(event).await?;
        apply_to_schedule(rs, event, &self.entry_to_schedule);
        self.route_notifications(event);
        Ok(())
    }

    /// Booking events fan out to both sides of the booking: the schedule
    /// owner (staff or pool) and the service channel.
    pub(super) fn route_notifications(&self, event: &Event) {
        match event {
            Event::BookingReserved { schedule_id, service_id, .. }
            | Event::BookingStatusChanged { schedule_id, service_id, .. } => {
                self.notify.send(*service_id, event);
                if schedule_id != service_id {
                    self.notify.send(*schedule_id, event);
                }
            }
            Event::TimeOffAdded { staff_id, .. }
            | Event::TimeOffRemoved { staff_id, .. }
            | Event::StaffHoursAdded { staff_id, .. }
            | Event::StaffHoursCleared { staff_id, .. } => {
                self.notify.send(*staff_id, event);
            }
            Event::StaffCreated { id, .. }
            | Event::StaffActiveSet { id, .. }
            | Event::StaffDeleted { id } => {
                self.notify.send(*id, event);
            }
            Event::ServiceCreated { id, .. }
            | Event::ServiceActiveSet { id, .. }
            | Event::ServiceDeleted { id } => {
                self.notify.send(*id, event);
            }
            // Tenant-global configuration has no per-entity channel
            _ => {}
        }
    }

    /// Lookup entry → schedule, get schedule, acquire write lock.
    pub(super) async fn resolve_entry_write(
        &self,
        entry_id: &Ulid,
    ) -> Result<(Ulid, tokio::sync::OwnedRwLockWriteGuard<ScheduleState>), EngineError> {
        let schedule_id = self
            .get_schedule_for_entry(entry_id)
            .ok_or(EngineError::NotFound(*entry_id))?;
        let rs = self
            .get_schedule(&schedule_id)
            .ok_or(EngineError::NotFound(schedule_id))?;
        let guard = rs.write_owned().await;
        Ok((schedule_id, guard))
    }

    pub async fn wal_appends_since_compact(&self) -> u64 {
        let (tx, rx) = oneshot::channel();
        if self
            .wal_tx
            .send(WalCommand::AppendsSinceCompact { response: tx })
            .await
            .is_err()
        {
            return 0;
        }
        rx.await.unwrap_or(0)
    }

    /// Compact the WAL by rewriting it with only the events needed to recreate the current state.
    pub async fn compact_wal(&self) -> Result<(), EngineError> {
        let mut events = Vec::new();

        {
            let settings = self.settings.read().await;
            events.push(Event::SettingsChanged {
                slot_granularity: settings.slot_granularity,
                travel_speed_kmh: settings.travel_speed_kmh,
            });
        }
        {
            let hours = self.business_hours.read().await;
            for weekday in 0..7u8 {
                for range in hours.day(weekday as usize) {
                    events.push(Event::BusinessHoursAdded { weekday, range: *range });
                }
            }
        }
        for entry in self.services.iter() {
            let svc = entry.value();
            events.push(Event::ServiceCreated {
                id: svc.id,
                name: svc.name.clone(),
                duration: svc.duration,
                buffer_before: svc.buffer_before,
                buffer_after: svc.buffer_after,
                home_visit: svc.home_visit,
                max_concurrent: svc.max_concurrent,
            });
            if !svc.active {
                events.push(Event::ServiceActiveSet { id: svc.id, active: false });
            }
        }
        for entry in self.areas.iter() {
            let area = entry.value();
            events.push(Event::AreaCreated {
                id: area.id,
                name: area.name.clone(),
                center: area.center,
                radius_km: area.radius_km,
                base_surcharge: area.base_surcharge,
                per_km_surcharge: area.per_km_surcharge,
            });
        }

        let schedule_ids: Vec<Ulid> = self.schedules.iter().map(|e| *e.key()).collect();
        for schedule_id in schedule_ids {
            let Some(rs) = self.get_schedule(&schedule_id) else {
                continue;
            };
            let guard = rs.read().await;

            if let ScheduleOwner::Staff { name, active, weekly } = &guard.owner {
                events.push(Event::StaffCreated { id: guard.id, name: name.clone() });
                for weekday in 0..7u8 {
                    for range in weekly.day(weekday as usize) {
                        events.push(Event::StaffHoursAdded {
                            staff_id: guard.id,
                            weekday,
                            range: *range,
                        });
                    }
                }
                if !*active {
                    events.push(Event::StaffActiveSet { id: guard.id, active: false });
                }
            }

            for entry in &guard.entries {
                match &entry.kind {
                    EntryKind::TimeOff => events.push(Event::TimeOffAdded {
                        id: entry.id,
                        staff_id: guard.id,
                        span: entry.span,
                    }),
                    EntryKind::Booking { service_id, staff_id, status, location, surcharge } => {
                        events.push(Event::BookingReserved {
                            id: entry.id,
                            schedule_id: guard.id,
                            service_id: *service_id,
                            staff_id: *staff_id,
                            span: entry.span,
                            padded: entry.padded,
                            location: *location,
                            surcharge: *surcharge,
                        });
                        if *status != BookingStatus::Pending {
                            events.push(Event::BookingStatusChanged {
                                id: entry.id,
                                schedule_id: guard.id,
                                service_id: *service_id,
                                status: *status,
                            });
                        }
                    }
                }
            }
        }

        let (tx, rx) = oneshot::channel();
        self.wal_tx
            .send(WalCommand::Compact { events, response: tx })
            .await
            .map_err(|_| EngineError::WalError("WAL writer shut down".into()))?;
        rx.await
            .map_err(|_| EngineError::WalError("WAL writer dropped response".into()))?
            .map_err(|e| EngineError::WalError(e.to_string()))
    }
}
