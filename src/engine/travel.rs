use crate::model::*;

use super::EngineError;

const EARTH_RADIUS_KM: f64 = 6371.0;

/// Great-circle distance between two WGS84 points.
pub fn haversine_km(a: &GeoPoint, b: &GeoPoint) -> f64 {
    let lat1 = a.lat.to_radians();
    let lat2 = b.lat.to_radians();
    let dlat = (b.lat - a.lat).to_radians();
    let dlng = (b.lng - a.lng).to_radians();

    let h = (dlat / 2.0).sin().powi(2) + lat1.cos() * lat2.cos() * (dlng / 2.0).sin().powi(2);
    2.0 * EARTH_RADIUS_KM * h.sqrt().asin()
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TravelEstimate {
    pub distance_km: f64,
    pub duration: Ms,
}

/// Pluggable distance/duration estimator. The production model is
/// straight-line haversine at a configured average speed; tests and
/// future routed backends substitute their own.
pub trait TravelModel: Send + Sync {
    fn estimate(&self, from: &GeoPoint, to: &GeoPoint) -> TravelEstimate;
}

#[derive(Debug, Clone, Copy)]
pub struct HaversineTravel {
    pub speed_kmh: f64,
}

impl TravelModel for HaversineTravel {
    fn estimate(&self, from: &GeoPoint, to: &GeoPoint) -> TravelEstimate {
        let distance_km = haversine_km(from, to);
        let hours = distance_km / self.speed_kmh.max(1.0);
        TravelEstimate {
            distance_km,
            duration: (hours * 3_600_000.0).ceil() as Ms,
        }
    }
}

impl ServiceArea {
    pub fn contains(&self, point: &GeoPoint) -> bool {
        haversine_km(&self.center, point) <= self.radius_km
    }
}

/// Pick the area covering `point`; the one with the nearest center wins
/// when areas overlap, which keeps the choice deterministic.
pub fn locate_area<'a, I>(areas: I, point: &GeoPoint) -> Option<ServiceArea>
where
    I: Iterator<Item = ServiceArea>,
{
    areas
        .filter(|a| a.contains(point))
        .min_by(|a, b| {
            let da = haversine_km(&a.center, point);
            let db = haversine_km(&b.center, point);
            da.total_cmp(&db)
        })
}

/// Base surcharge plus the distance-based component, rounded to whole
/// cents. Monotonically non-decreasing in distance.
pub fn surcharge_cents(area: &ServiceArea, distance_km: f64) -> Cents {
    area.base_surcharge + (area.per_km_surcharge as f64 * distance_km).round() as Cents
}

/// The staff member's prior located commitment ending closest before
/// `before`: the reference point for travel feasibility and surcharge.
pub fn preceding_located(schedule: &ScheduleState, before: Ms) -> Option<(Span, GeoPoint)> {
    schedule
        .entries
        .iter()
        .filter(|e| e.blocks() && e.span.end <= before)
        .filter_map(|e| match &e.kind {
            EntryKind::Booking { location: Some(loc), .. } => Some((e.span, *loc)),
            _ => None,
        })
        .max_by_key(|(span, _)| span.end)
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TravelAssessment {
    pub feasible: bool,
    pub earliest_arrival: Ms,
    pub surcharge: Cents,
}

/// Assess one home-visit candidate against the preceding commitment.
/// With no located predecessor the slot is trivially reachable and pays
/// the base surcharge only.
pub fn assess(
    prev: Option<(Span, GeoPoint)>,
    slot_start: Ms,
    destination: &GeoPoint,
    area: &ServiceArea,
    model: &dyn TravelModel,
) -> TravelAssessment {
    match prev {
        None => TravelAssessment {
            feasible: true,
            earliest_arrival: slot_start,
            surcharge: area.base_surcharge,
        },
        Some((prev_span, prev_loc)) => {
            let est = model.estimate(&prev_loc, destination);
            let earliest_arrival = prev_span.end + est.duration;
            TravelAssessment {
                feasible: earliest_arrival <= slot_start,
                earliest_arrival,
                surcharge: surcharge_cents(area, est.distance_km),
            }
        }
    }
}

/// Same assessment shaped as a reservation-path error.
pub fn check_feasible(
    prev: Option<(Span, GeoPoint)>,
    slot_start: Ms,
    destination: &GeoPoint,
    area: &ServiceArea,
    model: &dyn TravelModel,
) -> Result<Cents, EngineError> {
    let assessment = assess(prev, slot_start, destination, area, model);
    if assessment.feasible {
        Ok(assessment.surcharge)
    } else {
        Err(EngineError::InfeasibleTravel {
            earliest_arrival: assessment.earliest_arrival,
            slot_start,
        })
    }
}
