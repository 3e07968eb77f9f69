use ulid::Ulid;

use crate::model::{BookingStatus, Ms};

#[derive(Debug)]
pub enum EngineError {
    NotFound(Ulid),
    AlreadyExists(Ulid),
    /// The requested interval overlaps an existing blocking entry.
    Conflict(Ulid),
    /// Pool capacity is saturated across the requested interval.
    CapacityExceeded(u32),
    /// Illegal booking status change.
    InvalidTransition {
        from: BookingStatus,
        to: BookingStatus,
    },
    /// The staff member cannot reach the location in time from their
    /// previous commitment.
    InfeasibleTravel {
        earliest_arrival: Ms,
        slot_start: Ms,
    },
    /// The location falls outside every configured service area.
    OutOfServiceArea,
    /// The requested interval is not covered by business/staff hours.
    OutsideHours,
    /// Service or staff member is deactivated.
    Inactive(Ulid),
    /// Staff member still has pending or confirmed future bookings.
    HasBookings(Ulid),
    Invalid(&'static str),
    LimitExceeded(&'static str),
    WalError(String),
}

impl std::fmt::Display for EngineError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EngineError::NotFound(id) => write!(f, "not found: {id}"),
            EngineError::AlreadyExists(id) => write!(f, "already exists: {id}"),
            EngineError::Conflict(id) => write!(f, "conflict with entry: {id}"),
            EngineError::CapacityExceeded(cap) => {
                write!(f, "capacity {cap} exceeded: all concurrent slots occupied")
            }
            EngineError::InvalidTransition { from, to } => {
                write!(f, "invalid status transition: {from} -> {to}")
            }
            EngineError::InfeasibleTravel { earliest_arrival, slot_start } => {
                write!(
                    f,
                    "travel infeasible: earliest arrival {earliest_arrival} after slot start {slot_start}"
                )
            }
            EngineError::OutOfServiceArea => write!(f, "location outside all service areas"),
            EngineError::OutsideHours => write!(f, "interval outside opening hours"),
            EngineError::Inactive(id) => write!(f, "inactive: {id}"),
            EngineError::HasBookings(id) => {
                write!(f, "cannot delete {id}: has active bookings")
            }
            EngineError::Invalid(msg) => write!(f, "invalid request: {msg}"),
            EngineError::LimitExceeded(msg) => write!(f, "limit exceeded: {msg}"),
            EngineError::WalError(e) => write!(f, "WAL error: {e}"),
        }
    }
}

impl std::error::Error for EngineError {}
