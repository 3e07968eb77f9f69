//! Defensive ceilings. Exceeding any of these returns
//! `EngineError::LimitExceeded` instead of letting one tenant grow without bound.

use crate::model::{Ms, DAY_MS};

pub const MAX_TENANTS: usize = 1024;
pub const MAX_TENANT_NAME_LEN: usize = 256;

pub const MAX_SERVICES_PER_TENANT: usize = 4096;
pub const MAX_STAFF_PER_TENANT: usize = 4096;
pub const MAX_AREAS_PER_TENANT: usize = 1024;
pub const MAX_ENTRIES_PER_SCHEDULE: usize = 100_000;
pub const MAX_NAME_LEN: usize = 256;
pub const MAX_RANGES_PER_DAY: usize = 16;

pub const MIN_VALID_TIMESTAMP_MS: Ms = 0;
/// 2100-01-01T00:00:00Z — anything beyond this is a client bug.
pub const MAX_VALID_TIMESTAMP_MS: Ms = 4_102_444_800_000;

/// A single booking never spans more than a day.
pub const MAX_BOOKING_DURATION_MS: Ms = DAY_MS;
/// Time off can run long (sabbaticals), but not unbounded.
pub const MAX_TIME_OFF_DURATION_MS: Ms = 366 * DAY_MS;

pub const MIN_SLOT_GRANULARITY_MS: Ms = 60_000;
pub const MAX_SLOT_GRANULARITY_MS: Ms = DAY_MS;
