use chrono::{Datelike, Timelike};

use crate::db::models::{Schedule, TrackedApp};

/// Whether the hard schedule block is active at `now` (local wall-clock time).
///
/// Hours are the half-open range `[start_hour, end_hour)`. A zero-width or
/// inverted window never blocks.
pub fn is_blocking<T: Datelike + Timelike>(schedule: &Schedule, now: &T) -> bool {
    if !schedule.enabled {
        return false;
    }

    if schedule.start_hour >= schedule.end_hour {
        return false;
    }

    let hour = now.hour();
    let in_window = hour >= u32::from(schedule.start_hour) && hour < u32::from(schedule.end_hour);

    in_window && schedule.days.contains(now.weekday())
}

pub fn is_app_blocking<T: Datelike + Timelike>(app: &TrackedApp, now: &T) -> bool {
    is_blocking(&app.schedule, now)
}
