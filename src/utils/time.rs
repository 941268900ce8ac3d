use chrono::{DateTime, Duration, Local, TimeZone, Utc};

/// Start of the local calendar day containing `now`, as a UTC instant.
///
/// Falls back to `now - 24h` if local midnight does not exist (DST gap).
pub fn start_of_local_day(now: DateTime<Utc>) -> DateTime<Utc> {
    start_of_day_in(now, &Local)
}

pub fn start_of_day_in<Tz: TimeZone>(now: DateTime<Utc>, tz: &Tz) -> DateTime<Utc> {
    let local_date = now.with_timezone(tz).date_naive();
    local_date
        .and_hms_opt(0, 0, 0)
        .and_then(|midnight| tz.from_local_datetime(&midnight).earliest())
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or_else(|| now - Duration::hours(24))
}

pub fn one_hour_before(now: DateTime<Utc>) -> DateTime<Utc> {
    now - Duration::hours(1)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{FixedOffset, Timelike};

    #[test]
    fn start_of_day_uses_the_given_offset() {
        let tz = FixedOffset::east_opt(2 * 3600).unwrap();
        // 23:30 UTC is 01:30 the next day at +02:00.
        let now = Utc.with_ymd_and_hms(2024, 3, 4, 23, 30, 0).unwrap();
        let start = start_of_day_in(now, &tz);
        assert_eq!(start, Utc.with_ymd_and_hms(2024, 3, 4, 22, 0, 0).unwrap());
    }

    #[test]
    fn start_of_local_day_is_never_after_now() {
        let now = Utc::now();
        let start = start_of_local_day(now);
        assert!(start <= now);
        assert_eq!(start.with_timezone(&Local).minute(), 0);
    }
}
