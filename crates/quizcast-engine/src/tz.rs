//! Civil-timezone conversions.
//!
//! Fire rules and day windows are always computed in one fixed civil
//! timezone (West Africa Time), so "10:00" means 10:00 Lagos wall-clock
//! regardless of the host machine's configured zone. Kept as pure
//! functions — this is the subtlest correctness point in the engine.

use chrono::{DateTime, Datelike, TimeZone, Timelike, Utc};
use chrono_tz::Tz;

/// The engine's civil timezone. WAT (UTC+1, no daylight saving).
pub const CIVIL_TZ: Tz = chrono_tz::Africa::Lagos;

/// Wall-clock fields of an instant in the civil timezone.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CivilFields {
    pub year: i32,
    pub month: u32,
    pub day: u32,
    pub hour: u32,
    pub minute: u32,
}

/// Project a UTC instant onto the civil timezone's wall clock.
pub fn civil_fields(instant: DateTime<Utc>) -> CivilFields {
    let local = instant.with_timezone(&CIVIL_TZ);
    CivilFields {
        year: local.year(),
        month: local.month(),
        day: local.day(),
        hour: local.hour(),
        minute: local.minute(),
    }
}

/// UTC bounds `[start, end)` of the civil day containing `instant`.
/// Used for "no further jobs today" checks and day-scoped summaries.
pub fn day_bounds(instant: DateTime<Utc>) -> (DateTime<Utc>, DateTime<Utc>) {
    let local = instant.with_timezone(&CIVIL_TZ);
    let midnight = local
        .date_naive()
        .and_hms_opt(0, 0, 0)
        .unwrap_or_else(|| local.naive_local());
    // WAT has no DST, so local midnight is always unambiguous.
    let start = CIVIL_TZ
        .from_local_datetime(&midnight)
        .earliest()
        .unwrap_or(local)
        .with_timezone(&Utc);
    (start, start + chrono::Duration::days(1))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_civil_fields_offset() {
        // 23:30 UTC is 00:30 the next day in Lagos (UTC+1).
        let instant = Utc.with_ymd_and_hms(2025, 3, 9, 23, 30, 0).unwrap();
        let fields = civil_fields(instant);
        assert_eq!(
            fields,
            CivilFields {
                year: 2025,
                month: 3,
                day: 10,
                hour: 0,
                minute: 30,
            }
        );
    }

    #[test]
    fn test_civil_fields_same_day() {
        let instant = Utc.with_ymd_and_hms(2025, 6, 1, 9, 0, 0).unwrap();
        let fields = civil_fields(instant);
        assert_eq!(fields.day, 1);
        assert_eq!(fields.hour, 10);
    }

    #[test]
    fn test_day_bounds_cover_instant() {
        let instant = Utc.with_ymd_and_hms(2025, 3, 9, 23, 30, 0).unwrap();
        let (start, end) = day_bounds(instant);
        assert!(start <= instant && instant < end);
        assert_eq!(end - start, chrono::Duration::days(1));
        // The Lagos day containing 23:30 UTC starts at 23:00 UTC.
        assert_eq!(start, Utc.with_ymd_and_hms(2025, 3, 9, 23, 0, 0).unwrap());
    }

    #[test]
    fn test_day_bounds_start_is_local_midnight() {
        let instant = Utc.with_ymd_and_hms(2025, 6, 1, 9, 0, 0).unwrap();
        let (start, _) = day_bounds(instant);
        let fields = civil_fields(start);
        assert_eq!((fields.hour, fields.minute), (0, 0));
    }
}
