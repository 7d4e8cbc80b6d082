//! Time bucketing for readings
//!
//! A reading taken at a unix timestamp falls into a weekday (0 = Monday) and a
//! time slice of `slice_minutes` minutes counted from midnight UTC.

use anyhow::Result;
use chrono::{DateTime, Datelike, Timelike};

const MINUTES_PER_DAY: u32 = 24 * 60;

/// Number of time slices per day for a given slice width.
///
/// The width must be non-zero and divide a day evenly.
pub fn slices_per_day(slice_minutes: u32) -> Result<u32> {
    if slice_minutes == 0 || MINUTES_PER_DAY % slice_minutes != 0 {
        anyhow::bail!(
            "slice width must divide {} minutes evenly (got {})",
            MINUTES_PER_DAY,
            slice_minutes
        );
    }
    Ok(MINUTES_PER_DAY / slice_minutes)
}

/// Map a unix timestamp (seconds) to its `(weekday, time_slice)` bucket.
pub fn bucket_of(timestamp_secs: i64, slice_minutes: u32) -> Result<(i32, i32)> {
    slices_per_day(slice_minutes)?;
    let at = DateTime::from_timestamp(timestamp_secs, 0)
        .ok_or_else(|| anyhow::anyhow!("timestamp out of range: {}", timestamp_secs))?;
    let weekday = at.weekday().num_days_from_monday() as i32;
    let minute_of_day = at.hour() * 60 + at.minute();
    Ok((weekday, (minute_of_day / slice_minutes) as i32))
}

/// Current unix time in seconds
pub fn now_secs() -> i64 {
    chrono::Utc::now().timestamp()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_slices_per_day() {
        assert_eq!(slices_per_day(15).unwrap(), 96);
        assert_eq!(slices_per_day(60).unwrap(), 24);
        assert!(slices_per_day(0).is_err());
        assert!(slices_per_day(7).is_err());
    }

    #[test]
    fn test_bucket_of() {
        // 2024-01-01 was a Monday
        let monday_midnight = 1_704_067_200;
        assert_eq!(bucket_of(monday_midnight, 15).unwrap(), (0, 0));

        // Tuesday 00:47 -> slice 3 of 15 minutes
        let tuesday = monday_midnight + 86_400 + 47 * 60;
        assert_eq!(bucket_of(tuesday, 15).unwrap(), (1, 3));

        // Sunday 23:59 -> last slice
        let sunday = monday_midnight + 6 * 86_400 + 23 * 3600 + 59 * 60;
        assert_eq!(bucket_of(sunday, 15).unwrap(), (6, 95));
    }

    #[test]
    fn test_now_is_recent() {
        assert!(now_secs() > 1_600_000_000); // After 2020
    }
}
