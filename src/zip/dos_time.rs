//! Packed MS-DOS date-time codec.
//!
//! Layout (high to low): 7 bits year since 1980, 4 bits month, 5 bits day,
//! 5 bits hour, 6 bits minute, 5 bits seconds/2. Values are interpreted as UTC.

use chrono::{DateTime, Datelike, NaiveDate, Timelike, Utc};
use std::time::SystemTime;

/// 1980-01-01 00:00:00, the earliest representable instant.
pub const DOS_TIME_MIN: u32 = (1 << 21) | (1 << 16);

/// 2107-12-31 23:59:58, the latest representable instant.
pub const DOS_TIME_MAX: u32 = (127 << 25) | (12 << 21) | (31 << 16) | (23 << 11) | (59 << 5) | 29;

/// Pack `time`, truncating to two-second resolution.
///
/// Instants before 1980 clamp to [`DOS_TIME_MIN`], after 2107 to [`DOS_TIME_MAX`].
pub fn to_dos_time(time: SystemTime) -> u32 {
    let dt: DateTime<Utc> = time.into();
    let year = dt.year();
    if year < 1980 {
        return DOS_TIME_MIN;
    }
    if year > 2107 {
        return DOS_TIME_MAX;
    }

    ((year - 1980) as u32) << 25
        | dt.month() << 21
        | dt.day() << 16
        | dt.hour() << 11
        | dt.minute() << 5
        | dt.second() >> 1
}

/// Unpack a DOS date-time. Returns `None` for values that name no calendar
/// instant, such as the all-zero "unknown" time.
pub fn from_dos_time(packed: u32) -> Option<SystemTime> {
    let year = (packed >> 25) as i32 + 1980;
    let month = (packed >> 21) & 0x0F;
    let day = (packed >> 16) & 0x1F;
    let hour = (packed >> 11) & 0x1F;
    let minute = (packed >> 5) & 0x3F;
    let second = (packed & 0x1F) * 2;

    let naive = NaiveDate::from_ymd_opt(year, month, day)?.and_hms_opt(hour, minute, second)?;
    Some(naive.and_utc().into())
}

/// Split into the (time, date) halves stored in ZIP headers.
pub fn split(packed: u32) -> (u16, u16) {
    ((packed & 0xFFFF) as u16, (packed >> 16) as u16)
}

/// Join the (time, date) halves read from ZIP headers.
pub fn join(time: u16, date: u16) -> u32 {
    u32::from(date) << 16 | u32::from(time)
}
