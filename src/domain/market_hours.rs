//! NSE market-hours window: IST Monday-Friday, 09:15:00-15:30:00 inclusive.
//!
//! IST is a fixed +05:30 offset (no DST), so a `FixedOffset` is sufficient.
//! All callers pass UTC instants; IST exists only inside this module.

use chrono::{DateTime, Datelike, FixedOffset, NaiveTime, Timelike, Utc, Weekday};

const IST_OFFSET_SECS: i32 = 5 * 3600 + 30 * 60;

/// The UTC instant rendered in IST.
pub fn to_ist(now: DateTime<Utc>) -> DateTime<FixedOffset> {
    now.with_timezone(&FixedOffset::east_opt(IST_OFFSET_SECS).unwrap())
}

/// True iff the NSE cash/derivatives session is open at `now`.
pub fn is_market_open(now: DateTime<Utc>) -> bool {
    let ist = to_ist(now);
    if matches!(ist.weekday(), Weekday::Sat | Weekday::Sun) {
        return false;
    }
    let t = ist.time();
    let open = NaiveTime::from_hms_opt(9, 15, 0).unwrap();
    let close = NaiveTime::from_hms_opt(15, 30, 0).unwrap();
    t >= open && t <= close
}

/// Seconds until the next occurrence of `hh:mm` IST, for daily schedules.
pub fn seconds_until_ist(now: DateTime<Utc>, hour: u32, minute: u32) -> i64 {
    let ist = to_ist(now);
    let target_today = ist
        .date_naive()
        .and_hms_opt(hour, minute, 0)
        .expect("valid wall clock");
    let current = ist.naive_local();
    let target = if current < target_today {
        target_today
    } else {
        target_today + chrono::Duration::days(1)
    };
    (target - current).num_seconds().max(0)
}

/// Midnight-IST day key (`YYYY-MM-DD`) used for daily counters and resets.
pub fn ist_day_key(now: DateTime<Utc>) -> String {
    to_ist(now).format("%Y-%m-%d").to_string()
}

/// Hour of day in IST; used by daily jobs gating on wall clock.
pub fn ist_hour(now: DateTime<Utc>) -> u32 {
    to_ist(now).hour()
}
