use chrono::{DateTime, Datelike, Timelike, Utc, Weekday};
use chrono_tz::Asia::Shanghai;

const MORNING_OPEN: u32 = 9 * 60 + 30;
const MORNING_CLOSE: u32 = 11 * 60 + 30;
const AFTERNOON_OPEN: u32 = 13 * 60;
const AFTERNOON_CLOSE: u32 = 15 * 60;

/// Whether the A-share continuous session is running at `now`.
///
/// Weekdays 09:30-11:30 and 13:00-15:00 Beijing time, closing edges
/// excluded. Exchange holidays are not modelled.
pub fn is_market_open(now: DateTime<Utc>) -> bool {
    let local = now.with_timezone(&Shanghai);

    if local.weekday() == Weekday::Sat || local.weekday() == Weekday::Sun {
        return false;
    }

    let time_minutes = local.hour() * 60 + local.minute();
    (MORNING_OPEN..MORNING_CLOSE).contains(&time_minutes)
        || (AFTERNOON_OPEN..AFTERNOON_CLOSE).contains(&time_minutes)
}

pub fn is_market_open_now() -> bool {
    is_market_open(Utc::now())
}
