//! Deterministic recurring-date generation from a weekly/bi-weekly/monthly
//! cadence.

use chrono::{Datelike, Duration, NaiveDate, Utc, Weekday};

use crate::{parse_weekday, PickupFrequency};

/// Next occurrence of `day` strictly after `today`. Today never counts,
/// even when its weekday matches.
pub fn next_occurrence(day: Weekday, today: NaiveDate) -> NaiveDate {
    let ahead = (day.num_days_from_monday() as i64
        - today.weekday().num_days_from_monday() as i64)
        .rem_euclid(7);
    let ahead = if ahead == 0 { 7 } else { ahead };
    today + Duration::days(ahead)
}

/// Next weekday (Mon-Fri) strictly after `today`.
pub fn next_business_day(today: NaiveDate) -> NaiveDate {
    let mut next = today + Duration::days(1);
    while matches!(next.weekday(), Weekday::Sat | Weekday::Sun) {
        next += Duration::days(1);
    }
    next
}

/// Every due date strictly after `today` and no later than
/// `today + window_days` (inclusive end).
///
/// For intervals longer than a week an `anchor` pins the cycle: if the first
/// candidate has drifted off the anchor's cycle, it shifts forward by the
/// remainder needed to land back on it. Without an anchor the first
/// occurrence found is used as-is.
pub fn pickup_dates_for(
    day: Weekday,
    frequency: PickupFrequency,
    window_days: i64,
    anchor: Option<NaiveDate>,
    today: NaiveDate,
) -> Vec<NaiveDate> {
    let interval = frequency.interval_days();
    let window_end = today + Duration::days(window_days);

    let mut next = next_occurrence(day, today);
    if interval > 7 {
        if let Some(anchor) = anchor {
            // An anchor on another weekday carries no phase information for
            // this cadence; shifting by it would land dates off `day`.
            let since_anchor = (next - anchor).num_days();
            if since_anchor % 7 == 0 {
                let offset = since_anchor.rem_euclid(interval);
                if offset != 0 {
                    next += Duration::days(interval - offset);
                }
            }
        }
    }

    let mut dates = Vec::new();
    while next <= window_end {
        dates.push(next);
        next += Duration::days(interval);
    }
    dates
}

/// String-facing contract: unknown day names yield an empty schedule,
/// unknown frequencies fall back to weekly. Day names are case-insensitive.
pub fn generate_pickup_dates(
    day: &str,
    frequency: &str,
    window_days: i64,
    anchor: Option<NaiveDate>,
    today: NaiveDate,
) -> Vec<NaiveDate> {
    let Some(day) = parse_weekday(day) else {
        return Vec::new();
    };
    pickup_dates_for(day, PickupFrequency::parse(frequency), window_days, anchor, today)
}

/// Production convenience over [`generate_pickup_dates`] anchored at the
/// current UTC date.
pub fn generate_pickup_dates_from_now(
    day: &str,
    frequency: &str,
    window_days: i64,
    anchor: Option<NaiveDate>,
) -> Vec<NaiveDate> {
    generate_pickup_dates(day, frequency, window_days, anchor, Utc::now().date_naive())
}
