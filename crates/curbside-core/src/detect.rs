//! Statistical pickup-day detection from historical completion records.

use chrono::{Datelike, Weekday};
use serde::{Deserialize, Serialize};

use crate::{HistoricalVisit, VisitStatus};

/// Completed visits required before a detection is attempted.
pub const MIN_COMPLETED_VISITS: usize = 3;

/// Minimum share of completed visits the modal weekday must hold
/// (inclusive).
pub const MIN_CONFIDENCE: f64 = 0.5;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DetectedDay {
    pub day: Weekday,
    pub confidence: f64,
}

const WEEKDAYS: [Weekday; 7] = [
    Weekday::Mon,
    Weekday::Tue,
    Weekday::Wed,
    Weekday::Thu,
    Weekday::Fri,
    Weekday::Sat,
    Weekday::Sun,
];

/// Best-guess pickup day from visit history.
///
/// Only completed visits count, both in the per-weekday tally and in the
/// confidence denominator. Ties between maximal weekdays resolve to the
/// first in Mon..Sun order; callers should rely only on the winner being
/// one of the tied set.
pub fn detect_pickup_day(visits: &[HistoricalVisit]) -> Option<DetectedDay> {
    let mut counts = [0usize; 7];
    let mut completed = 0usize;
    for visit in visits {
        if visit.status == VisitStatus::Completed {
            counts[visit.date.weekday().num_days_from_monday() as usize] += 1;
            completed += 1;
        }
    }

    if completed < MIN_COMPLETED_VISITS {
        return None;
    }

    let mut best = 0;
    for i in 1..7 {
        if counts[i] > counts[best] {
            best = i;
        }
    }
    let confidence = counts[best] as f64 / completed as f64;
    if confidence < MIN_CONFIDENCE {
        return None;
    }

    Some(DetectedDay {
        day: WEEKDAYS[best],
        confidence,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn visit(y: i32, m: u32, d: u32, status: VisitStatus) -> HistoricalVisit {
        HistoricalVisit {
            date: NaiveDate::from_ymd_opt(y, m, d).unwrap(),
            status,
        }
    }

    fn completed(y: i32, m: u32, d: u32) -> HistoricalVisit {
        visit(y, m, d, VisitStatus::Completed)
    }

    #[test]
    fn too_few_completed_visits_yield_none() {
        let visits = vec![
            completed(2026, 8, 6),
            completed(2026, 8, 13),
            visit(2026, 8, 20, VisitStatus::Missed),
        ];
        assert_eq!(detect_pickup_day(&visits), None);
    }

    #[test]
    fn unanimous_history_detects_with_full_confidence() {
        // All Thursdays.
        let visits = vec![
            completed(2026, 8, 6),
            completed(2026, 8, 13),
            completed(2026, 8, 20),
            completed(2026, 8, 27),
        ];
        let detected = detect_pickup_day(&visits).unwrap();
        assert_eq!(detected.day, Weekday::Thu);
        assert_eq!(detected.confidence, 1.0);
    }

    #[test]
    fn non_completed_visits_do_not_dilute_confidence() {
        let visits = vec![
            completed(2026, 8, 6),
            completed(2026, 8, 13),
            completed(2026, 8, 20),
            visit(2026, 8, 21, VisitStatus::Missed),
            visit(2026, 8, 24, VisitStatus::Cancelled),
            visit(2026, 9, 3, VisitStatus::Scheduled),
        ];
        let detected = detect_pickup_day(&visits).unwrap();
        assert_eq!(detected.day, Weekday::Thu);
        assert_eq!(detected.confidence, 1.0);
    }

    #[test]
    fn confidence_below_half_yields_none() {
        // Two Thursdays, two Fridays, one Monday: mode share is 2/5.
        let visits = vec![
            completed(2026, 8, 6),
            completed(2026, 8, 13),
            completed(2026, 8, 7),
            completed(2026, 8, 14),
            completed(2026, 8, 3),
        ];
        assert_eq!(detect_pickup_day(&visits), None);
    }

    #[test]
    fn confidence_of_exactly_half_is_accepted() {
        // Two Thursdays, one Friday, one Monday.
        let visits = vec![
            completed(2026, 8, 6),
            completed(2026, 8, 13),
            completed(2026, 8, 7),
            completed(2026, 8, 3),
        ];
        let detected = detect_pickup_day(&visits).unwrap();
        assert_eq!(detected.day, Weekday::Thu);
        assert_eq!(detected.confidence, 0.5);
    }

    #[test]
    fn tie_resolves_to_one_of_the_tied_days() {
        // Two Mondays, two Thursdays.
        let visits = vec![
            completed(2026, 8, 3),
            completed(2026, 8, 10),
            completed(2026, 8, 6),
            completed(2026, 8, 13),
        ];
        let detected = detect_pickup_day(&visits).unwrap();
        assert!(matches!(detected.day, Weekday::Mon | Weekday::Thu));
        assert_eq!(detected.confidence, 0.5);
    }
}
