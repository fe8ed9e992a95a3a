// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Shared helpers for date/time formatting and activity streaks.

use chrono::{DateTime, Duration, NaiveDate, SecondsFormat, Utc};
use std::collections::BTreeSet;

/// Format a UTC timestamp as RFC3339 using a `Z` suffix.
pub fn format_utc_rfc3339(date: DateTime<Utc>) -> String {
    date.to_rfc3339_opts(SecondsFormat::Secs, true)
}

/// Count consecutive active UTC days ending at `today`.
///
/// A run that ends yesterday still counts, so the streak does not drop to
/// zero before the learner has had a chance to practice today.
pub fn active_day_streak<I>(events: I, today: NaiveDate) -> u32
where
    I: IntoIterator<Item = DateTime<Utc>>,
{
    let days: BTreeSet<NaiveDate> = events.into_iter().map(|ts| ts.date_naive()).collect();

    let mut cursor = if days.contains(&today) {
        today
    } else {
        today - Duration::days(1)
    };

    let mut streak = 0;
    while days.contains(&cursor) {
        streak += 1;
        cursor -= Duration::days(1);
    }
    streak
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at(y: i32, m: u32, d: u32, h: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, m, d, h, 0, 0).unwrap()
    }

    fn day(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[test]
    fn test_format_uses_z_suffix() {
        assert_eq!(format_utc_rfc3339(at(2024, 6, 20, 8)), "2024-06-20T08:00:00Z");
    }

    #[test]
    fn test_streak_empty() {
        assert_eq!(active_day_streak(Vec::new(), day(2024, 6, 20)), 0);
    }

    #[test]
    fn test_streak_counts_consecutive_days_including_today() {
        let events = vec![
            at(2024, 6, 20, 9),
            at(2024, 6, 20, 18),
            at(2024, 6, 19, 7),
            at(2024, 6, 18, 23),
            at(2024, 6, 15, 12),
        ];
        assert_eq!(active_day_streak(events, day(2024, 6, 20)), 3);
    }

    #[test]
    fn test_streak_survives_until_end_of_today() {
        let events = vec![at(2024, 6, 19, 7), at(2024, 6, 18, 7)];
        assert_eq!(active_day_streak(events, day(2024, 6, 20)), 2);
    }

    #[test]
    fn test_streak_broken_by_gap() {
        let events = vec![at(2024, 6, 17, 7), at(2024, 6, 16, 7)];
        assert_eq!(active_day_streak(events, day(2024, 6, 20)), 0);
    }
}
