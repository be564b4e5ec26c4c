use anyhow::Result;
use chrono::{DateTime, Datelike, Duration, LocalResult, NaiveDate, TimeZone, Utc, Weekday};
use chrono_tz::America::New_York;
use serde::Serialize;

/// Hour (US Eastern) at which one day's window closes and the next opens
pub const CUTOFF_HOUR: u32 = 6;

/// Hour (US Eastern) used to date content that only carries a calendar day
pub const DATE_ONLY_HOUR: u32 = 12;

/// Half-open `[start, end)` interval deciding which content counts as new.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct TimeWindow {
    start: DateTime<Utc>,
    end: DateTime<Utc>,
}

impl TimeWindow {
    pub fn new(start: DateTime<Utc>, end: DateTime<Utc>) -> Result<Self> {
        if start >= end {
            anyhow::bail!("Invalid time window: start {} is not before end {}", start, end);
        }
        Ok(Self { start, end })
    }

    pub fn start(&self) -> DateTime<Utc> {
        self.start
    }

    pub fn end(&self) -> DateTime<Utc> {
        self.end
    }

    pub fn contains(&self, at: DateTime<Utc>) -> bool {
        at >= self.start && at < self.end
    }
}

/// Number of days between today's cutoff and the window start.
///
/// Saturday, Sunday and Monday roll up to the previous Friday's cutoff so the
/// Monday briefing covers the whole weekend.
pub fn days_back(weekday: Weekday) -> i64 {
    match weekday {
        Weekday::Sat => 1,
        Weekday::Sun => 2,
        Weekday::Mon => 3,
        Weekday::Tue => 1,
        Weekday::Wed => 1,
        Weekday::Thu => 1,
        Weekday::Fri => 1,
    }
}

/// Resolve the collection window for a run happening at `now`.
pub fn resolve(now: DateTime<Utc>) -> TimeWindow {
    let today = now.with_timezone(&New_York).date_naive();
    let start_day = today - Duration::days(days_back(today.weekday()));

    TimeWindow {
        start: eastern_at(start_day, CUTOFF_HOUR),
        end: eastern_at(today, CUTOFF_HOUR),
    }
}

/// The given wall-clock hour on `date` in US Eastern time, as UTC.
pub fn eastern_at(date: NaiveDate, hour: u32) -> DateTime<Utc> {
    let naive = date
        .and_hms_opt(hour, 0, 0)
        .unwrap_or_else(|| date.and_hms_opt(0, 0, 0).unwrap_or_default());

    match New_York.from_local_datetime(&naive) {
        LocalResult::Single(dt) => dt.with_timezone(&Utc),
        LocalResult::Ambiguous(earliest, _) => earliest.with_timezone(&Utc),
        // Only reachable for hours inside a spring-forward gap
        LocalResult::None => Utc.from_utc_datetime(&(naive + Duration::hours(4))),
    }
}

/// Today's calendar date in US Eastern time
pub fn eastern_today(now: DateTime<Utc>) -> NaiveDate {
    now.with_timezone(&New_York).date_naive()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn utc(y: i32, m: u32, d: u32, h: u32, min: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, m, d, h, min, 0).unwrap()
    }

    // ==================== Decision Table Tests ====================

    #[test]
    fn test_days_back_weekend_rolls_to_friday() {
        assert_eq!(days_back(Weekday::Sat), 1);
        assert_eq!(days_back(Weekday::Sun), 2);
        assert_eq!(days_back(Weekday::Mon), 3);
    }

    #[test]
    fn test_days_back_weekdays_use_previous_day() {
        for day in [Weekday::Tue, Weekday::Wed, Weekday::Thu, Weekday::Fri] {
            assert_eq!(days_back(day), 1);
        }
    }

    // ==================== Resolve Tests ====================

    #[test]
    fn test_resolve_wednesday_in_winter() {
        // Wed Feb 4 2026, 14:00 UTC = 09:00 EST
        let window = resolve(utc(2026, 2, 4, 14, 0));
        assert_eq!(window.start(), utc(2026, 2, 3, 11, 0));
        assert_eq!(window.end(), utc(2026, 2, 4, 11, 0));
    }

    #[test]
    fn test_resolve_tuesday_in_summer_uses_edt() {
        // Tue Jul 7 2026, 12:00 UTC = 08:00 EDT
        let window = resolve(utc(2026, 7, 7, 12, 0));
        assert_eq!(window.start(), utc(2026, 7, 6, 10, 0));
        assert_eq!(window.end(), utc(2026, 7, 7, 10, 0));
    }

    #[test]
    fn test_resolve_monday_rolls_back_to_friday() {
        // Mon Feb 9 2026, 12:00 UTC
        let window = resolve(utc(2026, 2, 9, 12, 0));
        assert_eq!(window.start(), utc(2026, 2, 6, 11, 0));
        assert_eq!(window.end(), utc(2026, 2, 9, 11, 0));
    }

    #[test]
    fn test_resolve_saturday_and_sunday_roll_back_to_friday() {
        let friday_cutoff = utc(2026, 2, 6, 11, 0);

        let saturday = resolve(utc(2026, 2, 7, 15, 0));
        assert_eq!(saturday.start(), friday_cutoff);
        assert_eq!(saturday.end(), utc(2026, 2, 7, 11, 0));

        let sunday = resolve(utc(2026, 2, 8, 15, 0));
        assert_eq!(sunday.start(), friday_cutoff);
        assert_eq!(sunday.end(), utc(2026, 2, 8, 11, 0));
    }

    #[test]
    fn test_resolve_uses_eastern_date_not_utc_date() {
        // Wed Feb 4 2026 02:00 UTC is still Tuesday evening in Eastern time
        let window = resolve(utc(2026, 2, 4, 2, 0));
        assert_eq!(window.end(), utc(2026, 2, 3, 11, 0));
        assert_eq!(window.start(), utc(2026, 2, 2, 11, 0));
    }

    #[test]
    fn test_resolve_across_spring_forward() {
        // DST begins Sun Mar 8 2026. Monday's window starts Friday 06:00 EST
        // and ends Monday 06:00 EDT.
        let window = resolve(utc(2026, 3, 9, 15, 0));
        assert_eq!(window.start(), utc(2026, 3, 6, 11, 0));
        assert_eq!(window.end(), utc(2026, 3, 9, 10, 0));
    }

    #[test]
    fn test_resolve_across_fall_back() {
        // DST ends Sun Nov 1 2026
        let window = resolve(utc(2026, 11, 2, 15, 0));
        assert_eq!(window.start(), utc(2026, 10, 30, 10, 0));
        assert_eq!(window.end(), utc(2026, 11, 2, 11, 0));
    }

    #[test]
    fn test_resolve_is_pure() {
        let now = utc(2026, 5, 13, 9, 30);
        assert_eq!(resolve(now), resolve(now));
    }

    // ==================== Window Tests ====================

    #[test]
    fn test_window_is_half_open() {
        let window = TimeWindow::new(utc(2026, 2, 3, 11, 0), utc(2026, 2, 4, 11, 0)).unwrap();
        assert!(window.contains(window.start()));
        assert!(!window.contains(window.start() - Duration::seconds(1)));
        assert!(!window.contains(window.end()));
        assert!(window.contains(window.end() - Duration::seconds(1)));
    }

    #[test]
    fn test_window_rejects_empty_interval() {
        let at = utc(2026, 2, 3, 11, 0);
        assert!(TimeWindow::new(at, at).is_err());
    }

    #[test]
    fn test_eastern_at_noon() {
        let date = NaiveDate::from_ymd_opt(2026, 2, 3).unwrap();
        assert_eq!(eastern_at(date, DATE_ONLY_HOUR), utc(2026, 2, 3, 17, 0));
    }
}
