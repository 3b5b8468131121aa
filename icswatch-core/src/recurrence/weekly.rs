//! FREQ=WEEKLY expansion.

use chrono::{DateTime, Datelike, Duration, NaiveDate, NaiveDateTime, Weekday};
use chrono_tz::Tz;

use super::{is_excluded, resolve_local, week_start, MAX_EXPANSION_STEPS};

/// Repeats every `interval` weeks on the days in `by_day` (defaulting to
/// the base start's weekday). Weeks start on Monday.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WeeklyRule {
    pub interval: u32,
    pub by_day: Vec<Weekday>,
    pub until: Option<NaiveDateTime>,
    pub count: Option<u32>,
}

impl WeeklyRule {
    pub fn new(
        interval: u32,
        by_day: Vec<Weekday>,
        until: Option<NaiveDateTime>,
        count: Option<u32>,
    ) -> Self {
        let mut by_day = by_day;
        by_day.sort_by_key(|day| day.num_days_from_monday());
        by_day.dedup();
        Self {
            interval: interval.max(1),
            by_day,
            until,
            count,
        }
    }

    fn effective_days(&self, base: DateTime<Tz>) -> Vec<Weekday> {
        if self.by_day.is_empty() {
            vec![base.weekday()]
        } else {
            self.by_day.clone()
        }
    }

    /// Number of candidate slots from the base date through `target`,
    /// inclusive. Used for COUNT accounting.
    fn position_of(&self, target: NaiveDate, base: DateTime<Tz>) -> i64 {
        let days = self.effective_days(base);
        let base_date = base.date_naive();
        let mut week = week_start(base_date);
        let mut position = 0i64;
        for _ in 0..MAX_EXPANSION_STEPS {
            for weekday in &days {
                let date = week + Duration::days(weekday.num_days_from_monday() as i64);
                if date > target {
                    return position;
                }
                if date >= base_date {
                    position += 1;
                }
            }
            week += Duration::days(self.interval as i64 * 7);
            if week > target {
                return position;
            }
        }
        position
    }

    pub fn occurs_on(&self, date: NaiveDate, base: DateTime<Tz>) -> bool {
        let base_date = base.date_naive();
        if date < base_date {
            return false;
        }
        if !self.effective_days(base).contains(&date.weekday()) {
            return false;
        }
        let weeks = (week_start(date) - week_start(base_date)).num_days() / 7;
        if weeks % self.interval as i64 != 0 {
            return false;
        }
        if let Some(until) = self.until {
            if date.and_time(base.time()) > until {
                return false;
            }
        }
        if let Some(count) = self.count {
            if self.position_of(date, base) > count as i64 {
                return false;
            }
        }
        true
    }

    pub fn within(
        &self,
        start: DateTime<Tz>,
        end: DateTime<Tz>,
        base: DateTime<Tz>,
        ex_dates: &[DateTime<Tz>],
    ) -> Vec<DateTime<Tz>> {
        let tz = base.timezone();
        let base_date = base.date_naive();
        let time_of_day = base.time();
        let days = self.effective_days(base);
        let interval = self.interval as i64;

        let base_week = week_start(base_date);
        let start_date = start.with_timezone(&tz).date_naive();
        let end_date = end.with_timezone(&tz).date_naive();

        // Fast-forward to the aligned week at or before the range start.
        let mut week = base_week;
        if start_date > base_date {
            let weeks = (week_start(start_date) - base_week).num_days() / 7;
            week = base_week + Duration::days(weeks / interval * interval * 7);
        }

        let mut occurrences = Vec::new();
        for _ in 0..MAX_EXPANSION_STEPS {
            if week > end_date {
                break;
            }
            for weekday in &days {
                let date = week + Duration::days(weekday.num_days_from_monday() as i64);
                if date < base_date {
                    continue;
                }
                let naive = date.and_time(time_of_day);
                if let Some(until) = self.until {
                    if naive > until {
                        continue;
                    }
                }
                if let Some(count) = self.count {
                    if self.position_of(date, base) > count as i64 {
                        continue;
                    }
                }
                let candidate = resolve_local(tz, naive);
                if candidate < start || candidate > end {
                    continue;
                }
                if !is_excluded(candidate, ex_dates) {
                    occurrences.push(candidate);
                }
            }
            week += Duration::days(interval * 7);
        }
        occurrences
    }

    pub fn next_after(
        &self,
        after: DateTime<Tz>,
        base: DateTime<Tz>,
        ex_dates: &[DateTime<Tz>],
    ) -> Option<DateTime<Tz>> {
        let tz = base.timezone();
        let base_date = base.date_naive();
        let time_of_day = base.time();
        let days = self.effective_days(base);
        let interval = self.interval as i64;

        let base_week = week_start(base_date);
        let after_date = after.with_timezone(&tz).date_naive();
        let mut week = base_week;
        if after_date > base_date {
            let weeks = (week_start(after_date) - base_week).num_days() / 7;
            week = base_week + Duration::days(weeks / interval * interval * 7);
        }

        for _ in 0..MAX_EXPANSION_STEPS {
            for weekday in &days {
                let date = week + Duration::days(weekday.num_days_from_monday() as i64);
                if date < base_date {
                    continue;
                }
                let naive = date.and_time(time_of_day);
                if let Some(until) = self.until {
                    if naive > until {
                        return None;
                    }
                }
                if let Some(count) = self.count {
                    if self.position_of(date, base) > count as i64 {
                        return None;
                    }
                }
                let candidate = resolve_local(tz, naive);
                if candidate > after && !is_excluded(candidate, ex_dates) {
                    return Some(candidate);
                }
            }
            week += Duration::days(interval * 7);
        }
        None
    }

    pub fn describe(&self) -> String {
        let cadence = if self.interval == 1 {
            "weekly".to_string()
        } else {
            format!("every {} weeks", self.interval)
        };
        if self.by_day.is_empty() {
            cadence
        } else {
            let days: Vec<&str> = self
                .by_day
                .iter()
                .map(|day| match day {
                    Weekday::Mon => "Mon",
                    Weekday::Tue => "Tue",
                    Weekday::Wed => "Wed",
                    Weekday::Thu => "Thu",
                    Weekday::Fri => "Fri",
                    Weekday::Sat => "Sat",
                    Weekday::Sun => "Sun",
                })
                .collect();
            format!("{} on {}", cadence, days.join(", "))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use chrono_tz::Europe::Berlin;

    fn berlin(y: i32, mo: u32, d: u32, h: u32, mi: u32) -> DateTime<Tz> {
        Berlin.with_ymd_and_hms(y, mo, d, h, mi, 0).unwrap()
    }

    #[test]
    fn test_weekly_defaults_to_base_weekday() {
        // Base on a Monday, no BYDAY: only Mondays.
        let rule = WeeklyRule::new(1, Vec::new(), None, None);
        let base = berlin(2025, 3, 10, 10, 0);
        let hits = rule.within(berlin(2025, 3, 10, 0, 0), berlin(2025, 3, 24, 23, 0), base, &[]);
        assert_eq!(
            hits,
            vec![
                berlin(2025, 3, 10, 10, 0),
                berlin(2025, 3, 17, 10, 0),
                berlin(2025, 3, 24, 10, 0),
            ]
        );
    }

    #[test]
    fn test_weekly_by_day_multiple() {
        let rule = WeeklyRule::new(1, vec![Weekday::Mon, Weekday::Wed], None, None);
        let base = berlin(2025, 3, 10, 9, 30);
        let hits = rule.within(berlin(2025, 3, 10, 0, 0), berlin(2025, 3, 17, 23, 0), base, &[]);
        assert_eq!(
            hits,
            vec![
                berlin(2025, 3, 10, 9, 30),
                berlin(2025, 3, 12, 9, 30),
                berlin(2025, 3, 17, 9, 30),
            ]
        );
    }

    #[test]
    fn test_weekly_biweekly_alignment() {
        let rule = WeeklyRule::new(2, Vec::new(), None, None);
        let base = berlin(2025, 3, 10, 10, 0);
        // The week of Mar 17 is off-interval; Mar 24 is on.
        let hits = rule.within(berlin(2025, 3, 11, 0, 0), berlin(2025, 3, 28, 0, 0), base, &[]);
        assert_eq!(hits, vec![berlin(2025, 3, 24, 10, 0)]);
    }

    #[test]
    fn test_weekly_across_dst_keeps_wall_clock() {
        // Weekly Monday 10:00 from 2025-03-24; Germany
        // springs forward on 2025-03-30. The 2025-03-31 occurrence is at
        // 10:00 local (08:00 UTC), not shifted by elapsed time.
        let rule = WeeklyRule::new(1, vec![Weekday::Mon], None, None);
        let base = berlin(2025, 3, 24, 10, 0);
        let hits = rule.within(berlin(2025, 3, 30, 0, 0), berlin(2025, 4, 7, 0, 0), base, &[]);
        assert_eq!(hits, vec![berlin(2025, 3, 31, 10, 0)]);
        assert_eq!(
            hits[0].naive_utc(),
            NaiveDate::from_ymd_opt(2025, 3, 31)
                .unwrap()
                .and_hms_opt(8, 0, 0)
                .unwrap()
        );
    }

    #[test]
    fn test_weekly_count_spans_by_days() {
        // Mon+Wed with COUNT=3 stops after Mon, Wed, Mon.
        let rule = WeeklyRule::new(1, vec![Weekday::Mon, Weekday::Wed], None, Some(3));
        let base = berlin(2025, 3, 10, 9, 0);
        let hits = rule.within(berlin(2025, 3, 1, 0, 0), berlin(2025, 4, 1, 0, 0), base, &[]);
        assert_eq!(
            hits,
            vec![
                berlin(2025, 3, 10, 9, 0),
                berlin(2025, 3, 12, 9, 0),
                berlin(2025, 3, 17, 9, 0),
            ]
        );
    }

    #[test]
    fn test_weekly_midweek_base_skips_earlier_days() {
        // Base on Wednesday with BYDAY=MO,WE: the Monday of the base week
        // precedes the base and must not appear.
        let rule = WeeklyRule::new(1, vec![Weekday::Mon, Weekday::Wed], None, None);
        let base = berlin(2025, 3, 12, 9, 0);
        let hits = rule.within(berlin(2025, 3, 9, 0, 0), berlin(2025, 3, 18, 0, 0), base, &[]);
        assert_eq!(hits, vec![berlin(2025, 3, 12, 9, 0), berlin(2025, 3, 17, 9, 0)]);
    }

    #[test]
    fn test_weekly_occurs_on() {
        let rule = WeeklyRule::new(1, vec![Weekday::Mon], None, None);
        let base = berlin(2025, 3, 10, 10, 0);
        assert!(rule.occurs_on(NaiveDate::from_ymd_opt(2025, 3, 17).unwrap(), base));
        assert!(!rule.occurs_on(NaiveDate::from_ymd_opt(2025, 3, 18).unwrap(), base));
        assert!(!rule.occurs_on(NaiveDate::from_ymd_opt(2025, 3, 3).unwrap(), base));
    }

    #[test]
    fn test_weekly_next_after_crosses_week_boundary() {
        let rule = WeeklyRule::new(1, vec![Weekday::Mon], None, None);
        let base = berlin(2025, 3, 10, 10, 0);
        assert_eq!(
            rule.next_after(berlin(2025, 3, 10, 10, 0), base, &[]),
            Some(berlin(2025, 3, 17, 10, 0))
        );
    }

    #[test]
    fn test_weekly_until_stops_expansion() {
        let until = NaiveDate::from_ymd_opt(2025, 3, 17)
            .unwrap()
            .and_hms_opt(10, 0, 0)
            .unwrap();
        let rule = WeeklyRule::new(1, vec![Weekday::Mon], Some(until), None);
        let base = berlin(2025, 3, 10, 10, 0);
        let hits = rule.within(berlin(2025, 3, 1, 0, 0), berlin(2025, 4, 30, 0, 0), base, &[]);
        assert_eq!(hits, vec![berlin(2025, 3, 10, 10, 0), berlin(2025, 3, 17, 10, 0)]);
    }
}
