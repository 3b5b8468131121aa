//! FREQ=YEARLY expansion.

use chrono::{DateTime, Datelike, NaiveDate, NaiveDateTime};
use chrono_tz::Tz;

use super::{clamp_month_day, is_excluded, resolve_local, MAX_EXPANSION_STEPS};

/// Repeats every `interval` years in the months of `by_month` (defaulting
/// to the base month) on the days of `by_month_day` (defaulting to the
/// base day), with the monthly clamping rules.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct YearlyRule {
    pub interval: u32,
    pub by_month: Vec<u32>,
    pub by_month_day: Vec<i8>,
    pub until: Option<NaiveDateTime>,
    pub count: Option<u32>,
}

impl YearlyRule {
    pub fn new(
        interval: u32,
        by_month: Vec<u32>,
        by_month_day: Vec<i8>,
        until: Option<NaiveDateTime>,
        count: Option<u32>,
    ) -> Self {
        let mut by_month = by_month;
        by_month.retain(|m| (1..=12).contains(m));
        by_month.sort_unstable();
        by_month.dedup();
        Self {
            interval: interval.max(1),
            by_month,
            by_month_day,
            until,
            count,
        }
    }

    fn effective_months(&self, base: DateTime<Tz>) -> Vec<u32> {
        if self.by_month.is_empty() {
            vec![base.month()]
        } else {
            self.by_month.clone()
        }
    }

    fn effective_days(&self, base: DateTime<Tz>) -> Vec<i8> {
        if self.by_month_day.is_empty() {
            vec![base.day() as i8]
        } else {
            self.by_month_day.clone()
        }
    }

    /// Dates a single year contributes, in chronological order.
    fn dates_in_year(&self, year: i32, base: DateTime<Tz>) -> Vec<NaiveDate> {
        let mut dates = Vec::new();
        for month in self.effective_months(base) {
            for day in self.effective_days(base) {
                if let Some(resolved) = clamp_month_day(year, month, day) {
                    if let Some(date) = NaiveDate::from_ymd_opt(year, month, resolved) {
                        dates.push(date);
                    }
                }
            }
        }
        dates.sort();
        dates.dedup();
        dates
    }

    /// Number of candidate slots from the base date through `target`,
    /// inclusive. Used for COUNT accounting.
    fn position_of(&self, target: NaiveDate, base: DateTime<Tz>) -> i64 {
        let base_date = base.date_naive();
        let mut year = base_date.year();
        let mut position = 0i64;
        for _ in 0..MAX_EXPANSION_STEPS {
            for date in self.dates_in_year(year, base) {
                if date > target {
                    return position;
                }
                if date >= base_date {
                    position += 1;
                }
            }
            year += self.interval as i32;
            if year > target.year() {
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
        let years = (date.year() - base_date.year()) as i64;
        if years % self.interval as i64 != 0 {
            return false;
        }
        if !self.dates_in_year(date.year(), base).contains(&date) {
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
        let interval = self.interval as i32;

        let start_date = start.with_timezone(&tz).date_naive();
        let end_date = end.with_timezone(&tz).date_naive();

        // Fast-forward to the aligned year at or before the range start.
        let mut year = base_date.year();
        if start_date > base_date {
            let diff = start_date.year() - base_date.year();
            year = base_date.year() + diff / interval * interval;
        }

        let mut occurrences = Vec::new();
        for _ in 0..MAX_EXPANSION_STEPS {
            if year > end_date.year() {
                break;
            }
            for date in self.dates_in_year(year, base) {
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
            year += interval;
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
        let interval = self.interval as i32;

        let after_date = after.with_timezone(&tz).date_naive();
        let mut year = base_date.year();
        if after_date > base_date {
            let diff = after_date.year() - base_date.year();
            year = base_date.year() + diff / interval * interval;
        }

        for _ in 0..MAX_EXPANSION_STEPS {
            for date in self.dates_in_year(year, base) {
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
            year += interval;
        }
        None
    }

    pub fn describe(&self) -> String {
        let cadence = if self.interval == 1 {
            "yearly".to_string()
        } else {
            format!("every {} years", self.interval)
        };
        match (self.by_month.is_empty(), self.by_month_day.is_empty()) {
            (true, true) => cadence,
            (false, true) => format!("{} in month {}", cadence, join(&self.by_month)),
            (true, false) => format!("{} on day {}", cadence, join(&self.by_month_day)),
            (false, false) => format!(
                "{} in month {} on day {}",
                cadence,
                join(&self.by_month),
                join(&self.by_month_day)
            ),
        }
    }
}

fn join<T: ToString>(values: &[T]) -> String {
    values
        .iter()
        .map(|v| v.to_string())
        .collect::<Vec<_>>()
        .join(", ")
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
    fn test_yearly_defaults_to_base_month_and_day() {
        let rule = YearlyRule::new(1, Vec::new(), Vec::new(), None, None);
        let base = berlin(2023, 6, 15, 12, 0);
        let hits = rule.within(berlin(2023, 1, 1, 0, 0), berlin(2025, 12, 31, 0, 0), base, &[]);
        assert_eq!(
            hits,
            vec![
                berlin(2023, 6, 15, 12, 0),
                berlin(2024, 6, 15, 12, 0),
                berlin(2025, 6, 15, 12, 0),
            ]
        );
    }

    #[test]
    fn test_yearly_by_month() {
        let rule = YearlyRule::new(1, vec![3, 9], Vec::new(), None, None);
        let base = berlin(2024, 3, 5, 10, 0);
        let hits = rule.within(berlin(2024, 1, 1, 0, 0), berlin(2025, 12, 31, 0, 0), base, &[]);
        assert_eq!(
            hits,
            vec![
                berlin(2024, 3, 5, 10, 0),
                berlin(2024, 9, 5, 10, 0),
                berlin(2025, 3, 5, 10, 0),
                berlin(2025, 9, 5, 10, 0),
            ]
        );
    }

    #[test]
    fn test_yearly_feb_29_clamps_in_common_years() {
        let rule = YearlyRule::new(1, Vec::new(), vec![29], None, None);
        let base = berlin(2024, 2, 29, 9, 0);
        let hits = rule.within(berlin(2024, 1, 1, 0, 0), berlin(2025, 12, 31, 0, 0), base, &[]);
        assert_eq!(hits, vec![berlin(2024, 2, 29, 9, 0), berlin(2025, 2, 28, 9, 0)]);
    }

    #[test]
    fn test_yearly_interval() {
        let rule = YearlyRule::new(2, Vec::new(), Vec::new(), None, None);
        let base = berlin(2023, 6, 15, 12, 0);
        let hits = rule.within(berlin(2023, 1, 1, 0, 0), berlin(2027, 12, 31, 0, 0), base, &[]);
        assert_eq!(
            hits,
            vec![
                berlin(2023, 6, 15, 12, 0),
                berlin(2025, 6, 15, 12, 0),
                berlin(2027, 6, 15, 12, 0),
            ]
        );
    }

    #[test]
    fn test_yearly_count_bound() {
        let rule = YearlyRule::new(1, Vec::new(), Vec::new(), None, Some(2));
        let base = berlin(2023, 6, 15, 12, 0);
        let hits = rule.within(berlin(2023, 1, 1, 0, 0), berlin(2030, 12, 31, 0, 0), base, &[]);
        assert_eq!(hits.len(), 2);
    }

    #[test]
    fn test_yearly_occurs_on() {
        let rule = YearlyRule::new(1, Vec::new(), Vec::new(), None, None);
        let base = berlin(2023, 6, 15, 12, 0);
        assert!(rule.occurs_on(NaiveDate::from_ymd_opt(2025, 6, 15).unwrap(), base));
        assert!(!rule.occurs_on(NaiveDate::from_ymd_opt(2025, 6, 16).unwrap(), base));
        assert!(!rule.occurs_on(NaiveDate::from_ymd_opt(2022, 6, 15).unwrap(), base));
    }

    #[test]
    fn test_yearly_next_after() {
        let rule = YearlyRule::new(1, Vec::new(), Vec::new(), None, None);
        let base = berlin(2023, 6, 15, 12, 0);
        assert_eq!(
            rule.next_after(berlin(2024, 6, 15, 12, 0), base, &[]),
            Some(berlin(2025, 6, 15, 12, 0))
        );
    }
}
