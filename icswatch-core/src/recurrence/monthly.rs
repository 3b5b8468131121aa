//! FREQ=MONTHLY expansion.

use chrono::{DateTime, Datelike, NaiveDate, NaiveDateTime};
use chrono_tz::Tz;

use super::{clamp_month_day, is_excluded, resolve_local, MAX_EXPANSION_STEPS};

/// Repeats every `interval` months on the days in `by_month_day`
/// (defaulting to the base start's day of month). Negative day numbers
/// count from the month end; days past a month's length clamp to its last
/// day.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MonthlyRule {
    pub interval: u32,
    pub by_month_day: Vec<i8>,
    pub until: Option<NaiveDateTime>,
    pub count: Option<u32>,
}

/// Months since year 0, for interval arithmetic.
fn month_index(date: NaiveDate) -> i64 {
    date.year() as i64 * 12 + date.month0() as i64
}

fn month_from_index(index: i64) -> (i32, u32) {
    (index.div_euclid(12) as i32, (index.rem_euclid(12) + 1) as u32)
}

impl MonthlyRule {
    pub fn new(
        interval: u32,
        by_month_day: Vec<i8>,
        until: Option<NaiveDateTime>,
        count: Option<u32>,
    ) -> Self {
        Self {
            interval: interval.max(1),
            by_month_day,
            until,
            count,
        }
    }

    fn effective_days(&self, base: DateTime<Tz>) -> Vec<i8> {
        if self.by_month_day.is_empty() {
            vec![base.day() as i8]
        } else {
            self.by_month_day.clone()
        }
    }

    /// Dates a single month contributes, in chronological order.
    fn dates_in_month(&self, year: i32, month: u32, base: DateTime<Tz>) -> Vec<NaiveDate> {
        let mut dates: Vec<NaiveDate> = self
            .effective_days(base)
            .iter()
            .filter_map(|day| clamp_month_day(year, month, *day))
            .filter_map(|day| NaiveDate::from_ymd_opt(year, month, day))
            .collect();
        dates.sort();
        dates.dedup();
        dates
    }

    /// Number of candidate slots from the base date through `target`,
    /// inclusive. Used for COUNT accounting.
    fn position_of(&self, target: NaiveDate, base: DateTime<Tz>) -> i64 {
        let base_date = base.date_naive();
        let mut index = month_index(base_date);
        let mut position = 0i64;
        for _ in 0..MAX_EXPANSION_STEPS {
            let (year, month) = month_from_index(index);
            for date in self.dates_in_month(year, month, base) {
                if date > target {
                    return position;
                }
                if date >= base_date {
                    position += 1;
                }
            }
            index += self.interval as i64;
            let (year, month) = month_from_index(index);
            if let Some(first) = NaiveDate::from_ymd_opt(year, month, 1) {
                if first > target {
                    return position;
                }
            }
        }
        position
    }

    pub fn occurs_on(&self, date: NaiveDate, base: DateTime<Tz>) -> bool {
        let base_date = base.date_naive();
        if date < base_date {
            return false;
        }
        let months = month_index(date) - month_index(base_date);
        if months % self.interval as i64 != 0 {
            return false;
        }
        if !self
            .dates_in_month(date.year(), date.month(), base)
            .contains(&date)
        {
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
        let interval = self.interval as i64;

        let start_date = start.with_timezone(&tz).date_naive();
        let end_date = end.with_timezone(&tz).date_naive();

        // Fast-forward to the aligned month at or before the range start.
        let base_index = month_index(base_date);
        let mut index = base_index;
        if start_date > base_date {
            let diff = month_index(start_date) - base_index;
            index = base_index + diff / interval * interval;
        }

        let mut occurrences = Vec::new();
        for _ in 0..MAX_EXPANSION_STEPS {
            let (year, month) = month_from_index(index);
            match NaiveDate::from_ymd_opt(year, month, 1) {
                Some(first) if first > end_date => break,
                None => break,
                _ => {}
            }
            for date in self.dates_in_month(year, month, base) {
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
            index += interval;
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
        let interval = self.interval as i64;

        let after_date = after.with_timezone(&tz).date_naive();
        let base_index = month_index(base_date);
        let mut index = base_index;
        if after_date > base_date {
            let diff = month_index(after_date) - base_index;
            index = base_index + diff / interval * interval;
        }

        for _ in 0..MAX_EXPANSION_STEPS {
            let (year, month) = month_from_index(index);
            for date in self.dates_in_month(year, month, base) {
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
            index += interval;
        }
        None
    }

    pub fn describe(&self) -> String {
        let cadence = if self.interval == 1 {
            "monthly".to_string()
        } else {
            format!("every {} months", self.interval)
        };
        if self.by_month_day.is_empty() {
            cadence
        } else {
            let days: Vec<String> = self.by_month_day.iter().map(|d| d.to_string()).collect();
            format!("{} on day {}", cadence, days.join(", "))
        }
    }
}
