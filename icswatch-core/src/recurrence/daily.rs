//! FREQ=DAILY expansion.

use chrono::{DateTime, Duration, NaiveDate, NaiveDateTime};
use chrono_tz::Tz;

use super::{is_excluded, resolve_local, MAX_EXPANSION_STEPS};

/// Repeats every `interval` days from the base start.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DailyRule {
    pub interval: u32,
    pub until: Option<NaiveDateTime>,
    pub count: Option<u32>,
}

impl DailyRule {
    pub fn new(interval: u32, until: Option<NaiveDateTime>, count: Option<u32>) -> Self {
        Self {
            interval: interval.max(1),
            until,
            count,
        }
    }

    /// 1-based position of the candidate slot `days_from_base` days after
    /// the base date.
    fn occurrence_number(&self, days_from_base: i64) -> i64 {
        days_from_base / self.interval as i64 + 1
    }

    pub fn occurs_on(&self, date: NaiveDate, base: DateTime<Tz>) -> bool {
        let base_date = base.date_naive();
        if date < base_date {
            return false;
        }
        let diff = (date - base_date).num_days();
        if diff % self.interval as i64 != 0 {
            return false;
        }
        if let Some(until) = self.until {
            if date.and_time(base.time()) > until {
                return false;
            }
        }
        if let Some(count) = self.count {
            if self.occurrence_number(diff) > count as i64 {
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

        // Fast-forward to the candidate slot at or before the range start.
        let mut offset_days = 0i64;
        let start_date = start.with_timezone(&tz).date_naive();
        if start_date > base_date {
            offset_days = (start_date - base_date).num_days() / interval * interval;
        }

        let mut occurrences = Vec::new();
        for _ in 0..MAX_EXPANSION_STEPS {
            let date = base_date + Duration::days(offset_days);
            let naive = date.and_time(time_of_day);
            if let Some(until) = self.until {
                if naive > until {
                    break;
                }
            }
            if let Some(count) = self.count {
                if self.occurrence_number(offset_days) > count as i64 {
                    break;
                }
            }
            let candidate = resolve_local(tz, naive);
            if candidate > end {
                break;
            }
            if candidate >= start && !is_excluded(candidate, ex_dates) {
                occurrences.push(candidate);
            }
            offset_days += interval;
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

        let mut offset_days = 0i64;
        let after_date = after.with_timezone(&tz).date_naive();
        if after_date > base_date {
            offset_days = (after_date - base_date).num_days() / interval * interval;
        }

        for _ in 0..MAX_EXPANSION_STEPS {
            let date = base_date + Duration::days(offset_days);
            let naive = date.and_time(time_of_day);
            if let Some(until) = self.until {
                if naive > until {
                    return None;
                }
            }
            if let Some(count) = self.count {
                if self.occurrence_number(offset_days) > count as i64 {
                    return None;
                }
            }
            let candidate = resolve_local(tz, naive);
            if candidate > after && !is_excluded(candidate, ex_dates) {
                return Some(candidate);
            }
            offset_days += interval;
        }
        None
    }

    pub fn describe(&self) -> String {
        if self.interval == 1 {
            "daily".to_string()
        } else {
            format!("every {} days", self.interval)
        }
    }
}
