//! Recurrence rules for repeating events.
//!
//! Each supported RRULE frequency is a variant of [`Recurrence`], and the
//! three query operations are total over all variants. Expansion walks
//! wall-clock dates in the event's own timezone, so a 10:00 daily meeting
//! stays at 10:00 across a DST transition instead of drifting by an hour.

mod daily;
mod monthly;
mod rrule;
mod weekly;
mod yearly;

pub use daily::DailyRule;
pub use monthly::MonthlyRule;
pub use rrule::{parse_rrule, to_rrule_string};
pub use weekly::WeeklyRule;
pub use yearly::YearlyRule;

use chrono::{DateTime, Datelike, Duration, LocalResult, NaiveDate, NaiveDateTime, TimeZone};
use chrono_tz::Tz;

/// Hard cap on expansion steps. Never reached by a well-formed rule over a
/// sane range; keeps pathological inputs from wedging the scheduler.
pub(crate) const MAX_EXPANSION_STEPS: usize = 10_000;

/// A recurrence rule attached to an event, including "does not repeat".
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Recurrence {
    None,
    Daily(DailyRule),
    Weekly(WeeklyRule),
    Monthly(MonthlyRule),
    Yearly(YearlyRule),
}

impl Recurrence {
    pub fn is_recurring(&self) -> bool {
        !matches!(self, Recurrence::None)
    }

    /// Whether an occurrence falls on `date` (a calendar day in the event's
    /// zone). `base` is the event's first start instant.
    pub fn occurs_on(&self, date: NaiveDate, base: DateTime<Tz>) -> bool {
        match self {
            Recurrence::None => base.date_naive() == date,
            Recurrence::Daily(rule) => rule.occurs_on(date, base),
            Recurrence::Weekly(rule) => rule.occurs_on(date, base),
            Recurrence::Monthly(rule) => rule.occurs_on(date, base),
            Recurrence::Yearly(rule) => rule.occurs_on(date, base),
        }
    }

    /// All occurrence instants within `[start, end]` (both bounds
    /// inclusive), excluding any instant listed in `ex_dates`.
    pub fn within(
        &self,
        start: DateTime<Tz>,
        end: DateTime<Tz>,
        base: DateTime<Tz>,
        ex_dates: &[DateTime<Tz>],
    ) -> Vec<DateTime<Tz>> {
        match self {
            Recurrence::None => {
                if base >= start && base <= end && !is_excluded(base, ex_dates) {
                    vec![base]
                } else {
                    Vec::new()
                }
            }
            Recurrence::Daily(rule) => rule.within(start, end, base, ex_dates),
            Recurrence::Weekly(rule) => rule.within(start, end, base, ex_dates),
            Recurrence::Monthly(rule) => rule.within(start, end, base, ex_dates),
            Recurrence::Yearly(rule) => rule.within(start, end, base, ex_dates),
        }
    }

    /// The first occurrence strictly after `after`, or `None` if the rule
    /// is exhausted.
    pub fn next_after(
        &self,
        after: DateTime<Tz>,
        base: DateTime<Tz>,
        ex_dates: &[DateTime<Tz>],
    ) -> Option<DateTime<Tz>> {
        match self {
            Recurrence::None => (base > after && !is_excluded(base, ex_dates)).then_some(base),
            Recurrence::Daily(rule) => rule.next_after(after, base, ex_dates),
            Recurrence::Weekly(rule) => rule.next_after(after, base, ex_dates),
            Recurrence::Monthly(rule) => rule.next_after(after, base, ex_dates),
            Recurrence::Yearly(rule) => rule.next_after(after, base, ex_dates),
        }
    }

    /// Human-readable description, e.g. "weekly on Mon, Wed".
    pub fn describe(&self) -> String {
        match self {
            Recurrence::None => "does not repeat".to_string(),
            Recurrence::Daily(rule) => rule.describe(),
            Recurrence::Weekly(rule) => rule.describe(),
            Recurrence::Monthly(rule) => rule.describe(),
            Recurrence::Yearly(rule) => rule.describe(),
        }
    }
}

/// Resolve a wall-clock datetime in `tz` to an instant.
///
/// Ambiguous times (fall-back transition) resolve to the earlier mapping.
/// Times inside a spring-forward gap shift forward to the first valid
/// wall-clock instant.
pub fn resolve_local(tz: Tz, naive: NaiveDateTime) -> DateTime<Tz> {
    match tz.from_local_datetime(&naive) {
        LocalResult::Single(dt) => dt,
        LocalResult::Ambiguous(earliest, _) => earliest,
        LocalResult::None => {
            let mut probe = naive;
            for _ in 0..8 {
                probe += Duration::minutes(30);
                match tz.from_local_datetime(&probe) {
                    LocalResult::Single(dt) => return dt,
                    LocalResult::Ambiguous(earliest, _) => return earliest,
                    LocalResult::None => continue,
                }
            }
            // No transition is longer than a few hours; treat as UTC rather
            // than loop forever on a broken zone definition.
            tz.from_utc_datetime(&naive)
        }
    }
}

/// Instant-equality check against the exception date list. The list is
/// small; a linear scan is fine.
pub(crate) fn is_excluded(candidate: DateTime<Tz>, ex_dates: &[DateTime<Tz>]) -> bool {
    ex_dates.iter().any(|ex| *ex == candidate)
}

/// Monday of the week containing `date`.
pub(crate) fn week_start(date: NaiveDate) -> NaiveDate {
    date - Duration::days(date.weekday().num_days_from_monday() as i64)
}

pub(crate) fn days_in_month(year: i32, month: u32) -> u32 {
    let (next_year, next_month) = if month == 12 {
        (year + 1, 1)
    } else {
        (year, month + 1)
    };
    NaiveDate::from_ymd_opt(next_year, next_month, 1)
        .and_then(|first| first.pred_opt())
        .map(|last| last.day())
        .unwrap_or(28)
}

/// Resolve a signed BYMONTHDAY value for a specific month. Negative values
/// count from the month end; a day past the month's length clamps to the
/// last day. Returns `None` when the value resolves before day 1.
pub(crate) fn clamp_month_day(year: i32, month: u32, day: i8) -> Option<u32> {
    let len = days_in_month(year, month) as i32;
    let resolved = if day < 0 {
        len + day as i32 + 1
    } else {
        day as i32
    };
    if resolved < 1 {
        None
    } else {
        Some(resolved.min(len) as u32)
    }
}
