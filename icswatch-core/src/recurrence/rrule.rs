//! RRULE text parsing and formatting.
//!
//! Handles the subset of RFC 5545 recurrence rules the engine expands:
//! FREQ, INTERVAL, UNTIL, COUNT, BYDAY (weekly), BYMONTHDAY and BYMONTH.
//! Unknown keys are ignored; a missing FREQ or an unsupported frequency is
//! an error that drops the owning event at its construction site.

use std::collections::HashMap;

use chrono::{NaiveDate, NaiveDateTime, Weekday};

use crate::error::{IcsWatchError, IcsWatchResult};

use super::{DailyRule, MonthlyRule, Recurrence, WeeklyRule, YearlyRule};

/// Parse an RRULE value (the text after `RRULE:`) into a [`Recurrence`].
/// An empty string means "does not repeat".
pub fn parse_rrule(input: &str) -> IcsWatchResult<Recurrence> {
    let trimmed = input.trim();
    if trimmed.is_empty() {
        return Ok(Recurrence::None);
    }

    let mut parts: HashMap<String, String> = HashMap::new();
    for piece in trimmed.split(';') {
        if let Some((key, value)) = piece.split_once('=') {
            parts.insert(
                key.trim().to_ascii_uppercase(),
                value.trim().to_ascii_uppercase(),
            );
        }
    }

    let freq = parts
        .get("FREQ")
        .ok_or_else(|| IcsWatchError::Recurrence(format!("missing FREQ in '{trimmed}'")))?;

    let interval = parts
        .get("INTERVAL")
        .and_then(|value| value.parse::<u32>().ok())
        .filter(|interval| *interval > 0)
        .unwrap_or(1);

    let until = parts.get("UNTIL").map(|value| parse_until(value)).transpose()?;

    let count = parts
        .get("COUNT")
        .and_then(|value| value.parse::<u32>().ok())
        .filter(|count| *count > 0);

    match freq.as_str() {
        "DAILY" => Ok(Recurrence::Daily(DailyRule::new(interval, until, count))),
        "WEEKLY" => Ok(Recurrence::Weekly(WeeklyRule::new(
            interval,
            parse_by_day(parts.get("BYDAY")),
            until,
            count,
        ))),
        "MONTHLY" => Ok(Recurrence::Monthly(MonthlyRule::new(
            interval,
            parse_by_month_day(parts.get("BYMONTHDAY")),
            until,
            count,
        ))),
        "YEARLY" => Ok(Recurrence::Yearly(YearlyRule::new(
            interval,
            parse_by_month(parts.get("BYMONTH")),
            parse_by_month_day(parts.get("BYMONTHDAY")),
            until,
            count,
        ))),
        other => Err(IcsWatchError::Recurrence(format!(
            "unsupported frequency: {other}"
        ))),
    }
}

/// UNTIL is inclusive per RFC 5545. A date-only value covers the whole
/// named day, so it normalizes to that day's last second.
fn parse_until(value: &str) -> IcsWatchResult<NaiveDateTime> {
    let value = value.trim_end_matches('Z');
    if value.len() == 8 {
        let date = NaiveDate::parse_from_str(value, "%Y%m%d")
            .map_err(|err| IcsWatchError::Recurrence(format!("invalid UNTIL '{value}': {err}")))?;
        Ok(date.and_hms_opt(23, 59, 59).unwrap_or_default())
    } else {
        NaiveDateTime::parse_from_str(value, "%Y%m%dT%H%M%S")
            .map_err(|err| IcsWatchError::Recurrence(format!("invalid UNTIL '{value}': {err}")))
    }
}

/// BYDAY values like `MO,WE,FR`. Ordinal prefixes (`-1FR`, `2MO`) are not
/// expanded; only the weekday code is honored.
fn parse_by_day(value: Option<&String>) -> Vec<Weekday> {
    let Some(value) = value else {
        return Vec::new();
    };
    value
        .split(',')
        .filter_map(|token| {
            let token = token.trim();
            if token.len() < 2 {
                return None;
            }
            match &token[token.len() - 2..] {
                "MO" => Some(Weekday::Mon),
                "TU" => Some(Weekday::Tue),
                "WE" => Some(Weekday::Wed),
                "TH" => Some(Weekday::Thu),
                "FR" => Some(Weekday::Fri),
                "SA" => Some(Weekday::Sat),
                "SU" => Some(Weekday::Sun),
                _ => None,
            }
        })
        .collect()
}

fn parse_by_month_day(value: Option<&String>) -> Vec<i8> {
    let Some(value) = value else {
        return Vec::new();
    };
    value
        .split(',')
        .filter_map(|token| token.trim().parse::<i8>().ok())
        .filter(|day| (1..=31).contains(day) || (-31..=-1).contains(day))
        .collect()
}

fn parse_by_month(value: Option<&String>) -> Vec<u32> {
    let Some(value) = value else {
        return Vec::new();
    };
    value
        .split(',')
        .filter_map(|token| token.trim().parse::<u32>().ok())
        .filter(|month| (1..=12).contains(month))
        .collect()
}

/// Format a [`Recurrence`] back into RRULE text, mostly for logs.
pub fn to_rrule_string(recurrence: &Recurrence) -> String {
    let mut parts: Vec<String> = Vec::new();
    let (until, count) = match recurrence {
        Recurrence::None => return String::new(),
        Recurrence::Daily(rule) => {
            parts.push("FREQ=DAILY".to_string());
            parts.push(format!("INTERVAL={}", rule.interval));
            (rule.until, rule.count)
        }
        Recurrence::Weekly(rule) => {
            parts.push("FREQ=WEEKLY".to_string());
            parts.push(format!("INTERVAL={}", rule.interval));
            if !rule.by_day.is_empty() {
                let days: Vec<&str> = rule
                    .by_day
                    .iter()
                    .map(|day| match day {
                        Weekday::Mon => "MO",
                        Weekday::Tue => "TU",
                        Weekday::Wed => "WE",
                        Weekday::Thu => "TH",
                        Weekday::Fri => "FR",
                        Weekday::Sat => "SA",
                        Weekday::Sun => "SU",
                    })
                    .collect();
                parts.push(format!("BYDAY={}", days.join(",")));
            }
            (rule.until, rule.count)
        }
        Recurrence::Monthly(rule) => {
            parts.push("FREQ=MONTHLY".to_string());
            parts.push(format!("INTERVAL={}", rule.interval));
            if !rule.by_month_day.is_empty() {
                parts.push(format!("BYMONTHDAY={}", join_numbers(&rule.by_month_day)));
            }
            (rule.until, rule.count)
        }
        Recurrence::Yearly(rule) => {
            parts.push("FREQ=YEARLY".to_string());
            parts.push(format!("INTERVAL={}", rule.interval));
            if !rule.by_month.is_empty() {
                parts.push(format!("BYMONTH={}", join_numbers(&rule.by_month)));
            }
            if !rule.by_month_day.is_empty() {
                parts.push(format!("BYMONTHDAY={}", join_numbers(&rule.by_month_day)));
            }
            (rule.until, rule.count)
        }
    };
    if let Some(until) = until {
        parts.push(format!("UNTIL={}", until.format("%Y%m%dT%H%M%SZ")));
    }
    if let Some(count) = count {
        parts.push(format!("COUNT={count}"));
    }
    parts.join(";")
}

fn join_numbers<T: ToString>(values: &[T]) -> String {
    values
        .iter()
        .map(|v| v.to_string())
        .collect::<Vec<_>>()
        .join(",")
}
