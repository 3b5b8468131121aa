//! ICS parsing using the icalendar crate's parser.
//!
//! Turns VEVENT components into engine [`Event`]s: zoned start/end times,
//! recurrence rules handed to the RRULE parser, TZID-aware EXDATEs and
//! VALARM blocks as intrinsic alerts. A VEVENT with a broken RRULE is
//! dropped with a log; its siblings in the same file survive.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration as StdDuration;

use chrono::{NaiveTime, TimeZone};
use chrono_tz::Tz;
use icalendar::{
    parser::{read_calendar, unfold, Component, Property},
    CalendarDateTime, DatePerhapsTime,
};
use tracing::{debug, warn};

use crate::alert::Alert;
use crate::calendar::Calendar;
use crate::error::{IcsWatchError, IcsWatchResult};
use crate::event::Event;
use crate::recurrence::{parse_rrule, resolve_local, Recurrence};

/// Zone used for floating times and all-day dates, which carry no zone of
/// their own.
const DEFAULT_ZONE: Tz = chrono_tz::UTC;

/// Parse every VEVENT in a file into events owned by `calendar`.
pub fn parse_calendar_file(
    path: &Path,
    calendar: &Arc<Calendar>,
) -> IcsWatchResult<Vec<Arc<Event>>> {
    let content = fs::read_to_string(path).map_err(|err| {
        IcsWatchError::Parse(format!("failed to read {}: {err}", path.display()))
    })?;
    parse_events(&content, calendar)
}

/// Parse ICS text into events owned by `calendar`. Individual events that
/// fail to convert are dropped with a log.
pub fn parse_events(content: &str, calendar: &Arc<Calendar>) -> IcsWatchResult<Vec<Arc<Event>>> {
    let unfolded = unfold(content);
    let parsed = read_calendar(&unfolded)
        .map_err(|err| IcsWatchError::Parse(format!("invalid calendar data: {err}")))?;

    let mut events = Vec::new();
    for component in parsed.components.iter().filter(|c| c.name == "VEVENT") {
        match event_from_component(component, calendar) {
            Ok(event) => events.push(Arc::new(event)),
            Err(err) => warn!(%err, "dropping unparseable VEVENT"),
        }
    }
    Ok(events)
}

/// Parse every `.ics` file directly inside `dir`. Per-file failures are
/// logged and skipped so one broken file cannot take down a calendar.
pub fn scan_directory(
    dir: &Path,
    calendar: &Arc<Calendar>,
) -> IcsWatchResult<Vec<(PathBuf, Vec<Arc<Event>>)>> {
    let entries = fs::read_dir(dir).map_err(|err| {
        IcsWatchError::Parse(format!("failed to read directory {}: {err}", dir.display()))
    })?;

    let mut results = Vec::new();
    for entry in entries.flatten() {
        let path = entry.path();
        if !is_ics_file(&path) {
            continue;
        }
        match parse_calendar_file(&path, calendar) {
            Ok(events) => results.push((path, events)),
            Err(err) => warn!(file = %path.display(), %err, "skipping unparseable calendar file"),
        }
    }
    Ok(results)
}

/// `.ics` by extension, case-insensitive, and a regular file.
pub fn is_ics_file(path: &Path) -> bool {
    path.is_file()
        && path
            .extension()
            .and_then(|ext| ext.to_str())
            .map(|ext| ext.eq_ignore_ascii_case("ics"))
            .unwrap_or(false)
}

fn event_from_component(vevent: &Component, calendar: &Arc<Calendar>) -> IcsWatchResult<Event> {
    let uid = vevent
        .find_prop("UID")
        .map(|prop| prop.val.to_string())
        .ok_or_else(|| IcsWatchError::Parse("VEVENT missing UID".to_string()))?;

    let summary = vevent
        .find_prop("SUMMARY")
        .map(|prop| prop.val.to_string())
        .unwrap_or_default();
    let description = vevent
        .find_prop("DESCRIPTION")
        .map(|prop| prop.val.to_string())
        .unwrap_or_default();
    let location = vevent
        .find_prop("LOCATION")
        .map(|prop| prop.val.to_string())
        .unwrap_or_default();

    let start_prop = vevent
        .find_prop("DTSTART")
        .ok_or_else(|| IcsWatchError::Parse(format!("event {uid} missing DTSTART")))?;
    let start_value = DatePerhapsTime::try_from(start_prop)
        .map_err(|_| IcsWatchError::Parse(format!("event {uid} has an invalid DTSTART")))?;
    let start = to_zoned(start_value, DEFAULT_ZONE);

    let end = match vevent.find_prop("DTEND") {
        Some(prop) => {
            let value = DatePerhapsTime::try_from(prop)
                .map_err(|_| IcsWatchError::Parse(format!("event {uid} has an invalid DTEND")))?;
            to_zoned(value, start.zone).instant
        }
        // RFC 5545: a date start without DTEND covers one day; a datetime
        // start without DTEND is point-in-time.
        None if start.all_day => start.instant + chrono::Duration::days(1),
        None => start.instant,
    };

    let recurrence = match vevent.find_prop("RRULE") {
        Some(prop) => parse_rrule(prop.val.as_ref())?,
        None => Recurrence::None,
    };

    let ex_dates: Vec<_> = vevent
        .properties
        .iter()
        .filter(|prop| prop.name == "EXDATE")
        .flat_map(|prop| parse_exdate_property(prop, start.zone))
        .collect();

    let intrinsic_alerts: Vec<Alert> = vevent
        .components
        .iter()
        .filter(|component| component.name == "VALARM")
        .filter_map(alarm_from_component)
        .collect();

    Ok(Event::new(
        uid,
        summary,
        description,
        location,
        start.instant,
        end,
        start.zone,
        recurrence,
        ex_dates,
        Arc::downgrade(calendar),
        intrinsic_alerts,
    ))
}

struct ZonedStart {
    instant: chrono::DateTime<Tz>,
    zone: Tz,
    all_day: bool,
}

/// Resolve a DTSTART/DTEND value to an instant plus its authoritative
/// zone. Floating times and all-day dates use `fallback`.
fn to_zoned(value: DatePerhapsTime, fallback: Tz) -> ZonedStart {
    match value {
        DatePerhapsTime::Date(date) => ZonedStart {
            instant: resolve_local(fallback, date.and_time(NaiveTime::MIN)),
            zone: fallback,
            all_day: true,
        },
        DatePerhapsTime::DateTime(value) => match value {
            CalendarDateTime::Utc(datetime) => ZonedStart {
                instant: datetime.with_timezone(&chrono_tz::UTC),
                zone: chrono_tz::UTC,
                all_day: false,
            },
            CalendarDateTime::Floating(naive) => ZonedStart {
                instant: resolve_local(fallback, naive),
                zone: fallback,
                all_day: false,
            },
            CalendarDateTime::WithTimezone { date_time, tzid } => match tzid.parse::<Tz>() {
                Ok(zone) => ZonedStart {
                    instant: resolve_local(zone, date_time),
                    zone,
                    all_day: false,
                },
                Err(_) => {
                    warn!(%tzid, "unknown TZID; interpreting in UTC");
                    ZonedStart {
                        instant: resolve_local(fallback, date_time),
                        zone: fallback,
                        all_day: false,
                    }
                }
            },
        },
    }
}

/// Parse an EXDATE property into excluded instants.
///
/// Handles TZID parameters, `VALUE=DATE`, UTC (`Z` suffix), floating
/// values in the event's zone, and comma-separated lists.
fn parse_exdate_property(prop: &Property, event_zone: Tz) -> Vec<chrono::DateTime<Tz>> {
    let tzid: Option<Tz> = prop
        .params
        .iter()
        .find(|param| param.key == "TZID")
        .and_then(|param| param.val.as_ref())
        .and_then(|value| value.as_ref().parse::<Tz>().ok());

    let is_date = prop
        .params
        .iter()
        .any(|param| param.key == "VALUE" && param.val.as_ref().map(|v| v.as_ref()) == Some("DATE"));

    prop.val
        .as_ref()
        .split(',')
        .filter_map(|token| {
            let token = token.trim();
            if token.is_empty() {
                return None;
            }
            if is_date {
                chrono::NaiveDate::parse_from_str(token, "%Y%m%d")
                    .ok()
                    .map(|date| resolve_local(event_zone, date.and_time(NaiveTime::MIN)))
            } else if let Some(zone) = tzid {
                chrono::NaiveDateTime::parse_from_str(token, "%Y%m%dT%H%M%S")
                    .ok()
                    .map(|naive| resolve_local(zone, naive))
            } else if let Some(stripped) = token.strip_suffix('Z') {
                chrono::NaiveDateTime::parse_from_str(stripped, "%Y%m%dT%H%M%S")
                    .ok()
                    .map(|naive| chrono_tz::UTC.from_utc_datetime(&naive))
            } else {
                chrono::NaiveDateTime::parse_from_str(token, "%Y%m%dT%H%M%S")
                    .ok()
                    .map(|naive| resolve_local(event_zone, naive))
            }
        })
        .collect()
}

/// Convert a VALARM component to an intrinsic alert. Non-DISPLAY actions
/// and unsupported trigger forms are dropped with a log.
fn alarm_from_component(alarm: &Component) -> Option<Alert> {
    if let Some(action) = alarm.find_prop("ACTION") {
        let action = action.val.as_ref().to_ascii_uppercase();
        if action != "DISPLAY" {
            debug!(%action, "dropping VALARM with unsupported action");
            return None;
        }
    }

    let trigger = alarm.find_prop("TRIGGER")?;
    let offset = match parse_trigger_offset(trigger.val.as_ref()) {
        Some(offset) => offset,
        None => {
            debug!(trigger = %trigger.val.as_ref(), "dropping VALARM with unsupported trigger");
            return None;
        }
    };

    let description = alarm
        .find_prop("DESCRIPTION")
        .map(|prop| prop.val.to_string());

    Some(Alert::intrinsic(offset, description))
}

/// Parse a relative TRIGGER value (`-PT15M`, `-P1DT2H30M`) into an offset
/// before the event start. Positive and absolute triggers are not
/// supported.
fn parse_trigger_offset(value: &str) -> Option<StdDuration> {
    let rest = value.trim().strip_prefix('-')?;
    let duration = iso8601::duration(rest).ok()?;
    Some(duration.into())
}
