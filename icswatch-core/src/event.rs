//! The in-memory event model.
//!
//! One [`Event`] per VEVENT. Events are immutable after construction
//! except for their alert ledger, which tracks per-offset delivery state
//! for the occurrence currently in flight. Events reach their owning
//! calendar through a weak handle, so a configuration reload that swaps
//! the calendar's automatic alert list is visible to every event on the
//! next computation without re-parsing anything.

use std::collections::HashMap;
use std::sync::{Mutex, PoisonError, Weak};
use std::time::Duration as StdDuration;

use chrono::{DateTime, Duration, NaiveDate, Utc};
use chrono_tz::Tz;

use crate::alert::{dedup_alerts, offset_to_chrono, Alert, AlertState};
use crate::calendar::Calendar;
use crate::error::internal_invariant;
use crate::recurrence::{is_excluded, resolve_local, Recurrence};

/// A computed "this alert should fire" record.
///
/// `event_time` stays in the event's zone (the authoritative display
/// zone); `alert_time` is the UTC instant the alert was due.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Occurrence {
    pub event_time: DateTime<Tz>,
    pub alert_time: DateTime<Utc>,
    pub offset: StdDuration,
    pub important: bool,
    pub late: bool,
}

/// Per-offset delivery state plus the occurrence it belongs to.
///
/// The state keys are alert offsets, not occurrences: "5-minute warning"
/// is one policy position that is re-armed for every occurrence of a
/// recurring event. `epoch` records which occurrence the current states
/// were set for, so the scheduler can reset the map when it crosses to
/// the next one.
#[derive(Debug, Clone, Default)]
struct AlertLedger {
    states: HashMap<StdDuration, AlertState>,
    epoch: Option<DateTime<Utc>>,
}

/// A calendar event with alert tracking.
#[derive(Debug)]
pub struct Event {
    uid: String,
    summary: String,
    description: String,
    location: String,
    start: DateTime<Tz>,
    end: DateTime<Tz>,
    zone: Tz,
    recurrence: Recurrence,
    ex_dates: Vec<DateTime<Tz>>,
    intrinsic_alerts: Vec<Alert>,
    calendar: Weak<Calendar>,
    ledger: Mutex<AlertLedger>,
}

impl Event {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        uid: impl Into<String>,
        summary: impl Into<String>,
        description: impl Into<String>,
        location: impl Into<String>,
        start: DateTime<Tz>,
        end: DateTime<Tz>,
        zone: Tz,
        recurrence: Recurrence,
        ex_dates: Vec<DateTime<Tz>>,
        calendar: Weak<Calendar>,
        intrinsic_alerts: Vec<Alert>,
    ) -> Event {
        // An end before the start would break duration math everywhere
        // downstream; collapse to a zero-length event instead.
        let end = if end < start { start } else { end };
        Event {
            uid: uid.into(),
            summary: summary.into(),
            description: description.into(),
            location: location.into(),
            start,
            end,
            zone,
            recurrence,
            ex_dates,
            intrinsic_alerts,
            calendar,
            ledger: Mutex::new(AlertLedger::default()),
        }
    }

    pub fn uid(&self) -> &str {
        &self.uid
    }

    pub fn summary(&self) -> &str {
        &self.summary
    }

    pub fn description(&self) -> &str {
        &self.description
    }

    pub fn location(&self) -> &str {
        &self.location
    }

    pub fn start(&self) -> DateTime<Tz> {
        self.start
    }

    pub fn end(&self) -> DateTime<Tz> {
        self.end
    }

    pub fn zone(&self) -> Tz {
        self.zone
    }

    pub fn recurrence(&self) -> &Recurrence {
        &self.recurrence
    }

    pub fn is_recurring(&self) -> bool {
        self.recurrence.is_recurring()
    }

    pub fn ex_dates(&self) -> &[DateTime<Tz>] {
        &self.ex_dates
    }

    pub fn duration(&self) -> Duration {
        self.end - self.start
    }

    /// The owning calendar, if it is still alive.
    pub fn calendar(&self) -> Option<std::sync::Arc<Calendar>> {
        self.calendar.upgrade()
    }

    /// The owning calendar's notification template name.
    pub fn template(&self) -> String {
        self.calendar()
            .map(|calendar| calendar.template())
            .unwrap_or_default()
    }

    pub fn intrinsic_alerts(&self) -> &[Alert] {
        &self.intrinsic_alerts
    }

    /// The deduplicated union of intrinsic (VALARM) alerts and the owning
    /// calendar's current automatic alerts. Reads the calendar's list at
    /// call time, so configuration reloads take effect on the next tick.
    pub fn alerts(&self) -> Vec<Alert> {
        let mut alerts = self.intrinsic_alerts.clone();
        if let Some(calendar) = self.calendar() {
            alerts.extend(calendar.automatic_alerts().iter().cloned());
        }
        dedup_alerts(alerts)
    }

    fn max_alert_offset(&self, alerts: &[Alert]) -> StdDuration {
        alerts
            .iter()
            .map(|alert| alert.offset)
            .max()
            .unwrap_or_default()
    }

    /// Raw event occurrence instants within `[start, end]` (inclusive),
    /// with exception dates removed.
    pub fn event_occurrences_within(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Vec<DateTime<Tz>> {
        let start = start.with_timezone(&self.zone);
        let end = end.with_timezone(&self.zone);
        self.recurrence.within(start, end, self.start, &self.ex_dates)
    }

    /// The next event occurrence strictly after `after`.
    pub fn next_occurrence(&self, after: DateTime<Utc>) -> Option<DateTime<Tz>> {
        self.recurrence
            .next_after(after.with_timezone(&self.zone), self.start, &self.ex_dates)
    }

    /// All alert occurrences whose alert time falls in `(start, end]`.
    ///
    /// The event search window is widened by each alert's offset: a 1-hour
    /// warning for a meeting just past `end` still belongs to this range.
    /// `late` marks alert times more than one minute before `end`.
    pub fn occurrences_within(&self, start: DateTime<Utc>, end: DateTime<Utc>) -> Vec<Occurrence> {
        let alerts = self.alerts();
        if alerts.is_empty() {
            return Vec::new();
        }

        let max_offset = self.max_alert_offset(&alerts);
        let search_end = end + offset_to_chrono(max_offset);
        let event_times = self.event_occurrences_within(start, search_end);

        let late_threshold = end - Duration::minutes(1);
        let mut occurrences = Vec::new();
        for event_time in event_times {
            for alert in &alerts {
                let alert_time =
                    event_time.with_timezone(&Utc) - offset_to_chrono(alert.offset);
                if alert_time > start && alert_time <= end {
                    occurrences.push(Occurrence {
                        event_time,
                        alert_time,
                        offset: alert.offset,
                        important: alert.important,
                        late: alert_time < late_threshold,
                    });
                }
            }
        }
        occurrences
    }

    /// Whether this event belongs in the day-index bucket for `date`: it
    /// either occurs on that day (in its own zone) or one of its alerts
    /// fires during it. This is what puts tomorrow's meeting with a 1-day
    /// warning into today's bucket.
    pub fn occurs_on(&self, date: NaiveDate) -> bool {
        if self.event_occurs_on(date) {
            return true;
        }

        let alerts = self.alerts();
        if alerts.is_empty() {
            return false;
        }

        let day_start = resolve_local(self.zone, date.and_hms_opt(0, 0, 0).unwrap_or_default());
        let next_day = date.succ_opt().unwrap_or(date);
        let day_end = resolve_local(self.zone, next_day.and_hms_opt(0, 0, 0).unwrap_or_default());

        let max_offset = self.max_alert_offset(&alerts);
        let search_end = day_end + offset_to_chrono(max_offset);
        let event_times = self
            .recurrence
            .within(day_start, search_end, self.start, &self.ex_dates);

        let day_start = day_start.with_timezone(&Utc);
        let day_end = day_end.with_timezone(&Utc);
        for event_time in event_times {
            for alert in &alerts {
                let alert_time =
                    event_time.with_timezone(&Utc) - offset_to_chrono(alert.offset);
                if alert_time >= day_start && alert_time < day_end {
                    return true;
                }
            }
        }
        false
    }

    /// Whether the event itself (ignoring alerts) occurs on `date`.
    fn event_occurs_on(&self, date: NaiveDate) -> bool {
        match &self.recurrence {
            Recurrence::None => {
                self.start.date_naive() == date && !is_excluded(self.start, &self.ex_dates)
            }
            recurrence => recurrence.occurs_on(date, self.start),
        }
    }

    fn ledger(&self) -> std::sync::MutexGuard<'_, AlertLedger> {
        self.ledger.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Current state for an alert offset; unknown offsets are `Pending`.
    pub fn alert_state(&self, offset: StdDuration) -> AlertState {
        self.ledger()
            .states
            .get(&offset)
            .copied()
            .unwrap_or_default()
    }

    pub fn set_alert_state(&self, offset: StdDuration, state: AlertState) {
        self.ledger().states.insert(offset, state);
    }

    /// Snapshot of all tracked offsets, for status reporting and tests.
    pub fn alert_states(&self) -> HashMap<StdDuration, AlertState> {
        self.ledger().states.clone()
    }

    /// Clear all per-offset states, re-arming every alert.
    pub fn reset_alert_states(&self) {
        let mut ledger = self.ledger();
        ledger.states.clear();
        ledger.epoch = None;
    }

    /// The occurrence the current states were recorded for.
    pub fn state_epoch(&self) -> Option<DateTime<Utc>> {
        self.ledger().epoch
    }

    /// Record which occurrence the states now belong to. Occurrences are
    /// processed in event-time order, so the epoch only moves forward.
    pub fn mark_epoch(&self, event_time: DateTime<Utc>) {
        let mut ledger = self.ledger();
        if let Some(current) = ledger.epoch {
            if current > event_time {
                internal_invariant(format!(
                    "ledger epoch for {} moved backwards: {current} -> {event_time}",
                    self.uid
                ));
                return;
            }
        }
        ledger.epoch = Some(event_time);
    }

    /// Re-arm a recurring event once the occurrence its states belong to
    /// has ended: the next occurrence's alerts must be `Pending` again.
    pub fn maybe_reset_for_next_occurrence(&self, now: DateTime<Utc>) {
        if !self.is_recurring() {
            return;
        }
        let mut ledger = self.ledger();
        if let Some(epoch) = ledger.epoch {
            if epoch + (self.end - self.start) < now {
                ledger.states.clear();
                ledger.epoch = None;
            }
        }
    }

    /// Carry already-delivered states over from a previous parse of the
    /// same UID, so a file rewrite does not re-fire alerts that were sent.
    pub fn adopt_sent_states(&self, previous: &Event) {
        let previous_ledger = previous.ledger();
        let mut ledger = self.ledger();
        for (offset, state) in previous_ledger.states.iter() {
            if *state == AlertState::Sent {
                ledger.states.insert(*offset, *state);
            }
        }
        if ledger.epoch.is_none() {
            ledger.epoch = previous_ledger.epoch;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::alert::AlertSource;
    use crate::recurrence::{DailyRule, WeeklyRule};
    use chrono::{TimeZone, Weekday};
    use chrono_tz::Europe::Berlin;
    use std::sync::Arc;

    fn berlin(y: i32, mo: u32, d: u32, h: u32, mi: u32) -> DateTime<Tz> {
        Berlin.with_ymd_and_hms(y, mo, d, h, mi, 0).unwrap()
    }

    fn utc_of(dt: DateTime<Tz>) -> DateTime<Utc> {
        dt.with_timezone(&Utc)
    }

    fn calendar_with_alerts(alerts: Vec<Alert>) -> Arc<Calendar> {
        Arc::new(Calendar::new("/tmp/cal", "default.tpl", alerts))
    }

    fn event_on(
        calendar: &Arc<Calendar>,
        start: DateTime<Tz>,
        end: DateTime<Tz>,
        recurrence: Recurrence,
        intrinsic: Vec<Alert>,
    ) -> Event {
        Event::new(
            "uid-1",
            "Team meeting",
            "",
            "",
            start,
            end,
            Berlin,
            recurrence,
            Vec::new(),
            Arc::downgrade(calendar),
            intrinsic,
        )
    }

    #[test]
    fn test_single_alert_fires_in_exact_tick_window() {
        // Event at 14:00 with a 15-minute alert: the tick window
        // (13:44, 13:45] yields exactly one occurrence at 13:45.
        let calendar =
            calendar_with_alerts(vec![Alert::from_config(15, "minutes", false).unwrap()]);
        let event = event_on(
            &calendar,
            berlin(2025, 3, 10, 14, 0),
            berlin(2025, 3, 10, 15, 0),
            Recurrence::None,
            Vec::new(),
        );

        let hits = event.occurrences_within(
            utc_of(berlin(2025, 3, 10, 13, 44)),
            utc_of(berlin(2025, 3, 10, 13, 45)),
        );
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].alert_time, utc_of(berlin(2025, 3, 10, 13, 45)));
        assert_eq!(hits[0].event_time, berlin(2025, 3, 10, 14, 0));
        assert!(!hits[0].late);

        let next = event.occurrences_within(
            utc_of(berlin(2025, 3, 10, 13, 45)),
            utc_of(berlin(2025, 3, 10, 13, 46)),
        );
        assert!(next.is_empty());
    }

    #[test]
    fn test_valarm_wins_over_config_at_same_offset() {
        // Config 10m + VALARM 10m collapse to one alert, the intrinsic one.
        let calendar =
            calendar_with_alerts(vec![Alert::from_config(10, "minutes", false).unwrap()]);
        let event = event_on(
            &calendar,
            berlin(2025, 3, 10, 14, 0),
            berlin(2025, 3, 10, 15, 0),
            Recurrence::None,
            vec![Alert::intrinsic(StdDuration::from_secs(600), None)],
        );

        let alerts = event.alerts();
        assert_eq!(alerts.len(), 1);
        assert_eq!(alerts[0].source, AlertSource::Valarm);

        let hits = event.occurrences_within(
            utc_of(berlin(2025, 3, 10, 13, 49)),
            utc_of(berlin(2025, 3, 10, 13, 50)),
        );
        assert_eq!(hits.len(), 1);
    }

    #[test]
    fn test_offset_widening_catches_distant_event() {
        // A 1-hour alert for a meeting one hour past the window end is
        // only found because the event search is widened by the offset.
        let calendar = calendar_with_alerts(vec![Alert::from_config(1, "hours", false).unwrap()]);
        let event = event_on(
            &calendar,
            berlin(2025, 3, 10, 15, 0),
            berlin(2025, 3, 10, 16, 0),
            Recurrence::None,
            Vec::new(),
        );

        let hits = event.occurrences_within(
            utc_of(berlin(2025, 3, 10, 13, 59)),
            utc_of(berlin(2025, 3, 10, 14, 0)),
        );
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].alert_time, utc_of(berlin(2025, 3, 10, 14, 0)));
    }

    #[test]
    fn test_occurs_on_includes_one_day_warning() {
        // An event on June 15 with a 1-day alert shows up on June 14.
        let calendar = calendar_with_alerts(vec![Alert::from_config(1, "days", false).unwrap()]);
        let event = event_on(
            &calendar,
            berlin(2025, 6, 15, 9, 0),
            berlin(2025, 6, 15, 10, 0),
            Recurrence::None,
            Vec::new(),
        );

        assert!(event.occurs_on(NaiveDate::from_ymd_opt(2025, 6, 14).unwrap()));
        assert!(event.occurs_on(NaiveDate::from_ymd_opt(2025, 6, 15).unwrap()));
        assert!(!event.occurs_on(NaiveDate::from_ymd_opt(2025, 6, 13).unwrap()));
        assert!(!event.occurs_on(NaiveDate::from_ymd_opt(2025, 6, 16).unwrap()));
    }

    #[test]
    fn test_occurs_on_without_alerts_is_event_day_only() {
        let calendar = calendar_with_alerts(Vec::new());
        let event = event_on(
            &calendar,
            berlin(2025, 6, 15, 9, 0),
            berlin(2025, 6, 15, 10, 0),
            Recurrence::None,
            Vec::new(),
        );
        assert!(event.occurs_on(NaiveDate::from_ymd_opt(2025, 6, 15).unwrap()));
        assert!(!event.occurs_on(NaiveDate::from_ymd_opt(2025, 6, 14).unwrap()));
    }

    #[test]
    fn test_alert_list_updates_visible_without_reparse() {
        let calendar = calendar_with_alerts(Vec::new());
        let event = event_on(
            &calendar,
            berlin(2025, 3, 10, 14, 0),
            berlin(2025, 3, 10, 15, 0),
            Recurrence::None,
            Vec::new(),
        );
        assert!(event.alerts().is_empty());

        calendar
            .update_automatic_alerts(vec![Alert::from_config(5, "minutes", true).unwrap()]);
        let alerts = event.alerts();
        assert_eq!(alerts.len(), 1);
        assert!(alerts[0].important);
    }

    #[test]
    fn test_weekly_occurrences_across_dst() {
        // Weekly Monday 10:00 from 2025-03-24 with a
        // 5-minute alert; the window (Mar 30, Apr 7] contains exactly the
        // Mar 31 09:55 alert.
        let calendar = calendar_with_alerts(vec![Alert::from_config(5, "minutes", false).unwrap()]);
        let event = event_on(
            &calendar,
            berlin(2025, 3, 24, 10, 0),
            berlin(2025, 3, 24, 11, 0),
            Recurrence::Weekly(WeeklyRule::new(1, vec![Weekday::Mon], None, None)),
            Vec::new(),
        );

        let hits = event.occurrences_within(
            utc_of(berlin(2025, 3, 30, 0, 0)),
            utc_of(berlin(2025, 4, 7, 0, 0)),
        );
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].event_time, berlin(2025, 3, 31, 10, 0));
        assert_eq!(hits[0].alert_time, utc_of(berlin(2025, 3, 31, 9, 55)));
    }

    #[test]
    fn test_count_bounds_total_occurrences() {
        // COUNT=3 with two alerts yields at most 3 * 2 occurrences over
        // any range.
        let calendar = calendar_with_alerts(vec![
            Alert::from_config(5, "minutes", false).unwrap(),
            Alert::from_config(10, "minutes", false).unwrap(),
        ]);
        let event = event_on(
            &calendar,
            berlin(2025, 3, 10, 14, 0),
            berlin(2025, 3, 10, 15, 0),
            Recurrence::Daily(DailyRule::new(1, None, Some(3))),
            Vec::new(),
        );

        let hits = event.occurrences_within(
            utc_of(berlin(2025, 3, 1, 0, 0)),
            utc_of(berlin(2025, 4, 30, 0, 0)),
        );
        assert_eq!(hits.len(), 6);
    }

    #[test]
    fn test_alert_state_defaults_pending() {
        let calendar = calendar_with_alerts(Vec::new());
        let event = event_on(
            &calendar,
            berlin(2025, 3, 10, 14, 0),
            berlin(2025, 3, 10, 15, 0),
            Recurrence::None,
            Vec::new(),
        );
        let offset = StdDuration::from_secs(300);
        assert_eq!(event.alert_state(offset), AlertState::Pending);
        event.set_alert_state(offset, AlertState::Sent);
        assert_eq!(event.alert_state(offset), AlertState::Sent);
        event.reset_alert_states();
        assert_eq!(event.alert_state(offset), AlertState::Pending);
    }

    #[test]
    fn test_maybe_reset_clears_after_occurrence_end() {
        let calendar = calendar_with_alerts(vec![Alert::from_config(5, "minutes", false).unwrap()]);
        let event = event_on(
            &calendar,
            berlin(2025, 3, 10, 14, 0),
            berlin(2025, 3, 10, 15, 0),
            Recurrence::Daily(DailyRule::new(1, None, None)),
            Vec::new(),
        );
        let offset = StdDuration::from_secs(300);
        event.set_alert_state(offset, AlertState::Sent);
        event.mark_epoch(utc_of(berlin(2025, 3, 10, 14, 0)));

        // Occurrence still running: no reset.
        event.maybe_reset_for_next_occurrence(utc_of(berlin(2025, 3, 10, 14, 30)));
        assert_eq!(event.alert_state(offset), AlertState::Sent);

        // Past the occurrence end: states re-arm.
        event.maybe_reset_for_next_occurrence(utc_of(berlin(2025, 3, 10, 15, 1)));
        assert_eq!(event.alert_state(offset), AlertState::Pending);
        assert_eq!(event.state_epoch(), None);
    }

    #[test]
    fn test_maybe_reset_ignores_non_recurring() {
        let calendar = calendar_with_alerts(Vec::new());
        let event = event_on(
            &calendar,
            berlin(2025, 3, 10, 14, 0),
            berlin(2025, 3, 10, 15, 0),
            Recurrence::None,
            Vec::new(),
        );
        let offset = StdDuration::from_secs(300);
        event.set_alert_state(offset, AlertState::Sent);
        event.mark_epoch(utc_of(berlin(2025, 3, 10, 14, 0)));
        event.maybe_reset_for_next_occurrence(utc_of(berlin(2025, 3, 12, 0, 0)));
        assert_eq!(event.alert_state(offset), AlertState::Sent);
    }

    #[test]
    fn test_adopt_sent_states_preserves_only_sent() {
        let calendar = calendar_with_alerts(Vec::new());
        let old = event_on(
            &calendar,
            berlin(2025, 3, 10, 14, 0),
            berlin(2025, 3, 10, 15, 0),
            Recurrence::None,
            Vec::new(),
        );
        old.set_alert_state(StdDuration::from_secs(300), AlertState::Sent);
        old.set_alert_state(StdDuration::from_secs(600), AlertState::Snoozed);

        let new = event_on(
            &calendar,
            berlin(2025, 3, 10, 14, 30),
            berlin(2025, 3, 10, 15, 30),
            Recurrence::None,
            Vec::new(),
        );
        new.adopt_sent_states(&old);
        assert_eq!(new.alert_state(StdDuration::from_secs(300)), AlertState::Sent);
        assert_eq!(
            new.alert_state(StdDuration::from_secs(600)),
            AlertState::Pending
        );
    }

    #[test]
    #[cfg(debug_assertions)]
    #[should_panic(expected = "internal invariant violated")]
    fn test_mark_epoch_backwards_is_a_bug() {
        let calendar = calendar_with_alerts(Vec::new());
        let event = event_on(
            &calendar,
            berlin(2025, 3, 10, 14, 0),
            berlin(2025, 3, 10, 15, 0),
            Recurrence::Daily(DailyRule::new(1, None, None)),
            Vec::new(),
        );
        event.mark_epoch(utc_of(berlin(2025, 3, 11, 14, 0)));
        event.mark_epoch(utc_of(berlin(2025, 3, 10, 14, 0)));
    }

    #[test]
    fn test_end_before_start_collapses() {
        let calendar = calendar_with_alerts(Vec::new());
        let event = event_on(
            &calendar,
            berlin(2025, 3, 10, 14, 0),
            berlin(2025, 3, 10, 13, 0),
            Recurrence::None,
            Vec::new(),
        );
        assert_eq!(event.duration(), Duration::zero());
    }

    #[test]
    fn test_dropped_calendar_leaves_intrinsic_alerts() {
        let calendar = calendar_with_alerts(vec![Alert::from_config(5, "minutes", false).unwrap()]);
        let event = event_on(
            &calendar,
            berlin(2025, 3, 10, 14, 0),
            berlin(2025, 3, 10, 15, 0),
            Recurrence::None,
            vec![Alert::intrinsic(StdDuration::from_secs(900), None)],
        );
        assert_eq!(event.alerts().len(), 2);
        drop(calendar);
        let alerts = event.alerts();
        assert_eq!(alerts.len(), 1);
        assert_eq!(alerts[0].source, AlertSource::Valarm);
    }
}
