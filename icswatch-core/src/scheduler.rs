//! The alert tick engine.
//!
//! Pure scheduling logic, owned by the daemon's single tick task: given a
//! `(last_tick, now]` window it decides which alerts fire, enforces
//! at-most-once delivery per offset and occurrence, re-arms recurring
//! events across occurrence boundaries, and replays missed windows after
//! suspend or restart under the configured policy. The minute timer, the
//! notification transport and state persistence live in the binary crate.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration as StdDuration, Instant};

use chrono::{DateTime, Duration, NaiveDate, Timelike, Utc};
use tracing::{debug, warn};

use crate::alert::AlertState;
use crate::config::MissedEventPolicy;
use crate::event::Event;
use crate::priority::{EventPriority, PriorityClassifier};
use crate::store::EventStore;

/// Gap beyond which the wall clock is considered to have jumped (suspend,
/// hibernate, restart). Normal ticking never exceeds one minute.
pub const GAP_THRESHOLD: StdDuration = StdDuration::from_secs(120);

/// Advisory duplicate-suppression horizon.
const MEMO_RETENTION_HOURS: i64 = 24;

/// A request handed to the notification sink.
#[derive(Debug, Clone)]
pub enum AlertRequest {
    /// One alert for one event occurrence.
    Event {
        event: Arc<Event>,
        offset: StdDuration,
        template: String,
        important: bool,
        late: bool,
    },
    /// Aggregate stand-in for a large batch of missed alerts.
    Summary {
        missed: usize,
        window_start: DateTime<Utc>,
        window_end: DateTime<Utc>,
    },
}

/// Resolved wake/catch-up options (configuration with durations already
/// materialized).
#[derive(Debug, Clone)]
pub struct CatchupOptions {
    pub policy: MissedEventPolicy,
    pub max_missed_days: u32,
    pub summary_threshold: usize,
    pub max_catchup_time: StdDuration,
}

impl Default for CatchupOptions {
    fn default() -> Self {
        CatchupOptions {
            policy: MissedEventPolicy::All,
            max_missed_days: 7,
            summary_threshold: 5,
            max_catchup_time: StdDuration::from_secs(30),
        }
    }
}

/// Minute-based alert scheduler state.
///
/// The `recent` memo defends against two successive ticks both seeing the
/// same occurrence under clock skew. It is advisory: entries expire after
/// 24 hours and are keyed by `(uid, event_time, offset)`, so a genuinely
/// new occurrence is never suppressed.
#[derive(Debug, Default)]
pub struct TickEngine {
    recent: HashMap<(String, DateTime<Utc>, StdDuration), DateTime<Utc>>,
}

impl TickEngine {
    pub fn new() -> TickEngine {
        TickEngine::default()
    }

    /// Compute the alerts that fired in `(last, now]`.
    ///
    /// Consults today's and tomorrow's day-index buckets (tomorrow so an
    /// early-morning event can alert just before midnight), marks emitted
    /// offsets `Sent`, and re-arms recurring events whose tracked
    /// occurrence has ended.
    pub fn check(
        &mut self,
        store: &EventStore,
        last: DateTime<Utc>,
        now: DateTime<Utc>,
        today: NaiveDate,
    ) -> Vec<AlertRequest> {
        let mut events = store.events_for_day(today);
        let tomorrow = today.succ_opt().unwrap_or(today);
        for event in store.events_for_day(tomorrow) {
            if !events.iter().any(|seen| seen.uid() == event.uid()) {
                events.push(event);
            }
        }

        let mut requests = Vec::new();
        for event in events {
            event.maybe_reset_for_next_occurrence(now);
            let occurrences = event.occurrences_within(last, now);
            self.emit_for_event(&event, occurrences, now, false, &mut requests);
        }
        self.prune_memo(now);
        requests
    }

    /// Replay alerts missed during a wall-clock gap, applying the
    /// missed-event policy. Bounded both by `max_missed_days` (window) and
    /// `max_catchup_time` (wall time; zero disables replay entirely).
    pub fn check_missed(
        &mut self,
        store: &EventStore,
        last: DateTime<Utc>,
        now: DateTime<Utc>,
        options: &CatchupOptions,
        classifier: &PriorityClassifier,
    ) -> Vec<AlertRequest> {
        if options.max_catchup_time.is_zero() {
            return Vec::new();
        }
        if options.policy == MissedEventPolicy::Skip {
            return Vec::new();
        }

        let window_floor = now - Duration::days(options.max_missed_days as i64);
        let replay_start = last.max(window_floor);
        let started = Instant::now();

        let mut collected = Vec::new();
        let mut truncated = false;
        for event in store.events_within(replay_start, now) {
            if started.elapsed() >= options.max_catchup_time {
                truncated = true;
                break;
            }
            event.maybe_reset_for_next_occurrence(now);
            let occurrences = event.occurrences_within(replay_start, now);
            self.emit_for_event(&event, occurrences, now, true, &mut collected);
        }
        if truncated {
            warn!(
                budget_secs = options.max_catchup_time.as_secs(),
                "catch-up cut off before covering every event"
            );
        }
        self.prune_memo(now);

        match options.policy {
            MissedEventPolicy::All => collected,
            MissedEventPolicy::Summary => {
                if collected.len() > options.summary_threshold {
                    debug!(missed = collected.len(), "collapsing missed alerts into a summary");
                    vec![AlertRequest::Summary {
                        missed: collected.len(),
                        window_start: replay_start,
                        window_end: now,
                    }]
                } else {
                    collected
                }
            }
            MissedEventPolicy::PriorityOnly => collected
                .into_iter()
                .filter(|request| match request {
                    AlertRequest::Event { event, .. } => {
                        classifier.classify(event, now) >= EventPriority::High
                    }
                    AlertRequest::Summary { .. } => true,
                })
                .collect(),
            MissedEventPolicy::Skip => Vec::new(),
        }
    }

    /// Emit pending occurrences for one event, in event-time order.
    ///
    /// When two occurrences of the same event land in one window (extreme
    /// clock jumps), crossing to the newer occurrence resets the offset
    /// states first, so both emit.
    fn emit_for_event(
        &mut self,
        event: &Arc<Event>,
        mut occurrences: Vec<crate::event::Occurrence>,
        now: DateTime<Utc>,
        force_late: bool,
        requests: &mut Vec<AlertRequest>,
    ) {
        occurrences.sort_by(|a, b| {
            a.event_time
                .cmp(&b.event_time)
                .then(a.alert_time.cmp(&b.alert_time))
        });

        for occurrence in occurrences {
            let event_time = occurrence.event_time.with_timezone(&Utc);

            match event.state_epoch() {
                Some(epoch) if epoch < event_time => {
                    event.reset_alert_states();
                    event.mark_epoch(event_time);
                }
                None => event.mark_epoch(event_time),
                _ => {}
            }

            let memo_key = (event.uid().to_string(), event_time, occurrence.offset);
            if self.recent.contains_key(&memo_key) {
                continue;
            }
            if event.alert_state(occurrence.offset) != AlertState::Pending {
                continue;
            }

            event.set_alert_state(occurrence.offset, AlertState::Sent);
            self.recent.insert(memo_key, now);
            requests.push(AlertRequest::Event {
                event: event.clone(),
                offset: occurrence.offset,
                template: event.template(),
                important: occurrence.important,
                late: occurrence.late || force_late,
            });
        }
    }

    fn prune_memo(&mut self, now: DateTime<Utc>) {
        let cutoff = now - Duration::hours(MEMO_RETENTION_HOURS);
        self.recent.retain(|_, sent_at| *sent_at >= cutoff);
    }
}

/// The wall-clock gap since the last tick, when it exceeds the wake
/// threshold.
pub fn gap_since(last: DateTime<Utc>, now: DateTime<Utc>) -> Option<Duration> {
    let gap = now - last;
    (gap > Duration::from_std(GAP_THRESHOLD).unwrap_or_else(|_| Duration::minutes(2)))
        .then_some(gap)
}

/// Truncate an instant to its minute boundary.
pub fn truncate_to_minute(instant: DateTime<Utc>) -> DateTime<Utc> {
    instant
        .with_second(0)
        .and_then(|t| t.with_nanosecond(0))
        .unwrap_or(instant)
}

/// The next minute boundary strictly after `now`.
pub fn next_minute(now: DateTime<Utc>) -> DateTime<Utc> {
    truncate_to_minute(now) + Duration::minutes(1)
}
