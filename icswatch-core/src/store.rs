//! Process-global event registry.
//!
//! Owns the calendars, the flat UID index across them, the bidirectional
//! file-to-UID mapping (so a deleted file resolves to exactly the events
//! it produced) and a rolling 7-day day-index serving the scheduler's
//! per-day queries.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, PoisonError, RwLock};

use chrono::{DateTime, Duration, NaiveDate, Utc};

use crate::alert::Alert;
use crate::calendar::Calendar;
use crate::error::internal_invariant;
use crate::event::Event;

/// Days covered by the day-index, starting at the window start date.
const INDEX_WINDOW_DAYS: i64 = 7;

#[derive(Debug, Default)]
struct StoreInner {
    calendars: HashMap<PathBuf, Arc<Calendar>>,
    events: HashMap<String, Arc<Event>>,
    file_to_uids: HashMap<PathBuf, Vec<String>>,
    uid_to_file: HashMap<String, PathBuf>,
    day_index: HashMap<NaiveDate, Vec<Arc<Event>>>,
    index_start: Option<NaiveDate>,
}

impl StoreInner {
    fn in_window(&self, date: NaiveDate) -> bool {
        match self.index_start {
            Some(start) => date >= start && date < start + Duration::days(INDEX_WINDOW_DAYS),
            None => false,
        }
    }

    fn regenerate(&mut self, window_start: NaiveDate) {
        self.index_start = Some(window_start);
        self.day_index.clear();
        for day_offset in 0..INDEX_WINDOW_DAYS {
            let day = window_start + Duration::days(day_offset);
            let bucket: Vec<Arc<Event>> = self
                .events
                .values()
                .filter(|event| event.occurs_on(day))
                .cloned()
                .collect();
            if !bucket.is_empty() {
                self.day_index.insert(day, bucket);
            }
        }
    }

    /// Rebuild the index over the current window, if one exists yet.
    fn refresh(&mut self) {
        if let Some(start) = self.index_start {
            self.regenerate(start);
        }
    }

    fn detach_uid(&mut self, uid: &str) {
        if let Some(event) = self.events.remove(uid) {
            if let Some(calendar) = event.calendar() {
                calendar.remove_event(uid);
            }
        }
        if let Some(file) = self.uid_to_file.remove(uid) {
            // The two file maps are updated together; a UID mapping to a
            // file the reverse map does not know is a bookkeeping bug.
            match self.file_to_uids.get_mut(&file) {
                Some(uids) => {
                    uids.retain(|candidate| candidate != uid);
                    if uids.is_empty() {
                        self.file_to_uids.remove(&file);
                    }
                }
                None => {
                    internal_invariant(format!(
                        "file map desync: {} is not tracked for {uid}",
                        file.display()
                    ));
                }
            }
        }
    }

    fn attach(&mut self, event: Arc<Event>, file: Option<&Path>) {
        let uid = event.uid().to_string();

        // A re-parse of the same UID replaces in place but keeps alert
        // states that were already delivered.
        if let Some(previous) = self.events.get(&uid) {
            event.adopt_sent_states(previous);
        }

        // Drop any stale mapping from a different file that previously
        // contributed this UID.
        if let Some(old_file) = self.uid_to_file.get(&uid).cloned() {
            if file != Some(old_file.as_path()) {
                if let Some(uids) = self.file_to_uids.get_mut(&old_file) {
                    uids.retain(|candidate| candidate != &uid);
                    if uids.is_empty() {
                        self.file_to_uids.remove(&old_file);
                    }
                }
                self.uid_to_file.remove(&uid);
            }
        }

        if let Some(calendar) = event.calendar() {
            calendar.add_event(event.clone());
        }
        if let Some(file) = file {
            self.uid_to_file.insert(uid.clone(), file.to_path_buf());
            let uids = self.file_to_uids.entry(file.to_path_buf()).or_default();
            if !uids.contains(&uid) {
                uids.push(uid.clone());
            }
        }
        self.events.insert(uid, event);
    }
}

/// In-memory event storage with calendar and day-index management.
#[derive(Debug, Default)]
pub struct EventStore {
    inner: RwLock<StoreInner>,
}

impl EventStore {
    pub fn new() -> EventStore {
        EventStore::default()
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, StoreInner> {
        self.inner.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> std::sync::RwLockWriteGuard<'_, StoreInner> {
        self.inner.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// Return the calendar registered for `path`, creating it if needed.
    /// Idempotent: an existing calendar is returned untouched.
    pub fn ensure_calendar(
        &self,
        path: impl Into<PathBuf>,
        template: impl Into<String>,
        automatic_alerts: Vec<Alert>,
    ) -> Arc<Calendar> {
        let path = path.into();
        let mut inner = self.write();
        if let Some(existing) = inner.calendars.get(&path) {
            return existing.clone();
        }
        let calendar = Arc::new(Calendar::new(path.clone(), template, automatic_alerts));
        inner.calendars.insert(path, calendar.clone());
        calendar
    }

    pub fn calendar(&self, path: &Path) -> Option<Arc<Calendar>> {
        self.read().calendars.get(path).cloned()
    }

    pub fn calendars(&self) -> Vec<Arc<Calendar>> {
        self.read().calendars.values().cloned().collect()
    }

    /// Swap the automatic alert list of the calendar at `path`, if it
    /// exists. Events see the new list on their next alert computation.
    pub fn update_calendar_alerts(&self, path: &Path, alerts: Vec<Alert>) {
        let calendar = self.read().calendars.get(path).cloned();
        if let Some(calendar) = calendar {
            calendar.update_automatic_alerts(alerts);
            self.write().refresh();
        }
    }

    /// Remove a calendar and every event it owns.
    pub fn remove_calendar(&self, path: &Path) {
        let mut inner = self.write();
        let Some(calendar) = inner.calendars.remove(path) else {
            return;
        };
        for event in calendar.events() {
            let uid = event.uid().to_string();
            inner.detach_uid(&uid);
        }
        inner.refresh();
    }

    /// Insert or replace a single event by UID. When `file` is given the
    /// bidirectional file mapping is updated as well.
    pub fn upsert_event(&self, event: Arc<Event>, file: Option<&Path>) {
        let mut inner = self.write();
        inner.attach(event, file);
        inner.refresh();
    }

    /// Replace the full set of events a file contributes. UIDs the file
    /// previously produced but no longer contains are removed.
    pub fn upsert_events_for_file(&self, file: &Path, events: Vec<Arc<Event>>) {
        let mut inner = self.write();
        let new_uids: Vec<String> = events.iter().map(|e| e.uid().to_string()).collect();
        let stale: Vec<String> = inner
            .file_to_uids
            .get(file)
            .map(|uids| {
                uids.iter()
                    .filter(|uid| !new_uids.contains(uid))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default();
        for uid in stale {
            inner.detach_uid(&uid);
        }
        for event in events {
            inner.attach(event, Some(file));
        }
        inner.refresh();
    }

    /// Remove an event by UID from every index.
    pub fn delete_event(&self, uid: &str) {
        let mut inner = self.write();
        inner.detach_uid(uid);
        inner.refresh();
    }

    /// Remove every event a file contributed.
    pub fn delete_by_file(&self, file: &Path) {
        let mut inner = self.write();
        let uids = inner.file_to_uids.get(file).cloned().unwrap_or_default();
        for uid in uids {
            inner.detach_uid(&uid);
        }
        inner.refresh();
    }

    pub fn event(&self, uid: &str) -> Option<Arc<Event>> {
        self.read().events.get(uid).cloned()
    }

    pub fn all_events(&self) -> Vec<Arc<Event>> {
        self.read().events.values().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.read().events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// The day-index bucket for `date`. A date outside the rolling window
    /// regenerates the window starting at that date.
    pub fn events_for_day(&self, date: NaiveDate) -> Vec<Arc<Event>> {
        {
            let inner = self.read();
            if inner.in_window(date) {
                return inner.day_index.get(&date).cloned().unwrap_or_default();
            }
        }
        let mut inner = self.write();
        if !inner.in_window(date) {
            inner.regenerate(date);
        }
        inner.day_index.get(&date).cloned().unwrap_or_default()
    }

    /// Rebuild the 7-day window starting at `date`.
    pub fn regenerate_index(&self, date: NaiveDate) {
        self.write().regenerate(date);
    }

    /// Events with any event occurrence or alert occurrence inside the
    /// range. Linear scan; each event self-filters.
    pub fn events_within(&self, start: DateTime<Utc>, end: DateTime<Utc>) -> Vec<Arc<Event>> {
        self.read()
            .events
            .values()
            .filter(|event| {
                !event.occurrences_within(start, end).is_empty()
                    || !event.event_occurrences_within(start, end).is_empty()
            })
            .cloned()
            .collect()
    }

    /// Events occurring (or alerting) within `duration` from `from`.
    pub fn upcoming(&self, from: DateTime<Utc>, duration: std::time::Duration) -> Vec<Arc<Event>> {
        let end = from + crate::alert::offset_to_chrono(duration);
        self.events_within(from, end)
    }

    /// Drop everything. Used when the configuration is reloaded from
    /// scratch.
    pub fn clear(&self) {
        let mut inner = self.write();
        *inner = StoreInner::default();
    }
}
