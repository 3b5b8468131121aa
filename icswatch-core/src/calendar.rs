//! Calendar registry entry: one per configured directory.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, PoisonError, RwLock};

use chrono::NaiveDate;

use crate::alert::Alert;
use crate::event::Event;

/// A named collection of events sharing a directory, a notification
/// template and a live-updatable list of automatic alerts.
///
/// The alert list lives behind a single `Arc` swap: updating it makes the
/// new list visible to every owned event's next alert computation without
/// walking or re-parsing the event set.
#[derive(Debug)]
pub struct Calendar {
    path: PathBuf,
    template: RwLock<String>,
    automatic_alerts: RwLock<Arc<Vec<Alert>>>,
    events: RwLock<HashMap<String, Arc<Event>>>,
}

impl Calendar {
    pub fn new(
        path: impl Into<PathBuf>,
        template: impl Into<String>,
        automatic_alerts: Vec<Alert>,
    ) -> Calendar {
        Calendar {
            path: path.into(),
            template: RwLock::new(template.into()),
            automatic_alerts: RwLock::new(Arc::new(automatic_alerts)),
            events: RwLock::new(HashMap::new()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn template(&self) -> String {
        self.template
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn update_template(&self, template: impl Into<String>) {
        *self
            .template
            .write()
            .unwrap_or_else(PoisonError::into_inner) = template.into();
    }

    /// Snapshot of the current automatic alert list.
    pub fn automatic_alerts(&self) -> Arc<Vec<Alert>> {
        self.automatic_alerts
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Atomically swap in a new automatic alert list.
    pub fn update_automatic_alerts(&self, alerts: Vec<Alert>) {
        *self
            .automatic_alerts
            .write()
            .unwrap_or_else(PoisonError::into_inner) = Arc::new(alerts);
    }

    pub fn add_event(&self, event: Arc<Event>) {
        self.events
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(event.uid().to_string(), event);
    }

    pub fn remove_event(&self, uid: &str) -> Option<Arc<Event>> {
        self.events
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(uid)
    }

    pub fn event(&self, uid: &str) -> Option<Arc<Event>> {
        self.events
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(uid)
            .cloned()
    }

    pub fn events(&self) -> Vec<Arc<Event>> {
        self.events
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .cloned()
            .collect()
    }

    pub fn len(&self) -> usize {
        self.events
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Events from this calendar that belong in the bucket for `date`
    /// (occurring that day, or alerting that day).
    pub fn events_for_day(&self, date: NaiveDate) -> Vec<Arc<Event>> {
        self.events
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .filter(|event| event.occurs_on(date))
            .cloned()
            .collect()
    }
}
