//! Heuristic event priority classification.
//!
//! Only consulted by the `priority_only` catch-up policy; the rules are
//! informational, first match wins.

use std::fmt;

use chrono::{DateTime, Duration, Timelike, Utc};

use crate::event::Event;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum EventPriority {
    Low,
    Normal,
    High,
    Critical,
}

impl fmt::Display for EventPriority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            EventPriority::Low => "low",
            EventPriority::Normal => "normal",
            EventPriority::High => "high",
            EventPriority::Critical => "critical",
        };
        f.write_str(label)
    }
}

/// Keyword-driven classifier. Lists are lowercase and extendable.
#[derive(Debug, Clone)]
pub struct PriorityClassifier {
    critical_keywords: Vec<String>,
    high_keywords: Vec<String>,
    work_keywords: Vec<String>,
    work_path_markers: Vec<String>,
}

impl Default for PriorityClassifier {
    fn default() -> Self {
        PriorityClassifier {
            critical_keywords: to_strings(&[
                "urgent",
                "asap",
                "emergency",
                "critical",
                "overdue",
                "final notice",
                "last chance",
            ]),
            high_keywords: to_strings(&[
                "meeting",
                "interview",
                "appointment",
                "deadline",
                "presentation",
                "standup",
                "1:1",
                "one-on-one",
                "review",
                "demo",
                "launch",
            ]),
            work_keywords: to_strings(&[
                "work", "office", "team", "project", "client", "customer", "business",
                "company",
            ]),
            work_path_markers: to_strings(&["work", "office", "company", "corp", "business"]),
        }
    }
}

fn to_strings(values: &[&str]) -> Vec<String> {
    values.iter().map(|v| v.to_string()).collect()
}

impl PriorityClassifier {
    pub fn new() -> PriorityClassifier {
        PriorityClassifier::default()
    }

    pub fn add_critical_keyword(&mut self, keyword: impl Into<String>) {
        self.critical_keywords.push(keyword.into().to_lowercase());
    }

    pub fn add_high_keyword(&mut self, keyword: impl Into<String>) {
        self.high_keywords.push(keyword.into().to_lowercase());
    }

    pub fn add_work_path_marker(&mut self, marker: impl Into<String>) {
        self.work_path_markers.push(marker.into().to_lowercase());
    }

    /// Classify an event. Rules in order, first match wins:
    /// critical keyword, high keyword, work context, starting within two
    /// hours, all-day demotion, otherwise normal.
    pub fn classify(&self, event: &Event, now: DateTime<Utc>) -> EventPriority {
        let text = format!("{} {}", event.summary(), event.description()).to_lowercase();

        if contains_any(&text, &self.critical_keywords) {
            return EventPriority::Critical;
        }
        if contains_any(&text, &self.high_keywords) {
            return EventPriority::High;
        }
        if contains_any(&text, &self.work_keywords) || self.is_work_calendar(event) {
            return EventPriority::High;
        }
        if self.starts_soon(event, now) {
            return EventPriority::High;
        }
        if is_all_day(event) {
            return EventPriority::Low;
        }
        EventPriority::Normal
    }

    fn is_work_calendar(&self, event: &Event) -> bool {
        let Some(calendar) = event.calendar() else {
            return false;
        };
        let path = calendar.path().to_string_lossy().to_lowercase();
        self.work_path_markers
            .iter()
            .any(|marker| path.contains(marker))
    }

    /// An occurrence starting within the next two hours.
    fn starts_soon(&self, event: &Event, now: DateTime<Utc>) -> bool {
        !event
            .event_occurrences_within(now, now + Duration::hours(2))
            .is_empty()
    }
}

fn contains_any(text: &str, keywords: &[String]) -> bool {
    keywords.iter().any(|keyword| text.contains(keyword))
}

/// Local-midnight start with a duration of at least a day.
fn is_all_day(event: &Event) -> bool {
    let start = event.start();
    start.hour() == 0 && start.minute() == 0 && event.duration() >= Duration::hours(24)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::calendar::Calendar;
    use crate::recurrence::Recurrence;
    use chrono::TimeZone;
    use chrono_tz::Europe::Berlin;
    use chrono_tz::Tz;
    use std::sync::Arc;

    fn berlin(y: i32, mo: u32, d: u32, h: u32, mi: u32) -> DateTime<Tz> {
        Berlin.with_ymd_and_hms(y, mo, d, h, mi, 0).unwrap()
    }

    fn event_with(
        calendar: &Arc<Calendar>,
        summary: &str,
        description: &str,
        start: DateTime<Tz>,
        end: DateTime<Tz>,
    ) -> Event {
        Event::new(
            "uid-p",
            summary,
            description,
            "",
            start,
            end,
            Berlin,
            Recurrence::None,
            Vec::new(),
            Arc::downgrade(calendar),
            Vec::new(),
        )
    }

    fn personal_calendar() -> Arc<Calendar> {
        Arc::new(Calendar::new("/home/user/.calendars/personal", "default.tpl", Vec::new()))
    }

    #[test]
    fn test_critical_keyword_wins() {
        let calendar = personal_calendar();
        let classifier = PriorityClassifier::new();
        let event = event_with(
            &calendar,
            "URGENT: server on fire",
            "",
            berlin(2025, 3, 10, 14, 0),
            berlin(2025, 3, 10, 15, 0),
        );
        let now = berlin(2025, 3, 1, 0, 0).with_timezone(&Utc);
        assert_eq!(classifier.classify(&event, now), EventPriority::Critical);
    }

    #[test]
    fn test_high_keyword() {
        let calendar = personal_calendar();
        let classifier = PriorityClassifier::new();
        let event = event_with(
            &calendar,
            "Quarterly review",
            "",
            berlin(2025, 3, 10, 14, 0),
            berlin(2025, 3, 10, 15, 0),
        );
        let now = berlin(2025, 3, 1, 0, 0).with_timezone(&Utc);
        assert_eq!(classifier.classify(&event, now), EventPriority::High);
    }

    #[test]
    fn test_work_calendar_path_boosts() {
        let calendar = Arc::new(Calendar::new(
            "/home/user/.calendars/work",
            "default.tpl",
            Vec::new(),
        ));
        let classifier = PriorityClassifier::new();
        let event = event_with(
            &calendar,
            "Lunch",
            "",
            berlin(2025, 3, 10, 12, 0),
            berlin(2025, 3, 10, 13, 0),
        );
        let now = berlin(2025, 3, 1, 0, 0).with_timezone(&Utc);
        assert_eq!(classifier.classify(&event, now), EventPriority::High);
    }

    #[test]
    fn test_starting_soon_boosts() {
        let calendar = personal_calendar();
        let classifier = PriorityClassifier::new();
        let event = event_with(
            &calendar,
            "Coffee",
            "",
            berlin(2025, 3, 10, 14, 0),
            berlin(2025, 3, 10, 15, 0),
        );
        let soon = berlin(2025, 3, 10, 13, 0).with_timezone(&Utc);
        assert_eq!(classifier.classify(&event, soon), EventPriority::High);
        let distant = berlin(2025, 3, 10, 9, 0).with_timezone(&Utc);
        assert_eq!(classifier.classify(&event, distant), EventPriority::Normal);
    }

    #[test]
    fn test_all_day_demotes_to_low() {
        let calendar = personal_calendar();
        let classifier = PriorityClassifier::new();
        let event = event_with(
            &calendar,
            "Public holiday",
            "",
            berlin(2025, 3, 10, 0, 0),
            berlin(2025, 3, 11, 0, 0),
        );
        let now = berlin(2025, 3, 1, 0, 0).with_timezone(&Utc);
        assert_eq!(classifier.classify(&event, now), EventPriority::Low);
    }

    #[test]
    fn test_critical_all_day_stays_critical() {
        // Rules are first-match: a critical keyword outranks the all-day
        // demotion.
        let calendar = personal_calendar();
        let classifier = PriorityClassifier::new();
        let event = event_with(
            &calendar,
            "URGENT filing day",
            "",
            berlin(2025, 3, 10, 0, 0),
            berlin(2025, 3, 11, 0, 0),
        );
        let now = berlin(2025, 3, 1, 0, 0).with_timezone(&Utc);
        assert_eq!(classifier.classify(&event, now), EventPriority::Critical);
    }

    #[test]
    fn test_default_is_normal() {
        let calendar = personal_calendar();
        let classifier = PriorityClassifier::new();
        let event = event_with(
            &calendar,
            "Dinner with Sam",
            "",
            berlin(2025, 3, 10, 19, 0),
            berlin(2025, 3, 10, 21, 0),
        );
        let now = berlin(2025, 3, 1, 0, 0).with_timezone(&Utc);
        assert_eq!(classifier.classify(&event, now), EventPriority::Normal);
    }

    #[test]
    fn test_priority_ordering() {
        assert!(EventPriority::Critical > EventPriority::High);
        assert!(EventPriority::High > EventPriority::Normal);
        assert!(EventPriority::Normal > EventPriority::Low);
    }

    #[test]
    fn test_custom_keyword() {
        let calendar = personal_calendar();
        let mut classifier = PriorityClassifier::new();
        classifier.add_critical_keyword("abgabe");
        let event = event_with(
            &calendar,
            "Abgabe Steuererklärung",
            "",
            berlin(2025, 3, 10, 14, 0),
            berlin(2025, 3, 10, 15, 0),
        );
        let now = berlin(2025, 3, 1, 0, 0).with_timezone(&Utc);
        assert_eq!(classifier.classify(&event, now), EventPriority::Critical);
    }
}
