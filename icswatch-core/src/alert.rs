//! Unified alert representation for config-derived and VALARM-derived
//! alerts.

use std::collections::HashSet;
use std::time::Duration;

use crate::error::{IcsWatchError, IcsWatchResult};

/// Where an alert originates from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AlertSource {
    /// From a calendar's `automatic_alerts` configuration.
    Config,
    /// From a VALARM component inside the event.
    Valarm,
}

/// The alarm action. Only `Display` is ever emitted; the other variants
/// are parsed and reserved.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AlertAction {
    Display,
    Email,
    Audio,
}

/// Delivery state of an alert offset for the current occurrence.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum AlertState {
    #[default]
    Pending,
    Sent,
    Snoozed,
}

/// A single alert: fire `offset` before the event start.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Alert {
    pub offset: Duration,
    pub important: bool,
    pub source: AlertSource,
    pub description: String,
    pub action: AlertAction,
}

impl Alert {
    /// Build a config-derived alert from a `{value, unit, important}`
    /// entry.
    pub fn from_config(value: u32, unit: &str, important: bool) -> IcsWatchResult<Alert> {
        let offset = unit_duration(value as u64, unit)?;
        Ok(Alert {
            offset,
            important,
            source: AlertSource::Config,
            description: format!("{value} {unit} warning"),
            action: AlertAction::Display,
        })
    }

    /// Build a VALARM-derived alert. VALARM carries no importance flag.
    pub fn intrinsic(offset: Duration, description: Option<String>) -> Alert {
        let description =
            description.unwrap_or_else(|| format!("{} warning", format_offset(offset)));
        Alert {
            offset,
            important: false,
            source: AlertSource::Valarm,
            description,
            action: AlertAction::Display,
        }
    }
}

/// Convert a config time unit into a duration. Singular, plural and short
/// forms are accepted.
pub fn unit_duration(value: u64, unit: &str) -> IcsWatchResult<Duration> {
    let seconds = match unit {
        "seconds" | "second" | "s" => value,
        "minutes" | "minute" | "m" => value * 60,
        "hours" | "hour" | "h" => value * 3600,
        "days" | "day" | "d" => value * 86_400,
        other => {
            return Err(IcsWatchError::Config(format!(
                "unsupported time unit: {other}"
            )))
        }
    };
    Ok(Duration::from_secs(seconds))
}

/// Drop duplicate alerts sharing an offset. VALARM alerts win over config
/// alerts at the same offset.
pub fn dedup_alerts(alerts: Vec<Alert>) -> Vec<Alert> {
    let mut seen: HashSet<Duration> = HashSet::new();
    let mut unique = Vec::with_capacity(alerts.len());
    for alert in alerts.iter().filter(|a| a.source == AlertSource::Valarm) {
        if seen.insert(alert.offset) {
            unique.push(alert.clone());
        }
    }
    for alert in alerts.iter().filter(|a| a.source == AlertSource::Config) {
        if seen.insert(alert.offset) {
            unique.push(alert.clone());
        }
    }
    unique
}

/// Human-readable offset, largest sensible unit: "5 minutes", "1 hour",
/// "2 days".
pub fn format_offset(offset: Duration) -> String {
    let secs = offset.as_secs();
    let (amount, unit) = if secs < 60 {
        (secs, "second")
    } else if secs < 3600 {
        (secs / 60, "minute")
    } else if secs < 86_400 {
        (secs / 3600, "hour")
    } else {
        (secs / 86_400, "day")
    };
    if amount == 1 {
        format!("1 {unit}")
    } else {
        format!("{amount} {unit}s")
    }
}

/// Lossless-enough conversion for offset arithmetic on instants.
pub(crate) fn offset_to_chrono(offset: Duration) -> chrono::Duration {
    chrono::Duration::from_std(offset).unwrap_or(chrono::Duration::MAX)
}
