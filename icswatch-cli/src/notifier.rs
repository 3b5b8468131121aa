//! Desktop notification sink.
//!
//! Renders alert requests through per-calendar templates and delivers
//! them with `notify-send`. A template that fails to load never drops the
//! alert: the notification degrades to the raw summary and time with an
//! explicit template-error line. A failed send is retried once, then
//! logged and discarded; the alert state stays `Sent` because re-emission
//! on the next tick would be spurious.

use std::collections::HashMap;
use std::time::Duration as StdDuration;

use anyhow::{anyhow, Result};
use tokio::process::Command;
use tracing::{debug, error, warn};

use icswatch_core::alert::format_offset;
use icswatch_core::config::{self, NotificationBackend, NotificationConfig};
use icswatch_core::scheduler::AlertRequest;
use icswatch_core::Event;

/// Fallback when a calendar names no template or the named one is
/// unreadable.
const BUILTIN_TEMPLATE: &str = "{summary}\nStarts: {start_time} ({offset} warning)";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Urgency {
    Low,
    Normal,
    Critical,
}

impl Urgency {
    fn as_arg(&self) -> &'static str {
        match self {
            Urgency::Low => "low",
            Urgency::Normal => "normal",
            Urgency::Critical => "critical",
        }
    }
}

/// A rendered notification ready for the transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notification {
    pub title: String,
    pub body: String,
    pub urgency: Urgency,
    /// Milliseconds before auto-dismiss; zero means "until dismissed".
    pub expire_ms: u32,
}

pub struct Notifier {
    config: NotificationConfig,
    templates: HashMap<String, String>,
}

impl Notifier {
    pub fn new(config: NotificationConfig) -> Notifier {
        if config.backend == NotificationBackend::Dbus {
            warn!("dbus notification backend is not implemented yet; using notify-send");
        }
        Notifier {
            config,
            templates: HashMap::new(),
        }
    }

    /// Render and deliver one request, retrying the transport once.
    pub async fn deliver(&mut self, request: &AlertRequest) {
        let notification = self.render(request);
        if let Err(first) = self.dispatch(&notification).await {
            warn!(%first, "notification delivery failed; retrying once");
            if let Err(second) = self.dispatch(&notification).await {
                error!(%second, title = %notification.title, "notification dropped after retry");
            }
        }
    }

    fn render(&mut self, request: &AlertRequest) -> Notification {
        match request {
            AlertRequest::Event {
                event,
                offset,
                template,
                important,
                late,
            } => {
                let body = match self.template_body(template) {
                    Ok(text) => render_template(&text, event, *offset),
                    Err(err) => degraded_body(event, &err.to_string()),
                };
                Notification {
                    title: event.summary().to_string(),
                    body,
                    urgency: if *important {
                        Urgency::Critical
                    } else {
                        Urgency::Normal
                    },
                    expire_ms: self.expire_ms(*late),
                }
            }
            AlertRequest::Summary {
                missed,
                window_start,
                window_end,
            } => Notification {
                title: "Missed calendar events".to_string(),
                body: format!(
                    "{missed} missed events between {} and {}",
                    window_start
                        .with_timezone(&chrono::Local)
                        .format("%Y-%m-%d %H:%M"),
                    window_end
                        .with_timezone(&chrono::Local)
                        .format("%Y-%m-%d %H:%M"),
                ),
                urgency: Urgency::Normal,
                expire_ms: self.expire_ms(true),
            },
        }
    }

    fn expire_ms(&self, late: bool) -> u32 {
        let spec = if late {
            &self.config.duration_when_late
        } else {
            &self.config.duration
        };
        // Validation already vetted both specs; fall back to five seconds
        // if something slipped through.
        spec.expire_ms().unwrap_or(5000)
    }

    /// Template text by name, cached after the first load. An empty name
    /// means the built-in template.
    fn template_body(&mut self, name: &str) -> Result<String> {
        if name.is_empty() {
            return Ok(BUILTIN_TEMPLATE.to_string());
        }
        if let Some(cached) = self.templates.get(name) {
            return Ok(cached.clone());
        }
        let dir = config::templates_dir()
            .ok_or_else(|| anyhow!("could not determine the templates directory"))?;
        let path = dir.join(name);
        let text = std::fs::read_to_string(&path)
            .map_err(|err| anyhow!("failed to read template {}: {err}", path.display()))?;
        self.templates.insert(name.to_string(), text.clone());
        Ok(text)
    }

    async fn dispatch(&self, notification: &Notification) -> Result<()> {
        debug!(title = %notification.title, urgency = notification.urgency.as_arg(), "sending notification");
        let status = Command::new("notify-send")
            .arg("--app-name=icswatch")
            .arg(format!("--urgency={}", notification.urgency.as_arg()))
            .arg(format!("--expire-time={}", notification.expire_ms))
            .arg(&notification.title)
            .arg(&notification.body)
            .status()
            .await
            .map_err(|err| anyhow!("failed to spawn notify-send: {err}"))?;
        if !status.success() {
            return Err(anyhow!("notify-send exited with {status}"));
        }
        Ok(())
    }
}

/// Substitute `{field}` placeholders. Unknown placeholders are left
/// alone so a typo is visible in the notification instead of vanishing.
fn render_template(template: &str, event: &Event, offset: StdDuration) -> String {
    let duration = event
        .duration()
        .to_std()
        .map(format_offset)
        .unwrap_or_else(|_| "0 seconds".to_string());

    let fields = [
        ("{summary}", event.summary().to_string()),
        ("{description}", event.description().to_string()),
        ("{location}", event.location().to_string()),
        ("{start_time}", event.start().format("%H:%M").to_string()),
        ("{end_time}", event.end().format("%H:%M").to_string()),
        ("{duration}", duration),
        ("{offset}", format_offset(offset)),
        ("{uid}", event.uid().to_string()),
    ];

    let mut rendered = template.to_string();
    for (placeholder, value) in fields {
        rendered = rendered.replace(placeholder, &value);
    }
    rendered.trim_end().to_string()
}

/// Fallback body when the template cannot be used: raw summary and time
/// plus an explicit error line, never a silent drop.
fn degraded_body(event: &Event, error: &str) -> String {
    format!(
        "{}\nStarts: {}\n(template error: {error})",
        event.summary(),
        event.start().format("%H:%M"),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use chrono_tz::Europe::Berlin;
    use icswatch_core::recurrence::Recurrence;
    use icswatch_core::Calendar;
    use std::sync::Arc;

    fn sample_event() -> (Arc<Calendar>, Event) {
        let calendar = Arc::new(Calendar::new("/tmp/cal", "default.tpl", Vec::new()));
        let event = Event::new(
            "uid-n",
            "Design review",
            "Quarterly design review",
            "Room 12",
            Berlin.with_ymd_and_hms(2025, 3, 10, 14, 0, 0).unwrap(),
            Berlin.with_ymd_and_hms(2025, 3, 10, 15, 0, 0).unwrap(),
            Berlin,
            Recurrence::None,
            Vec::new(),
            Arc::downgrade(&calendar),
            Vec::new(),
        );
        (calendar, event)
    }

    #[test]
    fn test_render_template_substitutes_fields() {
        let (_calendar, event) = sample_event();
        let rendered = render_template(
            "{summary} at {location}\n{start_time}-{end_time} ({duration}), {offset} warning",
            &event,
            StdDuration::from_secs(900),
        );
        assert_eq!(
            rendered,
            "Design review at Room 12\n14:00-15:00 (1 hour), 15 minutes warning"
        );
    }

    #[test]
    fn test_render_template_leaves_unknown_placeholders() {
        let (_calendar, event) = sample_event();
        let rendered = render_template("{summary} {nonsense}", &event, StdDuration::from_secs(60));
        assert_eq!(rendered, "Design review {nonsense}");
    }

    #[test]
    fn test_degraded_body_mentions_template_error() {
        let (_calendar, event) = sample_event();
        let body = degraded_body(&event, "boom");
        assert!(body.contains("Design review"));
        assert!(body.contains("14:00"));
        assert!(body.contains("template error"));
        assert!(body.contains("boom"));
    }

    #[test]
    fn test_urgency_args() {
        assert_eq!(Urgency::Low.as_arg(), "low");
        assert_eq!(Urgency::Normal.as_arg(), "normal");
        assert_eq!(Urgency::Critical.as_arg(), "critical");
    }
}
