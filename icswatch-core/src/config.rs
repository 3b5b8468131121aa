//! YAML configuration: model, validation, defaulting and path expansion.

use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::alert::Alert;
use crate::error::{IcsWatchError, IcsWatchResult};

/// Top-level application configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub directories: Vec<DirectoryConfig>,
    #[serde(default)]
    pub notification: NotificationConfig,
    #[serde(default)]
    pub wakeup_handling: WakeupConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// One watched calendar directory.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DirectoryConfig {
    pub directory: String,
    #[serde(default)]
    pub template: String,
    #[serde(default)]
    pub automatic_alerts: Vec<AlertSpec>,
}

impl DirectoryConfig {
    /// The configured path with `~` and `$VAR` references expanded.
    pub fn path(&self) -> PathBuf {
        expand_path(&self.directory)
    }

    /// The automatic alerts as engine alerts.
    pub fn alerts(&self) -> IcsWatchResult<Vec<Alert>> {
        self.automatic_alerts
            .iter()
            .map(|spec| Alert::from_config(spec.value, &spec.unit, spec.important))
            .collect()
    }
}

/// `{value, unit, important}` alert entry.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AlertSpec {
    pub value: u32,
    pub unit: String,
    #[serde(default)]
    pub important: bool,
}

/// A user-facing duration: either timed or "until dismissed".
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DurationKind {
    #[default]
    Timed,
    UntilDismissed,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DurationSpec {
    #[serde(rename = "type", default)]
    pub kind: DurationKind,
    #[serde(default)]
    pub value: u32,
    #[serde(default)]
    pub unit: String,
}

impl DurationSpec {
    pub fn timed(value: u32, unit: &str) -> DurationSpec {
        DurationSpec {
            kind: DurationKind::Timed,
            value,
            unit: unit.to_string(),
        }
    }

    pub fn until_dismissed() -> DurationSpec {
        DurationSpec {
            kind: DurationKind::UntilDismissed,
            value: 0,
            unit: String::new(),
        }
    }

    pub fn is_until_dismissed(&self) -> bool {
        self.kind == DurationKind::UntilDismissed
    }

    /// Timed value as a duration. An unspecified unit means seconds.
    pub fn to_duration(&self) -> IcsWatchResult<Duration> {
        if self.is_until_dismissed() {
            return Err(IcsWatchError::Config(
                "cannot convert an until_dismissed duration to a time span".to_string(),
            ));
        }
        let value = self.value as u64;
        let millis = match self.unit.as_str() {
            "milliseconds" | "millisecond" | "ms" => value,
            "seconds" | "second" | "s" | "" => value * 1000,
            "minutes" | "minute" | "m" => value * 60_000,
            "hours" | "hour" | "h" => value * 3_600_000,
            other => {
                return Err(IcsWatchError::Config(format!(
                    "unsupported time unit: {other}"
                )))
            }
        };
        Ok(Duration::from_millis(millis))
    }

    /// Expiry in milliseconds for the notifier. Zero means "until
    /// dismissed".
    pub fn expire_ms(&self) -> IcsWatchResult<u32> {
        if self.is_until_dismissed() {
            return Ok(0);
        }
        Ok(self.to_duration()?.as_millis() as u32)
    }

    fn validate(&self, what: &str) -> IcsWatchResult<()> {
        if self.is_until_dismissed() {
            return Ok(());
        }
        if self.value == 0 {
            return Err(IcsWatchError::Config(format!(
                "{what}: duration value must be positive for the timed type"
            )));
        }
        self.to_duration().map(|_| ())
    }
}

/// Desktop notification backend selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum NotificationBackend {
    #[default]
    NotifySend,
    Dbus,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NotificationConfig {
    #[serde(default)]
    pub backend: NotificationBackend,
    #[serde(default = "NotificationConfig::default_duration")]
    pub duration: DurationSpec,
    #[serde(default = "NotificationConfig::default_duration_when_late")]
    pub duration_when_late: DurationSpec,
}

impl NotificationConfig {
    fn default_duration() -> DurationSpec {
        DurationSpec::timed(5, "seconds")
    }

    fn default_duration_when_late() -> DurationSpec {
        DurationSpec::until_dismissed()
    }
}

impl Default for NotificationConfig {
    fn default() -> Self {
        NotificationConfig {
            backend: NotificationBackend::default(),
            duration: Self::default_duration(),
            duration_when_late: Self::default_duration_when_late(),
        }
    }
}

/// Policy for alerts missed during suspend or downtime.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MissedEventPolicy {
    #[default]
    All,
    Summary,
    PriorityOnly,
    Skip,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WakeupConfig {
    #[serde(default = "WakeupConfig::default_enable")]
    pub enable: bool,
    #[serde(default)]
    pub missed_event_policy: MissedEventPolicy,
    #[serde(default = "WakeupConfig::default_max_missed_days")]
    pub max_missed_days: u32,
    #[serde(default = "WakeupConfig::default_summary_threshold")]
    pub summary_threshold: usize,
    #[serde(default = "WakeupConfig::default_max_catchup_time")]
    pub max_catchup_time: DurationSpec,
}

impl WakeupConfig {
    fn default_enable() -> bool {
        true
    }

    fn default_max_missed_days() -> u32 {
        7
    }

    fn default_summary_threshold() -> usize {
        5
    }

    fn default_max_catchup_time() -> DurationSpec {
        DurationSpec::timed(30, "seconds")
    }
}

impl Default for WakeupConfig {
    fn default() -> Self {
        WakeupConfig {
            enable: Self::default_enable(),
            missed_event_policy: MissedEventPolicy::default(),
            max_missed_days: Self::default_max_missed_days(),
            summary_threshold: Self::default_summary_threshold(),
            max_catchup_time: Self::default_max_catchup_time(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Debug,
    #[default]
    Info,
    Warn,
    Error,
}

impl LogLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            LogLevel::Debug => "debug",
            LogLevel::Info => "info",
            LogLevel::Warn => "warn",
            LogLevel::Error => "error",
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default)]
    pub level: LogLevel,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file: Option<String>,
}

impl Config {
    /// Load from the default XDG location.
    pub fn load() -> IcsWatchResult<Config> {
        let path = default_config_path()?;
        if !path.exists() {
            return Err(IcsWatchError::Config(format!(
                "config file not found at {}; run `icswatch init` to create one",
                path.display()
            )));
        }
        Config::load_from(&path)
    }

    /// Load and validate a specific file.
    pub fn load_from(path: &Path) -> IcsWatchResult<Config> {
        let data = fs::read_to_string(path).map_err(|err| {
            IcsWatchError::Config(format!(
                "failed to read config file {}: {err}",
                path.display()
            ))
        })?;
        let mut config: Config = serde_yaml::from_str(&data).map_err(|err| {
            IcsWatchError::Config(format!(
                "failed to parse config file {}: {err}",
                path.display()
            ))
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Validate and apply defaults in place.
    pub fn validate(&mut self) -> IcsWatchResult<()> {
        if self.directories.is_empty() {
            return Err(IcsWatchError::Config(
                "at least one directory must be configured".to_string(),
            ));
        }
        for (index, dir) in self.directories.iter().enumerate() {
            if dir.directory.trim().is_empty() {
                return Err(IcsWatchError::Config(format!(
                    "directory {index}: path cannot be empty"
                )));
            }
            let path = dir.path();
            if !path.is_dir() {
                return Err(IcsWatchError::Config(format!(
                    "directory {index}: does not exist: {}",
                    path.display()
                )));
            }
            for (alert_index, alert) in dir.automatic_alerts.iter().enumerate() {
                if alert.value == 0 {
                    return Err(IcsWatchError::Config(format!(
                        "directory {index}, alert {alert_index}: value must be positive"
                    )));
                }
                crate::alert::unit_duration(alert.value as u64, &alert.unit).map_err(|err| {
                    IcsWatchError::Config(format!(
                        "directory {index}, alert {alert_index}: {err}"
                    ))
                })?;
            }
        }

        self.notification
            .duration
            .validate("notification duration")?;
        self.notification
            .duration_when_late
            .validate("notification duration_when_late")?;

        if self.wakeup_handling.max_missed_days == 0 {
            self.wakeup_handling.max_missed_days = WakeupConfig::default_max_missed_days();
        }
        if self.wakeup_handling.summary_threshold == 0 {
            self.wakeup_handling.summary_threshold = WakeupConfig::default_summary_threshold();
        }
        self.wakeup_handling
            .max_catchup_time
            .validate("wakeup_handling max_catchup_time")?;

        Ok(())
    }

    /// A ready-to-edit default configuration.
    pub fn example() -> Config {
        Config {
            directories: vec![DirectoryConfig {
                directory: "~/.calendars".to_string(),
                template: "default.tpl".to_string(),
                automatic_alerts: vec![AlertSpec {
                    value: 5,
                    unit: "minutes".to_string(),
                    important: false,
                }],
            }],
            notification: NotificationConfig::default(),
            wakeup_handling: WakeupConfig::default(),
            logging: LoggingConfig::default(),
        }
    }

    /// Write the default configuration to the XDG config path unless a
    /// file already exists there. Returns the path and whether a file was
    /// written.
    pub fn write_default() -> IcsWatchResult<(PathBuf, bool)> {
        let path = default_config_path()?;
        if path.exists() {
            return Ok((path, false));
        }
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|err| {
                IcsWatchError::Config(format!(
                    "failed to create config directory {}: {err}",
                    parent.display()
                ))
            })?;
        }
        let data = serde_yaml::to_string(&Config::example()).map_err(|err| {
            IcsWatchError::Config(format!("failed to serialize default config: {err}"))
        })?;
        fs::write(&path, data).map_err(|err| {
            IcsWatchError::Config(format!(
                "failed to write config file {}: {err}",
                path.display()
            ))
        })?;
        Ok((path, true))
    }
}

/// `~/.config/icswatch/config.yaml` (or the platform equivalent).
pub fn default_config_path() -> IcsWatchResult<PathBuf> {
    dirs::config_dir()
        .map(|dir| dir.join("icswatch").join("config.yaml"))
        .ok_or_else(|| {
            IcsWatchError::Config("could not determine config directory".to_string())
        })
}

/// The directory notification templates are looked up in.
pub fn templates_dir() -> Option<PathBuf> {
    dirs::config_dir().map(|dir| dir.join("icswatch").join("templates"))
}

/// Expand environment references (`$VAR`, `${VAR}`) and a leading `~`.
pub fn expand_path(raw: &str) -> PathBuf {
    let expanded = expand_env(raw);
    if expanded == "~" {
        if let Some(home) = dirs::home_dir() {
            return home;
        }
    }
    if let Some(rest) = expanded.strip_prefix("~/") {
        if let Some(home) = dirs::home_dir() {
            return home.join(rest);
        }
    }
    PathBuf::from(expanded)
}

fn expand_env(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    let mut chars = raw.chars().peekable();
    while let Some(ch) = chars.next() {
        if ch != '$' {
            out.push(ch);
            continue;
        }
        match chars.peek() {
            Some('{') => {
                chars.next();
                let mut name = String::new();
                for inner in chars.by_ref() {
                    if inner == '}' {
                        break;
                    }
                    name.push(inner);
                }
                out.push_str(&env::var(&name).unwrap_or_default());
            }
            Some(next) if next.is_ascii_alphanumeric() || *next == '_' => {
                let mut name = String::new();
                while let Some(next) = chars.peek() {
                    if next.is_ascii_alphanumeric() || *next == '_' {
                        name.push(*next);
                        chars.next();
                    } else {
                        break;
                    }
                }
                out.push_str(&env::var(&name).unwrap_or_default());
            }
            _ => out.push('$'),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn valid_yaml(dir: &Path) -> String {
        format!(
            r#"
directories:
  - directory: {}
    template: default.tpl
    automatic_alerts:
      - value: 5
        unit: minutes
        important: false
      - value: 1
        unit: hours
        important: true
notification:
  backend: notify-send
  duration:
    type: timed
    value: 5
    unit: seconds
  duration_when_late:
    type: until_dismissed
wakeup_handling:
  enable: true
  missed_event_policy: summary
  max_missed_days: 3
  summary_threshold: 4
  max_catchup_time:
    type: timed
    value: 30
    unit: seconds
logging:
  level: debug
"#,
            dir.display()
        )
    }

    #[test]
    fn test_parse_full_config() {
        let dir = tempfile::tempdir().unwrap();
        let config_path = dir.path().join("config.yaml");
        fs::write(&config_path, valid_yaml(dir.path())).unwrap();

        let config = Config::load_from(&config_path).unwrap();
        assert_eq!(config.directories.len(), 1);
        assert_eq!(config.directories[0].automatic_alerts.len(), 2);
        assert_eq!(
            config.wakeup_handling.missed_event_policy,
            MissedEventPolicy::Summary
        );
        assert_eq!(config.wakeup_handling.max_missed_days, 3);
        assert_eq!(config.logging.level, LogLevel::Debug);
        assert!(config.notification.duration_when_late.is_until_dismissed());

        let alerts = config.directories[0].alerts().unwrap();
        assert_eq!(alerts.len(), 2);
        assert_eq!(alerts[0].offset, Duration::from_secs(300));
        assert!(alerts[1].important);
    }

    #[test]
    fn test_defaults_applied_for_missing_sections() {
        let dir = tempfile::tempdir().unwrap();
        let yaml = format!("directories:\n  - directory: {}\n", dir.path().display());
        let mut config: Config = serde_yaml::from_str(&yaml).unwrap();
        config.validate().unwrap();

        assert_eq!(config.notification.backend, NotificationBackend::NotifySend);
        assert_eq!(
            config.notification.duration,
            DurationSpec::timed(5, "seconds")
        );
        assert!(config.notification.duration_when_late.is_until_dismissed());
        assert!(config.wakeup_handling.enable);
        assert_eq!(
            config.wakeup_handling.missed_event_policy,
            MissedEventPolicy::All
        );
        assert_eq!(config.wakeup_handling.max_missed_days, 7);
        assert_eq!(config.wakeup_handling.summary_threshold, 5);
        assert_eq!(config.logging.level, LogLevel::Info);
    }

    #[test]
    fn test_no_directories_is_error() {
        let mut config = Config::default();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_missing_directory_is_error() {
        let mut config: Config =
            serde_yaml::from_str("directories:\n  - directory: /definitely/not/here\n").unwrap();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_zero_alert_value_is_error() {
        let dir = tempfile::tempdir().unwrap();
        let yaml = format!(
            "directories:\n  - directory: {}\n    automatic_alerts:\n      - value: 0\n        unit: minutes\n",
            dir.path().display()
        );
        let mut config: Config = serde_yaml::from_str(&yaml).unwrap();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_bad_alert_unit_is_error() {
        let dir = tempfile::tempdir().unwrap();
        let yaml = format!(
            "directories:\n  - directory: {}\n    automatic_alerts:\n      - value: 5\n        unit: fortnights\n",
            dir.path().display()
        );
        let mut config: Config = serde_yaml::from_str(&yaml).unwrap();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_invalid_policy_rejected_by_serde() {
        let result: Result<Config, _> = serde_yaml::from_str(
            "directories: []\nwakeup_handling:\n  missed_event_policy: sometimes\n",
        );
        assert!(result.is_err());
    }

    #[test]
    fn test_duration_spec_expiry() {
        assert_eq!(DurationSpec::timed(5, "seconds").expire_ms().unwrap(), 5000);
        assert_eq!(DurationSpec::timed(2, "m").expire_ms().unwrap(), 120_000);
        assert_eq!(DurationSpec::until_dismissed().expire_ms().unwrap(), 0);
        assert!(DurationSpec::timed(5, "lightyears").expire_ms().is_err());
    }

    #[test]
    fn test_duration_spec_default_unit_is_seconds() {
        let spec = DurationSpec {
            kind: DurationKind::Timed,
            value: 10,
            unit: String::new(),
        };
        assert_eq!(spec.to_duration().unwrap(), Duration::from_secs(10));
    }

    #[test]
    fn test_expand_env_and_tilde() {
        env::set_var("ICSWATCH_TEST_DIR", "calendars");
        let expanded = expand_path("$ICSWATCH_TEST_DIR/work");
        assert_eq!(expanded, PathBuf::from("calendars/work"));
        let braced = expand_path("${ICSWATCH_TEST_DIR}/home");
        assert_eq!(braced, PathBuf::from("calendars/home"));

        if let Some(home) = dirs::home_dir() {
            assert_eq!(expand_path("~/cals"), home.join("cals"));
            assert_eq!(expand_path("~"), home);
        }
    }

    #[test]
    fn test_example_config_round_trips() {
        let yaml = serde_yaml::to_string(&Config::example()).unwrap();
        let parsed: Config = serde_yaml::from_str(&yaml).unwrap();
        assert_eq!(parsed.directories.len(), 1);
        assert_eq!(parsed.directories[0].directory, "~/.calendars");
        // Backend names use the CLI spellings.
        assert!(yaml.contains("notify-send"));
        assert!(yaml.contains("until_dismissed"));
    }
}
