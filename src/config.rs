//! Configuration loading and management
//!
//! Handles parsing of the `config.toml` file in the ftask data directory.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::error::{Error, Result};

/// Name of the configuration file inside the data directory
pub const CONFIG_FILE: &str = "config.toml";

/// Main configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Daily reset configuration
    #[serde(default)]
    pub reset: ResetConfig,

    /// Calendar feed configuration
    #[serde(default)]
    pub calendar: CalendarConfig,

    /// External goal feed configuration
    #[serde(default)]
    pub goals: GoalsConfig,

    /// Section folder labels
    #[serde(default)]
    pub sections: SectionsConfig,
}

/// Daily reset configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResetConfig {
    /// Hour (0-23) at which the logical day rolls over
    #[serde(default)]
    pub hour: u32,

    /// How often the scheduler checks whether a reset is due
    #[serde(default = "default_reset_check_interval")]
    pub check_interval: String,
}

fn default_reset_check_interval() -> String {
    "60s".to_string()
}

impl Default for ResetConfig {
    fn default() -> Self {
        Self {
            hour: 0,
            check_interval: default_reset_check_interval(),
        }
    }
}

/// Calendar feed configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CalendarConfig {
    /// Poll interval for today's events
    #[serde(default = "default_calendar_poll_interval")]
    pub poll_interval: String,

    /// Events JSON file used by the local file source
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub snapshot_file: Option<PathBuf>,
}

fn default_calendar_poll_interval() -> String {
    "30m".to_string()
}

impl Default for CalendarConfig {
    fn default() -> Self {
        Self {
            poll_interval: default_calendar_poll_interval(),
            snapshot_file: None,
        }
    }
}

/// External goal feed configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GoalsConfig {
    /// Poll interval for goal snapshots
    #[serde(default = "default_goals_poll_interval")]
    pub poll_interval: String,

    /// Delay before the first snapshot after startup
    #[serde(default = "default_goals_initial_delay")]
    pub initial_delay: String,

    /// How long a local status change masks stale snapshots
    #[serde(default = "default_override_ttl")]
    pub override_ttl: String,

    /// Upper bound on waiting for a toggle to show up in a snapshot
    #[serde(default = "default_toggle_timeout")]
    pub toggle_timeout: String,

    /// Re-read interval while waiting for a toggle
    #[serde(default = "default_toggle_poll_interval")]
    pub toggle_poll_interval: String,

    /// Snapshot file written by the automation bridge
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub snapshot_file: Option<PathBuf>,

    /// JSONL outbox for toggle requests read by the automation bridge
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub outbox_file: Option<PathBuf>,
}

fn default_goals_poll_interval() -> String {
    "60s".to_string()
}

fn default_goals_initial_delay() -> String {
    "5s".to_string()
}

fn default_override_ttl() -> String {
    "30s".to_string()
}

fn default_toggle_timeout() -> String {
    "20s".to_string()
}

fn default_toggle_poll_interval() -> String {
    "2s".to_string()
}

impl Default for GoalsConfig {
    fn default() -> Self {
        Self {
            poll_interval: default_goals_poll_interval(),
            initial_delay: default_goals_initial_delay(),
            override_ttl: default_override_ttl(),
            toggle_timeout: default_toggle_timeout(),
            toggle_poll_interval: default_toggle_poll_interval(),
            snapshot_file: None,
            outbox_file: None,
        }
    }
}

/// Labels for the durable section folders
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SectionsConfig {
    #[serde(default = "default_calendar_label")]
    pub calendar_label: String,

    #[serde(default = "default_goals_label")]
    pub goals_label: String,
}

fn default_calendar_label() -> String {
    "Today".to_string()
}

fn default_goals_label() -> String {
    "Goals".to_string()
}

impl Default for SectionsConfig {
    fn default() -> Self {
        Self {
            calendar_label: default_calendar_label(),
            goals_label: default_goals_label(),
        }
    }
}

impl Config {
    /// Load configuration from a `config.toml` file
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from the data directory, or return defaults
    pub fn load_from_dir(data_dir: &Path) -> Self {
        let config_path = data_dir.join(CONFIG_FILE);
        if !config_path.exists() {
            return Self::default();
        }
        match Self::load(&config_path) {
            Ok(config) => config,
            Err(err) => {
                tracing::warn!(path = %config_path.display(), %err, "ignoring invalid config");
                Self::default()
            }
        }
    }

    fn validate(&self) -> Result<()> {
        if self.reset.hour > 23 {
            return Err(Error::InvalidConfig(format!(
                "reset.hour must be 0-23, got {}",
                self.reset.hour
            )));
        }
        validate_positive_duration(&self.reset.check_interval, "reset.check_interval")?;
        validate_positive_duration(&self.calendar.poll_interval, "calendar.poll_interval")?;
        validate_positive_duration(&self.goals.poll_interval, "goals.poll_interval")?;
        parse_duration(&self.goals.initial_delay).map_err(|err| {
            Error::InvalidConfig(format!("goals.initial_delay: {err}"))
        })?;
        validate_positive_duration(&self.goals.override_ttl, "goals.override_ttl")?;
        validate_positive_duration(&self.goals.toggle_timeout, "goals.toggle_timeout")?;
        validate_positive_duration(
            &self.goals.toggle_poll_interval,
            "goals.toggle_poll_interval",
        )?;
        if self.sections.calendar_label.trim().is_empty() {
            return Err(Error::InvalidConfig(
                "sections.calendar_label cannot be empty".to_string(),
            ));
        }
        if self.sections.goals_label.trim().is_empty() {
            return Err(Error::InvalidConfig(
                "sections.goals_label cannot be empty".to_string(),
            ));
        }
        Ok(())
    }
}

fn validate_positive_duration(value: &str, field: &str) -> Result<()> {
    let duration = parse_duration(value)
        .map_err(|err| Error::InvalidConfig(format!("{field}: {err}")))?;
    if duration <= chrono::Duration::zero() {
        return Err(Error::InvalidConfig(format!("{field} must be > 0")));
    }
    Ok(())
}

/// Parse a duration string like "30s", "60m", "2h" or "1d".
///
/// A bare number is read as seconds.
pub fn parse_duration(s: &str) -> Result<chrono::Duration> {
    let s = s.trim();
    if s.is_empty() {
        return Err(Error::InvalidArgument("Duration cannot be empty".to_string()));
    }

    let (num_str, unit) = match s.find(|c: char| !c.is_ascii_digit()) {
        Some(pos) => (&s[..pos], s[pos..].trim()),
        None => (s, "s"),
    };

    let num: i64 = num_str.parse().map_err(|_| {
        Error::InvalidArgument(format!("Invalid duration number: {num_str}"))
    })?;

    let duration = match unit.to_lowercase().as_str() {
        "ms" => chrono::Duration::try_milliseconds(num),
        "s" | "sec" | "second" | "seconds" => chrono::Duration::try_seconds(num),
        "m" | "min" | "minute" | "minutes" => chrono::Duration::try_minutes(num),
        "h" | "hr" | "hour" | "hours" => chrono::Duration::try_hours(num),
        "d" | "day" | "days" => chrono::Duration::try_days(num),
        _ => {
            return Err(Error::InvalidArgument(format!(
                "Invalid duration unit '{unit}'. Expected: ms, s, m, h, d"
            )));
        }
    };

    duration.ok_or_else(|| Error::InvalidArgument(format!("Duration out of range: {s}")))
}

/// Parse a duration string into a `std::time::Duration` for timers.
pub fn parse_std_duration(s: &str) -> Result<std::time::Duration> {
    parse_duration(s)?
        .to_std()
        .map_err(|_| Error::InvalidArgument(format!("Duration must not be negative: {s}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[test]
    fn defaults_are_expected() {
        let cfg = Config::default();
        assert_eq!(cfg.reset.hour, 0);
        assert_eq!(cfg.reset.check_interval, "60s");
        assert_eq!(cfg.calendar.poll_interval, "30m");
        assert!(cfg.calendar.snapshot_file.is_none());
        assert_eq!(cfg.goals.poll_interval, "60s");
        assert_eq!(cfg.goals.initial_delay, "5s");
        assert_eq!(cfg.goals.override_ttl, "30s");
        assert_eq!(cfg.goals.toggle_timeout, "20s");
        assert_eq!(cfg.sections.calendar_label, "Today");
        assert_eq!(cfg.sections.goals_label, "Goals");
    }

    #[test]
    fn load_parses_overrides() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join(CONFIG_FILE);
        let content = r#"
[reset]
hour = 4

[calendar]
poll_interval = "10m"
snapshot_file = "events.json"

[goals]
poll_interval = "90s"
override_ttl = "45s"
outbox_file = "toggles.jsonl"

[sections]
goals_label = "Addness"
"#;
        fs::write(&path, content.trim()).expect("write config");

        let cfg = Config::load(&path).expect("load config");
        assert_eq!(cfg.reset.hour, 4);
        assert_eq!(cfg.calendar.poll_interval, "10m");
        assert_eq!(cfg.calendar.snapshot_file, Some(PathBuf::from("events.json")));
        assert_eq!(cfg.goals.poll_interval, "90s");
        assert_eq!(cfg.goals.override_ttl, "45s");
        assert_eq!(cfg.goals.initial_delay, "5s");
        assert_eq!(cfg.goals.outbox_file, Some(PathBuf::from("toggles.jsonl")));
        assert_eq!(cfg.sections.goals_label, "Addness");
        assert_eq!(cfg.sections.calendar_label, "Today");
    }

    #[test]
    fn invalid_reset_hour_rejected() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join(CONFIG_FILE);
        fs::write(&path, "[reset]\nhour = 24").expect("write config");

        let err = Config::load(&path).expect_err("invalid config");
        match err {
            Error::InvalidConfig(_) => {}
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn zero_poll_interval_rejected() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join(CONFIG_FILE);
        fs::write(&path, "[goals]\npoll_interval = \"0s\"").expect("write config");

        assert!(matches!(Config::load(&path), Err(Error::InvalidConfig(_))));
    }

    #[test]
    fn load_from_dir_defaults_when_missing() {
        let dir = tempfile::tempdir().expect("tempdir");
        let cfg = Config::load_from_dir(dir.path());
        assert_eq!(cfg.reset.hour, 0);
    }

    #[test]
    fn load_from_dir_falls_back_on_invalid_file() {
        let dir = tempfile::tempdir().expect("tempdir");
        fs::write(dir.path().join(CONFIG_FILE), "this = [not valid").expect("write config");
        let cfg = Config::load_from_dir(dir.path());
        assert_eq!(cfg.goals.override_ttl, "30s");
    }

    #[test]
    fn parse_duration_units() {
        assert_eq!(parse_duration("30s").expect("s"), chrono::Duration::seconds(30));
        assert_eq!(parse_duration("45").expect("bare"), chrono::Duration::seconds(45));
        assert_eq!(parse_duration("30m").expect("m"), chrono::Duration::minutes(30));
        assert_eq!(parse_duration("250ms").expect("ms"), chrono::Duration::milliseconds(250));
        assert_eq!(parse_duration("2h").expect("h"), chrono::Duration::hours(2));
        assert!(parse_duration("").is_err());
        assert!(parse_duration("5y").is_err());
    }

    #[test]
    fn parse_duration_rejects_out_of_range_values() {
        assert!(matches!(
            parse_duration("10000000000000000s"),
            Err(Error::InvalidArgument(_))
        ));
        assert!(parse_duration("9223372036854775807d").is_err());
        assert!(parse_duration("99999999999999999999s").is_err());
    }

    #[test]
    fn load_from_dir_falls_back_on_out_of_range_duration() {
        let dir = tempfile::tempdir().expect("tempdir");
        fs::write(
            dir.path().join(CONFIG_FILE),
            "[goals]\noverride_ttl = \"10000000000000000s\"",
        )
        .expect("write config");

        assert!(matches!(
            Config::load(&dir.path().join(CONFIG_FILE)),
            Err(Error::InvalidConfig(_))
        ));
        let cfg = Config::load_from_dir(dir.path());
        assert_eq!(cfg.goals.override_ttl, "30s");
    }
}
