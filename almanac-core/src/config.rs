//! Configuration at ~/.config/almanac/config.toml

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use config::{Config, File};
use serde::Deserialize;

use crate::collection::VdirStorage;
use crate::error::{AlmanacError, AlmanacResult};
use crate::locale::Locale;

pub const DEFAULT_EVENT_FORMAT: &str = "{calendar-color}{start-end-time-style:16} {title}{recurse}{description-separator}{description}{reset}";
pub const DEFAULT_DAY_FORMAT: &str = "{bold}{name}, {date-long}{reset}";
pub const DEFAULT_TIMEDELTA: &str = "2d";

fn default_event_format() -> String {
    DEFAULT_EVENT_FORMAT.to_string()
}

fn default_day_format() -> String {
    DEFAULT_DAY_FORMAT.to_string()
}

fn default_timedelta() -> String {
    DEFAULT_TIMEDELTA.to_string()
}

#[derive(Debug, Clone, Deserialize)]
pub struct ViewConfig {
    #[serde(default = "default_event_format")]
    pub event_format: String,
    /// Day header format; empty to list events without headers
    #[serde(default = "default_day_format")]
    pub day_format: String,
}

impl Default for ViewConfig {
    fn default() -> Self {
        ViewConfig {
            event_format: default_event_format(),
            day_format: default_day_format(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct DefaultConfig {
    /// Length of a listed range when no end is given, e.g. "2d" or "1w"
    #[serde(default = "default_timedelta")]
    pub timedelta: String,
    pub default_calendar: Option<String>,
}

impl Default for DefaultConfig {
    fn default() -> Self {
        DefaultConfig {
            timedelta: default_timedelta(),
            default_calendar: None,
        }
    }
}

/// One `[calendars.<name>]` table.
#[derive(Debug, Clone, Deserialize)]
pub struct CalendarConfig {
    /// vdir directory, `~` allowed
    pub path: PathBuf,
    pub color: Option<String>,
}

impl CalendarConfig {
    pub fn expanded_path(&self) -> PathBuf {
        PathBuf::from(shellexpand::tilde(&self.path.to_string_lossy()).into_owned())
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct AlmanacConfig {
    #[serde(default)]
    pub locale: Locale,
    #[serde(default)]
    pub view: ViewConfig,
    #[serde(default)]
    pub default: DefaultConfig,
    #[serde(default)]
    pub calendars: BTreeMap<String, CalendarConfig>,
}

impl AlmanacConfig {
    pub fn config_path() -> AlmanacResult<PathBuf> {
        let config_dir = dirs::config_dir()
            .ok_or_else(|| AlmanacError::Config("Could not determine config directory".into()))?
            .join("almanac");

        Ok(config_dir.join("config.toml"))
    }

    /// Load the user's config, creating a commented default file first if
    /// there is none.
    pub fn load() -> AlmanacResult<Self> {
        let path = Self::config_path()?;

        if !path.exists() {
            Self::create_default_config(&path)?;
        }

        Self::load_from(&path)
    }

    pub fn load_from(path: &Path) -> AlmanacResult<Self> {
        Config::builder()
            .add_source(File::from(path).required(false))
            .build()
            .map_err(|e| AlmanacError::Config(e.to_string()))?
            .try_deserialize()
            .map_err(|e| AlmanacError::Config(e.to_string()))
    }

    /// Create a default config file with all options commented out.
    pub fn create_default_config(path: &Path) -> AlmanacResult<()> {
        let contents = format!(
            "\
# almanac configuration

# [locale]
# timezone = \"Europe/Berlin\"
# timeformat = \"%H:%M\"
# dateformat = \"%d.%m.\"
# longdateformat = \"%d.%m.%Y\"
# datetimeformat = \"%d.%m. %H:%M\"
# longdatetimeformat = \"%d.%m.%Y %H:%M\"
# firstweekday = 0

# [view]
# event_format = \"{}\"
# day_format = \"{}\"

# [default]
# timedelta = \"{}\"
# default_calendar = \"personal\"

# [calendars.personal]
# path = \"~/.calendars/personal\"
# color = \"dark green\"
",
            DEFAULT_EVENT_FORMAT, DEFAULT_DAY_FORMAT, DEFAULT_TIMEDELTA
        );

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| {
                AlmanacError::Config(format!("Could not create config directory: {e}"))
            })?;
        }

        std::fs::write(path, contents)
            .map_err(|e| AlmanacError::Config(format!("Could not write config file: {e}")))?;

        Ok(())
    }

    /// Storage over every configured calendar directory.
    pub fn storage(&self) -> VdirStorage {
        VdirStorage::new(
            self.calendars
                .iter()
                .map(|(name, calendar)| (name.clone(), calendar.expanded_path())),
        )
    }

    /// The configured default calendar, else the first calendar by name.
    pub fn default_calendar(&self) -> Option<&str> {
        self.default
            .default_calendar
            .as_deref()
            .or_else(|| self.calendars.keys().next().map(String::as_str))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_default_config_file_loads_as_defaults() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("almanac/config.toml");
        AlmanacConfig::create_default_config(&path).unwrap();

        let config = AlmanacConfig::load_from(&path).unwrap();
        assert_eq!(config.view.event_format, DEFAULT_EVENT_FORMAT);
        assert_eq!(config.default.timedelta, "2d");
        assert!(config.calendars.is_empty());
        assert_eq!(config.default_calendar(), None);
    }

    #[test]
    fn test_load_sections() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(
            &path,
            r#"
[locale]
timezone = "Europe/Berlin"
firstweekday = 6

[view]
day_format = ""

[default]
timedelta = "1w"

[calendars.work]
path = "~/cal/work"
color = "dark red"

[calendars.home]
path = "/tmp/home"
"#,
        )
        .unwrap();

        let config = AlmanacConfig::load_from(&path).unwrap();
        assert_eq!(config.locale.timezone, chrono_tz::Europe::Berlin);
        assert_eq!(config.locale.first_weekday(), chrono::Weekday::Sun);
        assert_eq!(config.locale.timeformat, "%H:%M");
        assert_eq!(config.view.day_format, "");
        assert_eq!(config.view.event_format, DEFAULT_EVENT_FORMAT);
        assert_eq!(config.default.timedelta, "1w");
        assert_eq!(config.default_calendar(), Some("home"));
        assert_eq!(config.calendars["work"].color.as_deref(), Some("dark red"));
        assert!(!config.calendars["work"]
            .expanded_path()
            .to_string_lossy()
            .starts_with('~'));
        assert_eq!(config.storage().calendars().count(), 2);
    }

    #[test]
    fn test_invalid_timezone_is_config_error() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "[locale]\ntimezone = \"Mars/Base\"\n").unwrap();

        assert!(matches!(
            AlmanacConfig::load_from(&path),
            Err(AlmanacError::Config(_))
        ));
    }
}
