//! Configuration handling for the plan engine
//!
//! Configuration is read from `--config <path>`, else `./plan.toml`, else
//! `config.toml` in the user config directory (`~/.config/plan/` on Linux).
//! Missing files fall back to defaults.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::Weekday;
use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

use crate::domain::{EffortDuration, SchedulingMode, SchedulingSettings, WorkCalendar, DEFAULT_MAX_SEARCH_DAYS};

/// File looked up in the working directory
pub const LOCAL_CONFIG_FILE: &str = "plan.toml";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Invalid configuration: {0}")]
    Invalid(String),

    #[error("Failed to parse configuration: {0}")]
    Parse(String),
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct SchedulingConfig {
    pub mode: SchedulingMode,

    /// Dependencies win over position constraints when they conflict
    pub dependencies_have_priority: bool,
}

impl Default for SchedulingConfig {
    fn default() -> Self {
        Self {
            mode: SchedulingMode::Forward,
            dependencies_have_priority: true,
        }
    }
}

/// Default working time for resources and tasks without their own calendar
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct CalendarConfig {
    pub hours_per_day: u64,
    pub working_days: Vec<Weekday>,
}

impl Default for CalendarConfig {
    fn default() -> Self {
        Self {
            hours_per_day: 8,
            working_days: vec![
                Weekday::Mon,
                Weekday::Tue,
                Weekday::Wed,
                Weekday::Thu,
                Weekday::Fri,
                Weekday::Sat,
                Weekday::Sun,
            ],
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct AllocationConfig {
    /// Days searched before an allocation is reported as unsatisfied
    pub max_search_days: u32,
}

impl Default for AllocationConfig {
    fn default() -> Self {
        Self {
            max_search_days: DEFAULT_MAX_SEARCH_DAYS,
        }
    }
}

/// Output format for commands
#[derive(Debug, Clone, Copy, Serialize, Deserialize, Default, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum OutputFormat {
    #[default]
    Text,
    Json,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq, Eq)]
#[serde(default)]
pub struct EngineConfig {
    /// Default output format (text or json)
    pub default_format: OutputFormat,
    pub scheduling: SchedulingConfig,
    pub calendar: CalendarConfig,
    pub allocation: AllocationConfig,
}

impl EngineConfig {
    /// Loads configuration from an explicit path or the default locations
    pub fn load(explicit: Option<&Path>) -> Result<Self> {
        let cwd = std::env::current_dir().context("Failed to read the working directory")?;
        Self::resolve(explicit, &cwd, Self::global_config_dir().as_deref())
    }

    /// Returns the global config directory
    pub fn global_config_dir() -> Option<PathBuf> {
        ProjectDirs::from("dev", "plan-engine", "plan").map(|dirs| dirs.config_dir().to_path_buf())
    }

    fn resolve(explicit: Option<&Path>, cwd: &Path, global_dir: Option<&Path>) -> Result<Self> {
        if let Some(path) = explicit {
            return Self::from_file(path);
        }

        let local = cwd.join(LOCAL_CONFIG_FILE);
        if local.exists() {
            return Self::from_file(&local);
        }

        if let Some(global) = global_dir.map(|dir| dir.join("config.toml")) {
            if global.exists() {
                return Self::from_file(&global);
            }
        }

        debug!("no configuration file, using defaults");
        Ok(Self::default())
    }

    /// Reads and validates one configuration file
    pub fn from_file(path: &Path) -> Result<Self> {
        let content =
            fs::read_to_string(path).with_context(|| format!("Failed to read config: {}", path.display()))?;
        let config = Self::from_toml_str(&content).with_context(|| format!("Invalid config: {}", path.display()))?;
        debug!(path = %path.display(), "configuration loaded");
        Ok(config)
    }

    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(content).map_err(|e| ConfigError::Parse(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if !(1..=24).contains(&self.calendar.hours_per_day) {
            return Err(ConfigError::Invalid(format!(
                "calendar.hours_per_day must be between 1 and 24, got {}",
                self.calendar.hours_per_day
            )));
        }
        if self.calendar.working_days.is_empty() {
            return Err(ConfigError::Invalid("calendar.working_days must not be empty".to_string()));
        }
        if self.allocation.max_search_days == 0 {
            return Err(ConfigError::Invalid("allocation.max_search_days must be positive".to_string()));
        }
        Ok(())
    }

    pub fn day_length(&self) -> EffortDuration {
        EffortDuration::hours(self.calendar.hours_per_day)
    }

    /// Graph settings derived from the `[scheduling]` and `[calendar]` sections
    pub fn scheduling_settings(&self) -> SchedulingSettings {
        SchedulingSettings {
            mode: self.scheduling.mode,
            dependencies_have_priority: self.scheduling.dependencies_have_priority,
            day_length: self.day_length(),
        }
    }

    /// Calendar for resources that do not define their own
    pub fn default_calendar(&self) -> WorkCalendar {
        WorkCalendar::working_days(self.day_length(), &self.calendar.working_days)
    }
}
