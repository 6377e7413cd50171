use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tokio::fs;

use crate::error::{RefreshError, Result};
use crate::state::Durations;

pub const CONFIG_FILE: &str = "config.toml";
pub const DB_FILE: &str = "events.db";
const DEFAULT_DIR_NAME: &str = ".eye-refresh";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct RefreshConfig {
    pub timing: TimingConfig,
    pub notification: NotificationConfig,
    pub state: StateConfig,
}

impl RefreshConfig {
    pub async fn load(data_dir: &Path) -> Result<Self> {
        let config_path = data_dir.join(CONFIG_FILE);
        let config = if config_path.exists() {
            let content = fs::read_to_string(&config_path).await?;
            toml::from_str(&content)?
        } else {
            Self::default()
        };
        config.validate()?;
        Ok(config)
    }

    pub async fn save(&self, data_dir: &Path) -> Result<()> {
        self.validate()?;
        let config_path = data_dir.join(CONFIG_FILE);
        let content =
            toml::to_string_pretty(self).map_err(|e| RefreshError::Config(e.to_string()))?;
        fs::write(&config_path, content).await?;
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        let mut errors = Vec::new();

        if self.timing.reminder_interval_secs == 0 {
            errors.push("timing.reminder_interval_secs must be greater than 0");
        }
        if self.timing.snooze_secs == 0 {
            errors.push("timing.snooze_secs must be greater than 0");
        }
        if self.timing.refresh_secs == 0 {
            errors.push("timing.refresh_secs must be greater than 0");
        }
        if self.state.history_limit == 0 {
            errors.push("state.history_limit must be greater than 0");
        }
        if self.state.health_check_interval_secs == 0 {
            errors.push("state.health_check_interval_secs must be greater than 0");
        }
        if self.state.log_poll_interval_ms == 0 {
            errors.push("state.log_poll_interval_ms must be greater than 0");
        }
        if let Some(hook) = &self.notification.hook_command
            && hook.trim().is_empty()
        {
            errors.push("notification.hook_command must not be blank when set");
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(RefreshError::Config(errors.join("; ")))
        }
    }

    pub fn durations(&self) -> Durations {
        Durations::from(&self.timing)
    }
}

/// Durations in seconds.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TimingConfig {
    pub reminder_interval_secs: u64,
    pub snooze_secs: u64,
    pub refresh_secs: u64,
}

impl Default for TimingConfig {
    fn default() -> Self {
        Self {
            reminder_interval_secs: 1200,
            snooze_secs: 60,
            refresh_secs: 20,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NotificationConfig {
    pub enabled: bool,
    pub desktop: bool,
    /// Append every transition to `logs/transitions.log`.
    pub event_log: bool,
    pub hook_command: Option<String>,
}

impl Default for NotificationConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            desktop: true,
            event_log: true,
            hook_command: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StateConfig {
    /// Entries shown by the history view.
    pub history_limit: usize,
    /// How often the daemon re-derives alarms from the log.
    pub health_check_interval_secs: u64,
    /// How often the daemon looks for entries written by `eye-refresh send`.
    pub log_poll_interval_ms: u64,
}

impl Default for StateConfig {
    fn default() -> Self {
        Self {
            history_limit: 100,
            health_check_interval_secs: 60,
            log_poll_interval_ms: 1000,
        }
    }
}

#[derive(Debug, Clone)]
pub struct AppPaths {
    pub data_dir: PathBuf,
    pub db_path: PathBuf,
    pub config_path: PathBuf,
    pub logs_dir: PathBuf,
}

impl AppPaths {
    pub fn new(data_dir: PathBuf) -> Self {
        Self {
            db_path: data_dir.join(DB_FILE),
            config_path: data_dir.join(CONFIG_FILE),
            logs_dir: data_dir.join("logs"),
            data_dir,
        }
    }

    /// Explicit directory if given, otherwise `~/.eye-refresh`.
    pub fn resolve(explicit: Option<PathBuf>) -> Result<Self> {
        let data_dir = match explicit {
            Some(dir) => dir,
            None => dirs::home_dir()
                .map(|home| home.join(DEFAULT_DIR_NAME))
                .ok_or_else(|| RefreshError::Config("cannot determine home directory".into()))?,
        };
        Ok(Self::new(data_dir))
    }

    pub fn is_initialized(&self) -> bool {
        self.config_path.exists()
    }

    pub async fn ensure_dirs(&self) -> Result<()> {
        for dir in [&self.data_dir, &self.logs_dir] {
            fs::create_dir_all(dir).await?;
        }
        Ok(())
    }

    pub fn transitions_log(&self) -> PathBuf {
        self.logs_dir.join("transitions.log")
    }
}
