//! Configuration types and loading.
//!
//! - `RefreshConfig`: top-level `config.toml` with validation
//! - `TimingConfig`: reminder interval, snooze and refresh durations
//! - `AppPaths`: data directory layout

mod settings;

pub use settings::{
    AppPaths, CONFIG_FILE, DB_FILE, NotificationConfig, RefreshConfig, StateConfig, TimingConfig,
};
