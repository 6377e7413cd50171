//! Transition notifications.
//!
//! - `NotificationKind`: which states prompt the user, and with what options
//! - `Notifier`: desktop popup, transitions log and hook delivery
//! - `spawn_observer`: drives a `Notifier` from the log's update stream

mod events;
mod notifier;

pub use events::{NotificationKind, NotificationOption, TransitionNotice};
pub use notifier::{Notifier, spawn_observer};
