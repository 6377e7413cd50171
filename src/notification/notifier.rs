use std::path::PathBuf;

use tokio::fs::OpenOptions;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tokio::sync::broadcast::{self, error::RecvError};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use super::TransitionNotice;
use crate::config::NotificationConfig;
use crate::state::LogEntry;

const APP_NAME: &str = "Eye Refresh";

#[derive(Clone)]
pub struct Notifier {
    config: NotificationConfig,
    log_path: Option<PathBuf>,
}

impl Notifier {
    pub fn new(config: NotificationConfig, log_path: Option<PathBuf>) -> Self {
        Self { config, log_path }
    }

    pub async fn notify(&self, entry: &LogEntry) {
        if !self.config.enabled {
            return;
        }

        let notice = TransitionNotice::new(entry.clone());

        // Desktop popups only for states that wait on the user
        if self.config.desktop && notice.kind.is_some() {
            self.send_desktop_notification(&notice).await;
        }

        if self.config.event_log {
            self.write_event_log(&notice).await;
        }

        if let Some(hook) = &self.config.hook_command {
            self.run_hook(hook, &notice).await;
        }
    }

    async fn send_desktop_notification(&self, notice: &TransitionNotice) {
        let Some(kind) = notice.kind else {
            return;
        };
        let title = kind.title();
        let body = notice.body();

        #[cfg(target_os = "macos")]
        {
            let script = format!(
                r#"display notification "{}" with title "{}""#,
                body.replace('"', r#"\""#).replace('\n', " "),
                title.replace('"', r#"\""#)
            );

            let result = Command::new("osascript")
                .args(["-e", &script])
                .output()
                .await;

            if let Err(e) = result {
                debug!(error = %e, "Failed to send desktop notification");
            }
        }

        #[cfg(target_os = "linux")]
        {
            let result = Command::new("notify-send")
                .args(["--app-name", APP_NAME, title, &body])
                .output()
                .await;

            if let Err(e) = result {
                debug!(error = %e, "Failed to send desktop notification");
            }
        }

        #[cfg(target_os = "windows")]
        {
            let script = format!(
                r#"[Windows.UI.Notifications.ToastNotificationManager, Windows.UI.Notifications, ContentType = WindowsRuntime] | Out-Null; $template = [Windows.UI.Notifications.ToastNotificationManager]::GetTemplateContent([Windows.UI.Notifications.ToastTemplateType]::ToastText02); $text = $template.GetElementsByTagName('text'); $text[0].AppendChild($template.CreateTextNode('{}')) | Out-Null; $text[1].AppendChild($template.CreateTextNode('{}')) | Out-Null; $toast = [Windows.UI.Notifications.ToastNotification]::new($template); [Windows.UI.Notifications.ToastNotificationManager]::CreateToastNotifier('{}').Show($toast)"#,
                title.replace("'", "''"),
                body.replace("'", "''").replace('\n', " "),
                APP_NAME
            );

            let result = Command::new("powershell")
                .args(["-Command", &script])
                .output()
                .await;

            if let Err(e) = result {
                debug!(error = %e, "Failed to send desktop notification");
            }
        }

        #[cfg(not(any(target_os = "macos", target_os = "linux", target_os = "windows")))]
        {
            debug!(title, body, "No desktop notifier on this platform");
        }
    }

    async fn write_event_log(&self, notice: &TransitionNotice) {
        let Some(log_path) = &self.log_path else {
            return;
        };

        if let Some(parent) = log_path.parent()
            && let Err(e) = tokio::fs::create_dir_all(parent).await
        {
            warn!(error = %e, "Failed to create logs directory");
            return;
        }

        let result = OpenOptions::new()
            .create(true)
            .append(true)
            .open(log_path)
            .await;

        match result {
            Ok(mut file) => {
                if let Err(e) = file.write_all(notice.log_line().as_bytes()).await {
                    warn!(error = %e, "Failed to write transitions log");
                }
            }
            Err(e) => {
                warn!(error = %e, path = %log_path.display(), "Failed to open transitions log");
            }
        }
    }

    async fn run_hook(&self, hook_cmd: &str, notice: &TransitionNotice) {
        let json = match serde_json::to_string(notice) {
            Ok(j) => j,
            Err(e) => {
                debug!(error = %e, "Failed to serialize hook payload");
                return;
            }
        };

        let result = Command::new("sh")
            .args(["-c", hook_cmd])
            .env("EYE_REFRESH_STATE", notice.entry.state.as_str())
            .env("EYE_REFRESH_EVENT", notice.event_name())
            .env("EYE_REFRESH_ENTRY_JSON", &json)
            .output()
            .await;

        match result {
            Ok(output) if !output.status.success() => {
                debug!(hook = %hook_cmd, status = %output.status, "Hook exited with failure");
            }
            Ok(_) => {}
            Err(e) => debug!(error = %e, hook = %hook_cmd, "Failed to run hook"),
        }
    }
}

/// Feeds every committed entry to `notifier` until the log is dropped.
pub fn spawn_observer(
    mut updates: broadcast::Receiver<LogEntry>,
    notifier: Notifier,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            match updates.recv().await {
                Ok(entry) => notifier.notify(&entry).await,
                Err(RecvError::Lagged(skipped)) => {
                    warn!(skipped, "Notification observer fell behind");
                }
                Err(RecvError::Closed) => break,
            }
        }
        debug!("Notification observer stopped");
    })
}
