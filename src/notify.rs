/// Desktop notification delivery. Best effort: a notification that cannot be
/// sent is logged and dropped, never retried.
use tokio::process::Command;

/// Delivers one-shot notifications to the desktop.
pub trait Notifier: Send {
    fn notify(&self, summary: &str, body: &str);
}

/// Notifier that only logs. Used when notifications are disabled.
pub struct LogNotifier;

impl Notifier for LogNotifier {
    fn notify(&self, summary: &str, body: &str) {
        tracing::info!(summary, body, "notification");
    }
}

/// Sends notifications through an external command, notify-send by default.
/// The command is invoked as `<command> <summary> <body>` and runs
/// fire-and-forget in the background.
pub struct CommandNotifier {
    command: String,
}

impl CommandNotifier {
    pub fn new(command: impl Into<String>) -> Self {
        Self {
            command: command.into(),
        }
    }
}

impl Notifier for CommandNotifier {
    fn notify(&self, summary: &str, body: &str) {
        let command = self.command.clone();
        let summary = summary.to_string();
        let body = body.to_string();
        tokio::spawn(async move {
            match Command::new(&command).arg(&summary).arg(&body).status().await {
                Ok(status) if !status.success() => {
                    tracing::warn!(%command, ?status, "notification command failed");
                }
                Err(e) => {
                    tracing::warn!(%command, error = %e, "failed to run notification command");
                }
                Ok(_) => {}
            }
        });
    }
}
