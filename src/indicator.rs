/// Indicator surface: the one piece of visual state the monitor drives.
///
/// The host status-area widget is an external collaborator; all it gets from
/// us is a visibility flag and a fixed icon identity.
use std::path::PathBuf;

/// Icon shown by the host widget while the indicator is visible.
pub const ICON_NAME: &str = "emblem-synchronizing-symbolic";

/// Receives indicator visibility changes.
pub trait Indicator: Send {
    fn set_visible(&self, visible: bool);
}

/// Indicator that only logs transitions. Used when no status file is
/// configured.
pub struct LogIndicator;

impl Indicator for LogIndicator {
    fn set_visible(&self, visible: bool) {
        tracing::info!(visible, "indicator");
    }
}

/// Mirrors indicator state into a small JSON file a host widget can poll.
pub struct FileIndicator {
    path: PathBuf,
}

impl FileIndicator {
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }
}

impl Indicator for FileIndicator {
    fn set_visible(&self, visible: bool) {
        let state = serde_json::json!({
            "icon": ICON_NAME,
            "visible": visible,
            "updated": chrono::Utc::now().format("%Y-%m-%dT%H:%M:%SZ").to_string(),
        });
        if let Err(e) = std::fs::write(&self.path, state.to_string()) {
            tracing::warn!(
                path = %self.path.display(),
                error = %e,
                "failed to write indicator state"
            );
        }
    }
}
