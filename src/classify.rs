/// Journal line classification: map one line of log output to a backup
/// lifecycle event.
///
/// Restic with `--json` emits one JSON object per line; its `message_type`
/// field distinguishes progress ("status") from completion ("summary").
/// Older setups log plain text, where systemd's "Succeeded." marker is the
/// only completion signal. Both kinds of line are honored.
use serde_json::Value;

/// Event derived from a single journal line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogEvent {
    /// A backup job is producing progress output.
    JobStarted,
    /// A backup job reported completion.
    JobFinished,
    /// Anything else, including malformed JSON.
    Noise,
}

/// Classify one raw journal line.
pub fn classify(raw: &str) -> LogEvent {
    let line = raw.trim();
    if line.is_empty() {
        return LogEvent::Noise;
    }

    if line.starts_with('{') {
        if let Ok(v) = serde_json::from_str::<Value>(line) {
            match v.get("message_type").and_then(|t| t.as_str()) {
                Some("status") => return LogEvent::JobStarted,
                Some("summary") => return LogEvent::JobFinished,
                _ => {}
            }
        }
        // Malformed or unrecognized JSON falls through to the text check.
    }

    if line.contains("Succeeded.") {
        return LogEvent::JobFinished;
    }

    LogEvent::Noise
}
