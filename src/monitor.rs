/// Log tail supervisor: owns the single journalctl subprocess following the
/// watched unit, the async line reader, and the idle/running presentation
/// state derived from classified journal events.
///
/// Exactly one session (subprocess + reader task) is live at a time. Every
/// asynchronous callback carries a token (the session generation for the
/// reader, the hide epoch for the debounce timer) and re-checks it under the
/// lock before acting, so callbacks belonging to a torn-down session are
/// no-ops.
use crate::classify::{classify, LogEvent};
use crate::config::JournalConfig;
use crate::indicator::Indicator;
use crate::notify::Notifier;
use crate::unit::WatchTarget;
use nix::sys::signal::{killpg, Signal};
use nix::unistd::Pid;
use std::process::Stdio;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::{Child, ChildStdout, Command};
use tokio::task::JoinHandle;

/// Errors that can occur when (re)starting the journal monitor.
#[derive(Debug)]
pub enum MonitorError {
    /// Failed to spawn the journal subprocess.
    Spawn { source: std::io::Error },
    /// The subprocess has no stdout pipe to read from.
    NoStdout,
}

impl std::fmt::Display for MonitorError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MonitorError::Spawn { source } => {
                write!(f, "failed to spawn journal subprocess: {}", source)
            }
            MonitorError::NoStdout => write!(f, "journal subprocess has no stdout pipe"),
        }
    }
}

impl std::error::Error for MonitorError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            MonitorError::Spawn { source } => Some(source),
            MonitorError::NoStdout => None,
        }
    }
}

/// Supervises one journal-following subprocess and the presentation state
/// machine fed by its output.
#[derive(Clone)]
pub struct Supervisor {
    inner: Arc<Mutex<Inner>>,
}

struct Inner {
    journal: JournalConfig,
    hide_delay: Duration,
    indicator: Box<dyn Indicator>,
    notifier: Box<dyn Notifier>,
    target: Option<WatchTarget>,
    child: Option<Child>,
    reader: Option<JoinHandle<()>>,
    /// Bumped on every teardown; a reader holding a stale value stops.
    generation: u64,
    /// Bumped whenever a pending hide is cancelled or re-armed; a timer
    /// holding a stale value does nothing when it fires.
    hide_epoch: u64,
    hide_pending: bool,
    in_progress: bool,
    visible: bool,
}

impl Supervisor {
    pub fn new(
        journal: JournalConfig,
        hide_delay: Duration,
        indicator: Box<dyn Indicator>,
        notifier: Box<dyn Notifier>,
    ) -> Self {
        Self {
            inner: Arc::new(Mutex::new(Inner {
                journal,
                hide_delay,
                indicator,
                notifier,
                target: None,
                child: None,
                reader: None,
                generation: 0,
                hide_epoch: 0,
                hide_pending: false,
                in_progress: false,
                visible: false,
            })),
        }
    }

    /// Tear down any existing session, then start following the given
    /// target's journal. On failure the session stays stopped; recovery is a
    /// later restart (e.g. triggered by reconfiguration), never automatic.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn restart(&self, target: WatchTarget) -> Result<(), MonitorError> {
        let mut inner = self.inner.lock().unwrap();
        inner.teardown();
        inner.target = Some(target.clone());

        tracing::info!(unit = %target.unit, "starting journal monitor");
        let mut cmd = build_command(&inner.journal, &target.unit);
        let mut child = match cmd.spawn() {
            Ok(child) => child,
            Err(e) => {
                tracing::error!(unit = %target.unit, error = %e, "failed to start journal monitor");
                return Err(MonitorError::Spawn { source: e });
            }
        };

        let stdout = match child.stdout.take() {
            Some(stdout) => stdout,
            None => {
                let _ = child.start_kill();
                tokio::spawn(async move {
                    let _ = child.wait().await;
                });
                tracing::error!(unit = %target.unit, "journal subprocess has no stdout pipe");
                return Err(MonitorError::NoStdout);
            }
        };

        let generation = inner.generation;
        inner.child = Some(child);
        inner.reader = Some(tokio::spawn(read_loop(
            Arc::clone(&self.inner),
            stdout,
            generation,
        )));
        Ok(())
    }

    /// Tear down any live session. Idempotent; safe with no session.
    pub fn stop(&self) {
        self.inner.lock().unwrap().teardown();
    }

    /// Whether a backup job is currently running.
    #[allow(dead_code)]
    pub fn backup_in_progress(&self) -> bool {
        self.inner.lock().unwrap().in_progress
    }

    /// Whether the indicator is currently shown.
    #[allow(dead_code)]
    pub fn indicator_visible(&self) -> bool {
        self.inner.lock().unwrap().visible
    }

    /// The unit currently being followed, if any.
    #[allow(dead_code)]
    pub fn watched_unit(&self) -> Option<String> {
        self.inner
            .lock()
            .unwrap()
            .target
            .as_ref()
            .map(|t| t.unit.clone())
    }
}

impl Inner {
    fn set_visible(&mut self, visible: bool) {
        if self.visible != visible {
            self.visible = visible;
            self.indicator.set_visible(visible);
        }
    }

    fn cancel_hide(&mut self) {
        self.hide_epoch += 1;
        self.hide_pending = false;
    }

    /// Apply one classified event to the presentation state. Returns the
    /// epoch a hide timer should be armed for, if one is due.
    fn handle_event(&mut self, event: LogEvent) -> Option<u64> {
        match event {
            LogEvent::Noise => None,
            LogEvent::JobStarted => {
                self.cancel_hide();
                self.set_visible(true);
                if !self.in_progress {
                    self.in_progress = true;
                    self.notify("Restic backup started");
                }
                None
            }
            LogEvent::JobFinished => {
                if self.in_progress {
                    self.in_progress = false;
                    self.notify("Restic backup finished");
                }
                // Shown through the debounce window even when already idle.
                self.set_visible(true);
                self.cancel_hide();
                self.hide_pending = true;
                Some(self.hide_epoch)
            }
        }
    }

    fn notify(&self, summary: &str) {
        let name = self.target.as_ref().map(|t| t.name.as_str()).unwrap_or("");
        self.notifier.notify(summary, &format!("Service {name}"));
    }

    /// The stream ended or failed: hide, cancel any pending hide, force idle.
    fn stream_ended(&mut self) {
        self.cancel_hide();
        self.in_progress = false;
        self.set_visible(false);
    }

    /// Full session teardown: invalidate outstanding callbacks, kill the
    /// subprocess's process group, reset presentation state.
    fn teardown(&mut self) {
        self.generation += 1;
        self.cancel_hide();

        if let Some(reader) = self.reader.take() {
            reader.abort();
        }

        if let Some(mut child) = self.child.take() {
            if let Some(pid) = child.id() {
                let _ = killpg(Pid::from_raw(pid as i32), Signal::SIGTERM);
            }
            let _ = child.start_kill();
            // Reap in the background; the session is already invalidated.
            tokio::spawn(async move {
                let _ = child.wait().await;
            });
        }

        self.in_progress = false;
        self.set_visible(false);
    }
}

/// Build the journal command, replacing `{unit}` placeholders in the
/// configured args with the actual unit name.
fn build_command(journal: &JournalConfig, unit: &str) -> Command {
    let mut cmd = Command::new(&journal.command);
    cmd.args(journal.args.iter().map(|arg| arg.replace("{unit}", unit)))
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .process_group(0) // Own group so teardown can kill the whole tree
        .kill_on_drop(true);
    cmd
}

/// Consume the subprocess's output one line at a time, applying each line's
/// transition before requesting the next (strict FIFO). Stops when the
/// stream ends, a read fails, or the session generation has moved on.
async fn read_loop(inner: Arc<Mutex<Inner>>, stdout: ChildStdout, generation: u64) {
    let mut lines = BufReader::new(stdout).lines();
    loop {
        let next = lines.next_line().await;

        let mut guard = inner.lock().unwrap();
        if guard.generation != generation {
            return;
        }
        match next {
            Ok(Some(line)) => {
                let event = classify(&line);
                if event != LogEvent::Noise {
                    tracing::debug!(?event, "journal event");
                }
                if let Some(epoch) = guard.handle_event(event) {
                    let delay = guard.hide_delay;
                    drop(guard);
                    arm_hide_timer(&inner, epoch, delay);
                }
            }
            Ok(None) => {
                tracing::info!("journal stream ended");
                guard.stream_ended();
                return;
            }
            Err(e) => {
                tracing::warn!(error = %e, "failed reading journal stream");
                guard.stream_ended();
                return;
            }
        }
    }
}

/// Arm the trailing hide timer. When it fires it only acts if its epoch is
/// still the current one; a newer show/hide or a teardown makes it a no-op.
fn arm_hide_timer(inner: &Arc<Mutex<Inner>>, epoch: u64, delay: Duration) {
    let inner = Arc::clone(inner);
    tokio::spawn(async move {
        tokio::time::sleep(delay).await;
        let mut guard = inner.lock().unwrap();
        if guard.hide_pending && guard.hide_epoch == epoch {
            guard.hide_pending = false;
            guard.set_visible(false);
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::unit::resolve_with_host;

    struct RecordingIndicator;

    impl Indicator for RecordingIndicator {
        fn set_visible(&self, _visible: bool) {}
    }

    struct RecordingNotifier {
        sent: Arc<Mutex<Vec<(String, String)>>>,
    }

    impl Notifier for RecordingNotifier {
        fn notify(&self, summary: &str, body: &str) {
            self.sent
                .lock()
                .unwrap()
                .push((summary.to_string(), body.to_string()));
        }
    }

    fn test_supervisor(journal: JournalConfig) -> (Supervisor, Arc<Mutex<Vec<(String, String)>>>) {
        let sent = Arc::new(Mutex::new(Vec::new()));
        let sup = Supervisor::new(
            journal,
            Duration::from_millis(2000),
            Box::new(RecordingIndicator),
            Box::new(RecordingNotifier { sent: sent.clone() }),
        );
        (sup, sent)
    }

    /// Drive the state machine the way the reader task does, without a
    /// subprocess.
    fn feed(sup: &Supervisor, line: &str) {
        let mut inner = sup.inner.lock().unwrap();
        if let Some(epoch) = inner.handle_event(classify(line)) {
            let delay = inner.hide_delay;
            drop(inner);
            arm_hide_timer(&sup.inner, epoch, delay);
        }
    }

    fn set_target(sup: &Supervisor, name: &str) {
        sup.inner.lock().unwrap().target = Some(resolve_with_host(name, None));
    }

    fn summaries(sent: &Arc<Mutex<Vec<(String, String)>>>) -> Vec<String> {
        sent.lock().unwrap().iter().map(|(s, _)| s.clone()).collect()
    }

    async fn wait_until(what: &str, mut cond: impl FnMut() -> bool) {
        let deadline = std::time::Instant::now() + Duration::from_secs(5);
        while !cond() {
            if std::time::Instant::now() > deadline {
                panic!("timed out waiting for {what}");
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    }

    fn sh(script: &str) -> JournalConfig {
        JournalConfig {
            command: "sh".to_string(),
            args: vec!["-c".to_string(), script.to_string()],
        }
    }

    #[tokio::test]
    async fn repeated_starts_notify_once() {
        let (sup, sent) = test_supervisor(JournalConfig::default());
        set_target(&sup, "nas");

        feed(&sup, r#"{"message_type":"status"}"#);
        feed(&sup, r#"{"message_type":"status"}"#);

        assert_eq!(summaries(&sent), vec!["Restic backup started"]);
        assert!(sup.backup_in_progress());
        assert!(sup.indicator_visible());
    }

    #[tokio::test]
    async fn finish_while_idle_is_silent_but_shows() {
        let (sup, sent) = test_supervisor(JournalConfig::default());
        set_target(&sup, "nas");

        feed(&sup, r#"{"message_type":"summary"}"#);
        feed(&sup, r#"{"message_type":"summary"}"#);

        assert!(summaries(&sent).is_empty());
        assert!(!sup.backup_in_progress());
        assert!(sup.indicator_visible());
    }

    #[tokio::test]
    async fn finish_transitions_to_idle_and_notifies() {
        let (sup, sent) = test_supervisor(JournalConfig::default());
        set_target(&sup, "nas");

        feed(&sup, r#"{"message_type":"status"}"#);
        feed(&sup, "Backup Succeeded.");

        assert_eq!(
            summaries(&sent),
            vec!["Restic backup started", "Restic backup finished"]
        );
        assert!(!sup.backup_in_progress());
        // Still shown through the debounce window.
        assert!(sup.indicator_visible());
    }

    #[tokio::test]
    async fn notifications_name_the_watched_service() {
        let (sup, sent) = test_supervisor(JournalConfig::default());
        set_target(&sup, "nas");

        feed(&sup, r#"{"message_type":"status"}"#);

        let sent = sent.lock().unwrap();
        assert_eq!(sent[0].1, "Service nas");
    }

    #[tokio::test(start_paused = true)]
    async fn indicator_hides_after_debounce_window() {
        let (sup, _sent) = test_supervisor(JournalConfig::default());
        set_target(&sup, "nas");

        feed(&sup, r#"{"message_type":"status"}"#);
        feed(&sup, r#"{"message_type":"summary"}"#);
        assert!(sup.indicator_visible());

        tokio::time::advance(Duration::from_millis(1999)).await;
        tokio::task::yield_now().await;
        assert!(sup.indicator_visible());

        tokio::time::advance(Duration::from_millis(2)).await;
        tokio::task::yield_now().await;
        assert!(!sup.indicator_visible());
    }

    #[tokio::test(start_paused = true)]
    async fn new_start_cancels_pending_hide() {
        let (sup, _sent) = test_supervisor(JournalConfig::default());
        set_target(&sup, "nas");

        feed(&sup, r#"{"message_type":"status"}"#);
        feed(&sup, r#"{"message_type":"summary"}"#);
        tokio::time::advance(Duration::from_millis(1000)).await;

        feed(&sup, r#"{"message_type":"status"}"#);
        tokio::time::advance(Duration::from_millis(5000)).await;
        tokio::task::yield_now().await;

        assert!(sup.indicator_visible());
        assert!(sup.backup_in_progress());
    }

    #[tokio::test(start_paused = true)]
    async fn repeated_finish_rearms_the_hide_timer() {
        let (sup, _sent) = test_supervisor(JournalConfig::default());
        set_target(&sup, "nas");

        feed(&sup, r#"{"message_type":"summary"}"#);
        tokio::time::advance(Duration::from_millis(1500)).await;
        feed(&sup, r#"{"message_type":"summary"}"#);

        // The first timer's deadline passes, but its epoch is stale.
        tokio::time::advance(Duration::from_millis(1900)).await;
        tokio::task::yield_now().await;
        assert!(sup.indicator_visible());

        tokio::time::advance(Duration::from_millis(200)).await;
        tokio::task::yield_now().await;
        assert!(!sup.indicator_visible());
    }

    #[tokio::test]
    async fn spawn_failure_leaves_monitor_stopped() {
        let (sup, sent) = test_supervisor(JournalConfig {
            command: "nonexistent-binary-xyz".to_string(),
            args: vec![],
        });

        let err = sup.restart(resolve_with_host("nas", None)).unwrap_err();
        assert!(matches!(err, MonitorError::Spawn { .. }));
        assert!(err.to_string().contains("failed to spawn"));
        assert!(!sup.backup_in_progress());
        assert!(!sup.indicator_visible());
        assert!(summaries(&sent).is_empty());
    }

    #[tokio::test]
    async fn reads_events_from_subprocess_stream() {
        let (sup, sent) = test_supervisor(sh(
            r#"printf '{"message_type":"status"}\n'; sleep 5"#,
        ));

        sup.restart(resolve_with_host("nas", None)).unwrap();
        wait_until("started notification", || !summaries(&sent).is_empty()).await;

        assert_eq!(summaries(&sent), vec!["Restic backup started"]);
        assert!(sup.backup_in_progress());
        assert!(sup.indicator_visible());

        sup.stop();
        assert!(!sup.backup_in_progress());
        assert!(!sup.indicator_visible());
    }

    #[tokio::test]
    async fn stream_end_forces_idle_and_hides() {
        // The script exits right after the status line, ending the stream.
        let (sup, sent) = test_supervisor(sh(r#"printf '{"message_type":"status"}\n'"#));

        sup.restart(resolve_with_host("nas", None)).unwrap();
        wait_until("started notification", || !summaries(&sent).is_empty()).await;
        wait_until("stream end", || {
            !sup.backup_in_progress() && !sup.indicator_visible()
        })
        .await;

        // No finished notification on the end-of-stream path.
        assert_eq!(summaries(&sent), vec!["Restic backup started"]);
    }

    #[tokio::test]
    async fn restart_discards_in_flight_session() {
        // The first session would report a start after 300ms, but it is
        // replaced before that line can be written.
        let (sup, sent) = test_supervisor(sh(
            r#"sleep 0.3; printf '{"message_type":"status"}\n'; sleep 5"#,
        ));
        sup.restart(resolve_with_host("old", None)).unwrap();

        sup.inner.lock().unwrap().journal = sh("sleep 5");
        sup.restart(resolve_with_host("new", None)).unwrap();

        tokio::time::sleep(Duration::from_millis(600)).await;
        assert!(summaries(&sent).is_empty());
        assert!(!sup.backup_in_progress());
        assert_eq!(sup.watched_unit().unwrap(), "restic-backups-new.service");

        sup.stop();
    }

    #[tokio::test]
    async fn stop_without_session_is_a_noop() {
        let (sup, sent) = test_supervisor(JournalConfig::default());
        sup.stop();
        sup.stop();
        assert!(!sup.indicator_visible());
        assert!(summaries(&sent).is_empty());
    }

    #[test]
    fn unit_placeholder_is_substituted() {
        let journal = JournalConfig::default();
        let cmd = build_command(&journal, "restic-backups-nas.service");
        let args: Vec<String> = cmd
            .as_std()
            .get_args()
            .map(|a| a.to_string_lossy().to_string())
            .collect();
        assert_eq!(
            args,
            vec!["-f", "-u", "restic-backups-nas.service", "-n0", "-o", "cat"]
        );
    }
}
