//! Concrete notification sinks and liveness indicators.

use gln_core::{ActivityIndicator, Notification, NotificationSink, NotifySinkError};
use std::fs;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::thread;
use std::time::{Duration, Instant};
use tracing::{info, warn};

pub const DEFAULT_COMMAND_TIMEOUT_SECS: u64 = 5;
const COMMAND_POLL_INTERVAL: Duration = Duration::from_millis(20);

/// Writes notifications to the log only.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogNotifier;

impl NotificationSink for LogNotifier {
    fn send(&self, notification: &Notification) -> Result<(), NotifySinkError> {
        info!(
            event = "notification",
            title = %notification.title,
            body = %notification.body,
            project_url = %notification.metadata.project_url,
            pipeline_id = notification.metadata.pipeline_id,
            sound = notification.sound
        );
        Ok(())
    }
}

/// Runs a desktop notification command once per notification.
///
/// The command receives the title and body as its last two arguments and the
/// metadata through `GLN_*` environment variables. A command still running
/// after `timeout` is killed and reported as a delivery failure.
#[derive(Debug, Clone)]
pub struct CommandNotifier {
    program: String,
    args: Vec<String>,
    timeout: Duration,
}

impl CommandNotifier {
    /// Splits a command line on whitespace, e.g. `notify-send -a gln`.
    pub fn parse(command: &str) -> Option<Self> {
        let mut parts = command.split_whitespace().map(str::to_string);
        let program = parts.next()?;
        Some(Self::with_args(program, parts.collect()))
    }

    pub fn with_args(program: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            program: program.into(),
            args,
            timeout: Duration::from_secs(DEFAULT_COMMAND_TIMEOUT_SECS),
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    fn command_for(&self, notification: &Notification) -> Command {
        let mut command = Command::new(&self.program);
        command
            .args(&self.args)
            .arg(&notification.title)
            .arg(&notification.body)
            .env("GLN_TITLE", &notification.title)
            .env("GLN_BODY", &notification.body)
            .env("GLN_PROJECT_URL", &notification.metadata.project_url)
            .env(
                "GLN_PIPELINE_ID",
                notification.metadata.pipeline_id.to_string(),
            )
            .env("GLN_SOUND", if notification.sound { "1" } else { "0" })
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped());
        command
    }
}

impl NotificationSink for CommandNotifier {
    fn send(&self, notification: &Notification) -> Result<(), NotifySinkError> {
        let mut child = self
            .command_for(notification)
            .spawn()
            .map_err(|err| NotifySinkError::Unavailable(format!("{}: {err}", self.program)))?;
        let started = Instant::now();
        let status = loop {
            match child.try_wait() {
                Ok(Some(status)) => break status,
                Ok(None) => {
                    if started.elapsed() >= self.timeout {
                        let _ = child.kill();
                        let _ = child.wait();
                        return Err(NotifySinkError::Delivery(format!(
                            "{} timed out after {}ms",
                            self.program,
                            self.timeout.as_millis()
                        )));
                    }
                    thread::sleep(COMMAND_POLL_INTERVAL);
                }
                Err(err) => {
                    let _ = child.kill();
                    return Err(NotifySinkError::Delivery(format!("{}: {err}", self.program)));
                }
            }
        };
        if status.success() {
            return Ok(());
        }
        let mut stderr = String::new();
        if let Some(mut pipe) = child.stderr.take() {
            let _ = pipe.read_to_string(&mut stderr);
        }
        let stderr = stderr.trim().to_string();
        let details = if stderr.is_empty() {
            format!("{} exited with status {status}", self.program)
        } else {
            stderr
        };
        Err(NotifySinkError::Delivery(details))
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct LogIndicator;

impl ActivityIndicator for LogIndicator {
    fn set_active(&self, active: bool) {
        info!(event = "activity", active);
    }
}

/// Writes `active` or `idle` to a file that status bars can poll.
#[derive(Debug, Clone)]
pub struct StatusFileIndicator {
    path: PathBuf,
}

impl StatusFileIndicator {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl ActivityIndicator for StatusFileIndicator {
    fn set_active(&self, active: bool) {
        let value = if active { "active\n" } else { "idle\n" };
        if let Some(parent) = self.path.parent() {
            if let Err(err) = fs::create_dir_all(parent) {
                warn!(event = "indicator_write_failed", path = %parent.display(), error = %err);
                return;
            }
        }
        if let Err(err) = fs::write(&self.path, value) {
            warn!(event = "indicator_write_failed", path = %self.path.display(), error = %err);
        }
    }
}
