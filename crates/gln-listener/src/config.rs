use crate::logging::LogConfig;
use crate::settings::SettingsOverrides;
use crate::supervisor::{SupervisorConfig, DEFAULT_BACKOFF_MS};
use crate::transport::{TransportConfig, DEFAULT_PROBE_INTERVAL_SECS};
use clap::Parser;
use gln_core::policy::DEFAULT_FRESHNESS_WINDOW_SECS;
use gln_core::PolicyConfig;
use std::env;
use std::path::PathBuf;
use std::time::Duration;

#[derive(Parser, Debug, Clone)]
#[command(
    name = "gln-listener",
    about = "Streams GitLab pipeline events and raises desktop notifications"
)]
pub struct Args {
    /// WebSocket endpoint of the notifier service (ws:// or wss://).
    #[arg(long, default_value = "")]
    pub endpoint: String,
    #[arg(long, default_value = "")]
    pub namespace: String,
    #[arg(long, default_value = "")]
    pub ignore_project: String,
    /// Path of the toml settings file.
    #[arg(long, default_value = "")]
    pub settings: String,
    #[arg(long, default_value_t = DEFAULT_BACKOFF_MS)]
    pub backoff_ms: u64,
    /// Seconds between WebSocket ping probes.
    #[arg(long, default_value_t = DEFAULT_PROBE_INTERVAL_SECS)]
    pub probe_interval: u64,
    /// Events older than this are not notified. 0 disables the check.
    #[arg(long, default_value_t = DEFAULT_FRESHNESS_WINDOW_SECS as u64)]
    pub freshness_secs: u64,
    /// Notification command, e.g. `notify-send`. Logs only when unset.
    #[arg(long, default_value = "")]
    pub notify_command: String,
    #[arg(long, default_value = "")]
    pub indicator_file: String,
    #[arg(long, default_value = "")]
    pub log_dir: String,
}

#[derive(Debug, Clone)]
pub struct RuntimeConfig {
    pub settings_path: PathBuf,
    pub overrides: SettingsOverrides,
    pub supervisor: SupervisorConfig,
    pub transport: TransportConfig,
    pub notify_command: Option<String>,
    pub indicator_file: Option<PathBuf>,
    pub log: LogConfig,
}

impl RuntimeConfig {
    pub fn from_env(args: &Args) -> Self {
        Self::resolve(args, &|key: &str| env::var(key).ok())
    }

    /// Flags win, then the environment, then defaults.
    pub fn resolve(args: &Args, lookup: &dyn Fn(&str) -> Option<String>) -> Self {
        let freshness_window = freshness_window(args.freshness_secs);
        Self {
            settings_path: resolve_settings_path(&args.settings, lookup),
            overrides: SettingsOverrides {
                endpoint: resolve_value(&args.endpoint, "GLN_ENDPOINT", lookup),
                namespace: resolve_value(&args.namespace, "GLN_NAMESPACE", lookup),
                ignore_project: resolve_value(&args.ignore_project, "GLN_IGNORE_PROJECT", lookup),
            },
            supervisor: SupervisorConfig {
                backoff: Duration::from_millis(args.backoff_ms),
                policy: PolicyConfig {
                    freshness_window,
                    ..PolicyConfig::default()
                },
                ..SupervisorConfig::default()
            },
            transport: TransportConfig {
                probe_interval: Duration::from_secs(args.probe_interval.max(1)),
                ..TransportConfig::default()
            },
            notify_command: resolve_value(&args.notify_command, "GLN_NOTIFY_COMMAND", lookup),
            indicator_file: resolve_value(&args.indicator_file, "GLN_INDICATOR_FILE", lookup)
                .map(PathBuf::from),
            log: LogConfig {
                log_dir: resolve_value(&args.log_dir, "GLN_LOG_DIR", lookup).unwrap_or_default(),
                stdout: resolve_log_stdout(lookup),
            },
        }
    }
}

/// Zero disables the check. Values past what a `chrono::Duration` holds are
/// clamped to its maximum.
fn freshness_window(secs: u64) -> Option<chrono::Duration> {
    if secs == 0 {
        return None;
    }
    let window = i64::try_from(secs)
        .ok()
        .and_then(chrono::Duration::try_seconds)
        .unwrap_or(chrono::Duration::MAX);
    Some(window)
}

fn resolve_value(
    flag: &str,
    key: &str,
    lookup: &dyn Fn(&str) -> Option<String>,
) -> Option<String> {
    if !flag.trim().is_empty() {
        return Some(flag.trim().to_string());
    }
    lookup(key)
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

fn resolve_settings_path(flag: &str, lookup: &dyn Fn(&str) -> Option<String>) -> PathBuf {
    if let Some(path) = resolve_value(flag, "GLN_SETTINGS_PATH", lookup) {
        return PathBuf::from(path);
    }
    config_dir(lookup).join("gln/settings.toml")
}

fn config_dir(lookup: &dyn Fn(&str) -> Option<String>) -> PathBuf {
    if let Some(path) = lookup("XDG_CONFIG_HOME").filter(|value| !value.trim().is_empty()) {
        return PathBuf::from(path);
    }
    lookup("HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".config")
}

fn resolve_log_stdout(lookup: &dyn Fn(&str) -> Option<String>) -> bool {
    if let Some(value) = lookup("GLN_LOG_STDOUT") {
        match value.trim() {
            "1" | "true" | "TRUE" | "yes" | "YES" => return true,
            "0" | "false" | "FALSE" | "no" | "NO" => return false,
            _ => {}
        }
    }
    true
}
