//! Interfaces of the collaborators the ingestion pipeline drives: the
//! notification sink, the liveness indicator and the settings store.

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NotificationMetadata {
    pub project_url: String,
    pub pipeline_id: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Notification {
    pub title: String,
    pub body: String,
    pub metadata: NotificationMetadata,
    #[serde(default = "default_sound")]
    pub sound: bool,
}

fn default_sound() -> bool {
    true
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum NotifySinkError {
    #[error("notification sink unavailable: {0}")]
    Unavailable(String),
    #[error("notification delivery failed: {0}")]
    Delivery(String),
}

/// Delivers user-facing notifications. Called off the ingestion task; a
/// failure is logged by the caller and never retried.
pub trait NotificationSink: Send + Sync {
    fn send(&self, notification: &Notification) -> Result<(), NotifySinkError>;
}

/// Receives `true` when some project starts counting as running and `false`
/// once none does.
pub trait ActivityIndicator: Send + Sync {
    fn set_active(&self, active: bool);
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserFilterConfig {
    /// Only notify for this namespace. Empty means any namespace.
    #[serde(default)]
    pub namespace: String,
    /// Never notify for this project name. Empty means none ignored.
    #[serde(default)]
    pub ignore_project: String,
}

impl UserFilterConfig {
    pub fn namespace_filter(&self) -> Option<&str> {
        non_empty(&self.namespace)
    }

    pub fn ignored_project(&self) -> Option<&str> {
        non_empty(&self.ignore_project)
    }
}

fn non_empty(value: &str) -> Option<&str> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed)
    }
}

/// Read-only view of persisted user settings, polled at every (re)connect.
pub trait SettingsProvider: Send + Sync {
    fn filters(&self) -> UserFilterConfig;
    fn endpoint(&self) -> String;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn blank_filters_are_unset() {
        let filters = UserFilterConfig {
            namespace: "  ".to_string(),
            ignore_project: String::new(),
        };
        assert_eq!(filters.namespace_filter(), None);
        assert_eq!(filters.ignored_project(), None);

        let filters = UserFilterConfig {
            namespace: " acme ".to_string(),
            ignore_project: "sandbox".to_string(),
        };
        assert_eq!(filters.namespace_filter(), Some("acme"));
        assert_eq!(filters.ignored_project(), Some("sandbox"));
    }

    #[test]
    fn notification_defaults_fill_optional_fields() {
        let parsed: Notification = serde_json::from_str(
            r#"{"title":"t","body":"b","metadata":{"project_url":"u","pipeline_id":3}}"#,
        )
        .expect("parse notification");
        assert!(parsed.sound);
    }
}
