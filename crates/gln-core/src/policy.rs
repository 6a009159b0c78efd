use crate::contracts::{Notification, NotificationMetadata, UserFilterConfig};
use crate::gate::{Decision, GateVerdict};
use crate::wire::PipelineEvent;
use chrono::{DateTime, Duration, Utc};
use std::fmt;

pub const DEFAULT_FRESHNESS_WINDOW_SECS: i64 = 10;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PolicyConfig {
    /// Events received by the server longer ago than this are not notified.
    /// `None` turns the check off.
    ///
    /// In a new epoch the gate treats frames as live until the first
    /// replay-complete marker arrives, so history replayed ahead of that
    /// marker is kept quiet only by this window. With the check off those
    /// replayed events notify.
    pub freshness_window: Option<Duration>,
    pub sound: bool,
}

impl Default for PolicyConfig {
    fn default() -> Self {
        Self {
            freshness_window: Some(Duration::seconds(DEFAULT_FRESHNESS_WINDOW_SECS)),
            sound: true,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SuppressReason {
    Replay,
    CatchUp,
    Pending,
    NamespaceMismatch,
    IgnoredProject,
    StaleEvent,
}

impl SuppressReason {
    pub fn as_str(self) -> &'static str {
        match self {
            SuppressReason::Replay => "replay",
            SuppressReason::CatchUp => "catch_up",
            SuppressReason::Pending => "pending",
            SuppressReason::NamespaceMismatch => "namespace_mismatch",
            SuppressReason::IgnoredProject => "ignored_project",
            SuppressReason::StaleEvent => "stale_event",
        }
    }
}

impl fmt::Display for SuppressReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PolicyVerdict {
    Notify(Notification),
    Suppress(SuppressReason),
}

impl PolicyVerdict {
    pub fn is_notify(&self) -> bool {
        matches!(self, PolicyVerdict::Notify(_))
    }
}

#[derive(Debug, Clone, Default)]
pub struct NotificationPolicy {
    config: PolicyConfig,
}

impl NotificationPolicy {
    pub fn new(config: PolicyConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> PolicyConfig {
        self.config
    }

    /// Suppression rules run in order and the first match wins; an event that
    /// passes all of them produces a notification payload.
    pub fn evaluate(
        &self,
        event: &PipelineEvent,
        filters: &UserFilterConfig,
        verdict: GateVerdict,
        now: DateTime<Utc>,
    ) -> PolicyVerdict {
        if verdict.decision != Decision::Accept {
            return PolicyVerdict::Suppress(SuppressReason::Replay);
        }
        if !verdict.past_watermark {
            return PolicyVerdict::Suppress(SuppressReason::CatchUp);
        }
        if event.status.is_pending() {
            return PolicyVerdict::Suppress(SuppressReason::Pending);
        }
        if let Some(namespace) = filters.namespace_filter() {
            if namespace != event.namespace {
                return PolicyVerdict::Suppress(SuppressReason::NamespaceMismatch);
            }
        }
        if let Some(ignored) = filters.ignored_project() {
            if ignored == event.project_name {
                return PolicyVerdict::Suppress(SuppressReason::IgnoredProject);
            }
        }
        if let Some(window) = self.config.freshness_window {
            if now.signed_duration_since(event.timestamp) > window {
                return PolicyVerdict::Suppress(SuppressReason::StaleEvent);
            }
        }
        PolicyVerdict::Notify(self.build_notification(event))
    }

    pub fn should_notify(
        &self,
        event: &PipelineEvent,
        filters: &UserFilterConfig,
        verdict: GateVerdict,
        now: DateTime<Utc>,
    ) -> bool {
        self.evaluate(event, filters, verdict, now).is_notify()
    }

    pub fn build_notification(&self, event: &PipelineEvent) -> Notification {
        Notification {
            title: format!("Pipeline for {} {}", event.project_name, event.status),
            body: event.commit_message.clone(),
            metadata: NotificationMetadata {
                project_url: event.project_url.clone(),
                pipeline_id: event.pipeline_id,
            },
            sound: self.config.sound,
        }
    }
}
