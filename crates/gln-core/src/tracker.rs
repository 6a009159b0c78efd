use crate::status::PipelineStatus;
use crate::wire::PipelineEvent;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

pub const RUNNING_RECENCY_WINDOW_SECS: i64 = 300;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProjectStatusEntry {
    pub project_name: String,
    pub status: PipelineStatus,
    pub last_updated_at: DateTime<Utc>,
}

/// Latest known status per project, last write wins in acceptance order.
#[derive(Debug, Clone)]
pub struct ProjectStateTracker {
    entries: BTreeMap<String, ProjectStatusEntry>,
    recency_window: Duration,
}

impl Default for ProjectStateTracker {
    fn default() -> Self {
        Self::new(Duration::seconds(RUNNING_RECENCY_WINDOW_SECS))
    }
}

impl ProjectStateTracker {
    pub fn new(recency_window: Duration) -> Self {
        Self {
            entries: BTreeMap::new(),
            recency_window,
        }
    }

    /// Records `event.status` for the project, stamped with `now` rather than
    /// the event's own timestamp.
    pub fn apply(&mut self, event: &PipelineEvent, now: DateTime<Utc>) {
        self.entries.insert(
            event.project_name.clone(),
            ProjectStatusEntry {
                project_name: event.project_name.clone(),
                status: event.status.clone(),
                last_updated_at: now,
            },
        );
    }

    pub fn is_any_running(&self, now: DateTime<Utc>) -> bool {
        self.entries
            .values()
            .any(|entry| self.counts_as_running(entry, now))
    }

    pub fn running_projects(&self, now: DateTime<Utc>) -> Vec<String> {
        self.entries
            .values()
            .filter(|entry| self.counts_as_running(entry, now))
            .map(|entry| entry.project_name.clone())
            .collect()
    }

    pub fn get(&self, project_name: &str) -> Option<&ProjectStatusEntry> {
        self.entries.get(project_name)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Copy-out view sorted by project name.
    pub fn snapshot(&self) -> Vec<ProjectStatusEntry> {
        self.entries.values().cloned().collect()
    }

    fn counts_as_running(&self, entry: &ProjectStatusEntry, now: DateTime<Utc>) -> bool {
        entry.status.is_running()
            && now.signed_duration_since(entry.last_updated_at) < self.recency_window
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn ts(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(1_792_000_000 + secs, 0)
            .single()
            .expect("valid test timestamp")
    }

    fn event(project: &str, status: PipelineStatus) -> PipelineEvent {
        PipelineEvent {
            project_id: 1,
            project_name: project.to_string(),
            namespace: "acme".to_string(),
            status,
            commit_message: "change".to_string(),
            project_url: format!("https://gitlab.example.com/acme/{project}"),
            pipeline_id: 1,
            timestamp: ts(0),
        }
    }

    #[test]
    fn running_event_marks_tracker_busy_immediately() {
        let mut tracker = ProjectStateTracker::default();
        assert!(!tracker.is_any_running(ts(0)));
        tracker.apply(&event("X", PipelineStatus::Running), ts(0));
        assert!(tracker.is_any_running(ts(0)));
        assert_eq!(tracker.running_projects(ts(1)), vec!["X".to_string()]);
    }

    #[test]
    fn running_entry_expires_after_recency_window() {
        let mut tracker = ProjectStateTracker::default();
        tracker.apply(&event("X", PipelineStatus::Running), ts(0));
        assert!(tracker.is_any_running(ts(299)));
        assert!(!tracker.is_any_running(ts(300)));
        assert!(!tracker.is_any_running(ts(3_600)));
    }

    #[test]
    fn newer_running_event_extends_window() {
        let mut tracker = ProjectStateTracker::default();
        tracker.apply(&event("X", PipelineStatus::Running), ts(0));
        tracker.apply(&event("Y", PipelineStatus::Running), ts(200));
        assert!(tracker.is_any_running(ts(450)));
        assert_eq!(tracker.running_projects(ts(450)), vec!["Y".to_string()]);
        assert!(!tracker.is_any_running(ts(500)));
    }

    #[test]
    fn last_write_wins_per_project() {
        let mut tracker = ProjectStateTracker::default();
        tracker.apply(&event("X", PipelineStatus::Running), ts(0));
        tracker.apply(&event("X", PipelineStatus::Success), ts(5));
        assert!(!tracker.is_any_running(ts(6)));
        let entry = tracker.get("X").expect("entry");
        assert_eq!(entry.status, PipelineStatus::Success);
        assert_eq!(entry.last_updated_at, ts(5));
        assert_eq!(tracker.len(), 1);
    }

    #[test]
    fn snapshot_is_a_detached_copy() {
        let mut tracker = ProjectStateTracker::default();
        tracker.apply(&event("b", PipelineStatus::Failed), ts(0));
        tracker.apply(&event("a", PipelineStatus::Running), ts(0));
        let snapshot = tracker.snapshot();
        tracker.apply(&event("a", PipelineStatus::Success), ts(1));
        assert_eq!(snapshot.len(), 2);
        assert_eq!(snapshot[0].project_name, "a");
        assert_eq!(snapshot[0].status, PipelineStatus::Running);
    }
}
