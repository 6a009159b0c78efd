use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;

/// Pipeline status as reported by the server.
///
/// Statuses the server adds later decode into `Unknown` instead of failing the
/// whole frame.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum PipelineStatus {
    Created,
    WaitingForResource,
    Preparing,
    Pending,
    Running,
    Success,
    Failed,
    Canceled,
    Skipped,
    Manual,
    Scheduled,
    Unknown(String),
}

impl PipelineStatus {
    pub fn as_str(&self) -> &str {
        match self {
            PipelineStatus::Created => "created",
            PipelineStatus::WaitingForResource => "waiting_for_resource",
            PipelineStatus::Preparing => "preparing",
            PipelineStatus::Pending => "pending",
            PipelineStatus::Running => "running",
            PipelineStatus::Success => "success",
            PipelineStatus::Failed => "failed",
            PipelineStatus::Canceled => "canceled",
            PipelineStatus::Skipped => "skipped",
            PipelineStatus::Manual => "manual",
            PipelineStatus::Scheduled => "scheduled",
            PipelineStatus::Unknown(raw) => raw.as_str(),
        }
    }

    pub fn is_running(&self) -> bool {
        matches!(self, PipelineStatus::Running)
    }

    pub fn is_pending(&self) -> bool {
        matches!(self, PipelineStatus::Pending)
    }
}

impl From<&str> for PipelineStatus {
    fn from(input: &str) -> Self {
        let normalized = input.trim().to_ascii_lowercase();
        match normalized.as_str() {
            "created" => PipelineStatus::Created,
            "waiting_for_resource" => PipelineStatus::WaitingForResource,
            "preparing" => PipelineStatus::Preparing,
            "pending" => PipelineStatus::Pending,
            "running" => PipelineStatus::Running,
            "success" => PipelineStatus::Success,
            "failed" => PipelineStatus::Failed,
            "canceled" | "cancelled" => PipelineStatus::Canceled,
            "skipped" => PipelineStatus::Skipped,
            "manual" => PipelineStatus::Manual,
            "scheduled" => PipelineStatus::Scheduled,
            _ => PipelineStatus::Unknown(input.trim().to_string()),
        }
    }
}

impl fmt::Display for PipelineStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Serialize for PipelineStatus {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for PipelineStatus {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let raw = String::deserialize(deserializer)?;
        Ok(PipelineStatus::from(raw.as_str()))
    }
}
