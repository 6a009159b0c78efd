//! Event ingestion core for the GitLab pipeline notifier: wire decoding,
//! epoch/sequence gating, per-project status tracking and the notification
//! decision. Nothing in this crate performs I/O.

pub mod contracts;
pub mod gate;
pub mod pipeline;
pub mod policy;
pub mod status;
pub mod tracker;
pub mod wire;

pub use contracts::{
    ActivityIndicator, Notification, NotificationMetadata, NotificationSink, NotifySinkError,
    SettingsProvider, UserFilterConfig,
};
pub use gate::{Decision, GateState, GateVerdict, SequenceGate};
pub use pipeline::{FrameOutcome, Pipeline, PipelineSnapshot, PipelineStats};
pub use policy::{NotificationPolicy, PolicyConfig, PolicyVerdict, SuppressReason};
pub use status::PipelineStatus;
pub use tracker::{ProjectStateTracker, ProjectStatusEntry, RUNNING_RECENCY_WINDOW_SECS};
pub use wire::{DecodeError, Envelope, PipelineEvent, RawFrame, DEFAULT_MAX_FRAME_BYTES};
