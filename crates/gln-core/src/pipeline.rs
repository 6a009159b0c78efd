//! Per-frame composition of decode, gate, tracker and policy.
//!
//! `Pipeline` owns all mutable ingestion state and is driven by exactly one
//! task. It performs no I/O: side effects come back to the caller as a
//! `FrameOutcome`.

use crate::contracts::{Notification, UserFilterConfig};
use crate::gate::{Decision, GateState, GateVerdict, SequenceGate};
use crate::policy::{NotificationPolicy, PolicyConfig, PolicyVerdict, SuppressReason};
use crate::tracker::{ProjectStateTracker, ProjectStatusEntry};
use crate::wire::{decode, DecodeError, Envelope, RawFrame, DEFAULT_MAX_FRAME_BYTES};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PipelineStats {
    pub frames: u64,
    pub decode_errors: u64,
    pub accepted: u64,
    pub replayed: u64,
    pub stale: u64,
    pub markers: u64,
    pub notifications: u64,
    pub suppressed: u64,
    pub reconnects: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PipelineSnapshot {
    pub projects: Vec<ProjectStatusEntry>,
    pub running: Vec<String>,
    pub any_running: bool,
    pub gate: GateState,
    pub stats: PipelineStats,
    pub taken_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FrameOutcome {
    pub seq: u64,
    pub epoch: u64,
    pub verdict: GateVerdict,
    /// The tracker was updated from this frame.
    pub applied: bool,
    pub notification: Option<Notification>,
    pub suppressed: Option<SuppressReason>,
    /// New liveness indicator value when this frame flipped it.
    pub indicator: Option<bool>,
}

#[derive(Debug)]
pub struct Pipeline {
    gate: SequenceGate,
    tracker: ProjectStateTracker,
    policy: NotificationPolicy,
    stats: PipelineStats,
    indicator_active: bool,
    max_frame_bytes: usize,
}

impl Default for Pipeline {
    fn default() -> Self {
        Self::new(PolicyConfig::default())
    }
}

impl Pipeline {
    pub fn new(policy: PolicyConfig) -> Self {
        Self {
            gate: SequenceGate::new(),
            tracker: ProjectStateTracker::default(),
            policy: NotificationPolicy::new(policy),
            stats: PipelineStats::default(),
            indicator_active: false,
            max_frame_bytes: DEFAULT_MAX_FRAME_BYTES,
        }
    }

    pub fn with_max_frame_bytes(mut self, max_frame_bytes: usize) -> Self {
        self.max_frame_bytes = max_frame_bytes;
        self
    }

    pub fn process_frame(
        &mut self,
        frame: &RawFrame,
        filters: &UserFilterConfig,
        now: DateTime<Utc>,
    ) -> Result<FrameOutcome, DecodeError> {
        self.stats.frames += 1;
        let envelope = match decode(frame, self.max_frame_bytes) {
            Ok(envelope) => envelope,
            Err(err) => {
                self.stats.decode_errors += 1;
                return Err(err);
            }
        };
        Ok(self.process_envelope(&envelope, filters, now))
    }

    pub fn process_envelope(
        &mut self,
        envelope: &Envelope,
        filters: &UserFilterConfig,
        now: DateTime<Utc>,
    ) -> FrameOutcome {
        let verdict = self.gate.classify(envelope);
        match verdict.decision {
            Decision::Accept => self.stats.accepted += 1,
            Decision::Replay => self.stats.replayed += 1,
            Decision::Stale => self.stats.stale += 1,
        }

        let mut outcome = FrameOutcome {
            seq: envelope.seq,
            epoch: envelope.epoch,
            verdict,
            applied: false,
            notification: None,
            suppressed: None,
            indicator: None,
        };

        let Some(event) = envelope.event.as_ref() else {
            self.stats.markers += 1;
            return outcome;
        };

        // Replays below the watermark still carry server truth for the tracker.
        outcome.applied = match verdict.decision {
            Decision::Accept => true,
            Decision::Replay => !verdict.past_watermark,
            Decision::Stale => false,
        };
        if outcome.applied {
            self.tracker.apply(event, now);
            outcome.indicator = self.refresh_indicator(now);
        }

        if verdict.decision != Decision::Stale {
            match self.policy.evaluate(event, filters, verdict, now) {
                PolicyVerdict::Notify(notification) => {
                    self.stats.notifications += 1;
                    outcome.notification = Some(notification);
                }
                PolicyVerdict::Suppress(reason) => {
                    self.stats.suppressed += 1;
                    outcome.suppressed = Some(reason);
                }
            }
        }
        outcome
    }

    /// Re-evaluates the liveness indicator without a new frame, so a stale
    /// `running` entry releases it once the recency window lapses.
    pub fn sweep(&mut self, now: DateTime<Utc>) -> Option<bool> {
        self.refresh_indicator(now)
    }

    pub fn note_reconnect(&mut self) {
        self.stats.reconnects += 1;
    }

    pub fn indicator_active(&self) -> bool {
        self.indicator_active
    }

    pub fn gate_state(&self) -> GateState {
        self.gate.state()
    }

    pub fn tracker(&self) -> &ProjectStateTracker {
        &self.tracker
    }

    pub fn stats(&self) -> PipelineStats {
        self.stats
    }

    pub fn snapshot(&self, now: DateTime<Utc>) -> PipelineSnapshot {
        PipelineSnapshot {
            projects: self.tracker.snapshot(),
            running: self.tracker.running_projects(now),
            any_running: self.tracker.is_any_running(now),
            gate: self.gate.state(),
            stats: self.stats,
            taken_at: now,
        }
    }

    fn refresh_indicator(&mut self, now: DateTime<Utc>) -> Option<bool> {
        let active = self.tracker.is_any_running(now);
        if active == self.indicator_active {
            return None;
        }
        self.indicator_active = active;
        Some(active)
    }
}
