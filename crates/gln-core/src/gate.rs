//! Epoch-then-sequence ordering for inbound envelopes.
//!
//! The server bumps `epoch` once per fresh connection and counts `seq` up
//! within an epoch. An envelope is accepted only if it moves the
//! `(epoch, seq)` high-water mark forward.

use crate::wire::Envelope;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Decision {
    Accept,
    Replay,
    Stale,
}

impl Decision {
    pub fn as_str(self) -> &'static str {
        match self {
            Decision::Accept => "accept",
            Decision::Replay => "replay",
            Decision::Stale => "stale",
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GateState {
    pub current_epoch: u64,
    pub latest_accepted_seq: u64,
    /// Seq of the first replay-complete marker seen in `current_epoch`.
    pub replay_watermark: Option<u64>,
}

impl GateState {
    /// Events at or below the watermark are catch-up, not live traffic.
    /// Before a marker arrives nothing is below the watermark.
    pub fn is_past_watermark(&self, seq: u64) -> bool {
        self.replay_watermark.map_or(true, |watermark| seq > watermark)
    }
}

/// Pure classification step: returns the decision and the successor state.
pub fn classify(envelope: &Envelope, state: &GateState) -> (Decision, GateState) {
    let mut next = *state;
    let decision = if envelope.epoch > state.current_epoch {
        next.current_epoch = envelope.epoch;
        next.latest_accepted_seq = envelope.seq;
        next.replay_watermark = None;
        Decision::Accept
    } else if envelope.epoch < state.current_epoch {
        return (Decision::Stale, next);
    } else if envelope.seq <= state.latest_accepted_seq {
        Decision::Replay
    } else {
        next.latest_accepted_seq = envelope.seq;
        Decision::Accept
    };

    if envelope.is_replay_marker() && next.replay_watermark.is_none() {
        next.replay_watermark = Some(envelope.seq);
    }
    (decision, next)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GateVerdict {
    pub decision: Decision,
    /// Whether the envelope is live traffic rather than catch-up, judged
    /// against the watermark in force after classification.
    pub past_watermark: bool,
}

#[derive(Debug, Default)]
pub struct SequenceGate {
    state: GateState,
}

impl SequenceGate {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_state(state: GateState) -> Self {
        Self { state }
    }

    pub fn state(&self) -> GateState {
        self.state
    }

    pub fn classify(&mut self, envelope: &Envelope) -> GateVerdict {
        let (decision, next) = classify(envelope, &self.state);
        self.state = next;
        GateVerdict {
            decision,
            past_watermark: decision != Decision::Stale
                && self.state.is_past_watermark(envelope.seq),
        }
    }
}
