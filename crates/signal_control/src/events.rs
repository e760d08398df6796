//! Structured state-change events emitted by the controllers.
//!
//! Controllers buffer these per tick; the network drains them into Bevy's
//! `Events<SignalControlEvent>` and the bounded [`SignalEventJournal`] so that
//! dashboards can either subscribe or poll.

use bevy::prelude::*;
use serde::Serialize;

use crate::direction::SignalPhase;
use crate::priority_control::{ClearanceBand, FalsePositiveReason, PreemptionStateKind, TransitionReason};
use crate::rolling_history::RollingHistory;
use crate::telemetry::VehicleId;

/// Default number of events the journal retains.
pub const EVENT_JOURNAL_CAPACITY: usize = 256;

#[derive(Event, Debug, Clone, PartialEq, Serialize)]
pub enum SignalControlEvent {
    PhaseChanged {
        junction_id: String,
        from: SignalPhase,
        to: SignalPhase,
        time: f64,
    },
    PreemptionStateChanged {
        junction_id: String,
        from: PreemptionStateKind,
        to: PreemptionStateKind,
        reason: TransitionReason,
        time: f64,
    },
    FalsePositive {
        junction_id: String,
        vehicle_id: VehicleId,
        stage: PreemptionStateKind,
        reason: FalsePositiveReason,
        time: f64,
    },
    PreemptionRejected {
        junction_id: String,
        vehicle_id: VehicleId,
        preemptions_in_window: usize,
        time: f64,
    },
    PreemptionFailed {
        junction_id: String,
        vehicle_id: VehicleId,
        hold_duration: f64,
        time: f64,
    },
    VehicleCleared {
        junction_id: String,
        vehicle_id: VehicleId,
        clearance_time: f64,
        band: ClearanceBand,
        time: f64,
    },
    EmergencyModeChanged {
        junction_id: String,
        active: bool,
        time: f64,
    },
}

impl SignalControlEvent {
    pub fn junction_id(&self) -> &str {
        match self {
            Self::PhaseChanged { junction_id, .. }
            | Self::PreemptionStateChanged { junction_id, .. }
            | Self::FalsePositive { junction_id, .. }
            | Self::PreemptionRejected { junction_id, .. }
            | Self::PreemptionFailed { junction_id, .. }
            | Self::VehicleCleared { junction_id, .. }
            | Self::EmergencyModeChanged { junction_id, .. } => junction_id,
        }
    }

    pub fn time(&self) -> f64 {
        match self {
            Self::PhaseChanged { time, .. }
            | Self::PreemptionStateChanged { time, .. }
            | Self::FalsePositive { time, .. }
            | Self::PreemptionRejected { time, .. }
            | Self::PreemptionFailed { time, .. }
            | Self::VehicleCleared { time, .. }
            | Self::EmergencyModeChanged { time, .. } => *time,
        }
    }
}

/// Most recent events across every junction, oldest first.
#[derive(Resource, Debug, Clone)]
pub struct SignalEventJournal {
    pub entries: RollingHistory<SignalControlEvent>,
    /// Events recorded since startup, including evicted ones.
    pub total_recorded: u64,
}

impl Default for SignalEventJournal {
    fn default() -> Self {
        Self {
            entries: RollingHistory::new(EVENT_JOURNAL_CAPACITY),
            total_recorded: 0,
        }
    }
}

impl SignalEventJournal {
    pub fn record(&mut self, event: SignalControlEvent) {
        self.entries.push(event);
        self.total_recorded += 1;
    }

    pub fn iter(&self) -> impl Iterator<Item = &SignalControlEvent> {
        self.entries.iter()
    }

    /// Serializes the retained events as a JSON array for external consumers.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(&self.entries)
    }
}
