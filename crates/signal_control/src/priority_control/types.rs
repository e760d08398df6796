//! Types for the priority controller.

use std::collections::BTreeMap;

use serde::Serialize;

use crate::direction::{Direction, DirectionGroup, SignalPhase};
use crate::telemetry::{VehicleId, VehicleSnapshot};

/// Tag of a [`PreemptionState`], used in events, records and statistics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub enum PreemptionStateKind {
    Normal,
    Detection,
    SafeTransition,
    PreemptionGreen,
    HoldPreemption,
    Restore,
}

impl PreemptionStateKind {
    pub fn label(self) -> &'static str {
        match self {
            Self::Normal => "NORMAL",
            Self::Detection => "DETECTION",
            Self::SafeTransition => "SAFE_TRANSITION",
            Self::PreemptionGreen => "PREEMPTION_GREEN",
            Self::HoldPreemption => "HOLD_PREEMPTION",
            Self::Restore => "RESTORE",
        }
    }
}

/// Clearance interval the controller is driving before the preemption green.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub enum TransitionStage {
    Yellow { until: f64 },
    AllRed { until: f64 },
}

/// How a preemption episode ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum EpisodeOutcome {
    Completed,
    Cancelled,
    Failed,
}

/// Preemption protocol state of one junction.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum PreemptionState {
    Normal,
    Detection,
    SafeTransition { stage: TransitionStage },
    PreemptionGreen,
    HoldPreemption { vehicle_id: VehicleId },
    Restore { outcome: EpisodeOutcome },
}

impl PreemptionState {
    pub fn kind(&self) -> PreemptionStateKind {
        match self {
            Self::Normal => PreemptionStateKind::Normal,
            Self::Detection => PreemptionStateKind::Detection,
            Self::SafeTransition { .. } => PreemptionStateKind::SafeTransition,
            Self::PreemptionGreen => PreemptionStateKind::PreemptionGreen,
            Self::HoldPreemption { .. } => PreemptionStateKind::HoldPreemption,
            Self::Restore { .. } => PreemptionStateKind::Restore,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum TransitionReason {
    CandidateConfirmed,
    NoEligibleCandidate,
    FastPath,
    PhaseChangeRequired,
    TransitionComplete,
    AllVehiclesCleared,
    MinGreenReached,
    VehicleStalled,
    VehicleUnstuck,
    HoldTimeout,
    FalsePositive,
    RateLimited,
    PendingCandidates,
    EpisodeComplete,
    Stopped,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub enum FalsePositiveReason {
    /// Left the network before reaching the junction.
    Disappeared,
    /// No longer reports a priority type or class.
    NotPriorityClass,
}

/// Detection-to-clear time band.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ClearanceBand {
    Excellent,
    Acceptable,
    Poor,
}

impl ClearanceBand {
    pub fn label(self) -> &'static str {
        match self {
            Self::Excellent => "excellent",
            Self::Acceptable => "acceptable",
            Self::Poor => "poor",
        }
    }
}

/// A priority-class vehicle inside the detection radius.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EmergencyVehicle {
    pub id: VehicleId,
    pub type_id: String,
    pub direction: Direction,
    /// Distance to the junction centre at the last observation.
    pub distance: f64,
    pub speed: f64,
    pub eta: f64,
    pub first_detected_at: f64,
    pub last_seen_at: f64,
    pub confirmed: bool,
    /// Observed off its approach road, i.e. past the stop line.
    pub passed_junction: bool,
    pub stalled_since: Option<f64>,
}

/// Speed floor for ETA estimation, so a stopped vehicle gets a large but
/// finite ETA.
const ETA_MIN_SPEED: f64 = 0.1;

pub fn estimate_eta(distance: f64, speed: f64) -> f64 {
    distance / speed.max(ETA_MIN_SPEED)
}

impl EmergencyVehicle {
    pub fn detected(snapshot: &VehicleSnapshot, direction: Direction, distance: f64, now: f64) -> Self {
        Self {
            id: snapshot.id.clone(),
            type_id: snapshot.type_id.clone(),
            direction,
            distance,
            speed: snapshot.speed,
            eta: estimate_eta(distance, snapshot.speed),
            first_detected_at: now,
            last_seen_at: now,
            confirmed: false,
            passed_junction: false,
            stalled_since: None,
        }
    }

    pub fn observe(&mut self, snapshot: &VehicleSnapshot, distance: f64, now: f64) {
        self.type_id.clone_from(&snapshot.type_id);
        self.distance = distance;
        self.speed = snapshot.speed;
        self.eta = estimate_eta(distance, snapshot.speed);
        self.last_seen_at = now;
    }
}

/// Active preemption: who is being escorted and what the signal shows.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct Episode {
    pub primary: VehicleId,
    pub group: DirectionGroup,
    pub committed_at: f64,
    pub green_started_at: Option<f64>,
    pub tracked: BTreeMap<VehicleId, EmergencyVehicle>,
    /// Last phase this controller wrote to the junction.
    pub last_applied: SignalPhase,
}

// ---------------------------------------------------------------------------
// Records
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FalsePositiveRecord {
    pub vehicle_id: VehicleId,
    pub stage: PreemptionStateKind,
    pub reason: FalsePositiveReason,
    pub time: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FailedPreemptionRecord {
    pub vehicle_id: VehicleId,
    pub hold_duration: f64,
    pub final_speed: f64,
    pub final_distance: f64,
    pub time: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RejectionRecord {
    pub vehicle_id: VehicleId,
    pub preemptions_in_window: usize,
    pub time: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct TransitionRecord {
    pub from: PreemptionStateKind,
    pub to: PreemptionStateKind,
    pub reason: TransitionReason,
    pub time: f64,
}

// ---------------------------------------------------------------------------
// Status and statistics
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PriorityStatus {
    pub junction_id: String,
    pub state: PreemptionStateKind,
    pub state_elapsed: f64,
    pub running: bool,
    pub detected_count: usize,
    pub confirmed_count: usize,
    pub pending_count: usize,
    pub served_count: u64,
    pub active_vehicle: Option<VehicleId>,
    pub preemptions_in_last_minute: usize,
    pub can_activate_preemption: bool,
    pub emergency_mode: bool,
    pub total_transitions: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize)]
pub struct ClearanceSummary {
    pub count: u64,
    pub average: f64,
    pub min: f64,
    pub max: f64,
    pub excellent: u64,
    pub acceptable: u64,
    pub poor: u64,
    /// Share of clearances in the excellent band, 0.0..=1.0.
    pub excellent_rate: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PriorityStatistics {
    pub activations: u64,
    pub vehicles_served: u64,
    pub successful_episodes: u64,
    pub completed_episodes: u64,
    pub success_rate: f64,
    /// Mean PreemptionGreen-to-Restore time over finished episodes.
    pub average_handling_time: f64,
    pub false_positives: u64,
    pub false_positives_by_stage: BTreeMap<PreemptionStateKind, u64>,
    pub false_positives_by_reason: BTreeMap<FalsePositiveReason, u64>,
    pub failed_preemptions: u64,
    pub rejected_vehicles: u64,
    pub emergency_mode_activations: u64,
    pub clearance: ClearanceSummary,
}
