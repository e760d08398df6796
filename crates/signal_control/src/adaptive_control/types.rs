//! Types for the adaptive controller.

use serde::Serialize;

use crate::direction::{Direction, DirectionGroup, DirectionTable, SignalPhase};

use super::constants::{CRITICAL_SEVERITY, WARNING_SEVERITY};

/// One direction's pressure reading for one tick.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize)]
pub struct PressureSample {
    /// Queued (slow) vehicles in passenger car units.
    pub queue_pcu: f64,
    /// Fraction of detector length covered by vehicles, 0.0..=1.0.
    pub occupancy: f64,
    /// Mean speed of every vehicle on the approach (free-flow speed when empty).
    pub mean_speed: f64,
    pub vehicle_count: usize,
    pub pressure: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum BacklogStatus {
    Ok,
    Warning,
    Critical,
}

impl BacklogStatus {
    pub fn from_severity(severity: f64) -> Self {
        if severity >= CRITICAL_SEVERITY {
            BacklogStatus::Critical
        } else if severity >= WARNING_SEVERITY {
            BacklogStatus::Warning
        } else {
            BacklogStatus::Ok
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            BacklogStatus::Ok => "OK",
            BacklogStatus::Warning => "WARNING",
            BacklogStatus::Critical => "CRITICAL",
        }
    }
}

/// Backlog assessment of one direction, read by the priority controller before
/// it hands control back.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct BacklogEntry {
    pub current_queue: f64,
    pub average_queue: f64,
    pub wait_time: f64,
    /// 0..=100
    pub severity: f64,
    pub status: BacklogStatus,
    pub debt: f64,
}

pub type BacklogReport = DirectionTable<BacklogEntry>;

/// Active min/max green bounds.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct GreenEnvelope {
    pub min_green: f64,
    pub max_green: f64,
    pub emergency: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum SwitchReason {
    /// A direction waited past the maximum with a real queue.
    Starvation(Direction),
    PressureImbalance,
    PlannedGreenElapsed,
    MaxGreen,
    MaxCycle,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum HoldReason {
    MinGreen,
    DebtRepayment,
    PlannedGreen,
    NoOpposingDemand,
}

/// Outcome of evaluating a running green.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum PhaseDecision {
    Hold(HoldReason),
    Switch {
        toward: DirectionGroup,
        reason: SwitchReason,
    },
}

/// Instructions the priority controller sends to its junction's adaptive
/// controller. They are applied on the adaptive controller's own turn.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub enum ControlMessage {
    Suspend,
    /// Hand control back, adopting the phase the priority controller left applied.
    Resume { phase: SignalPhase, at: f64 },
    /// A phase the priority controller wrote while adaptive control was suspended.
    PhaseApplied { phase: SignalPhase, at: f64 },
    CreditGreenDebt { direction: Direction, seconds: f64 },
    EnterEmergencyEnvelope,
    RestoreNormalEnvelope,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct PhaseRecord {
    pub phase: SignalPhase,
    pub started_at: f64,
    pub duration: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AdaptiveStatus {
    pub junction_id: String,
    pub phase: SignalPhase,
    pub phase_elapsed: f64,
    pub running: bool,
    pub suspended: bool,
    pub pressures: DirectionTable<f64>,
    pub ns_total_pressure: f64,
    pub ew_total_pressure: f64,
    pub planned_green: Option<f64>,
    pub phase_change_count: u64,
    pub last_switch_reason: Option<SwitchReason>,
    pub debt: DirectionTable<f64>,
    pub envelope: GreenEnvelope,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AdaptiveStatistics {
    pub total_phases: u64,
    pub average_phase_duration: f64,
    pub average_pressures: DirectionTable<f64>,
    pub average_queue_lengths: DirectionTable<f64>,
    pub total_measured_time: f64,
    pub total_debt_repaid: f64,
}

/// Lifetime running mean.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub(crate) struct MeanAccumulator {
    sum: f64,
    count: u64,
}

impl MeanAccumulator {
    pub(crate) fn push(&mut self, value: f64) {
        self.sum += value;
        self.count += 1;
    }

    pub(crate) fn mean(&self) -> f64 {
        if self.count == 0 {
            0.0
        } else {
            self.sum / self.count as f64
        }
    }
}
