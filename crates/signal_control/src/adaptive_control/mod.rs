//! Adaptive signal timing for one junction.
//!
//! Key behaviors:
//! - Per-direction pressure from PCU-weighted queue, occupancy and speed deficit
//! - Green time `min + alpha * queue + repayment`, bounded by the active envelope
//! - Switching gated by a threshold that relaxes as total pressure rises
//! - Starvation override forces service of a long-waiting, queued direction
//! - Critical waits cap the running green to bound cross-direction delay
//! - Green-time debt from preemptions is repaid over later cycles, faster for
//!   severe backlogs and never more than owed
//! - Suspend/resume and envelope changes arrive as `ControlMessage`s from the
//!   junction's priority controller

mod constants;
mod controller;
mod debt;
mod green_time;
mod pressure;
mod types;

#[cfg(test)]
mod tests;

pub use controller::AdaptiveController;
pub use debt::{severity_score, GreenDebtLedger};
pub use green_time::{dynamic_switch_threshold, green_ceiling, green_time};
pub use pressure::{compute_pressure, VehicleReading};
pub use types::{
    AdaptiveStatistics, AdaptiveStatus, BacklogEntry, BacklogReport, BacklogStatus,
    ControlMessage, GreenEnvelope, HoldReason, PhaseDecision, PhaseRecord, PressureSample,
    SwitchReason,
};
