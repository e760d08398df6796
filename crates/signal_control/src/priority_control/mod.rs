//! Priority-vehicle preemption for one junction.
//!
//! Key behaviors:
//! - Priority vehicles inside the detection radius are confirmed only after
//!   repeated detections within a short window
//! - Candidates are arbitrated by ETA with a distance tie-break; the rest of
//!   the same group ride along, other groups are parked pending
//! - A rolling-window budget plus cooldown limits preemptions; a rejection
//!   turns on emergency mode, tightening the adaptive envelope
//! - Every state re-verifies the escorted vehicles and cancels on a false
//!   positive
//! - Stalled vehicles get a bounded hold; a timeout is a failed preemption
//! - Restore credits green debt weighted by backlog severity, then resumes the
//!   adaptive controller

mod arbitration;
mod clearance;
mod confirmation;
mod controller;
mod rate_limit;
mod types;


pub use arbitration::{select, Arbitration};
pub use clearance::{classify, ClearanceStats};
pub use confirmation::DetectionConfirmer;
pub use controller::PriorityController;
pub use rate_limit::RateLimiter;
pub use types::{
    estimate_eta, ClearanceBand, ClearanceSummary, EmergencyVehicle, EpisodeOutcome,
    FailedPreemptionRecord, FalsePositiveReason, FalsePositiveRecord, PreemptionState,
    PreemptionStateKind, PriorityStatistics, PriorityStatus, RejectionRecord, TransitionReason,
    TransitionRecord, TransitionStage,
};
