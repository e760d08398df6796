//! Constants for the adaptive controller.

/// Weight of the normalized queue term in the pressure score.
pub(crate) const QUEUE_WEIGHT: f64 = 0.5;

/// Weight of the lane occupancy term in the pressure score.
pub(crate) const OCCUPANCY_WEIGHT: f64 = 0.3;

/// Weight of the speed-deficit term `(1 - v / v_free)` in the pressure score.
pub(crate) const SPEED_WEIGHT: f64 = 0.2;

/// Pressure per queued PCU in the legacy formula used when sensors look implausible.
pub(crate) const LEGACY_PRESSURE_PER_PCU: f64 = 0.5;

/// Severity points contributed by the current queue (saturates at normalization).
pub(crate) const SEVERITY_QUEUE_POINTS: f64 = 50.0;

/// Severity points contributed by queue growth versus its rolling mean.
pub(crate) const SEVERITY_TREND_POINTS: f64 = 25.0;

/// Severity points contributed by time since last green (saturates at max wait).
pub(crate) const SEVERITY_WAIT_POINTS: f64 = 25.0;

/// Severity at or above which a backlog is Critical.
pub(crate) const CRITICAL_SEVERITY: f64 = 70.0;

/// Severity at or above which a backlog is Warning.
pub(crate) const WARNING_SEVERITY: f64 = 40.0;

/// Completed phases kept for inspection.
pub(crate) const PHASE_LOG_CAPACITY: usize = 100;

/// Group pressures closer than this are treated as equal.
pub(crate) const PRESSURE_TIE_EPSILON: f64 = 1e-9;

/// Undelivered repayment below this is rounding, not a refund.
pub(crate) const REFUND_EPSILON: f64 = 1e-6;
