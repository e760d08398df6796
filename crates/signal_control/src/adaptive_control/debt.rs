//! Green-time debt owed to directions whose green was cut by a preemption.

use serde::Serialize;

use crate::config::AdaptiveConfig;
use crate::direction::{Direction, DirectionTable};

use super::constants::{SEVERITY_QUEUE_POINTS, SEVERITY_TREND_POINTS, SEVERITY_WAIT_POINTS};

/// Backlog severity on a 0..=100 scale from queue size, queue growth and wait.
pub fn severity_score(
    current_queue: f64,
    average_queue: Option<f64>,
    wait_time: f64,
    config: &AdaptiveConfig,
) -> f64 {
    let queue_points =
        (current_queue / config.queue_normalization_pcu).clamp(0.0, 1.0) * SEVERITY_QUEUE_POINTS;

    let trend_points = match average_queue {
        Some(avg) if avg > 0.0 => ((current_queue - avg) / avg).clamp(0.0, 1.0) * SEVERITY_TREND_POINTS,
        Some(_) if current_queue > 0.0 => SEVERITY_TREND_POINTS,
        _ => 0.0,
    };

    let wait_points = if config.max_waiting_time > 0.0 {
        (wait_time / config.max_waiting_time).clamp(0.0, 1.0) * SEVERITY_WAIT_POINTS
    } else {
        0.0
    };

    queue_points + trend_points + wait_points
}

/// Outstanding seconds owed per direction. Debt never goes negative and a
/// single repayment never exceeds what is owed.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct GreenDebtLedger {
    outstanding: DirectionTable<f64>,
    credited: DirectionTable<f64>,
    repaid: DirectionTable<f64>,
}

impl GreenDebtLedger {
    /// Adds debt. Non-finite or non-positive amounts are ignored.
    pub fn credit(&mut self, direction: Direction, seconds: f64) -> bool {
        if !seconds.is_finite() || seconds <= 0.0 {
            return false;
        }
        self.outstanding[direction] += seconds;
        self.credited[direction] += seconds;
        true
    }

    pub fn outstanding(&self, direction: Direction) -> f64 {
        self.outstanding[direction]
    }

    pub fn outstanding_table(&self) -> DirectionTable<f64> {
        self.outstanding
    }

    pub fn total_credited(&self, direction: Direction) -> f64 {
        self.credited[direction]
    }

    pub fn total_repaid(&self, direction: Direction) -> f64 {
        self.repaid[direction]
    }

    /// Pays part of a direction's debt for one cycle and returns the seconds
    /// granted. The paid fraction grows with `severity`; a very severe backlog
    /// gets a flat bonus. Payment is limited by the per-cycle cap and by
    /// `headroom`, the extra green the envelope can still absorb.
    pub fn repay(
        &mut self,
        direction: Direction,
        severity: f64,
        headroom: f64,
        config: &AdaptiveConfig,
    ) -> f64 {
        let owed = self.outstanding[direction];
        if owed <= 0.0 {
            return 0.0;
        }

        let severity = severity.clamp(0.0, 100.0);
        let fraction = (config.debt_base_fraction + config.debt_severity_fraction * severity / 100.0)
            .clamp(0.0, 1.0);
        let mut amount = owed * fraction;
        if severity > config.debt_bonus_severity {
            amount += config.debt_bonus_seconds;
        }
        if owed - amount < config.debt_residual {
            amount = owed;
        }

        let amount = amount
            .min(config.debt_cycle_cap)
            .min(headroom.max(0.0))
            .min(owed);

        self.outstanding[direction] = owed - amount;
        self.repaid[direction] += amount;
        amount
    }

    /// Reverses part of an earlier repayment that the green never delivered.
    pub fn refund(&mut self, direction: Direction, seconds: f64) {
        let amount = seconds.clamp(0.0, self.repaid[direction]);
        self.repaid[direction] -= amount;
        self.outstanding[direction] += amount;
    }

    pub fn clear(&mut self) {
        self.outstanding = DirectionTable::default();
    }
}
