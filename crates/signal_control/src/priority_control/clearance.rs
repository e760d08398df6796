//! Detection-to-clear KPI bookkeeping.

use crate::config::PriorityConfig;

use super::types::{ClearanceBand, ClearanceSummary};

pub fn classify(clearance_time: f64, config: &PriorityConfig) -> ClearanceBand {
    if clearance_time <= config.clearance_excellent {
        ClearanceBand::Excellent
    } else if clearance_time <= config.clearance_acceptable {
        ClearanceBand::Acceptable
    } else {
        ClearanceBand::Poor
    }
}

/// Running clearance distribution. Keeps counters only, so it stays bounded
/// over arbitrarily long runs.
#[derive(Debug, Clone, Default)]
pub struct ClearanceStats {
    count: u64,
    total: f64,
    min: f64,
    max: f64,
    excellent: u64,
    acceptable: u64,
    poor: u64,
}

impl ClearanceStats {
    pub fn record(&mut self, clearance_time: f64, config: &PriorityConfig) -> ClearanceBand {
        let band = classify(clearance_time, config);
        if self.count == 0 {
            self.min = clearance_time;
            self.max = clearance_time;
        } else {
            self.min = self.min.min(clearance_time);
            self.max = self.max.max(clearance_time);
        }
        self.count += 1;
        self.total += clearance_time;
        match band {
            ClearanceBand::Excellent => self.excellent += 1,
            ClearanceBand::Acceptable => self.acceptable += 1,
            ClearanceBand::Poor => self.poor += 1,
        }
        band
    }

    pub fn summary(&self) -> ClearanceSummary {
        if self.count == 0 {
            return ClearanceSummary::default();
        }
        ClearanceSummary {
            count: self.count,
            average: self.total / self.count as f64,
            min: self.min,
            max: self.max,
            excellent: self.excellent,
            acceptable: self.acceptable,
            poor: self.poor,
            excellent_rate: self.excellent as f64 / self.count as f64,
        }
    }
}
