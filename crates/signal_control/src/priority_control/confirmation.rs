//! Multi-detection confirmation that filters single-tick detector glitches.

use std::collections::BTreeMap;

use crate::config::PriorityConfig;
use crate::rolling_history::RollingHistory;
use crate::telemetry::VehicleId;

/// Recent detection times per vehicle. A vehicle is confirmed once
/// `confirmation_count` detections fall inside `confirmation_window`.
#[derive(Debug, Clone, Default)]
pub struct DetectionConfirmer {
    detections: BTreeMap<VehicleId, RollingHistory<f64>>,
}

impl DetectionConfirmer {
    /// Records a detection and reports whether the vehicle is now confirmed.
    pub fn record(&mut self, id: &str, now: f64, config: &PriorityConfig) -> bool {
        let history = self
            .detections
            .entry(id.to_string())
            .or_insert_with(|| RollingHistory::new(config.confirmation_count));
        history.retain(|t| now - *t <= config.confirmation_window);
        history.push(now);
        history.len() >= config.confirmation_count
    }

    pub fn detection_count(&self, id: &str) -> usize {
        self.detections.get(id).map_or(0, |h| h.len())
    }

    pub fn forget(&mut self, id: &str) {
        self.detections.remove(id);
    }

    pub fn clear(&mut self) {
        self.detections.clear();
    }
}
