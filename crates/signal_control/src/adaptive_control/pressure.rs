//! Pressure Model: turns one approach's vehicles into a dimensionless score.
//!
//! `pressure = 0.5 * min(queue / Qnorm, 1) + 0.3 * occupancy + 0.2 * (1 - v / v_free)`
//!
//! When the weighted score is implausibly low although vehicles are queued
//! (typically a detector gap), the legacy `0.5 * queue` score is used instead.

use bevy::prelude::*;

use crate::config::AdaptiveConfig;
use crate::direction::Approach;
use crate::telemetry::{Telemetry, VehicleClass};

use super::constants::{LEGACY_PRESSURE_PER_PCU, OCCUPANCY_WEIGHT, QUEUE_WEIGHT, SPEED_WEIGHT};
use super::types::PressureSample;

/// What the pressure model needs to know about one vehicle.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct VehicleReading {
    pub class: VehicleClass,
    pub speed: f64,
}

pub fn compute_pressure(
    readings: &[VehicleReading],
    lane_count: usize,
    config: &AdaptiveConfig,
) -> PressureSample {
    let queue_pcu: f64 = readings
        .iter()
        .filter(|r| r.speed < config.queued_speed)
        .map(|r| r.class.pcu())
        .sum();

    let occupied_m: f64 = readings.iter().map(|r| r.class.length_m()).sum();
    let detector_m = config.detector_length_m * lane_count.max(1) as f64;
    let occupancy = (occupied_m / detector_m).min(1.0);

    let mean_speed = if readings.is_empty() {
        config.free_flow_speed
    } else {
        readings.iter().map(|r| r.speed).sum::<f64>() / readings.len() as f64
    };
    let speed_ratio = (mean_speed / config.free_flow_speed).clamp(0.0, 1.0);

    let weighted = QUEUE_WEIGHT * (queue_pcu / config.queue_normalization_pcu).min(1.0)
        + OCCUPANCY_WEIGHT * occupancy
        + SPEED_WEIGHT * (1.0 - speed_ratio);

    let pressure = if queue_pcu > 0.0 && weighted < config.legacy_fallback_threshold {
        LEGACY_PRESSURE_PER_PCU * queue_pcu
    } else {
        weighted
    };

    PressureSample {
        queue_pcu,
        occupancy,
        mean_speed,
        vehicle_count: readings.len(),
        pressure,
    }
}

/// Reads every lane of an approach and scores it. Lanes or vehicles whose
/// queries fail contribute nothing for this tick.
pub(crate) fn sample_approach(
    telemetry: &dyn Telemetry,
    approach: &Approach,
    config: &AdaptiveConfig,
) -> PressureSample {
    let mut readings = Vec::new();
    for lane in &approach.lanes {
        let ids = match telemetry.lane_vehicle_ids(lane) {
            Ok(ids) => ids,
            Err(e) => {
                warn!("Pressure: lane {} unreadable, counting it empty: {}", lane, e);
                continue;
            }
        };
        for id in ids {
            let reading = telemetry.vehicle_speed(&id).and_then(|speed| {
                let type_id = telemetry.vehicle_type_id(&id)?;
                Ok(VehicleReading {
                    class: VehicleClass::from_type_id(&type_id),
                    speed,
                })
            });
            match reading {
                Ok(r) => readings.push(r),
                Err(e) if e.is_not_found() => {}
                Err(e) => warn!("Pressure: vehicle {} unreadable: {}", id, e),
            }
        }
    }
    compute_pressure(&readings, approach.lanes.len(), config)
}
