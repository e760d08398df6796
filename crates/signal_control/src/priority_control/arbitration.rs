//! Choosing which confirmed candidate a preemption serves.

use std::cmp::Ordering;

use crate::config::PriorityConfig;
use crate::telemetry::VehicleId;

use super::types::EmergencyVehicle;

/// Outcome of arbitration: the served vehicle and the other eligible ones.
#[derive(Debug, Clone, PartialEq)]
pub struct Arbitration {
    pub chosen: VehicleId,
    pub others: Vec<VehicleId>,
}

fn by_eta(a: &&EmergencyVehicle, b: &&EmergencyVehicle) -> Ordering {
    a.eta
        .total_cmp(&b.eta)
        .then(a.distance.total_cmp(&b.distance))
        .then_with(|| a.id.cmp(&b.id))
}

/// Picks the confirmed candidate with the lowest ETA among those within the
/// eligibility bound. When the two best ETAs are within the tie tolerance the
/// nearer vehicle wins.
pub fn select<'a>(
    candidates: impl IntoIterator<Item = &'a EmergencyVehicle>,
    config: &PriorityConfig,
) -> Option<Arbitration> {
    let mut eligible: Vec<&EmergencyVehicle> = candidates
        .into_iter()
        .filter(|v| v.confirmed && v.eta <= config.eligibility_eta)
        .collect();
    eligible.sort_by(by_eta);

    if eligible.len() >= 2 {
        let (first, second) = (eligible[0], eligible[1]);
        if second.eta - first.eta <= config.eta_tie_tolerance && second.distance < first.distance {
            eligible.swap(0, 1);
        }
    }

    let mut ids = eligible.into_iter().map(|v| v.id.clone());
    let chosen = ids.next()?;
    Some(Arbitration {
        chosen,
        others: ids.collect(),
    })
}
