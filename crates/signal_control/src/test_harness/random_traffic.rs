//! Seeded random arrivals for soak tests and benches.

use rand::Rng;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;

use crate::direction::Direction;

use super::ScriptedSimulation;

/// Arrivals start between these distances from the stop line.
const SPAWN_DISTANCE_M: (f64, f64) = (120.0, 190.0);
/// Cruise speeds of spawned vehicles, m/s.
const SPAWN_SPEED: (f64, f64) = (8.0, 14.0);

/// Spawns vehicles on every approach of every junction as independent
/// Bernoulli arrivals per tick. Identical seeds give identical traffic.
pub struct RandomTraffic {
    rng: ChaCha8Rng,
    /// Expected arrivals per second per approach.
    pub arrival_rate: f64,
    /// Share of arrivals that are priority vehicles.
    pub priority_share: f64,
    spawned_priority: u64,
}

impl RandomTraffic {
    pub fn new(seed: u64, arrival_rate: f64) -> Self {
        Self {
            rng: ChaCha8Rng::seed_from_u64(seed),
            arrival_rate,
            priority_share: 0.0,
            spawned_priority: 0,
        }
    }

    pub fn with_priority_share(mut self, share: f64) -> Self {
        self.priority_share = share.clamp(0.0, 1.0);
        self
    }

    /// Spawns this tick's arrivals.
    pub fn spawn(&mut self, sim: &mut ScriptedSimulation, dt: f64) {
        let p = (self.arrival_rate * dt).clamp(0.0, 1.0);
        for layout in sim.layouts() {
            for direction in Direction::ALL {
                if !self.rng.gen_bool(p) {
                    continue;
                }
                let distance = self.rng.gen_range(SPAWN_DISTANCE_M.0..SPAWN_DISTANCE_M.1);
                let speed = self.rng.gen_range(SPAWN_SPEED.0..SPAWN_SPEED.1);
                if self.priority_share > 0.0 && self.rng.gen_bool(self.priority_share) {
                    let id = format!("ems_{}", self.spawned_priority);
                    self.spawned_priority += 1;
                    sim.add_ambulance(&id, &layout.junction_id, direction, distance, speed);
                } else {
                    sim.spawn_arrival(&layout.junction_id, direction, distance, speed);
                }
            }
        }
    }

    pub fn spawned_priority(&self) -> u64 {
        self.spawned_priority
    }
}
