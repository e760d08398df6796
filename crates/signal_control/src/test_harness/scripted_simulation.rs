//! In-memory simulator implementing [`Telemetry`] for tests and benches.
//!
//! Vehicles live on one approach of one junction at a signed distance from
//! the stop line: positive while approaching, negative once past. With
//! `autodrive` enabled, `advance` moves them forward on green and queues them
//! at the stop line otherwise; without it they stay where the test put them.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Arc, Mutex, MutexGuard};

use bevy::math::DVec2;

use crate::direction::{Direction, JunctionLayout, SignalPhase};
use crate::telemetry::{EntityKind, Telemetry, TelemetryError, TelemetryResult, VehicleId};

/// Edge ids of the reference four-arm junction, in N, S, E, W order.
pub const STANDARD_ROADS: [&str; 4] = ["-E1", "-E2", "-E3", "E0"];

/// Spacing between queued vehicles, bumper to bumper.
const QUEUE_SPACING_M: f64 = 7.0;
/// Queued vehicles stop this far before the line.
const STOP_LINE_GAP_M: f64 = 2.0;
/// Vehicles are dropped once this far past the junction.
const EXIT_DISTANCE_M: f64 = 150.0;

pub fn standard_layout() -> JunctionLayout {
    JunctionLayout::four_arm("J1", STANDARD_ROADS)
}

/// Layout with roads named after the junction, for multi-junction networks.
pub fn named_layout(junction_id: &str) -> JunctionLayout {
    let roads = ["north", "south", "east", "west"].map(|arm| format!("{junction_id}_{arm}_in"));
    JunctionLayout::four_arm(
        junction_id,
        [roads[0].as_str(), roads[1].as_str(), roads[2].as_str(), roads[3].as_str()],
    )
}

fn unit_offset(direction: Direction) -> DVec2 {
    match direction {
        Direction::North => DVec2::new(0.0, 1.0),
        Direction::South => DVec2::new(0.0, -1.0),
        Direction::East => DVec2::new(1.0, 0.0),
        Direction::West => DVec2::new(-1.0, 0.0),
    }
}

#[derive(Debug, Clone)]
pub struct ScriptedJunction {
    pub layout: JunctionLayout,
    pub position: DVec2,
    pub applied: SignalPhase,
    /// Every phase applied, through either write API, with its time.
    pub applied_log: Vec<(f64, SignalPhase)>,
    pub state_writes: usize,
}

#[derive(Debug, Clone)]
pub struct ScriptedVehicle {
    pub type_id: String,
    pub vehicle_class: String,
    pub junction: String,
    pub direction: Direction,
    pub lane: usize,
    /// Signed distance to the stop line.
    pub distance: f64,
    pub speed: f64,
    pub cruise_speed: f64,
}

#[derive(Debug, Clone)]
pub struct ScriptedSimulation {
    time: f64,
    live: bool,
    /// Move vehicles on every `advance`.
    pub autodrive: bool,
    junctions: BTreeMap<String, ScriptedJunction>,
    vehicles: BTreeMap<VehicleId, ScriptedVehicle>,
    failing_phase_writes: u32,
    failing_vehicles: BTreeSet<VehicleId>,
    next_auto_id: u64,
    departed: u64,
}

impl Default for ScriptedSimulation {
    fn default() -> Self {
        Self::new()
    }
}

impl ScriptedSimulation {
    pub fn new() -> Self {
        Self {
            time: 0.0,
            live: true,
            autodrive: false,
            junctions: BTreeMap::new(),
            vehicles: BTreeMap::new(),
            failing_phase_writes: 0,
            failing_vehicles: BTreeSet::new(),
            next_auto_id: 0,
            departed: 0,
        }
    }

    /// One reference junction "J1" at the origin.
    pub fn standard() -> Self {
        Self::new().with_junction(standard_layout(), DVec2::ZERO)
    }

    pub fn with_junction(mut self, layout: JunctionLayout, position: DVec2) -> Self {
        self.junctions.insert(
            layout.junction_id.clone(),
            ScriptedJunction {
                layout,
                position,
                applied: SignalPhase::NsGreen,
                applied_log: Vec::new(),
                state_writes: 0,
            },
        );
        self
    }

    pub fn layouts(&self) -> Vec<JunctionLayout> {
        self.junctions.values().map(|j| j.layout.clone()).collect()
    }

    // -----------------------------------------------------------------------
    // Clock and link
    // -----------------------------------------------------------------------

    pub fn time(&self) -> f64 {
        self.time
    }

    pub fn set_live(&mut self, live: bool) {
        self.live = live;
    }

    pub fn advance(&mut self, dt: f64) {
        self.time += dt;
        if self.autodrive {
            self.drive(dt);
        }
    }

    /// Makes the next `n` phase writes (either API) fail.
    pub fn fail_next_phase_writes(&mut self, n: u32) {
        self.failing_phase_writes = n;
    }

    /// Makes every query about this vehicle fail with a non-"not found" error.
    pub fn fail_vehicle_queries(&mut self, id: &str) {
        self.failing_vehicles.insert(id.to_string());
    }

    pub fn heal_vehicle_queries(&mut self) {
        self.failing_vehicles.clear();
    }

    // -----------------------------------------------------------------------
    // Vehicles
    // -----------------------------------------------------------------------

    #[allow(clippy::too_many_arguments)]
    pub fn add_vehicle(
        &mut self,
        id: &str,
        type_id: &str,
        vehicle_class: &str,
        junction: &str,
        direction: Direction,
        distance: f64,
        speed: f64,
    ) {
        let lane = self
            .vehicles
            .values()
            .filter(|v| v.junction == junction && v.direction == direction)
            .count()
            % 3;
        self.vehicles.insert(
            id.to_string(),
            ScriptedVehicle {
                type_id: type_id.to_string(),
                vehicle_class: vehicle_class.to_string(),
                junction: junction.to_string(),
                direction,
                lane,
                distance,
                speed,
                cruise_speed: speed.max(8.0),
            },
        );
    }

    /// Adds `count` stopped passenger cars queued at the stop line.
    pub fn queue_cars(&mut self, junction: &str, direction: Direction, count: usize) {
        self.queue_vehicles(junction, direction, "passenger", count);
    }

    pub fn queue_vehicles(&mut self, junction: &str, direction: Direction, type_id: &str, count: usize) {
        for i in 0..count {
            let id = format!("auto_{}", self.next_auto_id);
            self.next_auto_id += 1;
            let distance = STOP_LINE_GAP_M + QUEUE_SPACING_M * (i / 3) as f64;
            self.add_vehicle(&id, type_id, "passenger", junction, direction, distance, 0.0);
        }
    }

    /// Adds a moving vehicle with a fresh id and returns the id.
    pub fn spawn_arrival(&mut self, junction: &str, direction: Direction, distance: f64, speed: f64) -> VehicleId {
        let id = format!("auto_{}", self.next_auto_id);
        self.next_auto_id += 1;
        self.add_vehicle(&id, "passenger", "passenger", junction, direction, distance, speed);
        id
    }

    pub fn add_ambulance(&mut self, id: &str, junction: &str, direction: Direction, distance: f64, speed: f64) {
        self.add_vehicle(id, "ambulance", "emergency", junction, direction, distance, speed);
    }

    pub fn set_motion(&mut self, id: &str, distance: f64, speed: f64) {
        if let Some(v) = self.vehicles.get_mut(id) {
            v.distance = distance;
            v.speed = speed;
        }
    }

    pub fn set_speed(&mut self, id: &str, speed: f64) {
        if let Some(v) = self.vehicles.get_mut(id) {
            v.speed = speed;
        }
    }

    /// Moves a vehicle past the stop line onto its exit road.
    pub fn pass_junction(&mut self, id: &str, beyond: f64) {
        self.set_motion(id, -beyond.abs(), self.vehicles.get(id).map_or(10.0, |v| v.cruise_speed));
    }

    pub fn retype_vehicle(&mut self, id: &str, type_id: &str, vehicle_class: &str) {
        if let Some(v) = self.vehicles.get_mut(id) {
            v.type_id = type_id.to_string();
            v.vehicle_class = vehicle_class.to_string();
        }
    }

    pub fn remove_vehicle(&mut self, id: &str) {
        self.vehicles.remove(id);
    }

    pub fn clear_vehicles(&mut self, junction: &str, direction: Direction) {
        self.vehicles
            .retain(|_, v| !(v.junction == junction && v.direction == direction));
    }

    pub fn vehicle(&self, id: &str) -> Option<&ScriptedVehicle> {
        self.vehicles.get(id)
    }

    pub fn vehicle_count(&self) -> usize {
        self.vehicles.len()
    }

    pub fn departed_count(&self) -> u64 {
        self.departed
    }

    // -----------------------------------------------------------------------
    // Signals
    // -----------------------------------------------------------------------

    pub fn applied_phase(&self, junction: &str) -> Option<SignalPhase> {
        self.junctions.get(junction).map(|j| j.applied)
    }

    pub fn applied_log(&self, junction: &str) -> &[(f64, SignalPhase)] {
        self.junctions
            .get(junction)
            .map_or(&[], |j| j.applied_log.as_slice())
    }

    pub fn state_writes(&self, junction: &str) -> usize {
        self.junctions.get(junction).map_or(0, |j| j.state_writes)
    }

    /// Overrides the applied phase without logging, as an operator would.
    pub fn force_phase(&mut self, junction: &str, phase: SignalPhase) {
        if let Some(j) = self.junctions.get_mut(junction) {
            j.applied = phase;
        }
    }

    // -----------------------------------------------------------------------
    // Internals
    // -----------------------------------------------------------------------

    fn drive(&mut self, dt: f64) {
        let mut ahead: BTreeMap<VehicleId, usize> = BTreeMap::new();
        for (id, v) in &self.vehicles {
            if v.distance <= 0.0 {
                continue;
            }
            let count = self
                .vehicles
                .values()
                .filter(|o| {
                    o.junction == v.junction
                        && o.direction == v.direction
                        && o.lane == v.lane
                        && o.distance > 0.0
                        && o.distance < v.distance
                })
                .count();
            ahead.insert(id.clone(), count);
        }

        let junctions = &self.junctions;
        let mut departed = Vec::new();
        for (id, v) in self.vehicles.iter_mut() {
            let green = junctions
                .get(&v.junction)
                .and_then(|j| j.applied.green_group())
                == Some(v.direction.group());
            let step = v.cruise_speed * dt;
            if v.distance > 0.0 && !green {
                let slot = STOP_LINE_GAP_M + QUEUE_SPACING_M * *ahead.get(id).unwrap_or(&0) as f64;
                let target = (v.distance - step).max(slot.min(v.distance));
                v.speed = (v.distance - target) / dt;
                v.distance = target;
            } else {
                v.speed = v.cruise_speed;
                v.distance -= step;
            }
            if v.distance < -EXIT_DISTANCE_M {
                departed.push(id.clone());
            }
        }
        for id in departed {
            self.vehicles.remove(&id);
            self.departed += 1;
        }
    }

    fn check_live(&self) -> TelemetryResult<()> {
        if self.live {
            Ok(())
        } else {
            Err(TelemetryError::NotConnected)
        }
    }

    fn lookup(&self, id: &str) -> TelemetryResult<&ScriptedVehicle> {
        self.check_live()?;
        if self.failing_vehicles.contains(id) {
            return Err(TelemetryError::QueryFailed(format!("vehicle {id} timed out")));
        }
        self.vehicles
            .get(id)
            .ok_or_else(|| TelemetryError::unknown_vehicle(id))
    }

    fn junction(&self, id: &str) -> TelemetryResult<&ScriptedJunction> {
        self.check_live()?;
        self.junctions.get(id).ok_or(TelemetryError::UnknownEntity {
            kind: EntityKind::Junction,
            id: id.to_string(),
        })
    }

    fn road_of(&self, v: &ScriptedVehicle) -> String {
        let road = self
            .junctions
            .get(&v.junction)
            .map(|j| j.layout.approaches[v.direction].road.clone())
            .unwrap_or_default();
        if v.distance > 0.0 {
            road
        } else {
            format!("{road}_exit")
        }
    }

    fn apply(&mut self, junction_id: &str, phase: SignalPhase, via_state: bool) -> TelemetryResult<()> {
        self.check_live()?;
        if self.failing_phase_writes > 0 {
            self.failing_phase_writes -= 1;
            return Err(TelemetryError::QueryFailed("phase write rejected".into()));
        }
        let time = self.time;
        let junction = self
            .junctions
            .get_mut(junction_id)
            .ok_or(TelemetryError::UnknownEntity {
                kind: EntityKind::Junction,
                id: junction_id.to_string(),
            })?;
        junction.applied = phase;
        junction.applied_log.push((time, phase));
        if via_state {
            junction.state_writes += 1;
        }
        Ok(())
    }
}

impl Telemetry for ScriptedSimulation {
    fn is_live(&self) -> bool {
        self.live
    }

    fn junction_ids(&self) -> TelemetryResult<Vec<String>> {
        self.check_live()?;
        Ok(self.junctions.keys().cloned().collect())
    }

    fn simulation_time(&self) -> TelemetryResult<f64> {
        self.check_live()?;
        Ok(self.time)
    }

    fn vehicle_ids(&self) -> TelemetryResult<Vec<VehicleId>> {
        self.check_live()?;
        Ok(self.vehicles.keys().cloned().collect())
    }

    fn lane_vehicle_ids(&self, lane: &str) -> TelemetryResult<Vec<VehicleId>> {
        self.check_live()?;
        Ok(self
            .vehicles
            .iter()
            .filter(|(_, v)| v.distance > 0.0 && format!("{}_{}", self.road_of(v), v.lane) == lane)
            .map(|(id, _)| id.clone())
            .collect())
    }

    fn vehicle_speed(&self, id: &str) -> TelemetryResult<f64> {
        Ok(self.lookup(id)?.speed)
    }

    fn vehicle_type_id(&self, id: &str) -> TelemetryResult<String> {
        Ok(self.lookup(id)?.type_id.clone())
    }

    fn vehicle_class(&self, id: &str) -> TelemetryResult<String> {
        Ok(self.lookup(id)?.vehicle_class.clone())
    }

    fn vehicle_position(&self, id: &str) -> TelemetryResult<DVec2> {
        let v = self.lookup(id)?;
        let origin = self.junction(&v.junction)?.position;
        Ok(origin + unit_offset(v.direction) * v.distance)
    }

    fn vehicle_road(&self, id: &str) -> TelemetryResult<String> {
        let v = self.lookup(id)?;
        Ok(self.road_of(v))
    }

    fn junction_position(&self, junction_id: &str) -> TelemetryResult<DVec2> {
        Ok(self.junction(junction_id)?.position)
    }

    fn phase(&self, junction_id: &str) -> TelemetryResult<u8> {
        Ok(self.junction(junction_id)?.applied.index())
    }

    fn set_phase(&mut self, junction_id: &str, phase_index: u8) -> TelemetryResult<()> {
        let phase = SignalPhase::from_index(phase_index).ok_or_else(|| {
            TelemetryError::QueryFailed(format!("phase index {phase_index} out of program"))
        })?;
        self.apply(junction_id, phase, false)
    }

    fn set_signal_state(&mut self, junction_id: &str, state: &str) -> TelemetryResult<()> {
        let phase = [
            SignalPhase::NsGreen,
            SignalPhase::NsYellow,
            SignalPhase::AllRed,
            SignalPhase::EwGreen,
            SignalPhase::EwYellow,
        ]
        .into_iter()
        .find(|p| p.state_string() == state)
        .ok_or_else(|| TelemetryError::QueryFailed(format!("unsupported state '{state}'")))?;
        self.apply(junction_id, phase, true)
    }
}

// ---------------------------------------------------------------------------
// Shared handle
// ---------------------------------------------------------------------------

/// Clonable handle so a test can keep scripting the simulation while a Bevy
/// app owns it as its telemetry link.
#[derive(Debug, Clone, Default)]
pub struct SharedSimulation(Arc<Mutex<ScriptedSimulation>>);

impl SharedSimulation {
    pub fn new(sim: ScriptedSimulation) -> Self {
        Self(Arc::new(Mutex::new(sim)))
    }

    pub fn lock(&self) -> MutexGuard<'_, ScriptedSimulation> {
        self.0.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl Telemetry for SharedSimulation {
    fn is_live(&self) -> bool {
        self.lock().is_live()
    }

    fn junction_ids(&self) -> TelemetryResult<Vec<String>> {
        self.lock().junction_ids()
    }

    fn simulation_time(&self) -> TelemetryResult<f64> {
        self.lock().simulation_time()
    }

    fn vehicle_ids(&self) -> TelemetryResult<Vec<VehicleId>> {
        self.lock().vehicle_ids()
    }

    fn lane_vehicle_ids(&self, lane: &str) -> TelemetryResult<Vec<VehicleId>> {
        self.lock().lane_vehicle_ids(lane)
    }

    fn vehicle_speed(&self, id: &str) -> TelemetryResult<f64> {
        self.lock().vehicle_speed(id)
    }

    fn vehicle_type_id(&self, id: &str) -> TelemetryResult<String> {
        self.lock().vehicle_type_id(id)
    }

    fn vehicle_class(&self, id: &str) -> TelemetryResult<String> {
        self.lock().vehicle_class(id)
    }

    fn vehicle_position(&self, id: &str) -> TelemetryResult<DVec2> {
        self.lock().vehicle_position(id)
    }

    fn vehicle_road(&self, id: &str) -> TelemetryResult<String> {
        self.lock().vehicle_road(id)
    }

    fn junction_position(&self, junction_id: &str) -> TelemetryResult<DVec2> {
        self.lock().junction_position(junction_id)
    }

    fn phase(&self, junction_id: &str) -> TelemetryResult<u8> {
        self.lock().phase(junction_id)
    }

    fn set_phase(&mut self, junction_id: &str, phase_index: u8) -> TelemetryResult<()> {
        self.lock().set_phase(junction_id, phase_index)
    }

    fn set_signal_state(&mut self, junction_id: &str, state: &str) -> TelemetryResult<()> {
        self.lock().set_signal_state(junction_id, state)
    }
}
