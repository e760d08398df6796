//! Telemetry adapter consumed by the controllers.
//!
//! The simulator link is an external collaborator. It exposes per-lane vehicle
//! lists, per-vehicle kinematics and class, junction geometry, phase get/set and
//! the simulation clock. Every call is synchronous and authoritative for the
//! current tick.
//!
//! A vehicle that has just left the network answers with
//! [`TelemetryError::UnknownEntity`]. Callers never special-case that error:
//! [`observe_vehicle`] folds it into `Ok(None)` ("vehicle departed").

use std::fmt;

use bevy::math::DVec2;
use serde::{Deserialize, Serialize};

/// Simulator-assigned vehicle identifier.
pub type VehicleId = String;

pub type TelemetryResult<T> = Result<T, TelemetryError>;

/// Kind of simulator entity a query referred to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EntityKind {
    Vehicle,
    Lane,
    Junction,
}

impl EntityKind {
    pub fn label(self) -> &'static str {
        match self {
            Self::Vehicle => "vehicle",
            Self::Lane => "lane",
            Self::Junction => "junction",
        }
    }
}

/// Errors surfaced by the simulator link.
#[derive(Debug, Clone, PartialEq)]
pub enum TelemetryError {
    /// The simulator session is not running.
    NotConnected,
    /// The entity does not exist (for vehicles: it has departed).
    UnknownEntity { kind: EntityKind, id: String },
    /// Any other failed query.
    QueryFailed(String),
}

impl TelemetryError {
    pub fn unknown_vehicle(id: &str) -> Self {
        Self::UnknownEntity {
            kind: EntityKind::Vehicle,
            id: id.to_string(),
        }
    }

    /// True for the "entity vanished" case, which is a normal outcome.
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::UnknownEntity { .. })
    }
}

impl fmt::Display for TelemetryError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NotConnected => write!(f, "simulator link is not connected"),
            Self::UnknownEntity { kind, id } => write!(f, "unknown {} '{id}'", kind.label()),
            Self::QueryFailed(msg) => write!(f, "telemetry query failed: {msg}"),
        }
    }
}

impl std::error::Error for TelemetryError {}

/// Read/write surface of the simulator link.
pub trait Telemetry {
    /// Whether the simulator session is loaded and answering queries.
    fn is_live(&self) -> bool;

    /// Identifiers of every signalized junction.
    fn junction_ids(&self) -> TelemetryResult<Vec<String>>;

    /// Simulation clock in seconds.
    fn simulation_time(&self) -> TelemetryResult<f64>;

    /// Every vehicle currently in the network.
    fn vehicle_ids(&self) -> TelemetryResult<Vec<VehicleId>>;

    fn lane_vehicle_ids(&self, lane: &str) -> TelemetryResult<Vec<VehicleId>>;

    /// Current speed in m/s.
    fn vehicle_speed(&self, id: &str) -> TelemetryResult<f64>;

    /// Free-form vehicle type identifier (e.g. `"ambulance"`, `"bus_city"`).
    fn vehicle_type_id(&self, id: &str) -> TelemetryResult<String>;

    /// Simulator vehicle class (e.g. `"emergency"`, `"passenger"`).
    fn vehicle_class(&self, id: &str) -> TelemetryResult<String>;

    fn vehicle_position(&self, id: &str) -> TelemetryResult<DVec2>;

    /// Identifier of the road (edge) the vehicle is on.
    fn vehicle_road(&self, id: &str) -> TelemetryResult<String>;

    fn junction_position(&self, junction_id: &str) -> TelemetryResult<DVec2>;

    /// Index of the currently applied signal program phase.
    fn phase(&self, junction_id: &str) -> TelemetryResult<u8>;

    fn set_phase(&mut self, junction_id: &str, phase_index: u8) -> TelemetryResult<()>;

    /// Overrides the signal heads with an explicit state string.
    fn set_signal_state(&mut self, junction_id: &str, state: &str) -> TelemetryResult<()>;
}

// =============================================================================
// Vehicle classification
// =============================================================================

/// Vehicle classes with distinct passenger-car-unit weights.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum VehicleClass {
    Car,
    Motorcycle,
    Bus,
    Truck,
    Emergency,
}

impl VehicleClass {
    pub const ALL: [VehicleClass; 5] = [
        VehicleClass::Car,
        VehicleClass::Motorcycle,
        VehicleClass::Bus,
        VehicleClass::Truck,
        VehicleClass::Emergency,
    ];

    /// Classifies a simulator type id by keyword; unknown types count as cars.
    pub fn from_type_id(type_id: &str) -> Self {
        let lower = type_id.to_lowercase();
        if lower.contains("motorcycle") || lower.contains("bike") {
            Self::Motorcycle
        } else if lower.contains("bus") {
            Self::Bus
        } else if lower.contains("truck") {
            Self::Truck
        } else if lower.contains("emergency") {
            Self::Emergency
        } else {
            Self::Car
        }
    }

    /// Passenger car unit weight.
    pub fn pcu(self) -> f64 {
        match self {
            Self::Car => 1.0,
            Self::Motorcycle => 0.3,
            Self::Bus => 1.5,
            Self::Truck => 1.5,
            Self::Emergency => 1.0,
        }
    }

    /// Typical body length in metres, used for occupancy estimation.
    pub fn length_m(self) -> f64 {
        match self {
            Self::Car => 5.0,
            Self::Motorcycle => 2.0,
            Self::Bus => 12.0,
            Self::Truck => 10.0,
            Self::Emergency => 6.5,
        }
    }
}

/// Keywords marking a priority-class vehicle in either its type id or class.
pub const PRIORITY_KEYWORDS: [&str; 5] = ["priority", "ambulance", "emergency", "fire", "police"];

pub fn is_priority_class(type_id: &str, vehicle_class: &str) -> bool {
    let type_id = type_id.to_lowercase();
    let vehicle_class = vehicle_class.to_lowercase();
    PRIORITY_KEYWORDS
        .iter()
        .any(|kw| type_id.contains(kw) || vehicle_class.contains(kw))
}

/// Everything the controllers read about one vehicle in one tick.
#[derive(Debug, Clone, PartialEq)]
pub struct VehicleSnapshot {
    pub id: VehicleId,
    pub type_id: String,
    pub class: VehicleClass,
    pub priority: bool,
    pub speed: f64,
    pub position: DVec2,
    pub road: String,
}

/// Reads one vehicle's snapshot. A departed vehicle yields `Ok(None)`.
pub fn observe_vehicle(
    telemetry: &dyn Telemetry,
    id: &str,
) -> TelemetryResult<Option<VehicleSnapshot>> {
    let lookup = || -> TelemetryResult<VehicleSnapshot> {
        let type_id = telemetry.vehicle_type_id(id)?;
        let vehicle_class = telemetry.vehicle_class(id)?;
        Ok(VehicleSnapshot {
            id: id.to_string(),
            class: VehicleClass::from_type_id(&type_id),
            priority: is_priority_class(&type_id, &vehicle_class),
            type_id,
            speed: telemetry.vehicle_speed(id)?,
            position: telemetry.vehicle_position(id)?,
            road: telemetry.vehicle_road(id)?,
        })
    };
    match lookup() {
        Ok(snapshot) => Ok(Some(snapshot)),
        Err(e) if e.is_not_found() => Ok(None),
        Err(e) => Err(e),
    }
}
