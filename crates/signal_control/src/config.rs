//! Tunable timing and detection parameters for both controllers.
//!
//! Every field has a default, and `#[serde(default)]` lets a JSON document
//! override only the values it names:
//!
//! ```json
//! { "adaptive": { "min_green": 12.0 }, "priority": { "detection_radius": 250.0 } }
//! ```

use std::fmt;

use bevy::prelude::*;
use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// ConfigError
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq)]
pub enum ConfigError {
    /// The document is not valid JSON for this shape.
    Parse(String),
    /// A value is out of range or inconsistent with another.
    Invalid(String),
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::Parse(msg) => write!(f, "Config parse error: {msg}"),
            ConfigError::Invalid(msg) => write!(f, "Invalid config: {msg}"),
        }
    }
}

impl std::error::Error for ConfigError {}

impl From<serde_json::Error> for ConfigError {
    fn from(e: serde_json::Error) -> Self {
        ConfigError::Parse(e.to_string())
    }
}

// ---------------------------------------------------------------------------
// Adaptive timing
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AdaptiveConfig {
    pub min_green: f64,
    pub max_green: f64,
    /// Seconds of green granted per queued PCU.
    pub alpha: f64,
    pub yellow: f64,
    pub all_red_floor: f64,
    pub intersection_width_m: f64,
    pub clearance_speed: f64,
    pub safety_buffer: f64,
    /// Vehicles slower than this count as queued.
    pub queued_speed: f64,
    /// Queue length (PCU) that saturates the queue term of the pressure score.
    pub queue_normalization_pcu: f64,
    /// Detector length per approach lane, for occupancy.
    pub detector_length_m: f64,
    pub free_flow_speed: f64,
    /// Weighted pressure below this with a nonzero queue falls back to `0.5 * queue`.
    pub legacy_fallback_threshold: f64,
    pub max_waiting_time: f64,
    pub min_queue_to_force: f64,
    pub critical_wait: f64,
    pub critical_green_cap: f64,
    pub switch_threshold_high: f64,
    pub switch_threshold_low: f64,
    pub low_congestion_pressure: f64,
    pub high_congestion_pressure: f64,
    pub min_pressure_to_switch: f64,
    pub max_cycle_time: f64,
    pub history_capacity: usize,
    pub debt_base_fraction: f64,
    pub debt_severity_fraction: f64,
    pub debt_bonus_severity: f64,
    pub debt_bonus_seconds: f64,
    pub debt_cycle_cap: f64,
    pub debt_residual: f64,
    pub emergency_min_green: f64,
    pub emergency_max_green: f64,
}

impl Default for AdaptiveConfig {
    fn default() -> Self {
        Self {
            min_green: 10.0,
            max_green: 120.0,
            alpha: 0.5,
            yellow: 3.0,
            all_red_floor: 2.0,
            intersection_width_m: 20.0,
            clearance_speed: 10.0,
            safety_buffer: 1.5,
            queued_speed: 2.0,
            queue_normalization_pcu: 20.0,
            detector_length_m: 100.0,
            free_flow_speed: 13.89,
            legacy_fallback_threshold: 0.05,
            max_waiting_time: 90.0,
            min_queue_to_force: 1.0,
            critical_wait: 75.0,
            critical_green_cap: 30.0,
            switch_threshold_high: 1.5,
            switch_threshold_low: 1.1,
            low_congestion_pressure: 0.5,
            high_congestion_pressure: 3.0,
            min_pressure_to_switch: 0.15,
            max_cycle_time: 180.0,
            history_capacity: 10,
            debt_base_fraction: 0.3,
            debt_severity_fraction: 0.5,
            debt_bonus_severity: 85.0,
            debt_bonus_seconds: 2.0,
            debt_cycle_cap: 15.0,
            debt_residual: 0.5,
            emergency_min_green: 12.0,
            emergency_max_green: 90.0,
        }
    }
}

impl AdaptiveConfig {
    /// All-red clearance: `width / speed + buffer`, never below the floor.
    pub fn all_red_duration(&self) -> f64 {
        let clearance = self.intersection_width_m / self.clearance_speed;
        (clearance + self.safety_buffer).max(self.all_red_floor)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.min_green <= 0.0 || self.max_green < self.min_green {
            return Err(ConfigError::Invalid(format!(
                "green envelope [{}, {}] is empty",
                self.min_green, self.max_green
            )));
        }
        if self.emergency_min_green <= 0.0 || self.emergency_max_green < self.emergency_min_green {
            return Err(ConfigError::Invalid(format!(
                "emergency green envelope [{}, {}] is empty",
                self.emergency_min_green, self.emergency_max_green
            )));
        }
        if self.critical_green_cap < self.min_green.max(self.emergency_min_green) {
            return Err(ConfigError::Invalid(
                "critical_green_cap must not be below min green".into(),
            ));
        }
        if self.yellow <= 0.0 || self.clearance_speed <= 0.0 {
            return Err(ConfigError::Invalid(
                "yellow and clearance_speed must be positive".into(),
            ));
        }
        if self.queue_normalization_pcu <= 0.0
            || self.detector_length_m <= 0.0
            || self.free_flow_speed <= 0.0
        {
            return Err(ConfigError::Invalid(
                "pressure normalizers must be positive".into(),
            ));
        }
        if self.high_congestion_pressure <= self.low_congestion_pressure {
            return Err(ConfigError::Invalid(
                "high_congestion_pressure must exceed low_congestion_pressure".into(),
            ));
        }
        if self.switch_threshold_low > self.switch_threshold_high {
            return Err(ConfigError::Invalid(
                "switch threshold must fall as congestion rises".into(),
            ));
        }
        if self.history_capacity == 0 {
            return Err(ConfigError::Invalid("history_capacity must be >= 1".into()));
        }
        if self.debt_cycle_cap < 0.0 || self.debt_residual < 0.0 {
            return Err(ConfigError::Invalid(
                "debt repayment limits must be non-negative".into(),
            ));
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Priority preemption
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PriorityConfig {
    pub detection_radius: f64,
    /// Confirmed candidates activate preemption once their ETA drops to this.
    pub activation_eta: f64,
    /// Candidates with a larger ETA are ignored by arbitration.
    pub eligibility_eta: f64,
    pub confirmation_window: f64,
    pub confirmation_count: usize,
    pub preemption_min_green: f64,
    /// Minimum green the running phase keeps before it may be cut.
    pub safe_min_green: f64,
    pub clear_distance: f64,
    pub hold_near_distance: f64,
    pub stuck_speed: f64,
    pub stuck_grace: f64,
    pub unstuck_speed: f64,
    pub hold_timeout: f64,
    pub max_preemptions_per_window: usize,
    pub rate_window: f64,
    pub cooldown: f64,
    pub eta_tie_tolerance: f64,
    pub compensation_base: f64,
    pub emergency_compensation_base: f64,
    pub critical_compensation_bonus: f64,
    pub warning_compensation_bonus: f64,
    pub emergency_mode_duration: f64,
    pub clearance_excellent: f64,
    pub clearance_acceptable: f64,
    pub journal_capacity: usize,
}

impl Default for PriorityConfig {
    fn default() -> Self {
        Self {
            detection_radius: 200.0,
            activation_eta: 12.0,
            eligibility_eta: 30.0,
            confirmation_window: 1.0,
            confirmation_count: 2,
            preemption_min_green: 8.0,
            safe_min_green: 4.0,
            clear_distance: 50.0,
            hold_near_distance: 30.0,
            stuck_speed: 2.0,
            stuck_grace: 15.0,
            unstuck_speed: 5.0,
            hold_timeout: 30.0,
            max_preemptions_per_window: 2,
            rate_window: 60.0,
            cooldown: 10.0,
            eta_tie_tolerance: 2.0,
            compensation_base: 0.6,
            emergency_compensation_base: 0.4,
            critical_compensation_bonus: 0.3,
            warning_compensation_bonus: 0.1,
            emergency_mode_duration: 120.0,
            clearance_excellent: 15.0,
            clearance_acceptable: 25.0,
            journal_capacity: 100,
        }
    }
}

impl PriorityConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.detection_radius <= 0.0 {
            return Err(ConfigError::Invalid(
                "detection_radius must be positive".into(),
            ));
        }
        if self.activation_eta > self.eligibility_eta {
            return Err(ConfigError::Invalid(
                "activation_eta must not exceed eligibility_eta".into(),
            ));
        }
        if self.confirmation_count == 0 || self.confirmation_window < 0.0 {
            return Err(ConfigError::Invalid(
                "confirmation needs at least one detection and a non-negative window".into(),
            ));
        }
        if self.max_preemptions_per_window == 0 || self.rate_window <= 0.0 {
            return Err(ConfigError::Invalid(
                "rate limit needs a positive window and count".into(),
            ));
        }
        if self.clearance_acceptable < self.clearance_excellent {
            return Err(ConfigError::Invalid(
                "clearance bands are inverted".into(),
            ));
        }
        if self.unstuck_speed < self.stuck_speed {
            return Err(ConfigError::Invalid(
                "unstuck_speed must not be below stuck_speed".into(),
            ));
        }
        if self.journal_capacity == 0 {
            return Err(ConfigError::Invalid("journal_capacity must be >= 1".into()));
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// SignalControlConfig
// ---------------------------------------------------------------------------

/// Complete controller configuration, shared by every junction of a network.
#[derive(Resource, Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SignalControlConfig {
    pub adaptive: AdaptiveConfig,
    pub priority: PriorityConfig,
}

impl SignalControlConfig {
    /// Parses a (possibly partial) JSON document and validates the result.
    pub fn from_json_str(json: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.adaptive.validate()?;
        self.priority.validate()
    }
}
