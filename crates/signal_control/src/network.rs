//! The Runner-facing surface: every junction of the network, stepped in a
//! fixed order each tick.

use bevy::prelude::*;
use serde::Serialize;

use crate::config::SignalControlConfig;
use crate::control_error::ControlError;
use crate::direction::JunctionLayout;
use crate::events::SignalControlEvent;
use crate::junction::{JunctionControl, JunctionLifecycle, JunctionStatus};
use crate::telemetry::Telemetry;

/// The simulator link the network reads from and writes to.
#[derive(Resource)]
pub struct TelemetryLink(pub Box<dyn Telemetry + Send + Sync>);

impl TelemetryLink {
    pub fn new(telemetry: impl Telemetry + Send + Sync + 'static) -> Self {
        Self(Box::new(telemetry))
    }
}

/// Every controlled junction plus the network-wide emergency mode.
#[derive(Resource, Default)]
pub struct SignalNetwork {
    config: SignalControlConfig,
    junctions: Vec<JunctionControl>,
    /// End of the network-wide emergency window, if one is active.
    emergency_until: Option<f64>,
    ticks: u64,
}

impl SignalNetwork {
    pub fn new(config: SignalControlConfig) -> Self {
        Self {
            config,
            ..Default::default()
        }
    }

    /// One network with the same controller setup at every junction.
    pub fn with_junctions(
        config: SignalControlConfig,
        layouts: impl IntoIterator<Item = JunctionLayout>,
        with_priority: bool,
    ) -> Self {
        let mut network = Self::new(config);
        for layout in layouts {
            network.add_junction(layout, with_priority);
        }
        network
    }

    /// Adds a junction. It starts on the next tick the simulator is live.
    pub fn add_junction(&mut self, layout: JunctionLayout, with_priority: bool) {
        self.junctions
            .push(JunctionControl::new(layout, &self.config, with_priority));
    }

    pub fn config(&self) -> &SignalControlConfig {
        &self.config
    }

    /// Tries to start every pending junction. Returns the failures; junctions
    /// that failed because the simulator is not ready stay pending.
    pub fn start_pending(&mut self, telemetry: &mut dyn Telemetry) -> Vec<(String, ControlError)> {
        let mut failures = Vec::new();
        for junction in &mut self.junctions {
            if *junction.lifecycle() != JunctionLifecycle::Pending {
                continue;
            }
            if let Err(e) = junction.start(telemetry) {
                match e {
                    ControlError::ControllerNotReady => {
                        debug!("Junction {} waiting for the simulator", junction.junction_id());
                    }
                    _ => error!("Junction {} failed to start: {}", junction.junction_id(), e),
                }
                failures.push((junction.junction_id().to_string(), e));
            }
        }
        failures
    }

    /// Steps every running junction in insertion order, then applies
    /// network-wide emergency mode. Returns this tick's events.
    pub fn step(&mut self, telemetry: &mut dyn Telemetry) -> Vec<SignalControlEvent> {
        let mut events = Vec::new();
        for junction in self.junctions.iter_mut().filter(|j| j.is_running()) {
            junction.step(telemetry);
            events.extend(junction.drain_events());
        }
        self.ticks += 1;

        let now = match telemetry.simulation_time() {
            Ok(t) => t,
            Err(e) => {
                warn!("Signal network: clock unreadable, emergency mode unchanged: {}", e);
                return events;
            }
        };
        let activated = events.iter().any(|e| {
            matches!(e, SignalControlEvent::EmergencyModeChanged { active: true, .. })
        });
        if activated {
            self.broadcast_emergency(now, &mut events);
        } else if self.emergency_until.is_some_and(|until| now >= until) {
            self.emergency_until = None;
            info!("Signal network: emergency mode over");
            for junction in self.junctions.iter_mut().filter(|j| j.priority().is_none()) {
                junction.restore_normal_envelope();
            }
        }
        events
    }

    /// Spreads a junction's emergency activation to the whole network.
    fn broadcast_emergency(&mut self, now: f64, events: &mut Vec<SignalControlEvent>) {
        let until = now + self.config.priority.emergency_mode_duration;
        self.emergency_until = Some(self.emergency_until.map_or(until, |u| u.max(until)));
        info!("Signal network: emergency mode until t={:.1}", until);
        for junction in self.junctions.iter_mut().filter(|j| j.is_running()) {
            junction.enter_emergency_mode(now, until);
            events.extend(junction.drain_events());
        }
    }

    pub fn stop_all(&mut self) {
        for junction in &mut self.junctions {
            junction.stop();
        }
    }

    pub fn junction(&self, junction_id: &str) -> Option<&JunctionControl> {
        self.junctions.iter().find(|j| j.junction_id() == junction_id)
    }

    pub fn junctions(&self) -> impl Iterator<Item = &JunctionControl> {
        self.junctions.iter()
    }

    pub fn len(&self) -> usize {
        self.junctions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.junctions.is_empty()
    }

    pub fn emergency_mode_active(&self) -> bool {
        self.emergency_until.is_some()
    }

    pub fn ticks(&self) -> u64 {
        self.ticks
    }

    pub fn summary(&self) -> SignalNetworkSummary {
        let junctions: Vec<JunctionStatus> = self.junctions.iter().map(|j| j.status()).collect();
        SignalNetworkSummary {
            ticks: self.ticks,
            running: junctions
                .iter()
                .filter(|j| j.lifecycle == JunctionLifecycle::Running)
                .count(),
            preempting: junctions
                .iter()
                .filter(|j| j.adaptive.suspended)
                .count(),
            total_debt: junctions
                .iter()
                .map(|j| j.adaptive.debt.values().sum::<f64>())
                .sum(),
            emergency_mode: self.emergency_mode_active(),
            junctions,
        }
    }
}

/// Polled snapshot of the whole network, refreshed every tick.
#[derive(Resource, Debug, Clone, Default, PartialEq, Serialize)]
pub struct SignalNetworkSummary {
    pub ticks: u64,
    pub running: usize,
    /// Junctions whose adaptive controller is suspended by a preemption.
    pub preempting: usize,
    /// Outstanding green debt across the network, in seconds.
    pub total_debt: f64,
    pub emergency_mode: bool,
    pub junctions: Vec<JunctionStatus>,
}

impl SignalNetworkSummary {
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }
}
