//! Embedding the controllers from outside the crate: configuration, network
//! lifecycle and the Bevy plugin against a host-provided telemetry link.

use bevy::math::DVec2;
use bevy::prelude::*;

use signal_control::{
    ConfigError, ControlError, JunctionLayout, JunctionLifecycle, SignalControlConfig,
    SignalControlEvent, SignalControlPlugin, SignalNetwork, SignalNetworkSummary, SignalPhase, Telemetry,
    TelemetryError, TelemetryLink, TelemetryResult, VehicleId,
};

/// A simulator with signalized junctions and no traffic.
struct EmptyRoads {
    live: bool,
    junctions: Vec<String>,
    time: f64,
    phases: Vec<(String, u8)>,
}

impl EmptyRoads {
    fn new(junctions: &[&str]) -> Self {
        Self {
            live: true,
            junctions: junctions.iter().map(|j| j.to_string()).collect(),
            time: 0.0,
            phases: Vec::new(),
        }
    }

    fn check_junction(&self, junction_id: &str) -> TelemetryResult<()> {
        if self.junctions.iter().any(|j| j == junction_id) {
            Ok(())
        } else {
            Err(TelemetryError::QueryFailed(format!("no junction {junction_id}")))
        }
    }
}

impl Telemetry for EmptyRoads {
    fn is_live(&self) -> bool {
        self.live
    }

    fn junction_ids(&self) -> TelemetryResult<Vec<String>> {
        Ok(self.junctions.clone())
    }

    fn simulation_time(&self) -> TelemetryResult<f64> {
        Ok(self.time)
    }

    fn vehicle_ids(&self) -> TelemetryResult<Vec<VehicleId>> {
        Ok(Vec::new())
    }

    fn lane_vehicle_ids(&self, _lane: &str) -> TelemetryResult<Vec<VehicleId>> {
        Ok(Vec::new())
    }

    fn vehicle_speed(&self, id: &str) -> TelemetryResult<f64> {
        Err(TelemetryError::unknown_vehicle(id))
    }

    fn vehicle_type_id(&self, id: &str) -> TelemetryResult<String> {
        Err(TelemetryError::unknown_vehicle(id))
    }

    fn vehicle_class(&self, id: &str) -> TelemetryResult<String> {
        Err(TelemetryError::unknown_vehicle(id))
    }

    fn vehicle_position(&self, id: &str) -> TelemetryResult<DVec2> {
        Err(TelemetryError::unknown_vehicle(id))
    }

    fn vehicle_road(&self, id: &str) -> TelemetryResult<String> {
        Err(TelemetryError::unknown_vehicle(id))
    }

    fn junction_position(&self, junction_id: &str) -> TelemetryResult<DVec2> {
        self.check_junction(junction_id)?;
        Ok(DVec2::ZERO)
    }

    fn phase(&self, junction_id: &str) -> TelemetryResult<u8> {
        self.check_junction(junction_id)?;
        Ok(self
            .phases
            .iter()
            .rev()
            .find(|(j, _)| j == junction_id)
            .map_or(0, |(_, p)| *p))
    }

    fn set_phase(&mut self, junction_id: &str, phase_index: u8) -> TelemetryResult<()> {
        self.check_junction(junction_id)?;
        self.phases.push((junction_id.to_string(), phase_index));
        Ok(())
    }

    fn set_signal_state(&mut self, junction_id: &str, _state: &str) -> TelemetryResult<()> {
        self.check_junction(junction_id)
    }
}

fn layout(junction_id: &str) -> JunctionLayout {
    JunctionLayout::four_arm(junction_id, ["n_in", "s_in", "e_in", "w_in"])
}

// ============================================================================
// Configuration
// ============================================================================

#[test]
fn test_partial_config_fills_defaults() {
    let config = SignalControlConfig::from_json_str(
        r#"{ "adaptive": { "min_green": 12.0 }, "priority": { "cooldown": 20.0 } }"#,
    )
    .expect("valid config");
    assert_eq!(config.adaptive.min_green, 12.0);
    assert_eq!(config.adaptive.max_green, 120.0);
    assert_eq!(config.priority.cooldown, 20.0);
    assert_eq!(config.priority.detection_radius, 200.0);
}

#[test]
fn test_inconsistent_config_is_rejected() {
    let err = SignalControlConfig::from_json_str(
        r#"{ "adaptive": { "min_green": 50.0, "max_green": 40.0 } }"#,
    )
    .unwrap_err();
    assert!(matches!(err, ConfigError::Invalid(_)), "{err}");

    let err = SignalControlConfig::from_json_str("{ not json").unwrap_err();
    assert!(matches!(err, ConfigError::Parse(_)));
}

// ============================================================================
// Network lifecycle
// ============================================================================

#[test]
fn test_network_waits_for_live_simulator() {
    let mut link = EmptyRoads::new(&["J1"]);
    link.live = false;
    let mut network = SignalNetwork::with_junctions(SignalControlConfig::default(), [layout("J1")], true);

    let failures = network.start_pending(&mut link);
    assert_eq!(failures, vec![("J1".to_string(), ControlError::ControllerNotReady)]);
    assert_eq!(network.junction("J1").map(|j| j.lifecycle()), Some(&JunctionLifecycle::Pending));

    link.live = true;
    assert!(network.start_pending(&mut link).is_empty());
    assert!(network.junction("J1").is_some_and(|j| j.is_running()));
    assert_eq!(link.phase("J1"), Ok(SignalPhase::NsGreen.index()));
}

#[test]
fn test_empty_roads_hold_green_until_max_green() {
    let mut link = EmptyRoads::new(&["J1"]);
    let mut network = SignalNetwork::with_junctions(SignalControlConfig::default(), [layout("J1")], false);
    network.start_pending(&mut link);

    for _ in 0..200 {
        link.time += 0.5;
        assert!(network.step(&mut link).is_empty());
    }
    assert_eq!(link.phases.len(), 1);

    let mut events = Vec::new();
    for _ in 0..50 {
        link.time += 0.5;
        events.extend(network.step(&mut link));
    }
    let first = events.first().expect("max green forces a change");
    assert!((first.time() - 120.0).abs() < 1e-9);
    assert!(matches!(
        first,
        SignalControlEvent::PhaseChanged {
            from: SignalPhase::NsGreen,
            to: SignalPhase::NsYellow,
            ..
        }
    ));
    // Yellow ends at t=123; all-red runs past t=125.
    assert_eq!(link.phase("J1"), Ok(SignalPhase::AllRed.index()));
    assert_eq!(network.summary().ticks, 250);
    assert_eq!(network.summary().total_debt, 0.0);
}

// ============================================================================
// Plugin
// ============================================================================

#[test]
fn test_plugin_drives_inserted_network() {
    let mut app = App::new();
    app.add_plugins(MinimalPlugins);
    app.add_plugins(SignalControlPlugin);
    app.insert_resource(SignalNetwork::with_junctions(
        SignalControlConfig::default(),
        [layout("J1"), layout("missing")],
        true,
    ));
    app.insert_resource(TelemetryLink::new(EmptyRoads::new(&["J1"])));
    app.finish();
    app.cleanup();

    for _ in 0..3 {
        app.world_mut().run_schedule(FixedUpdate);
    }

    let summary = app.world().resource::<SignalNetworkSummary>();
    assert_eq!(summary.ticks, 3);
    assert_eq!(summary.running, 1);
    let missing = summary
        .junctions
        .iter()
        .find(|j| j.junction_id == "missing")
        .expect("missing junction is reported");
    assert!(matches!(missing.lifecycle, JunctionLifecycle::Failed(_)));
}
