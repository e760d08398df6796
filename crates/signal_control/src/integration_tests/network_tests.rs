//! Startup lifecycle and multi-junction behavior of `SignalNetwork`.

use bevy::math::DVec2;

use crate::config::SignalControlConfig;
use crate::control_error::ControlError;
use crate::direction::{Direction, SignalPhase};
use crate::junction::JunctionLifecycle;
use crate::network::SignalNetwork;
use crate::priority_control::PreemptionStateKind;
use crate::test_harness::{named_layout, standard_layout, ScriptedSimulation, TestNetwork};

fn two_junctions() -> ScriptedSimulation {
    ScriptedSimulation::new()
        .with_junction(named_layout("A"), DVec2::ZERO)
        .with_junction(named_layout("B"), DVec2::new(500.0, 0.0))
}

#[test]
fn test_junctions_stay_pending_until_simulator_is_live() {
    let mut sim = ScriptedSimulation::standard();
    sim.set_live(false);
    let mut net = TestNetwork::with_priority(sim);

    net.tick(4);
    assert_eq!(net.junction("J1").lifecycle(), &JunctionLifecycle::Pending);
    assert!(!net.junction("J1").adaptive().is_running());
    assert!(net.sim().applied_log("J1").is_empty());

    net.sim().set_live(true);
    net.tick(1);
    assert!(net.junction("J1").is_running());
    assert!(net.junction("J1").priority().is_some_and(|p| p.is_running()));
}

#[test]
fn test_unknown_junction_fails_without_blocking_others() {
    let sim = ScriptedSimulation::standard();
    let network = SignalNetwork::with_junctions(
        SignalControlConfig::default(),
        [standard_layout(), named_layout("ghost")],
        true,
    );
    let mut net = TestNetwork::from_network(sim, network);
    net.tick(2);

    assert!(net.junction("J1").is_running());
    assert!(matches!(
        net.junction("ghost").lifecycle(),
        JunctionLifecycle::Failed(_)
    ));
    assert_eq!(net.summary().running, 1);
    assert_eq!(net.network().len(), 2);
}

#[test]
fn test_start_pending_reports_failures() {
    let mut sim = ScriptedSimulation::standard();
    let mut network = SignalNetwork::new(SignalControlConfig::default());
    network.add_junction(standard_layout(), false);
    network.add_junction(named_layout("ghost"), false);

    let failures = network.start_pending(&mut sim);
    assert_eq!(
        failures,
        vec![("ghost".to_string(), ControlError::UnknownJunction("ghost".into()))]
    );
    // Failed junctions are not retried.
    assert!(network.start_pending(&mut sim).is_empty());
}

#[test]
fn test_junctions_are_controlled_independently() {
    let mut sim = two_junctions();
    sim.queue_cars("B", Direction::West, 8);
    let mut net = TestNetwork::adaptive(sim);
    net.run_for(20.0);

    let sim = net.sim();
    assert_eq!(sim.applied_phase("A"), Some(SignalPhase::NsGreen));
    assert_eq!(sim.applied_phase("B"), Some(SignalPhase::EwGreen));
    assert_eq!(sim.applied_log("A").len(), 1);
}

#[test]
fn test_preemption_is_local_to_its_junction() {
    let mut sim = two_junctions();
    sim.autodrive = true;
    sim.add_ambulance("amb", "A", Direction::East, 100.0, 10.0);
    let mut net = TestNetwork::with_priority(sim);

    assert!(net.tick_until(40, |n| {
        n.junction("A")
            .priority()
            .is_some_and(|p| p.state_kind() == PreemptionStateKind::PreemptionGreen)
    }));
    assert_eq!(net.sim().applied_phase("A"), Some(SignalPhase::EwGreen));
    assert!(net.junction("A").adaptive().is_suspended());

    let b = net.junction("B");
    assert!(!b.adaptive().is_suspended());
    assert_eq!(
        b.priority().map(|p| p.state_kind()),
        Some(PreemptionStateKind::Normal)
    );
    assert_eq!(net.summary().preempting, 1);
}

#[test]
fn test_stop_all_freezes_signals() {
    let mut sim = ScriptedSimulation::standard();
    sim.queue_cars("J1", Direction::East, 6);
    let mut net = TestNetwork::adaptive(sim);
    net.tick(2);

    net.world_mut().resource_mut::<SignalNetwork>().stop_all();
    net.run_for(30.0);
    assert_eq!(net.junction("J1").lifecycle(), &JunctionLifecycle::Stopped);
    assert_eq!(net.sim().applied_log("J1").len(), 1);
    assert_eq!(net.summary().running, 0);
}
