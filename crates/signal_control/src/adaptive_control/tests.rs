use crate::config::AdaptiveConfig;
use crate::control_error::ControlError;
use crate::direction::{Direction, SignalPhase};
use crate::events::SignalControlEvent;
use crate::test_harness::{standard_layout, ScriptedSimulation};
use crate::telemetry::VehicleClass;

use super::*;

const DT: f64 = 0.5;
const EPS: f64 = 1e-9;

fn started(sim: &mut ScriptedSimulation, config: AdaptiveConfig) -> AdaptiveController {
    let mut controller = AdaptiveController::new(standard_layout(), config);
    controller
        .start(sim)
        .expect("reference junction should start");
    controller
}

/// Advances the simulation and steps the controller once per tick.
fn run(controller: &mut AdaptiveController, sim: &mut ScriptedSimulation, seconds: f64) {
    let ticks = (seconds / DT).round() as u32;
    for _ in 0..ticks {
        sim.advance(DT);
        controller.step(sim);
    }
}

fn car(speed: f64) -> VehicleReading {
    VehicleReading {
        class: VehicleClass::Car,
        speed,
    }
}

// ====================================================================
// Pressure model
// ====================================================================

#[test]
fn test_empty_approach_has_zero_pressure() {
    let config = AdaptiveConfig::default();
    let sample = compute_pressure(&[], 3, &config);
    assert_eq!(sample.vehicle_count, 0);
    assert_eq!(sample.queue_pcu, 0.0);
    assert!(sample.pressure.abs() < EPS);
    assert!((sample.mean_speed - config.free_flow_speed).abs() < EPS);
}

#[test]
fn test_weighted_pressure_for_stopped_queue() {
    let config = AdaptiveConfig::default();
    let readings = vec![car(0.0); 6];
    let sample = compute_pressure(&readings, 3, &config);
    // 0.5 * 6/20 + 0.3 * 30/300 + 0.2 * 1
    assert!((sample.queue_pcu - 6.0).abs() < EPS);
    assert!((sample.occupancy - 0.1).abs() < EPS);
    assert!((sample.pressure - 0.38).abs() < EPS, "got {}", sample.pressure);
}

#[test]
fn test_queue_term_saturates() {
    let config = AdaptiveConfig::default();
    let big = compute_pressure(&vec![car(0.0); 60], 3, &config);
    let huge = compute_pressure(&vec![car(0.0); 600], 3, &config);
    assert!((big.pressure - 1.0).abs() < EPS);
    assert!((huge.pressure - big.pressure).abs() < EPS);
}

#[test]
fn test_legacy_fallback_when_weighted_score_is_implausible() {
    let config = AdaptiveConfig::default();
    let mut readings = vec![car(1.0)];
    readings.extend(std::iter::repeat_n(
        VehicleReading {
            class: VehicleClass::Motorcycle,
            speed: 20.0,
        },
        9,
    ));
    let sample = compute_pressure(&readings, 3, &config);
    assert!((sample.queue_pcu - 1.0).abs() < EPS);
    assert!((sample.pressure - 0.5).abs() < EPS, "got {}", sample.pressure);
}

#[test]
fn test_heavier_vehicles_count_more() {
    let config = AdaptiveConfig::default();
    let cars = compute_pressure(&vec![car(0.0); 4], 3, &config);
    let buses = compute_pressure(
        &vec![
            VehicleReading {
                class: VehicleClass::Bus,
                speed: 0.0,
            };
            4
        ],
        3,
        &config,
    );
    assert!((buses.queue_pcu - 6.0).abs() < EPS);
    assert!(buses.pressure > cars.pressure);
}

// ====================================================================
// Startup
// ====================================================================

#[test]
fn test_start_requires_live_simulation() {
    let mut sim = ScriptedSimulation::standard();
    sim.set_live(false);
    let mut controller = AdaptiveController::new(standard_layout(), AdaptiveConfig::default());
    assert_eq!(controller.start(&mut sim), Err(ControlError::ControllerNotReady));
    assert!(!controller.is_running());
}

#[test]
fn test_start_rejects_unknown_junction() {
    let mut sim = ScriptedSimulation::standard();
    let mut layout = standard_layout();
    layout.junction_id = "J9".into();
    let mut controller = AdaptiveController::new(layout, AdaptiveConfig::default());
    assert_eq!(
        controller.start(&mut sim),
        Err(ControlError::UnknownJunction("J9".into()))
    );
    assert!(!controller.is_running());
}

#[test]
fn test_start_applies_ns_green() {
    let mut sim = ScriptedSimulation::standard();
    let controller = started(&mut sim, AdaptiveConfig::default());
    assert_eq!(controller.current_phase(), SignalPhase::NsGreen);
    assert_eq!(sim.applied_log("J1"), &[(0.0, SignalPhase::NsGreen)]);
}

#[test]
fn test_stopped_controller_ignores_steps() {
    let mut sim = ScriptedSimulation::standard();
    sim.queue_cars("J1", Direction::East, 6);
    let mut controller = started(&mut sim, AdaptiveConfig::default());
    controller.stop();
    run(&mut controller, &mut sim, 60.0);
    assert_eq!(controller.current_phase(), SignalPhase::NsGreen);
    assert_eq!(sim.applied_log("J1").len(), 1);
}

// ====================================================================
// Phase cycle
// ====================================================================

#[test]
fn test_pressure_switch_runs_full_clearance_sequence() {
    let mut sim = ScriptedSimulation::standard();
    sim.queue_cars("J1", Direction::East, 6);
    let mut controller = started(&mut sim, AdaptiveConfig::default());

    run(&mut controller, &mut sim, 9.5);
    assert_eq!(controller.current_phase(), SignalPhase::NsGreen);

    run(&mut controller, &mut sim, 0.5);
    assert_eq!(controller.current_phase(), SignalPhase::NsYellow);
    assert_eq!(
        controller.get_status().last_switch_reason,
        Some(SwitchReason::PressureImbalance)
    );

    run(&mut controller, &mut sim, 7.0);
    assert_eq!(
        sim.applied_log("J1"),
        &[
            (0.0, SignalPhase::NsGreen),
            (10.0, SignalPhase::NsYellow),
            (13.0, SignalPhase::AllRed),
            (16.5, SignalPhase::EwGreen),
        ]
    );
    assert_eq!(controller.current_phase(), SignalPhase::EwGreen);
    assert_eq!(controller.get_status().phase_change_count, 3);
}

#[test]
fn test_phase_changes_are_reported_as_events() {
    let mut sim = ScriptedSimulation::standard();
    sim.queue_cars("J1", Direction::West, 6);
    let mut controller = started(&mut sim, AdaptiveConfig::default());
    run(&mut controller, &mut sim, 17.0);

    let transitions: Vec<(SignalPhase, SignalPhase)> = controller
        .drain_events()
        .into_iter()
        .filter_map(|e| match e {
            SignalControlEvent::PhaseChanged { from, to, .. } => Some((from, to)),
            _ => None,
        })
        .collect();
    assert_eq!(
        transitions,
        vec![
            (SignalPhase::NsGreen, SignalPhase::NsYellow),
            (SignalPhase::NsYellow, SignalPhase::AllRed),
            (SignalPhase::AllRed, SignalPhase::EwGreen),
        ]
    );
    assert!(controller.drain_events().is_empty());
}

#[test]
fn test_green_holds_without_opposing_demand() {
    let mut sim = ScriptedSimulation::standard();
    sim.queue_cars("J1", Direction::North, 4);
    let mut controller = started(&mut sim, AdaptiveConfig::default());
    run(&mut controller, &mut sim, 60.0);
    assert_eq!(controller.current_phase(), SignalPhase::NsGreen);
    assert_eq!(sim.applied_log("J1").len(), 1);
}

#[test]
fn test_never_green_to_green_and_greens_within_envelope() {
    let mut sim = ScriptedSimulation::standard();
    sim.autodrive = true;
    let config = AdaptiveConfig::default();
    let mut controller = started(&mut sim, config.clone());

    for tick in 0..1_600u32 {
        if tick % 6 == 0 {
            let direction = Direction::ALL[(tick / 6) as usize % 4];
            sim.spawn_arrival("J1", direction, 120.0, 10.0);
        }
        if tick % 40 == 0 {
            sim.queue_cars("J1", Direction::East, 2);
        }
        sim.advance(DT);
        controller.step(&mut sim);
    }

    let log = sim.applied_log("J1");
    assert!(log.len() > 8, "expected several cycles, got {}", log.len());
    for pair in log.windows(2) {
        let (start, from) = pair[0];
        let (end, to) = pair[1];
        match from {
            SignalPhase::NsGreen => assert_eq!(to, SignalPhase::NsYellow),
            SignalPhase::EwGreen => assert_eq!(to, SignalPhase::EwYellow),
            SignalPhase::NsYellow | SignalPhase::EwYellow => {
                assert_eq!(to, SignalPhase::AllRed);
                assert!(end - start >= config.yellow - EPS);
            }
            SignalPhase::AllRed => {
                assert!(to.is_green());
                assert!(end - start >= config.all_red_duration() - EPS);
            }
        }
        if from.is_green() {
            let green = end - start;
            assert!(green >= config.min_green - EPS, "green of {green}s");
            assert!(green <= config.max_green + DT + EPS, "green of {green}s");
        }
    }
}

// ====================================================================
// Starvation and critical wait
// ====================================================================

#[test]
fn test_starvation_forces_service() {
    let mut sim = ScriptedSimulation::standard();
    sim.queue_cars("J1", Direction::North, 60);
    sim.queue_cars("J1", Direction::South, 60);
    sim.queue_cars("J1", Direction::East, 1);
    let config = AdaptiveConfig {
        alpha: 2.0,
        critical_wait: 1_000.0,
        ..AdaptiveConfig::default()
    };
    let mut controller = started(&mut sim, config);

    run(&mut controller, &mut sim, 90.0);
    assert_eq!(controller.current_phase(), SignalPhase::NsGreen);

    run(&mut controller, &mut sim, 0.5);
    assert_eq!(controller.current_phase(), SignalPhase::NsYellow);
    assert_eq!(
        controller.get_status().last_switch_reason,
        Some(SwitchReason::Starvation(Direction::East))
    );

    // The forced target wins over the heavier NS pressure.
    run(&mut controller, &mut sim, 6.5);
    assert_eq!(controller.current_phase(), SignalPhase::EwGreen);
}

#[test]
fn test_waiting_without_queue_resets_instead_of_starving() {
    let mut sim = ScriptedSimulation::standard();
    sim.queue_cars("J1", Direction::North, 4);
    let mut controller = started(&mut sim, AdaptiveConfig::default());
    run(&mut controller, &mut sim, 100.0);
    assert_eq!(controller.current_phase(), SignalPhase::NsGreen);
    assert!(controller.waiting_time(Direction::East) < 90.0);
}

#[test]
fn test_critical_wait_caps_running_green() {
    let mut sim = ScriptedSimulation::standard();
    sim.queue_cars("J1", Direction::North, 60);
    sim.queue_cars("J1", Direction::South, 60);
    sim.queue_cars("J1", Direction::East, 1);
    let config = AdaptiveConfig {
        alpha: 2.0,
        ..AdaptiveConfig::default()
    };
    let mut controller = started(&mut sim, config);

    run(&mut controller, &mut sim, 75.0);
    assert_eq!(controller.current_phase(), SignalPhase::NsGreen);
    assert!((controller.compute_green_time(Direction::North) - 120.0).abs() < EPS);

    run(&mut controller, &mut sim, 0.5);
    assert_eq!(controller.current_phase(), SignalPhase::NsYellow);
    assert_eq!(
        controller.get_status().last_switch_reason,
        Some(SwitchReason::PlannedGreenElapsed)
    );
}

// ====================================================================
// Debt
// ====================================================================

#[test]
fn test_debt_is_repaid_on_next_green_of_that_direction() {
    let mut sim = ScriptedSimulation::standard();
    sim.queue_cars("J1", Direction::East, 4);
    let mut controller = started(&mut sim, AdaptiveConfig::default());
    controller.add_green_debt(Direction::East, 10.0);
    controller.add_green_debt(Direction::East, -2.0);
    assert!((controller.ledger().outstanding(Direction::East) - 10.0).abs() < EPS);

    run(&mut controller, &mut sim, 17.0);
    assert_eq!(controller.current_phase(), SignalPhase::EwGreen);

    let outstanding = controller.ledger().outstanding(Direction::East);
    let repaid = controller.ledger().total_repaid(Direction::East);
    assert!(repaid > 0.0 && repaid <= 10.0, "repaid {repaid}");
    assert!((outstanding + repaid - 10.0).abs() < EPS);
    assert!((controller.get_statistics().total_debt_repaid - repaid).abs() < EPS);

    // The repayment lengthens this green beyond its queue-based share.
    let granted = controller.compute_green_time(Direction::East);
    assert!((granted - (10.0 + 0.5 * 4.0 + repaid)).abs() < EPS, "granted {granted}");
}

#[test]
fn test_debt_repayment_holds_green_against_pressure() {
    let mut sim = ScriptedSimulation::standard();
    sim.queue_cars("J1", Direction::East, 2);
    let mut controller = started(&mut sim, AdaptiveConfig::default());
    controller.add_green_debt(Direction::North, 8.0);

    // North's repayment is planned on the first tick of the running green.
    run(&mut controller, &mut sim, 0.5);
    let repaid = controller.ledger().total_repaid(Direction::North);
    assert!(repaid > 0.0);

    run(&mut controller, &mut sim, 9.5);
    assert_eq!(controller.current_phase(), SignalPhase::NsGreen);
    assert!(matches!(
        controller.should_change_phase(sim.time()),
        PhaseDecision::Hold(HoldReason::DebtRepayment)
    ));
}

#[test]
fn test_backlog_report_reflects_queue_and_debt() {
    let mut sim = ScriptedSimulation::standard();
    sim.queue_cars("J1", Direction::West, 30);
    let mut controller = started(&mut sim, AdaptiveConfig::default());
    controller.add_green_debt(Direction::West, 5.0);
    run(&mut controller, &mut sim, 0.5);

    let report = controller.backlog_report();
    assert!((report[Direction::West].current_queue - 30.0).abs() < EPS);
    assert!((report[Direction::West].debt - 5.0).abs() < EPS);
    assert_eq!(report[Direction::North].status, BacklogStatus::Ok);
    assert!(report[Direction::West].severity > report[Direction::North].severity);
}

#[test]
fn test_debt_is_paid_off_over_cycles_without_overpaying() {
    let mut sim = ScriptedSimulation::standard();
    sim.queue_cars("J1", Direction::North, 4);
    sim.queue_cars("J1", Direction::East, 4);
    let config = AdaptiveConfig::default();
    let cap = config.debt_cycle_cap;
    let mut controller = started(&mut sim, config);
    controller.add_green_debt(Direction::East, 40.0);

    let mut previous = 40.0;
    let mut payments = Vec::new();
    for _ in 0..1800 {
        run(&mut controller, &mut sim, DT);
        let ledger = controller.ledger();
        let outstanding = ledger.outstanding(Direction::East);
        let repaid = ledger.total_repaid(Direction::East);
        assert!(outstanding >= 0.0, "outstanding {outstanding}");
        assert!(repaid <= 40.0 + EPS, "overpaid: {repaid}");
        assert!((outstanding + repaid - 40.0).abs() < 1e-6);
        assert!(outstanding <= previous + EPS, "debt grew at t={}", sim.time());
        if outstanding < previous - EPS {
            payments.push(previous - outstanding);
        }
        previous = outstanding;
    }

    assert!(payments.len() >= 3, "payments: {payments:?}");
    assert!(payments.iter().all(|p| *p <= cap + EPS), "payments: {payments:?}");
    // Each cycle pays a share of what is left until the residual is cleared.
    assert!(payments[0] > payments[payments.len() - 1], "payments: {payments:?}");
    assert!(previous.abs() < EPS, "still owed {previous}");
    assert!((controller.ledger().total_repaid(Direction::East) - 40.0).abs() < 1e-6);
}

#[test]
fn test_green_cut_short_returns_undelivered_repayment() {
    let mut sim = ScriptedSimulation::standard();
    let mut controller = started(&mut sim, AdaptiveConfig::default());
    controller.add_green_debt(Direction::North, 8.0);
    run(&mut controller, &mut sim, 0.5);
    let planned = controller.ledger().total_repaid(Direction::North);
    assert!((planned - 2.4).abs() < EPS, "planned {planned}");

    // One second past minimum green: only one second was delivered.
    run(&mut controller, &mut sim, 10.5);
    assert_eq!(controller.current_phase(), SignalPhase::NsGreen);
    controller.receive(ControlMessage::Suspend);
    controller.receive(ControlMessage::PhaseApplied {
        phase: SignalPhase::NsYellow,
        at: 11.0,
    });

    let ledger = controller.ledger();
    assert!((ledger.total_repaid(Direction::North) - 1.0).abs() < 1e-6);
    assert!((ledger.outstanding(Direction::North) - 7.0).abs() < 1e-6);
    assert!((ledger.total_credited(Direction::North) - 8.0).abs() < EPS);
    assert_eq!(controller.current_phase(), SignalPhase::NsYellow);
}

#[test]
fn test_green_ended_before_minimum_refunds_whole_repayment() {
    let mut sim = ScriptedSimulation::standard();
    let mut controller = started(&mut sim, AdaptiveConfig::default());
    controller.add_green_debt(Direction::North, 8.0);
    run(&mut controller, &mut sim, 4.0);
    assert!(controller.ledger().total_repaid(Direction::North) > 0.0);

    controller.receive(ControlMessage::Suspend);
    controller.receive(ControlMessage::PhaseApplied {
        phase: SignalPhase::NsYellow,
        at: 4.0,
    });
    let ledger = controller.ledger();
    assert!(ledger.total_repaid(Direction::North).abs() < EPS);
    assert!((ledger.outstanding(Direction::North) - 8.0).abs() < EPS);

    let last = controller.phase_log().last().copied();
    assert_eq!(
        last,
        Some(PhaseRecord {
            phase: SignalPhase::NsGreen,
            started_at: 0.0,
            duration: 4.0,
        })
    );
}

// ====================================================================
// Suspension, retries, envelope
// ====================================================================

#[test]
fn test_suspended_controller_issues_no_commands() {
    let mut sim = ScriptedSimulation::standard();
    sim.queue_cars("J1", Direction::East, 6);
    let mut controller = started(&mut sim, AdaptiveConfig::default());
    controller.receive(ControlMessage::Suspend);
    assert!(controller.is_suspended());

    run(&mut controller, &mut sim, 40.0);
    assert_eq!(sim.applied_log("J1").len(), 1);
    assert_eq!(controller.current_phase(), SignalPhase::NsGreen);
}

#[test]
fn test_suspended_controller_keeps_sensing() {
    let mut sim = ScriptedSimulation::standard();
    let mut controller = started(&mut sim, AdaptiveConfig::default());
    controller.receive(ControlMessage::Suspend);
    run(&mut controller, &mut sim, 5.0);

    sim.queue_cars("J1", Direction::West, 30);
    run(&mut controller, &mut sim, 1.0);
    let report = controller.backlog_report();
    assert!((report[Direction::West].current_queue - 30.0).abs() < EPS);
    assert_eq!(report[Direction::West].status, BacklogStatus::Critical);
    assert!((controller.waiting_time(Direction::West) - 6.0).abs() < EPS);
    assert_eq!(sim.applied_log("J1").len(), 1);
}

#[test]
fn test_resume_adopts_applied_phase() {
    let mut sim = ScriptedSimulation::standard();
    let mut controller = started(&mut sim, AdaptiveConfig::default());
    controller.receive(ControlMessage::Suspend);
    run(&mut controller, &mut sim, 20.0);

    controller.receive(ControlMessage::Resume {
        phase: SignalPhase::EwGreen,
        at: 20.0,
    });
    assert!(!controller.is_suspended());
    assert_eq!(controller.current_phase(), SignalPhase::EwGreen);
    assert!(controller.phase_elapsed(20.0).abs() < EPS);
    assert!(controller.waiting_time(Direction::East).abs() < EPS);

    // The adopted green still gets its minimum before ending.
    sim.queue_cars("J1", Direction::North, 6);
    run(&mut controller, &mut sim, 9.5);
    assert_eq!(controller.current_phase(), SignalPhase::EwGreen);
    run(&mut controller, &mut sim, 0.5);
    assert_eq!(controller.current_phase(), SignalPhase::EwYellow);
}

#[test]
fn test_failed_phase_write_is_retried_next_tick() {
    let mut sim = ScriptedSimulation::standard();
    sim.queue_cars("J1", Direction::East, 6);
    let mut controller = started(&mut sim, AdaptiveConfig::default());

    run(&mut controller, &mut sim, 9.5);
    sim.fail_next_phase_writes(1);
    run(&mut controller, &mut sim, 0.5);
    assert_eq!(controller.current_phase(), SignalPhase::NsGreen);

    run(&mut controller, &mut sim, 0.5);
    assert_eq!(controller.current_phase(), SignalPhase::NsYellow);
    assert_eq!(sim.applied_log("J1").last(), Some(&(10.5, SignalPhase::NsYellow)));
}

#[test]
fn test_lost_connection_skips_ticks() {
    let mut sim = ScriptedSimulation::standard();
    sim.queue_cars("J1", Direction::East, 6);
    let mut controller = started(&mut sim, AdaptiveConfig::default());
    sim.set_live(false);
    run(&mut controller, &mut sim, 30.0);
    assert_eq!(controller.current_phase(), SignalPhase::NsGreen);
    assert!(controller.is_running());

    sim.set_live(true);
    run(&mut controller, &mut sim, 0.5);
    assert_eq!(controller.current_phase(), SignalPhase::NsYellow);
}

#[test]
fn test_emergency_envelope_round_trip() {
    let mut sim = ScriptedSimulation::standard();
    let config = AdaptiveConfig::default();
    let mut controller = started(&mut sim, config.clone());

    controller.receive(ControlMessage::EnterEmergencyEnvelope);
    let envelope = controller.envelope();
    assert!(envelope.emergency);
    assert!((envelope.min_green - config.emergency_min_green).abs() < EPS);
    assert!((envelope.max_green - config.emergency_max_green).abs() < EPS);

    controller.receive(ControlMessage::RestoreNormalEnvelope);
    let envelope = controller.envelope();
    assert!(!envelope.emergency);
    assert!((envelope.min_green - config.min_green).abs() < EPS);
    assert!((envelope.max_green - config.max_green).abs() < EPS);
}

#[test]
fn test_emergency_envelope_lengthens_minimum_green() {
    let mut sim = ScriptedSimulation::standard();
    sim.queue_cars("J1", Direction::East, 6);
    let mut controller = started(&mut sim, AdaptiveConfig::default());
    controller.set_emergency_params();

    run(&mut controller, &mut sim, 11.5);
    assert_eq!(controller.current_phase(), SignalPhase::NsGreen);
    run(&mut controller, &mut sim, 0.5);
    assert_eq!(controller.current_phase(), SignalPhase::NsYellow);
}

#[test]
fn test_credit_message_adds_debt() {
    let mut sim = ScriptedSimulation::standard();
    let mut controller = started(&mut sim, AdaptiveConfig::default());
    controller.receive(ControlMessage::CreditGreenDebt {
        direction: Direction::South,
        seconds: 6.0,
    });
    assert!((controller.get_status().debt[Direction::South] - 6.0).abs() < EPS);
}

#[test]
fn test_statistics_accumulate_completed_phases() {
    let mut sim = ScriptedSimulation::standard();
    sim.queue_cars("J1", Direction::East, 6);
    let mut controller = started(&mut sim, AdaptiveConfig::default());
    run(&mut controller, &mut sim, 17.0);

    let stats = controller.get_statistics();
    assert_eq!(stats.total_phases, 3);
    assert!((stats.total_measured_time - 16.5).abs() < EPS);
    assert!((stats.average_phase_duration - 5.5).abs() < EPS);
    assert!(stats.average_queue_lengths[Direction::East] > 5.9);
    assert_eq!(controller.phase_log().count(), 3);
    assert_eq!(controller.layout().junction_id, "J1");
}
