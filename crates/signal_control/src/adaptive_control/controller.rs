//! The adaptive phase state machine for one junction.
//!
//! Cycle: `Green(A) -> Yellow(A) -> AllRed -> Green(B) -> ...`. Greens are
//! sized from queue pressure, bounded by the active envelope, protected
//! against starvation, and extended to repay green-time debt.

use bevy::prelude::*;

use crate::config::AdaptiveConfig;
use crate::control_error::ControlError;
use crate::direction::{Direction, DirectionGroup, DirectionTable, JunctionLayout, SignalPhase};
use crate::events::SignalControlEvent;
use crate::rolling_history::RollingHistory;
use crate::telemetry::Telemetry;

use super::constants::{PHASE_LOG_CAPACITY, PRESSURE_TIE_EPSILON, REFUND_EPSILON};
use super::debt::{severity_score, GreenDebtLedger};
use super::green_time::{dynamic_switch_threshold, green_ceiling, green_time};
use super::pressure::sample_approach;
use super::types::{
    AdaptiveStatistics, AdaptiveStatus, BacklogEntry, BacklogReport, BacklogStatus,
    ControlMessage, GreenEnvelope, HoldReason, MeanAccumulator, PhaseDecision, PhaseRecord,
    PressureSample, SwitchReason,
};

pub struct AdaptiveController {
    layout: JunctionLayout,
    config: AdaptiveConfig,
    envelope: GreenEnvelope,
    running: bool,
    suspended: bool,
    /// Set by `sense`, consumed by the next `step`.
    sensed: bool,
    /// Simulation time of the last observed tick.
    clock: f64,
    phase: SignalPhase,
    phase_started_at: f64,
    /// Group of the current green, or of the last green while clearing.
    served_group: DirectionGroup,
    /// Start of the served group's uninterrupted run of greens.
    cycle_started_at: f64,
    last_green: DirectionTable<f64>,
    samples: DirectionTable<PressureSample>,
    queue_history: DirectionTable<RollingHistory<f64>>,
    pressure_mean: DirectionTable<MeanAccumulator>,
    queue_mean: DirectionTable<MeanAccumulator>,
    ledger: GreenDebtLedger,
    repaid_this_green: DirectionTable<f64>,
    replan_green: bool,
    forced_target: Option<DirectionGroup>,
    last_switch_reason: Option<SwitchReason>,
    phase_log: RollingHistory<PhaseRecord>,
    phase_changes: u64,
    completed_phases: u64,
    completed_phase_time: f64,
    events: Vec<SignalControlEvent>,
}

impl AdaptiveController {
    pub fn new(layout: JunctionLayout, config: AdaptiveConfig) -> Self {
        let capacity = config.history_capacity;
        Self {
            layout,
            envelope: GreenEnvelope {
                min_green: config.min_green,
                max_green: config.max_green,
                emergency: false,
            },
            running: false,
            suspended: false,
            sensed: false,
            clock: 0.0,
            phase: SignalPhase::NsGreen,
            phase_started_at: 0.0,
            served_group: DirectionGroup::NorthSouth,
            cycle_started_at: 0.0,
            last_green: DirectionTable::default(),
            samples: DirectionTable::default(),
            queue_history: DirectionTable::from_fn(|_| RollingHistory::new(capacity)),
            pressure_mean: DirectionTable::default(),
            queue_mean: DirectionTable::default(),
            ledger: GreenDebtLedger::default(),
            repaid_this_green: DirectionTable::default(),
            replan_green: true,
            forced_target: None,
            last_switch_reason: None,
            phase_log: RollingHistory::new(PHASE_LOG_CAPACITY),
            phase_changes: 0,
            completed_phases: 0,
            completed_phase_time: 0.0,
            events: Vec::new(),
            config,
        }
    }

    // -----------------------------------------------------------------------
    // Lifecycle
    // -----------------------------------------------------------------------

    /// Verifies the junction exists and applies NS green.
    pub fn start(&mut self, telemetry: &mut dyn Telemetry) -> Result<(), ControlError> {
        if !telemetry.is_live() {
            return Err(ControlError::ControllerNotReady);
        }
        let junction_id = self.layout.junction_id.clone();
        if !telemetry.junction_ids()?.contains(&junction_id) {
            return Err(ControlError::UnknownJunction(junction_id));
        }
        let now = telemetry.simulation_time()?;
        telemetry.set_phase(&junction_id, SignalPhase::NsGreen.index())?;

        self.clock = now;
        self.phase = SignalPhase::NsGreen;
        self.phase_started_at = now;
        self.served_group = DirectionGroup::NorthSouth;
        self.cycle_started_at = now;
        self.last_green = DirectionTable::splat(now);
        self.repaid_this_green = DirectionTable::default();
        self.replan_green = true;
        self.forced_target = None;
        self.running = true;
        self.suspended = false;
        self.sensed = false;
        info!("Adaptive controller started for {} at t={:.1}", junction_id, now);
        Ok(())
    }

    pub fn stop(&mut self) {
        if self.running {
            info!("Adaptive controller stopped for {}", self.layout.junction_id);
        }
        self.running = false;
    }

    /// Samples every approach and advances the clock. Runs while suspended
    /// too, so the backlog report stays current through a preemption.
    pub fn sense(&mut self, telemetry: &dyn Telemetry) {
        if !self.running {
            return;
        }
        let now = match telemetry.simulation_time() {
            Ok(t) => t,
            Err(e) => {
                warn!("Adaptive {}: clock unreadable, skipping tick: {}", self.layout.junction_id, e);
                return;
            }
        };
        self.clock = now;
        self.sample(telemetry);
        if self.phase.is_green() {
            for d in self.served_group.directions() {
                self.last_green[d] = now;
            }
        }
        self.sensed = true;
    }

    /// Advances the phase state machine by one tick, sensing first unless
    /// `sense` already ran this tick. Decides nothing while stopped or
    /// suspended. Never fails: telemetry problems are logged and the tick skipped.
    pub fn step(&mut self, telemetry: &mut dyn Telemetry) {
        if !self.running {
            return;
        }
        if !self.sensed {
            self.sense(telemetry);
        }
        if !std::mem::take(&mut self.sensed) || self.suspended {
            return;
        }
        let now = self.clock;

        if self.phase.is_green() && self.replan_green {
            self.plan_green();
        }

        let elapsed = now - self.phase_started_at;
        match self.phase {
            SignalPhase::NsGreen | SignalPhase::EwGreen => {
                if let PhaseDecision::Switch { toward, reason } = self.should_change_phase(now) {
                    debug!(
                        "Adaptive {}: ending {} after {:.1}s ({:?}) toward {}",
                        self.layout.junction_id,
                        self.phase.label(),
                        elapsed,
                        reason,
                        toward.label()
                    );
                    let yellow = self.served_group.yellow_phase();
                    if self.apply_phase(telemetry, yellow, now) {
                        self.last_switch_reason = Some(reason);
                        self.forced_target = match reason {
                            SwitchReason::Starvation(_) | SwitchReason::MaxCycle => Some(toward),
                            _ => None,
                        };
                    }
                }
            }
            SignalPhase::NsYellow | SignalPhase::EwYellow => {
                if elapsed >= self.config.yellow {
                    self.apply_phase(telemetry, SignalPhase::AllRed, now);
                }
            }
            SignalPhase::AllRed => {
                if elapsed >= self.config.all_red_duration() {
                    let next = self.next_green_group();
                    if self.apply_phase(telemetry, next.green_phase(), now) {
                        self.forced_target = None;
                    }
                }
            }
        }
    }

    /// Applies a message from the junction's priority controller.
    pub(crate) fn receive(&mut self, message: ControlMessage) {
        match message {
            ControlMessage::Suspend => {
                if !self.suspended {
                    info!("Adaptive controller suspended for {}", self.layout.junction_id);
                }
                self.suspended = true;
            }
            ControlMessage::Resume { phase, at } => {
                self.suspended = false;
                self.adopt_phase(phase, at);
                info!(
                    "Adaptive controller resumed for {} in {} at t={:.1}",
                    self.layout.junction_id,
                    phase.label(),
                    at
                );
            }
            ControlMessage::PhaseApplied { phase, at } => {
                if phase != self.phase {
                    self.enter_phase(phase, at);
                }
            }
            ControlMessage::CreditGreenDebt { direction, seconds } => {
                self.add_green_debt(direction, seconds);
            }
            ControlMessage::EnterEmergencyEnvelope => self.set_emergency_params(),
            ControlMessage::RestoreNormalEnvelope => self.restore_normal_params(),
        }
    }

    // -----------------------------------------------------------------------
    // Debt and envelope
    // -----------------------------------------------------------------------

    pub fn add_green_debt(&mut self, direction: Direction, seconds: f64) {
        if self.ledger.credit(direction, seconds) {
            debug!(
                "Adaptive {}: {} owed {:.1}s (total {:.1}s)",
                self.layout.junction_id,
                direction.label(),
                seconds,
                self.ledger.outstanding(direction)
            );
        }
    }

    pub fn set_emergency_params(&mut self) {
        if !self.envelope.emergency {
            info!(
                "Adaptive {}: emergency envelope [{:.0}s, {:.0}s]",
                self.layout.junction_id, self.config.emergency_min_green, self.config.emergency_max_green
            );
        }
        self.envelope = GreenEnvelope {
            min_green: self.config.emergency_min_green,
            max_green: self.config.emergency_max_green,
            emergency: true,
        };
    }

    pub fn restore_normal_params(&mut self) {
        if self.envelope.emergency {
            info!("Adaptive {}: normal envelope restored", self.layout.junction_id);
        }
        self.envelope = GreenEnvelope {
            min_green: self.config.min_green,
            max_green: self.config.max_green,
            emergency: false,
        };
    }

    // -----------------------------------------------------------------------
    // Policy
    // -----------------------------------------------------------------------

    /// Latest pressure score of a direction.
    pub fn compute_pressure(&self, direction: Direction) -> f64 {
        self.samples[direction].pressure
    }

    /// Green the direction would be granted now, within `[min_green, max_green]`.
    pub fn compute_green_time(&self, direction: Direction) -> f64 {
        let group = direction.group();
        let repayment = if self.phase.green_group() == Some(group) {
            self.repaid_this_green[direction]
        } else {
            0.0
        };
        let ceiling = green_ceiling(&self.envelope, self.critical_wait_against(group), &self.config);
        green_time(
            self.samples[direction].queue_pcu,
            repayment,
            &self.envelope,
            ceiling,
            &self.config,
        )
    }

    /// Evaluates the running green. Checks, in order: starvation override,
    /// minimum green, pressure imbalance, hard ceilings, planned green.
    pub fn should_change_phase(&mut self, now: f64) -> PhaseDecision {
        let group = self.served_group;
        let opposing = group.opposite();
        let elapsed = now - self.phase_started_at;

        for d in opposing.directions() {
            let wait = now - self.last_green[d];
            if wait > self.config.max_waiting_time {
                if self.samples[d].queue_pcu >= self.config.min_queue_to_force {
                    return PhaseDecision::Switch {
                        toward: opposing,
                        reason: SwitchReason::Starvation(d),
                    };
                }
                debug!(
                    "Adaptive {}: {} waited {:.1}s with negligible queue, resetting",
                    self.layout.junction_id,
                    d.label(),
                    wait
                );
                self.last_green[d] = now;
            }
        }

        if elapsed < self.envelope.min_green {
            return PhaseDecision::Hold(HoldReason::MinGreen);
        }

        let hold_floor = self.hold_floor();
        let own = self.group_pressure(group);
        let other = self.group_pressure(opposing);
        let threshold = dynamic_switch_threshold(own + other, &self.config);
        if elapsed >= hold_floor
            && other >= self.config.min_pressure_to_switch
            && other > own * threshold
        {
            return PhaseDecision::Switch {
                toward: opposing,
                reason: SwitchReason::PressureImbalance,
            };
        }

        if elapsed >= self.envelope.max_green {
            return PhaseDecision::Switch {
                toward: opposing,
                reason: SwitchReason::MaxGreen,
            };
        }
        if now - self.cycle_started_at >= self.config.max_cycle_time {
            return PhaseDecision::Switch {
                toward: opposing,
                reason: SwitchReason::MaxCycle,
            };
        }

        if elapsed >= self.planned_green() {
            let opposing_queue: f64 = opposing
                .directions()
                .iter()
                .map(|d| self.samples[*d].queue_pcu)
                .sum();
            if opposing_queue > 0.0 {
                return PhaseDecision::Switch {
                    toward: opposing,
                    reason: SwitchReason::PlannedGreenElapsed,
                };
            }
            return PhaseDecision::Hold(HoldReason::NoOpposingDemand);
        }

        if elapsed < hold_floor {
            PhaseDecision::Hold(HoldReason::DebtRepayment)
        } else {
            PhaseDecision::Hold(HoldReason::PlannedGreen)
        }
    }

    /// Backlog of every direction, as of the last tick.
    pub fn backlog_report(&self) -> BacklogReport {
        DirectionTable::from_fn(|d| {
            let current_queue = self.samples[d].queue_pcu;
            let average_queue = self.queue_history[d].mean();
            let wait_time = self.waiting_time(d);
            let severity = severity_score(current_queue, average_queue, wait_time, &self.config);
            BacklogEntry {
                current_queue,
                average_queue: average_queue.unwrap_or(0.0),
                wait_time,
                severity,
                status: BacklogStatus::from_severity(severity),
                debt: self.ledger.outstanding(d),
            }
        })
    }

    // -----------------------------------------------------------------------
    // Accessors
    // -----------------------------------------------------------------------

    pub fn junction_id(&self) -> &str {
        &self.layout.junction_id
    }

    pub fn layout(&self) -> &JunctionLayout {
        &self.layout
    }

    pub fn config(&self) -> &AdaptiveConfig {
        &self.config
    }

    pub fn current_phase(&self) -> SignalPhase {
        self.phase
    }

    pub fn phase_elapsed(&self, now: f64) -> f64 {
        (now - self.phase_started_at).max(0.0)
    }

    pub fn all_red_duration(&self) -> f64 {
        self.config.all_red_duration()
    }

    pub fn is_running(&self) -> bool {
        self.running
    }

    pub fn is_suspended(&self) -> bool {
        self.suspended
    }

    pub fn envelope(&self) -> GreenEnvelope {
        self.envelope
    }

    pub fn ledger(&self) -> &GreenDebtLedger {
        &self.ledger
    }

    /// Seconds since the direction last had green.
    pub fn waiting_time(&self, direction: Direction) -> f64 {
        (self.clock - self.last_green[direction]).max(0.0)
    }

    pub fn phase_log(&self) -> impl Iterator<Item = &PhaseRecord> {
        self.phase_log.iter()
    }

    pub fn get_status(&self) -> AdaptiveStatus {
        let pressures = self.samples.map(|_, s| s.pressure);
        AdaptiveStatus {
            junction_id: self.layout.junction_id.clone(),
            phase: self.phase,
            phase_elapsed: self.phase_elapsed(self.clock),
            running: self.running,
            suspended: self.suspended,
            ns_total_pressure: self.group_pressure(DirectionGroup::NorthSouth),
            ew_total_pressure: self.group_pressure(DirectionGroup::EastWest),
            pressures,
            planned_green: self.phase.is_green().then(|| self.planned_green()),
            phase_change_count: self.phase_changes,
            last_switch_reason: self.last_switch_reason,
            debt: self.ledger.outstanding_table(),
            envelope: self.envelope,
        }
    }

    pub fn get_statistics(&self) -> AdaptiveStatistics {
        let average_phase_duration = if self.completed_phases == 0 {
            0.0
        } else {
            self.completed_phase_time / self.completed_phases as f64
        };
        AdaptiveStatistics {
            total_phases: self.completed_phases,
            average_phase_duration,
            average_pressures: self.pressure_mean.map(|_, m| m.mean()),
            average_queue_lengths: self.queue_mean.map(|_, m| m.mean()),
            total_measured_time: self.completed_phase_time,
            total_debt_repaid: Direction::ALL
                .iter()
                .map(|d| self.ledger.total_repaid(*d))
                .sum(),
        }
    }

    pub(crate) fn drain_events(&mut self) -> Vec<SignalControlEvent> {
        std::mem::take(&mut self.events)
    }

    // -----------------------------------------------------------------------
    // Internals
    // -----------------------------------------------------------------------

    fn sample(&mut self, telemetry: &dyn Telemetry) {
        for d in Direction::ALL {
            let sample = sample_approach(telemetry, &self.layout.approaches[d], &self.config);
            self.queue_history[d].push(sample.queue_pcu);
            self.queue_mean[d].push(sample.queue_pcu);
            self.pressure_mean[d].push(sample.pressure);
            self.samples[d] = sample;
        }
    }

    fn group_pressure(&self, group: DirectionGroup) -> f64 {
        group
            .directions()
            .iter()
            .map(|d| self.samples[*d].pressure)
            .sum()
    }

    /// True when a direction outside `group` has waited past the critical
    /// threshold with a real queue.
    fn critical_wait_against(&self, group: DirectionGroup) -> bool {
        group.opposite().directions().iter().any(|d| {
            self.waiting_time(*d) > self.config.critical_wait
                && self.samples[*d].queue_pcu >= self.config.min_queue_to_force
        })
    }

    /// Longest green any direction of the served group is entitled to.
    fn planned_green(&self) -> f64 {
        self.served_group
            .directions()
            .iter()
            .map(|d| self.compute_green_time(*d))
            .fold(self.envelope.min_green, f64::max)
    }

    /// Pressure comparison cannot end a green before min green plus repayment.
    fn hold_floor(&self) -> f64 {
        let repaid = self
            .served_group
            .directions()
            .iter()
            .map(|d| self.repaid_this_green[*d])
            .fold(0.0, f64::max);
        self.envelope.min_green + repaid
    }

    /// Grants this green's debt repayment to each direction of the served
    /// group. Runs on the first tick of every green, after sampling.
    fn plan_green(&mut self) {
        self.replan_green = false;
        let report = self.backlog_report();
        for d in self.served_group.directions() {
            let ceiling = green_ceiling(
                &self.envelope,
                self.critical_wait_against(self.served_group),
                &self.config,
            );
            let base = green_time(self.samples[d].queue_pcu, 0.0, &self.envelope, ceiling, &self.config);
            let repaid = self
                .ledger
                .repay(d, report[d].severity, ceiling - base, &self.config);
            self.repaid_this_green[d] = repaid;
            if repaid > 0.0 {
                debug!(
                    "Adaptive {}: repaying {:.1}s to {} ({:.1}s still owed)",
                    self.layout.junction_id,
                    repaid,
                    d.label(),
                    self.ledger.outstanding(d)
                );
            }
        }
    }

    fn next_green_group(&self) -> DirectionGroup {
        if let Some(target) = self.forced_target {
            return target;
        }
        let ns = self.group_pressure(DirectionGroup::NorthSouth);
        let ew = self.group_pressure(DirectionGroup::EastWest);
        if (ns - ew).abs() <= PRESSURE_TIE_EPSILON {
            self.served_group.opposite()
        } else if ns > ew {
            DirectionGroup::NorthSouth
        } else {
            DirectionGroup::EastWest
        }
    }

    /// Writes a phase to the simulator. On failure the internal phase is left
    /// unchanged so the same transition is attempted again next tick.
    fn apply_phase(&mut self, telemetry: &mut dyn Telemetry, phase: SignalPhase, now: f64) -> bool {
        if let Err(e) = telemetry.set_phase(&self.layout.junction_id, phase.index()) {
            warn!(
                "Adaptive {}: failed to apply {}, retrying next tick: {}",
                self.layout.junction_id,
                phase.label(),
                e
            );
            return false;
        }
        self.enter_phase(phase, now);
        true
    }

    fn enter_phase(&mut self, phase: SignalPhase, now: f64) {
        let previous = self.phase;
        let duration = (now - self.phase_started_at).max(0.0);
        if previous.is_green() {
            self.settle_repayment(duration);
        }
        self.phase_log.push(PhaseRecord {
            phase: previous,
            started_at: self.phase_started_at,
            duration,
        });
        self.completed_phases += 1;
        self.completed_phase_time += duration;

        self.phase = phase;
        self.phase_started_at = now;
        if previous != phase {
            self.phase_changes += 1;
            self.events.push(SignalControlEvent::PhaseChanged {
                junction_id: self.layout.junction_id.clone(),
                from: previous,
                to: phase,
                time: now,
            });
        }

        if let Some(group) = phase.movement_group() {
            if phase.is_green() {
                if group != self.served_group {
                    self.cycle_started_at = now;
                }
                for d in group.directions() {
                    self.last_green[d] = now;
                }
                self.repaid_this_green = DirectionTable::default();
                self.replan_green = true;
            }
            self.served_group = group;
        }
    }

    /// Returns the part of this green's repayment that was never delivered,
    /// i.e. when the green ended before its hold floor.
    fn settle_repayment(&mut self, green_duration: f64) {
        let delivered = (green_duration - self.envelope.min_green).max(0.0);
        for d in self.served_group.directions() {
            let unused = self.repaid_this_green[d] - delivered;
            if unused > REFUND_EPSILON {
                self.ledger.refund(d, unused);
                self.repaid_this_green[d] -= unused;
                debug!(
                    "Adaptive {}: green ended early, {:.1}s of {} repayment still owed",
                    self.layout.junction_id,
                    unused,
                    d.label()
                );
            }
        }
    }

    /// Takes over whatever phase the priority controller left applied, as a
    /// new phase record.
    fn adopt_phase(&mut self, phase: SignalPhase, at: f64) {
        self.clock = at;
        self.enter_phase(phase, at);
        if phase.is_green() {
            // A fresh green after preemption starts its own cycle.
            self.cycle_started_at = at;
        }
    }
}
