//! The six-state preemption protocol for one junction.
//!
//! `Normal -> Detection -> [SafeTransition ->] PreemptionGreen
//!  [-> HoldPreemption] -> Restore -> Normal | Detection`
//!
//! The controller never touches its adaptive controller directly. It reads
//! the adaptive controller's state and posts [`ControlMessage`]s (suspend,
//! resume, debt credit, envelope changes) that the junction delivers on the
//! adaptive controller's own turn.

use std::collections::{BTreeMap, BTreeSet};

use bevy::math::DVec2;
use bevy::prelude::*;

use crate::adaptive_control::{AdaptiveController, BacklogStatus, ControlMessage};
use crate::config::PriorityConfig;
use crate::control_error::ControlError;
use crate::direction::{DirectionGroup, JunctionLayout, SignalPhase};
use crate::events::SignalControlEvent;
use crate::rolling_history::RollingHistory;
use crate::telemetry::{observe_vehicle, Telemetry, TelemetryResult, VehicleId, VehicleSnapshot};

use super::arbitration::{self, Arbitration};
use super::clearance::ClearanceStats;
use super::confirmation::DetectionConfirmer;
use super::rate_limit::RateLimiter;
use super::types::{
    EmergencyVehicle, Episode, EpisodeOutcome, FailedPreemptionRecord, FalsePositiveReason,
    FalsePositiveRecord, PreemptionState, PreemptionStateKind, PriorityStatistics, PriorityStatus,
    RejectionRecord, TransitionReason, TransitionRecord, TransitionStage,
};

type HandlerResult = Result<(), ControlError>;

/// Result of re-reading a tracked vehicle.
enum Verification {
    Present(VehicleSnapshot),
    Departed,
    NotPriority,
}

pub struct PriorityController {
    layout: JunctionLayout,
    config: PriorityConfig,
    running: bool,
    junction_position: DVec2,
    clock: f64,
    state: PreemptionState,
    state_entered_at: f64,
    candidates: BTreeMap<VehicleId, EmergencyVehicle>,
    pending: BTreeMap<VehicleId, EmergencyVehicle>,
    /// Rejected vehicles, ignored until they leave the detection radius.
    rejected_ids: BTreeSet<VehicleId>,
    confirmer: DetectionConfirmer,
    rate: RateLimiter,
    episode: Option<Episode>,
    emergency_until: Option<f64>,

    activations: u64,
    vehicles_served: u64,
    completed_episodes: u64,
    successful_episodes: u64,
    handling_time_total: f64,
    handled_episodes: u64,
    false_positives: RollingHistory<FalsePositiveRecord>,
    false_positive_total: u64,
    false_positives_by_stage: BTreeMap<PreemptionStateKind, u64>,
    false_positives_by_reason: BTreeMap<FalsePositiveReason, u64>,
    failed: RollingHistory<FailedPreemptionRecord>,
    failed_total: u64,
    rejections: RollingHistory<RejectionRecord>,
    rejected_total: u64,
    emergency_activations: u64,
    transitions: RollingHistory<TransitionRecord>,
    transition_total: u64,
    clearance: ClearanceStats,

    outbox: Vec<ControlMessage>,
    events: Vec<SignalControlEvent>,
}

impl PriorityController {
    pub fn new(layout: JunctionLayout, config: PriorityConfig) -> Self {
        let capacity = config.journal_capacity;
        Self {
            layout,
            running: false,
            junction_position: DVec2::ZERO,
            clock: 0.0,
            state: PreemptionState::Normal,
            state_entered_at: 0.0,
            candidates: BTreeMap::new(),
            pending: BTreeMap::new(),
            rejected_ids: BTreeSet::new(),
            confirmer: DetectionConfirmer::default(),
            rate: RateLimiter::default(),
            episode: None,
            emergency_until: None,
            activations: 0,
            vehicles_served: 0,
            completed_episodes: 0,
            successful_episodes: 0,
            handling_time_total: 0.0,
            handled_episodes: 0,
            false_positives: RollingHistory::new(capacity),
            false_positive_total: 0,
            false_positives_by_stage: BTreeMap::new(),
            false_positives_by_reason: BTreeMap::new(),
            failed: RollingHistory::new(capacity),
            failed_total: 0,
            rejections: RollingHistory::new(capacity),
            rejected_total: 0,
            emergency_activations: 0,
            transitions: RollingHistory::new(capacity),
            transition_total: 0,
            clearance: ClearanceStats::default(),
            outbox: Vec::new(),
            events: Vec::new(),
            config,
        }
    }

    // -----------------------------------------------------------------------
    // Lifecycle
    // -----------------------------------------------------------------------

    pub fn start(&mut self, telemetry: &dyn Telemetry) -> Result<(), ControlError> {
        if !telemetry.is_live() {
            return Err(ControlError::ControllerNotReady);
        }
        let junction_id = self.layout.junction_id.clone();
        if !telemetry.junction_ids()?.contains(&junction_id) {
            return Err(ControlError::UnknownJunction(junction_id));
        }
        self.junction_position = telemetry.junction_position(&junction_id)?;
        let now = telemetry.simulation_time()?;
        self.clock = now;
        self.state = PreemptionState::Normal;
        self.state_entered_at = now;
        self.running = true;
        info!("Priority controller started for {} at t={:.1}", junction_id, now);
        Ok(())
    }

    /// Stops the controller. An episode in progress hands the junction back
    /// to the adaptive controller.
    pub fn stop(&mut self) {
        if !self.running {
            return;
        }
        if let Some(episode) = self.episode.take() {
            self.outbox.push(ControlMessage::Resume {
                phase: episode.last_applied,
                at: self.clock,
            });
        }
        if self.emergency_until.take().is_some() {
            self.outbox.push(ControlMessage::RestoreNormalEnvelope);
        }
        if self.state != PreemptionState::Normal {
            self.transition(PreemptionState::Normal, TransitionReason::Stopped, self.clock);
        }
        self.candidates.clear();
        self.pending.clear();
        self.confirmer.clear();
        self.running = false;
        info!("Priority controller stopped for {}", self.layout.junction_id);
    }

    /// Runs the handler of the current state. Never fails: a telemetry or
    /// protocol error is logged and the tick makes no progress.
    pub fn step(&mut self, telemetry: &mut dyn Telemetry, adaptive: &AdaptiveController) {
        if !self.running {
            return;
        }
        let now = match telemetry.simulation_time() {
            Ok(t) => t,
            Err(e) => {
                warn!("Priority {}: clock unreadable, skipping tick: {}", self.layout.junction_id, e);
                return;
            }
        };
        self.clock = now;
        self.expire_emergency_mode(now);

        let kind = self.state.kind();
        let result = match self.state.clone() {
            PreemptionState::Normal => self.handle_normal(telemetry, adaptive, now),
            PreemptionState::Detection => self.handle_detection(telemetry, adaptive, now),
            PreemptionState::SafeTransition { stage } => {
                self.handle_safe_transition(telemetry, adaptive, stage, now)
            }
            PreemptionState::PreemptionGreen => self.handle_preemption_green(telemetry, adaptive, now),
            PreemptionState::HoldPreemption { vehicle_id } => {
                self.handle_hold(telemetry, adaptive, &vehicle_id, now)
            }
            PreemptionState::Restore { .. } => {
                self.handle_restore(now);
                Ok(())
            }
        };
        if let Err(e) = result {
            warn!(
                "Priority {}: {} handler failed, no change this tick: {}",
                self.layout.junction_id,
                kind.label(),
                e
            );
        }
    }

    // -----------------------------------------------------------------------
    // State handlers
    // -----------------------------------------------------------------------

    fn handle_normal(
        &mut self,
        telemetry: &mut dyn Telemetry,
        adaptive: &AdaptiveController,
        now: f64,
    ) -> HandlerResult {
        self.scan(telemetry, now)?;
        if arbitration::select(self.candidates.values(), &self.config).is_some() {
            self.transition(PreemptionState::Detection, TransitionReason::CandidateConfirmed, now);
            return self.evaluate_candidates(telemetry, adaptive, now);
        }
        Ok(())
    }

    fn handle_detection(
        &mut self,
        telemetry: &mut dyn Telemetry,
        adaptive: &AdaptiveController,
        now: f64,
    ) -> HandlerResult {
        self.scan(telemetry, now)?;
        self.evaluate_candidates(telemetry, adaptive, now)
    }

    /// Arbitrates, applies the rate limit, then commits via the fast path or
    /// a safe transition.
    fn evaluate_candidates(
        &mut self,
        telemetry: &mut dyn Telemetry,
        adaptive: &AdaptiveController,
        now: f64,
    ) -> HandlerResult {
        let Some(selection) = arbitration::select(self.candidates.values(), &self.config) else {
            self.transition(PreemptionState::Normal, TransitionReason::NoEligibleCandidate, now);
            return Ok(());
        };
        let Some(chosen) = self.candidates.get(&selection.chosen).cloned() else {
            return Ok(());
        };
        if chosen.eta > self.config.activation_eta {
            return Ok(());
        }

        if !self.rate.can_activate(now, &self.config) {
            self.reject(&chosen, now);
            self.transition(PreemptionState::Normal, TransitionReason::RateLimited, now);
            return Ok(());
        }

        let junction_id = self.layout.junction_id.clone();
        let group = chosen.direction.group();
        let index = telemetry.phase(&junction_id)?;
        let current = SignalPhase::from_index(index).ok_or(ControlError::InvalidPhaseIndex(index))?;

        if current == group.green_phase() {
            telemetry.set_signal_state(&junction_id, current.state_string())?;
            self.commit(&selection, group, current, now);
            self.record_applied(current, now);
            if let Some(episode) = self.episode.as_mut() {
                episode.green_started_at = Some(now);
            }
            self.transition(PreemptionState::PreemptionGreen, TransitionReason::FastPath, now);
            return Ok(());
        }

        if current.is_green() && adaptive.phase_elapsed(now) < self.config.safe_min_green {
            debug!(
                "Priority {}: holding {} for {} until safe minimum green",
                junction_id,
                current.label(),
                chosen.id
            );
            return Ok(());
        }

        let (applied, stage) = match current.movement_group() {
            Some(moving) => (
                moving.yellow_phase(),
                TransitionStage::Yellow {
                    until: now + adaptive.config().yellow,
                },
            ),
            None => (
                SignalPhase::AllRed,
                TransitionStage::AllRed {
                    until: now + adaptive.all_red_duration(),
                },
            ),
        };
        telemetry.set_signal_state(&junction_id, applied.state_string())?;
        self.commit(&selection, group, applied, now);
        self.record_applied(applied, now);
        self.transition(
            PreemptionState::SafeTransition { stage },
            TransitionReason::PhaseChangeRequired,
            now,
        );
        Ok(())
    }

    fn handle_safe_transition(
        &mut self,
        telemetry: &mut dyn Telemetry,
        adaptive: &AdaptiveController,
        stage: TransitionStage,
        now: f64,
    ) -> HandlerResult {
        if !self.verify_tracked(telemetry, now)? {
            self.begin_restore(adaptive, EpisodeOutcome::Cancelled, TransitionReason::FalsePositive, now);
            return Ok(());
        }
        let Some(group) = self.episode.as_ref().map(|e| e.group) else {
            self.begin_restore(adaptive, EpisodeOutcome::Cancelled, TransitionReason::FalsePositive, now);
            return Ok(());
        };
        let junction_id = self.layout.junction_id.clone();

        match stage {
            TransitionStage::Yellow { until } if now >= until => {
                telemetry.set_signal_state(&junction_id, SignalPhase::AllRed.state_string())?;
                self.record_applied(SignalPhase::AllRed, now);
                self.state = PreemptionState::SafeTransition {
                    stage: TransitionStage::AllRed {
                        until: now + adaptive.all_red_duration(),
                    },
                };
            }
            TransitionStage::AllRed { until } if now >= until => {
                let green = group.green_phase();
                telemetry.set_signal_state(&junction_id, green.state_string())?;
                self.record_applied(green, now);
                if let Some(episode) = self.episode.as_mut() {
                    episode.green_started_at = Some(now);
                }
                self.transition(
                    PreemptionState::PreemptionGreen,
                    TransitionReason::TransitionComplete,
                    now,
                );
            }
            _ => {}
        }
        Ok(())
    }

    fn handle_preemption_green(
        &mut self,
        telemetry: &mut dyn Telemetry,
        adaptive: &AdaptiveController,
        now: f64,
    ) -> HandlerResult {
        let Some((primary, ids)) = self
            .episode
            .as_ref()
            .map(|e| (e.primary.clone(), e.tracked.keys().cloned().collect::<Vec<_>>()))
        else {
            self.begin_restore(adaptive, EpisodeOutcome::Completed, TransitionReason::AllVehiclesCleared, now);
            return Ok(());
        };

        let mut cancel = false;
        let mut stalled = None;
        for id in ids {
            match self.check_vehicle(telemetry, &id) {
                Err(e) => {
                    warn!("Priority {}: vehicle {} unreadable: {}", self.layout.junction_id, id, e);
                }
                Ok(Verification::Departed) => {
                    if self.tracked(&id).is_some_and(|v| v.passed_junction) {
                        self.clear_vehicle(&id, now);
                    } else {
                        self.false_positive(&id, FalsePositiveReason::Disappeared, now);
                        cancel |= id == primary;
                    }
                }
                Ok(Verification::NotPriority) => {
                    self.false_positive(&id, FalsePositiveReason::NotPriorityClass, now);
                    cancel |= id == primary;
                }
                Ok(Verification::Present(snapshot)) => {
                    if self.track_through_green(&snapshot, now) {
                        stalled.get_or_insert(id);
                    }
                }
            }
        }

        if cancel {
            self.begin_restore(adaptive, EpisodeOutcome::Cancelled, TransitionReason::FalsePositive, now);
            return Ok(());
        }
        let Some(episode) = self.episode.as_ref() else {
            return Ok(());
        };
        if episode.tracked.is_empty() {
            self.begin_restore(adaptive, EpisodeOutcome::Completed, TransitionReason::AllVehiclesCleared, now);
            return Ok(());
        }
        if let Some(vehicle_id) = stalled {
            warn!(
                "Priority {}: {} stalled near the junction, holding green",
                self.layout.junction_id, vehicle_id
            );
            self.transition(
                PreemptionState::HoldPreemption { vehicle_id },
                TransitionReason::VehicleStalled,
                now,
            );
            return Ok(());
        }

        let green_elapsed = now - episode.green_started_at.unwrap_or(self.state_entered_at);
        if green_elapsed >= self.config.preemption_min_green {
            let nearest_approaching = episode
                .tracked
                .values()
                .filter(|v| !v.passed_junction)
                .map(|v| v.distance)
                .fold(f64::INFINITY, f64::min);
            if nearest_approaching >= self.config.hold_near_distance {
                // Vehicles already through the junction count as served.
                let passed: Vec<VehicleId> = episode
                    .tracked
                    .values()
                    .filter(|v| v.passed_junction)
                    .map(|v| v.id.clone())
                    .collect();
                for id in passed {
                    self.clear_vehicle(&id, now);
                }
                self.begin_restore(adaptive, EpisodeOutcome::Completed, TransitionReason::MinGreenReached, now);
            }
        }
        Ok(())
    }

    fn handle_hold(
        &mut self,
        telemetry: &mut dyn Telemetry,
        adaptive: &AdaptiveController,
        vehicle_id: &str,
        now: f64,
    ) -> HandlerResult {
        let held_for = now - self.state_entered_at;
        match self.check_vehicle(telemetry, vehicle_id)? {
            Verification::Departed => {
                self.clear_vehicle(vehicle_id, now);
                self.begin_restore(adaptive, EpisodeOutcome::Completed, TransitionReason::AllVehiclesCleared, now);
            }
            Verification::NotPriority => {
                self.false_positive(vehicle_id, FalsePositiveReason::NotPriorityClass, now);
                self.begin_restore(adaptive, EpisodeOutcome::Cancelled, TransitionReason::FalsePositive, now);
            }
            Verification::Present(snapshot) => {
                let distance = snapshot.position.distance(self.junction_position);
                let on_approach = self.on_own_approach(vehicle_id, &snapshot);
                if snapshot.speed > self.config.unstuck_speed {
                    info!(
                        "Priority {}: {} moving again after {:.1}s hold",
                        self.layout.junction_id, vehicle_id, held_for
                    );
                    self.begin_restore(adaptive, EpisodeOutcome::Completed, TransitionReason::VehicleUnstuck, now);
                } else if !on_approach && distance > self.config.clear_distance {
                    self.clear_vehicle(vehicle_id, now);
                    self.begin_restore(adaptive, EpisodeOutcome::Completed, TransitionReason::AllVehiclesCleared, now);
                } else if held_for > self.config.hold_timeout {
                    warn!(
                        "Priority {}: {} still stuck after {:.1}s, giving up (speed {:.1} m/s, {:.1} m out)",
                        self.layout.junction_id, vehicle_id, held_for, snapshot.speed, distance
                    );
                    self.failed.push(FailedPreemptionRecord {
                        vehicle_id: vehicle_id.to_string(),
                        hold_duration: held_for,
                        final_speed: snapshot.speed,
                        final_distance: distance,
                        time: now,
                    });
                    self.failed_total += 1;
                    self.events.push(SignalControlEvent::PreemptionFailed {
                        junction_id: self.layout.junction_id.clone(),
                        vehicle_id: vehicle_id.to_string(),
                        hold_duration: held_for,
                        time: now,
                    });
                    self.begin_restore(adaptive, EpisodeOutcome::Failed, TransitionReason::HoldTimeout, now);
                }
            }
        }
        Ok(())
    }

    /// Runs the tick after an episode ended: parked candidates get their turn.
    fn handle_restore(&mut self, now: f64) {
        if self.pending.is_empty() {
            self.transition(PreemptionState::Normal, TransitionReason::EpisodeComplete, now);
            return;
        }
        let pending = std::mem::take(&mut self.pending);
        debug!(
            "Priority {}: promoting {} pending candidate(s)",
            self.layout.junction_id,
            pending.len()
        );
        self.candidates.extend(pending);
        self.transition(PreemptionState::Detection, TransitionReason::PendingCandidates, now);
    }

    // -----------------------------------------------------------------------
    // Episode bookkeeping
    // -----------------------------------------------------------------------

    fn commit(&mut self, selection: &Arbitration, group: DirectionGroup, applied: SignalPhase, now: f64) {
        self.outbox.push(ControlMessage::Suspend);
        self.rate.record(now, &self.config);
        self.activations += 1;

        let mut tracked = BTreeMap::new();
        for id in std::iter::once(&selection.chosen).chain(selection.others.iter()) {
            if let Some(vehicle) = self.candidates.remove(id) {
                if vehicle.direction.group() == group {
                    tracked.insert(id.clone(), vehicle);
                } else {
                    debug!("Priority {}: {} parked pending", self.layout.junction_id, id);
                    self.pending.insert(id.clone(), vehicle);
                }
            }
        }
        self.candidates.clear();

        if let Some(primary) = tracked.get(&selection.chosen) {
            info!(
                "Priority {}: preempting for {} from {} ({:.0} m, ETA {:.1}s)",
                self.layout.junction_id,
                primary.id,
                primary.direction.label(),
                primary.distance,
                primary.eta
            );
        }
        self.episode = Some(Episode {
            primary: selection.chosen.clone(),
            group,
            committed_at: now,
            green_started_at: None,
            tracked,
            last_applied: applied,
        });
    }

    /// Ends the episode: credits debt from the pre-resume backlog report,
    /// then hands the junction back in whatever phase is applied.
    fn begin_restore(
        &mut self,
        adaptive: &AdaptiveController,
        outcome: EpisodeOutcome,
        reason: TransitionReason,
        now: f64,
    ) {
        if let Some(episode) = self.episode.take() {
            let duration = (now - episode.committed_at).max(0.0);
            let report = adaptive.backlog_report();
            let base = if self.emergency_mode_active() {
                self.config.emergency_compensation_base
            } else {
                self.config.compensation_base
            };
            // Only the directions of the group that lost green are owed time.
            // The preempted vehicle's own group kept green and is not
            // compensated, even its opposing approach.
            for d in episode.group.opposite().directions() {
                let bonus = match report[d].status {
                    BacklogStatus::Critical => self.config.critical_compensation_bonus,
                    BacklogStatus::Warning => self.config.warning_compensation_bonus,
                    BacklogStatus::Ok => 0.0,
                };
                let seconds = duration * (base + bonus);
                if seconds > 0.0 {
                    debug!(
                        "Priority {}: crediting {} {:.1}s ({})",
                        self.layout.junction_id,
                        d.label(),
                        seconds,
                        report[d].status.label()
                    );
                    self.outbox.push(ControlMessage::CreditGreenDebt { direction: d, seconds });
                }
            }
            self.outbox.push(ControlMessage::Resume {
                phase: episode.last_applied,
                at: now,
            });

            if let Some(green_at) = episode.green_started_at {
                self.handling_time_total += now - green_at;
                self.handled_episodes += 1;
            }
            self.completed_episodes += 1;
            if outcome == EpisodeOutcome::Completed {
                self.successful_episodes += 1;
            }
            info!(
                "Priority {}: preemption for {} ended ({:?}) after {:.1}s",
                self.layout.junction_id, episode.primary, outcome, duration
            );
        }
        self.transition(PreemptionState::Restore { outcome }, reason, now);
    }

    fn reject(&mut self, vehicle: &EmergencyVehicle, now: f64) {
        let in_window = self.rate.count_in_window(now, &self.config);
        warn!(
            "Priority {}: rejecting {} ({} preemption(s) in the last {:.0}s)",
            self.layout.junction_id, vehicle.id, in_window, self.config.rate_window
        );
        self.rejections.push(RejectionRecord {
            vehicle_id: vehicle.id.clone(),
            preemptions_in_window: in_window,
            time: now,
        });
        self.rejected_total += 1;
        self.events.push(SignalControlEvent::PreemptionRejected {
            junction_id: self.layout.junction_id.clone(),
            vehicle_id: vehicle.id.clone(),
            preemptions_in_window: in_window,
            time: now,
        });
        self.rejected_ids.insert(vehicle.id.clone());
        self.candidates.remove(&vehicle.id);
        self.confirmer.forget(&vehicle.id);
        self.activate_emergency_mode(now, now + self.config.emergency_mode_duration);
    }

    fn false_positive(&mut self, id: &str, reason: FalsePositiveReason, now: f64) {
        let stage = self.state.kind();
        warn!(
            "Priority {}: false positive {} in {} ({:?})",
            self.layout.junction_id,
            id,
            stage.label(),
            reason
        );
        self.false_positives.push(FalsePositiveRecord {
            vehicle_id: id.to_string(),
            stage,
            reason,
            time: now,
        });
        self.false_positive_total += 1;
        *self.false_positives_by_stage.entry(stage).or_default() += 1;
        *self.false_positives_by_reason.entry(reason).or_default() += 1;
        self.events.push(SignalControlEvent::FalsePositive {
            junction_id: self.layout.junction_id.clone(),
            vehicle_id: id.to_string(),
            stage,
            reason,
            time: now,
        });
        self.candidates.remove(id);
        self.confirmer.forget(id);
        if let Some(episode) = self.episode.as_mut() {
            episode.tracked.remove(id);
        }
    }

    fn clear_vehicle(&mut self, id: &str, now: f64) {
        let Some(vehicle) = self.episode.as_mut().and_then(|e| e.tracked.remove(id)) else {
            return;
        };
        let clearance_time = now - vehicle.first_detected_at;
        let band = self.clearance.record(clearance_time, &self.config);
        self.vehicles_served += 1;
        self.confirmer.forget(id);
        info!(
            "Priority {}: {} cleared in {:.1}s ({})",
            self.layout.junction_id,
            id,
            clearance_time,
            band.label()
        );
        self.events.push(SignalControlEvent::VehicleCleared {
            junction_id: self.layout.junction_id.clone(),
            vehicle_id: id.to_string(),
            clearance_time,
            band,
            time: now,
        });
    }

    // -----------------------------------------------------------------------
    // Emergency mode
    // -----------------------------------------------------------------------

    /// Enters (or extends) emergency mode, which tightens the adaptive
    /// envelope and lowers post-preemption compensation.
    pub fn activate_emergency_mode(&mut self, now: f64, until: f64) {
        match self.emergency_until {
            Some(current) => self.emergency_until = Some(current.max(until)),
            None => {
                self.emergency_until = Some(until);
                self.emergency_activations += 1;
                info!(
                    "Priority {}: emergency mode on until t={:.1}",
                    self.layout.junction_id, until
                );
                self.outbox.push(ControlMessage::EnterEmergencyEnvelope);
                self.events.push(SignalControlEvent::EmergencyModeChanged {
                    junction_id: self.layout.junction_id.clone(),
                    active: true,
                    time: now,
                });
            }
        }
    }

    fn expire_emergency_mode(&mut self, now: f64) {
        if self.emergency_until.is_some_and(|until| now >= until) {
            self.emergency_until = None;
            info!("Priority {}: emergency mode off", self.layout.junction_id);
            self.outbox.push(ControlMessage::RestoreNormalEnvelope);
            self.events.push(SignalControlEvent::EmergencyModeChanged {
                junction_id: self.layout.junction_id.clone(),
                active: false,
                time: now,
            });
        }
    }

    // -----------------------------------------------------------------------
    // Observation
    // -----------------------------------------------------------------------

    /// Registers priority vehicles inside the detection radius and drops
    /// candidates that were not seen this tick.
    fn scan(&mut self, telemetry: &dyn Telemetry, now: f64) -> TelemetryResult<()> {
        let mut seen = BTreeSet::new();
        for id in telemetry.vehicle_ids()? {
            let snapshot = match observe_vehicle(telemetry, &id) {
                Ok(Some(snapshot)) => snapshot,
                Ok(None) => continue,
                Err(e) => {
                    debug!("Priority {}: skipping {} this scan: {}", self.layout.junction_id, id, e);
                    seen.insert(id);
                    continue;
                }
            };
            if !snapshot.priority {
                if self.candidates.get(&id).is_some_and(|v| v.confirmed) {
                    self.false_positive(&id, FalsePositiveReason::NotPriorityClass, now);
                }
                continue;
            }
            let distance = snapshot.position.distance(self.junction_position);
            if distance > self.config.detection_radius {
                self.rejected_ids.remove(&id);
                continue;
            }
            if self.rejected_ids.contains(&id) {
                continue;
            }
            let Some(direction) = self.layout.direction_of_road(&snapshot.road) else {
                continue;
            };

            let confirmed = self.confirmer.record(&id, now, &self.config);
            let vehicle = self
                .candidates
                .entry(id.clone())
                .or_insert_with(|| EmergencyVehicle::detected(&snapshot, direction, distance, now));
            vehicle.observe(&snapshot, distance, now);
            if confirmed && !vehicle.confirmed {
                vehicle.confirmed = true;
                info!(
                    "Priority {}: {} confirmed from {} ({:.0} m, ETA {:.1}s)",
                    self.layout.junction_id,
                    id,
                    direction.label(),
                    distance,
                    vehicle.eta
                );
            }
            seen.insert(id);
        }

        let unseen: Vec<VehicleId> = self
            .candidates
            .keys()
            .filter(|id| !seen.contains(*id))
            .cloned()
            .collect();
        for id in unseen {
            let confirmed = self.candidates.get(&id).is_some_and(|v| v.confirmed);
            if confirmed && matches!(observe_vehicle(telemetry, &id), Ok(None)) {
                self.false_positive(&id, FalsePositiveReason::Disappeared, now);
            } else {
                self.candidates.remove(&id);
                self.confirmer.forget(&id);
            }
        }
        Ok(())
    }

    fn check_vehicle(&self, telemetry: &dyn Telemetry, id: &str) -> TelemetryResult<Verification> {
        Ok(match observe_vehicle(telemetry, id)? {
            None => Verification::Departed,
            Some(snapshot) if !snapshot.priority => Verification::NotPriority,
            Some(snapshot) => Verification::Present(snapshot),
        })
    }

    /// Re-verifies every escorted vehicle. Returns false when the primary
    /// vehicle failed verification and the episode must be cancelled.
    fn verify_tracked(&mut self, telemetry: &dyn Telemetry, now: f64) -> TelemetryResult<bool> {
        let Some((primary, ids)) = self
            .episode
            .as_ref()
            .map(|e| (e.primary.clone(), e.tracked.keys().cloned().collect::<Vec<_>>()))
        else {
            return Ok(false);
        };
        let mut primary_ok = true;
        for id in ids {
            let reason = match self.check_vehicle(telemetry, &id)? {
                Verification::Present(snapshot) => {
                    let distance = snapshot.position.distance(self.junction_position);
                    if let Some(vehicle) = self.episode.as_mut().and_then(|e| e.tracked.get_mut(&id)) {
                        vehicle.observe(&snapshot, distance, now);
                    }
                    continue;
                }
                Verification::Departed => FalsePositiveReason::Disappeared,
                Verification::NotPriority => FalsePositiveReason::NotPriorityClass,
            };
            self.false_positive(&id, reason, now);
            primary_ok &= id != primary;
        }
        Ok(primary_ok)
    }

    /// Updates one escorted vehicle during the preemption green. Clears it
    /// once it is past the junction, and returns true when it has been
    /// stalled on its approach for longer than the grace period.
    fn track_through_green(&mut self, snapshot: &VehicleSnapshot, now: f64) -> bool {
        let distance = snapshot.position.distance(self.junction_position);
        let on_approach = self.on_own_approach(&snapshot.id, snapshot);
        let config = &self.config;
        let Some(vehicle) = self
            .episode
            .as_mut()
            .and_then(|e| e.tracked.get_mut(&snapshot.id))
        else {
            return false;
        };
        vehicle.observe(snapshot, distance, now);
        if !on_approach {
            vehicle.passed_junction = true;
        }

        if vehicle.passed_junction && distance > config.clear_distance {
            let id = snapshot.id.clone();
            self.clear_vehicle(&id, now);
            return false;
        }

        if on_approach && snapshot.speed < config.stuck_speed {
            let since = *vehicle.stalled_since.get_or_insert(now);
            now - since >= config.stuck_grace
        } else {
            vehicle.stalled_since = None;
            false
        }
    }

    fn on_own_approach(&self, id: &str, snapshot: &VehicleSnapshot) -> bool {
        let direction = self.tracked(id).map(|v| v.direction);
        direction.is_some() && self.layout.direction_of_road(&snapshot.road) == direction
    }

    fn tracked(&self, id: &str) -> Option<&EmergencyVehicle> {
        self.episode.as_ref().and_then(|e| e.tracked.get(id))
    }

    /// Remembers a phase this controller wrote and reports it to the
    /// adaptive controller, which keeps the junction's phase log.
    fn record_applied(&mut self, phase: SignalPhase, now: f64) {
        if let Some(episode) = self.episode.as_mut() {
            episode.last_applied = phase;
        }
        self.outbox.push(ControlMessage::PhaseApplied { phase, at: now });
    }

    fn transition(&mut self, to: PreemptionState, reason: TransitionReason, now: f64) {
        let from = self.state.kind();
        let to_kind = to.kind();
        debug!(
            "Priority {}: {} -> {} ({:?})",
            self.layout.junction_id,
            from.label(),
            to_kind.label(),
            reason
        );
        self.transitions.push(TransitionRecord {
            from,
            to: to_kind,
            reason,
            time: now,
        });
        self.transition_total += 1;
        self.events.push(SignalControlEvent::PreemptionStateChanged {
            junction_id: self.layout.junction_id.clone(),
            from,
            to: to_kind,
            reason,
            time: now,
        });
        self.state = to;
        self.state_entered_at = now;
    }

    // -----------------------------------------------------------------------
    // Accessors
    // -----------------------------------------------------------------------

    pub fn junction_id(&self) -> &str {
        &self.layout.junction_id
    }

    pub fn config(&self) -> &PriorityConfig {
        &self.config
    }

    pub fn state(&self) -> &PreemptionState {
        &self.state
    }

    pub fn state_kind(&self) -> PreemptionStateKind {
        self.state.kind()
    }

    pub fn is_running(&self) -> bool {
        self.running
    }

    pub fn emergency_mode_active(&self) -> bool {
        self.emergency_until.is_some()
    }

    pub fn candidate(&self, id: &str) -> Option<&EmergencyVehicle> {
        self.candidates.get(id)
    }

    pub fn candidates(&self) -> impl Iterator<Item = &EmergencyVehicle> {
        self.candidates.values()
    }

    pub fn pending_ids(&self) -> impl Iterator<Item = &VehicleId> {
        self.pending.keys()
    }

    /// Vehicle the running episode was committed for.
    pub fn active_vehicle(&self) -> Option<&VehicleId> {
        self.episode.as_ref().map(|e| &e.primary)
    }

    pub fn escorted_ids(&self) -> impl Iterator<Item = &VehicleId> {
        self.episode.iter().flat_map(|e| e.tracked.keys())
    }

    pub fn false_positive_records(&self) -> impl Iterator<Item = &FalsePositiveRecord> {
        self.false_positives.iter()
    }

    pub fn failed_records(&self) -> impl Iterator<Item = &FailedPreemptionRecord> {
        self.failed.iter()
    }

    pub fn rejection_records(&self) -> impl Iterator<Item = &RejectionRecord> {
        self.rejections.iter()
    }

    pub fn transition_records(&self) -> impl Iterator<Item = &TransitionRecord> {
        self.transitions.iter()
    }

    pub fn get_status(&self) -> PriorityStatus {
        let now = self.clock;
        let escorted = self.episode.as_ref().map_or(0, |e| e.tracked.len());
        PriorityStatus {
            junction_id: self.layout.junction_id.clone(),
            state: self.state.kind(),
            state_elapsed: (now - self.state_entered_at).max(0.0),
            running: self.running,
            detected_count: self.candidates.len() + escorted,
            confirmed_count: self.candidates.values().filter(|v| v.confirmed).count() + escorted,
            pending_count: self.pending.len(),
            served_count: self.vehicles_served,
            active_vehicle: self.active_vehicle().cloned(),
            preemptions_in_last_minute: self.rate.count_in_window(now, &self.config),
            can_activate_preemption: self.rate.can_activate(now, &self.config),
            emergency_mode: self.emergency_mode_active(),
            total_transitions: self.transition_total,
        }
    }

    pub fn get_statistics(&self) -> PriorityStatistics {
        let ratio = |num: f64, den: u64| if den == 0 { 0.0 } else { num / den as f64 };
        PriorityStatistics {
            activations: self.activations,
            vehicles_served: self.vehicles_served,
            successful_episodes: self.successful_episodes,
            completed_episodes: self.completed_episodes,
            success_rate: ratio(self.successful_episodes as f64, self.completed_episodes),
            average_handling_time: ratio(self.handling_time_total, self.handled_episodes),
            false_positives: self.false_positive_total,
            false_positives_by_stage: self.false_positives_by_stage.clone(),
            false_positives_by_reason: self.false_positives_by_reason.clone(),
            failed_preemptions: self.failed_total,
            rejected_vehicles: self.rejected_total,
            emergency_mode_activations: self.emergency_activations,
            clearance: self.clearance.summary(),
        }
    }

    pub(crate) fn drain_outbox(&mut self) -> Vec<ControlMessage> {
        std::mem::take(&mut self.outbox)
    }

    pub(crate) fn drain_events(&mut self) -> Vec<SignalControlEvent> {
        std::mem::take(&mut self.events)
    }
}
