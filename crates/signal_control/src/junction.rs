//! One signalized junction: an adaptive controller, optionally wrapped by a
//! priority controller.

use serde::Serialize;

use crate::adaptive_control::{AdaptiveController, AdaptiveStatus};
use crate::config::SignalControlConfig;
use crate::control_error::ControlError;
use crate::direction::JunctionLayout;
use crate::events::SignalControlEvent;
use crate::priority_control::{PriorityController, PriorityStatus};
use crate::telemetry::Telemetry;

/// Startup state of a junction inside a network.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum JunctionLifecycle {
    /// Not started yet, or the simulator was not ready on the last attempt.
    Pending,
    Running,
    /// Startup failed permanently (e.g. unknown junction id).
    Failed(String),
    Stopped,
}

pub struct JunctionControl {
    adaptive: AdaptiveController,
    priority: Option<PriorityController>,
    lifecycle: JunctionLifecycle,
}

impl JunctionControl {
    pub fn new(layout: JunctionLayout, config: &SignalControlConfig, with_priority: bool) -> Self {
        let priority = with_priority.then(|| PriorityController::new(layout.clone(), config.priority.clone()));
        Self {
            adaptive: AdaptiveController::new(layout, config.adaptive.clone()),
            priority,
            lifecycle: JunctionLifecycle::Pending,
        }
    }

    /// Starts both controllers. On failure neither is left running.
    pub fn start(&mut self, telemetry: &mut dyn Telemetry) -> Result<(), ControlError> {
        let result = self.start_controllers(telemetry);
        match &result {
            Ok(()) => self.lifecycle = JunctionLifecycle::Running,
            Err(ControlError::ControllerNotReady) => {
                self.adaptive.stop();
                self.lifecycle = JunctionLifecycle::Pending;
            }
            Err(e) => {
                self.adaptive.stop();
                self.lifecycle = JunctionLifecycle::Failed(e.to_string());
            }
        }
        result
    }

    fn start_controllers(&mut self, telemetry: &mut dyn Telemetry) -> Result<(), ControlError> {
        self.adaptive.start(telemetry)?;
        if let Some(priority) = self.priority.as_mut() {
            priority.start(telemetry)?;
        }
        Ok(())
    }

    pub fn stop(&mut self) {
        if let Some(priority) = self.priority.as_mut() {
            priority.stop();
        }
        self.deliver_messages();
        self.adaptive.stop();
        if self.lifecycle == JunctionLifecycle::Running {
            self.lifecycle = JunctionLifecycle::Stopped;
        }
    }

    /// One tick: the adaptive controller samples the approaches, the priority
    /// controller decides, its messages are applied, then the adaptive
    /// controller takes its turn.
    pub fn step(&mut self, telemetry: &mut dyn Telemetry) {
        self.adaptive.sense(telemetry);
        if let Some(priority) = self.priority.as_mut() {
            priority.step(telemetry, &self.adaptive);
        }
        self.deliver_messages();
        self.adaptive.step(telemetry);
    }

    /// Puts the junction in emergency mode until `until`, as part of a
    /// network-wide activation.
    pub fn enter_emergency_mode(&mut self, now: f64, until: f64) {
        match self.priority.as_mut() {
            Some(priority) => {
                priority.activate_emergency_mode(now, until);
                self.deliver_messages();
            }
            None => self.adaptive.set_emergency_params(),
        }
    }

    /// Ends a network-wide emergency window at a junction without a
    /// priority controller; priority controllers expire their own.
    pub fn restore_normal_envelope(&mut self) {
        if self.priority.is_none() {
            self.adaptive.restore_normal_params();
        }
    }

    fn deliver_messages(&mut self) {
        if let Some(priority) = self.priority.as_mut() {
            for message in priority.drain_outbox() {
                self.adaptive.receive(message);
            }
        }
    }

    pub fn drain_events(&mut self) -> Vec<SignalControlEvent> {
        let mut events = self.priority.as_mut().map(|p| p.drain_events()).unwrap_or_default();
        events.extend(self.adaptive.drain_events());
        events
    }

    pub fn junction_id(&self) -> &str {
        self.adaptive.junction_id()
    }

    pub fn adaptive(&self) -> &AdaptiveController {
        &self.adaptive
    }

    pub fn priority(&self) -> Option<&PriorityController> {
        self.priority.as_ref()
    }

    pub fn lifecycle(&self) -> &JunctionLifecycle {
        &self.lifecycle
    }

    pub fn is_running(&self) -> bool {
        self.lifecycle == JunctionLifecycle::Running
    }

    pub fn status(&self) -> JunctionStatus {
        JunctionStatus {
            junction_id: self.junction_id().to_string(),
            lifecycle: self.lifecycle.clone(),
            adaptive: self.adaptive.get_status(),
            priority: self.priority.as_ref().map(|p| p.get_status()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct JunctionStatus {
    pub junction_id: String,
    pub lifecycle: JunctionLifecycle,
    pub adaptive: AdaptiveStatus,
    pub priority: Option<PriorityStatus>,
}
