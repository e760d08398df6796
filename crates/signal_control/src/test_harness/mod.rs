//! # TestNetwork: headless test harness for the signal controllers
//!
//! [`ScriptedSimulation`] is an in-memory simulator implementing
//! [`Telemetry`](crate::telemetry::Telemetry); controllers can be driven
//! against it directly. [`TestNetwork`] wraps a headless `bevy::app::App` with
//! `SignalControlPlugin` on top of a shared scripted simulation, and
//! [`RandomTraffic`] feeds either with seeded arrivals.

mod random_traffic;
mod scripted_simulation;

use std::sync::MutexGuard;

use bevy::app::App;
use bevy::prelude::*;

use crate::config::SignalControlConfig;
use crate::events::{SignalControlEvent, SignalEventJournal};
use crate::junction::JunctionControl;
use crate::network::{SignalNetwork, SignalNetworkSummary, TelemetryLink};
use crate::plugin::SignalControlPlugin;

pub use random_traffic::RandomTraffic;
pub use scripted_simulation::{
    named_layout, standard_layout, ScriptedJunction, ScriptedSimulation, ScriptedVehicle,
    SharedSimulation, STANDARD_ROADS,
};

/// Default tick length in simulated seconds.
pub const DEFAULT_DT: f64 = 0.5;

/// A headless Bevy App running `SignalControlPlugin` against a scripted
/// simulation.
///
/// Each `tick()` advances the simulation clock by `dt` and runs the
/// `FixedUpdate` schedule once, so one tick is exactly one controller step.
pub struct TestNetwork {
    app: App,
    sim: SharedSimulation,
    dt: f64,
}

impl TestNetwork {
    // -----------------------------------------------------------------------
    // Constructors
    // -----------------------------------------------------------------------

    /// Adaptive-only control at every junction of `sim`.
    pub fn adaptive(sim: ScriptedSimulation) -> Self {
        Self::build(sim, SignalControlConfig::default(), false)
    }

    /// Adaptive plus priority control at every junction of `sim`.
    pub fn with_priority(sim: ScriptedSimulation) -> Self {
        Self::build(sim, SignalControlConfig::default(), true)
    }

    pub fn build(sim: ScriptedSimulation, config: SignalControlConfig, with_priority: bool) -> Self {
        let network = SignalNetwork::with_junctions(config, sim.layouts(), with_priority);
        Self::from_network(sim, network)
    }

    pub fn from_network(sim: ScriptedSimulation, network: SignalNetwork) -> Self {
        let sim = SharedSimulation::new(sim);
        let mut app = App::new();
        app.add_plugins(MinimalPlugins);
        app.add_plugins(SignalControlPlugin);
        app.insert_resource(network);
        app.insert_resource(TelemetryLink::new(sim.clone()));
        app.finish();
        app.cleanup();
        Self {
            app,
            sim,
            dt: DEFAULT_DT,
        }
    }

    pub fn with_dt(mut self, dt: f64) -> Self {
        self.dt = dt;
        self
    }

    // -----------------------------------------------------------------------
    // Ticking
    // -----------------------------------------------------------------------

    /// Advances the simulation by `n` ticks, stepping the network after each.
    pub fn tick(&mut self, n: u32) {
        for _ in 0..n {
            self.sim.lock().advance(self.dt);
            self.app.world_mut().run_schedule(FixedUpdate);
        }
    }

    /// Ticks until at least `seconds` of simulated time have passed.
    pub fn run_for(&mut self, seconds: f64) {
        let ticks = (seconds / self.dt).ceil() as u32;
        self.tick(ticks);
    }

    /// Ticks until `predicate` holds, for at most `max_ticks`. Returns whether
    /// it held.
    pub fn tick_until(&mut self, max_ticks: u32, mut predicate: impl FnMut(&Self) -> bool) -> bool {
        for _ in 0..max_ticks {
            if predicate(self) {
                return true;
            }
            self.tick(1);
        }
        predicate(self)
    }

    // -----------------------------------------------------------------------
    // Access
    // -----------------------------------------------------------------------

    /// Scripting access to the simulation. Drop the guard before ticking.
    pub fn sim(&self) -> MutexGuard<'_, ScriptedSimulation> {
        self.sim.lock()
    }

    pub fn time(&self) -> f64 {
        self.sim.lock().time()
    }

    pub fn network(&self) -> &SignalNetwork {
        self.resource::<SignalNetwork>()
    }

    pub fn junction(&self, junction_id: &str) -> &JunctionControl {
        match self.network().junction(junction_id) {
            Some(junction) => junction,
            None => panic!("no junction '{junction_id}' in the test network"),
        }
    }

    pub fn summary(&self) -> &SignalNetworkSummary {
        self.resource::<SignalNetworkSummary>()
    }

    pub fn journal(&self) -> &SignalEventJournal {
        self.resource::<SignalEventJournal>()
    }

    /// Journal entries matching `filter`, oldest first.
    pub fn journal_events(&self, filter: impl Fn(&SignalControlEvent) -> bool) -> Vec<SignalControlEvent> {
        self.journal().iter().filter(|e| filter(e)).cloned().collect()
    }

    pub fn resource<T: Resource>(&self) -> &T {
        self.app.world().resource::<T>()
    }

    pub fn world_mut(&mut self) -> &mut World {
        self.app.world_mut()
    }
}
