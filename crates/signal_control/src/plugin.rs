//! Plugin registration and the systems that drive the signal network.

use bevy::prelude::*;

use crate::events::{SignalControlEvent, SignalEventJournal};
use crate::network::{SignalNetwork, SignalNetworkSummary, TelemetryLink};
use crate::simulation_sets::SignalSet;

/// Steps every junction of the [`SignalNetwork`] once per `FixedUpdate`.
///
/// The host inserts the network and a [`TelemetryLink`]. Until a link is
/// present the systems do nothing.
pub struct SignalControlPlugin;

impl Plugin for SignalControlPlugin {
    fn build(&self, app: &mut App) {
        app.init_resource::<SignalNetwork>()
            .init_resource::<SignalEventJournal>()
            .init_resource::<SignalNetworkSummary>()
            .add_event::<SignalControlEvent>()
            .configure_sets(
                FixedUpdate,
                (SignalSet::Sense, SignalSet::Control, SignalSet::Report).chain(),
            )
            .add_systems(FixedUpdate, start_pending_junctions.in_set(SignalSet::Sense))
            .add_systems(FixedUpdate, step_signal_network.in_set(SignalSet::Control))
            .add_systems(FixedUpdate, update_network_summary.in_set(SignalSet::Report));
    }
}

pub fn start_pending_junctions(
    link: Option<ResMut<TelemetryLink>>,
    mut network: ResMut<SignalNetwork>,
) {
    let Some(mut link) = link else {
        return;
    };
    network.start_pending(link.0.as_mut());
}

pub fn step_signal_network(
    link: Option<ResMut<TelemetryLink>>,
    mut network: ResMut<SignalNetwork>,
    mut journal: ResMut<SignalEventJournal>,
    mut events: EventWriter<SignalControlEvent>,
) {
    let Some(mut link) = link else {
        return;
    };
    for event in network.step(link.0.as_mut()) {
        journal.record(event.clone());
        events.send(event);
    }
}

pub fn update_network_summary(network: Res<SignalNetwork>, mut summary: ResMut<SignalNetworkSummary>) {
    *summary = network.summary();
}
