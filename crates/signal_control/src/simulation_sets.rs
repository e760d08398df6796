//! Per-tick ordering of the signal control systems via `SystemSet` phases.
//!
//! ```text
//! Sense  →  Control  →  Report
//! ```
//!
//! * **Sense** – Start junctions still waiting for the simulator link.
//! * **Control** – Step every junction in a fixed order and publish events.
//! * **Report** – Read-only aggregation for dashboards that poll.

use bevy::prelude::*;

/// Ordered phases for systems running in the `FixedUpdate` schedule.
///
/// Configured as a chain by `SignalControlPlugin`.
#[derive(SystemSet, Debug, Clone, PartialEq, Eq, Hash)]
pub enum SignalSet {
    Sense,
    Control,
    Report,
}
