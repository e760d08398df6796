pub mod adaptive_control;
pub mod config;
pub mod control_error;
pub mod direction;
pub mod events;
pub mod junction;
pub mod network;
pub mod plugin;
pub mod priority_control;
pub mod rolling_history;
pub mod simulation_sets;
pub mod telemetry;

#[cfg(any(test, feature = "bench"))]
pub mod test_harness;

pub use config::{AdaptiveConfig, ConfigError, PriorityConfig, SignalControlConfig};
pub use control_error::ControlError;
pub use direction::{Direction, DirectionGroup, DirectionTable, JunctionLayout, SignalPhase};
pub use events::{SignalControlEvent, SignalEventJournal};
pub use junction::{JunctionControl, JunctionLifecycle, JunctionStatus};
pub use network::{SignalNetwork, SignalNetworkSummary, TelemetryLink};
pub use plugin::SignalControlPlugin;
pub use simulation_sets::SignalSet;
pub use telemetry::{Telemetry, TelemetryError, TelemetryResult, VehicleClass, VehicleId};
