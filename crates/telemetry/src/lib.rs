//! Telemetry for the RVM controller.
//!
//! Two halves: a broadcast [`TelemetryBus`] carrying typed events to
//! whoever is listening (operator API, logs), and a [`TelemetryTracker`]
//! holding the bin flags and detection/cycle counters operators query.

pub mod bus;
pub mod event;
pub mod tracker;

pub use bus::TelemetryBus;
pub use event::{DeviceState, DiagnosticsReport, Screen, StatusSnapshot, TelemetryEvent};
pub use tracker::{BinStatus, CycleTiming, DetectionStats, TelemetryTracker};
