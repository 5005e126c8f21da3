//! RVM controller — the session manager and item-cycle state machine.
//!
//! A single [`Controller`] owns all run state and processes one [`Input`]
//! at a time: hardware events, operator commands and its own timers.
//! Everything else talks to it through a cloneable [`ControllerHandle`].
//!
//! ```text
//! event feed ─┐
//! operator  ──┼──▶ mpsc<Input> ──▶ Controller ──▶ HardwareGateway
//! timers    ──┘                        │
//!                                      └──▶ TelemetryBus
//! ```

mod compactor;
mod context;
mod cycle;
mod dispatcher;
mod handle;
mod hardware;
pub mod input;
mod session;
pub mod timers;

pub use dispatcher::Controller;
pub use handle::ControllerHandle;
pub use input::{CommandOutcome, Input};
pub use timers::TimerKind;
