//! # RVM Core
//!
//! Domain types, traits, and error definitions for the reverse-vending-machine
//! controller. This crate has **no I/O** — it defines the domain model that
//! the controller, the hardware adapters and the operator API implement
//! against.
//!
//! ## Design Philosophy
//!
//! Every hardware seam is defined as a trait or a plain data type here.
//! Implementations live in their respective crates. This enables:
//! - Swapping the local-API transport for a scripted one in tests
//! - Driving the controller from any ingress (HTTP, bus bridge, CLI)
//! - Clean dependency graph (all crates depend inward on core)

pub mod command;
pub mod cycle;
pub mod error;
pub mod hardware;
pub mod material;
pub mod session;

// Re-export key types at crate root for ergonomics
pub use command::{BinReset, OperatorCommand};
pub use cycle::{Classification, CyclePhase, WeightReading};
pub use error::{Error, HardwareError, Result};
pub use hardware::{
    BeltMotion, HardwareChannel, HardwareCommand, HardwareEvent, HardwareGateway, ModuleId,
    SorterPosition,
};
pub use material::{BinKind, Material};
pub use session::{MemberInfo, Session, SessionKind, SessionStart, TimeoutReason};
