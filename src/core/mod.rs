//! Core functionality for the link coordinator
//! This module contains the adapter state machines and the simulated
//! controllers they can be driven against.

pub mod bluetooth;
pub mod simulation;

// Re-export commonly used types
pub use bluetooth::{AdapterHandle, LinkCoordinator};
pub use simulation::{SimulatedController, SimulatedEnumerator, VirtualAir};
