//! Arena Sim: a simulated capture-the-flag arena for the fusion kernel.
//!
//! This crate provides:
//! - An in-process world that implements the kernel's arena link
//! - A match runner that drives the kernel against it tick by tick
//! - Run summaries with map accuracy and combat statistics

pub mod runner;
pub mod sim;
pub mod summary;

pub use runner::run_match;
pub use sim::{ArenaStats, SimConfig, SimulatedArena};
pub use summary::{RunSummary, TickMetrics};
