//! Per-agent workers and the tick barrier that drives them.
//!
//! ```text
//! TickDriver → TickCoordinator::run_tick(snapshot)
//!   ├─ TickEnvelope (single slot, overwritten) → AgentWorker × N
//!   │   └─ AgentReport → completion channel
//!   └─ TickReport → ArenaLink::send_commands
//! ```
//!
//! Each worker owns its controller outright. The only state shared between
//! agents is the occupancy grid, behind its own lock.

mod coordinator;
mod worker;

pub use coordinator::TickCoordinator;
pub use worker::{AgentStatus, AgentWorker};
