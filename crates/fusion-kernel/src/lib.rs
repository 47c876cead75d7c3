//! Fusion Kernel: Occupancy Mapping, Adversary Tracking and Potential-Field Control
//!
//! This crate runs a team of arena tanks in lock-step ticks. Each tick every
//! tank folds noisy sensor sweeps into a shared Bayesian occupancy grid,
//! tracks an adversary with a constant-acceleration Kalman filter, and steers
//! along the sum of attractive, repulsive and tangential potential fields.

pub mod actors;
pub mod arena;
pub mod behavior;
pub mod config;
pub mod controller;
pub mod driver;
pub mod field;
pub mod grid;
pub mod history;
pub mod kalman;
pub mod kernel;
pub mod messages;
pub mod steering;

pub use actors::TickCoordinator;
pub use arena::{ArenaLink, Command, Observation, SensorSweep, Snapshot, StaticConfig};
pub use behavior::{Arbiter, GoalKind};
pub use config::{FirePolicy, FusionConfig};
pub use controller::{AgentController, Controller};
pub use driver::TickDriver;
pub use field::{Rotation, VectorField};
pub use grid::{CellClass, CellIndex, OccupancyGrid, SharedGrid};
pub use kalman::{KalmanTracker, TrackState};
pub use kernel::{FusionKernel, FusionKernelBuilder, TickReport};
pub use messages::FieldPlot;
