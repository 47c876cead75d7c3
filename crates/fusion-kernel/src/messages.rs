//! Messages exchanged between the coordinator and its agent workers.

use std::sync::Arc;

use nalgebra::{Point2, Vector2};
use serde::Serialize;

use crate::arena::{Command, Snapshot};
use crate::field::VectorField;

/// One tick's input, dropped into every worker's single-slot mailbox.
///
/// The snapshot is shared read-only between workers.
#[derive(Debug, Clone)]
pub struct TickEnvelope {
    /// Monotonic tick number assigned by the coordinator
    pub tick: u64,
    pub snapshot: Arc<Snapshot>,
}

/// A worker's answer for one tick.
#[derive(Debug, Clone)]
pub struct AgentReport {
    /// Tick the command was computed for
    pub tick: u64,
    pub agent: usize,
    pub command: Command,
}

/// The field set one controller evaluated on its most recent tick.
#[derive(Debug, Clone, Serialize)]
pub struct FieldPlot {
    pub agent: usize,
    /// Snapshot clock the fields were built for
    pub tick_time: f64,
    /// Tank position the fields were evaluated at
    pub position: Point2<f64>,
    pub fields: Vec<VectorField>,
    /// Sum of all fields at `position`
    pub net_force: Vector2<f64>,
}
