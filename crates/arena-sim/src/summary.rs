//! Run summaries for simulated matches.
//!
//! Captures metrics like:
//! - Exploring agents and late agents per tick
//! - Final map composition and its accuracy against ground truth
//! - Shots, kills and flag captures

use std::path::Path;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::Serialize;

use fusion_kernel::grid::{CellClass, CellIndex, ClassCounts, OccupancyGrid};
use fusion_kernel::{FusionConfig, TickReport};

use crate::sim::{ArenaStats, SimConfig, SimulatedArena};

/// Metrics for a single tick.
#[derive(Debug, Clone, Serialize)]
pub struct TickMetrics {
    pub tick: u64,
    pub elapsed_s: f64,
    pub exploring: usize,
    pub late_agents: usize,
    /// Agents asked to fire
    pub firing: usize,
}

impl From<&TickReport> for TickMetrics {
    fn from(report: &TickReport) -> Self {
        Self {
            tick: report.tick,
            elapsed_s: report.elapsed_s,
            exploring: report.exploring,
            late_agents: report.late_agents.len(),
            firing: report.commands.iter().filter(|c| c.fire).count(),
        }
    }
}

/// Results from a single simulated match.
#[derive(Debug, Clone, Serialize)]
pub struct RunSummary {
    pub sim: SimConfig,
    /// Kernel configuration after arena overrides
    pub fusion: FusionConfig,
    pub started_at: DateTime<Utc>,
    pub ended_at: DateTime<Utc>,
    pub ticks: u64,
    /// Ticks where at least one agent missed the deadline
    pub late_ticks: usize,
    pub final_counts: ClassCounts,
    /// Fraction of classified cells that match the true map
    pub map_accuracy: Option<f64>,
    pub arena: ArenaStats,
    pub tick_metrics: Vec<TickMetrics>,
}

impl RunSummary {
    /// Fraction of the grid no longer unknown.
    pub fn explored_fraction(&self) -> f64 {
        let c = &self.final_counts;
        let total = c.free + c.obstacle + c.unknown;
        if total == 0 {
            return 0.0;
        }
        (c.free + c.obstacle) as f64 / total as f64
    }

    /// Save as pretty JSON.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(path, json).with_context(|| format!("writing {}", path.display()))?;
        Ok(())
    }
}

/// Share of Free/Obstacle cells whose class agrees with the true map at the
/// cell center. `None` while nothing has been classified.
pub fn map_accuracy(grid: &OccupancyGrid, arena: &SimulatedArena) -> Option<f64> {
    let mut classified = 0usize;
    let mut correct = 0usize;
    for i in 0..grid.width() {
        for j in 0..grid.height() {
            let index = CellIndex::new(i, j);
            let truth = {
                let center = grid.cell_center(index);
                arena.is_obstacle(center.x, center.y)
            };
            match grid.class(index) {
                Some(CellClass::Obstacle) => {
                    classified += 1;
                    correct += usize::from(truth);
                }
                Some(CellClass::Free) => {
                    classified += 1;
                    correct += usize::from(!truth);
                }
                _ => {}
            }
        }
    }
    (classified > 0).then(|| correct as f64 / classified as f64)
}
