//! TickDriver: the outer loop that feeds the coordinator from the arena.

use std::sync::Arc;

use anyhow::{Context, Result};
use tracing::{debug, info};

use crate::arena::ArenaLink;
use crate::grid::SharedGrid;
use crate::kernel::{FusionKernel, TickReport};

/// Pulls one snapshot per tick, runs it through the coordinator and sends the
/// resulting batch back to the arena.
pub struct TickDriver {
    kernel: FusionKernel,
    link: Arc<dyn ArenaLink>,
}

impl TickDriver {
    pub fn new(kernel: FusionKernel, link: Arc<dyn ArenaLink>) -> Self {
        Self { kernel, link }
    }

    pub fn kernel(&self) -> &FusionKernel {
        &self.kernel
    }

    /// Run a single tick.
    pub async fn step(&mut self) -> Result<TickReport> {
        let snapshot = self
            .link
            .snapshot(&self.kernel.constants.team)
            .context("fetching snapshot")?;
        let report = self.kernel.coordinator.run_tick(snapshot).await;
        self.link
            .send_commands(&report.commands)
            .with_context(|| format!("sending commands for tick {}", report.tick))?;
        debug!(tick = report.tick, "Commands sent");
        Ok(report)
    }

    /// Run `max_ticks` ticks, returning every report.
    pub async fn run(&mut self, max_ticks: u64) -> Result<Vec<TickReport>> {
        let mut reports = Vec::with_capacity(max_ticks as usize);
        for _ in 0..max_ticks {
            reports.push(self.step().await?);
        }
        info!(ticks = reports.len(), "Tick driver finished");
        Ok(reports)
    }

    /// Stop every worker, handing back the final occupancy grid.
    pub async fn shutdown(self) -> SharedGrid {
        let FusionKernel {
            coordinator, grid, ..
        } = self.kernel;
        coordinator.shutdown().await;
        grid
    }
}
