//! Runs one simulated match end to end.

use std::sync::Arc;

use anyhow::Result;
use chrono::Utc;
use tracing::info;

use fusion_kernel::{ArenaLink, FusionConfig, FusionKernelBuilder, TickDriver};

use crate::sim::{SimConfig, SimulatedArena};
use crate::summary::{RunSummary, TickMetrics, map_accuracy};

/// Build an arena from `sim`, run the kernel against it for `ticks` ticks and
/// summarize the outcome.
pub async fn run_match(sim: SimConfig, fusion: FusionConfig, ticks: u64) -> Result<RunSummary> {
    let started_at = Utc::now();
    let arena = Arc::new(SimulatedArena::new(sim.clone())?);
    let link: Arc<dyn ArenaLink> = arena.clone();

    let kernel = FusionKernelBuilder::new(fusion, link.clone()).spawn()?;
    let fusion = kernel.config.clone();
    let mut driver = TickDriver::new(kernel, link);

    let mut tick_metrics = Vec::with_capacity(ticks as usize);
    let mut late_ticks = 0;
    for _ in 0..ticks {
        let report = driver.step().await?;
        if !report.late_agents.is_empty() {
            late_ticks += 1;
        }
        tick_metrics.push(TickMetrics::from(&report));
    }

    let grid = driver.shutdown().await;
    let (final_counts, accuracy) = {
        let grid = grid.read()?;
        (grid.counts(), map_accuracy(&grid, &arena))
    };
    let stats = arena.stats()?;

    info!(
        ticks,
        explored = final_counts.free + final_counts.obstacle,
        unknown = final_counts.unknown,
        accuracy = accuracy.unwrap_or(0.0),
        kills = stats.kills,
        captures = stats.captures,
        "Match finished"
    );

    Ok(RunSummary {
        sim,
        fusion,
        started_at,
        ended_at: Utc::now(),
        ticks,
        late_ticks,
        final_counts,
        map_accuracy: accuracy,
        arena: stats,
        tick_metrics,
    })
}
