//! Kernel assembly: one shared grid, one controller per tank, one coordinator.
//!
//! ## Usage
//!
//! ```ignore
//! use fusion_kernel::{FusionConfig, FusionKernelBuilder, TickDriver};
//!
//! let kernel = FusionKernelBuilder::new(FusionConfig::default(), link.clone()).spawn()?;
//! let mut driver = TickDriver::new(kernel, link);
//! let reports = driver.run(1_000).await?;
//! ```

use std::collections::BTreeMap;
use std::sync::Arc;

use anyhow::{Context, Result, bail};
use serde::Serialize;
use tracing::info;

use crate::actors::TickCoordinator;
use crate::arena::{ArenaLink, Command, StaticConfig};
use crate::config::FusionConfig;
use crate::controller::{AgentController, Controller};
use crate::grid::{OccupancyGrid, SharedGrid};

/// Result of a single tick.
#[derive(Debug, Clone, Default, Serialize)]
pub struct TickReport {
    pub tick: u64,
    /// Snapshot clock the tick was computed for
    pub elapsed_s: f64,
    /// Exactly one command per agent, ordered by agent index
    pub commands: Vec<Command>,
    /// Agents that missed the deadline and were told to hold
    pub late_agents: Vec<usize>,
    /// Agents exploring after this tick
    pub exploring: usize,
}

impl TickReport {
    pub fn command(&self, agent: usize) -> Option<&Command> {
        self.commands.iter().find(|c| c.agent == agent)
    }
}

/// A running kernel.
pub struct FusionKernel {
    pub coordinator: TickCoordinator,
    /// Occupancy belief shared by every controller
    pub grid: SharedGrid,
    pub constants: Arc<StaticConfig>,
    /// Configuration after arena overrides and validation
    pub config: FusionConfig,
}

/// Builder for a [`FusionKernel`].
///
/// Every tank on the team gets an [`AgentController`] unless a replacement is
/// registered with [`with_controller`](Self::with_controller).
pub struct FusionKernelBuilder {
    config: FusionConfig,
    link: Arc<dyn ArenaLink>,
    replacements: BTreeMap<usize, Box<dyn Controller>>,
}

impl FusionKernelBuilder {
    pub fn new(config: FusionConfig, link: Arc<dyn ArenaLink>) -> Self {
        Self {
            config,
            link,
            replacements: BTreeMap::new(),
        }
    }

    /// Use `controller` for its agent instead of the default one.
    pub fn with_controller(mut self, controller: Box<dyn Controller>) -> Self {
        self.replacements.insert(controller.agent(), controller);
        self
    }

    /// Validate everything, build the grid and controllers, and start the
    /// workers. Must be called inside a tokio runtime.
    pub fn spawn(self) -> Result<FusionKernel> {
        let Self {
            config,
            link,
            mut replacements,
        } = self;

        let constants = link.static_config().context("fetching match constants")?;
        constants.validate()?;
        let config = config
            .with_arena_sensor(constants.sensor_true_positive, constants.sensor_true_negative)
            .validated()?;

        let team_size = constants.team_size();
        if let Some((&agent, _)) = replacements.range(team_size..).next() {
            bail!("controller for agent {agent} but the team has {team_size} tanks");
        }

        let grid = SharedGrid::new(OccupancyGrid::new(
            constants.world_size,
            &config.grid,
            config.sensor,
        )?);
        let constants = Arc::new(constants);

        let controllers: Vec<Box<dyn Controller>> = (0..team_size)
            .map(|index| {
                replacements.remove(&index).unwrap_or_else(|| {
                    Box::new(AgentController::new(
                        index,
                        &config,
                        constants.clone(),
                        link.clone(),
                        grid.clone(),
                    )) as Box<dyn Controller>
                })
            })
            .collect();

        info!(
            team = %constants.team,
            agents = team_size,
            world_size = constants.world_size,
            true_positive = config.sensor.true_positive,
            true_negative = config.sensor.true_negative,
            "Spawning fusion kernel"
        );
        let coordinator = TickCoordinator::spawn(config.coordinator.clone(), controllers);

        Ok(FusionKernel {
            coordinator,
            grid,
            constants,
            config,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    use crate::arena::{SensorSweep, Snapshot, TeamRoster};
    use crate::driver::TickDriver;

    struct FixedArena {
        constants: StaticConfig,
        sent: Mutex<Vec<Vec<Command>>>,
    }

    impl ArenaLink for FixedArena {
        fn static_config(&self) -> Result<StaticConfig> {
            Ok(self.constants.clone())
        }

        fn snapshot(&self, _team: &str) -> Result<Snapshot> {
            Ok(Snapshot::default())
        }

        fn sensor_sweep(&self, _agent: usize, _world_size: f64) -> Result<SensorSweep> {
            SensorSweep::new(0.0, 0.0, 0, 0, Vec::new())
        }

        fn send_commands(&self, commands: &[Command]) -> Result<()> {
            self.sent.lock().unwrap().push(commands.to_vec());
            Ok(())
        }
    }

    fn arena(world_size: f64, tanks: usize) -> Arc<FixedArena> {
        Arc::new(FixedArena {
            constants: StaticConfig {
                world_size,
                sensor_true_positive: Some(1.0),
                sensor_true_negative: Some(0.9),
                team: "green".to_string(),
                roster: vec![TeamRoster {
                    color: "green".to_string(),
                    count: tanks,
                }],
                bases: Vec::new(),
                shot_speed: 100.0,
                shot_range: 350.0,
                tank_length: 6.0,
            },
            sent: Mutex::new(Vec::new()),
        })
    }

    /// Always drives forward at a fixed throttle.
    struct Cruise(usize);

    impl Controller for Cruise {
        fn agent(&self) -> usize {
            self.0
        }

        fn tick(&mut self, _snapshot: &Snapshot) -> Command {
            Command {
                agent: self.0,
                throttle: 0.25,
                turn_rate: 0.0,
                fire: false,
            }
        }
    }

    #[tokio::test]
    async fn test_spawn_applies_arena_sensor_and_clamps() {
        let kernel = FusionKernelBuilder::new(FusionConfig::default(), arena(50.0, 3))
            .spawn()
            .unwrap();
        assert_eq!(kernel.coordinator.agent_count(), 3);
        assert_eq!(kernel.config.sensor.true_positive, 0.99);
        assert_eq!(kernel.grid.read().unwrap().width(), 50);
        kernel.coordinator.shutdown().await;
    }

    #[tokio::test]
    async fn test_spawn_rejects_bad_world() {
        let config = FusionConfig::default;
        assert!(FusionKernelBuilder::new(config(), arena(0.0, 2)).spawn().is_err());
        assert!(FusionKernelBuilder::new(config(), arena(50.0, 0)).spawn().is_err());
    }

    #[tokio::test]
    async fn test_replacement_for_missing_agent_rejected() {
        let result = FusionKernelBuilder::new(FusionConfig::default(), arena(50.0, 2))
            .with_controller(Box::new(Cruise(2)))
            .spawn();
        assert!(result.is_err());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_replacement_controller_drives_its_tank() {
        let link = arena(50.0, 3);
        let kernel = FusionKernelBuilder::new(FusionConfig::default(), link.clone())
            .with_controller(Box::new(Cruise(1)))
            .spawn()
            .unwrap();
        let mut driver = TickDriver::new(kernel, link.clone());
        assert_eq!(driver.kernel().coordinator.agent_count(), 3);

        let reports = driver.run(3).await.unwrap();
        assert_eq!(reports.len(), 3);
        for report in &reports {
            assert_eq!(report.commands.len(), 3);
            assert_eq!(report.command(1).unwrap().throttle, 0.25);
        }
        assert_eq!(link.sent.lock().unwrap().len(), 3);

        driver.shutdown().await;
    }
}
