//! ArenaLink trait and the world-state types exchanged with the arena.
//!
//! The kernel is transport-agnostic: the protocol client (or a simulator)
//! implements [`ArenaLink`] and everything inside the kernel works on the
//! plain data types below.

use anyhow::{Result, ensure};
use nalgebra::Point2;
use serde::{Deserialize, Serialize};

/// Connection to the arena.
///
/// Calls are synchronous and must be cheap enough to make from a worker
/// during a tick.
pub trait ArenaLink: Send + Sync {
    /// Constants that do not change during a match.
    fn static_config(&self) -> Result<StaticConfig>;

    /// Current world state as seen by `team`.
    fn snapshot(&self, team: &str) -> Result<Snapshot>;

    /// Binary occupancy sweep around tank `agent`.
    fn sensor_sweep(&self, agent: usize, world_size: f64) -> Result<SensorSweep>;

    /// Issue one tick's batch of commands.
    fn send_commands(&self, commands: &[Command]) -> Result<()>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TankStatus {
    Alive,
    Dead,
}

/// One of our own tanks.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MyTank {
    pub index: usize,
    pub callsign: String,
    pub status: TankStatus,
    /// Color of the flag being carried, if any
    pub flag: Option<String>,
    pub x: f64,
    pub y: f64,
    /// Heading in radians
    pub angle: f64,
    pub vx: f64,
    pub vy: f64,
    pub angvel: f64,
}

impl MyTank {
    pub fn position(&self) -> Point2<f64> {
        Point2::new(self.x, self.y)
    }

    pub fn is_alive(&self) -> bool {
        self.status == TankStatus::Alive
    }
}

/// An opposing tank.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EnemyTank {
    pub callsign: String,
    pub color: String,
    pub status: TankStatus,
    pub flag: Option<String>,
    pub x: f64,
    pub y: f64,
    pub angle: f64,
}

impl EnemyTank {
    pub fn position(&self) -> Point2<f64> {
        Point2::new(self.x, self.y)
    }

    pub fn is_alive(&self) -> bool {
        self.status == TankStatus::Alive
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Flag {
    pub color: String,
    /// Team currently holding the flag, if any
    pub possessing_color: Option<String>,
    pub x: f64,
    pub y: f64,
}

impl Flag {
    pub fn position(&self) -> Point2<f64> {
        Point2::new(self.x, self.y)
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct Shot {
    pub x: f64,
    pub y: f64,
    pub vx: f64,
    pub vy: f64,
}

/// World state for one tick.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Snapshot {
    pub my_tanks: Vec<MyTank>,
    pub enemy_tanks: Vec<EnemyTank>,
    pub flags: Vec<Flag>,
    pub shots: Vec<Shot>,
    /// Seconds since the match started
    pub elapsed_s: f64,
}

impl Snapshot {
    /// Our tank with the given index, if reported.
    pub fn my_tank(&self, index: usize) -> Option<&MyTank> {
        self.my_tanks.iter().find(|t| t.index == index)
    }
}

/// A single sensor reading for one cell.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Observation {
    Obstacle,
    Free,
    /// Cell not covered by this sweep
    Unobserved,
}

/// Rectangular block of observations anchored at a world offset.
///
/// `cells` is stored column-major along x: index `i * height + j` holds the
/// reading for the cell `i` columns right and `j` rows up from the offset.
/// Every sweep, including a deserialized one, goes through [`SensorSweep::new`].
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(try_from = "SweepRecord")]
pub struct SensorSweep {
    offset_x: f64,
    offset_y: f64,
    width: usize,
    height: usize,
    cells: Vec<Observation>,
}

/// Wire form of a sweep before its shape is checked.
#[derive(Deserialize)]
struct SweepRecord {
    offset_x: f64,
    offset_y: f64,
    width: usize,
    height: usize,
    cells: Vec<Observation>,
}

impl TryFrom<SweepRecord> for SensorSweep {
    type Error = anyhow::Error;

    fn try_from(r: SweepRecord) -> Result<Self> {
        Self::new(r.offset_x, r.offset_y, r.width, r.height, r.cells)
    }
}

impl SensorSweep {
    pub fn new(
        offset_x: f64,
        offset_y: f64,
        width: usize,
        height: usize,
        cells: Vec<Observation>,
    ) -> Result<Self> {
        let sweep = Self {
            offset_x,
            offset_y,
            width,
            height,
            cells,
        };
        sweep.check_shape()?;
        Ok(sweep)
    }

    /// Finite offset and exactly `width * height` cells.
    pub fn check_shape(&self) -> Result<()> {
        ensure!(
            self.offset_x.is_finite() && self.offset_y.is_finite(),
            "sweep offset ({}, {}) is not finite",
            self.offset_x,
            self.offset_y
        );
        let expected = self.width.checked_mul(self.height);
        ensure!(
            expected == Some(self.cells.len()),
            "sweep has {} cells, expected {}x{}",
            self.cells.len(),
            self.width,
            self.height
        );
        Ok(())
    }

    /// World x of the bottom-left corner.
    pub fn offset_x(&self) -> f64 {
        self.offset_x
    }

    /// World y of the bottom-left corner.
    pub fn offset_y(&self) -> f64 {
        self.offset_y
    }

    pub fn width(&self) -> usize {
        self.width
    }

    pub fn height(&self) -> usize {
        self.height
    }

    /// Reading for cell `(i, j)`; anything outside the sweep is unobserved.
    pub fn get(&self, i: usize, j: usize) -> Observation {
        if i >= self.width || j >= self.height {
            return Observation::Unobserved;
        }
        self.cells
            .get(i * self.height + j)
            .copied()
            .unwrap_or(Observation::Unobserved)
    }
}

/// Issued drive command for one tank.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Command {
    pub agent: usize,
    /// Forward speed fraction in [-1, 1]
    pub throttle: f64,
    /// Angular velocity request
    pub turn_rate: f64,
    pub fire: bool,
}

impl Command {
    /// Stand still and hold fire.
    pub fn hold(agent: usize) -> Self {
        Self {
            agent,
            throttle: 0.0,
            turn_rate: 0.0,
            fire: false,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TeamRoster {
    pub color: String,
    pub count: usize,
}

/// A team base, described by its corner points.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Base {
    pub color: String,
    pub corners: Vec<(f64, f64)>,
}

impl Base {
    pub fn center(&self) -> Point2<f64> {
        if self.corners.is_empty() {
            return Point2::origin();
        }
        let n = self.corners.len() as f64;
        let (sx, sy) = self
            .corners
            .iter()
            .fold((0.0, 0.0), |(ax, ay), (x, y)| (ax + x, ay + y));
        Point2::new(sx / n, sy / n)
    }
}

/// Match constants.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StaticConfig {
    /// Side length of the square world, centered on the origin
    pub world_size: f64,
    pub sensor_true_positive: Option<f64>,
    pub sensor_true_negative: Option<f64>,
    /// Our team color
    pub team: String,
    pub roster: Vec<TeamRoster>,
    pub bases: Vec<Base>,
    pub shot_speed: f64,
    pub shot_range: f64,
    pub tank_length: f64,
}

impl StaticConfig {
    /// Number of tanks on our team.
    pub fn team_size(&self) -> usize {
        self.roster
            .iter()
            .find(|r| r.color == self.team)
            .map(|r| r.count)
            .unwrap_or(0)
    }

    pub fn own_base(&self) -> Option<&Base> {
        self.bases.iter().find(|b| b.color == self.team)
    }

    /// Reject constants the kernel cannot run with.
    pub fn validate(&self) -> Result<()> {
        ensure!(
            self.world_size.is_finite() && self.world_size > 0.0,
            "world size must be positive, got {}",
            self.world_size
        );
        ensure!(self.team_size() > 0, "team {} has no tanks", self.team);
        ensure!(
            self.shot_speed > 0.0,
            "shot speed must be positive, got {}",
            self.shot_speed
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn constants(world_size: f64) -> StaticConfig {
        StaticConfig {
            world_size,
            sensor_true_positive: None,
            sensor_true_negative: None,
            team: "blue".to_string(),
            roster: vec![
                TeamRoster {
                    color: "blue".to_string(),
                    count: 2,
                },
                TeamRoster {
                    color: "red".to_string(),
                    count: 1,
                },
            ],
            bases: vec![Base {
                color: "blue".to_string(),
                corners: vec![(10.0, 10.0), (30.0, 10.0), (30.0, 30.0), (10.0, 30.0)],
            }],
            shot_speed: 100.0,
            shot_range: 350.0,
            tank_length: 6.0,
        }
    }

    #[test]
    fn test_team_size_and_base_center() {
        let c = constants(800.0);
        assert_eq!(c.team_size(), 2);
        assert_eq!(c.own_base().unwrap().center(), Point2::new(20.0, 20.0));
    }

    #[test]
    fn test_non_positive_world_size_rejected() {
        assert!(constants(0.0).validate().is_err());
        assert!(constants(-5.0).validate().is_err());
        assert!(constants(800.0).validate().is_ok());
    }

    #[test]
    fn test_sweep_shape_checked() {
        assert!(SensorSweep::new(0.0, 0.0, 2, 2, vec![Observation::Free; 3]).is_err());
        let sweep = SensorSweep::new(0.0, 0.0, 2, 3, vec![Observation::Free; 6]).unwrap();
        assert_eq!(sweep.get(1, 2), Observation::Free);
        assert_eq!(sweep.get(2, 0), Observation::Unobserved);
    }

    #[test]
    fn test_deserialized_sweep_shape_checked() {
        let short = r#"{"offset_x":0.0,"offset_y":0.0,"width":3,"height":3,
            "cells":["free","free","obstacle","free"]}"#;
        let err = serde_json::from_str::<SensorSweep>(short).unwrap_err();
        assert!(err.to_string().contains("expected 3x3"));

        let ok = r#"{"offset_x":1.0,"offset_y":2.0,"width":2,"height":1,
            "cells":["free","obstacle"]}"#;
        let sweep: SensorSweep = serde_json::from_str(ok).unwrap();
        assert_eq!(sweep.get(1, 0), Observation::Obstacle);
        assert_eq!(sweep.offset_y(), 2.0);
    }
}
