//! Bayesian occupancy grid: per-cell P(obstacle) with a derived
//! free / obstacle / unknown classification and frontier search.
//!
//! World coordinates span `[-size/2, size/2)` on both axes. Cell `(i, j)` is
//! `i` columns right of the left edge and `j` rows up from the bottom edge.

use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

use anyhow::{Result, anyhow, ensure};
use nalgebra::Point2;
use rand::Rng;
use rand::seq::IndexedRandom;
use serde::Serialize;

use crate::arena::{Observation, SensorSweep};
use crate::config::{GridConfig, SensorConfig};

/// Probabilities are kept this far away from 0 and 1.
pub const P_FLOOR: f64 = 1e-9;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum CellClass {
    Free,
    Obstacle,
    Unknown,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct CellIndex {
    pub i: usize,
    pub j: usize,
}

impl CellIndex {
    pub const fn new(i: usize, j: usize) -> Self {
        Self { i, j }
    }
}

/// Cell totals per class.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ClassCounts {
    pub free: usize,
    pub obstacle: usize,
    pub unknown: usize,
}

/// The sensor model as the four conditional probabilities Bayes' rule needs.
#[derive(Debug, Clone, Copy)]
struct SensorModel {
    /// P(reads obstacle | obstacle)
    hit_given_obstacle: f64,
    /// P(reads obstacle | free)
    hit_given_free: f64,
    /// P(reads free | obstacle)
    miss_given_obstacle: f64,
    /// P(reads free | free)
    miss_given_free: f64,
}

impl From<SensorConfig> for SensorModel {
    fn from(sensor: SensorConfig) -> Self {
        Self {
            hit_given_obstacle: sensor.true_positive,
            hit_given_free: 1.0 - sensor.true_negative,
            miss_given_obstacle: 1.0 - sensor.true_positive,
            miss_given_free: sensor.true_negative,
        }
    }
}

impl SensorModel {
    /// Posterior P(obstacle) after `observation`, or `None` if there was none.
    fn posterior(&self, prior: f64, observation: Observation) -> Option<f64> {
        let (given_obstacle, given_free) = match observation {
            Observation::Obstacle => (self.hit_given_obstacle, self.hit_given_free),
            Observation::Free => (self.miss_given_obstacle, self.miss_given_free),
            Observation::Unobserved => return None,
        };
        let numerator = given_obstacle * prior;
        let denominator = numerator + given_free * (1.0 - prior);
        if denominator <= 0.0 || !denominator.is_finite() {
            return None;
        }
        Some((numerator / denominator).clamp(P_FLOOR, 1.0 - P_FLOOR))
    }
}

/// 2-D probability field over the arena.
#[derive(Debug, Clone)]
pub struct OccupancyGrid {
    width: usize,
    height: usize,
    world_size: f64,
    cells_per_unit: f64,
    cells: Vec<f64>,
    classes: Vec<CellClass>,
    sensor: SensorModel,
    obstacle_threshold: f64,
    free_threshold: f64,
    remaining_unknown: bool,
    last_unknown_scan_s: Option<f64>,
}

impl OccupancyGrid {
    /// Grid covering a square world of side `world_size`.
    ///
    /// Expects `config` and `sensor` to have gone through
    /// [`FusionConfig::validated`](crate::config::FusionConfig::validated).
    pub fn new(world_size: f64, config: &GridConfig, sensor: SensorConfig) -> Result<Self> {
        ensure!(
            world_size.is_finite() && world_size > 0.0,
            "world size must be positive, got {world_size}"
        );
        ensure!(
            config.free_threshold <= config.obstacle_threshold,
            "free threshold {} above obstacle threshold {}",
            config.free_threshold,
            config.obstacle_threshold
        );
        let side = (world_size * config.cells_per_unit).ceil() as usize;
        ensure!(side > 0, "grid would have no cells");

        let prior = config.initial_probability.clamp(P_FLOOR, 1.0 - P_FLOOR);
        let mut grid = Self {
            width: side,
            height: side,
            world_size,
            cells_per_unit: config.cells_per_unit,
            cells: vec![prior; side * side],
            classes: Vec::new(),
            sensor: sensor.into(),
            obstacle_threshold: config.obstacle_threshold,
            free_threshold: config.free_threshold,
            remaining_unknown: true,
            last_unknown_scan_s: None,
        };
        let class = grid.classify(prior);
        grid.classes = vec![class; side * side];
        grid.remaining_unknown = class == CellClass::Unknown;
        Ok(grid)
    }

    pub fn width(&self) -> usize {
        self.width
    }

    pub fn height(&self) -> usize {
        self.height
    }

    fn offset(&self, index: CellIndex) -> Option<usize> {
        (index.i < self.width && index.j < self.height).then(|| index.i * self.height + index.j)
    }

    fn classify(&self, p: f64) -> CellClass {
        if p >= self.obstacle_threshold {
            CellClass::Obstacle
        } else if p <= self.free_threshold {
            CellClass::Free
        } else {
            CellClass::Unknown
        }
    }

    /// Cell containing a world point, if inside the arena.
    pub fn cell_at(&self, point: &Point2<f64>) -> Option<CellIndex> {
        let (i, j) = self.signed_cell(point.x, point.y);
        if i < 0 || j < 0 {
            return None;
        }
        let index = CellIndex::new(i as usize, j as usize);
        self.offset(index).map(|_| index)
    }

    fn signed_cell(&self, x: f64, y: f64) -> (i64, i64) {
        let half = self.world_size / 2.0;
        (
            ((x + half) * self.cells_per_unit).floor() as i64,
            ((y + half) * self.cells_per_unit).floor() as i64,
        )
    }

    /// World coordinates of a cell's center.
    pub fn cell_center(&self, index: CellIndex) -> Point2<f64> {
        let half = self.world_size / 2.0;
        Point2::new(
            (index.i as f64 + 0.5) / self.cells_per_unit - half,
            (index.j as f64 + 0.5) / self.cells_per_unit - half,
        )
    }

    /// P(obstacle) for a cell, `None` outside the grid.
    pub fn probability(&self, index: CellIndex) -> Option<f64> {
        self.offset(index).map(|o| self.cells[o])
    }

    /// Class of a cell, `None` outside the grid.
    pub fn class(&self, index: CellIndex) -> Option<CellClass> {
        self.offset(index).map(|o| self.classes[o])
    }

    /// Out-of-bounds cells are never obstacles.
    pub fn is_obstacle(&self, index: CellIndex) -> bool {
        self.class(index) == Some(CellClass::Obstacle)
    }

    pub fn is_unknown(&self, index: CellIndex) -> bool {
        self.class(index) == Some(CellClass::Unknown)
    }

    /// Apply one observation to one cell and reclassify it.
    pub fn update_cell(&mut self, index: CellIndex, observation: Observation) -> bool {
        let Some(offset) = self.offset(index) else {
            return false;
        };
        let Some(posterior) = self.sensor.posterior(self.cells[offset], observation) else {
            return false;
        };
        self.cells[offset] = posterior;
        self.classes[offset] = self.classify(posterior);
        true
    }

    /// Fold a sweep into the grid. Returns the number of cells changed.
    pub fn update(&mut self, sweep: &SensorSweep) -> usize {
        let (i0, j0) = self.signed_cell(
            sweep.offset_x() + 0.5 / self.cells_per_unit,
            sweep.offset_y() + 0.5 / self.cells_per_unit,
        );
        self.update_cells(i0, j0, sweep)
    }

    /// Fold a sweep whose bottom-left cell is `(i0, j0)`; cells outside the
    /// grid are skipped.
    pub fn update_cells(&mut self, i0: i64, j0: i64, sweep: &SensorSweep) -> usize {
        let mut updated = 0;
        for di in 0..sweep.width() {
            let i = i0 + di as i64;
            if i < 0 || i >= self.width as i64 {
                continue;
            }
            for dj in 0..sweep.height() {
                let j = j0 + dj as i64;
                if j < 0 || j >= self.height as i64 {
                    continue;
                }
                let index = CellIndex::new(i as usize, j as usize);
                if self.update_cell(index, sweep.get(di, dj)) {
                    updated += 1;
                }
            }
        }
        updated
    }

    fn neighbours(&self, index: CellIndex) -> impl Iterator<Item = CellIndex> + '_ {
        let CellIndex { i, j } = index;
        [
            i.checked_sub(1).map(|i| CellIndex::new(i, j)),
            (i + 1 < self.width).then(|| CellIndex::new(i + 1, j)),
            j.checked_sub(1).map(|j| CellIndex::new(i, j)),
            (j + 1 < self.height).then(|| CellIndex::new(i, j + 1)),
        ]
        .into_iter()
        .flatten()
    }

    /// Unknown cells in a `window`-wide square around `center` that touch at
    /// least one free cell.
    pub fn frontier(&self, center: CellIndex, window: usize) -> Vec<CellIndex> {
        let half = window / 2;
        let i_last = (center.i + half).min(self.width.saturating_sub(1));
        let j_last = (center.j + half).min(self.height.saturating_sub(1));
        let i_range = center.i.saturating_sub(half)..=i_last;
        let j_range = center.j.saturating_sub(half)..=j_last;

        let mut frontier = Vec::new();
        for i in i_range {
            for j in j_range.clone() {
                let index = CellIndex::new(i, j);
                if self.is_unknown(index)
                    && self
                        .neighbours(index)
                        .any(|n| self.class(n) == Some(CellClass::Free))
                {
                    frontier.push(index);
                }
            }
        }
        frontier
    }

    /// Uniformly random unknown cell anywhere on the grid.
    pub fn random_unknown<R: Rng + ?Sized>(&self, rng: &mut R) -> Option<CellIndex> {
        let unknown: Vec<CellIndex> = self
            .classes
            .iter()
            .enumerate()
            .filter(|(_, class)| **class == CellClass::Unknown)
            .map(|(offset, _)| CellIndex::new(offset / self.height, offset % self.height))
            .collect();
        unknown.choose(rng).copied()
    }

    /// Centers of obstacle cells within `radius` world units of `center`.
    pub fn obstacles_near(&self, center: &Point2<f64>, radius: f64) -> Vec<Point2<f64>> {
        let (ci, cj) = self.signed_cell(center.x, center.y);
        let reach = (radius * self.cells_per_unit).ceil() as i64;
        let mut found = Vec::new();
        for i in (ci - reach).max(0)..=(ci + reach).min(self.width as i64 - 1) {
            for j in (cj - reach).max(0)..=(cj + reach).min(self.height as i64 - 1) {
                let index = CellIndex::new(i as usize, j as usize);
                if !self.is_obstacle(index) {
                    continue;
                }
                let point = self.cell_center(index);
                if nalgebra::distance(&point, center) <= radius {
                    found.push(point);
                }
            }
        }
        found
    }

    /// Result of the last full scan for unknown cells.
    pub fn has_remaining_unknown(&self) -> bool {
        self.remaining_unknown
    }

    /// Whether a full scan is due at `now_s`.
    pub fn unknown_scan_due(&self, now_s: f64, interval_s: f64) -> bool {
        self.last_unknown_scan_s
            .is_none_or(|last| now_s - last >= interval_s || now_s < last)
    }

    /// Rescan the whole grid for unknown cells if `interval_s` has passed since
    /// the last scan. Returns the (possibly cached) flag.
    pub fn refresh_remaining_unknown(&mut self, now_s: f64, interval_s: f64) -> bool {
        if self.unknown_scan_due(now_s, interval_s) {
            self.remaining_unknown = self.classes.contains(&CellClass::Unknown);
            self.last_unknown_scan_s = Some(now_s);
        }
        self.remaining_unknown
    }

    pub fn counts(&self) -> ClassCounts {
        self.classes
            .iter()
            .fold(ClassCounts::default(), |mut counts, class| {
                match class {
                    CellClass::Free => counts.free += 1,
                    CellClass::Obstacle => counts.obstacle += 1,
                    CellClass::Unknown => counts.unknown += 1,
                }
                counts
            })
    }
}

/// Occupancy grid shared by every agent on the team.
///
/// Sweeps take the write lock once per batch; classification queries take the
/// read lock and may observe the grid just before or after a batch.
#[derive(Debug, Clone)]
pub struct SharedGrid(Arc<RwLock<OccupancyGrid>>);

impl SharedGrid {
    pub fn new(grid: OccupancyGrid) -> Self {
        Self(Arc::new(RwLock::new(grid)))
    }

    pub fn read(&self) -> Result<RwLockReadGuard<'_, OccupancyGrid>> {
        self.0.read().map_err(|e| anyhow!("Lock error: {}", e))
    }

    pub fn write(&self) -> Result<RwLockWriteGuard<'_, OccupancyGrid>> {
        self.0.write().map_err(|e| anyhow!("Lock error: {}", e))
    }

    /// Apply a whole sweep under a single write lock. A malformed sweep is
    /// rejected before the lock is taken.
    pub fn apply_sweep(&self, sweep: &SensorSweep) -> Result<usize> {
        sweep.check_shape()?;
        Ok(self.write()?.update(sweep))
    }

    /// Refresh the remaining-unknown flag, taking the write lock only when a
    /// scan is actually due.
    pub fn remaining_unknown(&self, now_s: f64, interval_s: f64) -> Result<bool> {
        {
            let grid = self.read()?;
            if !grid.unknown_scan_due(now_s, interval_s) {
                return Ok(grid.has_remaining_unknown());
            }
        }
        Ok(self.write()?.refresh_remaining_unknown(now_s, interval_s))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;
    use rand_chacha::ChaCha8Rng;

    fn grid(size: f64, prior: f64, tp: f64, tn: f64) -> OccupancyGrid {
        let config = GridConfig {
            initial_probability: prior,
            ..GridConfig::default()
        };
        let sensor = SensorConfig {
            true_positive: tp,
            true_negative: tn,
        };
        OccupancyGrid::new(size, &config, sensor).unwrap()
    }

    fn sweep_of(width: usize, height: usize, obs: Observation) -> SensorSweep {
        SensorSweep::new(0.0, 0.0, width, height, vec![obs; width * height]).unwrap()
    }

    #[test]
    fn test_three_obstacle_hits_exceed_095() {
        let mut g = grid(100.0, 0.7, 0.9, 0.85);
        let cell = CellIndex::new(10, 10);
        let mut last = g.probability(cell).unwrap();
        for _ in 0..3 {
            assert!(g.update_cell(cell, Observation::Obstacle));
            let p = g.probability(cell).unwrap();
            assert!(p > last, "{p} should exceed {last}");
            last = p;
        }
        assert!(last > 0.95, "got {last}");
        assert_eq!(g.class(cell), Some(CellClass::Obstacle));
    }

    #[test]
    fn test_repeated_hits_are_monotone_and_bounded() {
        let mut g = grid(20.0, 0.5, 0.8, 0.8);
        let cell = CellIndex::new(3, 4);
        let mut last = 0.5;
        for step in 0..200 {
            g.update_cell(cell, Observation::Obstacle);
            let p = g.probability(cell).unwrap();
            assert!(p >= last);
            if step < 5 {
                assert!(p > last);
            }
            assert!(p > 0.0 && p < 1.0 && p.is_finite());
            last = p;
        }
    }

    #[test]
    fn test_mixed_observations_stay_in_open_interval() {
        let mut g = grid(10.0, 0.5, 0.99, 0.99);
        let cell = CellIndex::new(1, 1);
        let mut rng = ChaCha8Rng::seed_from_u64(7);
        for _ in 0..2_000 {
            let obs = if rng.random_bool(0.9) {
                Observation::Free
            } else {
                Observation::Obstacle
            };
            g.update_cell(cell, obs);
            let p = g.probability(cell).unwrap();
            assert!(p > 0.0 && p < 1.0 && !p.is_nan());
        }
    }

    #[test]
    fn test_unobserved_leaves_cell_untouched() {
        let mut g = grid(10.0, 0.7, 0.9, 0.9);
        let cell = CellIndex::new(2, 2);
        assert!(!g.update_cell(cell, Observation::Unobserved));
        assert_eq!(g.probability(cell), Some(0.7));
        assert_eq!(g.class(cell), Some(CellClass::Unknown));
    }

    #[test]
    fn test_out_of_bounds_queries_are_neutral() {
        let mut g = grid(10.0, 0.7, 0.9, 0.9);
        let outside = CellIndex::new(10, 0);
        assert_eq!(g.probability(outside), None);
        assert!(!g.is_obstacle(outside));
        assert!(!g.update_cell(outside, Observation::Obstacle));
        assert_eq!(g.cell_at(&Point2::new(6.0, 0.0)), None);
        assert_eq!(g.cell_at(&Point2::new(-5.0, -5.0)), Some(CellIndex::new(0, 0)));
    }

    #[test]
    fn test_sweep_lands_at_world_offset_and_clips() {
        let mut g = grid(10.0, 0.5, 0.9, 0.9);
        let mut cells = vec![Observation::Free; 16];
        cells[0] = Observation::Obstacle;
        let sweep = SensorSweep::new(3.0, 3.0, 4, 4, cells).unwrap();
        // Only the 2x2 block inside [3, 5) lands on the grid.
        assert_eq!(g.update(&sweep), 4);
        assert!(g.probability(CellIndex::new(8, 8)).unwrap() > 0.5);
        assert!(g.probability(CellIndex::new(9, 9)).unwrap() < 0.5);
        assert_eq!(g.probability(CellIndex::new(7, 7)), Some(0.5));
    }

    #[test]
    fn test_frontier_requires_free_neighbour() {
        let mut g = grid(20.0, 0.5, 0.95, 0.95);
        // Clear a 3x3 block around cell (10, 10).
        for _ in 0..3 {
            g.update_cells(9, 9, &sweep_of(3, 3, Observation::Free));
        }
        let frontier = g.frontier(CellIndex::new(10, 10), 8);
        assert!(!frontier.is_empty());
        assert!(frontier.contains(&CellIndex::new(8, 10)));
        assert!(frontier.contains(&CellIndex::new(10, 12)));
        assert!(!frontier.contains(&CellIndex::new(10, 10)), "free cells are not frontier");
        assert!(!frontier.contains(&CellIndex::new(8, 8)), "diagonal contact does not count");
        assert!(frontier.iter().all(|c| g.is_unknown(*c)));

        // A window far away sees nothing.
        assert!(g.frontier(CellIndex::new(0, 0), 4).is_empty());
    }

    #[test]
    fn test_remaining_unknown_scan_is_throttled() {
        let mut g = grid(4.0, 0.5, 0.95, 0.95);
        assert!(g.refresh_remaining_unknown(0.0, 3.0));
        for _ in 0..4 {
            g.update_cells(0, 0, &sweep_of(4, 4, Observation::Free));
        }
        assert_eq!(g.counts().unknown, 0);
        // Scan not due yet: stale flag is reported.
        assert!(g.refresh_remaining_unknown(1.0, 3.0));
        assert!(!g.refresh_remaining_unknown(3.5, 3.0));
        assert_eq!(g.random_unknown(&mut ChaCha8Rng::seed_from_u64(1)), None);
    }

    #[test]
    fn test_obstacles_near() {
        let mut g = grid(40.0, 0.5, 0.95, 0.95);
        for _ in 0..3 {
            g.update_cells(21, 20, &sweep_of(1, 1, Observation::Obstacle));
        }
        let near = g.obstacles_near(&Point2::new(0.5, 0.5), 3.0);
        assert_eq!(near, vec![Point2::new(1.5, 0.5)]);
        assert!(g.obstacles_near(&Point2::new(-15.0, -15.0), 3.0).is_empty());
    }

    #[test]
    fn test_shared_grid_sweep_batch() {
        let shared = SharedGrid::new(grid(10.0, 0.5, 0.9, 0.9));
        let sweep = SensorSweep::new(-5.0, -5.0, 2, 2, vec![Observation::Free; 4]).unwrap();
        assert_eq!(shared.apply_sweep(&sweep).unwrap(), 4);
        assert!(shared.read().unwrap().probability(CellIndex::new(1, 1)).unwrap() < 0.5);
        assert!(shared.remaining_unknown(0.0, 1.0).unwrap());
    }

    #[test]
    fn test_malformed_sweep_never_reaches_shared_grid() {
        let shared = SharedGrid::new(grid(10.0, 0.5, 0.9, 0.9));
        let short = r#"{"offset_x":-5.0,"offset_y":-5.0,"width":3,"height":3,
            "cells":["obstacle","obstacle","obstacle","obstacle"]}"#;
        assert!(serde_json::from_str::<SensorSweep>(short).is_err());
        assert!(SensorSweep::new(f64::NAN, 0.0, 1, 1, vec![Observation::Free]).is_err());

        // A teammate's sweep still lands after the bad one was refused.
        let sweep = SensorSweep::new(-5.0, -5.0, 3, 3, vec![Observation::Obstacle; 9]).unwrap();
        let teammate = shared.clone();
        let applied = std::thread::spawn(move || teammate.apply_sweep(&sweep))
            .join()
            .unwrap()
            .unwrap();
        assert_eq!(applied, 9);
        assert!(shared.read().unwrap().probability(CellIndex::new(2, 2)).unwrap() > 0.5);
    }
}
