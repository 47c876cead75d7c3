//! Per-tank decision logic.
//!
//! Each tick an [`AgentController`] folds new sensor data into the shared
//! occupancy grid and picks a goal: an unexplored cell while the map has
//! unknown cells, then whatever the [`Arbiter`] ranks highest. Repulsive and
//! tangential fields surround the goal and the net force becomes one
//! [`Command`]. Firing is gated on a Kalman-predicted intercept of its
//! assigned adversary.

use std::sync::Arc;

use nalgebra::Point2;
use rand::SeedableRng;
use rand::seq::IndexedRandom;
use rand_chacha::ChaCha8Rng;
use tracing::{debug, trace, warn};

use crate::arena::{ArenaLink, Command, EnemyTank, MyTank, Snapshot, StaticConfig};
use crate::behavior::{Arbiter, Candidate, GoalKind, Situation};
use crate::config::{ControllerConfig, FieldShape, FirePolicy, FusionConfig, GridConfig};
use crate::field::{Rotation, VectorField, compose};
use crate::grid::{CellIndex, SharedGrid};
use crate::history::PointHistory;
use crate::kalman::{KalmanTracker, TrackState};
use crate::messages::FieldPlot;
use crate::steering::{normalize_angle, steer};

/// Something a worker can drive once per tick.
pub trait Controller: Send + 'static {
    /// Index of the tank this controller commands.
    fn agent(&self) -> usize;

    /// Compute this tick's command. Never fails: anything that goes wrong
    /// degrades to a safer command.
    fn tick(&mut self, snapshot: &Snapshot) -> Command;

    /// Whether the last tick was spent exploring unknown cells.
    fn is_exploring(&self) -> bool {
        false
    }

    /// Fields evaluated on the last tick, for plotting.
    fn plot(&self) -> Option<FieldPlot> {
        None
    }
}

fn attraction(center: Point2<f64>, shape: FieldShape) -> VectorField {
    VectorField::attraction(center, shape.inner_radius, shape.outer_radius, shape.gain)
}

fn repulsion(center: Point2<f64>, shape: FieldShape) -> VectorField {
    VectorField::repulsion(center, shape.inner_radius, shape.outer_radius, shape.gain)
}

fn tangential(center: Point2<f64>, shape: FieldShape) -> VectorField {
    VectorField::tangential(
        center,
        shape.inner_radius,
        shape.outer_radius,
        Rotation::Clockwise,
        shape.gain,
    )
}

/// Fires when the tank has not moved `epsilon` along either axis for longer
/// than `timeout_s`.
#[derive(Debug, Clone)]
struct StallDetector {
    epsilon: f64,
    timeout_s: f64,
    anchor: Option<Point2<f64>>,
    last_moved_s: f64,
    stalled: bool,
}

impl StallDetector {
    fn new(epsilon: f64, timeout_s: f64) -> Self {
        Self {
            epsilon,
            timeout_s,
            anchor: None,
            last_moved_s: 0.0,
            stalled: false,
        }
    }

    /// Feed the current position. Returns true on the tick the detector fires.
    fn observe(&mut self, position: Point2<f64>, now_s: f64) -> bool {
        let Some(anchor) = self.anchor else {
            self.anchor = Some(position);
            self.last_moved_s = now_s;
            return false;
        };
        if (position.x - anchor.x).abs() >= self.epsilon
            || (position.y - anchor.y).abs() >= self.epsilon
        {
            self.anchor = Some(position);
            self.last_moved_s = now_s;
            self.stalled = false;
            return false;
        }
        let was_stalled = self.stalled;
        self.stalled = now_s - self.last_moved_s > self.timeout_s;
        self.stalled && !was_stalled
    }

    /// Where the tank is stuck, while the detector is fired.
    fn stall_point(&self) -> Option<Point2<f64>> {
        self.anchor.filter(|_| self.stalled)
    }
}

/// Controller for one tank.
pub struct AgentController {
    index: usize,
    config: ControllerConfig,
    grid_config: GridConfig,
    constants: Arc<StaticConfig>,
    link: Arc<dyn ArenaLink>,
    grid: SharedGrid,

    /// Estimate of the assigned adversary
    tracker: KalmanTracker,
    /// Callsign of the assigned adversary
    target: Option<String>,
    last_observation_s: Option<f64>,
    last_reset_s: f64,

    rng: ChaCha8Rng,
    destination: Option<CellIndex>,
    arbiter: Arbiter,
    visited: PointHistory,
    contacts: PointHistory,
    stall: StallDetector,
    last_sweep_s: Option<f64>,
    last_visit_s: Option<f64>,

    exploring: bool,
    last_plot: Option<FieldPlot>,
}

impl AgentController {
    pub fn new(
        index: usize,
        config: &FusionConfig,
        constants: Arc<StaticConfig>,
        link: Arc<dyn ArenaLink>,
        grid: SharedGrid,
    ) -> Self {
        let c = &config.controller;
        Self {
            index,
            config: c.clone(),
            grid_config: config.grid.clone(),
            constants,
            link,
            grid,
            tracker: KalmanTracker::new(&config.tracker),
            target: None,
            last_observation_s: None,
            last_reset_s: 0.0,
            rng: ChaCha8Rng::seed_from_u64(config.seed.wrapping_add(index as u64)),
            destination: None,
            arbiter: Arbiter::new(),
            visited: PointHistory::new(c.history_len),
            contacts: PointHistory::new(c.history_len),
            stall: StallDetector::new(c.stall_epsilon, c.stall_timeout_s),
            last_sweep_s: None,
            last_visit_s: None,
            exploring: false,
            last_plot: None,
        }
    }

    /// Current exploration target, if any.
    pub fn destination(&self) -> Option<CellIndex> {
        self.destination
    }

    pub fn tracker(&self) -> &KalmanTracker {
        &self.tracker
    }

    /// Goal held by the arbiter, `None` while exploring or idle.
    pub fn goal(&self) -> Option<&GoalKind> {
        self.arbiter.current()
    }

    fn sweep_due(&self, tank: &MyTank, now_s: f64) -> bool {
        let Some(last) = self.last_sweep_s else {
            return true;
        };
        if now_s - last >= self.config.sweep_interval_s || now_s < last {
            return true;
        }
        // Standing in unknown territory with nothing to explore nearby.
        let Ok(grid) = self.grid.read() else {
            return false;
        };
        match grid.cell_at(&tank.position()) {
            Some(cell) => {
                grid.is_unknown(cell)
                    && grid
                        .frontier(cell, self.grid_config.frontier_window)
                        .is_empty()
            }
            None => false,
        }
    }

    fn sweep(&mut self, now_s: f64) {
        self.last_sweep_s = Some(now_s);
        let sweep = match self.link.sensor_sweep(self.index, self.constants.world_size) {
            Ok(sweep) => sweep,
            Err(e) => {
                warn!(agent = self.index, error = %e, "Sensor sweep failed");
                return;
            }
        };
        match self.grid.apply_sweep(&sweep) {
            Ok(updated) => trace!(agent = self.index, updated, "Applied sensor sweep"),
            Err(e) => warn!(agent = self.index, error = %e, "Could not apply sensor sweep"),
        }
    }

    /// Keep the destination while it is still unknown, otherwise pick a new
    /// one: a random nearby frontier cell, or any unknown cell.
    fn exploration_target(&mut self, tank: &MyTank) -> Option<Point2<f64>> {
        let grid = match self.grid.read() {
            Ok(grid) => grid,
            Err(e) => {
                warn!(agent = self.index, error = %e, "Skipping exploration");
                return None;
            }
        };
        if let Some(dest) = self.destination
            && grid.is_unknown(dest)
        {
            return Some(grid.cell_center(dest));
        }

        let frontier = grid
            .cell_at(&tank.position())
            .map(|cell| grid.frontier(cell, self.grid_config.frontier_window))
            .unwrap_or_default();
        let next = match frontier.choose(&mut self.rng) {
            Some(cell) => Some(*cell),
            None => grid.random_unknown(&mut self.rng),
        };
        self.destination = next;
        if let Some(dest) = next {
            debug!(agent = self.index, i = dest.i, j = dest.j, "New exploration destination");
        }
        next.map(|dest| grid.cell_center(dest))
    }

    /// Arbitrate between flags, base, adversaries and getting unstuck.
    /// With nothing worth doing the tank idles toward the arena center.
    fn goal_fields(&mut self, tank: &MyTank, snapshot: &Snapshot, fields: &mut Vec<VectorField>) {
        let situation = Situation {
            tank,
            snapshot,
            team: &self.constants.team,
            base: self.constants.own_base().map(|base| base.center()),
            stalled: self.stall.stall_point().is_some(),
        };
        let choice = self
            .arbiter
            .choose(&self.config.behavior, &situation, snapshot.elapsed_s);
        match choice {
            // Stall repulsion alone moves the tank.
            Some(Candidate {
                kind: GoalKind::Unstick,
                ..
            }) => {}
            Some(goal) => fields.push(attraction(goal.target, self.config.goal_attraction)),
            None => fields.push(attraction(Point2::origin(), self.config.goal_attraction)),
        }
    }

    fn avoidance_fields(&self, tank: &MyTank, snapshot: &Snapshot, fields: &mut Vec<VectorField>) {
        let c = &self.config;
        fields.extend(self.visited.iter().map(|p| repulsion(*p, c.visited_repulsion)));
        for contact in self.contacts.iter() {
            fields.push(repulsion(*contact, c.contact_repulsion));
            fields.push(tangential(*contact, c.contact_tangential));
        }
        if let Some(stuck) = self.stall.stall_point() {
            fields.push(repulsion(stuck, c.stall_repulsion));
        }

        match self.grid.read() {
            Ok(grid) => fields.extend(
                grid.obstacles_near(&tank.position(), c.obstacle_scan_radius)
                    .into_iter()
                    .map(|p| repulsion(p, c.obstacle_repulsion)),
            ),
            Err(e) => warn!(agent = self.index, error = %e, "Skipping obstacle avoidance"),
        }

        let attacking = match self.arbiter.current() {
            Some(GoalKind::Attack { callsign }) => Some(callsign.as_str()),
            _ => None,
        };
        fields.extend(
            snapshot
                .enemy_tanks
                .iter()
                .filter(|enemy| enemy.is_alive() && Some(enemy.callsign.as_str()) != attacking)
                .map(|enemy| repulsion(enemy.position(), c.enemy_repulsion)),
        );
        fields.extend(
            snapshot
                .shots
                .iter()
                .map(|shot| repulsion(Point2::new(shot.x, shot.y), c.shot_repulsion)),
        );
        fields.extend(
            snapshot
                .my_tanks
                .iter()
                .filter(|mate| mate.index != self.index && mate.is_alive() && mate.flag.is_some())
                .map(|mate| tangential(mate.position(), c.teammate_tangential)),
        );
    }

    /// The live adversary this tank tracks. An attack goal takes priority;
    /// otherwise the assignment only changes when the old target dies.
    fn acquire_target<'s>(&mut self, snapshot: &'s Snapshot) -> Option<&'s EnemyTank> {
        if let Some(GoalKind::Attack { callsign }) = self.arbiter.current()
            && self.target.as_ref() != Some(callsign)
            && let Some(enemy) = snapshot
                .enemy_tanks
                .iter()
                .find(|e| &e.callsign == callsign && e.is_alive())
        {
            debug!(agent = self.index, callsign = %callsign, "Tracking attack target");
            self.target = Some(callsign.clone());
            self.tracker.mark_lost();
            return Some(enemy);
        }
        if let Some(callsign) = &self.target {
            match snapshot.enemy_tanks.iter().find(|e| &e.callsign == callsign) {
                Some(enemy) if enemy.is_alive() => return Some(enemy),
                _ => {
                    debug!(agent = self.index, callsign = %callsign, "Adversary lost");
                    self.tracker.mark_lost();
                    self.target = None;
                }
            }
        }
        let live: Vec<&EnemyTank> = snapshot.enemy_tanks.iter().filter(|e| e.is_alive()).collect();
        if live.is_empty() {
            return None;
        }
        let enemy = live[self.index % live.len()];
        self.target = Some(enemy.callsign.clone());
        self.tracker.mark_lost();
        Some(enemy)
    }

    /// Track the assigned adversary and decide whether a shot now would hit
    /// where it is going to be.
    fn intercept(&mut self, tank: &MyTank, snapshot: &Snapshot) -> bool {
        let now = snapshot.elapsed_s;
        if now - self.last_reset_s >= self.config.confidence_refresh_s {
            self.tracker.reset();
            self.last_reset_s = now;
        }

        let Some(enemy) = self.acquire_target(snapshot) else {
            self.tracker.mark_lost();
            return false;
        };
        let observed = enemy.position();

        match self.last_observation_s {
            Some(last) if self.tracker.state() == TrackState::Tracking => {
                let dt = (now - last).max(0.0);
                if let Err(e) = self.tracker.update(dt, observed.x, observed.y) {
                    warn!(agent = self.index, error = %e, "Tracker update failed");
                    return false;
                }
            }
            _ => self.tracker.seed(observed.x, observed.y),
        }
        self.last_observation_s = Some(now);

        if !self.tracker.confidence(&observed, self.config.confidence_sigmas) {
            return false;
        }

        let here = tank.position();
        let distance = nalgebra::distance(&here, &self.tracker.position());
        if distance <= 0.0 || distance > self.constants.shot_range {
            return false;
        }
        let lead = self.tracker.predict(distance / self.constants.shot_speed);
        let to_lead = lead - here;
        let lead_distance = to_lead.norm();
        if lead_distance <= 0.0 || lead_distance > self.constants.shot_range {
            return false;
        }
        let bearing = to_lead.y.atan2(to_lead.x);
        let tolerance = (self.config.fire_width / lead_distance).min(1.0);
        normalize_angle(bearing - tank.angle).abs() < tolerance
    }

    fn should_fire(&mut self, tank: &MyTank, snapshot: &Snapshot) -> bool {
        match self.config.fire_policy {
            FirePolicy::Never => false,
            FirePolicy::Always => true,
            FirePolicy::Intercept => self.intercept(tank, snapshot),
        }
    }

    fn record_motion(&mut self, tank: &MyTank, now_s: f64) {
        let here = tank.position();
        if self.stall.observe(here, now_s) {
            debug!(agent = self.index, x = here.x, y = here.y, "Stalled, recording contact");
            self.contacts.push(here);
        }
        let visit_due = self
            .last_visit_s
            .is_none_or(|last| now_s - last >= self.config.visit_record_interval_s || now_s < last);
        if visit_due {
            self.visited.push(here);
            self.last_visit_s = Some(now_s);
        }
    }
}

impl Controller for AgentController {
    fn agent(&self) -> usize {
        self.index
    }

    fn tick(&mut self, snapshot: &Snapshot) -> Command {
        let Some(tank) = snapshot.my_tank(self.index).filter(|t| t.is_alive()) else {
            debug!(agent = self.index, "Tank missing or dead, holding");
            self.exploring = false;
            return Command::hold(self.index);
        };
        let now = snapshot.elapsed_s;

        if self.sweep_due(tank, now) {
            self.sweep(now);
        }

        let remaining_unknown = self
            .grid
            .remaining_unknown(now, self.grid_config.unknown_scan_interval_s)
            .unwrap_or_else(|e| {
                warn!(agent = self.index, error = %e, "Unknown-cell scan failed");
                false
            });

        let mut fields = Vec::new();
        let explore_to = if remaining_unknown {
            self.exploration_target(tank)
        } else {
            self.destination = None;
            None
        };
        self.exploring = explore_to.is_some();
        match explore_to {
            Some(dest) => {
                self.arbiter.clear();
                fields.push(attraction(dest, self.config.explore_attraction));
            }
            None => self.goal_fields(tank, snapshot, &mut fields),
        }
        self.avoidance_fields(tank, snapshot, &mut fields);

        let here = tank.position();
        let net = compose(&fields, &here);
        let mut command = steer(
            self.index,
            &net,
            tank.angle,
            self.config.max_throttle,
            self.config.turn_gain,
        );
        command.fire = self.should_fire(tank, snapshot);

        self.record_motion(tank, now);
        self.last_plot = Some(FieldPlot {
            agent: self.index,
            tick_time: now,
            position: here,
            fields,
            net_force: net,
        });
        command
    }

    fn is_exploring(&self) -> bool {
        self.exploring
    }

    fn plot(&self) -> Option<FieldPlot> {
        self.last_plot.clone()
    }
}
