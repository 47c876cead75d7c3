//! Configuration types for the fusion kernel.

use anyhow::{Result, bail, ensure};
use serde::{Deserialize, Serialize};

/// Top-level configuration.
///
/// Every component receives its own section at construction; nothing reads
/// configuration through globals. Loaded from JSON at runtime or built from
/// `Default`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FusionConfig {
    /// Occupancy grid shape and classification thresholds
    pub grid: GridConfig,

    /// Binary obstacle sensor accuracy
    pub sensor: SensorConfig,

    /// Adversary tracker noise model
    pub tracker: TrackerConfig,

    /// Per-agent steering behaviour
    pub controller: ControllerConfig,

    /// Tick barrier behaviour
    pub coordinator: CoordinatorConfig,

    /// Base seed for per-agent random target selection
    pub seed: u64,
}

/// Occupancy grid configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GridConfig {
    /// Prior P(obstacle) for every cell
    pub initial_probability: f64,

    /// Cells at or above this probability are obstacles
    pub obstacle_threshold: f64,

    /// Cells at or below this probability are free
    pub free_threshold: f64,

    /// Grid resolution (cells per world unit)
    pub cells_per_unit: f64,

    /// Minimum seconds between full-grid scans for remaining unknown cells
    pub unknown_scan_interval_s: f64,

    /// Side length, in cells, of the window searched for frontier cells
    pub frontier_window: usize,
}

/// Sensor accuracy.
///
/// `true_positive` = P(reads obstacle | obstacle),
/// `true_negative` = P(reads free | free).
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(default)]
pub struct SensorConfig {
    pub true_positive: f64,
    pub true_negative: f64,
}

/// Kalman tracker noise model.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TrackerConfig {
    /// Process noise on position
    pub position_variance: f64,
    /// Process noise on velocity
    pub velocity_variance: f64,
    /// Process noise on acceleration
    pub acceleration_variance: f64,

    /// Prior covariance restored on reset (position)
    pub prior_position_variance: f64,
    /// Prior covariance restored on reset (velocity)
    pub prior_velocity_variance: f64,
    /// Prior covariance restored on reset (acceleration)
    pub prior_acceleration_variance: f64,

    /// Assumed observation standard deviation on x
    pub observation_std_x: f64,
    /// Assumed observation standard deviation on y
    pub observation_std_y: f64,

    /// Coupling of acceleration back into velocity (drag)
    pub friction: f64,
}

/// Shape of one kind of potential field.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct FieldShape {
    pub inner_radius: f64,
    pub outer_radius: f64,
    pub gain: f64,
}

impl FieldShape {
    pub const fn new(inner_radius: f64, outer_radius: f64, gain: f64) -> Self {
        Self {
            inner_radius,
            outer_radius,
            gain,
        }
    }
}

/// When a controller asks the tank to fire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FirePolicy {
    Never,
    Always,
    /// Fire only on a confident lead-aimed intercept of the tracked adversary
    Intercept,
}

/// Per-agent steering configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ControllerConfig {
    /// Seconds between sensor sweeps
    pub sweep_interval_s: f64,

    /// Capacity of the visited-point and obstacle-contact histories
    pub history_len: usize,

    /// Seconds between visited-point samples
    pub visit_record_interval_s: f64,

    /// Movement below this distance counts as standing still
    pub stall_epsilon: f64,

    /// Seconds of standing still before the stall detector fires
    pub stall_timeout_s: f64,

    /// Pull toward the exploration destination
    pub explore_attraction: FieldShape,

    /// Pull toward flags, base or the arena center
    pub goal_attraction: FieldShape,

    /// Push away from recently visited points
    pub visited_repulsion: FieldShape,

    /// Push away from recorded obstacle contacts
    pub contact_repulsion: FieldShape,

    /// Swirl around recorded obstacle contacts
    pub contact_tangential: FieldShape,

    /// Push away from the current stall point
    pub stall_repulsion: FieldShape,

    /// Push away from mapped obstacle cells near the tank
    pub obstacle_repulsion: FieldShape,

    /// Radius, in world units, searched for mapped obstacles
    pub obstacle_scan_radius: f64,

    /// Push away from live enemy tanks
    pub enemy_repulsion: FieldShape,

    /// Push away from shots in flight
    pub shot_repulsion: FieldShape,

    /// Swirl around teammates carrying a flag
    pub teammate_tangential: FieldShape,

    /// Throttle used while a net force is present
    pub max_throttle: f64,

    /// Turn rate per radian of heading error
    pub turn_gain: f64,

    pub fire_policy: FirePolicy,

    /// Standard deviations accepted by the tracker confidence gate
    pub confidence_sigmas: f64,

    /// Seconds between forced tracker resets
    pub confidence_refresh_s: f64,

    /// Half-width of the target used to compute the firing tolerance
    pub fire_width: f64,

    /// Goal arbitration once the map is explored
    pub behavior: BehaviorConfig,
}

/// Priority and minimum hold time of one goal kind.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct BehaviorWeight {
    /// Utility scale; most goals divide it by the distance to their target
    pub priority: f64,
    /// Seconds a chosen goal is kept before arbitration runs again
    pub min_hold_s: f64,
}

impl BehaviorWeight {
    pub const fn new(priority: f64, min_hold_s: f64) -> Self {
        Self {
            priority,
            min_hold_s,
        }
    }
}

/// Goal arbitration weights.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BehaviorConfig {
    pub capture_flag: BehaviorWeight,
    pub return_to_base: BehaviorWeight,
    pub attack: BehaviorWeight,
    pub unstick: BehaviorWeight,

    /// Adversaries farther than this are not attacked unless they threaten
    /// our flag
    pub engage_range: f64,

    /// An adversary this close to our flag is a threat
    pub defend_radius: f64,

    /// Multiplier on the attack utility of a threat
    pub defend_boost: f64,
}

/// Tick barrier configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CoordinatorConfig {
    /// If set, agents that have not answered within this many milliseconds
    /// get a hold command for the tick. `None` waits for every agent.
    pub tick_deadline_ms: Option<u64>,

    /// Emit an info-level summary every this many ticks
    pub log_every_ticks: u64,
}

impl Default for FusionConfig {
    fn default() -> Self {
        Self {
            grid: GridConfig::default(),
            sensor: SensorConfig::default(),
            tracker: TrackerConfig::default(),
            controller: ControllerConfig::default(),
            coordinator: CoordinatorConfig::default(),
            seed: 0x5EED,
        }
    }
}

impl Default for GridConfig {
    fn default() -> Self {
        Self {
            initial_probability: 0.7,
            obstacle_threshold: 0.8,
            free_threshold: 0.2,
            cells_per_unit: 1.0,
            unknown_scan_interval_s: 3.0,
            frontier_window: 80,
        }
    }
}

impl Default for SensorConfig {
    fn default() -> Self {
        Self {
            true_positive: 0.97,
            true_negative: 0.9,
        }
    }
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            position_variance: 0.1,
            velocity_variance: 0.1,
            acceleration_variance: 100.0,
            prior_position_variance: 100.0,
            prior_velocity_variance: 10.0,
            prior_acceleration_variance: 100.0,
            observation_std_x: 5.0,
            observation_std_y: 5.0,
            friction: 0.0,
        }
    }
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            sweep_interval_s: 1.0,
            history_len: 20,
            visit_record_interval_s: 1.0,
            stall_epsilon: 7.0,
            stall_timeout_s: 2.0,
            explore_attraction: FieldShape::new(2.0, 20.0, 2.0),
            goal_attraction: FieldShape::new(2.0, 20.0, 2.0),
            visited_repulsion: FieldShape::new(2.0, 15.0, 0.3),
            contact_repulsion: FieldShape::new(5.0, 25.0, 1.5),
            contact_tangential: FieldShape::new(5.0, 30.0, 1.0),
            stall_repulsion: FieldShape::new(5.0, 30.0, 6.0),
            obstacle_repulsion: FieldShape::new(1.0, 6.0, 0.5),
            obstacle_scan_radius: 6.0,
            enemy_repulsion: FieldShape::new(6.0, 30.0, 2.0),
            shot_repulsion: FieldShape::new(6.0, 18.0, 2.0),
            teammate_tangential: FieldShape::new(6.0, 80.0, 1.0),
            max_throttle: 1.0,
            turn_gain: 2.0,
            fire_policy: FirePolicy::Intercept,
            confidence_sigmas: 1.1,
            confidence_refresh_s: 10.0,
            fire_width: 5.0,
            behavior: BehaviorConfig::default(),
        }
    }
}

impl Default for BehaviorConfig {
    fn default() -> Self {
        Self {
            capture_flag: BehaviorWeight::new(350.0, 3.0),
            return_to_base: BehaviorWeight::new(450.0, 5.0),
            attack: BehaviorWeight::new(280.0, 6.0),
            unstick: BehaviorWeight::new(600.0, 5.0),
            engage_range: 90.0,
            defend_radius: 10.0,
            defend_boost: 3.0,
        }
    }
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            tick_deadline_ms: None,
            log_every_ticks: 50,
        }
    }
}

impl GridConfig {
    /// Swap inverted thresholds, then reject anything still unusable.
    fn normalize(&mut self) -> Result<()> {
        if self.free_threshold > self.obstacle_threshold {
            std::mem::swap(&mut self.free_threshold, &mut self.obstacle_threshold);
        }
        for (name, value) in [
            ("free_threshold", self.free_threshold),
            ("obstacle_threshold", self.obstacle_threshold),
            ("initial_probability", self.initial_probability),
        ] {
            ensure!(
                value > 0.0 && value < 1.0,
                "grid.{name} must lie strictly between 0 and 1, got {value}"
            );
        }
        ensure!(
            self.cells_per_unit.is_finite() && self.cells_per_unit > 0.0,
            "grid.cells_per_unit must be positive, got {}",
            self.cells_per_unit
        );
        ensure!(self.frontier_window > 0, "grid.frontier_window must be positive");
        ensure!(
            self.unknown_scan_interval_s >= 0.0,
            "grid.unknown_scan_interval_s must not be negative"
        );
        Ok(())
    }
}

impl SensorConfig {
    /// Lowest and highest accuracy a sensor may claim.
    pub const MIN_ACCURACY: f64 = 0.01;
    pub const MAX_ACCURACY: f64 = 0.99;

    /// Clamp both accuracies away from 0 and 1 so updates never saturate.
    pub fn clamped(self) -> Result<Self> {
        for (name, value) in [
            ("true_positive", self.true_positive),
            ("true_negative", self.true_negative),
        ] {
            if !value.is_finite() {
                bail!("sensor.{name} must be finite, got {value}");
            }
        }
        Ok(Self {
            true_positive: self
                .true_positive
                .clamp(Self::MIN_ACCURACY, Self::MAX_ACCURACY),
            true_negative: self
                .true_negative
                .clamp(Self::MIN_ACCURACY, Self::MAX_ACCURACY),
        })
    }
}

impl FusionConfig {
    /// Normalize and validate. Any error here is fatal at startup.
    pub fn validated(mut self) -> Result<Self> {
        self.grid.normalize()?;
        self.sensor = self.sensor.clamped()?;

        let c = &self.controller;
        ensure!(c.history_len > 0, "controller.history_len must be positive");
        for (name, value) in [
            ("sweep_interval_s", c.sweep_interval_s),
            ("visit_record_interval_s", c.visit_record_interval_s),
            ("stall_timeout_s", c.stall_timeout_s),
            ("confidence_refresh_s", c.confidence_refresh_s),
        ] {
            ensure!(
                value.is_finite() && value > 0.0,
                "controller.{name} must be positive, got {value}"
            );
        }
        ensure!(
            c.stall_epsilon >= 0.0,
            "controller.stall_epsilon must not be negative"
        );
        ensure!(
            c.confidence_sigmas > 0.0,
            "controller.confidence_sigmas must be positive"
        );

        let b = &c.behavior;
        for (name, weight) in [
            ("capture_flag", b.capture_flag),
            ("return_to_base", b.return_to_base),
            ("attack", b.attack),
            ("unstick", b.unstick),
        ] {
            ensure!(
                weight.priority.is_finite() && weight.priority >= 0.0,
                "controller.behavior.{name}.priority must be a non-negative number"
            );
            ensure!(
                weight.min_hold_s.is_finite() && weight.min_hold_s >= 0.0,
                "controller.behavior.{name}.min_hold_s must be a non-negative number"
            );
        }
        for (name, value) in [
            ("engage_range", b.engage_range),
            ("defend_radius", b.defend_radius),
            ("defend_boost", b.defend_boost),
        ] {
            ensure!(
                value.is_finite() && value >= 0.0,
                "controller.behavior.{name} must be a non-negative number, got {value}"
            );
        }

        let t = &self.tracker;
        for (name, value) in [
            ("position_variance", t.position_variance),
            ("velocity_variance", t.velocity_variance),
            ("acceleration_variance", t.acceleration_variance),
            ("observation_std_x", t.observation_std_x),
            ("observation_std_y", t.observation_std_y),
        ] {
            ensure!(
                value.is_finite() && value >= 0.0,
                "tracker.{name} must be a non-negative number, got {value}"
            );
        }
        Ok(self)
    }

    /// Replace the sensor model with the accuracies reported by the arena.
    pub fn with_arena_sensor(
        mut self,
        true_positive: Option<f64>,
        true_negative: Option<f64>,
    ) -> Self {
        if let Some(tp) = true_positive {
            self.sensor.true_positive = tp;
        }
        if let Some(tn) = true_negative {
            self.sensor.true_negative = tn;
        }
        self
    }
}
