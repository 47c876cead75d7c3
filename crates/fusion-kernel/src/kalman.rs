//! Constant-acceleration Kalman tracker for a single adversary.
//!
//! State vector: `[x, vx, ax, y, vy, ay]`. Observations are noisy `(x, y)`
//! positions. The transition matrix is rebuilt from the elapsed time on every
//! call, so there is no shared `F` for callers to keep in sync.

use anyhow::{Result, anyhow, ensure};
use nalgebra::{Matrix2, Matrix2x6, Matrix6, Matrix6x2, Point2, Vector2, Vector6};

use crate::config::TrackerConfig;

/// Whether the tracker currently believes its estimate describes a live target.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrackState {
    Tracking,
    Lost,
}

/// Six-state linear estimator with a predict/update cycle.
#[derive(Debug, Clone)]
pub struct KalmanTracker {
    /// Mean estimate
    mu: Vector6<f64>,
    /// Estimate covariance
    sigma: Matrix6<f64>,
    /// Process noise
    sigma_x: Matrix6<f64>,
    /// Observation noise
    sigma_z: Matrix2<f64>,
    /// Observation matrix, selects x and y
    h: Matrix2x6<f64>,
    /// High-uncertainty covariance restored on reset
    prior: Matrix6<f64>,
    /// Drag coupling acceleration back into velocity
    friction: f64,
    state: TrackState,
    time_from_start: f64,
}

impl KalmanTracker {
    pub fn new(config: &TrackerConfig) -> Self {
        let sigma_x = Matrix6::from_diagonal(&Vector6::new(
            config.position_variance,
            config.velocity_variance,
            config.acceleration_variance,
            config.position_variance,
            config.velocity_variance,
            config.acceleration_variance,
        ));
        let prior = Matrix6::from_diagonal(&Vector6::new(
            config.prior_position_variance,
            config.prior_velocity_variance,
            config.prior_acceleration_variance,
            config.prior_position_variance,
            config.prior_velocity_variance,
            config.prior_acceleration_variance,
        ));
        let sigma_z = Matrix2::new(
            config.observation_std_x.powi(2),
            0.0,
            0.0,
            config.observation_std_y.powi(2),
        );
        let mut h = Matrix2x6::zeros();
        h[(0, 0)] = 1.0;
        h[(1, 3)] = 1.0;

        Self {
            mu: Vector6::zeros(),
            sigma: prior,
            sigma_x,
            sigma_z,
            h,
            prior,
            friction: config.friction,
            state: TrackState::Tracking,
            time_from_start: 0.0,
        }
    }

    /// Newtonian transition for `dt` seconds.
    pub fn transition(dt: f64, friction: f64) -> Matrix6<f64> {
        let mut f = Matrix6::identity();
        let half_dt2 = dt * dt / 2.0;
        for base in [0, 3] {
            f[(base, base + 1)] = dt;
            f[(base + 1, base + 2)] = dt;
            f[(base, base + 2)] = half_dt2;
            f[(base + 2, base + 1)] = friction;
        }
        f
    }

    /// Position the target will have after `dt` seconds. Does not touch the
    /// estimate.
    pub fn predict(&self, dt: f64) -> Point2<f64> {
        let ahead = Self::transition(dt, self.friction) * self.mu;
        Point2::new(ahead[0], ahead[3])
    }

    /// Covariance after propagating `dt` seconds, before any observation.
    pub fn predicted_covariance(&self, dt: f64) -> Matrix6<f64> {
        let f = Self::transition(dt, self.friction);
        f * self.sigma * f.transpose() + self.sigma_x
    }

    /// Fold the observation `(x, y)`, taken `dt` seconds after the previous
    /// one, into the estimate. Returns the new estimated position.
    ///
    /// On any numeric failure the previous estimate is kept untouched.
    pub fn update(&mut self, dt: f64, x: f64, y: f64) -> Result<Point2<f64>> {
        ensure!(dt.is_finite() && dt >= 0.0, "invalid time step {dt}");
        ensure!(x.is_finite() && y.is_finite(), "non-finite observation ({x}, {y})");

        let f = Self::transition(dt, self.friction);
        let ht: Matrix6x2<f64> = self.h.transpose();
        let z = Vector2::new(x, y);

        let common = f * self.sigma * f.transpose() + self.sigma_x;
        let innovation_cov = self.h * common * ht + self.sigma_z;
        let inverse = innovation_cov
            .try_inverse()
            .ok_or_else(|| anyhow!("innovation covariance is singular"))?;
        let gain = common * ht * inverse;

        let predicted = f * self.mu;
        let mu = predicted + gain * (z - self.h * predicted);
        let sigma = (Matrix6::identity() - gain * self.h) * common;
        // Round-off slowly breaks symmetry; fold it back.
        let sigma = (sigma + sigma.transpose()) * 0.5;

        ensure!(
            mu.iter().all(|v| v.is_finite()) && sigma.iter().all(|v| v.is_finite()),
            "update produced a non-finite estimate"
        );

        self.mu = mu;
        self.sigma = sigma;
        self.time_from_start += dt;
        self.state = TrackState::Tracking;
        Ok(self.position())
    }

    /// Restore the high-uncertainty prior covariance.
    ///
    /// The mean is kept as a starting guess and `time_from_start` keeps
    /// counting across resets.
    pub fn reset(&mut self) {
        self.sigma = self.prior;
        self.state = TrackState::Tracking;
    }

    /// The target can no longer be observed (destroyed or out of view).
    pub fn mark_lost(&mut self) {
        self.state = TrackState::Lost;
    }

    /// Place the estimate on an observation with no motion and prior covariance.
    pub fn seed(&mut self, x: f64, y: f64) {
        self.mu = Vector6::new(x, 0.0, 0.0, y, 0.0, 0.0);
        self.sigma = self.prior;
        self.state = TrackState::Tracking;
    }

    /// True when `observation` lies within `k` standard deviations of the
    /// estimate on both axes.
    pub fn confidence(&self, observation: &Point2<f64>, k: f64) -> bool {
        let std_x = self.sigma[(0, 0)].max(0.0).sqrt();
        let std_y = self.sigma[(3, 3)].max(0.0).sqrt();
        (observation.x - self.mu[0]).abs() < std_x * k
            && (observation.y - self.mu[3]).abs() < std_y * k
    }

    /// Position block of the covariance.
    pub fn positional_covariance(&self) -> Matrix2<f64> {
        Matrix2::new(
            self.sigma[(0, 0)],
            self.sigma[(0, 3)],
            self.sigma[(3, 0)],
            self.sigma[(3, 3)],
        )
    }

    pub fn position(&self) -> Point2<f64> {
        Point2::new(self.mu[0], self.mu[3])
    }

    pub fn velocity(&self) -> Vector2<f64> {
        Vector2::new(self.mu[1], self.mu[4])
    }

    pub fn state(&self) -> TrackState {
        self.state
    }

    pub fn time_from_start(&self) -> f64 {
        self.time_from_start
    }

    pub fn covariance(&self) -> &Matrix6<f64> {
        &self.sigma
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tracker() -> KalmanTracker {
        KalmanTracker::new(&TrackerConfig::default())
    }

    #[test]
    fn test_transition_layout() {
        let f = KalmanTracker::transition(0.5, 0.1);
        assert_eq!(f[(0, 1)], 0.5);
        assert_eq!(f[(1, 2)], 0.5);
        assert_eq!(f[(0, 2)], 0.125);
        assert_eq!(f[(3, 5)], 0.125);
        assert_eq!(f[(2, 1)], 0.1);
        assert_eq!(f[(5, 4)], 0.1);
        assert_eq!(f[(2, 2)], 1.0);
    }

    #[test]
    fn test_predict_does_not_mutate() {
        let mut t = tracker();
        t.update(1.0, 10.0, 0.0).unwrap();
        t.update(1.0, 20.0, 0.0).unwrap();
        let before = t.position();
        let ahead = t.predict(2.0);
        assert_eq!(t.position(), before);
        assert!(ahead.x > before.x, "moving target should be extrapolated forward");
    }

    #[test]
    fn test_zero_dt_repeated_observation_converges() {
        let mut t = tracker();
        for _ in 0..500 {
            t.update(0.0, 42.0, -17.0).unwrap();
        }
        let p = t.position();
        assert!((p.x - 42.0).abs() < 0.5, "x = {}", p.x);
        assert!((p.y + 17.0).abs() < 0.5, "y = {}", p.y);
    }

    #[test]
    fn test_confirming_observation_does_not_increase_positional_variance() {
        let mut t = tracker();
        t.update(0.5, 3.0, 4.0).unwrap();
        t.update(0.5, 4.0, 5.0).unwrap();

        let dt = 0.5;
        let predicted = t.predict(dt);
        let propagated = t.predicted_covariance(dt);
        t.update(dt, predicted.x, predicted.y).unwrap();

        assert!(t.covariance()[(0, 0)] <= propagated[(0, 0)]);
        assert!(t.covariance()[(3, 3)] <= propagated[(3, 3)]);
        let p = t.position();
        assert!((p.x - predicted.x).abs() < 1e-9);
        assert!((p.y - predicted.y).abs() < 1e-9);
    }

    #[test]
    fn test_singular_innovation_keeps_prior() {
        let config = TrackerConfig {
            position_variance: 0.0,
            prior_position_variance: 0.0,
            observation_std_x: 0.0,
            observation_std_y: 0.0,
            ..TrackerConfig::default()
        };
        let mut t = KalmanTracker::new(&config);
        let mu_before = t.position();
        let sigma_before = *t.covariance();
        assert!(t.update(0.0, 5.0, 5.0).is_err());
        assert_eq!(t.position(), mu_before);
        assert_eq!(*t.covariance(), sigma_before);
        assert_eq!(t.time_from_start(), 0.0);
    }

    #[test]
    fn test_invalid_dt_rejected() {
        let mut t = tracker();
        assert!(t.update(-1.0, 0.0, 0.0).is_err());
        assert!(t.update(f64::NAN, 0.0, 0.0).is_err());
    }

    #[test]
    fn test_reset_restores_prior_and_keeps_time() {
        let mut t = tracker();
        for _ in 0..20 {
            t.update(0.25, 1.0, 1.0).unwrap();
        }
        let tight = t.positional_covariance()[(0, 0)];
        t.mark_lost();
        assert_eq!(t.state(), TrackState::Lost);

        t.reset();
        assert_eq!(t.state(), TrackState::Tracking);
        assert!(t.positional_covariance()[(0, 0)] > tight);
        assert!((t.time_from_start() - 5.0).abs() < 1e-9);
    }

    #[test]
    fn test_velocity_follows_steady_motion() {
        let mut t = tracker();
        t.seed(0.0, 0.0);
        for step in 1..=50 {
            let x = 10.0 * step as f64 * 0.1;
            t.update(0.1, x, 0.0).unwrap();
        }
        let v = t.velocity();
        assert!(v.x > 5.0, "vx = {}", v.x);
        assert!(v.y.abs() < 1e-9, "vy = {}", v.y);
    }

    #[test]
    fn test_confidence_gate() {
        let mut t = tracker();
        t.seed(0.0, 0.0);
        for _ in 0..30 {
            t.update(0.1, 0.0, 0.0).unwrap();
        }
        assert!(t.confidence(&Point2::new(0.5, -0.5), 2.0));
        assert!(!t.confidence(&Point2::new(500.0, 0.0), 2.0));
    }
}
