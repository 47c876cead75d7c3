//! Turning a net force into a drive command.

use std::f64::consts::{PI, TAU};

use nalgebra::Vector2;

use crate::arena::Command;

/// Map any angle into `(-π, π]`.
pub fn normalize_angle(angle: f64) -> f64 {
    let wrapped = angle.sin().atan2(angle.cos());
    if wrapped <= -PI { wrapped + TAU } else { wrapped }
}

/// Drive command that follows `force` from a tank facing `heading`.
///
/// A zero force means nothing pulls the tank anywhere, so it stops.
pub fn steer(
    agent: usize,
    force: &Vector2<f64>,
    heading: f64,
    max_throttle: f64,
    turn_gain: f64,
) -> Command {
    if force.norm_squared() == 0.0 || !force.x.is_finite() || !force.y.is_finite() {
        return Command::hold(agent);
    }
    let target = force.y.atan2(force.x);
    Command {
        agent,
        throttle: max_throttle,
        turn_rate: turn_gain * normalize_angle(target - heading),
        fire: false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_three_pi_is_pi() {
        assert!((normalize_angle(3.0 * PI) - PI).abs() < 1e-9);
        assert!((normalize_angle(-PI) - PI).abs() < 1e-9);
        assert!((normalize_angle(PI) - PI).abs() < 1e-9);
    }

    #[test]
    fn test_normalize_stays_in_half_open_range() {
        let mut angle = -20.0;
        while angle < 20.0 {
            let n = normalize_angle(angle);
            assert!(n > -PI && n <= PI, "{angle} -> {n}");
            assert!(((angle - n) / TAU - ((angle - n) / TAU).round()).abs() < 1e-9);
            angle += 0.37;
        }
    }

    #[test]
    fn test_steer_turns_toward_force() {
        let cmd = steer(3, &Vector2::new(0.0, 1.0), 0.0, 1.0, 2.0);
        assert_eq!(cmd.agent, 3);
        assert_eq!(cmd.throttle, 1.0);
        assert!((cmd.turn_rate - PI).abs() < 1e-9);
        assert!(!cmd.fire);
    }

    #[test]
    fn test_zero_force_holds() {
        assert_eq!(steer(0, &Vector2::zeros(), 1.0, 1.0, 2.0), Command::hold(0));
        assert_eq!(steer(0, &Vector2::new(f64::NAN, 0.0), 1.0, 1.0, 2.0), Command::hold(0));
    }
}
