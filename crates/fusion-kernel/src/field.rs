//! Potential fields: the steering forces the controller composes each tick.
//!
//! Each field is a small tagged value evaluated through [`VectorField::force`].
//! Fields are combined by plain summation ([`compose`]); normalization, if any,
//! happens later when the net force is turned into a steering command.

use nalgebra::{Point2, Vector2};
use serde::{Deserialize, Serialize};
use tracing::trace;

/// Sense of rotation for a tangential field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Rotation {
    Clockwise,
    CounterClockwise,
}

impl Rotation {
    /// Angle added to the bearing toward the center.
    fn offset(self) -> f64 {
        match self {
            Self::Clockwise => std::f64::consts::FRAC_PI_2,
            Self::CounterClockwise => -std::f64::consts::FRAC_PI_2,
        }
    }
}

/// A circular potential field around `center`.
///
/// `inner_radius` and `outer_radius` bound the linear ramp; `gain` scales the
/// saturated magnitude.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum VectorField {
    /// Pulls toward the center: zero inside `inner_radius`, `gain` beyond
    /// `outer_radius`, linear in between.
    Attraction {
        center: Point2<f64>,
        inner_radius: f64,
        outer_radius: f64,
        gain: f64,
    },
    /// Pushes away from the center: `gain` inside `inner_radius`, zero beyond
    /// `outer_radius`, linear in between.
    Repulsion {
        center: Point2<f64>,
        inner_radius: f64,
        outer_radius: f64,
        gain: f64,
    },
    /// Swirls around the center inside the annulus, zero elsewhere.
    Tangential {
        center: Point2<f64>,
        inner_radius: f64,
        outer_radius: f64,
        direction: Rotation,
        gain: f64,
    },
}

impl VectorField {
    pub fn attraction(
        center: Point2<f64>,
        inner_radius: f64,
        outer_radius: f64,
        gain: f64,
    ) -> Self {
        Self::Attraction {
            center,
            inner_radius,
            outer_radius,
            gain,
        }
    }

    pub fn repulsion(center: Point2<f64>, inner_radius: f64, outer_radius: f64, gain: f64) -> Self {
        Self::Repulsion {
            center,
            inner_radius,
            outer_radius,
            gain,
        }
    }

    pub fn tangential(
        center: Point2<f64>,
        inner_radius: f64,
        outer_radius: f64,
        direction: Rotation,
        gain: f64,
    ) -> Self {
        Self::Tangential {
            center,
            inner_radius,
            outer_radius,
            direction,
            gain,
        }
    }

    /// Center of the field.
    pub fn center(&self) -> Point2<f64> {
        match *self {
            Self::Attraction { center, .. }
            | Self::Repulsion { center, .. }
            | Self::Tangential { center, .. } => center,
        }
    }

    /// Evaluate the force this field exerts at `point`.
    pub fn force(&self, point: &Point2<f64>) -> Vector2<f64> {
        match *self {
            Self::Attraction {
                center,
                inner_radius,
                outer_radius,
                gain,
            } => {
                let to_center = center - point;
                let distance = to_center.norm();
                if distance <= 0.0 || distance < inner_radius {
                    return Vector2::zeros();
                }
                let unit = to_center / distance;
                if distance > outer_radius {
                    unit * gain
                } else {
                    unit * gain * ramp(distance - inner_radius, inner_radius, outer_radius)
                }
            }
            Self::Repulsion {
                center,
                inner_radius,
                outer_radius,
                gain,
            } => {
                let away = point - center;
                let distance = away.norm();
                if distance > outer_radius {
                    return Vector2::zeros();
                }
                // Standing on the center has no bearing; push along +x.
                let unit = if distance > 0.0 {
                    away / distance
                } else {
                    Vector2::x()
                };
                if distance <= 0.0 || distance < inner_radius {
                    unit * gain
                } else {
                    unit * gain * ramp(outer_radius - distance, inner_radius, outer_radius)
                }
            }
            Self::Tangential {
                center,
                inner_radius,
                outer_radius,
                direction,
                gain,
            } => {
                let to_center = center - point;
                let distance = to_center.norm();
                if distance <= 0.0 || distance < inner_radius || distance > outer_radius {
                    return Vector2::zeros();
                }
                let theta = to_center.y.atan2(to_center.x) + direction.offset();
                Vector2::new(theta.cos(), theta.sin()) * gain
            }
        }
    }
}

/// Fraction of the ramp covered by `along`; a degenerate annulus counts as
/// fully saturated.
fn ramp(along: f64, inner_radius: f64, outer_radius: f64) -> f64 {
    let span = outer_radius - inner_radius;
    if span <= 0.0 {
        1.0
    } else {
        (along / span).clamp(0.0, 1.0)
    }
}

/// Sum every field's force at `point`.
///
/// Non-finite contributions are dropped so one bad field cannot poison the
/// whole tick.
pub fn compose<'a, I>(fields: I, point: &Point2<f64>) -> Vector2<f64>
where
    I: IntoIterator<Item = &'a VectorField>,
{
    fields
        .into_iter()
        .map(|field| (field, field.force(point)))
        .filter(|(field, force)| {
            let finite = force.x.is_finite() && force.y.is_finite();
            if !finite {
                trace!(?field, "Dropping non-finite field contribution");
            }
            finite
        })
        .fold(Vector2::zeros(), |acc, (_, force)| acc + force)
}
