//! Baseline goal-seeking controller used as the QP target and as the
//! output when safety filtering is disabled.

use crate::structs::{NominalGains, Vector2D};

/// Saturated PD drive toward `goal`.
///
/// `desired_vel = k_pos * (pos - goal)`, `u = k_vel * (vel - desired_vel)`;
/// if `|u| > cap` the direction is kept and the norm clipped to `cap`.
/// The result is finite with norm at most `cap` for every finite input.
pub fn nominal_control(
    position: Vector2D,
    velocity: Vector2D,
    goal: Vector2D,
    gains: &NominalGains,
) -> Vector2D {
    let u = pd_drive(position, velocity, goal, gains);
    if u.is_finite() {
        return clip(u, gains.cap);
    }

    // An intermediate overflowed. The law is linear, so the direction is
    // recovered from the inputs shrunk by their largest component.
    let scale = [position, velocity, goal]
        .iter()
        .flat_map(|v| [v.x.abs(), v.y.abs()])
        .fold(0.0_f64, f64::max);
    let shrink = |v: Vector2D| Vector2D::new(v.x / scale, v.y / scale);
    let direction = pd_drive(shrink(position), shrink(velocity), shrink(goal), gains).normalize();
    direction * gains.cap
}

fn pd_drive(position: Vector2D, velocity: Vector2D, goal: Vector2D, gains: &NominalGains) -> Vector2D {
    let desired_velocity = (position - goal) * gains.k_pos;
    (velocity - desired_velocity) * gains.k_vel
}

fn clip(u: Vector2D, cap: f64) -> Vector2D {
    if u.magnitude() > cap {
        u.normalize() * cap
    } else {
        u
    }
}
