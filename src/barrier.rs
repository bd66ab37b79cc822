//! # Exponential Control Barrier Function
//!
//! For an agent at relative position `r = p_agent - p_obstacle` the barrier is
//!
//! ```text
//! h(r) = r.x^4 / a^4 + r.y^4 / b^4 - safety_dist
//! ```
//!
//! `h > 0` is outside the unsafe super-ellipse, `h = 0` is its boundary and
//! `h < 0` is inside. With relative velocity `v = v_agent - v_obstacle` and
//! control (acceleration) `u`, the time derivatives are
//!
//! ```text
//! hd  = 4 r.x^3 v.x / a^4 + 4 r.y^3 v.y / b^4
//! hdd = A . u + extra
//! A     = [4 r.x^3 / a^4, 4 r.y^3 / b^4]
//! extra = -(12 r.x^2 v.x^2 / a^4 + 12 r.y^2 v.y^2 / b^4)
//! ```
//!
//! `extra` carries a minus sign: the velocity-only terms of the exact second
//! derivative are non-negative, so `A . u + extra` never exceeds the true
//! `hdd` and any control accepted by the safety filter also satisfies the
//! exact condition. The constraint is therefore more conservative than the
//! exact ECBF condition `A . u >= extra - kp * h - kd * hd` taken with the
//! true second derivative: near an obstacle with large relative velocity it
//! rejects some controls the exact condition would admit.

use crate::structs::{BarrierParams, Vector2D};

/// Barrier quantities for one agent/obstacle pair at one instant.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BarrierEval {
    /// Barrier value.
    pub h: f64,
    /// First time derivative.
    pub hd: f64,
    /// Coefficient of the control input in the second derivative.
    pub a_row: Vector2D,
    /// Control-independent part of the second derivative.
    pub extra: f64,
}

impl BarrierEval {
    /// Right-hand side of `A . u >= -extra - kp * h - kd * hd`.
    pub fn lower_bound(&self, kp: f64, kd: f64) -> f64 {
        -self.extra - kp * self.h - kd * self.hd
    }
}

pub fn barrier_value(rel_pos: Vector2D, params: &BarrierParams) -> f64 {
    rel_pos.x.powi(4) / params.a4() + rel_pos.y.powi(4) / params.b4() - params.safety_dist()
}

/// Evaluates `h`, `hd`, the constraint row and `extra` in one pass.
pub fn evaluate(rel_pos: Vector2D, rel_vel: Vector2D, params: &BarrierParams) -> BarrierEval {
    let a4 = params.a4();
    let b4 = params.b4();

    let a_row = Vector2D::new(
        4.0 * rel_pos.x.powi(3) / a4,
        4.0 * rel_pos.y.powi(3) / b4,
    );
    let hd = a_row.dot(&rel_vel);
    let extra = -(12.0 * rel_pos.x.powi(2) * rel_vel.x.powi(2) / a4
        + 12.0 * rel_pos.y.powi(2) * rel_vel.y.powi(2) / b4);

    BarrierEval {
        h: barrier_value(rel_pos, params),
        hd,
        a_row,
        extra,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::{assert_abs_diff_eq, assert_relative_eq};

    fn params(a: f64, b: f64, d: f64) -> BarrierParams {
        BarrierParams::new(a, b, d).unwrap()
    }

    #[test]
    fn test_h_at_origin_is_minus_safety_dist() {
        let p = params(1.0, 2.0, 2.0);
        assert_relative_eq!(barrier_value(Vector2D::ZERO, &p), -2.0);
    }

    #[test]
    fn test_h_grows_without_bound() {
        let p = params(1.0, 1.0, 2.0);
        let mut last = f64::NEG_INFINITY;
        for k in 1..8 {
            let d = 10f64.powi(k);
            let h = barrier_value(Vector2D::new(d, -d), &p);
            assert!(h > last, "h must keep growing with distance");
            last = h;
        }
        assert!(last > 1e20);
    }

    #[test]
    fn test_h_strictly_increasing_in_abs_x_and_abs_y() {
        let p = params(1.5, 0.7, 2.0);
        for &fixed in &[-2.0, 0.0, 0.3, 4.0] {
            let mut prev_x = barrier_value(Vector2D::new(0.0, fixed), &p);
            let mut prev_y = barrier_value(Vector2D::new(fixed, 0.0), &p);
            for i in 1..50 {
                let s = i as f64 * 0.1;
                for sign in [1.0, -1.0] {
                    let hx = barrier_value(Vector2D::new(sign * s, fixed), &p);
                    let hy = barrier_value(Vector2D::new(fixed, sign * s), &p);
                    assert!(hx > prev_x, "h not increasing in |x| at x={}", sign * s);
                    assert!(hy > prev_y, "h not increasing in |y| at y={}", sign * s);
                }
                prev_x = barrier_value(Vector2D::new(s, fixed), &p);
                prev_y = barrier_value(Vector2D::new(fixed, s), &p);
            }
        }
    }

    #[test]
    fn test_boundary_point_on_axis() {
        // x^4 / a^4 = safety_dist  =>  x = a * safety_dist^(1/4)
        let p = params(2.0, 1.0, 3.0);
        let x = 2.0 * 3f64.powf(0.25);
        assert_abs_diff_eq!(barrier_value(Vector2D::new(x, 0.0), &p), 0.0, epsilon = 1e-12);
    }

    #[test]
    fn test_evaluate_matches_closed_form() {
        let p = params(1.0, 2.0, 2.0);
        let r = Vector2D::new(1.5, -1.0);
        let v = Vector2D::new(-0.5, 2.0);
        let eval = evaluate(r, v, &p);

        assert_relative_eq!(eval.h, 1.5f64.powi(4) + 1.0 / 16.0 - 2.0);
        assert_relative_eq!(eval.a_row.x, 4.0 * 1.5f64.powi(3));
        assert_relative_eq!(eval.a_row.y, 4.0 * -1.0 / 16.0);
        assert_relative_eq!(eval.hd, 4.0 * 1.5f64.powi(3) * -0.5 + 4.0 * -1.0 * 2.0 / 16.0);
        assert_relative_eq!(eval.extra, -(12.0 * 2.25 * 0.25 + 12.0 * 1.0 * 4.0 / 16.0));
    }

    #[test]
    fn test_hd_matches_finite_difference() {
        let p = params(1.0, 1.3, 2.0);
        let r = Vector2D::new(0.8, 1.7);
        let v = Vector2D::new(0.3, -0.9);
        let dt = 1e-7;
        let numeric = (barrier_value(r + v * dt, &p) - barrier_value(r - v * dt, &p)) / (2.0 * dt);
        assert_relative_eq!(evaluate(r, v, &p).hd, numeric, max_relative = 1e-6);
    }

    #[test]
    fn test_coincident_obstacle_has_zero_gradient() {
        let p = params(1.0, 1.0, 2.0);
        let eval = evaluate(Vector2D::ZERO, Vector2D::new(1.0, -1.0), &p);
        assert_eq!(eval.a_row, Vector2D::ZERO);
        assert_relative_eq!(eval.h, -2.0);
        assert_eq!(eval.hd, 0.0);
        assert_eq!(eval.extra, 0.0);
    }

    #[test]
    fn test_extra_is_never_positive() {
        let p = params(0.5, 3.0, 1.0);
        for &(rx, ry, vx, vy) in &[(1.0, 2.0, 3.0, -4.0), (-0.1, 0.0, 0.0, 9.0), (0.0, 0.0, 0.0, 0.0)] {
            let eval = evaluate(Vector2D::new(rx, ry), Vector2D::new(vx, vy), &p);
            assert!(eval.extra <= 0.0);
        }
    }

    #[test]
    fn test_lower_bound_combines_gains() {
        let eval = BarrierEval {
            h: 0.5,
            hd: -0.25,
            a_row: Vector2D::new(1.0, 0.0),
            extra: -0.1,
        };
        assert_relative_eq!(eval.lower_bound(6.0, 8.0), 0.1 - 3.0 + 2.0);
    }
}
