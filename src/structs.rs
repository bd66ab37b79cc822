//! # Core Data Structures
//!
//! This module defines the fundamental data types shared by every component:
//!
//! - **Vector2D**: planar position/velocity/acceleration with arithmetic operations
//! - **AgentState**: full physical state of one agent (position, velocity,
//!   orientation, angular rate); the third axis and the attitude fields are
//!   carried through untouched for the dynamics collaborator
//! - **Obstacle**: position and velocity of something an agent must avoid
//! - **BarrierParams**: super-ellipse shape `(a, b)` and safety margin
//! - **Gains / NominalGains**: barrier convergence gains and baseline PD gains

use nalgebra::Vector3;
use std::ops::{Add, AddAssign, Mul, Neg, Sub};

use crate::error::ScenarioError;

#[derive(Debug, Clone, Copy, PartialEq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Vector2D {
    pub x: f64,
    pub y: f64,
}

impl Vector2D {
    pub const ZERO: Vector2D = Vector2D { x: 0.0, y: 0.0 };

    pub fn new(x: f64, y: f64) -> Self {
        Vector2D { x, y }
    }

    pub fn magnitude(&self) -> f64 {
        self.x.hypot(self.y)
    }

    /// Unit vector in the same direction, or zero for the zero vector.
    /// Components are pre-scaled so huge finite vectors do not overflow.
    pub fn normalize(&self) -> Vector2D {
        let scale = self.x.abs().max(self.y.abs());
        if scale > 0.0 && scale.is_finite() {
            let x = self.x / scale;
            let y = self.y / scale;
            let mag = x.hypot(y);
            Vector2D { x: x / mag, y: y / mag }
        } else {
            Vector2D::ZERO
        }
    }

    pub fn dot(&self, other: &Vector2D) -> f64 {
        self.x * other.x + self.y * other.y
    }

    pub fn distance(&self, other: &Vector2D) -> f64 {
        (*self - *other).magnitude()
    }

    pub fn is_finite(&self) -> bool {
        self.x.is_finite() && self.y.is_finite()
    }

    /// Lifts the vector into 3-D with the given third component.
    pub fn extend(&self, z: f64) -> Vector3<f64> {
        Vector3::new(self.x, self.y, z)
    }
}

impl Add for Vector2D {
    type Output = Vector2D;

    fn add(self, other: Vector2D) -> Vector2D {
        Vector2D {
            x: self.x + other.x,
            y: self.y + other.y,
        }
    }
}

impl AddAssign for Vector2D {
    fn add_assign(&mut self, other: Vector2D) {
        self.x += other.x;
        self.y += other.y;
    }
}

impl Sub for Vector2D {
    type Output = Vector2D;

    fn sub(self, other: Vector2D) -> Vector2D {
        Vector2D {
            x: self.x - other.x,
            y: self.y - other.y,
        }
    }
}

impl Mul<f64> for Vector2D {
    type Output = Vector2D;

    fn mul(self, scalar: f64) -> Vector2D {
        Vector2D {
            x: self.x * scalar,
            y: self.y * scalar,
        }
    }
}

impl Neg for Vector2D {
    type Output = Vector2D;

    fn neg(self) -> Vector2D {
        Vector2D {
            x: -self.x,
            y: -self.y,
        }
    }
}

impl From<(f64, f64)> for Vector2D {
    fn from((x, y): (f64, f64)) -> Self {
        Vector2D { x, y }
    }
}

/// Physical state of one agent.
///
/// Only the planar part of `position` and `velocity` enters the barrier and
/// nominal-control math. Everything else is opaque to the control core and is
/// only read or written by the dynamics collaborator.
#[derive(Debug, Clone, PartialEq)]
pub struct AgentState {
    pub position: Vector3<f64>,
    pub velocity: Vector3<f64>,
    /// Roll, pitch, yaw in radians.
    pub orientation: Vector3<f64>,
    pub angular_rate: Vector3<f64>,
}

impl AgentState {
    pub fn new(position: Vector3<f64>, velocity: Vector3<f64>) -> Self {
        AgentState {
            position,
            velocity,
            orientation: Vector3::zeros(),
            angular_rate: Vector3::zeros(),
        }
    }

    pub fn planar_position(&self) -> Vector2D {
        Vector2D::new(self.position.x, self.position.y)
    }

    pub fn planar_velocity(&self) -> Vector2D {
        Vector2D::new(self.velocity.x, self.velocity.y)
    }

    /// True when every field the dynamics collaborator produced is finite.
    pub fn is_finite(&self) -> bool {
        self.position.iter().all(|v| v.is_finite())
            && self.velocity.iter().all(|v| v.is_finite())
            && self.orientation.iter().all(|v| v.is_finite())
            && self.angular_rate.iter().all(|v| v.is_finite())
    }
}

/// Something an agent must stay away from during one tick.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Obstacle {
    pub position: Vector2D,
    pub velocity: Vector2D,
}

impl Obstacle {
    pub fn new(position: Vector2D, velocity: Vector2D) -> Self {
        Obstacle { position, velocity }
    }

    pub fn stationary(position: Vector2D) -> Self {
        Obstacle {
            position,
            velocity: Vector2D::ZERO,
        }
    }
}

/// Shape of the unsafe super-elliptical region around every obstacle.
///
/// Fields are private so a value can only exist once `a > 0`, `b > 0` and
/// `safety_dist > 0` have been checked.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BarrierParams {
    a: f64,
    b: f64,
    safety_dist: f64,
}

impl BarrierParams {
    pub fn new(a: f64, b: f64, safety_dist: f64) -> Result<Self, ScenarioError> {
        let finite = a.is_finite() && b.is_finite() && safety_dist.is_finite();
        if !finite || a <= 0.0 || b <= 0.0 || safety_dist <= 0.0 {
            return Err(ScenarioError::InvalidShapeParams { a, b, safety_dist });
        }
        Ok(BarrierParams { a, b, safety_dist })
    }

    pub fn a(&self) -> f64 {
        self.a
    }

    pub fn b(&self) -> f64 {
        self.b
    }

    pub fn safety_dist(&self) -> f64 {
        self.safety_dist
    }

    pub(crate) fn a4(&self) -> f64 {
        self.a.powi(4)
    }

    pub(crate) fn b4(&self) -> f64 {
        self.b.powi(4)
    }
}

/// Exponential convergence gains of the barrier's second-order condition
/// `hdd + kd * hd + kp * h >= 0`.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Gains {
    pub kp: f64,
    pub kd: f64,
}

impl Gains {
    pub fn new(kp: f64, kd: f64) -> Self {
        Gains { kp, kd }
    }

    pub fn validate(&self) -> Result<(), ScenarioError> {
        if !(self.kp.is_finite() && self.kd.is_finite()) || self.kp <= 0.0 || self.kd <= 0.0 {
            return Err(ScenarioError::InvalidGains(format!(
                "barrier gains must be positive, got kp={} kd={}",
                self.kp, self.kd
            )));
        }
        Ok(())
    }
}

impl Default for Gains {
    fn default() -> Self {
        Gains { kp: 6.0, kd: 8.0 }
    }
}

/// Baseline PD drive toward the goal: `desired_vel = k_pos * (pos - goal)`,
/// `u = k_vel * (vel - desired_vel)`, norm capped at `cap`.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct NominalGains {
    pub k_pos: f64,
    pub k_vel: f64,
    pub cap: f64,
}

impl NominalGains {
    pub fn validate(&self) -> Result<(), ScenarioError> {
        let finite = self.k_pos.is_finite() && self.k_vel.is_finite() && self.cap.is_finite();
        if !finite || self.cap <= 0.0 {
            return Err(ScenarioError::InvalidGains(format!(
                "nominal gains must be finite with a positive cap, got k_pos={} k_vel={} cap={}",
                self.k_pos, self.k_vel, self.cap
            )));
        }
        Ok(())
    }
}

impl Default for NominalGains {
    fn default() -> Self {
        NominalGains {
            k_pos: -0.08,
            k_vel: -0.2,
            cap: 0.01,
        }
    }
}
