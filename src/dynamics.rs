//! Collaborator seams for actuation and physics.
//!
//! The control core produces a 3-axis acceleration. An `Actuator` turns that
//! into whatever low-level command a `Dynamics` model consumes, and the model
//! integrates one time step. `PointMass` is a reference model for both roles:
//! a double integrator with optional linear drag whose command is the
//! acceleration itself.

use nalgebra::Vector3;

use crate::structs::AgentState;

pub trait Actuator {
    type Command;

    fn to_command(&self, state: &AgentState, desired_accel: Vector3<f64>) -> Self::Command;
}

pub trait Dynamics {
    type Command;

    fn step(&self, state: &AgentState, command: &Self::Command, dt: f64) -> AgentState;
}

#[derive(Debug, Clone, Copy, PartialEq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct PointMass {
    /// Linear drag coefficient in 1/s.
    pub drag: f64,
}

impl PointMass {
    pub fn with_drag(drag: f64) -> Self {
        PointMass { drag }
    }
}

impl Actuator for PointMass {
    type Command = Vector3<f64>;

    fn to_command(&self, _state: &AgentState, desired_accel: Vector3<f64>) -> Vector3<f64> {
        desired_accel
    }
}

impl Dynamics for PointMass {
    type Command = Vector3<f64>;

    /// Explicit Euler: position advances with the velocity held at the start
    /// of the step.
    fn step(&self, state: &AgentState, accel: &Vector3<f64>, dt: f64) -> AgentState {
        let velocity = state.velocity + (accel - state.velocity * self.drag) * dt;
        let position = state.position + state.velocity * dt;
        AgentState {
            position,
            velocity,
            orientation: state.orientation,
            angular_rate: state.angular_rate,
        }
    }
}
