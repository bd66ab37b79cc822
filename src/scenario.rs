//! # Scenario Configuration
//!
//! A scenario is an in-memory description of a run: agents with their start
//! states, goals and gains; static obstacles; the barrier shape; the time
//! step and tick count; and whether the safety filter is active.
//!
//! `validate()` performs every setup-time check so a bad scenario fails
//! before the first tick.
//!
//! Presets reproduce the reference runs: two agents swapping places, three
//! agents crossing between two static obstacles, and a single agent routed
//! around an obstacle at the origin.

use nalgebra::Vector3;

use crate::error::ScenarioError;
use crate::filter::FallbackPolicy;
use crate::qp::SolverSettings;
use crate::structs::{BarrierParams, Gains, NominalGains, Vector2D};

/// Starting altitude of the preset agents. Carried through, never controlled.
const PRESET_ALTITUDE: f64 = 10.0;
const PRESET_DT: f64 = 0.01;
const PRESET_TICKS: usize = 20_000;

#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct AgentConfig {
    pub initial_position: Vector3<f64>,
    pub initial_velocity: Vector3<f64>,
    pub goal: Vector2D,
    pub gains: Gains,
    pub nominal_gains: NominalGains,
}

impl AgentConfig {
    /// Agent at rest at `(x, y)` with the preset altitude and default gains.
    pub fn at_rest(start: Vector2D, goal: Vector2D) -> Self {
        AgentConfig {
            initial_position: start.extend(PRESET_ALTITUDE),
            initial_velocity: Vector3::zeros(),
            goal,
            gains: Gains::default(),
            nominal_gains: NominalGains::default(),
        }
    }

    pub fn with_gains(mut self, gains: Gains) -> Self {
        self.gains = gains;
        self
    }
}

/// Unvalidated barrier shape as it appears in a scenario.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct ShapeConfig {
    pub a: f64,
    pub b: f64,
    pub safety_dist: f64,
}

impl ShapeConfig {
    pub fn params(&self) -> Result<BarrierParams, ScenarioError> {
        BarrierParams::new(self.a, self.b, self.safety_dist)
    }
}

impl Default for ShapeConfig {
    fn default() -> Self {
        ShapeConfig {
            a: 1.0,
            b: 1.0,
            safety_dist: 2.0,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct ScenarioConfig {
    pub agents: Vec<AgentConfig>,
    pub static_obstacles: Vec<Vector2D>,
    pub shape: ShapeConfig,
    pub dt: f64,
    pub tick_count: usize,
    pub use_safe: bool,
    pub fallback: FallbackPolicy,
    pub solver: SolverSettings,
    /// Evaluate the per-agent filters on the rayon pool.
    pub parallel: bool,
}

impl Default for ScenarioConfig {
    fn default() -> Self {
        ScenarioConfig {
            agents: Vec::new(),
            static_obstacles: Vec::new(),
            shape: ShapeConfig::default(),
            dt: PRESET_DT,
            tick_count: PRESET_TICKS,
            use_safe: true,
            fallback: FallbackPolicy::default(),
            solver: SolverSettings::default(),
            parallel: true,
        }
    }
}

impl ScenarioConfig {
    /// Checks everything that must hold before the first tick and returns the
    /// validated barrier shape.
    pub fn validate(&self) -> Result<BarrierParams, ScenarioError> {
        let params = self.shape.params()?;

        if !self.dt.is_finite() || self.dt <= 0.0 {
            return Err(ScenarioError::InvalidTimeStep(self.dt));
        }
        if self.agents.is_empty() {
            return Err(ScenarioError::NoAgents);
        }
        if let FallbackPolicy::ScaledNominal(factor) = self.fallback {
            if !self.fallback.is_valid() {
                return Err(ScenarioError::InvalidFallback(factor));
            }
        }
        if !self.solver.eps_abs.is_finite() || !self.solver.eps_rel.is_finite() || self.solver.max_iter == 0 {
            return Err(ScenarioError::InvalidSolverSettings(format!(
                "tolerances must be finite and max_iter > 0, got {:?}",
                self.solver
            )));
        }

        for (index, agent) in self.agents.iter().enumerate() {
            agent.gains.validate()?;
            agent.nominal_gains.validate()?;
            let finite = agent.initial_position.iter().all(|v| v.is_finite())
                && agent.initial_velocity.iter().all(|v| v.is_finite())
                && agent.goal.is_finite();
            if !finite {
                return Err(ScenarioError::NonFiniteAgent { index });
            }
        }

        Ok(params)
    }

    /// Two agents swap places head-on with no static obstacles.
    pub fn two_agent_swap() -> Self {
        let a = Vector2D::new(3.0, -5.0);
        let b = Vector2D::new(-5.0, 3.0);
        ScenarioConfig {
            agents: vec![AgentConfig::at_rest(a, b), AgentConfig::at_rest(b, a)],
            ..ScenarioConfig::default()
        }
    }

    /// Three agents crossing between static obstacles at `(-2, -2)` and `(1, 1)`,
    /// listed in that order.
    pub fn three_robot_crossing() -> Self {
        ScenarioConfig {
            agents: vec![
                AgentConfig::at_rest(Vector2D::new(3.0, -5.0), Vector2D::new(-6.0, 4.0)),
                AgentConfig::at_rest(Vector2D::new(-5.0, 3.0), Vector2D::new(4.0, -6.0)),
                AgentConfig::at_rest(Vector2D::new(-5.0, -3.0), Vector2D::new(6.0, 4.0)),
            ],
            static_obstacles: vec![Vector2D::new(-2.0, -2.0), Vector2D::new(1.0, 1.0)],
            ..ScenarioConfig::default()
        }
    }

    /// One agent routed past a static obstacle at the origin with an
    /// elongated barrier (`b = 2`) and softer gains.
    pub fn single_robot_static_obstacle() -> Self {
        ScenarioConfig {
            agents: vec![AgentConfig::at_rest(Vector2D::new(1.5, -3.5), Vector2D::new(-2.5, 0.75))
                .with_gains(Gains::new(3.0, 4.0))],
            static_obstacles: vec![Vector2D::ZERO],
            shape: ShapeConfig {
                a: 1.0,
                b: 2.0,
                safety_dist: 2.0,
            },
            ..ScenarioConfig::default()
        }
    }
}
