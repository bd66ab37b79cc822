//! Error types.
//!
//! Setup problems (`ScenarioError`) abort before the first tick. Solver
//! failures (`SolveError`) and agent faults (`AgentFault`) are per-agent,
//! per-tick events: they are reported and never stop the other agents.

use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum ScenarioError {
    #[error("invalid barrier shape: a={a}, b={b}, safety_dist={safety_dist} (all must be finite and > 0)")]
    InvalidShapeParams { a: f64, b: f64, safety_dist: f64 },

    #[error("invalid gains: {0}")]
    InvalidGains(String),

    #[error("{what}: {positions} positions but {velocities} velocities")]
    DimensionMismatch {
        what: &'static str,
        positions: usize,
        velocities: usize,
    },

    #[error("time step must be finite and > 0, got {0}")]
    InvalidTimeStep(f64),

    #[error("fallback scale must lie in [0, 1), got {0}")]
    InvalidFallback(f64),

    #[error("invalid solver settings: {0}")]
    InvalidSolverSettings(String),

    #[error("invalid grid: {0}")]
    InvalidGrid(String),

    #[error("scenario contains no agents")]
    NoAgents,

    #[error("agent {index} has a non-finite initial state or goal")]
    NonFiniteAgent { index: usize },
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum SolveError {
    #[error("no control satisfies all {rows} safety constraints")]
    Infeasible { rows: usize },

    #[error("solver setup failed: {0}")]
    Setup(String),

    #[error("solver returned a non-finite control")]
    NonFinite,
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum AgentFault {
    #[error("agent {agent} diverged at tick {tick}: dynamics produced a non-finite state")]
    DivergentState { agent: usize, tick: usize },
}
