//! # ECBF Core
//!
//! A multi-agent safety filter built on an Exponential Control Barrier
//! Function. Every tick, each agent's goal-seeking nominal acceleration is
//! replaced by the closest acceleration that keeps it outside a
//! super-elliptical unsafe region around every other agent and every static
//! obstacle, found by solving one small quadratic program per agent.
//!
//! ## Layout
//!
//! - **barrier**: `h`, `hd` and the second-derivative terms for one pair
//! - **nominal**: saturated PD drive toward the goal
//! - **qp**: the per-tick QP and the `QpSolver` seam (OSQP backend)
//! - **filter**: the safety filter with its fallback policy
//! - **obstacles**: tick snapshots and per-agent obstacle sets
//! - **dynamics**: actuator/dynamics collaborator traits and a point mass
//! - **scenario**: configuration, validation and presets
//! - **simulation**: the barrier-synchronous tick loop
//! - **grid**: sampled safe/unsafe field for display
//!
//! With the `python` feature the crate also builds as a Python extension
//! module exposing barrier evaluation, the nominal controller, the safety
//! grid and preset scenario runs.

pub mod barrier;
pub mod dynamics;
pub mod error;
pub mod filter;
pub mod grid;
pub mod nominal;
pub mod obstacles;
pub mod qp;
pub mod scenario;
pub mod simulation;
pub mod structs;

#[cfg(feature = "python")]
mod python;

pub use barrier::{barrier_value, evaluate, BarrierEval};
pub use dynamics::{Actuator, Dynamics, PointMass};
pub use error::{AgentFault, ScenarioError, SolveError};
pub use filter::{FallbackPolicy, FilterOutcome, FilterStatus, SafetyFilter};
pub use grid::SafetyGrid;
pub use nominal::nominal_control;
pub use obstacles::{aggregate, ObstacleSet, Snapshot};
pub use qp::{OsqpSolver, QpProblem, QpSolver, SolverSettings};
pub use scenario::{AgentConfig, ScenarioConfig, ShapeConfig};
pub use simulation::{Agent, RunReport, Simulation, TickReport};
pub use structs::{AgentState, BarrierParams, Gains, NominalGains, Obstacle, Vector2D};
