//! # Barrier-Synchronous Simulation Loop
//!
//! Every tick runs the same phases, each completed for all agents before the
//! next begins:
//!
//! 1. **Snapshot**: freeze every agent's planar position and velocity.
//! 2. **Aggregate**: build each agent's obstacle set from the snapshot.
//! 3. **Filter**: run each agent's safety filter on its own live state and
//!    its aggregated obstacles. Agents are independent here and may be
//!    evaluated on the rayon pool.
//! 4. **Integrate**: map the control through the actuator and dynamics
//!    collaborators and replace the agent's live state.
//! 5. **Record**: append the new position to the agent's history.
//!
//! Because every filter reads the same frozen snapshot, an agent evaluated
//! first never sees a neighbour's update from the same tick.
//!
//! Per-agent failures stay with that agent: an infeasible QP uses the
//! fallback control for that tick only and is counted, and an agent whose
//! dynamics produce a non-finite state is halted at its last finite state
//! (it remains an obstacle for the others).

use log::{debug, error, info, warn};
use nalgebra::Vector3;
use ordered_float::OrderedFloat;
use rayon::prelude::*;

use crate::barrier::barrier_value;
use crate::dynamics::{Actuator, Dynamics, PointMass};
use crate::error::{AgentFault, ScenarioError};
use crate::filter::{FilterOutcome, SafetyFilter};
use crate::obstacles::{aggregate, ObstacleSet, Snapshot};
use crate::qp::{OsqpSolver, QpSolver};
use crate::scenario::ScenarioConfig;
use crate::structs::{AgentState, BarrierParams, Vector2D};

#[derive(Debug, Clone)]
pub struct Agent {
    id: usize,
    state: AgentState,
    filter: SafetyFilter,
    history: Vec<Vector3<f64>>,
    fallbacks: usize,
    fault: Option<AgentFault>,
}

impl Agent {
    fn new(id: usize, state: AgentState, filter: SafetyFilter) -> Self {
        let history = vec![state.position];
        Agent {
            id,
            state,
            filter,
            history,
            fallbacks: 0,
            fault: None,
        }
    }

    pub fn id(&self) -> usize {
        self.id
    }

    pub fn state(&self) -> &AgentState {
        &self.state
    }

    pub fn goal(&self) -> Vector2D {
        self.filter.goal()
    }

    pub fn filter(&self) -> &SafetyFilter {
        &self.filter
    }

    /// Initial position followed by one entry per integrated tick.
    pub fn history(&self) -> &[Vector3<f64>] {
        &self.history
    }

    /// Ticks on which the QP failed and the fallback control was used.
    pub fn fallbacks(&self) -> usize {
        self.fallbacks
    }

    pub fn fault(&self) -> Option<&AgentFault> {
        self.fault.as_ref()
    }

    pub fn is_halted(&self) -> bool {
        self.fault.is_some()
    }

    fn compute_control(&self, obstacles: &ObstacleSet, solver: &dyn QpSolver) -> Option<FilterOutcome> {
        if self.is_halted() {
            return None;
        }
        Some(self.filter.compute(&self.state, obstacles, solver))
    }
}

/// What happened during one tick.
#[derive(Debug, Clone, PartialEq)]
pub struct TickReport {
    pub tick: usize,
    /// Per-agent filter result, `None` for halted agents.
    pub outcomes: Vec<Option<FilterOutcome>>,
    /// Agents that diverged on this tick.
    pub faults: Vec<AgentFault>,
    /// Smallest barrier value between any two agents after the tick.
    pub min_agent_barrier: Option<f64>,
    /// Smallest barrier value between any agent and any static obstacle after the tick.
    pub min_static_barrier: Option<f64>,
}

/// Summary of a whole run.
#[derive(Debug, Clone, PartialEq)]
pub struct RunReport {
    pub ticks_run: usize,
    pub fallbacks: Vec<usize>,
    pub faults: Vec<AgentFault>,
    pub min_agent_barrier: Option<f64>,
    pub min_static_barrier: Option<f64>,
}

impl RunReport {
    pub fn total_fallbacks(&self) -> usize {
        self.fallbacks.iter().sum()
    }

    /// True when every QP of the run was solved.
    pub fn all_feasible(&self) -> bool {
        self.total_fallbacks() == 0
    }
}

pub struct Simulation<D, M, S>
where
    D: Dynamics,
    M: Actuator<Command = D::Command>,
    S: QpSolver,
{
    agents: Vec<Agent>,
    static_obstacles: Vec<Vector2D>,
    params: BarrierParams,
    dt: f64,
    tick_count: usize,
    parallel: bool,
    tick: usize,
    dynamics: D,
    actuator: M,
    solver: S,
    min_agent_barrier: Option<f64>,
    min_static_barrier: Option<f64>,
}

impl Simulation<PointMass, PointMass, OsqpSolver> {
    /// Point-mass agents solved with OSQP using the scenario's solver settings.
    pub fn point_mass(config: &ScenarioConfig) -> Result<Self, ScenarioError> {
        Simulation::new(
            config,
            PointMass::default(),
            PointMass::default(),
            OsqpSolver::new(config.solver),
        )
    }
}

impl<D, M, S> Simulation<D, M, S>
where
    D: Dynamics,
    M: Actuator<Command = D::Command>,
    S: QpSolver,
{
    pub fn new(config: &ScenarioConfig, dynamics: D, actuator: M, solver: S) -> Result<Self, ScenarioError> {
        let params = config.validate()?;

        let agents: Vec<Agent> = config
            .agents
            .iter()
            .enumerate()
            .map(|(id, agent)| {
                let state = AgentState::new(agent.initial_position, agent.initial_velocity);
                let filter = SafetyFilter::new(agent.goal, agent.gains, agent.nominal_gains, params)
                    .with_use_safe(config.use_safe)
                    .with_fallback(config.fallback);
                Agent::new(id, state, filter)
            })
            .collect();

        info!(
            "scenario ready: {} agents, {} static obstacles, dt={}, {} ticks, use_safe={}",
            agents.len(),
            config.static_obstacles.len(),
            config.dt,
            config.tick_count,
            config.use_safe
        );

        let mut sim = Simulation {
            agents,
            static_obstacles: config.static_obstacles.clone(),
            params,
            dt: config.dt,
            tick_count: config.tick_count,
            parallel: config.parallel,
            tick: 0,
            dynamics,
            actuator,
            solver,
            min_agent_barrier: None,
            min_static_barrier: None,
        };
        let (agent_min, static_min) = sim.closest_approach();
        sim.min_agent_barrier = agent_min;
        sim.min_static_barrier = static_min;
        Ok(sim)
    }

    pub fn agents(&self) -> &[Agent] {
        &self.agents
    }

    pub fn agent(&self, index: usize) -> &Agent {
        &self.agents[index]
    }

    pub fn static_obstacles(&self) -> &[Vector2D] {
        &self.static_obstacles
    }

    pub fn params(&self) -> &BarrierParams {
        &self.params
    }

    /// Number of ticks completed so far.
    pub fn tick(&self) -> usize {
        self.tick
    }

    pub fn is_finished(&self) -> bool {
        self.tick >= self.tick_count
    }

    /// Runs one full tick for every agent.
    pub fn step(&mut self) -> TickReport {
        let tick = self.tick;

        // SNAPSHOT
        let snapshot = Snapshot::capture(self.agents.iter().map(|a| &a.state));

        // AGGREGATE
        let obstacle_sets: Vec<ObstacleSet> = (0..self.agents.len())
            .map(|i| aggregate(&snapshot, i, &self.static_obstacles))
            .collect();

        // FILTER
        let solver: &dyn QpSolver = &self.solver;
        let outcomes: Vec<Option<FilterOutcome>> = if self.parallel {
            self.agents
                .par_iter()
                .zip(obstacle_sets.par_iter())
                .map(|(agent, obstacles)| agent.compute_control(obstacles, solver))
                .collect()
        } else {
            self.agents
                .iter()
                .zip(obstacle_sets.iter())
                .map(|(agent, obstacles)| agent.compute_control(obstacles, solver))
                .collect()
        };

        // INTEGRATE + RECORD
        let mut faults = Vec::new();
        for (agent, outcome) in self.agents.iter_mut().zip(outcomes.iter()) {
            let Some(outcome) = outcome else { continue };

            if outcome.is_fallback() {
                agent.fallbacks += 1;
                warn!(
                    "tick {}: agent {} QP failed ({:?}), applying fallback control {:?}",
                    tick, agent.id, outcome.status, outcome.control
                );
            }

            let accel = outcome.control.extend(0.0);
            let command = self.actuator.to_command(&agent.state, accel);
            let next = self.dynamics.step(&agent.state, &command, self.dt);

            if !next.is_finite() {
                let fault = AgentFault::DivergentState { agent: agent.id, tick };
                error!("{}; halting agent", fault);
                agent.fault = Some(fault.clone());
                faults.push(fault);
                continue;
            }

            agent.state = next;
            agent.history.push(agent.state.position);
        }

        self.tick += 1;

        let (min_agent_barrier, min_static_barrier) = self.closest_approach();
        self.min_agent_barrier = min_option(self.min_agent_barrier, min_agent_barrier);
        self.min_static_barrier = min_option(self.min_static_barrier, min_static_barrier);

        debug!(
            "tick {} done: min agent barrier {:?}, min static barrier {:?}",
            tick,
            min_agent_barrier,
            min_static_barrier
        );

        TickReport {
            tick,
            outcomes,
            faults,
            min_agent_barrier,
            min_static_barrier,
        }
    }

    /// Steps until the configured tick count is reached.
    pub fn run(&mut self) -> RunReport {
        let remaining = self.tick_count.saturating_sub(self.tick);
        self.run_for(remaining)
    }

    /// Steps `ticks` more times, regardless of the configured tick count.
    pub fn run_for(&mut self, ticks: usize) -> RunReport {
        let start = self.tick;
        for _ in 0..ticks {
            let report = self.step();
            if !report.faults.is_empty() && self.agents.iter().all(Agent::is_halted) {
                warn!("every agent has halted after tick {}", report.tick);
            }
        }

        let report = self.report(self.tick - start);
        info!(
            "run finished after {} ticks: {} fallbacks, {} halted agents, min agent barrier {:?}",
            report.ticks_run,
            report.total_fallbacks(),
            report.faults.len(),
            report.min_agent_barrier
        );
        report
    }

    fn report(&self, ticks_run: usize) -> RunReport {
        RunReport {
            ticks_run,
            fallbacks: self.agents.iter().map(Agent::fallbacks).collect(),
            faults: self.agents.iter().filter_map(|a| a.fault.clone()).collect(),
            min_agent_barrier: self.min_agent_barrier,
            min_static_barrier: self.min_static_barrier,
        }
    }

    /// Smallest pairwise barrier value among agents, and between agents and
    /// static obstacles, at the current state.
    fn closest_approach(&self) -> (Option<f64>, Option<f64>) {
        let positions: Vec<Vector2D> = self.agents.iter().map(|a| a.state.planar_position()).collect();

        let agent_min = positions
            .iter()
            .enumerate()
            .flat_map(|(i, &p)| positions[i + 1..].iter().map(move |&q| p - q))
            .map(|rel| OrderedFloat(barrier_value(rel, &self.params)))
            .min()
            .map(|v| v.into_inner());

        let static_min = positions
            .iter()
            .flat_map(|&p| self.static_obstacles.iter().map(move |&o| p - o))
            .map(|rel| OrderedFloat(barrier_value(rel, &self.params)))
            .min()
            .map(|v| v.into_inner());

        (agent_min, static_min)
    }
}

fn min_option(a: Option<f64>, b: Option<f64>) -> Option<f64> {
    match (a, b) {
        (Some(x), Some(y)) => Some(x.min(y)),
        (x, None) => x,
        (None, y) => y,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::SolveError;
    use crate::filter::FilterStatus;
    use crate::qp::QpProblem;
    use crate::scenario::AgentConfig;
    use std::sync::Mutex;

    /// Solver that always reports infeasibility.
    struct RefusingSolver;

    impl QpSolver for RefusingSolver {
        fn solve(&self, problem: &QpProblem) -> Result<Vector2D, SolveError> {
            Err(SolveError::Infeasible { rows: problem.rows() })
        }
    }

    /// Records every problem it is asked to solve and returns the nominal control.
    #[derive(Default)]
    struct RecordingSolver {
        problems: Mutex<Vec<QpProblem>>,
    }

    impl QpSolver for RecordingSolver {
        fn solve(&self, problem: &QpProblem) -> Result<Vector2D, SolveError> {
            self.problems.lock().unwrap().push(problem.clone());
            Ok(problem.target())
        }
    }

    /// Point mass that blows up any agent flying at the marker altitude.
    struct FragileDynamics {
        marker_z: f64,
    }

    impl Dynamics for FragileDynamics {
        type Command = Vector3<f64>;

        fn step(&self, state: &AgentState, command: &Vector3<f64>, dt: f64) -> AgentState {
            let mut next = PointMass::default().step(state, command, dt);
            if state.position.z == self.marker_z {
                next.position.x = f64::NAN;
            }
            next
        }
    }

    fn short(mut config: ScenarioConfig, ticks: usize) -> ScenarioConfig {
        config.tick_count = ticks;
        config
    }

    #[test]
    fn test_history_grows_one_entry_per_tick() {
        let config = short(ScenarioConfig::three_robot_crossing(), 25);
        let mut sim = Simulation::point_mass(&config).unwrap();
        let report = sim.run();

        assert_eq!(report.ticks_run, 25);
        assert_eq!(sim.tick(), 25);
        assert!(sim.is_finished());
        for agent in sim.agents() {
            assert_eq!(agent.history().len(), 26);
            assert_eq!(agent.history()[0], config.agents[agent.id()].initial_position);
        }
    }

    #[test]
    fn test_agents_see_pre_tick_snapshot() {
        let mut config = short(ScenarioConfig::three_robot_crossing(), 3);
        config.parallel = false;
        let solver = RecordingSolver::default();
        let mut sim = Simulation::new(&config, PointMass::default(), PointMass::default(), solver).unwrap();

        // Move things first so velocities are non-zero
        sim.step();
        let before: Vec<AgentState> = sim.agents().iter().map(|a| a.state().clone()).collect();
        let expected: Vec<QpProblem> = sim
            .agents()
            .iter()
            .enumerate()
            .map(|(i, agent)| {
                let snapshot = Snapshot::capture(before.iter());
                let obstacles = aggregate(&snapshot, i, sim.static_obstacles());
                agent.filter().build_problem(&before[i], &obstacles)
            })
            .collect();

        sim.solver.problems.lock().unwrap().clear();
        sim.step();

        let recorded = sim.solver.problems.lock().unwrap().clone();
        assert_eq!(recorded, expected, "Agents must be filtered against the frozen snapshot");
        assert!(recorded.iter().all(|p| p.rows() == 4));
    }

    #[test]
    fn test_use_safe_false_follows_nominal_exactly() {
        let mut config = short(ScenarioConfig::two_agent_swap(), 10);
        config.use_safe = false;
        let mut sim = Simulation::point_mass(&config).unwrap();
        for _ in 0..10 {
            let states: Vec<AgentState> = sim.agents().iter().map(|a| a.state().clone()).collect();
            let report = sim.step();
            for (i, outcome) in report.outcomes.iter().enumerate() {
                let outcome = outcome.as_ref().unwrap();
                assert_eq!(outcome.status, FilterStatus::Unfiltered);
                assert_eq!(outcome.control, sim.agent(i).filter().nominal(&states[i]));
            }
        }
    }

    #[test]
    fn test_infeasible_ticks_fall_back_and_are_counted() {
        let config = short(ScenarioConfig::two_agent_swap(), 5);
        let mut sim = Simulation::new(&config, PointMass::default(), PointMass::default(), RefusingSolver).unwrap();
        let report = sim.run();

        assert_eq!(report.fallbacks, vec![5, 5]);
        assert!(!report.all_feasible());
        for agent in sim.agents() {
            // Zero acceleration from rest: nobody moves
            assert_eq!(agent.state().position, config.agents[agent.id()].initial_position);
            assert!(agent.state().is_finite());
        }
    }

    #[test]
    fn test_divergent_agent_is_isolated() {
        let mut config = short(ScenarioConfig::three_robot_crossing(), 10);
        config.agents[1].initial_position.z = 666.0;
        let dynamics = FragileDynamics { marker_z: 666.0 };
        let mut sim = Simulation::new(&config, dynamics, PointMass::default(), OsqpSolver::default()).unwrap();

        let first = sim.step();
        assert_eq!(first.faults, vec![AgentFault::DivergentState { agent: 1, tick: 0 }]);

        let report = sim.run();
        assert_eq!(report.faults, vec![AgentFault::DivergentState { agent: 1, tick: 0 }]);

        let halted = sim.agent(1);
        assert!(halted.is_halted());
        assert_eq!(halted.history().len(), 1);
        assert!(halted.state().is_finite());

        for i in [0, 2] {
            assert!(!sim.agent(i).is_halted());
            assert_eq!(sim.agent(i).history().len(), 11);
        }
    }

    #[test]
    fn test_replay_is_deterministic() {
        let config = short(ScenarioConfig::three_robot_crossing(), 200);
        let mut first = Simulation::point_mass(&config).unwrap();
        let mut second = Simulation::point_mass(&config).unwrap();
        let a = first.run();
        let b = second.run();

        assert_eq!(a, b);
        for (x, y) in first.agents().iter().zip(second.agents()) {
            assert_eq!(x.history(), y.history());
        }
    }

    #[test]
    fn test_parallel_and_sequential_agree() {
        let mut config = short(ScenarioConfig::three_robot_crossing(), 100);
        config.parallel = true;
        let mut parallel = Simulation::point_mass(&config).unwrap();
        config.parallel = false;
        let mut sequential = Simulation::point_mass(&config).unwrap();
        parallel.run();
        sequential.run();

        for (x, y) in parallel.agents().iter().zip(sequential.agents()) {
            assert_eq!(x.history(), y.history());
        }
    }

    #[test]
    fn test_invalid_config_never_reaches_the_loop() {
        let mut config = ScenarioConfig::two_agent_swap();
        config.shape.b = -1.0;
        assert!(matches!(
            Simulation::point_mass(&config),
            Err(ScenarioError::InvalidShapeParams { .. })
        ));
    }

    #[test]
    fn test_agent_heads_toward_goal_when_unobstructed() {
        let mut config = short(ScenarioConfig::default(), 2_000);
        config.agents = vec![AgentConfig::at_rest(Vector2D::new(0.0, 0.0), Vector2D::new(5.0, 0.0))];
        let mut sim = Simulation::point_mass(&config).unwrap();
        let report = sim.run();

        assert!(report.all_feasible());
        assert_eq!(report.min_agent_barrier, None);
        let position = sim.agent(0).state().planar_position();
        assert!(position.x > 0.1, "Agent should make progress, got {:?}", position);
        assert!(position.y.abs() < 1e-9);
    }

    #[test]
    fn test_static_obstacle_is_respected() {
        let config = short(ScenarioConfig::single_robot_static_obstacle(), 5_000);
        let mut sim = Simulation::point_mass(&config).unwrap();
        let report = sim.run();

        assert!(report.faults.is_empty());
        assert!(report.all_feasible(), "Unexpected fallbacks: {:?}", report.fallbacks);
        let min = report.min_static_barrier.unwrap();
        assert!(min >= -0.05, "Entered the unsafe region: min h = {}", min);
    }

    #[test]
    fn test_two_agent_swap_never_violates_barrier() {
        let config = ScenarioConfig::two_agent_swap();
        let mut sim = Simulation::point_mass(&config).unwrap();
        let report = sim.run();

        assert_eq!(report.ticks_run, 20_000);
        assert!(report.faults.is_empty());
        assert!(report.all_feasible(), "Unexpected fallbacks: {:?}", report.fallbacks);
        let min = report.min_agent_barrier.unwrap();
        assert!(min >= -0.05, "Barrier violated between agents: min h = {}", min);
        for agent in sim.agents() {
            let start = config.agents[agent.id()].initial_position;
            let travelled = (agent.state().position - start).norm();
            assert!(travelled > 0.5, "Agent {} barely moved: {}", agent.id(), travelled);
        }
    }

    #[test]
    fn test_every_solved_control_satisfies_its_rows_over_a_run() {
        const TOL: f64 = 1e-4;
        let config = ScenarioConfig::three_robot_crossing();
        let mut sim = Simulation::point_mass(&config).unwrap();
        let mut solved = 0;

        while !sim.is_finished() {
            let before: Vec<AgentState> = sim.agents().iter().map(|a| a.state().clone()).collect();
            let snapshot = Snapshot::capture(before.iter());
            let problems: Vec<QpProblem> = sim
                .agents()
                .iter()
                .enumerate()
                .map(|(i, agent)| {
                    let obstacles = aggregate(&snapshot, i, sim.static_obstacles());
                    agent.filter().build_problem(&before[i], &obstacles)
                })
                .collect();

            let report = sim.step();
            for (i, outcome) in report.outcomes.iter().enumerate() {
                let Some(outcome) = outcome else { continue };
                if outcome.status != FilterStatus::Solved {
                    continue;
                }
                solved += 1;
                let residuals = problems[i].residuals(outcome.control);
                for (row, &r) in residuals.iter().enumerate() {
                    let (_, bound) = problems[i].row(row);
                    assert!(
                        r <= TOL * (1.0 + bound.abs()),
                        "Tick {}, agent {}, row {}: G.u - h = {} for u = {:?}",
                        report.tick,
                        i,
                        row,
                        r,
                        outcome.control
                    );
                }
            }
        }

        let report = sim.run();
        assert_eq!(report.ticks_run, 0);
        assert!(report.faults.is_empty());
        assert_eq!(solved + report.total_fallbacks(), 3 * config.tick_count);
    }
}
