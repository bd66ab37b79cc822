//! # ECBF Safety Filter
//!
//! Turns the nominal control into the closest control (in the L2 sense) that
//! satisfies the exponential barrier condition against every obstacle at
//! once:
//!
//! ```text
//! hdd + kd * hd + kp * h >= 0,   hdd = A . u + extra
//! =>  A . u >= -extra - kp * h - kd * hd
//! ```
//!
//! The solver takes `G u <= h_bound`, so both sides are negated together,
//! exactly once, when a row is written:
//!
//! ```text
//! G_row   = -A
//! h_bound = extra + kp * h + kd * hd
//! ```
//!
//! All obstacle rows go into one joint QP. If the solver cannot produce a
//! control, the configured `FallbackPolicy` supplies a finite one and the
//! event is surfaced through `FilterStatus::Fallback`.

use crate::barrier;
use crate::error::SolveError;
use crate::nominal::nominal_control;
use crate::qp::{QpProblem, QpSolver};
use crate::structs::{AgentState, BarrierParams, Gains, NominalGains, Obstacle, Vector2D};

/// Control used for one agent on one tick when the QP cannot be solved.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum FallbackPolicy {
    /// Command zero acceleration.
    #[default]
    ZeroAcceleration,
    /// Command the nominal control scaled by a factor in `[0, 1)`.
    ScaledNominal(f64),
}

impl FallbackPolicy {
    pub fn apply(&self, nominal: Vector2D) -> Vector2D {
        match *self {
            FallbackPolicy::ZeroAcceleration => Vector2D::ZERO,
            FallbackPolicy::ScaledNominal(factor) => nominal * factor,
        }
    }

    pub fn is_valid(&self) -> bool {
        match *self {
            FallbackPolicy::ZeroAcceleration => true,
            FallbackPolicy::ScaledNominal(factor) => (0.0..1.0).contains(&factor),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum FilterStatus {
    /// Filtering disabled; the nominal control was returned as is.
    Unfiltered,
    /// The QP was solved.
    Solved,
    /// The QP failed and the fallback control was used.
    Fallback(SolveError),
}

#[derive(Debug, Clone, PartialEq)]
pub struct FilterOutcome {
    pub control: Vector2D,
    pub nominal: Vector2D,
    pub status: FilterStatus,
}

impl FilterOutcome {
    pub fn is_fallback(&self) -> bool {
        matches!(self.status, FilterStatus::Fallback(_))
    }
}

/// Per-agent safety filter: goal, gains and shape are fixed at creation, the
/// agent's live state and the tick's obstacles are supplied per call.
#[derive(Debug, Clone)]
pub struct SafetyFilter {
    goal: Vector2D,
    gains: Gains,
    nominal_gains: NominalGains,
    params: BarrierParams,
    use_safe: bool,
    fallback: FallbackPolicy,
}

impl SafetyFilter {
    pub fn new(
        goal: Vector2D,
        gains: Gains,
        nominal_gains: NominalGains,
        params: BarrierParams,
    ) -> Self {
        SafetyFilter {
            goal,
            gains,
            nominal_gains,
            params,
            use_safe: true,
            fallback: FallbackPolicy::default(),
        }
    }

    pub fn with_use_safe(mut self, use_safe: bool) -> Self {
        self.use_safe = use_safe;
        self
    }

    pub fn with_fallback(mut self, fallback: FallbackPolicy) -> Self {
        self.fallback = fallback;
        self
    }

    pub fn goal(&self) -> Vector2D {
        self.goal
    }

    pub fn gains(&self) -> &Gains {
        &self.gains
    }

    pub fn params(&self) -> &BarrierParams {
        &self.params
    }

    pub fn use_safe(&self) -> bool {
        self.use_safe
    }

    pub fn nominal(&self, state: &AgentState) -> Vector2D {
        nominal_control(
            state.planar_position(),
            state.planar_velocity(),
            self.goal,
            &self.nominal_gains,
        )
    }

    /// Stacks one `G u <= h_bound` row per obstacle, in obstacle order.
    pub fn build_problem(&self, state: &AgentState, obstacles: &[Obstacle]) -> QpProblem {
        let position = state.planar_position();
        let velocity = state.planar_velocity();
        let mut problem = QpProblem::new(self.nominal(state), obstacles.len());

        for (index, obstacle) in obstacles.iter().enumerate() {
            let eval = barrier::evaluate(
                position - obstacle.position,
                velocity - obstacle.velocity,
                &self.params,
            );
            // A.u >= lower  <=>  -A.u <= -lower
            let lower = eval.lower_bound(self.gains.kp, self.gains.kd);
            problem.set_row(index, -eval.a_row, -lower);
        }

        problem
    }

    pub fn compute(
        &self,
        state: &AgentState,
        obstacles: &[Obstacle],
        solver: &dyn QpSolver,
    ) -> FilterOutcome {
        let nominal = self.nominal(state);
        if !self.use_safe {
            return FilterOutcome {
                control: nominal,
                nominal,
                status: FilterStatus::Unfiltered,
            };
        }

        let problem = self.build_problem(state, obstacles);
        match solver.solve(&problem) {
            Ok(control) => FilterOutcome {
                control,
                nominal,
                status: FilterStatus::Solved,
            },
            Err(err) => FilterOutcome {
                control: self.fallback.apply(nominal),
                nominal,
                status: FilterStatus::Fallback(err),
            },
        }
    }
}
