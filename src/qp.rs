//! # Per-tick Quadratic Program
//!
//! The safety filter poses, for one agent and one tick,
//!
//! ```text
//! minimize    1/2 u'Pu + q'u        P = I, q = -u_nom
//! subject to  G u <= h              one row per obstacle
//! ```
//!
//! which has the same minimizer as `||u - u_nom||^2` under the constraints.
//!
//! `QpProblem` is sized once from the obstacle count and filled by row index.
//! Solving is behind the `QpSolver` trait so any convex QP backend can be
//! substituted; `OsqpSolver` is the default backend.
//!
//! OSQP expects `l <= A x <= u`. The `G u <= h` form maps onto it with
//! `A = G`, `l = -inf`, `u = h`. A solve that hits the iteration limit is
//! reported as infeasible rather than returning an unconverged iterate.

use log::trace;
use nalgebra::{DMatrix, DVector, Matrix2};
use osqp::{CscMatrix, Problem, Settings};

use crate::error::SolveError;
use crate::structs::Vector2D;

/// One control computation's QP data. Discarded after solving.
#[derive(Debug, Clone, PartialEq)]
pub struct QpProblem {
    q: Vector2D,
    g: DMatrix<f64>,
    h: DVector<f64>,
}

impl QpProblem {
    /// Allocates `rows` zeroed constraint rows around the target `nominal`.
    pub fn new(nominal: Vector2D, rows: usize) -> Self {
        QpProblem {
            q: -nominal,
            g: DMatrix::zeros(rows, 2),
            h: DVector::zeros(rows),
        }
    }

    pub fn set_row(&mut self, index: usize, g_row: Vector2D, bound: f64) {
        self.g[(index, 0)] = g_row.x;
        self.g[(index, 1)] = g_row.y;
        self.h[index] = bound;
    }

    pub fn rows(&self) -> usize {
        self.h.len()
    }

    pub fn p(&self) -> Matrix2<f64> {
        Matrix2::identity()
    }

    pub fn q(&self) -> Vector2D {
        self.q
    }

    pub fn g(&self) -> &DMatrix<f64> {
        &self.g
    }

    pub fn h(&self) -> &DVector<f64> {
        &self.h
    }

    pub fn row(&self, index: usize) -> (Vector2D, f64) {
        (
            Vector2D::new(self.g[(index, 0)], self.g[(index, 1)]),
            self.h[index],
        )
    }

    /// Unconstrained minimizer, i.e. the nominal control.
    pub fn target(&self) -> Vector2D {
        -self.q
    }

    /// `G u - h` per row; every entry is `<= 0` for a feasible `u`.
    pub fn residuals(&self, u: Vector2D) -> DVector<f64> {
        let u = DVector::from_row_slice(&[u.x, u.y]);
        &self.g * u - &self.h
    }

    /// Largest constraint violation of `u` (0 when feasible).
    pub fn max_violation(&self, u: Vector2D) -> f64 {
        self.residuals(u).iter().fold(0.0_f64, |acc, &r| acc.max(r))
    }

    /// A row with an exactly zero gradient and a negative bound reads `0 <= h < 0`.
    fn has_contradictory_row(&self) -> bool {
        (0..self.rows()).any(|i| {
            let (g_row, bound) = self.row(i);
            g_row == Vector2D::ZERO && bound < 0.0
        })
    }
}

/// Capability: solve a `QpProblem` or report that it cannot be solved.
pub trait QpSolver: Sync {
    fn solve(&self, problem: &QpProblem) -> Result<Vector2D, SolveError>;
}

/// Tuning knobs for the OSQP backend.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct SolverSettings {
    pub eps_abs: f64,
    pub eps_rel: f64,
    /// Iteration bound; exceeding it counts as infeasible.
    pub max_iter: u32,
    pub polishing: bool,
}

impl Default for SolverSettings {
    fn default() -> Self {
        SolverSettings {
            eps_abs: 1e-7,
            eps_rel: 1e-7,
            max_iter: 4000,
            polishing: true,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct OsqpSolver {
    settings: SolverSettings,
}

impl OsqpSolver {
    pub fn new(settings: SolverSettings) -> Self {
        OsqpSolver { settings }
    }

    pub fn settings(&self) -> &SolverSettings {
        &self.settings
    }
}

impl QpSolver for OsqpSolver {
    fn solve(&self, problem: &QpProblem) -> Result<Vector2D, SolveError> {
        let rows = problem.rows();

        // Nothing to avoid: the nominal control is optimal
        if rows == 0 {
            return Ok(problem.target());
        }

        if problem.has_contradictory_row() {
            return Err(SolveError::Infeasible { rows });
        }

        // P = I, upper triangular CSC
        let p_matrix = CscMatrix {
            nrows: 2,
            ncols: 2,
            indptr: std::borrow::Cow::Borrowed(&[0, 1, 2]),
            indices: std::borrow::Cow::Borrowed(&[0, 1]),
            data: std::borrow::Cow::Borrowed(&[1.0, 1.0]),
        };

        let q = problem.q();
        let q = &[q.x, q.y];

        // Build G in CSC format (column-major sparse)
        let g = problem.g();
        let mut a_data = Vec::with_capacity(2 * rows);
        let mut a_indices = Vec::with_capacity(2 * rows);
        let mut a_indptr = Vec::with_capacity(3);
        a_indptr.push(0);
        for col in 0..2 {
            for (row_idx, &value) in g.column(col).iter().enumerate() {
                if value != 0.0 {
                    a_data.push(value);
                    a_indices.push(row_idx);
                }
            }
            a_indptr.push(a_data.len());
        }

        let a_matrix = CscMatrix {
            nrows: rows,
            ncols: 2,
            indptr: std::borrow::Cow::Owned(a_indptr),
            indices: std::borrow::Cow::Owned(a_indices),
            data: std::borrow::Cow::Owned(a_data),
        };

        let l_bounds = vec![f64::NEG_INFINITY; rows];
        let u_bounds: Vec<f64> = problem.h().iter().copied().collect();

        let settings = Settings::default()
            .verbose(false)
            .eps_abs(self.settings.eps_abs)
            .eps_rel(self.settings.eps_rel)
            .max_iter(self.settings.max_iter)
            .polishing(self.settings.polishing);

        let mut osqp_problem = Problem::new(p_matrix, q, a_matrix, &l_bounds, &u_bounds, &settings)
            .map_err(|e| SolveError::Setup(format!("{:?}", e)))?;

        let solution = match osqp_problem.solve() {
            osqp::Status::Solved(sol) => sol.x().to_vec(),
            osqp::Status::SolvedInaccurate(sol) => sol.x().to_vec(),
            _ => {
                trace!("OSQP found no acceptable solution for {} rows", rows);
                return Err(SolveError::Infeasible { rows });
            }
        };

        let u = Vector2D::new(solution[0], solution[1]);
        if !u.is_finite() {
            return Err(SolveError::NonFinite);
        }
        Ok(u)
    }
}
