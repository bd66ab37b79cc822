//! Python bindings.
//!
//! Vectors cross the boundary as `(x, y)` / `(x, y, z)` tuples. Setup errors
//! surface as `ValueError`.

use pyo3::exceptions::PyValueError;
use pyo3::prelude::*;

use crate::barrier;
use crate::error::ScenarioError;
use crate::grid::SafetyGrid;
use crate::nominal::nominal_control;
use crate::scenario::ScenarioConfig;
use crate::simulation::Simulation;
use crate::structs::{BarrierParams, NominalGains, Vector2D};

type Point2 = (f64, f64);
type Point3 = (f64, f64, f64);

impl From<ScenarioError> for PyErr {
    fn from(err: ScenarioError) -> PyErr {
        PyValueError::new_err(err.to_string())
    }
}

#[pyfunction]
fn barrier_value_py(rel_pos: Point2, a: f64, b: f64, safety_dist: f64) -> PyResult<f64> {
    let params = BarrierParams::new(a, b, safety_dist)?;
    Ok(barrier::barrier_value(rel_pos.into(), &params))
}

/// Returns `(h, hd, (A_x, A_y), extra)`.
#[pyfunction]
fn barrier_eval_py(
    rel_pos: Point2,
    rel_vel: Point2,
    a: f64,
    b: f64,
    safety_dist: f64,
) -> PyResult<(f64, f64, Point2, f64)> {
    let params = BarrierParams::new(a, b, safety_dist)?;
    let eval = barrier::evaluate(rel_pos.into(), rel_vel.into(), &params);
    Ok((eval.h, eval.hd, (eval.a_row.x, eval.a_row.y), eval.extra))
}

#[pyfunction]
fn nominal_control_py(position: Point2, velocity: Point2, goal: Point2) -> PyResult<Point2> {
    let u = nominal_control(
        position.into(),
        velocity.into(),
        goal.into(),
        &NominalGains::default(),
    );
    Ok((u.x, u.y))
}

/// Returns `(xs, ys, z)` with `z[row][col]` sampled at `(xs[col], ys[row])`.
#[pyfunction]
#[pyo3(signature = (obstacles, a=1.0, b=1.0, safety_dist=2.0, extent=(-10.0, 10.0), step=0.1))]
fn safety_grid_py(
    obstacles: Vec<Point2>,
    a: f64,
    b: f64,
    safety_dist: f64,
    extent: Point2,
    step: f64,
) -> PyResult<(Vec<f64>, Vec<f64>, Vec<Vec<f64>>)> {
    let params = BarrierParams::new(a, b, safety_dist)?;
    let obstacles: Vec<Vector2D> = obstacles.into_iter().map(Vector2D::from).collect();
    let grid = SafetyGrid::compute(&obstacles, &params, extent, step)?;
    let rows = grid.z.chunks(grid.width()).map(<[f64]>::to_vec).collect();
    Ok((grid.xs, grid.ys, rows))
}

/// Runs a preset scenario and returns every agent's position history.
#[pyfunction]
#[pyo3(signature = (name, use_safe=true, ticks=None))]
fn run_scenario_py(
    py: Python<'_>,
    name: &str,
    use_safe: bool,
    ticks: Option<usize>,
) -> PyResult<Vec<Vec<Point3>>> {
    let mut config = match name {
        "two_agent_swap" => ScenarioConfig::two_agent_swap(),
        "three_robot_crossing" => ScenarioConfig::three_robot_crossing(),
        "single_robot_static_obstacle" => ScenarioConfig::single_robot_static_obstacle(),
        other => return Err(PyValueError::new_err(format!("unknown scenario '{}'", other))),
    };
    config.use_safe = use_safe;
    if let Some(ticks) = ticks {
        config.tick_count = ticks;
    }

    let histories = py.allow_threads(|| -> Result<_, ScenarioError> {
        let mut sim = Simulation::point_mass(&config)?;
        sim.run();
        Ok(sim
            .agents()
            .iter()
            .map(|agent| agent.history().iter().map(|p| (p.x, p.y, p.z)).collect())
            .collect())
    })?;

    Ok(histories)
}

#[pymodule]
fn ecbf_core(m: &Bound<'_, PyModule>) -> PyResult<()> {
    m.add_function(wrap_pyfunction!(barrier_value_py, m)?)?;
    m.add_function(wrap_pyfunction!(barrier_eval_py, m)?)?;
    m.add_function(wrap_pyfunction!(nominal_control_py, m)?)?;
    m.add_function(wrap_pyfunction!(safety_grid_py, m)?)?;
    m.add_function(wrap_pyfunction!(run_scenario_py, m)?)?;
    Ok(())
}
