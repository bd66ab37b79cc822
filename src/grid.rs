//! Sampled safe/unsafe map of the plane for display.
//!
//! For every grid point and every obstacle the barrier sign is sampled
//! (`1` where `h > 0`, `0` otherwise) and the samples are averaged over the
//! obstacle count, so `z = 1` means "outside every unsafe region" and lower
//! values mean the point lies inside some of them.

use crate::barrier::barrier_value;
use crate::error::ScenarioError;
use crate::structs::{BarrierParams, Vector2D};

/// Largest number of samples along one axis.
pub const MAX_AXIS_SAMPLES: usize = 4_096;

#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub struct SafetyGrid {
    pub xs: Vec<f64>,
    pub ys: Vec<f64>,
    /// Row-major, `z[row * xs.len() + col]` is the value at `(xs[col], ys[row])`.
    pub z: Vec<f64>,
    #[cfg_attr(feature = "serde", serde(skip))]
    obstacles: Vec<Vector2D>,
    #[cfg_attr(feature = "serde", serde(skip))]
    params: Option<BarrierParams>,
}

impl SafetyGrid {
    /// Samples the square `[extent.0, extent.1)` on both axes with spacing `step`.
    pub fn compute(
        obstacles: &[Vector2D],
        params: &BarrierParams,
        extent: (f64, f64),
        step: f64,
    ) -> Result<Self, ScenarioError> {
        let (lo, hi) = extent;
        if !(lo.is_finite() && hi.is_finite()) || lo >= hi {
            return Err(ScenarioError::InvalidGrid(format!("empty extent [{}, {})", lo, hi)));
        }
        if !step.is_finite() || step <= 0.0 {
            return Err(ScenarioError::InvalidGrid(format!("step must be > 0, got {}", step)));
        }

        let count = ((hi - lo) / step).ceil();
        if !(count <= MAX_AXIS_SAMPLES as f64) {
            return Err(ScenarioError::InvalidGrid(format!(
                "[{}, {}) with step {} needs {} samples per axis, limit is {}",
                lo, hi, step, count, MAX_AXIS_SAMPLES
            )));
        }

        let axis = sample_axis(lo, step, count as usize);
        let n = obstacles.len();

        let mut z = Vec::with_capacity(axis.len() * axis.len());
        for &y in &axis {
            for &x in &axis {
                let point = Vector2D::new(x, y);
                let value = if n == 0 {
                    1.0
                } else {
                    let safe = obstacles
                        .iter()
                        .filter(|&&o| barrier_value(point - o, params) > 0.0)
                        .count();
                    safe as f64 / n as f64
                };
                z.push(value);
            }
        }

        Ok(SafetyGrid {
            xs: axis.clone(),
            ys: axis,
            z,
            obstacles: obstacles.to_vec(),
            params: Some(*params),
        })
    }

    pub fn width(&self) -> usize {
        self.xs.len()
    }

    pub fn height(&self) -> usize {
        self.ys.len()
    }

    pub fn value(&self, row: usize, col: usize) -> f64 {
        self.z[row * self.xs.len() + col]
    }

    /// True when `(x, y)` is outside every obstacle's unsafe region.
    /// Evaluated exactly, not read off the sampled field.
    pub fn is_safe(&self, x: f64, y: f64) -> bool {
        let Some(params) = self.params.as_ref() else {
            return true;
        };
        let point = Vector2D::new(x, y);
        self.obstacles
            .iter()
            .all(|&o| barrier_value(point - o, params) > 0.0)
    }
}

/// `count` samples `lo, lo + step, ...`.
fn sample_axis(lo: f64, step: f64, count: usize) -> Vec<f64> {
    (0..count).map(|k| lo + k as f64 * step).collect()
}
