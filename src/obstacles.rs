//! # Obstacle Aggregation
//!
//! Each tick starts by freezing every agent's planar position and velocity in
//! a `Snapshot`. The obstacle set for agent `i` is then every other agent from
//! that snapshot, in agent order, followed by the static obstacles (velocity
//! zero), in the order they were configured. Row `k` of the agent's QP is the
//! constraint for element `k` of this set.

use crate::error::ScenarioError;
use crate::structs::{AgentState, Obstacle, Vector2D};

/// Read-only view of every agent's planar state at the start of a tick.
#[derive(Debug, Clone, PartialEq)]
pub struct Snapshot {
    positions: Vec<Vector2D>,
    velocities: Vec<Vector2D>,
}

impl Snapshot {
    pub fn capture<'a, I>(states: I) -> Self
    where
        I: IntoIterator<Item = &'a AgentState>,
    {
        let (positions, velocities) = states
            .into_iter()
            .map(|s| (s.planar_position(), s.planar_velocity()))
            .unzip();
        Snapshot {
            positions,
            velocities,
        }
    }

    pub fn from_parts(
        positions: Vec<Vector2D>,
        velocities: Vec<Vector2D>,
    ) -> Result<Self, ScenarioError> {
        if positions.len() != velocities.len() {
            return Err(ScenarioError::DimensionMismatch {
                what: "agent snapshot",
                positions: positions.len(),
                velocities: velocities.len(),
            });
        }
        Ok(Snapshot {
            positions,
            velocities,
        })
    }

    pub fn len(&self) -> usize {
        self.positions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.positions.is_empty()
    }

    pub fn position(&self, index: usize) -> Vector2D {
        self.positions[index]
    }

    pub fn velocity(&self, index: usize) -> Vector2D {
        self.velocities[index]
    }
}

/// Obstacles one agent must avoid during one tick. Its length is fixed at
/// construction and sizes the agent's QP.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ObstacleSet {
    obstacles: Vec<Obstacle>,
}

impl ObstacleSet {
    pub fn from_parts(positions: &[Vector2D], velocities: &[Vector2D]) -> Result<Self, ScenarioError> {
        if positions.len() != velocities.len() {
            return Err(ScenarioError::DimensionMismatch {
                what: "obstacle set",
                positions: positions.len(),
                velocities: velocities.len(),
            });
        }
        let obstacles = positions
            .iter()
            .zip(velocities)
            .map(|(&p, &v)| Obstacle::new(p, v))
            .collect();
        Ok(ObstacleSet { obstacles })
    }

    pub fn len(&self) -> usize {
        self.obstacles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.obstacles.is_empty()
    }

    pub fn as_slice(&self) -> &[Obstacle] {
        &self.obstacles
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Obstacle> {
        self.obstacles.iter()
    }
}

impl std::ops::Deref for ObstacleSet {
    type Target = [Obstacle];

    fn deref(&self) -> &[Obstacle] {
        &self.obstacles
    }
}

/// Builds the obstacle set for agent `self_index`: the other agents from
/// `snapshot` in index order, then `static_obstacles` with zero velocity.
pub fn aggregate(snapshot: &Snapshot, self_index: usize, static_obstacles: &[Vector2D]) -> ObstacleSet {
    let others = snapshot.len().saturating_sub(usize::from(self_index < snapshot.len()));
    let mut obstacles = Vec::with_capacity(others + static_obstacles.len());

    for index in (0..snapshot.len()).filter(|&j| j != self_index) {
        obstacles.push(Obstacle::new(snapshot.position(index), snapshot.velocity(index)));
    }
    obstacles.extend(static_obstacles.iter().map(|&p| Obstacle::stationary(p)));

    ObstacleSet { obstacles }
}
