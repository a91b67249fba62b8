// planner/rrt.rs

// Goal-biased RRT over the occupancy map. Returns a collision-free
// polyline from start to goal; reachability failures are surfaced to the
// orchestrator, which reports them once per goal and holds.

use log::{debug, info};
use nalgebra::Vector3;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;

use crate::map::MapQuery;
use crate::NavError;

const GOAL_BIAS: f64 = 0.1;

/// Sampling-based global path planner.
pub struct RrtPlanner {
    step: f64,
    max_iterations: usize,
    rng: ChaCha8Rng,
}

struct Node {
    position: Vector3<f64>,
    parent: Option<usize>,
}

impl RrtPlanner {
    pub fn new(step: f64, max_iterations: usize) -> Self {
        Self::with_seed(step, max_iterations, rand::thread_rng().gen())
    }

    /// Deterministic variant for reproducible runs and tests.
    pub fn with_seed(step: f64, max_iterations: usize, seed: u64) -> Self {
        RrtPlanner {
            step,
            max_iterations,
            rng: ChaCha8Rng::seed_from_u64(seed),
        }
    }

    /// Plans a polyline from `start` to `goal`.
    ///
    /// On success the polyline has at least two vertices, begins at
    /// `start`, ends at `goal`, and every segment is collision-free
    /// against the map at query time.
    pub fn plan(
        &mut self,
        map: &dyn MapQuery,
        start: Vector3<f64>,
        goal: Vector3<f64>,
    ) -> Result<Vec<Vector3<f64>>, NavError> {
        if map.inflated_occupied(&goal) {
            return Err(NavError::GoalUnreachable);
        }
        if segment_free(map, &start, &goal) {
            return Ok(vec![start, goal]);
        }

        let bounds = map.bounds();
        let mut nodes = vec![Node {
            position: start,
            parent: None,
        }];

        for iter in 0..self.max_iterations {
            let sample = if self.rng.gen::<f64>() < GOAL_BIAS {
                goal
            } else {
                Vector3::new(
                    self.rng.gen_range(bounds.min.x..bounds.max.x),
                    self.rng.gen_range(bounds.min.y..bounds.max.y),
                    self.rng.gen_range(bounds.min.z..bounds.max.z),
                )
            };

            let nearest = nearest_node(&nodes, &sample);
            let from = nodes[nearest].position;
            let to_sample = sample - from;
            let dist = to_sample.norm();
            if dist < 1e-9 {
                continue;
            }
            let new_pos = if dist <= self.step {
                sample
            } else {
                from + to_sample / dist * self.step
            };
            if !segment_free(map, &from, &new_pos) {
                continue;
            }
            nodes.push(Node {
                position: new_pos,
                parent: Some(nearest),
            });

            if (new_pos - goal).norm() <= self.step && segment_free(map, &new_pos, &goal) {
                let mut path = trace_back(&nodes, nodes.len() - 1);
                path.push(goal);
                let path = shortcut(map, path);
                info!(
                    "rrt: path with {} vertices after {} iterations",
                    path.len(),
                    iter + 1
                );
                return Ok(path);
            }
        }
        debug!("rrt: exhausted {} iterations", self.max_iterations);
        Err(NavError::GoalUnreachable)
    }
}

fn nearest_node(nodes: &[Node], p: &Vector3<f64>) -> usize {
    let mut best = 0;
    let mut best_d = f64::INFINITY;
    for (i, n) in nodes.iter().enumerate() {
        let d = (n.position - p).norm_squared();
        if d < best_d {
            best_d = d;
            best = i;
        }
    }
    best
}

fn trace_back(nodes: &[Node], leaf: usize) -> Vec<Vector3<f64>> {
    let mut path = Vec::new();
    let mut cursor = Some(leaf);
    while let Some(i) = cursor {
        path.push(nodes[i].position);
        cursor = nodes[i].parent;
    }
    path.reverse();
    path
}

/// Greedy pruning: keep the earliest vertex from which the farthest
/// later vertex is directly reachable.
fn shortcut(map: &dyn MapQuery, path: Vec<Vector3<f64>>) -> Vec<Vector3<f64>> {
    if path.len() <= 2 {
        return path;
    }
    let mut out = vec![path[0]];
    let mut i = 0;
    while i < path.len() - 1 {
        let mut j = path.len() - 1;
        while j > i + 1 && !segment_free(map, &path[i], &path[j]) {
            j -= 1;
        }
        out.push(path[j]);
        i = j;
    }
    out
}

/// Samples the segment at half the map resolution against inflated
/// occupancy.
fn segment_free(map: &dyn MapQuery, a: &Vector3<f64>, b: &Vector3<f64>) -> bool {
    let diff = b - a;
    let len = diff.norm();
    if len < 1e-9 {
        return !map.inflated_occupied(a);
    }
    let step = map.resolution() * 0.5;
    let n = (len / step).ceil() as usize;
    for i in 0..=n {
        let p = a + diff * (i as f64 / n as f64);
        if map.inflated_occupied(&p) {
            return false;
        }
    }
    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::map::{Aabb, VoxelMap};

    fn map_with_wall() -> VoxelMap {
        let map = VoxelMap::new(
            Aabb::new(Vector3::new(0.0, 0.0, 0.0), Vector3::new(10.0, 10.0, 3.0)),
            0.1,
            0.2,
        );
        // Wall across y, with a gap near y = 8.
        map.set_occupied_box(&Aabb::new(
            Vector3::new(4.8, 0.0, 0.0),
            Vector3::new(5.2, 7.0, 3.0),
        ));
        map
    }

    #[test]
    fn straight_shot_in_free_space() {
        let map = VoxelMap::new(
            Aabb::new(Vector3::new(0.0, 0.0, 0.0), Vector3::new(10.0, 10.0, 3.0)),
            0.1,
            0.2,
        );
        let mut rrt = RrtPlanner::with_seed(0.5, 2000, 7);
        let start = Vector3::new(1.0, 1.0, 1.0);
        let goal = Vector3::new(9.0, 9.0, 1.0);
        let path = rrt.plan(&map, start, goal).unwrap();
        assert_eq!(path.len(), 2);
        assert_eq!(path[0], start);
        assert_eq!(path[1], goal);
    }

    #[test]
    fn routes_through_the_gap() {
        let map = map_with_wall();
        let mut rrt = RrtPlanner::with_seed(0.5, 20000, 11);
        let start = Vector3::new(1.0, 2.0, 1.0);
        let goal = Vector3::new(9.0, 2.0, 1.0);
        let path = rrt.plan(&map, start, goal).unwrap();

        assert!(path.len() >= 2);
        assert_eq!(path[0], start);
        assert!((path.last().unwrap() - goal).norm() < 1e-9);
        for w in path.windows(2) {
            assert!(segment_free(&map, &w[0], &w[1]));
        }
    }

    #[test]
    fn unreachable_goal_is_reported() {
        let map = map_with_wall();
        // Goal buried inside the wall.
        let mut rrt = RrtPlanner::with_seed(0.5, 500, 3);
        let out = rrt.plan(
            &map,
            Vector3::new(1.0, 2.0, 1.0),
            Vector3::new(5.0, 3.0, 1.0),
        );
        assert!(matches!(out, Err(NavError::GoalUnreachable)));
    }
}
