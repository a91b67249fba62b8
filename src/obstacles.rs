// obstacles.rs

// Dynamic-obstacle snapshots. The tracker itself lives outside the core;
// this module defines the snapshot contract the planners consume and a
// buffer implementation the host (or a test) can feed.

use nalgebra::Vector3;

use crate::types::Pose;

/// One tracked moving obstacle: axis-aligned box with a velocity estimate.
#[derive(Clone, Copy, Debug)]
pub struct DynamicObstacle {
    /// Center of the bounding box, world frame.
    pub position: Vector3<f64>,
    /// Velocity estimate, world frame.
    pub velocity: Vector3<f64>,
    /// Full extents of the box along x, y, z.
    pub extent: Vector3<f64>,
}

impl DynamicObstacle {
    pub fn new(position: Vector3<f64>, velocity: Vector3<f64>, extent: Vector3<f64>) -> Self {
        DynamicObstacle {
            position,
            velocity,
            extent,
        }
    }
}

/// Source of tracked dynamic obstacles.
///
/// Snapshots are point-in-time copies; the core never mutates them.
pub trait ObstacleSource: Send + Sync {
    /// Obstacles within `fov` radians of the vehicle's forward axis.
    fn snapshot(&self, vehicle: &Pose, fov: f64) -> Vec<DynamicObstacle>;

    /// Every tracked obstacle regardless of bearing, used for free-region
    /// carving.
    fn snapshot_all(&self) -> Vec<DynamicObstacle>;
}

/// Shared buffer the host pushes tracker output into.
#[derive(Default)]
pub struct ObstacleBuffer {
    obstacles: std::sync::Mutex<Vec<DynamicObstacle>>,
}

impl ObstacleBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replaces the tracked set with a fresh detection batch.
    pub fn update(&self, obstacles: Vec<DynamicObstacle>) {
        *self.obstacles.lock().unwrap() = obstacles;
    }
}

impl ObstacleSource for ObstacleBuffer {
    fn snapshot(&self, vehicle: &Pose, fov: f64) -> Vec<DynamicObstacle> {
        let yaw = vehicle.yaw();
        let forward = Vector3::new(yaw.cos(), yaw.sin(), 0.0);
        self.obstacles
            .lock()
            .unwrap()
            .iter()
            .filter(|ob| {
                let mut to_ob = ob.position - vehicle.position;
                to_ob.z = 0.0;
                if to_ob.norm() < 1e-9 {
                    return true;
                }
                crate::types::angle_between(&forward, &to_ob) <= fov / 2.0
            })
            .copied()
            .collect()
    }

    fn snapshot_all(&self) -> Vec<DynamicObstacle> {
        self.obstacles.lock().unwrap().clone()
    }
}
