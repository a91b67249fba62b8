// state.rs

// Vehicle state estimation: rotates body-frame odometry velocity into the
// world frame and differentiates it for acceleration. Runs as its own
// periodic activity at ~30 Hz.

use log::debug;
use nalgebra::Vector3;

use crate::types::{OdometrySnapshot, VehicleState};

/// Differentiating state estimator.
///
/// Acceleration is the backward difference of world-frame velocity between
/// consecutive snapshots; the first snapshot reports zero acceleration.
pub struct StateEstimator {
    state: VehicleState,
    prev_velocity: Vector3<f64>,
    prev_stamp: Option<f64>,
}

impl StateEstimator {
    pub fn new() -> Self {
        StateEstimator {
            state: VehicleState::default(),
            prev_velocity: Vector3::zeros(),
            prev_stamp: None,
        }
    }

    /// Ingests one odometry snapshot and returns the updated world-frame
    /// state. Snapshots with a non-increasing timestamp are ignored.
    pub fn update(&mut self, odom: &OdometrySnapshot) -> VehicleState {
        let world_velocity = odom.pose.orientation * odom.body_velocity;
        match self.prev_stamp {
            None => {
                self.state = VehicleState {
                    position: odom.pose.position,
                    velocity: world_velocity,
                    acceleration: Vector3::zeros(),
                };
            }
            Some(prev) => {
                let dt = odom.stamp - prev;
                if dt <= 0.0 {
                    debug!("state estimator: dropped non-monotonic odometry (dt={dt:.4})");
                    return self.state;
                }
                self.state = VehicleState {
                    position: odom.pose.position,
                    velocity: world_velocity,
                    acceleration: (world_velocity - self.prev_velocity) / dt,
                };
            }
        }
        self.prev_velocity = world_velocity;
        self.prev_stamp = Some(odom.stamp);
        self.state
    }

    /// Latest estimated state.
    pub fn state(&self) -> VehicleState {
        self.state
    }
}

impl Default for StateEstimator {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Pose;
    use std::f64::consts::FRAC_PI_2;

    fn snapshot(stamp: f64, yaw: f64, body_vel: Vector3<f64>) -> OdometrySnapshot {
        OdometrySnapshot {
            pose: Pose::from_position_yaw(Vector3::new(0.0, 0.0, 1.0), yaw),
            body_velocity: body_vel,
            stamp,
        }
    }

    #[test]
    fn first_sample_has_zero_acceleration() {
        let mut est = StateEstimator::new();
        let s = est.update(&snapshot(0.0, 0.0, Vector3::new(1.0, 0.0, 0.0)));
        assert_eq!(s.acceleration, Vector3::zeros());
        assert!((s.velocity.x - 1.0).abs() < 1e-9);
    }

    #[test]
    fn body_velocity_rotates_into_world_frame() {
        let mut est = StateEstimator::new();
        // Facing +y: body-forward velocity becomes world +y.
        let s = est.update(&snapshot(0.0, FRAC_PI_2, Vector3::new(1.0, 0.0, 0.0)));
        assert!(s.velocity.x.abs() < 1e-9);
        assert!((s.velocity.y - 1.0).abs() < 1e-9);
    }

    #[test]
    fn acceleration_is_backward_difference() {
        let mut est = StateEstimator::new();
        est.update(&snapshot(0.0, 0.0, Vector3::new(1.0, 0.0, 0.0)));
        let s = est.update(&snapshot(0.5, 0.0, Vector3::new(2.0, 0.0, 0.0)));
        assert!((s.acceleration.x - 2.0).abs() < 1e-9);
    }

    #[test]
    fn non_monotonic_stamp_is_dropped() {
        let mut est = StateEstimator::new();
        est.update(&snapshot(1.0, 0.0, Vector3::new(1.0, 0.0, 0.0)));
        let before = est.state();
        let after = est.update(&snapshot(0.5, 0.0, Vector3::new(9.0, 0.0, 0.0)));
        assert_eq!(before.velocity, after.velocity);
    }
}
