// types.rs

// Shared geometric and kinematic types for the navigation core. Everything
// downstream of odometry works in the world frame with f64 precision.

use nalgebra::{UnitQuaternion, Vector3};

/// Position plus orientation in the world frame.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Pose {
    /// Position in meters.
    pub position: Vector3<f64>,
    /// Orientation as a unit quaternion.
    pub orientation: UnitQuaternion<f64>,
}

impl Pose {
    /// Creates a pose from a position with identity orientation.
    pub fn from_position(position: Vector3<f64>) -> Self {
        Pose {
            position,
            orientation: UnitQuaternion::identity(),
        }
    }

    /// Creates a pose from a position and a yaw angle (radians).
    pub fn from_position_yaw(position: Vector3<f64>, yaw: f64) -> Self {
        Pose {
            position,
            orientation: UnitQuaternion::from_euler_angles(0.0, 0.0, yaw),
        }
    }

    /// Extracts the yaw angle from the orientation.
    pub fn yaw(&self) -> f64 {
        self.orientation.euler_angles().2
    }
}

/// One odometry message: pose, body-frame linear velocity and a timestamp.
///
/// Timestamps are seconds on a monotonically non-decreasing clock; the
/// state estimator rejects snapshots that move backwards in time.
#[derive(Clone, Copy, Debug)]
pub struct OdometrySnapshot {
    pub pose: Pose,
    /// Linear velocity expressed in the body frame.
    pub body_velocity: Vector3<f64>,
    /// Timestamp in seconds.
    pub stamp: f64,
}

/// World-frame kinematic state derived from odometry.
#[derive(Clone, Copy, Debug, Default)]
pub struct VehicleState {
    pub position: Vector3<f64>,
    pub velocity: Vector3<f64>,
    pub acceleration: Vector3<f64>,
}

/// Start/end velocity and acceleration bound to a trajectory segment.
#[derive(Clone, Copy, Debug)]
pub struct BoundaryConditions {
    pub start_velocity: Vector3<f64>,
    pub end_velocity: Vector3<f64>,
    pub start_acceleration: Vector3<f64>,
    pub end_acceleration: Vector3<f64>,
}

impl BoundaryConditions {
    /// Boundary with the given start state and a zero terminal state.
    pub fn to_rest(start_velocity: Vector3<f64>, start_acceleration: Vector3<f64>) -> Self {
        BoundaryConditions {
            start_velocity,
            end_velocity: Vector3::zeros(),
            start_acceleration,
            end_acceleration: Vector3::zeros(),
        }
    }

    /// Fully-at-rest boundary (hover to hover).
    pub fn at_rest() -> Self {
        Self::to_rest(Vector3::zeros(), Vector3::zeros())
    }
}

/// Full-state target pushed to the position controller each executor tick.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct TargetSetpoint {
    pub position: Vector3<f64>,
    pub velocity: Vector3<f64>,
    pub acceleration: Vector3<f64>,
    /// Yaw angle in radians.
    pub yaw: f64,
}

impl TargetSetpoint {
    /// A hold target: keep the given position and yaw with zero motion.
    pub fn hold(position: Vector3<f64>, yaw: f64) -> Self {
        TargetSetpoint {
            position,
            velocity: Vector3::zeros(),
            acceleration: Vector3::zeros(),
            yaw,
        }
    }
}

/// Angle between two vectors in radians, in [0, pi].
pub fn angle_between(a: &Vector3<f64>, b: &Vector3<f64>) -> f64 {
    let denom = a.norm() * b.norm();
    if denom < 1e-12 {
        return 0.0;
    }
    (a.dot(b) / denom).clamp(-1.0, 1.0).acos()
}

/// Azimuth of the segment from `from` toward `to`, in radians.
pub fn azimuth_to(from: &Vector3<f64>, to: &Vector3<f64>) -> f64 {
    (to.y - from.y).atan2(to.x - from.x)
}

/// Wraps an angle into [-pi, pi).
pub fn wrap_angle(angle: f64) -> f64 {
    (angle + std::f64::consts::PI).rem_euclid(std::f64::consts::TAU) - std::f64::consts::PI
}
