// config.rs

// Navigation parameters with the defaults used on the real vehicle.
// Values can be overridden from a YAML file; anything absent falls back
// to the defaults below.

use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::NavError;

/// Goal-reach tolerance in meters. Fixed; reaching and replanning logic
/// both key off this radius.
pub const GOAL_REACH_TOLERANCE: f64 = 0.2;

/// Cumulative executed distance that forces a routine replan, in meters.
pub const REPLAN_DISTANCE_MILESTONE: f64 = 3.0;

/// Shrink factor applied to the knot spacing when the input path is
/// rejected by the spacing check.
pub const KNOT_SPACING_SHRINK: f64 = 0.8;

/// Hard deadline for the knot-spacing adjustment loop, in seconds.
pub const PLANNER_TIME_BUDGET: f64 = 0.05;

/// Window before terminal time in which the executor zeroes velocity and
/// acceleration, in seconds.
pub const TERMINAL_HOLD_WINDOW: f64 = 0.3;

/// Navigation system configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NavConfig {
    /// Run the RRT global planner on each new goal.
    pub use_global_planner: bool,
    /// Track yaw from the velocity azimuth instead of odometry yaw.
    pub use_yaw_control: bool,
    /// Never retarget yaw, not even toward a new goal.
    pub no_yaw_turning: bool,
    /// Desired cruise velocity, m/s.
    pub desired_velocity: f64,
    /// Desired acceleration, m/s^2.
    pub desired_acceleration: f64,
    /// Desired angular velocity for yaw realignment, rad/s.
    pub desired_angular_velocity: f64,
    /// Takeoff height, m.
    pub takeoff_height: f64,
    /// Initial knot spacing for the B-spline input, s.
    pub initial_knot_spacing: f64,
    /// Iteration cap for the knot-spacing adjustment loop.
    pub spacing_iteration_cap: usize,
    /// Clearance radius the optimizer keeps from occupied voxels, m.
    pub safety_distance: f64,
    /// Field of view of the dynamic-obstacle detector, rad.
    pub obstacle_fov: f64,
    /// RRT extension step, m.
    pub rrt_step: f64,
    /// RRT sampling budget.
    pub rrt_max_iterations: usize,
}

impl Default for NavConfig {
    fn default() -> Self {
        NavConfig {
            use_global_planner: false,
            use_yaw_control: false,
            no_yaw_turning: false,
            desired_velocity: 1.0,
            desired_acceleration: 1.0,
            desired_angular_velocity: 1.0,
            takeoff_height: 1.0,
            initial_knot_spacing: 0.3,
            spacing_iteration_cap: 30,
            safety_distance: 0.5,
            obstacle_fov: std::f64::consts::PI,
            rrt_step: 0.5,
            rrt_max_iterations: 5000,
        }
    }
}

impl NavConfig {
    /// Parses a configuration from a YAML document.
    pub fn from_yaml_str(yaml: &str) -> Result<Self, NavError> {
        serde_yaml::from_str(yaml).map_err(|e| NavError::InvalidInput(e.to_string()))
    }

    /// Loads a configuration from a YAML file.
    pub fn from_yaml_file<P: AsRef<Path>>(path: P) -> Result<Self, NavError> {
        let text = std::fs::read_to_string(path.as_ref())
            .map_err(|e| NavError::InvalidInput(e.to_string()))?;
        Self::from_yaml_str(&text)
    }

    /// Validates ranges that the planners rely on.
    pub fn validate(&self) -> Result<(), NavError> {
        if self.desired_velocity <= 0.0 {
            return Err(NavError::InvalidInput(
                "desired_velocity must be positive".to_string(),
            ));
        }
        if self.desired_acceleration <= 0.0 {
            return Err(NavError::InvalidInput(
                "desired_acceleration must be positive".to_string(),
            ));
        }
        if self.initial_knot_spacing <= 0.0 {
            return Err(NavError::InvalidInput(
                "initial_knot_spacing must be positive".to_string(),
            ));
        }
        Ok(())
    }
}
