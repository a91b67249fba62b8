//! Aeronav - onboard autonomous navigation core
//!
//! This library provides the replanning pipeline for a small aerial
//! vehicle in a partially known, dynamic environment: a sampling-based
//! global planner, a minimum-snap polynomial warm start and a constrained
//! B-spline optimizer, composed by an orchestrator and kept valid by a
//! replan-trigger policy. The host application supplies odometry, an
//! occupancy-map handle, a dynamic-obstacle source and a controller
//! setpoint sink; the core produces smooth, kinodynamically feasible
//! reference trajectories and swaps them in atomically as the world
//! changes.

pub mod config;
pub mod map;
pub mod navigation;
pub mod obstacles;
pub mod planner;
pub mod state;
pub mod types;

// Re-export commonly used items for easier access
pub use config::NavConfig;
pub use map::{Aabb, CellStatus, MapQuery, VoxelMap};
pub use navigation::{
    ActiveTrajectory, LatestTargetSink, Navigator, NavigatorMode, SetpointSink, VizSnapshots,
};
pub use obstacles::{DynamicObstacle, ObstacleBuffer, ObstacleSource};
pub use planner::{
    BsplineOptimizer, BsplineTrajectory, MinSnapPlanner, PolyTrajectory, RrtPlanner,
    TrajectoryDivider,
};
pub use state::StateEstimator;
pub use types::{
    BoundaryConditions, OdometrySnapshot, Pose, TargetSetpoint, VehicleState,
};

/// Navigation core error types.
///
/// Every variant is recovered inside the core; callers only ever observe
/// them through planner-seam APIs and log output.
#[derive(Debug, thiserror::Error)]
pub enum NavError {
    /// The optimizer failed but the current trajectory is still safe;
    /// the previous generation keeps executing.
    #[error("transient infeasibility; previous trajectory retained")]
    TransientInfeasibility,
    /// The optimizer failed with no safe trajectory to fall back to.
    #[error("fatal infeasibility; stopping")]
    FatalInfeasibility,
    /// The map handle cannot satisfy queries this cycle.
    #[error("map unavailable")]
    MapUnavailable,
    /// Odometry is missing or too old to plan against.
    #[error("stale odometry")]
    StaleOdometry,
    /// The global planner found no path to the goal under the current map.
    #[error("goal unreachable under current map")]
    GoalUnreachable,
    /// A time budget expired; the best effort so far was used.
    #[error("planner time budget exceeded")]
    OptimizerTimeout,
    /// A planner seam was driven outside its contract.
    #[error("invalid input: {0}")]
    InvalidInput(String),
}
