// planner/mod.rs

// Trajectory generation stages: the global geometric planner, the
// polynomial warm start, the B-spline refinement and the divider used
// for post-plan feasibility analysis.

pub mod bspline;
pub mod divider;
pub mod polynomial;
pub mod rrt;

pub use bspline::{BsplineOptimizer, BsplineTrajectory, SpacingCheck};
pub use divider::{DividerResult, TrajectoryDivider};
pub use polynomial::{MinSnapPlanner, PolyTrajectory};
pub use rrt::RrtPlanner;
