// main.rs
// Demo flight for the navigation core: empty map, goal five meters ahead,
// a scripted odometry echo standing in for the vehicle.

use std::sync::Arc;

use log::info;
use nalgebra::Vector3;

use aeronav::{
    Aabb, LatestTargetSink, NavConfig, Navigator, NavigatorMode, ObstacleBuffer,
    OdometrySnapshot, Pose, VoxelMap,
};

fn main() {
    env_logger::init();
    info!("starting aeronav demo flight");

    let map = Arc::new(VoxelMap::new(
        Aabb::new(Vector3::new(-2.0, -4.0, 0.0), Vector3::new(10.0, 4.0, 3.0)),
        0.1,
        0.3,
    ));
    let obstacles = Arc::new(ObstacleBuffer::new());
    let sink = Arc::new(LatestTargetSink::new());
    let config = NavConfig::default();
    let takeoff_height = config.takeoff_height;
    let navigator = Navigator::new(
        config,
        NavigatorMode::Static,
        map,
        obstacles,
        sink.clone(),
    )
    .expect("default configuration is valid");

    navigator.set_offboard(true);

    // Start hovering at takeoff height.
    let start = Vector3::new(0.0, 0.0, takeoff_height);
    let goal = Vector3::new(5.0, 0.0, takeoff_height);
    let mut position = start;
    let mut velocity = Vector3::zeros();
    navigator.handle_odometry(OdometrySnapshot {
        pose: Pose::from_position(position),
        body_velocity: velocity,
        stamp: 0.0,
    });
    navigator.set_goal(goal);

    // Closed loop on a simulated clock: the vehicle tracks the setpoints
    // perfectly, odometry echoes them back.
    let dt = 0.01;
    let mut t = 0.0;
    let mut last_report = 0.0;
    while t < 20.0 {
        navigator.handle_odometry(OdometrySnapshot {
            pose: Pose::from_position(position),
            body_velocity: velocity,
            stamp: t,
        });
        navigator.policy_tick(t);
        if (t / dt).round() as u64 % 10 == 0 {
            navigator.planner_tick(t);
        }
        navigator.executor_tick(t);
        if let Some(target) = sink.latest() {
            position = target.position;
            velocity = target.velocity;
        }

        if t - last_report >= 1.0 {
            info!(
                "t={:5.1}s position=({:.2}, {:.2}, {:.2}) generation={:?}",
                t,
                position.x,
                position.y,
                position.z,
                navigator.active_generation()
            );
            last_report = t;
        }
        if navigator.goal_reached() {
            info!("goal reached after {:.1}s of flight", t);
            break;
        }
        t += dt;
    }

    let remaining = (position - goal).norm();
    info!(
        "demo finished; {:.2} m from goal, {} setpoints emitted",
        remaining,
        sink.count()
    );
}
