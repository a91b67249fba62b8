// navigation/executor.rs

// Samples the active trajectory at wall-clock rate and feeds the
// controller sink. Never fails: with no trajectory it emits the hold
// target, with no data it emits nothing.

use nalgebra::Vector3;

use crate::config::{NavConfig, TERMINAL_HOLD_WINDOW};
use crate::types::TargetSetpoint;

use super::{NavShared, SetpointSink};

/// 100 Hz trajectory sampler.
pub struct TrajectoryExecutor {
    config: NavConfig,
}

impl TrajectoryExecutor {
    pub fn new(config: NavConfig) -> Self {
        TrajectoryExecutor { config }
    }

    /// One executor tick at wall time `now`.
    pub fn tick(&self, shared: &NavShared, sink: &dyn SetpointSink, now: f64) {
        // Copy out under the lock, sample outside it.
        let (active, hold, odom, offboard) = {
            let inner = shared.lock();
            (
                inner.active.clone(),
                inner.hold_target,
                inner.odom,
                inner.offboard,
            )
        };
        if !offboard {
            return;
        }
        let odom = match odom {
            Some(odom) => odom,
            None => return,
        };

        let target = match active {
            Some(record) => {
                let tau = record.execution_time(now);
                let position = record.position(tau);
                let mut velocity = record.velocity_world(tau);
                let mut acceleration = record.acceleration_world(tau);
                let mut yaw = self.select_yaw(&velocity, odom.pose.yaw());
                // The hold window is measured in the same reparametrized
                // time the spline lives in, like tau itself.
                if record.duration() - tau <= TERMINAL_HOLD_WINDOW {
                    // Clean stop regardless of spline endpoint numerics.
                    velocity = Vector3::zeros();
                    acceleration = Vector3::zeros();
                    yaw = odom.pose.yaw();
                }
                TargetSetpoint {
                    position,
                    velocity,
                    acceleration,
                    yaw,
                }
            }
            None => match hold {
                Some(hold) => hold,
                None => return,
            },
        };
        sink.push(&target);
    }

    fn select_yaw(&self, velocity: &Vector3<f64>, odom_yaw: f64) -> f64 {
        if self.config.no_yaw_turning || !self.config.use_yaw_control {
            odom_yaw
        } else if velocity.norm() > 1e-3 {
            velocity.y.atan2(velocity.x)
        } else {
            odom_yaw
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::navigation::{ActiveTrajectory, LatestTargetSink};
    use crate::planner::BsplineTrajectory;
    use crate::types::{OdometrySnapshot, Pose};
    use std::sync::Arc;

    fn shared_with(active: Option<Arc<ActiveTrajectory>>, yaw: f64) -> NavShared {
        let shared = NavShared::new();
        {
            let mut inner = shared.lock();
            inner.offboard = true;
            inner.odom = Some(OdometrySnapshot {
                pose: Pose::from_position_yaw(Vector3::new(0.0, 0.0, 1.0), yaw),
                body_velocity: Vector3::zeros(),
                stamp: 0.0,
            });
            inner.active = active;
        }
        shared
    }

    fn line_record() -> Arc<ActiveTrajectory> {
        line_record_with_factor(1.0)
    }

    fn line_record_with_factor(rho: f64) -> Arc<ActiveTrajectory> {
        let pts: Vec<_> = (0..12)
            .map(|i| Vector3::new(i as f64 * 0.5, 0.0, 1.0))
            .collect();
        Arc::new(ActiveTrajectory::new(
            BsplineTrajectory::new(pts, 0.5, 3),
            0.0,
            rho,
            1,
        ))
    }

    #[test]
    fn offboard_gate_blocks_setpoints() {
        let shared = shared_with(Some(line_record()), 0.0);
        shared.lock().offboard = false;
        let sink = LatestTargetSink::new();
        TrajectoryExecutor::new(NavConfig::default()).tick(&shared, &sink, 1.0);
        assert_eq!(sink.count(), 0);
    }

    #[test]
    fn samples_track_the_spline() {
        let shared = shared_with(Some(line_record()), 0.0);
        let sink = LatestTargetSink::new();
        let exec = TrajectoryExecutor::new(NavConfig::default());
        exec.tick(&shared, &sink, 1.0);
        let t1 = sink.latest().unwrap();
        exec.tick(&shared, &sink, 2.0);
        let t2 = sink.latest().unwrap();
        assert!(t2.position.x > t1.position.x);
        assert!(t1.velocity.norm() > 0.1);
    }

    #[test]
    fn terminal_window_zeroes_motion() {
        let record = line_record();
        let duration = record.duration();
        let shared = shared_with(Some(record), 0.7);
        let sink = LatestTargetSink::new();
        let exec = TrajectoryExecutor::new(NavConfig::default());
        // 0.1 s before the end: inside the 0.3 s hold window.
        exec.tick(&shared, &sink, duration - 0.1);
        let target = sink.latest().unwrap();
        assert_eq!(target.velocity, Vector3::zeros());
        assert_eq!(target.acceleration, Vector3::zeros());
        assert!((target.yaw - 0.7).abs() < 1e-9);
    }

    #[test]
    fn terminal_window_is_measured_in_spline_time() {
        // rho = 0.5: duration 4.5 spline-seconds. At wall time 8.5 the
        // execution time is 4.25, leaving 0.25 spline-seconds, inside the
        // 0.3 window regardless of the slower wall clock.
        let record = line_record_with_factor(0.5);
        let shared = shared_with(Some(record), 0.0);
        let sink = LatestTargetSink::new();
        TrajectoryExecutor::new(NavConfig::default()).tick(&shared, &sink, 8.5);
        let target = sink.latest().unwrap();
        assert_eq!(target.velocity, Vector3::zeros());
        assert_eq!(target.acceleration, Vector3::zeros());
    }

    #[test]
    fn yaw_follows_odometry_when_yaw_control_disabled() {
        let shared = shared_with(Some(line_record()), 1.1);
        let sink = LatestTargetSink::new();
        TrajectoryExecutor::new(NavConfig::default()).tick(&shared, &sink, 1.0);
        assert!((sink.latest().unwrap().yaw - 1.1).abs() < 1e-9);
    }

    #[test]
    fn yaw_follows_velocity_when_enabled() {
        let mut config = NavConfig::default();
        config.use_yaw_control = true;
        let shared = shared_with(Some(line_record()), 1.1);
        let sink = LatestTargetSink::new();
        TrajectoryExecutor::new(config).tick(&shared, &sink, 1.0);
        // Motion is along +x, so the velocity azimuth is zero.
        assert!(sink.latest().unwrap().yaw.abs() < 1e-6);
    }

    #[test]
    fn hold_target_emitted_without_trajectory() {
        let shared = shared_with(None, 0.0);
        shared.lock().hold_target =
            Some(TargetSetpoint::hold(Vector3::new(1.0, 1.0, 1.0), 0.3));
        let sink = LatestTargetSink::new();
        TrajectoryExecutor::new(NavConfig::default()).tick(&shared, &sink, 1.0);
        assert!((sink.latest().unwrap().position.y - 1.0).abs() < 1e-9);
    }
}
