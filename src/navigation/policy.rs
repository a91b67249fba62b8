// navigation/policy.rs

// Replan trigger state machine, evaluated at ~100 Hz. One pending flag
// drives at most one planning attempt; triggers never queue.

use log::{debug, info};

use crate::config::{NavConfig, GOAL_REACH_TOLERANCE, REPLAN_DISTANCE_MILESTONE};
use crate::map::MapQuery;
use crate::obstacles::ObstacleSource;
use crate::types::{azimuth_to, wrap_angle, TargetSetpoint};
use crate::NavError;

use super::{execution_distance, has_collision, NavShared, YawAlignment};

/// Decides when to (re)plan, when to stop and when to keep executing.
pub struct ReplanPolicy {
    config: NavConfig,
    /// Dynamic navigator mode adds the in-FOV obstacle trigger.
    dynamic_mode: bool,
}

impl ReplanPolicy {
    pub fn new(config: NavConfig, dynamic_mode: bool) -> Self {
        ReplanPolicy {
            config,
            dynamic_mode,
        }
    }

    /// One policy evaluation at wall time `now`.
    pub fn tick(
        &self,
        shared: &NavShared,
        map: &dyn MapQuery,
        obstacles: &dyn ObstacleSource,
        now: f64,
    ) {
        let mut inner = shared.lock();
        let odom = match inner.odom {
            Some(odom) => odom,
            None => {
                // Preconditions not met; skip the cycle rather than stop.
                debug!("policy: {}, skipping cycle", NavError::StaleOdometry);
                return;
            }
        };

        if inner.goal_received {
            let goal = match inner.goal {
                Some(g) => g,
                None => return,
            };
            inner.goal_received = false;
            if (odom.pose.position - goal).norm() <= GOAL_REACH_TOLERANCE {
                // Goal coincident with the vehicle: reached on arrival,
                // no plan emitted.
                inner.replan_pending = false;
                inner.active = None;
                inner.yaw_align = None;
                info!("goal is within reach tolerance, holding");
                return;
            }
            inner.replan_pending = false;
            inner.active = None;
            if !self.config.no_yaw_turning && !self.config.use_yaw_control {
                // Realign toward the goal azimuth while the planner works;
                // the rotation is stepped tick by tick below.
                inner.yaw_align = Some(YawAlignment {
                    goal_yaw: azimuth_to(&odom.pose.position, &goal),
                    yaw: odom.pose.yaw(),
                    position: odom.pose.position,
                    last_time: now,
                });
                inner.hold_target =
                    Some(TargetSetpoint::hold(odom.pose.position, odom.pose.yaw()));
            }
            inner.replan_pending = true;
            inner.need_global_plan = self.config.use_global_planner;
            inner.unreachable_reported = false;
            info!("replan for new goal position");
            return;
        }

        // Pace any in-progress yaw realignment at the configured angular
        // velocity; a published plan cancels it.
        if let Some(mut align) = inner.yaw_align.take() {
            let dt = (now - align.last_time).max(0.0);
            let remaining = wrap_angle(align.goal_yaw - align.yaw);
            let max_step = self.config.desired_angular_velocity * dt;
            align.yaw = wrap_angle(align.yaw + remaining.clamp(-max_step, max_step));
            align.last_time = now;
            inner.hold_target = Some(TargetSetpoint::hold(align.position, align.yaw));
            if wrap_angle(align.goal_yaw - align.yaw).abs() > 1e-3 {
                inner.yaw_align = Some(align);
            }
        }

        let active = match inner.active.clone() {
            Some(a) => a,
            None => return,
        };
        let goal = match inner.goal {
            Some(g) => g,
            None => return,
        };

        if (odom.pose.position - goal).norm() <= GOAL_REACH_TOLERANCE {
            inner.replan_pending = false;
            inner.active = None;
            inner.yaw_align = None;
            inner.hold_target = Some(TargetSetpoint::hold(odom.pose.position, odom.pose.yaw()));
            info!("reach goal position");
            return;
        }

        let tau = active.execution_time(now);
        if has_collision(map, &active, tau) {
            inner.replan_pending = true;
            info!("replan for collision");
            return;
        }

        if !inner.replan_pending && execution_distance(&active, tau) >= REPLAN_DISTANCE_MILESTONE {
            inner.replan_pending = true;
            info!("regular replan");
            return;
        }

        if self.dynamic_mode
            && !obstacles
                .snapshot(&odom.pose, self.config.obstacle_fov)
                .is_empty()
        {
            inner.replan_pending = true;
            info!("replan for dynamic obstacles");
        }
    }
}
