// navigation/orchestrator.rs

// Composes the global planner, the polynomial warm start and the B-spline
// optimizer into one plan attempt. Input construction follows a three-way
// split on the previous trajectory, the knot spacing is shrunk until the
// input passes the optimizer's distance check, and the finished record is
// swapped in atomically.

use std::sync::Arc;
use std::time::Instant;

use log::{debug, error, info, warn};
use nalgebra::Vector3;

use crate::config::{NavConfig, GOAL_REACH_TOLERANCE, KNOT_SPACING_SHRINK, PLANNER_TIME_BUDGET};
use crate::map::MapQuery;
use crate::obstacles::ObstacleSource;
use crate::planner::{
    BsplineOptimizer, MinSnapPlanner, PolyTrajectory, RrtPlanner, TrajectoryDivider,
};
use crate::types::{angle_between, BoundaryConditions, TargetSetpoint};
use crate::NavError;

use super::{has_collision, ActiveTrajectory, NavShared};

/// One-shot description of the accepted input path.
struct InputPath {
    samples: Vec<Vector3<f64>>,
    knot_span: f64,
    /// Polynomial continuation, when one was appended, with the time at
    /// which the new plan leaves it.
    poly_tail: Option<(PolyTrajectory, f64)>,
}

/// Plan-attempt assembler: owns the planners and drives one replan per
/// pending flag.
pub struct PlannerOrchestrator {
    config: NavConfig,
    rrt: RrtPlanner,
    poly: MinSnapPlanner,
    bspline: BsplineOptimizer,
    divider: TrajectoryDivider,
    global_path: Option<Vec<Vector3<f64>>>,
    /// Log the divider analysis after each successful plan.
    analyze_plans: bool,
}

impl PlannerOrchestrator {
    pub fn new(config: NavConfig, analyze_plans: bool) -> Self {
        let rrt = RrtPlanner::new(config.rrt_step, config.rrt_max_iterations);
        let poly = MinSnapPlanner::new(config.desired_velocity, config.desired_acceleration);
        let bspline = BsplineOptimizer::new(
            config.desired_velocity,
            config.desired_acceleration,
            config.safety_distance,
            config.initial_knot_spacing,
        );
        PlannerOrchestrator {
            config,
            rrt,
            poly,
            bspline,
            divider: TrajectoryDivider::new(),
            global_path: None,
            analyze_plans,
        }
    }

    /// One planning attempt at wall time `now`, if a replan is pending.
    pub fn tick(
        &mut self,
        shared: &NavShared,
        map: &dyn MapQuery,
        obstacles: &dyn ObstacleSource,
        now: f64,
    ) {
        // Copy the inputs out; planning runs without the lock.
        let (vehicle, odom, goal, epoch, active, need_global) = {
            let inner = shared.lock();
            if !inner.replan_pending {
                return;
            }
            let goal = match inner.goal {
                Some(g) => g,
                None => return,
            };
            let odom = match inner.odom {
                Some(o) => o,
                None => {
                    debug!("planner: {}, skipping cycle", NavError::StaleOdometry);
                    return;
                }
            };
            (
                inner.vehicle,
                odom,
                goal,
                inner.goal_epoch,
                inner.active.clone(),
                inner.need_global_plan,
            )
        };

        // A degenerate map handle cannot be planned against; skip the
        // cycle and keep whatever trajectory is executing.
        let map_bounds = map.bounds();
        if (0..3).any(|i| map_bounds.max[i] <= map_bounds.min[i]) {
            debug!("planner: {}, skipping cycle", NavError::MapUnavailable);
            return;
        }

        // Global geometric plan, once per goal.
        if self.config.use_global_planner && need_global {
            match self.rrt.plan(map, odom.pose.position, goal) {
                Ok(path) => {
                    shared.viz().global_path = path.clone();
                    self.global_path = Some(path);
                    shared.lock().need_global_plan = false;
                }
                Err(_) => {
                    self.global_path = None;
                    let mut inner = shared.lock();
                    inner.need_global_plan = false;
                    inner.replan_pending = false;
                    if !inner.unreachable_reported {
                        inner.unreachable_reported = true;
                        error!("global planner: goal unreachable under current map");
                    }
                    return;
                }
            }
        }

        // Start boundary: current kinematic state when continuing an
        // active trajectory, rest otherwise. End boundary: rest.
        let mut boundary = if active.is_some() {
            BoundaryConditions::to_rest(vehicle.velocity, vehicle.acceleration)
        } else {
            BoundaryConditions::at_rest()
        };

        let dynamic_obstacles = obstacles.snapshot(&odom.pose, self.config.obstacle_fov);
        let input = match self.build_input(map, &active, &odom.pose.position, &goal, now) {
            Ok(input) => input,
            Err(err) => {
                warn!("planner: input construction failed: {err}");
                shared.lock().replan_pending = false;
                return;
            }
        };
        if input.samples.len() < 2 {
            shared.lock().replan_pending = false;
            return;
        }

        // The polynomial continuation dictates the derivatives the new
        // plan must close with.
        if let Some((poly, leave_time)) = &input.poly_tail {
            boundary.end_velocity = poly.velocity(*leave_time);
            boundary.end_acceleration = poly.acceleration(*leave_time);
            shared.viz().poly_trajectory = poly.sample(0.1);
        }
        shared.viz().input_trajectory = input.samples.clone();

        let result = self
            .bspline
            .set_input(&input.samples, &boundary, input.knot_span)
            .and_then(|()| {
                self.bspline.set_dynamic_obstacles(&dynamic_obstacles);
                self.bspline.optimize(map)
            });

        match result {
            Ok(spline) => {
                let rho = self.bspline.linear_factor(&spline);
                let record = {
                    let mut inner = shared.lock();
                    if inner.goal_epoch != epoch {
                        debug!("planner: discarding plan for a superseded goal");
                        return;
                    }
                    inner.generation_counter += 1;
                    let record = Arc::new(ActiveTrajectory::new(
                        spline,
                        now,
                        rho,
                        inner.generation_counter,
                    ));
                    inner.active = Some(record.clone());
                    inner.hold_target = None;
                    inner.yaw_align = None;
                    inner.replan_pending = false;
                    record
                };
                info!(
                    "trajectory generated successfully (generation {}, duration {:.2}s, rho {:.3})",
                    record.generation,
                    record.duration(),
                    record.linear_factor
                );

                let sampled = sample_wall_time(&record);
                shared.viz().bspline_trajectory =
                    sampled.iter().map(|(_, p)| *p).collect();
                if self.analyze_plans {
                    let analysis = self.divider.analyze(map, &sampled);
                    for (interval, dist) in
                        analysis.intervals.iter().zip(analysis.distances.iter())
                    {
                        info!(
                            "trajectory interval {:.2}..{:.2}s, nearest obstacle {:.2}m",
                            interval.0, interval.1, dist
                        );
                    }
                }
            }
            Err(err) => self.handle_failure(shared, map, err, epoch, now),
        }
    }

    /// Failure handling per the replan contract: keep a safe previous
    /// trajectory, otherwise stop and surface the fatal failure. Results
    /// computed against a superseded goal are discarded either way.
    fn handle_failure(
        &self,
        shared: &NavShared,
        map: &dyn MapQuery,
        err: NavError,
        epoch: u64,
        now: f64,
    ) {
        let mut inner = shared.lock();
        if inner.goal_epoch != epoch {
            debug!("planner: discarding failed plan for a superseded goal");
            return;
        }
        let previous_safe = inner
            .active
            .as_ref()
            .map(|a| !has_collision(map, a, a.execution_time(now)))
            .unwrap_or(false);
        if previous_safe {
            inner.replan_pending = false;
            warn!("{} (cause: {err})", NavError::TransientInfeasibility);
        } else {
            inner.active = None;
            inner.replan_pending = false;
            inner.yaw_align = None;
            if let Some(odom) = inner.odom {
                inner.hold_target =
                    Some(TargetSetpoint::hold(odom.pose.position, odom.pose.yaw()));
            }
            error!("stop: {} (cause: {err})", NavError::FatalInfeasibility);
        }
    }

    /// Builds the optimizer input, shrinking the knot spacing until the
    /// spacing check accepts it or the time budget / iteration cap runs
    /// out (the best attempt so far is then used).
    fn build_input(
        &mut self,
        map: &dyn MapQuery,
        active: &Option<Arc<ActiveTrajectory>>,
        current: &Vector3<f64>,
        goal: &Vector3<f64>,
        now: f64,
    ) -> Result<InputPath, NavError> {
        // Polynomial leg of the input, chosen by the three-way split.
        enum Plan {
            /// Fresh plan: polynomial only.
            Fresh(PolyTrajectory),
            /// Residual of the active trajectory plus a continuation.
            Continue(Arc<ActiveTrajectory>, PolyTrajectory),
            /// Residual only; terminal already near the goal.
            Residual(Arc<ActiveTrajectory>),
        }

        let plan = match active {
            None => {
                let waypoints = match (&self.global_path, self.config.use_global_planner) {
                    (Some(path), true) => rest_of_global_path(path, current),
                    _ => vec![*current, *goal],
                };
                let boundary = BoundaryConditions::at_rest();
                let poly = self.poly.plan(&waypoints, &boundary)?;
                Plan::Fresh(poly)
            }
            Some(record) => {
                let terminal = record.terminal_position();
                if (terminal - goal).norm() >= GOAL_REACH_TOLERANCE {
                    let t_end = record.duration();
                    let boundary = BoundaryConditions::to_rest(
                        record.velocity_world(t_end),
                        record.acceleration_world(t_end),
                    );
                    let poly = self.poly.plan(&[terminal, *goal], &boundary)?;
                    Plan::Continue(record.clone(), poly)
                } else {
                    Plan::Residual(record.clone())
                }
            }
        };

        let budget_start = Instant::now();
        let mut dt = self.bspline.init_knot_spacing();
        let mut best: Option<InputPath> = None;
        for _ in 0..self.config.spacing_iteration_cap {
            let (candidate, residual_len) = match &plan {
                Plan::Fresh(poly) => (poly.sample(dt), 0),
                Plan::Continue(record, poly) => {
                    let residual = sample_residual(record, now, dt);
                    let n = residual.len();
                    let mut combined = residual;
                    combined.extend(poly.sample(dt).into_iter().skip(1));
                    (combined, n)
                }
                Plan::Residual(record) => {
                    let residual = sample_residual(record, now, dt);
                    (residual, 0)
                }
            };
            let check = self
                .bspline
                .check_input_spacing(&candidate, dt, map.resolution());
            let poly_tail = match &plan {
                Plan::Continue(_, poly) => {
                    let leave = (check.final_time - residual_len.saturating_sub(1) as f64 * dt)
                        .clamp(0.0, poly.duration());
                    Some((poly.clone(), leave))
                }
                Plan::Fresh(poly) => Some((poly.clone(), check.final_time.min(poly.duration()))),
                Plan::Residual(_) => None,
            };
            let accepted = check.ok;
            best = Some(InputPath {
                samples: check.adjusted_path,
                knot_span: dt,
                poly_tail,
            });
            if accepted {
                break;
            }
            if budget_start.elapsed().as_secs_f64() >= PLANNER_TIME_BUDGET {
                warn!(
                    "planner: {}; using the best spacing attempted",
                    NavError::OptimizerTimeout
                );
                break;
            }
            dt *= KNOT_SPACING_SHRINK;
        }
        best.ok_or(NavError::InvalidInput("no input path produced".to_string()))
    }
}

/// Suffix of the global polyline beginning at the vertex nearest the
/// current position among those whose local direction disagrees with the
/// bearing to the vehicle by more than 135 degrees (the vehicle is
/// "behind" them), prefixed with the current position.
fn rest_of_global_path(path: &[Vector3<f64>], current: &Vector3<f64>) -> Vec<Vector3<f64>> {
    let mut next_idx = path.len() - 1;
    let mut min_dist = f64::INFINITY;
    for i in 0..path.len() - 1 {
        let to_vehicle = current - path[i];
        let to_next = path[i + 1] - path[i];
        let dist = to_vehicle.norm();
        if angle_between(&to_next, &to_vehicle) > std::f64::consts::PI * 3.0 / 4.0
            && dist < min_dist
        {
            next_idx = i;
            min_dist = dist;
        }
    }
    let mut out = Vec::with_capacity(path.len() - next_idx + 1);
    out.push(*current);
    out.extend_from_slice(&path[next_idx..]);
    out
}

/// Samples the active trajectory from the current execution time to its
/// end at `dt` spline-time steps.
fn sample_residual(record: &ActiveTrajectory, now: f64, dt: f64) -> Vec<Vector3<f64>> {
    let mut out = Vec::new();
    let mut t = record.execution_time(now);
    while t <= record.duration() {
        out.push(record.position(t));
        t += dt;
    }
    if out.is_empty() {
        out.push(record.terminal_position());
    }
    out
}

/// Samples a record on the wall-time grid used by the divider analysis.
fn sample_wall_time(record: &ActiveTrajectory) -> Vec<(f64, Vector3<f64>)> {
    let mut out = Vec::new();
    let mut t = 0.0;
    while t * record.linear_factor <= record.duration() {
        out.push((t, record.position(t * record.linear_factor)));
        t += 0.1;
    }
    out
}
