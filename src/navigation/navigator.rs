// navigation/navigator.rs

// Front end of the core: owns the shared state, the planners and the
// periodic activities. The two flight variants share the pipeline; the
// dynamic one adds the obstacle trigger and the free-region carving.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use log::info;
use nalgebra::Vector3;

use crate::config::{NavConfig, GOAL_REACH_TOLERANCE};
use crate::map::{Aabb, MapQuery};
use crate::obstacles::ObstacleSource;
use crate::state::StateEstimator;
use crate::types::OdometrySnapshot;
use crate::NavError;

use super::{
    NavShared, PlannerOrchestrator, ReplanPolicy, SetpointSink, TrajectoryExecutor, VizSnapshots,
};

/// Which flight variant the navigator runs.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum NavigatorMode {
    /// Known-map flight: collision / milestone / new-goal triggers, plan
    /// analysis logging.
    Static,
    /// Moving-obstacle flight: adds the in-FOV obstacle trigger and the
    /// free-region carving of tracked movers.
    Dynamic,
}

/// The navigation core. Periodic entry points are plain tick functions
/// taking wall time in seconds; `spawn` drives them on threads at the
/// nominal rates.
pub struct Navigator {
    config: NavConfig,
    mode: NavigatorMode,
    map: Arc<dyn MapQuery>,
    obstacles: Arc<dyn ObstacleSource>,
    sink: Arc<dyn SetpointSink>,
    shared: Arc<NavShared>,
    estimator: Mutex<StateEstimator>,
    orchestrator: Mutex<PlannerOrchestrator>,
    policy: ReplanPolicy,
    executor: TrajectoryExecutor,
}

impl Navigator {
    pub fn new(
        config: NavConfig,
        mode: NavigatorMode,
        map: Arc<dyn MapQuery>,
        obstacles: Arc<dyn ObstacleSource>,
        sink: Arc<dyn SetpointSink>,
    ) -> Result<Self, NavError> {
        config.validate()?;
        let analyze_plans = mode == NavigatorMode::Static;
        Ok(Navigator {
            policy: ReplanPolicy::new(config.clone(), mode == NavigatorMode::Dynamic),
            executor: TrajectoryExecutor::new(config.clone()),
            orchestrator: Mutex::new(PlannerOrchestrator::new(config.clone(), analyze_plans)),
            estimator: Mutex::new(StateEstimator::new()),
            shared: Arc::new(NavShared::new()),
            config,
            mode,
            map,
            obstacles,
            sink,
        })
    }

    /// Feeds one odometry snapshot; runs the state estimator inline.
    pub fn handle_odometry(&self, odom: OdometrySnapshot) {
        let state = self.estimator.lock().unwrap().update(&odom);
        let mut inner = self.shared.lock();
        inner.odom = Some(odom);
        inner.vehicle = state;
    }

    /// Accepts a new goal position. Supersedes any in-flight replan.
    pub fn set_goal(&self, goal: Vector3<f64>) {
        let mut inner = self.shared.lock();
        inner.goal = Some(goal);
        inner.goal_epoch += 1;
        inner.goal_received = true;
        info!(
            "accepted goal ({:.2}, {:.2}, {:.2})",
            goal.x, goal.y, goal.z
        );
    }

    /// Autopilot gate: the executor emits setpoints only while true.
    pub fn set_offboard(&self, offboard: bool) {
        self.shared.lock().offboard = offboard;
    }

    /// Replan-policy evaluation (nominal 100 Hz).
    pub fn policy_tick(&self, now: f64) {
        self.policy
            .tick(&self.shared, &*self.map, &*self.obstacles, now);
    }

    /// Planning attempt (nominal 10 Hz static / 50 Hz dynamic).
    pub fn planner_tick(&self, now: f64) {
        self.orchestrator
            .lock()
            .unwrap()
            .tick(&self.shared, &*self.map, &*self.obstacles, now);
    }

    /// Trajectory execution (nominal 100 Hz).
    pub fn executor_tick(&self, now: f64) {
        self.executor.tick(&self.shared, &*self.sink, now);
    }

    /// Carves tracked movers out of the static map (dynamic mode,
    /// nominal 100 Hz). Padding keeps a margin around each box.
    pub fn free_region_tick(&self) {
        if self.mode != NavigatorMode::Dynamic {
            return;
        }
        for ob in self.obstacles.snapshot_all() {
            let half = ob.extent * 0.5;
            let region = Aabb::new(
                Vector3::new(
                    ob.position.x - half.x - 0.3,
                    ob.position.y - half.y - 0.3,
                    ob.position.z - half.z,
                ),
                Vector3::new(
                    ob.position.x + half.x + 0.3,
                    ob.position.y + half.y + 0.3,
                    ob.position.z + half.z + 0.2,
                ),
            );
            self.map.update_free_region(&region);
        }
    }

    /// True once the vehicle sits within the reach tolerance of the last
    /// accepted goal with no trajectory left to execute.
    pub fn goal_reached(&self) -> bool {
        let inner = self.shared.lock();
        match (inner.goal, inner.odom) {
            (Some(goal), Some(odom)) => {
                inner.active.is_none()
                    && !inner.replan_pending
                    && (odom.pose.position - goal).norm() <= GOAL_REACH_TOLERANCE
            }
            _ => false,
        }
    }

    /// Generation id of the active trajectory, if one is executing.
    pub fn active_generation(&self) -> Option<u64> {
        self.shared.lock().active.as_ref().map(|a| a.generation)
    }

    /// Linear factor rho of the active trajectory, if one is executing.
    pub fn active_linear_factor(&self) -> Option<f64> {
        self.shared.lock().active.as_ref().map(|a| a.linear_factor)
    }

    pub fn trajectory_ready(&self) -> bool {
        self.shared.lock().active.is_some()
    }

    /// Latest planning artifacts for visualization, best effort.
    pub fn visualization(&self) -> VizSnapshots {
        self.shared.visualization()
    }

    pub fn config(&self) -> &NavConfig {
        &self.config
    }

    /// Spawns the periodic activities on threads at their nominal rates.
    /// The returned handles run until `stop` goes true.
    pub fn spawn(self: &Arc<Self>, stop: Arc<AtomicBool>) -> Vec<JoinHandle<()>> {
        let epoch = Instant::now();
        let planner_period = match self.mode {
            NavigatorMode::Static => Duration::from_millis(100),
            NavigatorMode::Dynamic => Duration::from_millis(20),
        };
        let mut handles = Vec::new();

        let nav = self.clone();
        let stop_flag = stop.clone();
        handles.push(std::thread::spawn(move || {
            while !stop_flag.load(Ordering::Relaxed) {
                nav.planner_tick(epoch.elapsed().as_secs_f64());
                std::thread::sleep(planner_period);
            }
        }));

        let nav = self.clone();
        let stop_flag = stop.clone();
        handles.push(std::thread::spawn(move || {
            while !stop_flag.load(Ordering::Relaxed) {
                nav.policy_tick(epoch.elapsed().as_secs_f64());
                std::thread::sleep(Duration::from_millis(10));
            }
        }));

        let nav = self.clone();
        let stop_flag = stop.clone();
        handles.push(std::thread::spawn(move || {
            while !stop_flag.load(Ordering::Relaxed) {
                nav.executor_tick(epoch.elapsed().as_secs_f64());
                std::thread::sleep(Duration::from_millis(10));
            }
        }));

        if self.mode == NavigatorMode::Dynamic {
            let nav = self.clone();
            let stop_flag = stop;
            handles.push(std::thread::spawn(move || {
                while !stop_flag.load(Ordering::Relaxed) {
                    nav.free_region_tick();
                    std::thread::sleep(Duration::from_millis(10));
                }
            }));
        }
        handles
    }
}
