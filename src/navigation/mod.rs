// navigation/mod.rs

// Shared state of the replanning pipeline: the atomically swappable
// active-trajectory record, the replan flags, the controller sink seam
// and the best-effort visualization snapshots.

pub mod executor;
pub mod navigator;
pub mod orchestrator;
pub mod policy;

pub use executor::TrajectoryExecutor;
pub use navigator::{Navigator, NavigatorMode};
pub use orchestrator::PlannerOrchestrator;
pub use policy::ReplanPolicy;

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use nalgebra::Vector3;

use crate::map::MapQuery;
use crate::planner::BsplineTrajectory;
use crate::types::{OdometrySnapshot, TargetSetpoint, VehicleState};

/// Consumer of controller setpoints; the autopilot interface behind it is
/// outside the core.
pub trait SetpointSink: Send + Sync {
    fn push(&self, target: &TargetSetpoint);
}

/// Sink that retains the most recent target. Useful for hosts that poll
/// and for closed-loop tests.
#[derive(Default)]
pub struct LatestTargetSink {
    latest: Mutex<Option<TargetSetpoint>>,
    count: AtomicU64,
}

impl LatestTargetSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn latest(&self) -> Option<TargetSetpoint> {
        *self.latest.lock().unwrap()
    }

    /// Number of setpoints pushed since construction.
    pub fn count(&self) -> u64 {
        self.count.load(Ordering::Relaxed)
    }
}

impl SetpointSink for LatestTargetSink {
    fn push(&self, target: &TargetSetpoint) {
        *self.latest.lock().unwrap() = Some(*target);
        self.count.fetch_add(1, Ordering::Relaxed);
    }
}

/// One published plan. Replaced wholesale on every successful replan; the
/// executor and policy only ever hold it through an `Arc`, so a swap can
/// never expose a field-wise mix of two generations.
pub struct ActiveTrajectory {
    spline: BsplineTrajectory,
    velocity_spline: BsplineTrajectory,
    acceleration_spline: BsplineTrajectory,
    /// Wall time at which execution of this plan began, seconds.
    pub start_wall_time: f64,
    /// Linear time re-parameterization factor rho in (0, 1].
    pub linear_factor: f64,
    /// Monotone replan counter; larger is newer.
    pub generation: u64,
}

impl ActiveTrajectory {
    pub fn new(
        spline: BsplineTrajectory,
        start_wall_time: f64,
        linear_factor: f64,
        generation: u64,
    ) -> Self {
        let velocity_spline = spline.derivative();
        let acceleration_spline = velocity_spline.derivative();
        ActiveTrajectory {
            spline,
            velocity_spline,
            acceleration_spline,
            start_wall_time,
            linear_factor,
            generation,
        }
    }

    /// Duration of the plan in spline time.
    pub fn duration(&self) -> f64 {
        self.spline.duration()
    }

    /// Spline time reached at wall time `now`: `(now - start) * rho`,
    /// clamped to the domain.
    pub fn execution_time(&self, now: f64) -> f64 {
        ((now - self.start_wall_time) * self.linear_factor).clamp(0.0, self.duration())
    }

    pub fn position(&self, tau: f64) -> Vector3<f64> {
        self.spline.position(tau)
    }

    /// World-frame velocity at spline time `tau` (scaled by rho).
    pub fn velocity_world(&self, tau: f64) -> Vector3<f64> {
        self.velocity_spline.position(tau) * self.linear_factor
    }

    /// World-frame acceleration at spline time `tau` (scaled by rho^2).
    pub fn acceleration_world(&self, tau: f64) -> Vector3<f64> {
        self.acceleration_spline.position(tau) * self.linear_factor.powi(2)
    }

    pub fn terminal_position(&self) -> Vector3<f64> {
        self.spline.position(self.duration())
    }

    pub fn spline(&self) -> &BsplineTrajectory {
        &self.spline
    }
}

/// Best-effort snapshots of the latest planning artifacts.
#[derive(Clone, Debug, Default)]
pub struct VizSnapshots {
    pub global_path: Vec<Vector3<f64>>,
    pub poly_trajectory: Vec<Vector3<f64>>,
    pub input_trajectory: Vec<Vector3<f64>>,
    pub bspline_trajectory: Vec<Vector3<f64>>,
}

/// Yaw rotation in progress toward a new goal's azimuth, stepped by the
/// policy at the configured angular velocity.
#[derive(Clone, Copy, Debug)]
pub(crate) struct YawAlignment {
    /// Azimuth toward the goal, radians.
    pub goal_yaw: f64,
    /// Yaw currently commanded.
    pub yaw: f64,
    /// Position held while turning.
    pub position: Vector3<f64>,
    /// Wall time of the last step.
    pub last_time: f64,
}

/// Mutable state shared between the periodic activities. Locks are held
/// only long enough to copy fields in or out; the planners never hold the
/// lock while optimizing.
pub(crate) struct NavInner {
    pub odom: Option<OdometrySnapshot>,
    pub vehicle: VehicleState,
    pub goal: Option<Vector3<f64>>,
    /// Bumped on every accepted goal; plans born under an older epoch are
    /// discarded instead of published.
    pub goal_epoch: u64,
    pub goal_received: bool,
    pub replan_pending: bool,
    pub active: Option<Arc<ActiveTrajectory>>,
    pub generation_counter: u64,
    /// Emitted by the executor when no trajectory is active.
    pub hold_target: Option<TargetSetpoint>,
    /// In-progress yaw realignment toward a new goal.
    pub yaw_align: Option<YawAlignment>,
    /// Autopilot gate: setpoints flow only while offboard-armed.
    pub offboard: bool,
    pub need_global_plan: bool,
    pub unreachable_reported: bool,
}

pub struct NavShared {
    inner: Mutex<NavInner>,
    viz: Mutex<VizSnapshots>,
}

impl NavShared {
    pub(crate) fn new() -> Self {
        NavShared {
            inner: Mutex::new(NavInner {
                odom: None,
                vehicle: VehicleState::default(),
                goal: None,
                goal_epoch: 0,
                goal_received: false,
                replan_pending: false,
                active: None,
                generation_counter: 0,
                hold_target: None,
                yaw_align: None,
                offboard: false,
                need_global_plan: false,
                unreachable_reported: false,
            }),
            viz: Mutex::new(VizSnapshots::default()),
        }
    }

    pub(crate) fn lock(&self) -> MutexGuard<'_, NavInner> {
        self.inner.lock().unwrap()
    }

    pub(crate) fn viz(&self) -> MutexGuard<'_, VizSnapshots> {
        self.viz.lock().unwrap()
    }

    pub fn visualization(&self) -> VizSnapshots {
        self.viz.lock().unwrap().clone()
    }
}

/// True when any sample of the active trajectory from `tau` to its end
/// lies on inflated occupancy.
pub(crate) fn has_collision(map: &dyn MapQuery, active: &ActiveTrajectory, tau: f64) -> bool {
    let mut t = tau;
    while t <= active.duration() {
        if map.inflated_occupied(&active.position(t)) {
            return true;
        }
        t += 0.1;
    }
    false
}

/// Path length executed so far, integrated over the spline from its start
/// to `tau` at 0.1 s steps.
pub(crate) fn execution_distance(active: &ActiveTrajectory, tau: f64) -> f64 {
    let mut total = 0.0;
    let mut prev: Option<Vector3<f64>> = None;
    let mut t = 0.0;
    while t <= tau {
        let p = active.position(t);
        if let Some(q) = prev {
            total += (p - q).norm();
        }
        prev = Some(p);
        t += 0.1;
    }
    total
}
