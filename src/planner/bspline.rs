// planner/bspline.rs

// Uniform B-spline trajectory representation plus the gradient-based
// refinement stage. The optimizer seeds control points from an input
// polyline, descends a composite cost (smoothness, static clearance,
// dynamic clearance, feasibility) and reports the linear factor that
// rescales time so the result respects the velocity/acceleration limits.

use log::{debug, warn};
use nalgebra::{DMatrix, Vector3};

use crate::map::MapQuery;
use crate::obstacles::DynamicObstacle;
use crate::types::BoundaryConditions;
use crate::NavError;

/// Uniform B-spline of the given degree over knot spacing `knot_span`.
///
/// The valid domain is `[0, duration()]` with
/// `duration = (n_control - degree) * knot_span`.
#[derive(Clone, Debug)]
pub struct BsplineTrajectory {
    control_points: Vec<Vector3<f64>>,
    knot_span: f64,
    degree: usize,
}

impl BsplineTrajectory {
    pub fn new(control_points: Vec<Vector3<f64>>, knot_span: f64, degree: usize) -> Self {
        assert!(
            control_points.len() > degree,
            "need more control points than the degree"
        );
        assert!(knot_span > 0.0);
        BsplineTrajectory {
            control_points,
            knot_span,
            degree,
        }
    }

    pub fn control_points(&self) -> &[Vector3<f64>] {
        &self.control_points
    }

    pub fn knot_span(&self) -> f64 {
        self.knot_span
    }

    /// Duration of the valid domain in spline time.
    pub fn duration(&self) -> f64 {
        (self.control_points.len() - self.degree) as f64 * self.knot_span
    }

    /// Knot value for index `k` on the uniform clamped-free knot line.
    fn knot(&self, k: i64) -> f64 {
        (k - self.degree as i64) as f64 * self.knot_span
    }

    /// Position at spline time `t` (clamped to the domain), by De Boor's
    /// algorithm on the uniform knot vector.
    pub fn position(&self, t: f64) -> Vector3<f64> {
        let n = self.control_points.len();
        let p = self.degree;
        let t = t.clamp(0.0, self.duration());
        // Knot span index with t in [knot(k), knot(k+1)).
        let k = ((t / self.knot_span).floor() as i64 + p as i64).min(n as i64 - 1).max(p as i64)
            as usize;

        let mut d: Vec<Vector3<f64>> = (0..=p)
            .map(|j| self.control_points[j + k - p])
            .collect();
        for r in 1..=p {
            for j in (r..=p).rev() {
                let i = (j + k - p) as i64;
                let denom = self.knot(i + (p - r + 1) as i64) - self.knot(i);
                let alpha = if denom.abs() < 1e-12 {
                    0.0
                } else {
                    (t - self.knot(i)) / denom
                };
                d[j] = d[j - 1] * (1.0 - alpha) + d[j] * alpha;
            }
        }
        d[p]
    }

    /// Derivative spline: degree drops by one, control points become the
    /// scaled forward differences.
    pub fn derivative(&self) -> BsplineTrajectory {
        let dt = self.knot_span;
        let pts = self
            .control_points
            .windows(2)
            .map(|w| (w[1] - w[0]) / dt)
            .collect();
        BsplineTrajectory::new(pts, dt, self.degree - 1)
    }

    /// Velocity at spline time `t` (unscaled by the linear factor).
    pub fn velocity(&self, t: f64) -> Vector3<f64> {
        self.derivative().position(t)
    }

    /// Acceleration at spline time `t` (unscaled by the linear factor).
    pub fn acceleration(&self, t: f64) -> Vector3<f64> {
        self.derivative().derivative().position(t)
    }
}

/// Control-point triple of a uniform cubic B-spline whose curve carries
/// the given position, velocity and acceleration at the adjacent knot:
/// solves p = (Q0 + 4Q1 + Q2)/6, v = (Q2 - Q0)/(2Δ), a = (Q0 - 2Q1 + Q2)/Δ².
fn boundary_triple(
    p: &Vector3<f64>,
    v: &Vector3<f64>,
    a: &Vector3<f64>,
    dt: f64,
) -> [Vector3<f64>; 3] {
    let q1 = p - a * (dt * dt / 6.0);
    let q0 = p + a * (dt * dt / 3.0) - v * dt;
    let q2 = p + a * (dt * dt / 3.0) + v * dt;
    [q0, q1, q2]
}

/// Outcome of the input-spacing validation.
#[derive(Clone, Debug)]
pub struct SpacingCheck {
    /// True when every consecutive pair satisfies the distance bound.
    pub ok: bool,
    /// Input with near-duplicate samples removed.
    pub adjusted_path: Vec<Vector3<f64>>,
    /// `(len - 1) * knot_span` for the adjusted path.
    pub final_time: f64,
}

/// Gradient-based B-spline refinement stage.
pub struct BsplineOptimizer {
    max_velocity: f64,
    max_acceleration: f64,
    safety_distance: f64,
    initial_knot_spacing: f64,
    iterations: usize,
    learning_rate: f64,
    control_points: Vec<Vector3<f64>>,
    knot_span: f64,
    dynamic_obstacles: Vec<DynamicObstacle>,
}

const DEGREE: usize = 3;
const W_SMOOTH: f64 = 1.0;
const W_STATIC: f64 = 5.0;
const W_DYNAMIC: f64 = 10.0;
const W_FEASIBLE: f64 = 0.1;
const GRAD_CLIP: f64 = 5.0;
/// Probe directions for the static clearance term: axes plus diagonals.
const PROBE_DIRS: [[f64; 3]; 14] = [
    [1.0, 0.0, 0.0],
    [-1.0, 0.0, 0.0],
    [0.0, 1.0, 0.0],
    [0.0, -1.0, 0.0],
    [0.0, 0.0, 1.0],
    [0.0, 0.0, -1.0],
    [1.0, 1.0, 0.0],
    [1.0, -1.0, 0.0],
    [-1.0, 1.0, 0.0],
    [-1.0, -1.0, 0.0],
    [1.0, 0.0, 1.0],
    [-1.0, 0.0, 1.0],
    [0.0, 1.0, 1.0],
    [0.0, -1.0, 1.0],
];

impl BsplineOptimizer {
    pub fn new(
        max_velocity: f64,
        max_acceleration: f64,
        safety_distance: f64,
        initial_knot_spacing: f64,
    ) -> Self {
        BsplineOptimizer {
            max_velocity,
            max_acceleration,
            safety_distance,
            initial_knot_spacing,
            iterations: 150,
            learning_rate: 0.02,
            control_points: Vec::new(),
            knot_span: initial_knot_spacing,
            dynamic_obstacles: Vec::new(),
        }
    }

    /// Reasonable starting knot spacing for the orchestrator's loop.
    pub fn init_knot_spacing(&self) -> f64 {
        self.initial_knot_spacing
    }

    /// Validates that consecutive input samples lie within the distance
    /// bound implied by the velocity limit (floored at one map cell so
    /// the shrink loop terminates on aggressive inputs). Near-duplicate
    /// samples are dropped into the adjusted path.
    pub fn check_input_spacing(
        &self,
        path: &[Vector3<f64>],
        knot_span: f64,
        map_resolution: f64,
    ) -> SpacingCheck {
        let mut adjusted: Vec<Vector3<f64>> = Vec::with_capacity(path.len());
        for p in path {
            if adjusted
                .last()
                .map(|q: &Vector3<f64>| (p - q).norm() < 1e-3)
                .unwrap_or(false)
            {
                continue;
            }
            adjusted.push(*p);
        }
        // A fully collapsed input (hover in place) still yields a valid
        // two-point path.
        if adjusted.len() == 1 {
            adjusted.push(adjusted[0]);
        }

        let bound = (self.max_velocity * knot_span).max(map_resolution) + 1e-9;
        let ok = adjusted.len() >= 2
            && adjusted.windows(2).all(|w| (w[1] - w[0]).norm() <= bound);
        SpacingCheck {
            ok,
            final_time: knot_span * adjusted.len().saturating_sub(1) as f64,
            adjusted_path: adjusted,
        }
    }

    /// Seeds control points from an input polyline sampled every
    /// `knot_span`, with boundary derivative rows in the least-squares
    /// fit so the ends of the spline carry the requested state.
    pub fn set_input(
        &mut self,
        path: &[Vector3<f64>],
        boundary: &BoundaryConditions,
        knot_span: f64,
    ) -> Result<(), NavError> {
        let k = path.len();
        if k < 2 {
            return Err(NavError::InvalidInput(
                "bspline input needs at least two samples".to_string(),
            ));
        }
        let n = k + 2;
        let dt = knot_span;

        // K point rows + 2 velocity rows + 2 acceleration rows.
        let mut a = DMatrix::<f64>::zeros(k + 4, n);
        let mut b = DMatrix::<f64>::zeros(k + 4, 3);
        for (i, p) in path.iter().enumerate() {
            a[(i, i)] = 1.0 / 6.0;
            a[(i, i + 1)] = 4.0 / 6.0;
            a[(i, i + 2)] = 1.0 / 6.0;
            b.row_mut(i).copy_from_slice(p.as_slice());
        }
        let vr = k;
        a[(vr, 0)] = -1.0 / (2.0 * dt);
        a[(vr, 2)] = 1.0 / (2.0 * dt);
        b.row_mut(vr).copy_from_slice(boundary.start_velocity.as_slice());
        a[(vr + 1, n - 3)] = -1.0 / (2.0 * dt);
        a[(vr + 1, n - 1)] = 1.0 / (2.0 * dt);
        b.row_mut(vr + 1)
            .copy_from_slice(boundary.end_velocity.as_slice());
        a[(vr + 2, 0)] = 1.0 / (dt * dt);
        a[(vr + 2, 1)] = -2.0 / (dt * dt);
        a[(vr + 2, 2)] = 1.0 / (dt * dt);
        b.row_mut(vr + 2)
            .copy_from_slice(boundary.start_acceleration.as_slice());
        a[(vr + 3, n - 3)] = 1.0 / (dt * dt);
        a[(vr + 3, n - 2)] = -2.0 / (dt * dt);
        a[(vr + 3, n - 1)] = 1.0 / (dt * dt);
        b.row_mut(vr + 3)
            .copy_from_slice(boundary.end_acceleration.as_slice());

        let svd = a.svd(true, true);
        let solution = svd
            .solve(&b, 1e-10)
            .map_err(|e| NavError::InvalidInput(e.to_string()))?;

        let mut points: Vec<Vector3<f64>> = (0..n)
            .map(|i| Vector3::new(solution[(i, 0)], solution[(i, 1)], solution[(i, 2)]))
            .collect();
        // Overwrite the boundary triples with the closed-form control
        // points implied by the boundary conditions, so the spline ends
        // carry the requested position/velocity/acceleration exactly.
        if n >= 6 {
            let start = boundary_triple(
                &path[0],
                &boundary.start_velocity,
                &boundary.start_acceleration,
                dt,
            );
            let end = boundary_triple(
                &path[k - 1],
                &boundary.end_velocity,
                &boundary.end_acceleration,
                dt,
            );
            points[..3].copy_from_slice(&start);
            points[n - 3..].copy_from_slice(&end);
        }
        self.control_points = points;
        self.knot_span = knot_span;
        Ok(())
    }

    /// Binds the moving-obstacle set for the next optimization.
    pub fn set_dynamic_obstacles(&mut self, obstacles: &[DynamicObstacle]) {
        self.dynamic_obstacles = obstacles.to_vec();
    }

    /// Refines the seeded control points and returns the resulting
    /// trajectory, or `FatalInfeasibility` when the result still collides.
    pub fn optimize(&mut self, map: &dyn MapQuery) -> Result<BsplineTrajectory, NavError> {
        let n = self.control_points.len();
        if n < DEGREE + 1 {
            return Err(NavError::InvalidInput(
                "bspline optimizer was not seeded".to_string(),
            ));
        }

        // Boundary control points are pinned: the first and last three
        // encode the boundary position/velocity/acceleration.
        let free = if n > 6 { 3..n - 3 } else { 0..0 };
        if !free.is_empty() {
            for iter in 0..self.iterations {
                let mut grad = self.gradient(map, free.clone());
                // Clip per-point gradients; the feasibility terms scale
                // with 1/dt and would otherwise destabilize the descent
                // at small knot spans.
                for g in &mut grad {
                    let norm = g.norm();
                    if norm > GRAD_CLIP {
                        *g *= GRAD_CLIP / norm;
                    }
                }
                let step = self.learning_rate / (1.0 + 0.02 * iter as f64);
                for (offset, i) in free.clone().enumerate() {
                    self.control_points[i] -= grad[offset] * step;
                }
            }
        }

        let spline =
            BsplineTrajectory::new(self.control_points.clone(), self.knot_span, DEGREE);
        if self.in_collision(map, &spline) {
            warn!("bspline optimizer: result still in collision, reporting infeasible");
            return Err(NavError::FatalInfeasibility);
        }
        debug!(
            "bspline optimizer: {} control points, span {:.3}s, duration {:.2}s",
            spline.control_points.len(),
            spline.knot_span,
            spline.duration()
        );
        Ok(spline)
    }

    /// Largest rho in (0, 1] keeping the time-scaled spline inside the
    /// velocity and acceleration limits.
    pub fn linear_factor(&self, spline: &BsplineTrajectory) -> f64 {
        let velocity = spline.derivative();
        let acceleration = velocity.derivative();
        let step = spline.knot_span() * 0.05;
        let mut max_v: f64 = 0.0;
        let mut max_a: f64 = 0.0;
        let mut t = 0.0;
        while t <= spline.duration() {
            max_v = max_v.max(velocity.position(t).norm());
            max_a = max_a.max(acceleration.position(t).norm());
            t += step;
        }
        let mut rho: f64 = 1.0;
        if max_v > self.max_velocity {
            rho = rho.min(self.max_velocity / max_v);
        }
        if max_a > self.max_acceleration {
            rho = rho.min((self.max_acceleration / max_a).sqrt());
        }
        rho.clamp(1e-3, 1.0)
    }

    fn gradient(
        &self,
        map: &dyn MapQuery,
        free: std::ops::Range<usize>,
    ) -> Vec<Vector3<f64>> {
        let n = self.control_points.len();
        let q = &self.control_points;
        let dt = self.knot_span;
        let mut grad = vec![Vector3::zeros(); free.len()];
        let base = free.start;

        // Smoothness: squared jerk of the control polygon.
        for i in 0..n.saturating_sub(3) {
            let jerk = q[i + 3] - q[i + 2] * 3.0 + q[i + 1] * 3.0 - q[i];
            for (offset, coeff) in [(0usize, -1.0), (1, 3.0), (2, -3.0), (3, 1.0)] {
                let idx = i + offset;
                if free.contains(&idx) {
                    grad[idx - base] += jerk * (2.0 * W_SMOOTH * coeff);
                }
            }
        }

        // Static clearance: push free control points out of the
        // safety_distance shell around occupied voxels.
        for i in free.clone() {
            if let Some((dist, away)) = self.nearest_obstacle_probe(map, &q[i]) {
                if dist < self.safety_distance {
                    grad[i - base] += away * (-2.0 * W_STATIC * (self.safety_distance - dist));
                }
            }
        }

        // Dynamic clearance: ellipsoidal penalty around each obstacle,
        // propagated along its velocity to the control point's knot time.
        for i in free.clone() {
            let t_i = ((i as f64 - 1.0) * dt).max(0.0);
            for ob in &self.dynamic_obstacles {
                let center = ob.position + ob.velocity * t_i;
                let radii = ob.extent * 0.5 + Vector3::repeat(self.safety_distance);
                let diff = q[i] - center;
                let scaled = Vector3::new(diff.x / radii.x, diff.y / radii.y, diff.z / radii.z);
                let d2 = scaled.norm_squared();
                if d2 < 1.0 {
                    let shell = 1.0 - d2;
                    let dd2 = Vector3::new(
                        2.0 * scaled.x / radii.x,
                        2.0 * scaled.y / radii.y,
                        2.0 * scaled.z / radii.z,
                    );
                    grad[i - base] += dd2 * (-2.0 * W_DYNAMIC * shell);
                }
            }
        }

        // Feasibility: per-axis penalties on the control-polygon velocity
        // and acceleration once they exceed the limits.
        for i in 0..n - 1 {
            let v = (q[i + 1] - q[i]) / dt;
            for axis in 0..3 {
                let excess = v[axis] * v[axis] - self.max_velocity * self.max_velocity;
                if excess > 0.0 {
                    let d = 4.0 * W_FEASIBLE * excess * v[axis] / dt;
                    if free.contains(&(i + 1)) {
                        grad[i + 1 - base][axis] += d;
                    }
                    if free.contains(&i) {
                        grad[i - base][axis] -= d;
                    }
                }
            }
        }
        for i in 1..n - 1 {
            let acc = (q[i + 1] - q[i] * 2.0 + q[i - 1]) / (dt * dt);
            for axis in 0..3 {
                let excess = acc[axis] * acc[axis]
                    - self.max_acceleration * self.max_acceleration;
                if excess > 0.0 {
                    let d = 4.0 * W_FEASIBLE * excess * acc[axis] / (dt * dt);
                    if free.contains(&(i + 1)) {
                        grad[i + 1 - base][axis] += d;
                    }
                    if free.contains(&i) {
                        grad[i - base][axis] -= 2.0 * d;
                    }
                    if free.contains(&(i - 1)) {
                        grad[i - 1 - base][axis] += d;
                    }
                }
            }
        }

        grad
    }

    /// Nearest occupied point around `p` found by a directional probe.
    /// Returns the clearance and the unit direction that increases it. A
    /// point sitting inside occupancy gets clearance zero and the probe
    /// direction with the shortest escape to free space.
    fn nearest_obstacle_probe(
        &self,
        map: &dyn MapQuery,
        p: &Vector3<f64>,
    ) -> Option<(f64, Vector3<f64>)> {
        if map.occupied(p) {
            let step = map.resolution() * 0.5;
            let mut escape: Option<(f64, Vector3<f64>)> = None;
            for dir in PROBE_DIRS {
                let d = Vector3::new(dir[0], dir[1], dir[2]).normalize();
                let mut s = step;
                while s <= self.safety_distance * 2.0 {
                    if !map.occupied(&(p + d * s)) {
                        if escape.map(|(es, _)| s < es).unwrap_or(true) {
                            escape = Some((s, d));
                        }
                        break;
                    }
                    s += step;
                }
            }
            return escape.map(|(_, d)| (0.0, d));
        }

        let mut nearest: Option<(f64, Vector3<f64>)> = None;
        for dir in PROBE_DIRS {
            let d = Vector3::new(dir[0], dir[1], dir[2]).normalize();
            if let Some(hit) = map.cast_ray(p, &d, self.safety_distance) {
                let dist = (hit - p).norm();
                if nearest.map(|(nd, _)| dist < nd).unwrap_or(true) {
                    let away = if dist > 1e-6 { (p - hit) / dist } else { -d };
                    nearest = Some((dist, away));
                }
            }
        }
        nearest
    }

    /// Final safety verdict for an optimized spline: inflated static
    /// occupancy plus the predicted dynamic-obstacle boxes.
    fn in_collision(&self, map: &dyn MapQuery, spline: &BsplineTrajectory) -> bool {
        let step = spline.knot_span() / 5.0;
        let mut t = 0.0;
        while t <= spline.duration() {
            let p = spline.position(t);
            if map.inflated_occupied(&p) {
                return true;
            }
            for ob in &self.dynamic_obstacles {
                let center = ob.position + ob.velocity * t;
                let radii = ob.extent * 0.5 + Vector3::repeat(self.safety_distance * 0.5);
                let diff = p - center;
                let scaled = Vector3::new(diff.x / radii.x, diff.y / radii.y, diff.z / radii.z);
                if scaled.norm_squared() < 1.0 {
                    return true;
                }
            }
            t += step;
        }
        false
    }
}
