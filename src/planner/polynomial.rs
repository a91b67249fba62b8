// planner/polynomial.rs

// Minimum-snap piecewise polynomial trajectories between waypoints.
// Each segment is a degree-7 polynomial in normalized segment time; one
// joint linear system enforces waypoint interpolation, the boundary
// velocity/acceleration, jerk-free endpoints and continuity of the first
// six derivatives at interior waypoints.

use log::debug;
use nalgebra::{DMatrix, Vector3};

use crate::types::BoundaryConditions;
use crate::NavError;

const COEFFS: usize = 8;

/// Time-parameterized polynomial trajectory over `[0, duration]`.
#[derive(Clone, Debug)]
pub struct PolyTrajectory {
    /// Per-segment coefficients in normalized time, lowest order first.
    segments: Vec<[Vector3<f64>; COEFFS]>,
    /// Per-segment durations in seconds.
    times: Vec<f64>,
}

impl PolyTrajectory {
    /// Total duration in seconds.
    pub fn duration(&self) -> f64 {
        self.times.iter().sum()
    }

    fn locate(&self, t: f64) -> (usize, f64) {
        let t = t.clamp(0.0, self.duration());
        let mut acc = 0.0;
        for (i, &seg_t) in self.times.iter().enumerate() {
            if t <= acc + seg_t || i == self.times.len() - 1 {
                return (i, ((t - acc) / seg_t).clamp(0.0, 1.0));
            }
            acc += seg_t;
        }
        (self.times.len() - 1, 1.0)
    }

    /// Position at time `t`, clamped to the trajectory domain.
    pub fn position(&self, t: f64) -> Vector3<f64> {
        let (seg, s) = self.locate(t);
        eval_poly(&self.segments[seg], s, 0)
    }

    /// Velocity at time `t`.
    pub fn velocity(&self, t: f64) -> Vector3<f64> {
        let (seg, s) = self.locate(t);
        eval_poly(&self.segments[seg], s, 1) / self.times[seg]
    }

    /// Acceleration at time `t`.
    pub fn acceleration(&self, t: f64) -> Vector3<f64> {
        let (seg, s) = self.locate(t);
        eval_poly(&self.segments[seg], s, 2) / self.times[seg].powi(2)
    }

    /// Positions sampled every `dt` seconds, always including `duration`.
    pub fn sample(&self, dt: f64) -> Vec<Vector3<f64>> {
        let duration = self.duration();
        let mut out = Vec::new();
        let mut t = 0.0;
        while t < duration {
            out.push(self.position(t));
            t += dt;
        }
        out.push(self.position(duration));
        out
    }
}

/// Evaluates the `k`-th derivative (in normalized time) of one segment.
fn eval_poly(coeffs: &[Vector3<f64>; COEFFS], s: f64, k: usize) -> Vector3<f64> {
    let mut out = Vector3::zeros();
    for (j, c) in coeffs.iter().enumerate().skip(k) {
        out += c * falling_factorial(j, k) * s.powi((j - k) as i32);
    }
    out
}

/// j * (j-1) * ... * (j-k+1); 1.0 when k = 0.
fn falling_factorial(j: usize, k: usize) -> f64 {
    (0..k).fold(1.0, |acc, i| acc * (j - i) as f64)
}

/// Writes the constraint row for the `k`-th world-time derivative of
/// segment `seg` at normalized time `s` into the joint system.
fn fill_row(a: &mut DMatrix<f64>, row: usize, seg: usize, s: f64, k: usize, scale: f64) {
    for j in k..COEFFS {
        a[(row, seg * COEFFS + j)] = falling_factorial(j, k) * s.powi((j - k) as i32) * scale;
    }
}

/// Minimum-snap planner with trapezoidal segment-time allocation.
pub struct MinSnapPlanner {
    desired_velocity: f64,
    desired_acceleration: f64,
}

impl MinSnapPlanner {
    pub fn new(desired_velocity: f64, desired_acceleration: f64) -> Self {
        MinSnapPlanner {
            desired_velocity,
            desired_acceleration,
        }
    }

    /// Trapezoidal-profile time for one straight segment.
    fn segment_time(&self, dist: f64) -> f64 {
        let v = self.desired_velocity;
        let a = self.desired_acceleration;
        let t = if dist < v * v / a {
            2.0 * (dist / a).sqrt()
        } else {
            dist / v + v / a
        };
        t.max(0.05)
    }

    /// Plans a trajectory through `waypoints` honoring the boundary
    /// velocity and acceleration.
    pub fn plan(
        &self,
        waypoints: &[Vector3<f64>],
        boundary: &BoundaryConditions,
    ) -> Result<PolyTrajectory, NavError> {
        if waypoints.len() < 2 {
            return Err(NavError::InvalidInput(
                "polynomial planner needs at least two waypoints".to_string(),
            ));
        }
        let m = waypoints.len() - 1;
        let times: Vec<f64> = (0..m)
            .map(|i| self.segment_time((waypoints[i + 1] - waypoints[i]).norm()))
            .collect();

        let n = COEFFS * m;
        let mut a = DMatrix::<f64>::zeros(n, n);
        let mut b = DMatrix::<f64>::zeros(n, 3);
        let mut row = 0;

        // Waypoint interpolation at both ends of every segment.
        for i in 0..m {
            fill_row(&mut a, row, i, 0.0, 0, 1.0);
            b.row_mut(row).copy_from_slice(waypoints[i].as_slice());
            row += 1;
            fill_row(&mut a, row, i, 1.0, 0, 1.0);
            b.row_mut(row).copy_from_slice(waypoints[i + 1].as_slice());
            row += 1;
        }

        // Boundary velocity / acceleration, plus jerk-free endpoints.
        fill_row(&mut a, row, 0, 0.0, 1, 1.0 / times[0]);
        b.row_mut(row)
            .copy_from_slice(boundary.start_velocity.as_slice());
        row += 1;
        fill_row(&mut a, row, 0, 0.0, 2, 1.0 / times[0].powi(2));
        b.row_mut(row)
            .copy_from_slice(boundary.start_acceleration.as_slice());
        row += 1;
        fill_row(&mut a, row, m - 1, 1.0, 1, 1.0 / times[m - 1]);
        b.row_mut(row)
            .copy_from_slice(boundary.end_velocity.as_slice());
        row += 1;
        fill_row(&mut a, row, m - 1, 1.0, 2, 1.0 / times[m - 1].powi(2));
        b.row_mut(row)
            .copy_from_slice(boundary.end_acceleration.as_slice());
        row += 1;
        fill_row(&mut a, row, 0, 0.0, 3, 1.0 / times[0].powi(3));
        row += 1;
        fill_row(&mut a, row, m - 1, 1.0, 3, 1.0 / times[m - 1].powi(3));
        row += 1;

        // Continuity of derivatives 1..=6 at interior waypoints.
        for i in 0..m - 1 {
            for k in 1..=6 {
                fill_row(&mut a, row, i, 1.0, k, 1.0 / times[i].powi(k as i32));
                fill_row(&mut a, row, i + 1, 0.0, k, -1.0 / times[i + 1].powi(k as i32));
                row += 1;
            }
        }
        debug_assert_eq!(row, n);

        let solution = a
            .lu()
            .solve(&b)
            .ok_or_else(|| NavError::InvalidInput("degenerate waypoint layout".to_string()))?;

        let segments = (0..m)
            .map(|i| {
                let mut coeffs = [Vector3::zeros(); COEFFS];
                for (j, c) in coeffs.iter_mut().enumerate() {
                    let r = i * COEFFS + j;
                    *c = Vector3::new(solution[(r, 0)], solution[(r, 1)], solution[(r, 2)]);
                }
                coeffs
            })
            .collect();

        debug!(
            "min-snap plan: {} segments, total {:.2}s",
            m,
            times.iter().sum::<f64>()
        );
        Ok(PolyTrajectory { segments, times })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn planner() -> MinSnapPlanner {
        MinSnapPlanner::new(1.0, 1.0)
    }

    #[test]
    fn single_segment_hits_endpoints_and_boundary() {
        let wp = [Vector3::new(0.0, 0.0, 1.0), Vector3::new(5.0, 0.0, 1.0)];
        let boundary = BoundaryConditions::at_rest();
        let traj = planner().plan(&wp, &boundary).unwrap();

        assert!((traj.position(0.0) - wp[0]).norm() < 1e-6);
        assert!((traj.position(traj.duration()) - wp[1]).norm() < 1e-6);
        assert!(traj.velocity(0.0).norm() < 1e-6);
        assert!(traj.velocity(traj.duration()).norm() < 1e-6);
        assert!(traj.acceleration(0.0).norm() < 1e-6);
        assert!(traj.acceleration(traj.duration()).norm() < 1e-6);
        // Trapezoidal allocation: 5 m at 1 m/s cruise -> ~6 s.
        assert!(traj.duration() > 4.0 && traj.duration() < 8.0);
    }

    #[test]
    fn nonzero_start_velocity_is_honored() {
        let wp = [Vector3::new(0.0, 0.0, 1.0), Vector3::new(3.0, 0.0, 1.0)];
        let boundary = BoundaryConditions::to_rest(
            Vector3::new(0.8, 0.0, 0.0),
            Vector3::new(0.1, 0.0, 0.0),
        );
        let traj = planner().plan(&wp, &boundary).unwrap();
        assert!((traj.velocity(0.0) - boundary.start_velocity).norm() < 1e-6);
        assert!((traj.acceleration(0.0) - boundary.start_acceleration).norm() < 1e-6);
        assert!(traj.velocity(traj.duration()).norm() < 1e-6);
    }

    #[test]
    fn multi_segment_is_continuous_at_joints() {
        let wp = [
            Vector3::new(0.0, 0.0, 1.0),
            Vector3::new(2.0, 1.0, 1.0),
            Vector3::new(4.0, 0.0, 1.5),
            Vector3::new(6.0, 0.0, 1.0),
        ];
        let traj = planner().plan(&wp, &BoundaryConditions::at_rest()).unwrap();

        // Interpolates every waypoint.
        let mut acc = 0.0;
        for (i, p) in wp.iter().enumerate() {
            assert!((traj.position(acc) - p).norm() < 1e-5, "waypoint {i}");
            if i < traj.times.len() {
                acc += traj.times[i];
            }
        }
        // Velocity and acceleration are continuous across each joint.
        let mut t = 0.0;
        for seg_t in &traj.times[..traj.times.len() - 1] {
            t += seg_t;
            let dv = traj.velocity(t - 1e-6) - traj.velocity(t + 1e-6);
            let da = traj.acceleration(t - 1e-6) - traj.acceleration(t + 1e-6);
            assert!(dv.norm() < 1e-3);
            assert!(da.norm() < 1e-2);
        }
    }

    #[test]
    fn sampling_includes_both_ends() {
        let wp = [Vector3::zeros(), Vector3::new(1.0, 0.0, 0.0)];
        let traj = planner().plan(&wp, &BoundaryConditions::at_rest()).unwrap();
        let samples = traj.sample(0.1);
        assert!((samples[0] - wp[0]).norm() < 1e-6);
        assert!((samples.last().unwrap() - wp[1]).norm() < 1e-6);
        assert!(samples.len() >= 2);
    }

    #[test]
    fn rejects_single_waypoint() {
        assert!(planner()
            .plan(&[Vector3::zeros()], &BoundaryConditions::at_rest())
            .is_err());
    }
}
