// planner/divider.rs

// Partitions a sampled trajectory into time intervals over which the
// identity of the nearest static obstacle is stable. Feeds retiming
// constraints and telemetry; failures here never abort a plan.

use log::debug;
use nalgebra::Vector3;

use crate::map::MapQuery;

/// Probe range for the nearest-obstacle query, meters.
const PROBE_RANGE: f64 = 5.0;
/// Horizontal probe directions per sample.
const AZIMUTH_PROBES: usize = 16;

/// Result of one divider run.
#[derive(Clone, Debug, Default)]
pub struct DividerResult {
    /// Time intervals with a stable nearest obstacle.
    pub intervals: Vec<(f64, f64)>,
    /// Minimum obstacle distance within each interval.
    pub distances: Vec<f64>,
    /// Nearest obstacle point per input sample (cell-snapped).
    pub nearest: Vec<Vector3<f64>>,
    /// Per-sample validity: false when no obstacle was in probe range.
    pub mask: Vec<bool>,
}

/// Nearest-static-obstacle trajectory partitioner.
pub struct TrajectoryDivider;

impl TrajectoryDivider {
    pub fn new() -> Self {
        TrajectoryDivider
    }

    /// Analyzes `samples` of `(time, position)` pairs. An empty input, or
    /// one with no obstacle in range anywhere, yields an empty partition.
    pub fn analyze(&self, map: &dyn MapQuery, samples: &[(f64, Vector3<f64>)]) -> DividerResult {
        let mut result = DividerResult::default();
        if samples.is_empty() {
            return result;
        }

        let snap = |p: &Vector3<f64>| -> Vector3<f64> {
            let res = map.resolution();
            let min = map.bounds().min;
            Vector3::new(
                min.x + (((p.x - min.x) / res).floor() + 0.5) * res,
                min.y + (((p.y - min.y) / res).floor() + 0.5) * res,
                min.z + (((p.z - min.z) / res).floor() + 0.5) * res,
            )
        };

        // Per-sample nearest obstacle via a directional probe.
        let mut hits: Vec<Option<(Vector3<f64>, f64)>> = Vec::with_capacity(samples.len());
        for (_, p) in samples {
            let mut best: Option<(Vector3<f64>, f64)> = None;
            for i in 0..AZIMUTH_PROBES {
                let az = i as f64 / AZIMUTH_PROBES as f64 * std::f64::consts::TAU;
                let dir = Vector3::new(az.cos(), az.sin(), 0.0);
                if let Some(hit) = map.cast_ray(p, &dir, PROBE_RANGE) {
                    let d = (hit - p).norm();
                    if best.map(|(_, bd)| d < bd).unwrap_or(true) {
                        best = Some((snap(&hit), d));
                    }
                }
            }
            for dir in [Vector3::new(0.0, 0.0, 1.0), Vector3::new(0.0, 0.0, -1.0)] {
                if let Some(hit) = map.cast_ray(p, &dir, PROBE_RANGE) {
                    let d = (hit - p).norm();
                    if best.map(|(_, bd)| d < bd).unwrap_or(true) {
                        best = Some((snap(&hit), d));
                    }
                }
            }
            result.mask.push(best.is_some());
            result
                .nearest
                .push(best.map(|(h, _)| h).unwrap_or_else(Vector3::zeros));
            hits.push(best);
        }

        // Group consecutive samples whose nearest cell stays put.
        let stability = map.resolution() * 2.0;
        let mut open: Option<(f64, Vector3<f64>, f64)> = None; // (t_start, cell, min_dist)
        for (i, hit) in hits.iter().enumerate() {
            let t = samples[i].0;
            match hit {
                Some((cell, d)) => {
                    let same_cell = open
                        .as_ref()
                        .map(|(_, oc, _)| (cell - oc).norm() <= stability)
                        .unwrap_or(false);
                    if same_cell {
                        if let Some((_, _, min_d)) = open.as_mut() {
                            *min_d = min_d.min(*d);
                        }
                    } else {
                        if let Some((t0, _, dist)) = open.take() {
                            result.intervals.push((t0, t));
                            result.distances.push(dist);
                        }
                        open = Some((t, *cell, *d));
                    }
                }
                None => {
                    if let Some((t0, _, dist)) = open.take() {
                        result.intervals.push((t0, t));
                        result.distances.push(dist);
                    }
                }
            }
        }
        if let Some((t0, _, dist)) = open {
            result.intervals.push((t0, samples.last().unwrap().0));
            result.distances.push(dist);
        }

        debug!(
            "trajectory divider: {} samples -> {} intervals",
            samples.len(),
            result.intervals.len()
        );
        result
    }
}

impl Default for TrajectoryDivider {
    fn default() -> Self {
        Self::new()
    }
}
