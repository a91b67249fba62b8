// map.rs

// Read-only query surface over the voxel occupancy map, plus a dense
// in-memory implementation used by the tests and the demo. The planners
// only ever see the `MapQuery` trait: the map itself is owned by the host
// application and handed to the core as a shared read handle.

use nalgebra::Vector3;

/// Occupancy classification of a single query point.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CellStatus {
    Free,
    Occupied,
    /// Free itself, but within the inflation radius of an occupied cell.
    InflatedOccupied,
    /// Outside the mapped region or never observed.
    Unknown,
}

/// Axis-aligned box in world coordinates.
#[derive(Clone, Copy, Debug)]
pub struct Aabb {
    pub min: Vector3<f64>,
    pub max: Vector3<f64>,
}

impl Aabb {
    pub fn new(min: Vector3<f64>, max: Vector3<f64>) -> Self {
        Aabb { min, max }
    }

    pub fn contains(&self, p: &Vector3<f64>) -> bool {
        (0..3).all(|i| p[i] >= self.min[i] && p[i] <= self.max[i])
    }
}

/// Read-only queries into the occupancy map.
///
/// `update_free_region` is the one mutating entry point; it marks a box as
/// free so the vehicle body and tracked movers do not contaminate the
/// static map. Implementations must make it safe to call concurrently
/// with the read queries.
pub trait MapQuery: Send + Sync {
    /// Occupancy of the cell containing `p`.
    fn status(&self, p: &Vector3<f64>) -> CellStatus;

    /// Voxel edge length in meters.
    fn resolution(&self) -> f64;

    /// Metric bounds of the mapped region.
    fn bounds(&self) -> Aabb;

    /// First occupied point along `dir` from `origin`, within `max_range`
    /// meters, or `None` when the ray escapes the map or stays free.
    fn cast_ray(
        &self,
        origin: &Vector3<f64>,
        dir: &Vector3<f64>,
        max_range: f64,
    ) -> Option<Vector3<f64>>;

    /// Marks every cell inside the box as free.
    fn update_free_region(&self, region: &Aabb);

    /// True when `p` falls on an occupied cell.
    fn occupied(&self, p: &Vector3<f64>) -> bool {
        self.status(p) == CellStatus::Occupied
    }

    /// True when `p` is occupied or within the inflation radius of an
    /// occupied cell.
    fn inflated_occupied(&self, p: &Vector3<f64>) -> bool {
        matches!(
            self.status(p),
            CellStatus::Occupied | CellStatus::InflatedOccupied
        )
    }
}

/// Dense voxel occupancy map.
///
/// Stores one occupancy bit per voxel over a fixed axis-aligned region.
/// Inflation is evaluated at query time over the voxel neighborhood so
/// `update_free_region` never has to re-run an inflation pass.
pub struct VoxelMap {
    origin: Vector3<f64>,
    resolution: f64,
    size: [usize; 3],
    inflation_radius: f64,
    occupancy: std::sync::RwLock<Vec<bool>>,
}

impl VoxelMap {
    /// Creates an empty map covering `bounds` at the given resolution.
    pub fn new(bounds: Aabb, resolution: f64, inflation_radius: f64) -> Self {
        assert!(resolution > 0.0, "resolution must be positive");
        let size = [
            (((bounds.max.x - bounds.min.x) / resolution).ceil() as usize).max(1),
            (((bounds.max.y - bounds.min.y) / resolution).ceil() as usize).max(1),
            (((bounds.max.z - bounds.min.z) / resolution).ceil() as usize).max(1),
        ];
        let cells = size[0] * size[1] * size[2];
        VoxelMap {
            origin: bounds.min,
            resolution,
            size,
            inflation_radius,
            occupancy: std::sync::RwLock::new(vec![false; cells]),
        }
    }

    fn index(&self, cell: [i64; 3]) -> Option<usize> {
        for i in 0..3 {
            if cell[i] < 0 || cell[i] >= self.size[i] as i64 {
                return None;
            }
        }
        Some(
            (cell[2] as usize * self.size[1] + cell[1] as usize) * self.size[0]
                + cell[0] as usize,
        )
    }

    fn cell_of(&self, p: &Vector3<f64>) -> [i64; 3] {
        [
            ((p.x - self.origin.x) / self.resolution).floor() as i64,
            ((p.y - self.origin.y) / self.resolution).floor() as i64,
            ((p.z - self.origin.z) / self.resolution).floor() as i64,
        ]
    }

    /// Marks every voxel intersecting the box as occupied.
    pub fn set_occupied_box(&self, region: &Aabb) {
        let lo = self.cell_of(&region.min);
        let hi = self.cell_of(&region.max);
        let mut grid = self.occupancy.write().unwrap();
        for z in lo[2]..=hi[2] {
            for y in lo[1]..=hi[1] {
                for x in lo[0]..=hi[0] {
                    if let Some(i) = self.index([x, y, z]) {
                        grid[i] = true;
                    }
                }
            }
        }
    }

    /// Marks a vertical pillar (full map height) as occupied. Convenience
    /// for tests and the demo world.
    pub fn set_pillar(&self, center_xy: (f64, f64), radius: f64) {
        let mut grid = self.occupancy.write().unwrap();
        for z in 0..self.size[2] {
            for y in 0..self.size[1] {
                for x in 0..self.size[0] {
                    let cx = self.origin.x + (x as f64 + 0.5) * self.resolution;
                    let cy = self.origin.y + (y as f64 + 0.5) * self.resolution;
                    let d = ((cx - center_xy.0).powi(2) + (cy - center_xy.1).powi(2)).sqrt();
                    if d <= radius {
                        let i = (z * self.size[1] + y) * self.size[0] + x;
                        grid[i] = true;
                    }
                }
            }
        }
    }

    fn map_bounds(&self) -> Aabb {
        Aabb::new(
            self.origin,
            Vector3::new(
                self.origin.x + self.size[0] as f64 * self.resolution,
                self.origin.y + self.size[1] as f64 * self.resolution,
                self.origin.z + self.size[2] as f64 * self.resolution,
            ),
        )
    }

    fn occupied_cell(&self, grid: &[bool], cell: [i64; 3]) -> bool {
        self.index(cell).map(|i| grid[i]).unwrap_or(false)
    }
}

impl MapQuery for VoxelMap {
    fn status(&self, p: &Vector3<f64>) -> CellStatus {
        let cell = self.cell_of(p);
        if self.index(cell).is_none() {
            return CellStatus::Unknown;
        }
        let grid = self.occupancy.read().unwrap();
        if self.occupied_cell(&grid, cell) {
            return CellStatus::Occupied;
        }
        // Neighborhood scan within the inflation radius.
        let r = (self.inflation_radius / self.resolution).ceil() as i64;
        for dz in -r..=r {
            for dy in -r..=r {
                for dx in -r..=r {
                    if dx == 0 && dy == 0 && dz == 0 {
                        continue;
                    }
                    let dist = ((dx * dx + dy * dy + dz * dz) as f64).sqrt() * self.resolution;
                    if dist > self.inflation_radius {
                        continue;
                    }
                    if self.occupied_cell(&grid, [cell[0] + dx, cell[1] + dy, cell[2] + dz]) {
                        return CellStatus::InflatedOccupied;
                    }
                }
            }
        }
        CellStatus::Free
    }

    fn resolution(&self) -> f64 {
        self.resolution
    }

    fn bounds(&self) -> Aabb {
        self.map_bounds()
    }

    fn cast_ray(
        &self,
        origin: &Vector3<f64>,
        dir: &Vector3<f64>,
        max_range: f64,
    ) -> Option<Vector3<f64>> {
        let n = dir.norm();
        if n < 1e-12 || max_range <= 0.0 {
            return None;
        }
        let step_dir = dir / n;
        let step = self.resolution * 0.5;
        let grid = self.occupancy.read().unwrap();
        let mut s = 0.0;
        while s <= max_range {
            let p = origin + step_dir * s;
            let cell = self.cell_of(&p);
            if self.index(cell).is_none() {
                return None;
            }
            if self.occupied_cell(&grid, cell) {
                return Some(p);
            }
            s += step;
        }
        None
    }

    fn update_free_region(&self, region: &Aabb) {
        let lo = self.cell_of(&region.min);
        let hi = self.cell_of(&region.max);
        let mut grid = self.occupancy.write().unwrap();
        for z in lo[2]..=hi[2] {
            for y in lo[1]..=hi[1] {
                for x in lo[0]..=hi[0] {
                    if let Some(i) = self.index([x, y, z]) {
                        grid[i] = false;
                    }
                }
            }
        }
    }
}
