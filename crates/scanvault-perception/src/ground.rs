//! RANSAC ground-plane segmentation.
//!
//! Repeatedly fits a plane through a random sample of points, counts the
//! points within `distance_threshold` of it, and keeps the plane with the
//! most inliers. The inliers of the winning plane are the ground; everything
//! else is non-ground.

use rand::rngs::StdRng;
use rand::seq::index;
use rand::SeedableRng;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::octree::Point3;

// ─────────────────────────────────────────────────────────────────────────────
// Plane
// ─────────────────────────────────────────────────────────────────────────────

/// Plane `a·x + b·y + c·z + d = 0` with unit normal `(a, b, c)`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Plane {
    pub a: f64,
    pub b: f64,
    pub c: f64,
    pub d: f64,
}

impl Plane {
    /// Best-fit plane through `points`.
    ///
    /// Exact for three points, least squares (smallest-variance direction of
    /// the covariance) for more. `None` when the points are collinear,
    /// coincident or fewer than three.
    pub fn fit(points: &[Point3]) -> Option<Plane> {
        if points.len() < 3 {
            return None;
        }
        let n = points.len() as f64;
        let centroid = points.iter().fold(Point3::default(), |acc, p| {
            Point3::new(acc.x + p.x / n, acc.y + p.y / n, acc.z + p.z / n)
        });

        let (mut xx, mut xy, mut xz, mut yy, mut yz, mut zz) = (0.0, 0.0, 0.0, 0.0, 0.0, 0.0);
        for p in points {
            let r = p.sub(centroid);
            xx += r.x * r.x;
            xy += r.x * r.y;
            xz += r.x * r.z;
            yy += r.y * r.y;
            yz += r.y * r.z;
            zz += r.z * r.z;
        }

        let det_x = yy * zz - yz * yz;
        let det_y = xx * zz - xz * xz;
        let det_z = xx * yy - xy * xy;
        let det_max = det_x.max(det_y).max(det_z);
        let trace = xx + yy + zz;
        if det_max.is_nan() || det_max <= 1e-12 * trace * trace {
            return None;
        }

        let normal = if det_max == det_x {
            Point3::new(det_x, xz * yz - xy * zz, xy * yz - xz * yy)
        } else if det_max == det_y {
            Point3::new(xz * yz - xy * zz, det_y, xy * xz - yz * xx)
        } else {
            Point3::new(xy * yz - xz * yy, xy * xz - yz * xx, det_z)
        };
        let len = normal.norm();
        if !(len.is_finite() && len > 0.0) {
            return None;
        }
        let (a, b, c) = (normal.x / len, normal.y / len, normal.z / len);
        let d = -(a * centroid.x + b * centroid.y + c * centroid.z);
        Some(Plane { a, b, c, d })
    }

    /// Perpendicular distance from `p` to the plane.
    pub fn distance(&self, p: Point3) -> f64 {
        (self.a * p.x + self.b * p.y + self.c * p.z + self.d).abs()
    }

    pub fn coefficients(&self) -> [f64; 4] {
        [self.a, self.b, self.c, self.d]
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// GroundSegmentor
// ─────────────────────────────────────────────────────────────────────────────

/// Configuration for RANSAC ground segmentation.
#[derive(Debug, Clone, PartialEq)]
pub struct GroundSegmentor {
    /// Maximum point-to-plane distance for an inlier.
    /// Default: 10.0 sensor units
    pub distance_threshold: f64,
    /// Points per random sample. Default: 3
    pub sample_size: usize,
    /// Number of random samples drawn. Default: 100
    pub iterations: usize,
    /// Fixed RNG seed; `None` seeds from the OS.
    pub seed: Option<u64>,
}

impl Default for GroundSegmentor {
    fn default() -> Self {
        Self {
            distance_threshold: 10.0,
            sample_size: 3,
            iterations: 100,
            seed: None,
        }
    }
}

/// Outcome of [`GroundSegmentor::segment`].
#[derive(Debug, Clone, PartialEq, Default)]
pub struct GroundSplit {
    pub ground: Vec<Point3>,
    pub non_ground: Vec<Point3>,
    /// Input indices of the ground points, ascending.
    pub inliers: Vec<usize>,
    /// Input indices of the non-ground points, ascending.
    pub outliers: Vec<usize>,
    pub plane: Option<Plane>,
}

impl GroundSegmentor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_distance_threshold(mut self, threshold: f64) -> Self {
        self.distance_threshold = threshold;
        self
    }

    pub fn with_sample_size(mut self, sample_size: usize) -> Self {
        self.sample_size = sample_size;
        self
    }

    pub fn with_iterations(mut self, iterations: usize) -> Self {
        self.iterations = iterations;
        self
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }

    /// Split `points` into ground and non-ground.
    ///
    /// With fewer than `sample_size` points every point is non-ground and no
    /// plane is reported.
    pub fn segment(&self, points: &[Point3]) -> GroundSplit {
        let n = points.len();
        if n < self.sample_size || self.sample_size == 0 {
            warn!(
                points = n,
                sample_size = self.sample_size,
                "too few points for ground segmentation; skipping"
            );
            return GroundSplit {
                non_ground: points.to_vec(),
                outliers: (0..n).collect(),
                ..GroundSplit::default()
            };
        }

        let mut rng = match self.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_os_rng(),
        };

        let mut best: Option<(Plane, usize)> = None;
        let mut sample = Vec::with_capacity(self.sample_size);
        for _ in 0..self.iterations {
            sample.clear();
            sample.extend(
                index::sample(&mut rng, n, self.sample_size)
                    .into_iter()
                    .map(|i| points[i]),
            );
            let Some(plane) = Plane::fit(&sample) else {
                continue;
            };
            let count = points
                .iter()
                .filter(|p| plane.distance(**p) <= self.distance_threshold)
                .count();
            if best.is_none_or(|(_, best_count)| count > best_count) {
                best = Some((plane, count));
            }
        }

        let Some((plane, _)) = best else {
            warn!(iterations = self.iterations, "no non-degenerate plane sample found");
            return GroundSplit {
                non_ground: points.to_vec(),
                outliers: (0..n).collect(),
                ..GroundSplit::default()
            };
        };

        let mut split = GroundSplit {
            plane: Some(plane),
            ..GroundSplit::default()
        };
        for (i, p) in points.iter().enumerate() {
            if plane.distance(*p) <= self.distance_threshold {
                split.ground.push(*p);
                split.inliers.push(i);
            } else {
                split.non_ground.push(*p);
                split.outliers.push(i);
            }
        }
        debug!(
            ground = split.ground.len(),
            non_ground = split.non_ground.len(),
            plane = ?plane.coefficients(),
            "ground plane segmented"
        );
        split
    }
}
