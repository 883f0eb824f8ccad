//! Statistical outlier removal.
//!
//! For each point, the mean distance to its `k` nearest neighbours is
//! computed (the point itself excluded). A point is dropped when that mean
//! exceeds `μ + std_ratio · σ`, where `μ` and `σ` are the mean and population
//! standard deviation of the per-point means over the whole cloud.
//!
//! Neighbours come from an [`Octree`] radius query whose radius doubles until
//! at least `k` other points fall inside it.

use tracing::{debug, warn};

use crate::octree::{Aabb, Octree, Point3};

const INDEX_CAPACITY: usize = 16;

/// Points surviving the filter plus their indices in the input.
#[derive(Debug, Clone, PartialEq)]
pub struct Filtered {
    pub points: Vec<Point3>,
    /// Surviving original indices, ascending.
    pub indices: Vec<usize>,
}

/// Remove statistically anomalous points.
///
/// Returns the input unchanged (with every index) when `k == 0` or the cloud
/// has `k` points or fewer.
pub fn remove_outliers(points: &[Point3], k: usize, std_ratio: f64) -> Filtered {
    let n = points.len();
    if k == 0 || n < k + 1 {
        warn!(points = n, k, "too few points for outlier filtering; skipping");
        return Filtered {
            points: points.to_vec(),
            indices: (0..n).collect(),
        };
    }

    let tree = Octree::build(points, INDEX_CAPACITY);
    let diagonal = Aabb::enclosing(points).map_or(0.0, |b| b.extent().norm());
    // Roughly the spacing that puts k neighbours inside the first query.
    let start_radius = diagonal * k as f64 / n as f64;
    let mean_knn: Vec<f64> = (0..n)
        .map(|i| mean_knn_distance(&tree, points, i, k, start_radius, diagonal))
        .collect();
    let mu = mean_knn.iter().sum::<f64>() / n as f64;
    let variance = mean_knn.iter().map(|m| (m - mu).powi(2)).sum::<f64>() / n as f64;
    let threshold = mu + std_ratio * variance.sqrt();

    let indices: Vec<usize> = (0..n).filter(|&i| mean_knn[i] <= threshold).collect();
    debug!(
        before = n,
        after = indices.len(),
        threshold,
        "outlier filter applied"
    );
    Filtered {
        points: indices.iter().map(|&i| points[i]).collect(),
        indices,
    }
}

fn mean_knn_distance(
    tree: &Octree,
    points: &[Point3],
    i: usize,
    k: usize,
    start_radius: f64,
    diagonal: f64,
) -> f64 {
    let origin = points[i];
    let mut radius = start_radius;
    loop {
        let dists: Vec<f64> = tree
            .radius_query(origin, radius)
            .into_iter()
            .filter(|&j| j != i)
            .map(|j| points[j].distance(origin))
            .collect();
        // The k nearest all lie within any radius that already holds k points.
        if dists.len() >= k {
            return mean_of_smallest(dists, k);
        }
        if radius >= diagonal || radius.is_nan() {
            break;
        }
        radius = if radius > 0.0 { radius * 2.0 } else { diagonal }.min(diagonal);
    }

    // Only reached for points the index could not place (non-finite input).
    let dists: Vec<f64> = points
        .iter()
        .enumerate()
        .filter(|(j, _)| *j != i)
        .map(|(_, p)| p.distance(origin))
        .collect();
    mean_of_smallest(dists, k)
}

fn mean_of_smallest(mut dists: Vec<f64>, k: usize) -> f64 {
    dists.select_nth_unstable_by(k - 1, f64::total_cmp);
    dists[..k].iter().sum::<f64>() / k as f64
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ring_with_stray() -> Vec<Point3> {
        let mut pts: Vec<Point3> = (0..36)
            .map(|i| {
                let t = (i as f64 * 10.0).to_radians();
                Point3::new(100.0 * t.cos(), 100.0 * t.sin(), 0.0)
            })
            .collect();
        pts.push(Point3::new(1000.0, 1000.0, 0.0));
        pts
    }

    #[test]
    fn identity_when_not_more_points_than_k() {
        let pts = vec![Point3::new(0.0, 0.0, 0.0), Point3::new(500.0, 0.0, 0.0)];
        let out = remove_outliers(&pts, 2, 2.0);
        assert_eq!(out.points, pts);
        assert_eq!(out.indices, vec![0, 1]);
    }

    #[test]
    fn identity_when_k_is_zero() {
        let pts = ring_with_stray();
        let out = remove_outliers(&pts, 0, 2.0);
        assert_eq!(out.indices.len(), pts.len());
    }

    #[test]
    fn stray_point_is_removed() {
        let pts = ring_with_stray();
        let out = remove_outliers(&pts, 5, 2.0);
        assert_eq!(out.indices.len(), 36);
        assert!(!out.indices.contains(&36));
        assert_eq!(out.points.len(), out.indices.len());
    }

    #[test]
    fn indexed_means_match_exhaustive_search() {
        use rand::{Rng, SeedableRng, rngs::StdRng};

        let mut rng = StdRng::seed_from_u64(7);
        let mut pts: Vec<Point3> = (0..300)
            .map(|_| {
                Point3::new(
                    rng.random_range(-200.0..200.0),
                    rng.random_range(-200.0..200.0),
                    rng.random_range(-5.0..5.0),
                )
            })
            .collect();
        pts.push(pts[0]);
        pts.push(Point3::new(4000.0, -4000.0, 0.0));

        let k = 8;
        let tree = Octree::build(&pts, INDEX_CAPACITY);
        let diagonal = Aabb::enclosing(&pts).unwrap().extent().norm();
        let start = diagonal * k as f64 / pts.len() as f64;
        for i in 0..pts.len() {
            let exhaustive: Vec<f64> = pts
                .iter()
                .enumerate()
                .filter(|(j, _)| *j != i)
                .map(|(_, p)| p.distance(pts[i]))
                .collect();
            let expected = mean_of_smallest(exhaustive, k);
            let got = mean_knn_distance(&tree, &pts, i, k, start, diagonal);
            assert!((got - expected).abs() < 1e-9, "point {i}: {got} vs {expected}");
        }

        let out = remove_outliers(&pts, k, 2.0);
        assert!(!out.indices.contains(&(pts.len() - 1)));
    }

    #[test]
    fn coincident_points_are_neighbours_at_zero() {
        let pts = vec![Point3::new(3.0, 3.0, 3.0); 5];
        let out = remove_outliers(&pts, 2, 1.0);
        assert_eq!(out.indices, vec![0, 1, 2, 3, 4]);
    }

    #[test]
    fn line_endpoints_are_the_sparse_ones() {
        // Interior points average 4/3 to their 3 neighbours, endpoints 2.
        let pts: Vec<Point3> = (0..30).map(|i| Point3::new(i as f64, 0.0, 0.0)).collect();
        let out = remove_outliers(&pts, 3, 2.0);
        assert_eq!(out.indices, (1..29).collect::<Vec<_>>());
    }
}
