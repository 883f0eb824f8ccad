//! Density-based clustering (DBSCAN).
//!
//! A point is a *core* point when at least `min_points` other points lie
//! within `eps` of it. Clusters are maximal sets of eps-connected core points
//! plus the border points directly reachable from them; everything else is
//! noise (label [`NOISE`]). Points are visited in input order, so cluster ids
//! are deterministic for a given input.

use std::collections::VecDeque;

use tracing::{debug, warn};

use crate::octree::{Octree, Point3};

/// Label given to points that belong to no cluster.
pub const NOISE: i32 = -1;

const INDEX_CAPACITY: usize = 16;

/// Result of [`dbscan`].
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Clustering {
    /// Per-point cluster id (`0..clusters.len()`) or [`NOISE`].
    pub labels: Vec<i32>,
    /// Member indices per cluster, ascending.
    pub clusters: Vec<Vec<usize>>,
}

impl Clustering {
    pub fn noise_count(&self) -> usize {
        self.labels.iter().filter(|l| **l == NOISE).count()
    }
}

/// Cluster `points` with DBSCAN.
///
/// Fewer than `min_points` points, or an `eps` that is negative or not
/// finite, yields no clusters (all noise).
pub fn dbscan(points: &[Point3], eps: f64, min_points: usize) -> Clustering {
    let n = points.len();
    if !eps.is_finite() || eps < 0.0 {
        warn!(eps, "invalid clustering radius; every point is noise");
        return Clustering {
            labels: vec![NOISE; n],
            clusters: Vec::new(),
        };
    }
    if n < min_points {
        warn!(points = n, min_points, "too few points for clustering; skipping");
        return Clustering {
            labels: vec![NOISE; n],
            clusters: Vec::new(),
        };
    }

    let tree = Octree::build(points, INDEX_CAPACITY);
    let neighbours = |i: usize| -> Vec<usize> {
        let mut hits = tree.radius_query(points[i], eps);
        hits.retain(|&j| j != i);
        hits
    };

    let mut labels: Vec<Option<i32>> = vec![None; n];
    let mut next_id = 0i32;
    let mut queue = VecDeque::new();

    for i in 0..n {
        if labels[i].is_some() {
            continue;
        }
        let seeds = neighbours(i);
        if seeds.len() < min_points {
            labels[i] = Some(NOISE);
            continue;
        }

        let id = next_id;
        next_id += 1;
        labels[i] = Some(id);
        queue.clear();
        queue.extend(seeds);

        while let Some(j) = queue.pop_front() {
            match labels[j] {
                Some(NOISE) => labels[j] = Some(id),
                Some(_) => continue,
                None => {
                    labels[j] = Some(id);
                    let reach = neighbours(j);
                    if reach.len() >= min_points {
                        queue.extend(reach.into_iter().filter(|&k| {
                            labels[k].is_none() || labels[k] == Some(NOISE)
                        }));
                    }
                }
            }
        }
    }

    let labels: Vec<i32> = labels.into_iter().map(|l| l.unwrap_or(NOISE)).collect();
    let mut clusters = vec![Vec::new(); next_id as usize];
    for (i, &label) in labels.iter().enumerate() {
        if label != NOISE {
            clusters[label as usize].push(i);
        }
    }
    debug!(
        points = n,
        clusters = clusters.len(),
        noise = labels.iter().filter(|l| **l == NOISE).count(),
        "dbscan complete"
    );
    Clustering { labels, clusters }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn blob(cx: f64, cy: f64, count: usize) -> Vec<Point3> {
        (0..count)
            .map(|i| Point3::new(cx + (i % 4) as f64 * 2.0, cy + (i / 4) as f64 * 2.0, 0.0))
            .collect()
    }

    #[test]
    fn two_separated_blobs_and_one_noise_point() {
        let mut pts = blob(0.0, 0.0, 12);
        pts.extend(blob(200.0, 0.0, 12));
        pts.push(Point3::new(100.0, 100.0, 0.0));

        let result = dbscan(&pts, 5.0, 3);
        assert_eq!(result.clusters.len(), 2);
        assert_eq!(result.clusters[0], (0..12).collect::<Vec<_>>());
        assert_eq!(result.clusters[1], (12..24).collect::<Vec<_>>());
        assert_eq!(result.labels[24], NOISE);
        assert_eq!(result.noise_count(), 1);
    }

    #[test]
    fn fewer_points_than_min_points_gives_no_clusters() {
        let pts = blob(0.0, 0.0, 3);
        let result = dbscan(&pts, 10.0, 5);
        assert!(result.clusters.is_empty());
        assert_eq!(result.labels, vec![NOISE; 3]);
    }

    #[test]
    fn core_count_excludes_the_point_itself() {
        // Each point has exactly two others within eps.
        let pts = vec![
            Point3::new(0.0, 0.0, 0.0),
            Point3::new(1.0, 0.0, 0.0),
            Point3::new(0.0, 1.0, 0.0),
        ];
        assert_eq!(dbscan(&pts, 1.5, 2).clusters.len(), 1);
        assert!(dbscan(&pts, 1.5, 3).clusters.is_empty());
    }

    #[test]
    fn border_point_joins_cluster() {
        // Chain of core points with a border point hanging off the end.
        let mut pts: Vec<Point3> = (0..5).map(|i| Point3::new(i as f64, 0.0, 0.0)).collect();
        pts.push(Point3::new(5.9, 0.0, 0.0));
        let result = dbscan(&pts, 1.0, 2);
        assert_eq!(result.clusters.len(), 1);
        // x = 4 has a single neighbour, so it is border; x = 5.9 is out of reach.
        assert_eq!(result.labels[5], NOISE);
        assert_eq!(result.labels[4], 0);
    }

    #[test]
    fn labelling_is_reproducible() {
        let mut pts = blob(0.0, 0.0, 16);
        pts.extend(blob(50.0, 50.0, 9));
        let a = dbscan(&pts, 3.0, 2);
        let b = dbscan(&pts, 3.0, 2);
        assert_eq!(a, b);
    }

    #[test]
    fn negative_or_nan_eps_gives_all_noise() {
        let pts = blob(0.0, 0.0, 12);
        for eps in [-3.0, f64::NAN, f64::INFINITY] {
            let result = dbscan(&pts, eps, 2);
            assert!(result.clusters.is_empty(), "eps {eps}");
            assert_eq!(result.noise_count(), pts.len());
        }
        assert_eq!(dbscan(&pts, 3.0, 2).clusters.len(), 1);
    }
}
