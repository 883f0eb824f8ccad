//! Scan Reconstructor.
//!
//! Converts the polar `(angle_label, distance)` readings of a stored
//! [`Scan`] into colored Cartesian points on the `z = 0` plane.
//!
//! ```rust
//! use scanvault_perception::reconstruct::to_points;
//! use scanvault_types::{Reading, Scan};
//!
//! let scan = Scan {
//!     id: None, timestamp: 0.0, receive_time: 0.0, message_id: 1,
//!     device_id: "lidar".into(), latency_ms: None,
//!     readings: vec![Reading::new("angle_0", 100.0), Reading::new("angle_90", 50.0)],
//! };
//! let cloud = to_points(&scan);
//! assert!((cloud.points[0].x - 100.0).abs() < 1e-6);
//! assert!((cloud.points[1].y - 50.0).abs() < 1e-6);
//! ```

use scanvault_types::Scan;
use tracing::warn;

use crate::cloud::PointSet;
use crate::colormap::viridis;
use crate::octree::Point3;

/// Parse the integer degree value out of an `angle_<deg>` label.
///
/// Fractional (`angle_12.5`) and non-numeric suffixes are rejected.
pub fn parse_angle_label(label: &str) -> Option<i64> {
    label.strip_prefix("angle_")?.parse().ok()
}

/// Reconstruct the scan as a [`PointSet`], in reading order.
///
/// Readings with an unparseable label or a negative distance are skipped
/// with a warning. Colors encode `distance / max_distance` through viridis
/// (all 0 when the maximum is not positive).
pub fn to_points(scan: &Scan) -> PointSet {
    let mut polar = Vec::with_capacity(scan.readings.len());
    for reading in &scan.readings {
        let Some(degrees) = parse_angle_label(&reading.angle_label) else {
            warn!(label = %reading.angle_label, "could not parse angle label; skipping reading");
            continue;
        };
        if reading.distance.is_nan() || reading.distance < 0.0 {
            warn!(
                label = %reading.angle_label,
                distance = reading.distance,
                "negative or invalid distance; skipping reading"
            );
            continue;
        }
        polar.push((degrees as f64, reading.distance));
    }

    let max_d = polar.iter().map(|(_, d)| *d).fold(0.0_f64, f64::max);
    let mut cloud = PointSet::with_capacity(polar.len());
    for (degrees, d) in polar {
        let theta = degrees.to_radians();
        let t = if max_d > 0.0 { d / max_d } else { 0.0 };
        cloud.push(Point3::new(d * theta.cos(), d * theta.sin(), 0.0), viridis(t));
    }
    cloud
}

#[cfg(test)]
mod tests {
    use super::*;
    use scanvault_types::Reading;

    fn scan_with(readings: Vec<Reading>) -> Scan {
        Scan {
            id: Some(1),
            timestamp: 1.0,
            receive_time: 1.0,
            message_id: 1,
            device_id: "test".into(),
            latency_ms: None,
            readings,
        }
    }

    #[test]
    fn cardinal_angles_map_to_axes() {
        let cloud = to_points(&scan_with(vec![
            Reading::new("angle_0", 100.0),
            Reading::new("angle_90", 50.0),
        ]));
        assert_eq!(cloud.len(), 2);
        let a = cloud.points[0];
        let b = cloud.points[1];
        assert!((a.x - 100.0).abs() < 1e-6 && a.y.abs() < 1e-6 && a.z == 0.0);
        assert!(b.x.abs() < 1e-6 && (b.y - 50.0).abs() < 1e-6);
    }

    #[test]
    fn farthest_point_gets_top_of_colormap() {
        let cloud = to_points(&scan_with(vec![
            Reading::new("angle_0", 100.0),
            Reading::new("angle_90", 50.0),
        ]));
        assert_eq!(cloud.colors[0], viridis(1.0));
        assert_eq!(cloud.colors[1], viridis(0.5));
    }

    #[test]
    fn all_zero_distances_use_bottom_color() {
        let cloud = to_points(&scan_with(vec![Reading::new("angle_10", 0.0)]));
        assert_eq!(cloud.colors[0], viridis(0.0));
    }

    #[test]
    fn empty_scan_gives_empty_cloud() {
        assert!(to_points(&scan_with(vec![])).is_empty());
    }

    #[test]
    fn bad_labels_and_negative_distances_are_skipped() {
        let cloud = to_points(&scan_with(vec![
            Reading::new("angle_12.5", 10.0),
            Reading::new("bearing_5", 10.0),
            Reading::new("angle_x", 10.0),
            Reading::new("angle_30", -1.0),
            Reading::new("angle_180", 20.0),
        ]));
        assert_eq!(cloud.len(), 1);
        assert!((cloud.points[0].x + 20.0).abs() < 1e-6);
    }

    #[test]
    fn parse_accepts_negative_degrees() {
        assert_eq!(parse_angle_label("angle_-45"), Some(-45));
        assert_eq!(parse_angle_label("angle_"), None);
    }

    #[test]
    fn stored_scan_reconstructs_to_the_same_points() {
        use scanvault_store::ScanStore;

        let dir = tempfile::tempdir().expect("tmp dir");
        let path = dir.path().join("scans.db");
        let mut scan = scan_with(vec![
            Reading::new("angle_0", 100.0),
            Reading::new("angle_90", 50.0),
        ]);
        scan.id = None;
        {
            let mut store = ScanStore::open(&path).unwrap();
            store.insert_scan(&scan).unwrap();
            store.commit().unwrap();
        }

        let store = ScanStore::open(&path).unwrap();
        let loaded = store.latest_scan().unwrap().expect("scan stored");
        let id = loaded.id.expect("stored scan has an id");
        assert_eq!(store.scan_by_id(id).unwrap().as_ref(), Some(&loaded));

        let cloud = to_points(&loaded);
        assert_eq!(cloud.len(), 2);
        let a = cloud.points[0];
        let b = cloud.points[1];
        assert!((a.x - 100.0).abs() < 1e-6 && a.y.abs() < 1e-6 && a.z == 0.0);
        assert!(b.x.abs() < 1e-6 && (b.y - 50.0).abs() < 1e-6 && b.z == 0.0);
    }
}
