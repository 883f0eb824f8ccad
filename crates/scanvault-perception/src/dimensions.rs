//! Cluster bounding geometry.

use serde::{Deserialize, Serialize};

use crate::octree::{Aabb, Point3};
use crate::{PerceptionError, Result};

/// Axis-aligned extents and center of a point group.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Dimensions {
    /// Per-axis minimum corner.
    pub min: Point3,
    /// Per-axis maximum corner.
    pub max: Point3,
    pub center: Point3,
    /// Extent along x.
    pub width: f64,
    /// Extent along y.
    pub depth: f64,
    /// Extent along z.
    pub height: f64,
}

/// Bounding extents of `points`; at least three points are required.
pub fn dimensions(points: &[Point3]) -> Result<Dimensions> {
    let bounds = match Aabb::enclosing(points) {
        Some(b) if points.len() >= 3 => b,
        _ => {
            return Err(PerceptionError::InsufficientData {
                stage: "dimensions",
                needed: 3,
                got: points.len(),
            });
        }
    };
    let extent = bounds.extent();
    Ok(Dimensions {
        min: bounds.min,
        max: bounds.max,
        center: bounds.centre(),
        width: extent.x,
        depth: extent.y,
        height: extent.z,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn right_triangle_extents() {
        let d = dimensions(&[
            Point3::new(0.0, 0.0, 0.0),
            Point3::new(2.0, 0.0, 0.0),
            Point3::new(0.0, 3.0, 0.0),
        ])
        .unwrap();
        assert_eq!((d.width, d.depth, d.height), (2.0, 3.0, 0.0));
        assert_eq!(d.center, Point3::new(1.0, 1.5, 0.0));
        assert_eq!(d.min, Point3::new(0.0, 0.0, 0.0));
        assert_eq!(d.max, Point3::new(2.0, 3.0, 0.0));
    }

    #[test]
    fn two_points_is_insufficient() {
        let err = dimensions(&[Point3::new(0.0, 0.0, 0.0), Point3::new(1.0, 1.0, 1.0)])
            .unwrap_err();
        assert!(matches!(
            err,
            PerceptionError::InsufficientData { needed: 3, got: 2, .. }
        ));
    }
}
