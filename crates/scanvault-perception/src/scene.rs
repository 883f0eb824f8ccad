//! Renderable scene description.
//!
//! A renderer-agnostic description of one analysed scan: named point groups
//! with styling hints plus three axis markers. Serialises to JSON with serde
//! so any front end can draw it.
//!
//! | group              | shown when                    | opacity | size | color            |
//! |--------------------|-------------------------------|---------|------|------------------|
//! | `Original Points`  | ground or clusters exist      | 0.3     | 2    | per point        |
//! | `Ground`           | ground is non-empty           | 0.7     | 3    | per point        |
//! | `Objects`          | objects exist and no clusters | 0.8     | 4    | per point        |
//! | `Cluster <n>`      | one per cluster               | 0.9     | 5    | palette          |
//! | `Center <n>`       | one per cluster (diamond)     | 1.0     | 10   | palette          |

use serde::{Deserialize, Serialize};

use crate::cloud::{PointSet, Rgb};
use crate::octree::Point3;

/// Length of each axis marker, in sensor units.
pub const AXIS_LENGTH: f64 = 50.0;

const CLUSTER_PALETTE: [(u8, u8, u8); 10] = [
    (255, 0, 0),
    (0, 0, 255),
    (255, 255, 0),
    (255, 0, 255),
    (0, 255, 255),
    (255, 128, 0),
    (128, 0, 255),
    (0, 255, 128),
    (128, 128, 255),
    (255, 128, 128),
];

/// Palette color for the cluster at position `index` (cycles after ten).
pub fn cluster_color(index: usize) -> Rgb {
    let (r, g, b) = CLUSTER_PALETTE[index % CLUSTER_PALETTE.len()];
    Rgb::from_u8(r, g, b)
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "mode", content = "value", rename_all = "snake_case")]
pub enum GroupColor {
    PerPoint(Vec<Rgb>),
    Uniform(Rgb),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MarkerShape {
    Circle,
    Diamond,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PointGroup {
    pub name: String,
    pub points: Vec<Point3>,
    pub color: GroupColor,
    pub opacity: f64,
    pub marker_size: f64,
    pub shape: MarkerShape,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AxisMarker {
    pub name: String,
    pub start: Point3,
    pub end: Point3,
    pub color: Rgb,
    pub width: f64,
}

/// Everything a renderer needs to draw one analysed scan.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SceneDescription {
    pub title: String,
    pub groups: Vec<PointGroup>,
    pub axes: Vec<AxisMarker>,
}

impl SceneDescription {
    /// Assemble the scene for one scan.
    ///
    /// `clusters` holds the member points of each cluster in id order.
    pub fn build(
        timestamp: f64,
        original: &PointSet,
        ground: &PointSet,
        objects: &PointSet,
        clusters: &[Vec<Point3>],
    ) -> Self {
        let mut groups = Vec::new();

        if !ground.is_empty() || !clusters.is_empty() {
            groups.push(styled_group("Original Points", original, 0.3, 2.0));
        }
        if !ground.is_empty() {
            groups.push(styled_group("Ground", ground, 0.7, 3.0));
        }
        if !objects.is_empty() && clusters.is_empty() {
            groups.push(styled_group("Objects", objects, 0.8, 4.0));
        }

        for (i, members) in clusters.iter().enumerate() {
            let color = cluster_color(i);
            groups.push(PointGroup {
                name: format!("Cluster {}", i + 1),
                points: members.clone(),
                color: GroupColor::Uniform(color),
                opacity: 0.9,
                marker_size: 5.0,
                shape: MarkerShape::Circle,
            });
            if let Some(centroid) = centroid(members) {
                groups.push(PointGroup {
                    name: format!("Center {}", i + 1),
                    points: vec![centroid],
                    color: GroupColor::Uniform(color),
                    opacity: 1.0,
                    marker_size: 10.0,
                    shape: MarkerShape::Diamond,
                });
            }
        }

        Self {
            title: format!("LIDAR Point Cloud Analysis (Timestamp: {timestamp})"),
            groups,
            axes: axis_markers(),
        }
    }

    pub fn group(&self, name: &str) -> Option<&PointGroup> {
        self.groups.iter().find(|g| g.name == name)
    }
}

/// Point sets carry one colour per point, so these groups are always per point.
fn styled_group(name: &str, set: &PointSet, opacity: f64, marker_size: f64) -> PointGroup {
    PointGroup {
        name: name.to_string(),
        points: set.points.clone(),
        color: GroupColor::PerPoint(set.colors.clone()),
        opacity,
        marker_size,
        shape: MarkerShape::Circle,
    }
}

fn centroid(points: &[Point3]) -> Option<Point3> {
    if points.is_empty() {
        return None;
    }
    let n = points.len() as f64;
    let sum = points.iter().fold(Point3::default(), |acc, p| {
        Point3::new(acc.x + p.x, acc.y + p.y, acc.z + p.z)
    });
    Some(Point3::new(sum.x / n, sum.y / n, sum.z / n))
}

fn axis_markers() -> Vec<AxisMarker> {
    let origin = Point3::default();
    [
        ("X-axis", Point3::new(AXIS_LENGTH, 0.0, 0.0), Rgb::from_u8(255, 0, 0)),
        ("Y-axis", Point3::new(0.0, AXIS_LENGTH, 0.0), Rgb::from_u8(0, 128, 0)),
        ("Z-axis", Point3::new(0.0, 0.0, AXIS_LENGTH), Rgb::from_u8(0, 0, 255)),
    ]
    .into_iter()
    .map(|(name, end, color)| AxisMarker {
        name: name.to_string(),
        start: origin,
        end,
        color,
        width: 4.0,
    })
    .collect()
}
