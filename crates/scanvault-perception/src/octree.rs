//! Spatial Index.
//!
//! Partitions 3-D space using a recursive **Octree** so that the clusterer
//! can answer "which points lie within `eps` of this one?" without scanning
//! the whole cloud.
//!
//! # Key types
//!
//! | Type | Role |
//! |------|------|
//! | [`Point3`]   | A 3-D coordinate with the vector maths the stages need. |
//! | [`Aabb`]     | An axis-aligned bounding box.                           |
//! | [`Octree`]   | Spatial index over point *indices*; radius queries.     |
//!
//! # Example
//!
//! ```rust
//! use scanvault_perception::octree::{Octree, Point3};
//!
//! let cloud = vec![
//!     Point3::new(0.0, 0.0, 0.0),
//!     Point3::new(1.0, 0.0, 0.0),
//!     Point3::new(50.0, 50.0, 0.0),
//! ];
//! let tree = Octree::build(&cloud, 8);
//!
//! let mut near = tree.radius_query(Point3::new(0.0, 0.0, 0.0), 2.0);
//! near.sort();
//! assert_eq!(near, vec![0, 1]);
//! ```

use serde::{Deserialize, Serialize};

// ────────────────────────────────────────────────────────────────────────────
// Point3
// ────────────────────────────────────────────────────────────────────────────

/// A point (or vector) in 3-D space.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Point3 {
    pub x: f64,
    pub y: f64,
    pub z: f64,
}

impl Point3 {
    /// Create a new point.
    pub const fn new(x: f64, y: f64, z: f64) -> Self {
        Self { x, y, z }
    }

    pub fn sub(self, other: Point3) -> Point3 {
        Point3::new(self.x - other.x, self.y - other.y, self.z - other.z)
    }

    pub fn dot(self, other: Point3) -> f64 {
        self.x * other.x + self.y * other.y + self.z * other.z
    }

    pub fn cross(self, other: Point3) -> Point3 {
        Point3::new(
            self.y * other.z - self.z * other.y,
            self.z * other.x - self.x * other.z,
            self.x * other.y - self.y * other.x,
        )
    }

    pub fn norm(self) -> f64 {
        self.dot(self).sqrt()
    }

    pub fn distance_squared(self, other: Point3) -> f64 {
        let d = self.sub(other);
        d.dot(d)
    }

    pub fn distance(self, other: Point3) -> f64 {
        self.distance_squared(other).sqrt()
    }

    pub fn as_array(self) -> [f64; 3] {
        [self.x, self.y, self.z]
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Aabb
// ────────────────────────────────────────────────────────────────────────────

/// An axis-aligned bounding box, defined by its minimum and maximum corners.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Aabb {
    pub min: Point3,
    pub max: Point3,
}

impl Aabb {
    /// Create a bounding box from its two opposite corners.
    ///
    /// The constructor normalises the corners so that `min ≤ max` per axis.
    pub fn new(a: Point3, b: Point3) -> Self {
        Self {
            min: Point3::new(a.x.min(b.x), a.y.min(b.y), a.z.min(b.z)),
            max: Point3::new(a.x.max(b.x), a.y.max(b.y), a.z.max(b.z)),
        }
    }

    /// Smallest box enclosing every point, or `None` for an empty slice.
    pub fn enclosing(points: &[Point3]) -> Option<Self> {
        let first = *points.first()?;
        let (min, max) = points.iter().fold((first, first), |(lo, hi), p| {
            (
                Point3::new(lo.x.min(p.x), lo.y.min(p.y), lo.z.min(p.z)),
                Point3::new(hi.x.max(p.x), hi.y.max(p.y), hi.z.max(p.z)),
            )
        });
        Some(Self { min, max })
    }

    /// Box of half-size `radius` around `centre`.
    pub fn around(centre: Point3, radius: f64) -> Self {
        Self::new(
            Point3::new(centre.x - radius, centre.y - radius, centre.z - radius),
            Point3::new(centre.x + radius, centre.y + radius, centre.z + radius),
        )
    }

    /// Return the centre point of the box.
    pub fn centre(&self) -> Point3 {
        Point3::new(
            (self.min.x + self.max.x) * 0.5,
            (self.min.y + self.max.y) * 0.5,
            (self.min.z + self.max.z) * 0.5,
        )
    }

    /// Edge lengths along x, y and z.
    pub fn extent(&self) -> Point3 {
        self.max.sub(self.min)
    }

    /// True when the point lies inside or on the boundary of the box.
    pub fn contains_point(&self, p: Point3) -> bool {
        p.x >= self.min.x
            && p.x <= self.max.x
            && p.y >= self.min.y
            && p.y <= self.max.y
            && p.z >= self.min.z
            && p.z <= self.max.z
    }

    /// True when `other` overlaps (intersects or touches) this box.
    pub fn overlaps(&self, other: &Aabb) -> bool {
        self.min.x <= other.max.x
            && self.max.x >= other.min.x
            && self.min.y <= other.max.y
            && self.max.y >= other.min.y
            && self.min.z <= other.max.z
            && self.max.z >= other.min.z
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Octree
// ────────────────────────────────────────────────────────────────────────────

/// A recursive spatial index that subdivides 3-D space into eight octants.
///
/// The tree stores indices into a caller-owned point slice together with a
/// copy of each coordinate. Subdividing stops when either
/// - the number of entries in a node is ≤ `capacity`, or
/// - `max_depth` levels have already been created.
#[derive(Debug)]
pub struct Octree {
    root: OctreeNode,
    max_depth: usize,
}

impl Octree {
    /// Create an empty octree covering `bounds`.
    pub fn new(bounds: Aabb, capacity: usize) -> Self {
        Self::with_max_depth(bounds, capacity, 8)
    }

    /// Create an empty octree with an explicit maximum subdivision depth.
    pub fn with_max_depth(bounds: Aabb, capacity: usize, max_depth: usize) -> Self {
        Self {
            root: OctreeNode::new(bounds, capacity.max(1)),
            max_depth,
        }
    }

    /// Index every point of `points`; entry `i` refers to `points[i]`.
    pub fn build(points: &[Point3], capacity: usize) -> Self {
        let bounds = Aabb::enclosing(points)
            .unwrap_or_else(|| Aabb::new(Point3::default(), Point3::default()));
        let mut tree = Self::new(bounds, capacity);
        for (i, p) in points.iter().enumerate() {
            tree.insert(i, *p);
        }
        tree
    }

    /// Insert a point under `index`.
    ///
    /// Points outside the root bounding box are silently ignored.
    pub fn insert(&mut self, index: usize, point: Point3) {
        self.root.insert(Entry { index, point }, self.max_depth, 0);
    }

    /// Return the total number of points stored in the tree.
    pub fn len(&self) -> usize {
        self.root.count()
    }

    /// True when the tree contains no points.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Indices of every point within `radius` (inclusive) of `centre`, in
    /// unspecified order.
    pub fn radius_query(&self, centre: Point3, radius: f64) -> Vec<usize> {
        let mut out = Vec::new();
        let region = Aabb::around(centre, radius);
        self.root
            .radius_query(centre, radius * radius, &region, &mut out);
        out
    }
}

// ────────────────────────────────────────────────────────────────────────────
// OctreeNode – internal implementation
// ────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy)]
struct Entry {
    index: usize,
    point: Point3,
}

#[derive(Debug)]
struct OctreeNode {
    bounds: Aabb,
    capacity: usize,
    /// Entries stored at this node (only non-empty when the node is a leaf).
    entries: Vec<Entry>,
    /// Eight children; `None` while this node is a leaf.
    children: Option<Box<[OctreeNode; 8]>>,
}

impl OctreeNode {
    fn new(bounds: Aabb, capacity: usize) -> Self {
        Self {
            bounds,
            capacity,
            entries: Vec::new(),
            children: None,
        }
    }

    fn count(&self) -> usize {
        match &self.children {
            None => self.entries.len(),
            Some(children) => children.iter().map(|c| c.count()).sum(),
        }
    }

    fn insert(&mut self, entry: Entry, max_depth: usize, depth: usize) {
        if !self.bounds.contains_point(entry.point) {
            return;
        }
        match self.children.as_mut() {
            None => {
                self.entries.push(entry);
                if self.entries.len() > self.capacity && depth < max_depth {
                    self.subdivide(max_depth, depth);
                }
            }
            Some(children) => {
                if let Some(child) = children
                    .iter_mut()
                    .find(|c| c.bounds.contains_point(entry.point))
                {
                    child.insert(entry, max_depth, depth + 1);
                }
            }
        }
    }

    fn radius_query(&self, centre: Point3, radius_sq: f64, region: &Aabb, out: &mut Vec<usize>) {
        if !self.bounds.overlaps(region) {
            return;
        }
        match &self.children {
            None => out.extend(
                self.entries
                    .iter()
                    .filter(|e| e.point.distance_squared(centre) <= radius_sq)
                    .map(|e| e.index),
            ),
            Some(children) => {
                for child in children.iter() {
                    child.radius_query(centre, radius_sq, region, out);
                }
            }
        }
    }

    /// Split this leaf into eight children and redistribute existing entries.
    fn subdivide(&mut self, max_depth: usize, depth: usize) {
        let c = self.bounds.centre();
        let min = self.bounds.min;
        let max = self.bounds.max;

        let octants = [
            Aabb::new(min, c),
            Aabb::new(Point3::new(c.x, min.y, min.z), Point3::new(max.x, c.y, c.z)),
            Aabb::new(Point3::new(min.x, c.y, min.z), Point3::new(c.x, max.y, c.z)),
            Aabb::new(Point3::new(c.x, c.y, min.z), Point3::new(max.x, max.y, c.z)),
            Aabb::new(Point3::new(min.x, min.y, c.z), Point3::new(c.x, c.y, max.z)),
            Aabb::new(Point3::new(c.x, min.y, c.z), Point3::new(max.x, c.y, max.z)),
            Aabb::new(Point3::new(min.x, c.y, c.z), Point3::new(c.x, max.y, max.z)),
            Aabb::new(c, max),
        ];

        let cap = self.capacity;
        let mut children = Box::new(octants.map(|b| OctreeNode::new(b, cap)));

        // First matching octant wins for points on a shared face.
        for entry in std::mem::take(&mut self.entries) {
            if let Some(child) = children
                .iter_mut()
                .find(|c| c.bounds.contains_point(entry.point))
            {
                child.insert(entry, max_depth, depth + 1);
            }
        }

        self.children = Some(children);
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Tests
// ────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn brute_force(points: &[Point3], centre: Point3, radius: f64) -> Vec<usize> {
        points
            .iter()
            .enumerate()
            .filter(|(_, p)| p.distance_squared(centre) <= radius * radius)
            .map(|(i, _)| i)
            .collect()
    }

    // ── Point3 / Aabb ───────────────────────────────────────────────────────

    #[test]
    fn cross_of_axes_is_third_axis() {
        let x = Point3::new(1.0, 0.0, 0.0);
        let y = Point3::new(0.0, 1.0, 0.0);
        assert_eq!(x.cross(y), Point3::new(0.0, 0.0, 1.0));
    }

    #[test]
    fn aabb_normalises_min_max() {
        let b = Aabb::new(Point3::new(2.0, 2.0, 2.0), Point3::new(0.0, 0.0, 0.0));
        assert_eq!(b.min, Point3::new(0.0, 0.0, 0.0));
        assert_eq!(b.max, Point3::new(2.0, 2.0, 2.0));
    }

    #[test]
    fn aabb_enclosing_covers_all_points() {
        let pts = [
            Point3::new(1.0, -2.0, 0.0),
            Point3::new(-1.0, 4.0, 3.0),
        ];
        let b = Aabb::enclosing(&pts).unwrap();
        assert_eq!(b.min, Point3::new(-1.0, -2.0, 0.0));
        assert_eq!(b.max, Point3::new(1.0, 4.0, 3.0));
        assert!(Aabb::enclosing(&[]).is_none());
    }

    #[test]
    fn aabb_overlaps_touching_boxes() {
        let a = Aabb::new(Point3::new(0.0, 0.0, 0.0), Point3::new(1.0, 1.0, 1.0));
        let b = Aabb::new(Point3::new(1.0, 0.0, 0.0), Point3::new(2.0, 1.0, 1.0));
        assert!(a.overlaps(&b));
    }

    // ── Octree ──────────────────────────────────────────────────────────────

    #[test]
    fn empty_build_is_empty() {
        let tree = Octree::build(&[], 4);
        assert!(tree.is_empty());
        assert!(tree.radius_query(Point3::default(), 10.0).is_empty());
    }

    #[test]
    fn insert_outside_bounds_is_ignored() {
        let mut tree = Octree::new(
            Aabb::new(Point3::new(0.0, 0.0, 0.0), Point3::new(1.0, 1.0, 1.0)),
            4,
        );
        tree.insert(0, Point3::new(5.0, 5.0, 5.0));
        assert!(tree.is_empty());
    }

    #[test]
    fn radius_query_boundary_is_inclusive() {
        let pts = [Point3::new(0.0, 0.0, 0.0), Point3::new(3.0, 4.0, 0.0)];
        let tree = Octree::build(&pts, 1);
        let mut hits = tree.radius_query(pts[0], 5.0);
        hits.sort();
        assert_eq!(hits, vec![0, 1]);
    }

    #[test]
    fn subdivided_grid_matches_brute_force() {
        let mut pts = Vec::new();
        for ix in 0..6 {
            for iy in 0..6 {
                for iz in 0..3 {
                    pts.push(Point3::new(ix as f64 * 7.0, iy as f64 * 7.0, iz as f64 * 7.0));
                }
            }
        }
        let tree = Octree::build(&pts, 4);
        assert_eq!(tree.len(), pts.len());

        for centre in [pts[0], pts[50], Point3::new(17.5, 17.5, 3.0)] {
            for radius in [0.0, 7.0, 10.0, 15.0] {
                let mut got = tree.radius_query(centre, radius);
                got.sort();
                assert_eq!(got, brute_force(&pts, centre, radius), "centre {centre:?} r {radius}");
            }
        }
    }

    #[test]
    fn duplicate_points_survive_depth_limit() {
        let pts = vec![Point3::new(1.0, 1.0, 0.0); 20];
        let tree = Octree::build(&pts, 2);
        assert_eq!(tree.len(), 20);
        assert_eq!(tree.radius_query(pts[0], 0.0).len(), 20);
    }
}
