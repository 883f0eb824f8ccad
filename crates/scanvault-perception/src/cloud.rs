//! Colored point sets.

use serde::{Deserialize, Serialize};

use crate::octree::Point3;

/// An RGB color with components in `[0, 1]`.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Rgb {
    pub r: f64,
    pub g: f64,
    pub b: f64,
}

impl Rgb {
    pub const fn new(r: f64, g: f64, b: f64) -> Self {
        Self { r, g, b }
    }

    /// Color from 8-bit channels.
    pub fn from_u8(r: u8, g: u8, b: u8) -> Self {
        Self::new(r as f64 / 255.0, g as f64 / 255.0, b as f64 / 255.0)
    }

    /// Components scaled and rounded to 8-bit channels.
    pub fn to_u8(self) -> [u8; 3] {
        let q = |c: f64| (c.clamp(0.0, 1.0) * 255.0).round() as u8;
        [q(self.r), q(self.g), q(self.b)]
    }

    /// CSS-style `rgb(r,g,b)` string.
    pub fn css(self) -> String {
        let [r, g, b] = self.to_u8();
        format!("rgb({r},{g},{b})")
    }
}

/// Parallel vectors of points and their colors.
///
/// `points.len() == colors.len()` always holds for sets built through
/// [`PointSet::push`] or [`PointSet::select`].
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct PointSet {
    pub points: Vec<Point3>,
    pub colors: Vec<Rgb>,
}

impl PointSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capacity(n: usize) -> Self {
        Self {
            points: Vec::with_capacity(n),
            colors: Vec::with_capacity(n),
        }
    }

    pub fn push(&mut self, point: Point3, color: Rgb) {
        self.points.push(point);
        self.colors.push(color);
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    /// New set holding the entries at `indices`, in that order.
    pub fn select(&self, indices: &[usize]) -> Self {
        let mut out = Self::with_capacity(indices.len());
        for &i in indices {
            out.push(self.points[i], self.colors[i]);
        }
        out
    }

    /// Iterate over `(point, color)` pairs.
    pub fn iter(&self) -> impl Iterator<Item = (Point3, Rgb)> + '_ {
        self.points.iter().copied().zip(self.colors.iter().copied())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn select_keeps_requested_order() {
        let mut set = PointSet::new();
        for i in 0..4 {
            set.push(Point3::new(i as f64, 0.0, 0.0), Rgb::new(0.0, 0.0, i as f64 / 4.0));
        }
        let sub = set.select(&[3, 1]);
        assert_eq!(sub.len(), 2);
        assert_eq!(sub.points[0].x, 3.0);
        assert_eq!(sub.colors[1].b, 0.25);
    }

    #[test]
    fn css_rounds_channels() {
        assert_eq!(Rgb::from_u8(255, 128, 0).css(), "rgb(255,128,0)");
        assert_eq!(Rgb::new(2.0, -1.0, 0.5).to_u8(), [255, 0, 128]);
    }
}
