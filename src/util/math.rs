//! Math type re-exports and Scenio-specific math utilities.
//!
//! Scene-layer values are double precision throughout: transforms are
//! [`DMat4`], bounds are [`Box3d`].

// Re-export glam types
pub use glam::{DMat3, DMat4, DQuat, DVec2, DVec3, DVec4};

use smallvec::SmallVec;
use std::fmt;

/// 3D axis-aligned bounding box, double precision.
#[derive(Clone, Copy, PartialEq)]
pub struct Box3d {
    pub min: DVec3,
    pub max: DVec3,
}

impl Box3d {
    /// Empty bounding box (inverted, will expand on first point).
    pub const EMPTY: Self = Self {
        min: DVec3::splat(f64::INFINITY),
        max: DVec3::splat(f64::NEG_INFINITY),
    };

    /// Create a new bounding box from min and max points.
    #[inline]
    pub const fn new(min: DVec3, max: DVec3) -> Self {
        Self { min, max }
    }

    /// Create a bounding box from a single point.
    #[inline]
    pub fn from_point(p: DVec3) -> Self {
        Self { min: p, max: p }
    }

    /// Check if this box is empty (holds no points).
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.min.x > self.max.x || self.min.y > self.max.y || self.min.z > self.max.z
    }

    /// Expand this box to include a point.
    #[inline]
    pub fn extend_by_point(&mut self, p: DVec3) {
        self.min = self.min.min(p);
        self.max = self.max.max(p);
    }

    /// Expand this box to include another box.
    #[inline]
    pub fn extend_by_box(&mut self, other: &Self) {
        if !other.is_empty() {
            self.min = self.min.min(other.min);
            self.max = self.max.max(other.max);
        }
    }

    /// Union of two boxes.
    #[inline]
    pub fn union(&self, other: &Self) -> Self {
        let mut b = *self;
        b.extend_by_box(other);
        b
    }

    /// Check whether `other` lies entirely inside this box, with a tolerance.
    pub fn contains_box(&self, other: &Self, tolerance: f64) -> bool {
        if other.is_empty() {
            return true;
        }
        if self.is_empty() {
            return false;
        }
        self.min.x <= other.min.x + tolerance
            && self.min.y <= other.min.y + tolerance
            && self.min.z <= other.min.z + tolerance
            && self.max.x >= other.max.x - tolerance
            && self.max.y >= other.max.y - tolerance
            && self.max.z >= other.max.z - tolerance
    }

    /// Get the center of the box.
    #[inline]
    pub fn center(&self) -> DVec3 {
        (self.min + self.max) * 0.5
    }

    /// Get the size (extents) of the box.
    #[inline]
    pub fn size(&self) -> DVec3 {
        self.max - self.min
    }

    /// Bounding box of this box transformed by a matrix.
    ///
    /// Transforms all eight corners and re-bounds them, so rotations yield
    /// the tightest axis-aligned result. Empty boxes stay empty.
    pub fn transformed(&self, m: &DMat4) -> Self {
        if self.is_empty() {
            return *self;
        }
        let corners: SmallVec<[DVec3; 8]> = (0..8)
            .map(|i| {
                DVec3::new(
                    if i & 1 == 0 { self.min.x } else { self.max.x },
                    if i & 2 == 0 { self.min.y } else { self.max.y },
                    if i & 4 == 0 { self.min.z } else { self.max.z },
                )
            })
            .collect();
        let mut out = Self::EMPTY;
        for c in corners {
            out.extend_by_point(m.transform_point3(c));
        }
        out
    }

    /// Component-wise linear interpolation between two boxes.
    pub fn lerp(a: &Self, b: &Self, x: f64) -> Self {
        Self {
            min: a.min.lerp(b.min, x),
            max: a.max.lerp(b.max, x),
        }
    }
}

impl Default for Box3d {
    fn default() -> Self {
        Self::EMPTY
    }
}

impl fmt::Debug for Box3d {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Box3d({:?} - {:?})", self.min, self.max)
    }
}

/// Component-wise linear interpolation of two matrices.
pub fn lerp_matrix(a: &DMat4, b: &DMat4, x: f64) -> DMat4 {
    let av = a.to_cols_array();
    let bv = b.to_cols_array();
    let mut out = [0.0f64; 16];
    for i in 0..16 {
        out[i] = av[i] + (bv[i] - av[i]) * x;
    }
    DMat4::from_cols_array(&out)
}
