//! Axis Aligned Bounding Boxes.

use crate::axis::Axis;
use crate::{Mat4, Point3, Real, Vector3};
use std::fmt;
use std::ops::Index;

/// Axis aligned bounding box.
///
/// An empty box stores inverted infinite extremes, so that growing it by any point or box
/// yields exactly that point or box.
#[derive(Debug, Copy, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Aabb {
    /// Minimum coordinates
    pub min: Point3,

    /// Maximum coordinates
    pub max: Point3,
}

impl fmt::Display for Aabb {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "Min bound: {}; Max bound: {}", self.min, self.max)
    }
}

impl Default for Aabb {
    fn default() -> Aabb {
        Aabb::empty()
    }
}

impl Aabb {
    /// Creates a new [`Aabb`] with the given bounds.
    ///
    /// # Examples
    /// ```
    /// use scene_bvh::aabb::Aabb;
    /// use scene_bvh::Point3;
    ///
    /// let aabb = Aabb::with_bounds(Point3::new(-1.0, -1.0, -1.0), Point3::new(1.0, 1.0, 1.0));
    /// assert_eq!(aabb.min.x, -1.0);
    /// assert_eq!(aabb.max.z, 1.0);
    /// ```
    pub fn with_bounds(min: Point3, max: Point3) -> Aabb {
        Aabb { min, max }
    }

    /// Creates a new empty [`Aabb`].
    ///
    /// # Examples
    /// ```
    /// use scene_bvh::aabb::Aabb;
    ///
    /// let aabb = Aabb::empty();
    /// assert!(aabb.is_empty());
    /// assert_eq!(aabb.surface_area(), 0.0);
    /// ```
    pub fn empty() -> Aabb {
        Aabb {
            min: Point3::new(Real::INFINITY, Real::INFINITY, Real::INFINITY),
            max: Point3::new(Real::NEG_INFINITY, Real::NEG_INFINITY, Real::NEG_INFINITY),
        }
    }

    /// Creates a degenerate [`Aabb`] containing only `point`.
    pub fn from_point(point: Point3) -> Aabb {
        Aabb {
            min: point,
            max: point,
        }
    }

    /// Returns true if the [`Point3`] is inside the [`Aabb`].
    pub fn contains(&self, p: &Point3) -> bool {
        p.x >= self.min.x
            && p.x <= self.max.x
            && p.y >= self.min.y
            && p.y <= self.max.y
            && p.z >= self.min.z
            && p.z <= self.max.z
    }

    /// Returns true if the [`Point3`] is approximately inside the [`Aabb`]
    /// with respect to some `epsilon`.
    pub fn approx_contains_eps(&self, p: &Point3, epsilon: Real) -> bool {
        (p.x - self.min.x) > -epsilon
            && (p.x - self.max.x) < epsilon
            && (p.y - self.min.y) > -epsilon
            && (p.y - self.max.y) < epsilon
            && (p.z - self.min.z) > -epsilon
            && (p.z - self.max.z) < epsilon
    }

    /// Returns true if the `other` [`Aabb`] is approximately inside this [`Aabb`]
    /// with respect to some `epsilon`. Empty boxes are contained in everything.
    pub fn approx_contains_aabb_eps(&self, other: &Aabb, epsilon: Real) -> bool {
        other.is_empty()
            || (self.approx_contains_eps(&other.min, epsilon)
                && self.approx_contains_eps(&other.max, epsilon))
    }

    /// Returns true if the `other` [`Aabb`] is approximately equal to this [`Aabb`]
    /// with respect to some `epsilon`.
    pub fn relative_eq(&self, other: &Aabb, epsilon: Real) -> bool {
        if self.is_empty() || other.is_empty() {
            return self.is_empty() && other.is_empty();
        }
        (self.min - other.min).abs().max() < epsilon && (self.max - other.max).abs().max() < epsilon
    }

    /// Returns a new minimal [`Aabb`] which contains both this [`Aabb`] and `other`.
    ///
    /// # Examples
    /// ```
    /// use scene_bvh::aabb::Aabb;
    /// use scene_bvh::Point3;
    ///
    /// let aabb1 = Aabb::with_bounds(Point3::new(-101.0, 0.0, 0.0), Point3::new(-100.0, 1.0, 1.0));
    /// let aabb2 = Aabb::with_bounds(Point3::new(100.0, 0.0, 0.0), Point3::new(101.0, 1.0, 1.0));
    /// let joint = aabb1.join(&aabb2);
    ///
    /// assert!(joint.contains(&Point3::new(0.0, 0.5, 0.5)));
    /// assert_eq!(joint.min.x, -101.0);
    /// assert_eq!(joint.max.x, 101.0);
    /// ```
    pub fn join(&self, other: &Aabb) -> Aabb {
        Aabb::with_bounds(self.min.inf(&other.min), self.max.sup(&other.max))
    }

    /// Mutable version of [`Aabb::join`].
    pub fn join_mut(&mut self, other: &Aabb) {
        *self = self.join(other);
    }

    /// Returns a new minimal [`Aabb`] which contains both this [`Aabb`] and the [`Point3`] `other`.
    pub fn grow(&self, other: &Point3) -> Aabb {
        Aabb::with_bounds(self.min.inf(other), self.max.sup(other))
    }

    /// Mutable version of [`Aabb::grow`].
    pub fn grow_mut(&mut self, other: &Point3) {
        *self = self.grow(other);
    }

    /// Returns the overlapping region of this [`Aabb`] and `other`.
    /// Disjoint boxes yield [`Aabb::empty`].
    ///
    /// # Examples
    /// ```
    /// use scene_bvh::aabb::Aabb;
    /// use scene_bvh::Point3;
    ///
    /// let a = Aabb::with_bounds(Point3::new(0.0, 0.0, 0.0), Point3::new(2.0, 2.0, 2.0));
    /// let b = Aabb::with_bounds(Point3::new(1.0, 1.0, 1.0), Point3::new(3.0, 3.0, 3.0));
    /// let overlap = a.intersection(&b);
    /// assert_eq!(overlap.min, Point3::new(1.0, 1.0, 1.0));
    /// assert_eq!(overlap.max, Point3::new(2.0, 2.0, 2.0));
    ///
    /// let far = Aabb::with_bounds(Point3::new(5.0, 5.0, 5.0), Point3::new(6.0, 6.0, 6.0));
    /// assert!(a.intersection(&far).is_empty());
    /// ```
    pub fn intersection(&self, other: &Aabb) -> Aabb {
        let result = Aabb::with_bounds(self.min.sup(&other.min), self.max.inf(&other.max));
        if result.is_empty() {
            Aabb::empty()
        } else {
            result
        }
    }

    /// Returns true if this box is inverted on any axis, i.e. contains no points.
    pub fn is_empty(&self) -> bool {
        self.min.x > self.max.x || self.min.y > self.max.y || self.min.z > self.max.z
    }

    /// Returns the size of this [`Aabb`] in all three dimensions.
    pub fn size(&self) -> Vector3 {
        self.max - self.min
    }

    /// Returns the center [`Point3`] of the [`Aabb`].
    pub fn center(&self) -> Point3 {
        nalgebra::center(&self.min, &self.max)
    }

    /// Returns the total surface area of this [`Aabb`], which is zero for empty boxes.
    ///
    /// # Examples
    /// ```
    /// use scene_bvh::aabb::Aabb;
    /// use scene_bvh::Point3;
    ///
    /// let aabb = Aabb::with_bounds(Point3::new(0.0, 0.0, 0.0), Point3::new(1.0, 2.0, 3.0));
    /// assert_eq!(aabb.surface_area(), 22.0);
    /// ```
    pub fn surface_area(&self) -> Real {
        if self.is_empty() {
            return 0.0;
        }
        let size = self.size();
        2.0 * (size.x * size.y + size.x * size.z + size.y * size.z)
    }

    /// Returns the axis along which the [`Aabb`] is stretched the most.
    /// Ties resolve towards X, then Y.
    pub fn largest_axis(&self) -> Axis {
        let size = self.size();
        if size.x >= size.y && size.x >= size.z {
            Axis::X
        } else if size.y >= size.z {
            Axis::Y
        } else {
            Axis::Z
        }
    }

    /// Returns a conservative world space box around this box transformed by `transform`.
    ///
    /// Each basis column of the matrix is scaled by the box extremes independently, so
    /// the result may be looser than a refit of the transformed corners but never tighter.
    ///
    /// # Examples
    /// ```
    /// use scene_bvh::aabb::Aabb;
    /// use scene_bvh::{Mat4, Point3, Vector3};
    ///
    /// let unit = Aabb::with_bounds(Point3::new(0.0, 0.0, 0.0), Point3::new(1.0, 1.0, 1.0));
    /// let moved = unit.transform(&Mat4::new_translation(&Vector3::new(5.0, 0.0, 0.0)));
    /// assert_eq!(moved.min, Point3::new(5.0, 0.0, 0.0));
    /// assert_eq!(moved.max, Point3::new(6.0, 1.0, 1.0));
    /// ```
    pub fn transform(&self, transform: &Mat4) -> Aabb {
        if self.is_empty() {
            return *self;
        }
        let translation = Vector3::new(transform[(0, 3)], transform[(1, 3)], transform[(2, 3)]);
        let mut min = translation;
        let mut max = translation;
        for axis in Axis::ALL {
            let column = transform.fixed_view::<3, 1>(0, axis.index()).into_owned();
            let a = column * self.min[axis];
            let b = column * self.max[axis];
            min += a.inf(&b);
            max += a.sup(&b);
        }
        Aabb::with_bounds(Point3::from(min), Point3::from(max))
    }
}

/// Make [`Aabb`]s indexable. `aabb[0]` gives a reference to the minimum bound.
/// All other indices return a reference to the maximum bound.
impl Index<usize> for Aabb {
    type Output = Point3;

    fn index(&self, index: usize) -> &Point3 {
        if index == 0 {
            &self.min
        } else {
            &self.max
        }
    }
}
