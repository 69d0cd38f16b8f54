//! This module defines the [`BoundingHierarchy`] trait.

use crate::aabb::Aabb;
use crate::bvh::Bvh;

/// A builder of bounding volume hierarchies over a set of primitive bounds.
///
/// Implementors are plain configuration values; every call to [`BoundingHierarchy::build`]
/// owns its own scratch state, so one builder can be shared across worker threads.
pub trait BoundingHierarchy {
    /// Builds a [`Bvh`] over `bounds`. Leaves of the result reference positions in
    /// [`Bvh::indices`], which in turn hold indices into `bounds`.
    ///
    /// # Examples
    ///
    /// ```
    /// use scene_bvh::aabb::Aabb;
    /// use scene_bvh::bounding_hierarchy::BoundingHierarchy;
    /// use scene_bvh::bvh::{BvhBuilder, SplitBvhBuilder};
    /// use scene_bvh::{Point3, Vector3};
    ///
    /// fn build_with(builder: &impl BoundingHierarchy, bounds: &[Aabb]) -> usize {
    ///     builder.build(bounds).leaves().count()
    /// }
    ///
    /// let bounds: Vec<Aabb> = (0..8)
    ///     .map(|i| {
    ///         let min = Point3::new(i as f32 * 2.0, 0.0, 0.0);
    ///         Aabb::with_bounds(min, min + Vector3::new(1.0, 1.0, 1.0))
    ///     })
    ///     .collect();
    ///
    /// assert_eq!(build_with(&BvhBuilder::default(), &bounds), 8);
    /// assert!(build_with(&SplitBvhBuilder::default(), &bounds) >= 8);
    /// ```
    fn build(&self, bounds: &[Aabb]) -> Bvh;
}
