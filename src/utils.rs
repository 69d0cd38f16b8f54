//! Utilities module.

use crate::aabb::Aabb;
use crate::Point3;

/// Defines a Bin utility object. Used to store the properties of primitive partitions
/// in the binned SAH build procedures.
#[derive(Clone, Copy, Debug)]
pub struct Bin {
    /// The number of primitives in this `Bin`.
    pub count: usize,

    /// The joint [`Aabb`] of the primitives in this [`Bin`].
    pub aabb: Aabb,
}

impl Bin {
    /// Returns an empty bin.
    pub fn empty() -> Bin {
        Bin {
            count: 0,
            aabb: Aabb::empty(),
        }
    }

    /// Extend this [`Bin`] by a primitive with the given [`Aabb`].
    pub fn add_aabb(&mut self, aabb: &Aabb) {
        self.count += 1;
        self.aabb.join_mut(aabb);
    }
}

/// Enter/exit counting bin used by spatial split binning, where a primitive may span many bins.
#[derive(Clone, Copy, Debug)]
pub struct SpatialBin {
    /// Union of the clipped primitive pieces falling into this bin.
    pub aabb: Aabb,

    /// Number of primitives whose extent starts in this bin.
    pub enter: usize,

    /// Number of primitives whose extent ends in this bin.
    pub exit: usize,
}

impl SpatialBin {
    /// Returns an empty bin.
    pub fn empty() -> SpatialBin {
        SpatialBin {
            aabb: Aabb::empty(),
            enter: 0,
            exit: 0,
        }
    }
}

/// Accumulates the joint bounds and joint centroid bounds over a sequence of
/// `(bounds, centroid)` pairs.
pub fn joint_bounds<'a, I>(items: I) -> (Aabb, Aabb)
where
    I: IntoIterator<Item = (&'a Aabb, &'a Point3)>,
{
    let mut aabb = Aabb::empty();
    let mut centroids = Aabb::empty();
    for (bounds, center) in items {
        aabb.join_mut(bounds);
        centroids.grow_mut(center);
    }
    (aabb, centroids)
}

/// Width of the smallest square texture which can hold `count` texels.
/// Never returns less than 1.
///
/// # Examples
/// ```
/// use scene_bvh::square_texture_width;
///
/// assert_eq!(square_texture_width(0), 1);
/// assert_eq!(square_texture_width(16), 4);
/// assert_eq!(square_texture_width(17), 5);
/// ```
pub fn square_texture_width(count: usize) -> usize {
    let mut width = (count as f64).sqrt().ceil() as usize;
    // Guard against rounding in either direction for large counts.
    while width * width < count {
        width += 1;
    }
    while width > 1 && (width - 1) * (width - 1) >= count {
        width -= 1;
    }
    width.max(1)
}

/// Packs a linear texel index into the renderer's 2D addressing: the column sits above bit
/// 12 and the row occupies the low 12 bits.
///
/// # Examples
/// ```
/// use scene_bvh::pack_texel;
///
/// // Index 10 in a texture of width 4 is row 2, column 2.
/// assert_eq!(pack_texel(10, 4), (2 << 12) | 2);
/// assert_eq!(pack_texel(3, 4) & 0xFFF, 0);
/// ```
pub fn pack_texel(index: usize, width: usize) -> i32 {
    let width = width.max(1);
    (((index % width) << 12) | (index / width)) as i32
}
