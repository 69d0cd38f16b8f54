//! A crate which builds bounding volume hierarchies for ray tracing scenes and flattens them
//! into GPU-friendly texture arrays.
//!
//! ## About
//!
//! Scenes are made of meshes, each of which gets its own bottom level hierarchy (BLAS), and
//! mesh instances, which are bounded by a single top level hierarchy (TLAS). Bottom level
//! trees are built with a spatial split builder ([`SplitBvhBuilder`]) which clips triangle
//! bounds to reduce node overlap. The top level tree is built with the plain binned builder
//! ([`BvhBuilder`]). The [`BvhTranslator`] then flattens both levels into parallel node and
//! bounding box arrays laid out as square textures, so a shader can traverse them
//! iteratively.
//!
//! The [`Scene`] ties everything together: it loads assets on a [`TaskThreadPool`], builds
//! one BLAS per mesh in parallel, builds the TLAS, translates both, and packs the triangle
//! data into combined buffers.
//!
//! ## Example
//!
//! ```
//! use scene_bvh::aabb::Aabb;
//! use scene_bvh::bvh::BvhBuilder;
//! use scene_bvh::Point3;
//!
//! let bounds: Vec<Aabb> = (0..100)
//!     .map(|i| {
//!         let p = Point3::new(i as f32, 0.0, 0.0);
//!         Aabb::with_bounds(p, p + scene_bvh::Vector3::new(1.0, 1.0, 1.0))
//!     })
//!     .collect();
//!
//! let bvh = BvhBuilder::default().build(&bounds);
//! assert_eq!(bvh.num_indices(), 100);
//! bvh.assert_consistent(&bounds);
//! ```
//!
//! ## Features
//!
//! - `serde` (default **disabled**) - adds `Serialize` and `Deserialize` implementations for
//!   the bounding box, node and builder configuration types
//!

/// Point math type used by this crate. Type alias for [`nalgebra::Point3`].
pub type Point3 = nalgebra::Point3<f32>;

/// Vector math type used by this crate. Type alias for [`nalgebra::Vector3`].
pub type Vector3 = nalgebra::Vector3<f32>;

/// Four component vector, used for vertex data with a packed texture coordinate.
pub type Vector4 = nalgebra::Vector4<f32>;

/// Matrix math type used by this crate. Type alias for [`nalgebra::Matrix4`].
pub type Mat4 = nalgebra::Matrix4<f32>;

/// Float type used by this crate
pub type Real = f32;

/// A minimal floating value used as a lower bound.
pub const EPSILON: Real = 0.00001;

pub mod aabb;
pub mod axis;
pub mod bounding_hierarchy;
pub mod bvh;
pub mod flat_bvh;
pub mod job;
pub mod scene;
mod utils;

#[cfg(test)]
mod testbase;

pub use crate::bvh::{Bvh, BvhBuilder, SplitBvhBuilder};
pub use crate::flat_bvh::BvhTranslator;
pub use crate::job::TaskThreadPool;
pub use crate::scene::Scene;
pub use crate::utils::{pack_texel, square_texture_width};
