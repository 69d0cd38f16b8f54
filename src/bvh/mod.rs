//! This module defines [`Bvh`], the tree produced by both builders, together with the
//! [`BvhBuilder`] object split builder and the [`SplitBvhBuilder`] spatial split builder.
//!

mod binned_sah;
mod bvh_impl;
mod bvh_node;
mod split_bvh;

pub use self::bvh_impl::*;
pub use self::bvh_node::*;
pub use self::split_bvh::*;
