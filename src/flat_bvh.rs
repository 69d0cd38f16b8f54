//! This module flattens bottom level and top level [`Bvh`]s into index based node records
//! which can be uploaded to the GPU as textures and traversed iteratively.

use bytemuck::{Pod, Zeroable};
use log::{debug, warn};
use thiserror::Error;

use crate::aabb::Aabb;
use crate::bvh::{Bvh, BvhNode};
use crate::scene::MeshInstance;
use crate::utils::{pack_texel, square_texture_width};
use crate::Vector3;

/// Largest texture width the packed texel encoding can address.
pub const MAX_PACKED_WIDTH: usize = 4096;

/// A node record of the flattened hierarchy.
///
/// Inner nodes of both levels store the flat indices of their children and `leaf == 0`.
/// Bottom level leaves store the offset of their first triangle in the combined index buffer,
/// the triangle count and `leaf == 1`. Top level leaves store the flat index of the
/// referenced mesh's bottom level root, the material id and `leaf == -(instance + 1)`.
#[repr(C)]
#[derive(Debug, Default, Copy, Clone, PartialEq, Eq, Pod, Zeroable)]
pub struct FlatNode {
    pub left_index: i32,
    pub right_index: i32,
    pub leaf: i32,
}

impl FlatNode {
    fn inner(left_index: usize, right_index: usize) -> FlatNode {
        FlatNode {
            left_index: left_index as i32,
            right_index: right_index as i32,
            leaf: 0,
        }
    }

    /// Returns the instance index if this is a top level leaf.
    pub fn instance(&self) -> Option<usize> {
        if self.leaf < 0 {
            Some((-self.leaf - 1) as usize)
        } else {
            None
        }
    }
}

/// Errors raised while flattening a scene.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum TranslateError {
    #[error("top level hierarchy references no instances")]
    EmptyTopLevel,

    #[error("top level hierarchy references instance {instance} which does not exist")]
    UnknownInstance { instance: usize },

    #[error("instance {instance} references mesh {mesh} which does not exist")]
    UnknownMesh { instance: usize, mesh: usize },

    #[error("top level leaves must hold exactly one instance, found {count}")]
    UnsupportedTopLevelLeaf { count: usize },

    #[error("the translator has not processed a scene yet")]
    NotProcessed,

    #[error("top level hierarchy changed from {expected} to {found} nodes")]
    TopologyChanged { expected: usize, found: usize },
}

/// Translates the tree based [`Bvh`] representation of a scene into flat arrays.
///
/// Every mesh's bottom level tree is written in pre-order into its own contiguous range,
/// followed by the top level tree. The bounding boxes of the nodes live in the parallel
/// [`BvhTranslator::bbox_min`] and [`BvhTranslator::bbox_max`] arrays.
///
/// # Examples
///
/// ```
/// use scene_bvh::aabb::Aabb;
/// use scene_bvh::bvh::BvhBuilder;
/// use scene_bvh::flat_bvh::BvhTranslator;
/// use scene_bvh::scene::MeshInstance;
/// use scene_bvh::{Mat4, Point3};
///
/// let triangles = vec![
///     Aabb::with_bounds(Point3::new(0.0, 0.0, 0.0), Point3::new(1.0, 1.0, 0.0)),
///     Aabb::with_bounds(Point3::new(1.0, 0.0, 0.0), Point3::new(2.0, 1.0, 0.0)),
/// ];
/// let blas = BvhBuilder::default().build(&triangles);
/// let instances = vec![MeshInstance::new("quad", 0, Mat4::identity(), 0)];
/// let tlas = BvhBuilder::default().build(&[blas.bounds().transform(&instances[0].transform)]);
///
/// let mut translator = BvhTranslator::new();
/// translator.process(&tlas, &[&blas], &instances).unwrap();
/// assert_eq!(translator.nodes().len(), blas.node_count() + tlas.node_count());
/// assert_eq!(translator.top_level_index(), blas.node_count());
/// ```
#[derive(Debug, Default, Clone)]
pub struct BvhTranslator {
    nodes: Vec<FlatNode>,
    bbox_min: Vec<Vector3>,
    bbox_max: Vec<Vector3>,
    node_tex_width: usize,
    top_level_index: usize,
    top_level_index_packed_xy: i32,
    bvh_root_start_indices: Vec<usize>,
    processed: bool,
}

impl BvhTranslator {
    pub fn new() -> BvhTranslator {
        BvhTranslator::default()
    }

    /// The flattened node records.
    pub fn nodes(&self) -> &[FlatNode] {
        &self.nodes
    }

    /// Minimum corners of the node bounds, indexed like [`BvhTranslator::nodes`].
    pub fn bbox_min(&self) -> &[Vector3] {
        &self.bbox_min
    }

    /// Maximum corners of the node bounds, indexed like [`BvhTranslator::nodes`].
    pub fn bbox_max(&self) -> &[Vector3] {
        &self.bbox_max
    }

    /// Width of the square texture holding the node records.
    pub fn node_tex_width(&self) -> usize {
        self.node_tex_width
    }

    /// Flat index of the top level root.
    pub fn top_level_index(&self) -> usize {
        self.top_level_index
    }

    /// [`pack_texel`] encoding of [`BvhTranslator::top_level_index`].
    pub fn top_level_index_packed_xy(&self) -> i32 {
        self.top_level_index_packed_xy
    }

    /// Flat index of every mesh's bottom level root.
    pub fn bvh_root_start_indices(&self) -> &[usize] {
        &self.bvh_root_start_indices
    }

    /// Texture row at which the top level records start. Rows from here on change on
    /// [`BvhTranslator::update_tlas`].
    pub fn dirty_row(&self) -> usize {
        self.top_level_index / self.node_tex_width.max(1)
    }

    /// Record range from the start of [`BvhTranslator::dirty_row`] to the end.
    pub fn dirty_range(&self) -> std::ops::Range<usize> {
        self.dirty_row() * self.node_tex_width..self.nodes.len()
    }

    pub fn nodes_as_bytes(&self) -> &[u8] {
        bytemuck::cast_slice(&self.nodes)
    }

    pub fn bbox_min_as_bytes(&self) -> &[u8] {
        bytemuck::cast_slice(&self.bbox_min)
    }

    pub fn bbox_max_as_bytes(&self) -> &[u8] {
        bytemuck::cast_slice(&self.bbox_max)
    }

    /// Flattens every mesh's bottom level tree followed by the top level tree.
    ///
    /// `meshes[i]` is the bottom level tree of mesh `i`. The top level tree's primitive
    /// indices refer to `instances`. Nothing is modified if an error is returned.
    pub fn process(
        &mut self,
        top_level: &Bvh,
        meshes: &[&Bvh],
        instances: &[MeshInstance],
    ) -> Result<(), TranslateError> {
        validate_top_level(top_level, instances, meshes.len())?;

        let blas_nodes: usize = meshes.iter().map(|bvh| bvh.node_count()).sum();
        let total = blas_nodes + top_level.node_count();
        self.nodes = Vec::with_capacity(total);
        self.bbox_min = Vec::with_capacity(total);
        self.bbox_max = Vec::with_capacity(total);
        self.bvh_root_start_indices = Vec::with_capacity(meshes.len());

        let mut tri_offset = 0;
        for bvh in meshes {
            self.bvh_root_start_indices.push(self.nodes.len());
            self.flatten_blas(bvh, 0, tri_offset);
            tri_offset += bvh.num_indices();
        }

        self.top_level_index = self.nodes.len();
        self.flatten_tlas(top_level, 0, instances);

        self.node_tex_width = square_texture_width(self.nodes.len());
        if self.node_tex_width > MAX_PACKED_WIDTH {
            warn!(
                "node texture width {} exceeds the addressable width {}",
                self.node_tex_width, MAX_PACKED_WIDTH
            );
        }
        self.top_level_index_packed_xy = pack_texel(self.top_level_index, self.node_tex_width);
        self.processed = true;

        debug!(
            "flattened {} meshes into {} nodes, top level at {}, texture width {}",
            meshes.len(),
            self.nodes.len(),
            self.top_level_index,
            self.node_tex_width
        );
        Ok(())
    }

    /// Rewrites only the top level records, leaving the bottom level ranges untouched.
    ///
    /// The top level tree must have the same number of nodes as the one passed to the last
    /// [`BvhTranslator::process`] call.
    pub fn update_tlas(
        &mut self,
        top_level: &Bvh,
        instances: &[MeshInstance],
    ) -> Result<(), TranslateError> {
        if !self.processed {
            return Err(TranslateError::NotProcessed);
        }
        let expected = self.nodes.len() - self.top_level_index;
        if top_level.node_count() != expected {
            return Err(TranslateError::TopologyChanged {
                expected,
                found: top_level.node_count(),
            });
        }
        validate_top_level(top_level, instances, self.bvh_root_start_indices.len())?;

        self.nodes.truncate(self.top_level_index);
        self.bbox_min.truncate(self.top_level_index);
        self.bbox_max.truncate(self.top_level_index);
        self.flatten_tlas(top_level, 0, instances);
        Ok(())
    }

    /// Logs the flat records at `debug` level.
    pub fn pretty_print(&self) {
        for (i, node) in self.nodes.iter().enumerate() {
            debug!(
                "{}\tleft {}\tright {}\tleaf {}",
                i, node.left_index, node.right_index, node.leaf
            );
        }
    }

    fn push(&mut self, aabb: &Aabb) -> usize {
        let index = self.nodes.len();
        self.nodes.push(FlatNode::default());
        self.bbox_min.push(aabb.min.coords);
        self.bbox_max.push(aabb.max.coords);
        index
    }

    fn flatten_blas(&mut self, bvh: &Bvh, node_index: usize, tri_offset: usize) -> usize {
        let node = &bvh.nodes()[node_index];
        let index = self.push(node.aabb());
        self.nodes[index] = match *node {
            BvhNode::Leaf { start, count, .. } => FlatNode {
                left_index: (tri_offset + start) as i32,
                right_index: count as i32,
                leaf: 1,
            },
            BvhNode::Node {
                child_l_index,
                child_r_index,
                ..
            } => {
                let left = self.flatten_blas(bvh, child_l_index, tri_offset);
                let right = self.flatten_blas(bvh, child_r_index, tri_offset);
                FlatNode::inner(left, right)
            }
        };
        index
    }

    /// Expects a tree accepted by `validate_top_level`.
    fn flatten_tlas(&mut self, bvh: &Bvh, node_index: usize, instances: &[MeshInstance]) -> usize {
        let node = &bvh.nodes()[node_index];
        let index = self.push(node.aabb());
        self.nodes[index] = match *node {
            BvhNode::Leaf { start, .. } => {
                let instance_index = bvh.indices()[start];
                let instance = &instances[instance_index];
                FlatNode {
                    left_index: self.bvh_root_start_indices[instance.mesh_id] as i32,
                    right_index: instance.material_id as i32,
                    leaf: -(instance_index as i32) - 1,
                }
            }
            BvhNode::Node {
                child_l_index,
                child_r_index,
                ..
            } => {
                let left = self.flatten_tlas(bvh, child_l_index, instances);
                let right = self.flatten_tlas(bvh, child_r_index, instances);
                FlatNode::inner(left, right)
            }
        };
        index
    }
}

/// Checks every top level leaf before anything is written.
fn validate_top_level(
    top_level: &Bvh,
    instances: &[MeshInstance],
    num_meshes: usize,
) -> Result<(), TranslateError> {
    if top_level.num_indices() == 0 {
        return Err(TranslateError::EmptyTopLevel);
    }
    for (start, count) in top_level.leaves().filter_map(BvhNode::leaf_range) {
        if count != 1 {
            return Err(TranslateError::UnsupportedTopLevelLeaf { count });
        }
        let instance = top_level.indices()[start];
        let mesh = instances
            .get(instance)
            .ok_or(TranslateError::UnknownInstance { instance })?
            .mesh_id;
        if mesh >= num_meshes {
            return Err(TranslateError::UnknownMesh { instance, mesh });
        }
    }
    Ok(())
}
