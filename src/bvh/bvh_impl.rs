//! This module defines [`Bvh`] and [`BvhBuilder`], the binned SAH object split builder.

use crate::aabb::Aabb;
use crate::bounding_hierarchy::BoundingHierarchy;
use crate::bvh::binned_sah::{
    find_object_split, joint_bounds_of_refs, split_request, BuildState, PrimRef, SplitRequest,
};
use crate::bvh::BvhNode;
use crate::{Real, EPSILON};

use log::debug;
use std::iter::repeat;

/// The [`Bvh`] data structure. Contains the list of [`BvhNode`]s, addressed by index with
/// the root at index 0, and the packed primitive indices referenced by the leaves.
///
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Bvh {
    nodes: Vec<BvhNode>,
    packed_indices: Vec<usize>,
    bounds: Aabb,
    height: usize,
}

impl Bvh {
    /// A tree over no primitives: a single empty leaf.
    pub fn empty() -> Bvh {
        Bvh {
            nodes: vec![BvhNode::empty_leaf(1)],
            packed_indices: Vec::new(),
            bounds: Aabb::empty(),
            height: 0,
        }
    }

    pub(crate) fn from_parts(
        nodes: Vec<BvhNode>,
        packed_indices: Vec<usize>,
        bounds: Aabb,
        height: usize,
    ) -> Bvh {
        Bvh {
            nodes,
            packed_indices,
            bounds,
            height,
        }
    }

    /// Bounds of the root node, the union of all input bounds.
    pub fn bounds(&self) -> &Aabb {
        &self.bounds
    }

    /// Maximum depth of any node, with the root at depth 0.
    pub fn height(&self) -> usize {
        self.height
    }

    /// The packed primitive indices. Every leaf references a contiguous range of this list.
    pub fn indices(&self) -> &[usize] {
        &self.packed_indices
    }

    /// Length of [`Bvh::indices`]. Exceeds the input count when spatial splits duplicated
    /// references.
    pub fn num_indices(&self) -> usize {
        self.packed_indices.len()
    }

    /// All nodes of the tree in construction order.
    pub fn nodes(&self) -> &[BvhNode] {
        &self.nodes
    }

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    /// The root node.
    pub fn root(&self) -> &BvhNode {
        &self.nodes[0]
    }

    /// Iterates over all leaves.
    pub fn leaves(&self) -> impl Iterator<Item = &BvhNode> + '_ {
        self.nodes.iter().filter(|node| node.is_leaf())
    }

    /// Prints the [`Bvh`] in a tree-like visualization at `debug` level.
    pub fn pretty_print(&self) {
        self.print_node(0, 0);
    }

    fn print_node(&self, node_index: usize, depth: usize) {
        let padding: String = repeat(" ").take(depth).collect();
        match self.nodes[node_index] {
            BvhNode::Node {
                aabb,
                tree_index,
                child_l_index,
                child_r_index,
            } => {
                debug!("{}node={} tree_index={} {}", padding, node_index, tree_index, aabb);
                self.print_node(child_l_index, depth + 1);
                self.print_node(child_r_index, depth + 1);
            }
            BvhNode::Leaf {
                aabb,
                start,
                count,
                ..
            } => {
                debug!(
                    "{}leaf={} prims={:?} {}",
                    padding,
                    node_index,
                    &self.packed_indices[start..start + count],
                    aabb
                );
            }
        }
    }

    /// Walks the subtree at `node_index`, checking that every node lies inside
    /// `outer_aabb`, that complete tree addressing holds and that leaves reference valid
    /// primitives. Increases `node_count` by the number of visited nodes.
    fn check_subtree(
        &self,
        node_index: usize,
        outer_aabb: &Aabb,
        expected_tree_index: usize,
        depth: usize,
        node_count: &mut usize,
        bounds: &[Aabb],
    ) -> Result<(), String> {
        *node_count += 1;
        let node = self
            .nodes
            .get(node_index)
            .ok_or_else(|| format!("Node index {} out of range", node_index))?;

        if !outer_aabb.approx_contains_aabb_eps(node.aabb(), EPSILON) {
            return Err(format!(
                "Node {} lies outside the expected bounds.\n\tBounds: {}\n\tNode: {}",
                node_index,
                outer_aabb,
                node.aabb()
            ));
        }
        if node.tree_index() != expected_tree_index {
            return Err(format!(
                "Wrong tree index for node {}. Expected: {}; Actual: {}",
                node_index,
                expected_tree_index,
                node.tree_index()
            ));
        }
        if depth > self.height {
            return Err(format!(
                "Node {} at depth {} exceeds the tree height {}",
                node_index, depth, self.height
            ));
        }

        match *node {
            BvhNode::Node {
                aabb,
                child_l_index,
                child_r_index,
                ..
            } => {
                self.check_subtree(
                    child_l_index,
                    &aabb,
                    expected_tree_index.wrapping_mul(2),
                    depth + 1,
                    node_count,
                    bounds,
                )?;
                self.check_subtree(
                    child_r_index,
                    &aabb,
                    expected_tree_index.wrapping_mul(2).wrapping_add(1),
                    depth + 1,
                    node_count,
                    bounds,
                )
            }
            BvhNode::Leaf {
                aabb, start, count, ..
            } => {
                let prims = self.packed_indices.get(start..start + count).ok_or_else(|| {
                    format!("Leaf {} references indices out of range", node_index)
                })?;
                // Without duplicated references nothing was clipped, so leaves hold whole
                // primitives. Clipped references only have to touch the leaf.
                let clipped = self.packed_indices.len() != bounds.len();
                for &prim in prims {
                    let prim_aabb = bounds.get(prim).ok_or_else(|| {
                        format!("Leaf {} references unknown primitive {}", node_index, prim)
                    })?;
                    let inside = if clipped {
                        prim_aabb.is_empty() || !prim_aabb.intersection(&aabb).is_empty()
                    } else {
                        aabb.approx_contains_aabb_eps(prim_aabb, EPSILON)
                    };
                    if !inside {
                        return Err(format!(
                            "Primitive {} lies outside of leaf {}.\n\tLeaf: {}\n\tPrimitive: {}",
                            prim, node_index, aabb, prim_aabb
                        ));
                    }
                }
                Ok(())
            }
        }
    }

    fn check(&self, bounds: &[Aabb]) -> Result<(), String> {
        // The root node of the bvh is not bounded by anything.
        let space = Aabb::with_bounds(
            crate::Point3::new(Real::NEG_INFINITY, Real::NEG_INFINITY, Real::NEG_INFINITY),
            crate::Point3::new(Real::INFINITY, Real::INFINITY, Real::INFINITY),
        );

        if !self.bounds.relative_eq(self.root().aabb(), EPSILON) {
            return Err(format!(
                "Root bounds {} differ from tree bounds {}",
                self.root().aabb(),
                self.bounds
            ));
        }

        let mut node_count = 0;
        self.check_subtree(0, &space, 1, 0, &mut node_count, bounds)?;

        // If not every node was reached from the root, there is a detached subtree.
        if node_count != self.nodes.len() {
            return Err(format!(
                "Detached subtree: reached {} of {} nodes",
                node_count,
                self.nodes.len()
            ));
        }

        let mut seen = vec![false; bounds.len()];
        for &prim in &self.packed_indices {
            if let Some(flag) = seen.get_mut(prim) {
                *flag = true;
            }
        }
        if let Some(missing) = seen.iter().position(|s| !s) {
            return Err(format!("Primitive {} is not referenced by any leaf", missing));
        }
        Ok(())
    }

    /// Checks that the bounding hierarchy is nested, that every node is reachable from the
    /// root and that every primitive in `bounds` is referenced by some leaf.
    pub fn is_consistent(&self, bounds: &[Aabb]) -> bool {
        self.check(bounds).is_ok()
    }

    /// Assert version of [`Bvh::is_consistent`].
    pub fn assert_consistent(&self, bounds: &[Aabb]) {
        if let Err(message) = self.check(bounds) {
            panic!("{}", message);
        }
    }
}

/// Binned SAH builder producing object split [`Bvh`]s, used for the scene level tree.
///
/// Without SAH, nodes are split at the centroid-bound center along the widest axis until
/// every leaf holds a single primitive.
///
/// # Examples
/// ```
/// use scene_bvh::aabb::Aabb;
/// use scene_bvh::bvh::BvhBuilder;
/// use scene_bvh::Point3;
///
/// let bounds = vec![
///     Aabb::with_bounds(Point3::new(0.0, 0.0, 0.0), Point3::new(1.0, 1.0, 1.0)),
///     Aabb::with_bounds(Point3::new(3.0, 0.0, 0.0), Point3::new(4.0, 1.0, 1.0)),
/// ];
/// let bvh = BvhBuilder::new(10.0, 64, false).build(&bounds);
/// assert_eq!(bvh.node_count(), 3);
/// assert_eq!(bvh.height(), 1);
/// ```
#[derive(Debug, Copy, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct BvhBuilder {
    /// Constant cost of traversing an inner node, relative to intersecting one primitive.
    pub traversal_cost: Real,

    /// Number of centroid bins per axis.
    pub num_bins: usize,

    /// Use the surface area heuristic to place the split plane.
    pub use_sah: bool,

    /// Cost-based early leaf creation is only considered for ranges smaller than this.
    pub max_leaf_size: usize,
}

impl Default for BvhBuilder {
    fn default() -> BvhBuilder {
        BvhBuilder::new(10.0, 64, false)
    }
}

impl BvhBuilder {
    pub fn new(traversal_cost: Real, num_bins: usize, use_sah: bool) -> BvhBuilder {
        BvhBuilder {
            traversal_cost,
            num_bins,
            use_sah,
            max_leaf_size: 1,
        }
    }

    pub fn with_max_leaf_size(mut self, max_leaf_size: usize) -> BvhBuilder {
        self.max_leaf_size = max_leaf_size;
        self
    }

    /// Builds a [`Bvh`] over `bounds`.
    pub fn build(&self, bounds: &[Aabb]) -> Bvh {
        if bounds.is_empty() {
            return Bvh::empty();
        }

        let mut refs: Vec<PrimRef> = bounds
            .iter()
            .enumerate()
            .map(|(index, aabb)| PrimRef::new(*aabb, index))
            .collect();
        let (aabb, centroid_bounds) = joint_bounds_of_refs(&refs);

        let mut state = BuildState::with_capacity(2 * bounds.len() - 1, bounds.len());
        let request = SplitRequest::root(bounds.len(), aabb, centroid_bounds);
        self.build_node(&mut state, &mut refs, request);

        debug!(
            "bvh: {} primitives, {} nodes, height {}",
            bounds.len(),
            state.nodes.len(),
            state.height
        );
        state.finish(aabb)
    }

    fn build_node(
        &self,
        state: &mut BuildState,
        refs: &mut [PrimRef],
        request: SplitRequest,
    ) -> usize {
        let node_index = state.allocate(&request);

        if request.count < 2 {
            state.make_leaf(node_index, &request, refs);
            return node_index;
        }

        let mut axis = request.centroid_bounds.largest_axis();
        let mut border = request.centroid_bounds.center()[axis];

        if self.use_sah {
            if let Some(split) = find_object_split(
                &refs[request.range()],
                &request.bounds,
                &request.centroid_bounds,
                self.num_bins,
                self.traversal_cost,
            ) {
                axis = split.axis;
                border = split.position;

                // Compares a primitive count against an area weighted cost. The units do not
                // match, but the resulting tree shapes are relied upon downstream.
                if (request.count as Real) < split.cost && request.count < self.max_leaf_size {
                    state.make_leaf(node_index, &request, refs);
                    return node_index;
                }
            }
        }

        let (left, right) = split_request(refs, &request, axis, border);
        let child_l_index = self.build_node(state, refs, left);
        let child_r_index = self.build_node(state, refs, right);
        state.make_node(node_index, &request, child_l_index, child_r_index);
        node_index
    }
}

impl BoundingHierarchy for BvhBuilder {
    fn build(&self, bounds: &[Aabb]) -> Bvh {
        BvhBuilder::build(self, bounds)
    }
}

#[cfg(test)]
mod tests {
    use crate::aabb::Aabb;
    use crate::axis::Axis;
    use crate::bvh::{Bvh, BvhBuilder, BvhNode};
    use crate::testbase::{
        aabbs_small_strategy, build_1200_triangles_bounds, generate_aligned_boxes,
        leaf_partition, quad_triangle_bounds, random_unit_cubes, union_of, unit_box_at,
    };
    use crate::{Point3, Vector3};
    use proptest::prelude::*;

    #[test]
    /// Tests whether the building procedure succeeds in not failing.
    fn test_build_bvh() {
        let boxes = generate_aligned_boxes();
        let bvh = BvhBuilder::default().build(&boxes);
        bvh.assert_consistent(&boxes);
        assert_eq!(bvh.leaves().count(), boxes.len());
        assert_eq!(bvh.node_count(), 2 * boxes.len() - 1);
    }

    #[test]
    /// The root bounds are the union of all input bounds.
    fn test_root_bounds_are_union() {
        let bounds = build_1200_triangles_bounds();
        let expected = bounds.iter().fold(Aabb::empty(), |acc, b| acc.join(b));
        for use_sah in [false, true] {
            let bvh = BvhBuilder::new(10.0, 64, use_sah).build(&bounds);
            assert_eq!(*bvh.bounds(), expected);
            assert_eq!(*bvh.root().aabb(), expected);
        }
    }

    #[test]
    /// The packed indices are a permutation of the input indices.
    fn test_indices_are_permutation() {
        let bounds = build_1200_triangles_bounds();
        let bvh = BvhBuilder::new(10.0, 64, true).build(&bounds);
        bvh.assert_consistent(&bounds);

        let mut indices = bvh.indices().to_vec();
        indices.sort_unstable();
        assert_eq!(indices, (0..bounds.len()).collect::<Vec<_>>());
    }

    #[test]
    /// Building the same input twice yields the same tree.
    fn test_build_is_deterministic() {
        let bounds = random_unit_cubes(500, 7);
        let builder = BvhBuilder::new(10.0, 64, true);
        let a = builder.build(&bounds);
        let b = builder.build(&bounds);
        assert_eq!(a, b);
        assert_eq!(leaf_partition(&a), leaf_partition(&b));
        assert_eq!(a.height(), b.height());
    }

    #[test]
    /// A single primitive yields a tree of height 0 with one leaf.
    fn test_single_primitive() {
        let bounds = vec![unit_box_at(Point3::new(1.0, 2.0, 3.0))];
        let bvh = BvhBuilder::new(10.0, 64, true).build(&bounds);
        assert_eq!(bvh.height(), 0);
        assert_eq!(bvh.node_count(), 1);
        assert_eq!(bvh.root().leaf_range(), Some((0, 1)));
        assert_eq!(bvh.indices(), &[0]);
    }

    #[test]
    /// No primitives yield a single empty leaf.
    fn test_empty_input() {
        let bvh = BvhBuilder::default().build(&[]);
        assert_eq!(bvh, Bvh::empty());
        assert_eq!(bvh.node_count(), 1);
        assert_eq!(bvh.root().leaf_range(), Some((0, 0)));
        assert!(bvh.bounds().is_empty());
        bvh.assert_consistent(&[]);
    }

    #[test]
    /// Identical primitives terminate through the median split.
    fn test_identical_primitives() {
        let bounds = vec![unit_box_at(Point3::new(0.0, 0.0, 0.0)); 100];
        for use_sah in [false, true] {
            let bvh = BvhBuilder::new(10.0, 64, use_sah).build(&bounds);
            bvh.assert_consistent(&bounds);
            assert_eq!(bvh.leaves().count(), 100);
            // Halving 100 references needs 7 levels.
            assert_eq!(bvh.height(), 7);
        }
    }

    #[test]
    /// Both halves of a quad share its bounding box, so their centroids coincide and the
    /// median split keeps them in input order, one per leaf.
    fn test_quad_without_sah() {
        let bounds = quad_triangle_bounds();
        let bvh = BvhBuilder::new(10.0, 64, false).build(&bounds);
        bvh.assert_consistent(&bounds);

        let inner: Vec<&BvhNode> = bvh.nodes().iter().filter(|n| !n.is_leaf()).collect();
        assert_eq!(inner.len(), 1);
        assert_eq!(bvh.height(), 1);

        let (l, r) = bvh.root().children().unwrap();
        assert_eq!(bvh.nodes()[l].leaf_range(), Some((0, 1)));
        assert_eq!(bvh.nodes()[r].leaf_range(), Some((1, 1)));
        assert_eq!(bvh.indices(), &[0, 1]);
        assert_eq!(bvh.nodes()[l].aabb(), bvh.root().aabb());
        assert_eq!(bvh.nodes()[r].aabb(), bvh.root().aabb());
    }

    #[test]
    /// Two quads side by side along X are separated at the plane between them.
    fn test_quad_strip_splits_along_x() {
        let mut bounds = quad_triangle_bounds();
        let shifted: Vec<Aabb> = bounds
            .iter()
            .map(|aabb| {
                let offset = Vector3::new(2.0, 0.0, 0.0);
                Aabb::with_bounds(aabb.min + offset, aabb.max + offset)
            })
            .collect();
        bounds.extend(shifted);

        for use_sah in [false, true] {
            let bvh = BvhBuilder::new(10.0, 64, use_sah).build(&bounds);
            bvh.assert_consistent(&bounds);

            let (l, r) = bvh.root().children().unwrap();
            let (left, right) = (bvh.nodes()[l].aabb(), bvh.nodes()[r].aabb());
            // The children touch at x = 2 and keep the full Y and Z extent.
            let (low, high) = if left.min.x < right.min.x {
                (left, right)
            } else {
                (right, left)
            };
            assert_eq!((low.min.x, low.max.x), (0.0, 2.0));
            assert_eq!((high.min.x, high.max.x), (2.0, 4.0));
            assert_eq!((low.min.y, low.max.y), (0.0, 1.0));
            assert_eq!((high.min.y, high.max.y), (0.0, 1.0));
            assert_eq!(leaf_partition(&bvh).concat().len(), bounds.len());
            assert_eq!(bvh.root().aabb().largest_axis(), Axis::X);
        }
    }

    #[test]
    /// 10k uniformly distributed cubes stay balanced under SAH.
    fn test_height_is_logarithmic() {
        let n = 10_000;
        let bounds = random_unit_cubes(n, 42);
        let bvh = BvhBuilder::new(1.0, 64, true).build(&bounds);
        bvh.assert_consistent(&bounds);
        let bound = 2 * (n as f64).log2().ceil() as usize + 4;
        assert!(bvh.height() <= bound, "height {} > {}", bvh.height(), bound);
    }

    #[test]
    /// Children are addressed as 2i and 2i+1 of their parent.
    fn test_tree_indices() {
        let boxes = generate_aligned_boxes();
        let bvh = BvhBuilder::new(10.0, 64, true).build(&boxes);
        for node in bvh.nodes() {
            if let Some((l, r)) = node.children() {
                assert_eq!(bvh.nodes()[l].tree_index(), node.tree_index() * 2);
                assert_eq!(bvh.nodes()[r].tree_index(), node.tree_index() * 2 + 1);
            }
        }
        assert_eq!(bvh.root().tree_index(), 1);
    }

    proptest! {
        // Any non-empty input yields a nested tree whose root bounds are the union of the
        // input and whose packed indices are a permutation of the input indices.
        #[test]
        fn test_build_arbitrary_bounds(bounds in aabbs_small_strategy(), use_sah: bool) {
            let bvh = BvhBuilder::new(10.0, 64, use_sah).build(&bounds);
            bvh.assert_consistent(&bounds);
            prop_assert_eq!(*bvh.bounds(), union_of(&bounds));
            prop_assert_eq!(*bvh.root().aabb(), union_of(&bounds));

            let mut indices = bvh.indices().to_vec();
            indices.sort_unstable();
            prop_assert_eq!(indices, (0..bounds.len()).collect::<Vec<_>>());
        }
    }

    #[test]
    /// A large leaf size lets the cost heuristic stop early for expensive splits.
    fn test_max_leaf_size_allows_early_leaves() {
        // Fully overlapping boxes with distinct centroids make every split expensive.
        let bounds: Vec<Aabb> = (0..4)
            .map(|i| {
                let d = i as f32 * 0.01;
                Aabb::with_bounds(
                    Point3::new(-10.0 + d, -10.0, -10.0),
                    Point3::new(10.0 + d, 10.0, 10.0),
                )
            })
            .collect();
        let bvh = BvhBuilder::new(10.0, 64, true)
            .with_max_leaf_size(8)
            .build(&bounds);
        bvh.assert_consistent(&bounds);
        assert_eq!(bvh.node_count(), 1);
        assert_eq!(bvh.root().leaf_range(), Some((0, 4)));
    }
}
