//! Spatial split BVH builder.
//!
//! Extends the binned object split with spatial splits: when the best object split leaves
//! children whose boxes overlap too much, primitive bounds are clipped at a plane and the
//! references straddling it are duplicated into both children. This trades extra
//! references for tighter nodes, which pays off for meshes with long, thin triangles.

use crate::aabb::Aabb;
use crate::axis::Axis;
use crate::bounding_hierarchy::BoundingHierarchy;
use crate::bvh::binned_sah::{
    find_object_split, joint_bounds_of_refs, split_request, BuildState, PrimRef, SahSplit,
    SplitRequest,
};
use crate::bvh::Bvh;
use crate::utils::SpatialBin;
use crate::Real;

use log::debug;

/// Number of bins used per axis when searching for a spatial split.
pub const NUM_SPATIAL_BINS: usize = 128;

/// Builder for spatial split [`Bvh`]s, used for per-mesh trees.
///
/// # Examples
/// ```
/// use scene_bvh::aabb::Aabb;
/// use scene_bvh::bvh::SplitBvhBuilder;
/// use scene_bvh::Point3;
///
/// // Two long diagonal slivers whose boxes overlap almost completely.
/// let bounds = vec![
///     Aabb::with_bounds(Point3::new(0.0, 0.0, 0.0), Point3::new(10.0, 10.0, 0.1)),
///     Aabb::with_bounds(Point3::new(0.5, 0.0, 0.0), Point3::new(10.5, 10.0, 0.1)),
/// ];
/// let bvh = SplitBvhBuilder::default().build(&bounds);
/// bvh.assert_consistent(&bounds);
/// assert!(bvh.num_indices() >= 2);
/// ```
#[derive(Debug, Copy, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct SplitBvhBuilder {
    /// Constant cost of traversing an inner node, relative to intersecting one primitive.
    pub traversal_cost: Real,

    /// Number of centroid bins per axis for the object split.
    pub num_bins: usize,

    /// Spatial splits are only attempted above this depth.
    pub max_split_depth: usize,

    /// Spatial splits are only attempted when the object split children overlap by more
    /// than this fraction of the parent's surface area.
    pub min_overlap: Real,

    /// Fraction of extra nodes and references spatial splits may add on top of a plain build.
    pub extra_refs_budget: Real,
}

impl Default for SplitBvhBuilder {
    fn default() -> SplitBvhBuilder {
        SplitBvhBuilder {
            traversal_cost: 2.0,
            num_bins: 64,
            max_split_depth: 48,
            min_overlap: 0.001,
            extra_refs_budget: 2.5,
        }
    }
}

/// Per-build bookkeeping for the node and reference budgets.
struct SplitState {
    base: BuildState,
    nodes_required: usize,
    refs_allowed: usize,
    total_refs: usize,
    spatial_splits: usize,
}

impl SplitBvhBuilder {
    pub fn new(
        traversal_cost: Real,
        num_bins: usize,
        max_split_depth: usize,
        min_overlap: Real,
        extra_refs_budget: Real,
    ) -> SplitBvhBuilder {
        SplitBvhBuilder {
            traversal_cost,
            num_bins,
            max_split_depth,
            min_overlap,
            extra_refs_budget,
        }
    }

    /// Builds a [`Bvh`] over `bounds`. Leaves may reference the same primitive more than
    /// once, each time for a different clipped piece of its bounds.
    pub fn build(&self, bounds: &[Aabb]) -> Bvh {
        if bounds.is_empty() {
            return Bvh::empty();
        }

        let count = bounds.len();
        let mut refs: Vec<PrimRef> = bounds
            .iter()
            .enumerate()
            .map(|(index, aabb)| PrimRef::new(*aabb, index))
            .collect();
        let (aabb, centroid_bounds) = joint_bounds_of_refs(&refs);

        let regular_nodes = 2 * count - 1;
        let budget = 1.0 + self.extra_refs_budget.max(0.0);
        let nodes_required = (regular_nodes as Real * budget) as usize;
        let mut state = SplitState {
            base: BuildState::with_capacity(nodes_required, count),
            nodes_required,
            refs_allowed: (count as Real * budget) as usize,
            total_refs: count,
            spatial_splits: 0,
        };

        let request = SplitRequest::root(count, aabb, centroid_bounds);
        self.build_node(&mut state, &mut refs, request);

        debug!(
            "split bvh: {} primitives, {} references, {} spatial splits, {} nodes, height {}",
            count,
            state.base.packed_indices.len(),
            state.spatial_splits,
            state.base.nodes.len(),
            state.base.height
        );
        state.base.finish(aabb)
    }

    fn build_node(
        &self,
        state: &mut SplitState,
        refs: &mut Vec<PrimRef>,
        mut request: SplitRequest,
    ) -> usize {
        let node_index = state.base.allocate(&request);

        if request.count < 2 {
            state.base.make_leaf(node_index, &request, refs);
            return node_index;
        }

        let mut axis = request.centroid_bounds.largest_axis();
        let mut border = request.centroid_bounds.center()[axis];

        let object = find_object_split(
            &refs[request.range()],
            &request.bounds,
            &request.centroid_bounds,
            self.num_bins,
            self.traversal_cost,
        );

        let mut spatial = None;
        if let Some(object) = object {
            if request.depth < self.max_split_depth
                && state.base.nodes.len() < state.nodes_required
                && state.total_refs < state.refs_allowed
                && object.overlap > self.min_overlap
            {
                spatial = find_spatial_split(
                    &refs[request.range()],
                    &request.bounds,
                    self.traversal_cost,
                )
                .filter(|spatial| spatial.cost < object.cost);
            }
        }

        match (spatial, object) {
            (Some(spatial), _) => {
                let extra = split_prim_refs(refs, &request, spatial.axis, spatial.position);
                request.count += extra;
                state.total_refs += extra;
                state.spatial_splits += 1;
                request.centroid_bounds = joint_bounds_of_refs(&refs[request.range()]).1;
                axis = spatial.axis;
                border = spatial.position;
            }
            (None, Some(object)) => {
                axis = object.axis;
                border = object.position;
            }
            (None, None) => {}
        }

        let (left, right) = split_request(refs, &request, axis, border);

        // The right subtree first: the left child may append clipped references over the
        // right child's range, which is only safe once that range has been consumed.
        let child_r_index = self.build_node(state, refs, right);
        let child_l_index = self.build_node(state, refs, left);
        state.base.make_node(node_index, &request, child_l_index, child_r_index);
        node_index
    }
}

impl BoundingHierarchy for SplitBvhBuilder {
    fn build(&self, bounds: &[Aabb]) -> Bvh {
        SplitBvhBuilder::build(self, bounds)
    }
}

/// Spatial SAH over [`NUM_SPATIAL_BINS`] bins spanning the node bounds on each axis.
/// Primitive bounds are clipped into every bin they cross and counted once on entry and
/// once on exit.
fn find_spatial_split(refs: &[PrimRef], bounds: &Aabb, traversal_cost: Real) -> Option<SahSplit> {
    let extents = bounds.size();
    if extents.dot(&extents) == 0.0 {
        return None;
    }

    let inv_area = 1.0 / bounds.surface_area();
    let origin = bounds.min;
    let bin_size = extents / NUM_SPATIAL_BINS as Real;
    let last_bin = (NUM_SPATIAL_BINS - 1) as Real;

    let mut bins = [[SpatialBin::empty(); NUM_SPATIAL_BINS]; 3];

    for r in refs {
        for axis in Axis::ALL {
            if extents[axis] == 0.0 {
                continue;
            }
            let first = ((r.aabb.min[axis] - origin[axis]) / bin_size[axis])
                .max(0.0)
                .min(last_bin);
            let last = ((r.aabb.max[axis] - origin[axis]) / bin_size[axis])
                .max(first)
                .min(last_bin);
            let (first, last) = (first as usize, last as usize);

            let mut rest = *r;
            for j in first..last {
                let plane = origin[axis] + bin_size[axis] * (j + 1) as Real;
                if let Some((piece, remainder)) = rest.split(axis, plane) {
                    bins[axis.index()][j].aabb.join_mut(&piece.aabb);
                    rest = remainder;
                }
            }
            bins[axis.index()][last].aabb.join_mut(&rest.aabb);
            bins[axis.index()][first].enter += 1;
            bins[axis.index()][last].exit += 1;
        }
    }

    let mut best: Option<SahSplit> = None;
    let mut best_cost = Real::MAX;
    let mut right_bounds = [Aabb::empty(); NUM_SPATIAL_BINS - 1];

    for axis in Axis::ALL {
        if extents[axis] == 0.0 {
            continue;
        }
        let axis_bins = &bins[axis.index()];

        let mut right_box = Aabb::empty();
        for i in (1..NUM_SPATIAL_BINS).rev() {
            right_box.join_mut(&axis_bins[i].aabb);
            right_bounds[i - 1] = right_box;
        }

        let mut left_box = Aabb::empty();
        let mut left_count = 0;
        let mut right_count = refs.len();
        for i in 1..NUM_SPATIAL_BINS {
            left_box.join_mut(&axis_bins[i - 1].aabb);
            left_count += axis_bins[i - 1].enter;
            right_count -= axis_bins[i - 1].exit;
            if left_count == 0 || right_count == 0 {
                continue;
            }

            let cost = traversal_cost
                + (left_count as Real * left_box.surface_area()
                    + right_count as Real * right_bounds[i - 1].surface_area())
                    * inv_area;
            if cost < best_cost {
                best_cost = cost;
                best = Some(SahSplit {
                    axis,
                    position: origin[axis] + bin_size[axis] * i as Real,
                    cost,
                    // Clipped children touch at the plane but never overlap.
                    overlap: 0.0,
                });
            }
        }
    }

    best
}

/// Clips every reference of the request straddling `position`. The left piece replaces the
/// reference in place and the right piece is appended after the request's range.
/// Returns the number of appended references.
fn split_prim_refs(
    refs: &mut Vec<PrimRef>,
    request: &SplitRequest,
    axis: Axis,
    position: Real,
) -> usize {
    let needed = request.start + request.count * 2;
    if refs.len() < needed {
        refs.resize(needed, PrimRef::new(Aabb::empty(), usize::MAX));
    }

    let mut appended = request.count;
    for i in request.range() {
        if let Some((left, right)) = refs[i].split(axis, position) {
            refs[i] = left;
            refs[request.start + appended] = right;
            appended += 1;
        }
    }
    appended - request.count
}
