//! Building blocks shared by [`BvhBuilder`] and [`SplitBvhBuilder`]: primitive references,
//! split requests, the binned object SAH search and the in-place two-pointer partition.
//!
//! [`BvhBuilder`]: super::BvhBuilder
//! [`SplitBvhBuilder`]: super::SplitBvhBuilder

use crate::aabb::Aabb;
use crate::axis::Axis;
use crate::bvh::{Bvh, BvhNode};
use crate::utils::{joint_bounds, Bin};
use crate::{Point3, Real};

/// A primitive reference: the bounds being partitioned, their centroid and the index of the
/// input primitive they stand for. Spatial splits produce several references with the same
/// `index` and trimmed bounds.
#[derive(Debug, Copy, Clone, PartialEq)]
pub(crate) struct PrimRef {
    pub aabb: Aabb,
    pub center: Point3,
    pub index: usize,
}

impl PrimRef {
    pub fn new(aabb: Aabb, index: usize) -> PrimRef {
        PrimRef {
            aabb,
            center: aabb.center(),
            index,
        }
    }

    /// Clips this reference at `position` along `axis`. Returns `None` unless the plane lies
    /// strictly inside the bounds.
    pub fn split(&self, axis: Axis, position: Real) -> Option<(PrimRef, PrimRef)> {
        if position > self.aabb.min[axis] && position < self.aabb.max[axis] {
            let mut left = self.aabb;
            let mut right = self.aabb;
            left.max[axis] = position;
            right.min[axis] = position;
            Some((PrimRef::new(left, self.index), PrimRef::new(right, self.index)))
        } else {
            None
        }
    }
}

/// Joint bounds and joint centroid bounds of `refs`.
pub(crate) fn joint_bounds_of_refs(refs: &[PrimRef]) -> (Aabb, Aabb) {
    joint_bounds(refs.iter().map(|r| (&r.aabb, &r.center)))
}

/// A pending subtree build over `refs[start..start + count]`.
#[derive(Debug, Copy, Clone)]
pub(crate) struct SplitRequest {
    pub start: usize,
    pub count: usize,
    pub bounds: Aabb,
    pub centroid_bounds: Aabb,
    pub depth: usize,
    pub tree_index: usize,
}

impl SplitRequest {
    pub fn root(count: usize, bounds: Aabb, centroid_bounds: Aabb) -> SplitRequest {
        SplitRequest {
            start: 0,
            count,
            bounds,
            centroid_bounds,
            depth: 0,
            tree_index: 1,
        }
    }

    pub fn range(&self) -> std::ops::Range<usize> {
        self.start..self.start + self.count
    }
}

/// Result of a SAH search.
#[derive(Debug, Copy, Clone, PartialEq)]
pub(crate) struct SahSplit {
    pub axis: Axis,
    /// Coordinate of the splitting plane along `axis`.
    pub position: Real,
    pub cost: Real,
    /// Surface area of the children's overlap relative to the parent.
    pub overlap: Real,
}

/// Binned object SAH over the centroids of `refs`.
///
/// Returns `None` when the centroid bounds are degenerate on every axis, or when no
/// candidate boundary yields a finite cost with primitives on both sides.
pub(crate) fn find_object_split(
    refs: &[PrimRef],
    bounds: &Aabb,
    centroid_bounds: &Aabb,
    num_bins: usize,
    traversal_cost: Real,
) -> Option<SahSplit> {
    let num_bins = num_bins.max(2);
    let extents = centroid_bounds.size();
    if extents.dot(&extents) == 0.0 {
        return None;
    }

    let inv_area = 1.0 / bounds.surface_area();
    let root_min = centroid_bounds.min;

    let mut best: Option<(SahSplit, usize)> = None;
    let mut best_cost = Real::MAX;
    let mut bins = vec![Bin::empty(); num_bins];
    let mut right_bounds = vec![Aabb::empty(); num_bins - 1];

    for axis in Axis::ALL {
        let range = extents[axis];
        if range == 0.0 {
            continue;
        }
        let inv_range = 1.0 / range;

        bins.fill(Bin::empty());
        for r in refs {
            let relative = (r.center[axis] - root_min[axis]) * inv_range;
            let bin = (num_bins as Real * relative).min((num_bins - 1) as Real) as usize;
            bins[bin].add_aabb(&r.aabb);
        }

        let mut right_box = Aabb::empty();
        for i in (1..num_bins).rev() {
            right_box.join_mut(&bins[i].aabb);
            right_bounds[i - 1] = right_box;
        }

        let mut left_box = Aabb::empty();
        let mut left_count = 0;
        let mut right_count = refs.len();
        for i in 0..num_bins - 1 {
            left_box.join_mut(&bins[i].aabb);
            left_count += bins[i].count;
            right_count -= bins[i].count;
            if left_count == 0 || right_count == 0 {
                continue;
            }

            let cost = traversal_cost
                + (left_count as Real * left_box.surface_area()
                    + right_count as Real * right_bounds[i].surface_area())
                    * inv_area;
            if cost < best_cost {
                best_cost = cost;
                let overlap = left_box.intersection(&right_bounds[i]).surface_area() * inv_area;
                best = Some((
                    SahSplit {
                        axis,
                        position: 0.0,
                        cost,
                        overlap,
                    },
                    i,
                ));
            }
        }
    }

    best.map(|(mut split, bin)| {
        let axis = split.axis;
        split.position = root_min[axis] + (bin + 1) as Real * (extents[axis] / num_bins as Real);
        split
    })
}

/// Outcome of partitioning a range of references around a plane.
#[derive(Debug, Copy, Clone)]
pub(crate) struct Partition {
    /// Number of references placed in the left child.
    pub split: usize,
    pub left: Aabb,
    pub left_centroids: Aabb,
    pub right: Aabb,
    pub right_centroids: Aabb,
}

/// Two-pointer in-place partition of `refs` around `border` along `axis`, accumulating the
/// children's bounds during the scan. `near_to_far` selects which side of the plane goes
/// to the front of the range.
pub(crate) fn partition(
    refs: &mut [PrimRef],
    axis: Axis,
    border: Real,
    near_to_far: bool,
) -> Partition {
    type Cmp = fn(Real, Real) -> bool;
    let (cmp1, cmp2): (Cmp, Cmp) = if near_to_far {
        (|a, b| a < b, |a, b| a >= b)
    } else {
        (|a, b| a >= b, |a, b| a < b)
    };

    let mut result = Partition {
        split: 0,
        left: Aabb::empty(),
        left_centroids: Aabb::empty(),
        right: Aabb::empty(),
        right_centroids: Aabb::empty(),
    };

    let mut first = 0;
    let mut last = refs.len();
    loop {
        while first != last && cmp1(refs[first].center[axis], border) {
            result.left.join_mut(&refs[first].aabb);
            result.left_centroids.grow_mut(&refs[first].center);
            first += 1;
        }
        if first == last {
            break;
        }
        last -= 1;

        result.right.join_mut(&refs[first].aabb);
        result.right_centroids.grow_mut(&refs[first].center);

        while first != last && cmp2(refs[last].center[axis], border) {
            result.right.join_mut(&refs[last].aabb);
            result.right_centroids.grow_mut(&refs[last].center);
            last -= 1;
        }
        if first == last {
            break;
        }

        result.left.join_mut(&refs[last].aabb);
        result.left_centroids.grow_mut(&refs[last].center);
        refs.swap(first, last);
        first += 1;
    }

    result.split = first;
    result
}

/// Partitions the request's range around `border` and returns the two child requests.
/// Falls back to an index median split when the plane leaves one side empty.
pub(crate) fn split_request(
    refs: &mut [PrimRef],
    request: &SplitRequest,
    axis: Axis,
    border: Real,
) -> (SplitRequest, SplitRequest) {
    let range = &mut refs[request.range()];
    let near_to_far = (request.count + request.start) & 1 == 1;

    let mut part = None;
    if request.centroid_bounds.size()[axis] > 0.0 {
        part = Some(partition(range, axis, border, near_to_far));
    }

    let part = match part {
        Some(p) if p.split != 0 && p.split != range.len() => p,
        _ => {
            let split = range.len() / 2;
            let (left, left_centroids) = joint_bounds_of_refs(&range[..split]);
            let (right, right_centroids) = joint_bounds_of_refs(&range[split..]);
            Partition {
                split,
                left,
                left_centroids,
                right,
                right_centroids,
            }
        }
    };

    let left = SplitRequest {
        start: request.start,
        count: part.split,
        bounds: part.left,
        centroid_bounds: part.left_centroids,
        depth: request.depth + 1,
        tree_index: request.tree_index.wrapping_mul(2),
    };
    let right = SplitRequest {
        start: request.start + part.split,
        count: request.count - part.split,
        bounds: part.right,
        centroid_bounds: part.right_centroids,
        depth: request.depth + 1,
        tree_index: request.tree_index.wrapping_mul(2).wrapping_add(1),
    };
    (left, right)
}

/// Output state owned by a single build invocation.
pub(crate) struct BuildState {
    pub nodes: Vec<BvhNode>,
    pub packed_indices: Vec<usize>,
    pub height: usize,
}

impl BuildState {
    pub fn with_capacity(nodes: usize, indices: usize) -> BuildState {
        BuildState {
            nodes: Vec::with_capacity(nodes),
            packed_indices: Vec::with_capacity(indices),
            height: 0,
        }
    }

    /// Reserves the arena slot for `request`'s node. Children are allocated after their
    /// parent, so the arena is in pre-order of construction.
    pub fn allocate(&mut self, request: &SplitRequest) -> usize {
        self.height = self.height.max(request.depth);
        self.nodes.push(BvhNode::empty_leaf(request.tree_index));
        self.nodes.len() - 1
    }

    /// Turns the node at `node_index` into a leaf holding the request's references.
    pub fn make_leaf(&mut self, node_index: usize, request: &SplitRequest, refs: &[PrimRef]) {
        let start = self.packed_indices.len();
        self.packed_indices
            .extend(refs[request.range()].iter().map(|r| r.index));
        self.nodes[node_index] = BvhNode::Leaf {
            aabb: request.bounds,
            tree_index: request.tree_index,
            start,
            count: request.count,
        };
    }

    /// Turns the node at `node_index` into an inner node.
    pub fn make_node(
        &mut self,
        node_index: usize,
        request: &SplitRequest,
        child_l_index: usize,
        child_r_index: usize,
    ) {
        self.nodes[node_index] = BvhNode::Node {
            aabb: request.bounds,
            tree_index: request.tree_index,
            child_l_index,
            child_r_index,
        };
    }

    pub fn finish(self, bounds: Aabb) -> Bvh {
        Bvh::from_parts(self.nodes, self.packed_indices, bounds, self.height)
    }
}
