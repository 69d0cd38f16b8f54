use crate::aabb::Aabb;

/// The [`BvhNode`] enum that describes a node in a [`Bvh`].
/// It's either a leaf node and references a contiguous range of the packed primitive
/// indices, or a regular node that has two child nodes.
/// Every node stores its own [`Aabb`].
///
/// [`Bvh`]: super::Bvh
///
#[derive(Debug, Copy, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum BvhNode {
    /// Leaf node.
    Leaf {
        /// The convex hull of the primitives referenced by this leaf.
        aabb: Aabb,

        /// Position of this node in a complete binary tree, with the root at 1.
        tree_index: usize,

        /// Offset of the first primitive in the packed index list.
        start: usize,

        /// Number of primitives in this leaf.
        count: usize,
    },
    /// Inner node.
    Node {
        /// The convex hull of both subtrees.
        aabb: Aabb,

        /// Position of this node in a complete binary tree, with the root at 1.
        tree_index: usize,

        /// Index of the left subtree's root node.
        child_l_index: usize,

        /// Index of the right subtree's root node.
        child_r_index: usize,
    },
}

impl BvhNode {
    /// Creates an empty leaf, used for empty inputs and as an arena placeholder.
    pub(crate) fn empty_leaf(tree_index: usize) -> BvhNode {
        BvhNode::Leaf {
            aabb: Aabb::empty(),
            tree_index,
            start: 0,
            count: 0,
        }
    }

    /// Returns the [`Aabb`] of this node.
    pub fn aabb(&self) -> &Aabb {
        match self {
            BvhNode::Node { aabb, .. } | BvhNode::Leaf { aabb, .. } => aabb,
        }
    }

    /// Returns the complete binary tree position of this node.
    pub fn tree_index(&self) -> usize {
        match *self {
            BvhNode::Node { tree_index, .. } | BvhNode::Leaf { tree_index, .. } => tree_index,
        }
    }

    /// Returns true if this is a leaf.
    pub fn is_leaf(&self) -> bool {
        matches!(self, BvhNode::Leaf { .. })
    }

    /// Returns the arena indices of the left and right child, if this is an inner node.
    pub fn children(&self) -> Option<(usize, usize)> {
        match *self {
            BvhNode::Node {
                child_l_index,
                child_r_index,
                ..
            } => Some((child_l_index, child_r_index)),
            BvhNode::Leaf { .. } => None,
        }
    }

    /// Returns the `(start, count)` range into the packed indices, if this is a leaf.
    pub fn leaf_range(&self) -> Option<(usize, usize)> {
        match *self {
            BvhNode::Leaf { start, count, .. } => Some((start, count)),
            BvhNode::Node { .. } => None,
        }
    }
}
