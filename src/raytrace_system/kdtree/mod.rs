use nalgebra::Point3;

use super::{ray::Ray, triangle::Triangle};
use crate::utils;

use aabb::Aabb;

pub mod aabb;
pub mod build;

// size of the traversal stack; the builder never goes deeper than this
pub const MAX_TREE_DEPTH: u32 = 64;

/// Primitives referenced by a leaf.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LeafPrims {
    Empty,
    Single(u32),
    // range into `KdTree::leaf_prim_ids`
    Many { offset: u32, count: u32 },
}

/// A node of the flattened tree.
///
/// The child below the split plane of an interior node is always stored directly
/// after it, so only the index of the child above the plane is recorded.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum KdNode {
    Leaf(LeafPrims),
    Interior {
        axis: u8,
        split: f32,
        above_child: u32,
    },
}

#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct KdTreeStats {
    pub nodes: usize,
    pub leaves: usize,
    pub empty_leaves: usize,
    // deepest leaf actually created
    pub depth: u32,
    // depth limit used by the build
    pub max_depth: u32,
    pub avg_prims_per_leaf: f32,
    pub build_millis: u128,
}

/// A k-d tree over the triangles of a scene.
///
/// The tree only stores primitive ids; triangles and vertices stay owned by the scene
/// and are passed back in on every query.
#[derive(Clone, Debug)]
pub struct KdTree {
    nodes: Vec<KdNode>,
    leaf_prim_ids: Vec<u32>,
    bounds: Aabb,
    stats: KdTreeStats,
}

impl KdTree {
    pub fn nodes(&self) -> &[KdNode] {
        &self.nodes
    }

    pub fn leaf_prim_ids(&self) -> &[u32] {
        &self.leaf_prim_ids
    }

    pub fn bounds(&self) -> &Aabb {
        &self.bounds
    }

    pub fn stats(&self) -> &KdTreeStats {
        &self.stats
    }

    pub fn leaf_prims<'a>(&'a self, leaf: &'a LeafPrims) -> &'a [u32] {
        match leaf {
            LeafPrims::Empty => &[],
            LeafPrims::Single(prim_id) => std::slice::from_ref(prim_id),
            LeafPrims::Many { offset, count } => {
                &self.leaf_prim_ids[*offset as usize..(*offset + *count) as usize]
            }
        }
    }

    /// Finds the closest triangle hit along `ray`, front to back.
    ///
    /// The hit is recorded in `ray.hit`. With `visibility_only` the first hit found ends
    /// the search, which is enough for occlusion queries. The ray's valid range is left
    /// unchanged on return.
    pub fn intersect(
        &self,
        triangles: &[Triangle],
        vertices: &[Point3<f32>],
        ray: &mut Ray,
        visibility_only: bool,
    ) -> bool {
        let Some(box_hit) = self.bounds.intersect(ray) else {
            return false;
        };

        let (ray_t_min, ray_t_max) = (ray.t_min, ray.t_max);
        let found = self.traverse(
            triangles,
            vertices,
            ray,
            visibility_only,
            ray_t_min.max(box_hit.entry - utils::rescaled_eps(box_hit.entry)),
            ray_t_max.min(box_hit.exit + utils::rescaled_eps(box_hit.exit)),
        );
        ray.set_valid_range(ray_t_min, ray_t_max);
        found
    }

    fn traverse(
        &self,
        triangles: &[Triangle],
        vertices: &[Point3<f32>],
        ray: &mut Ray,
        visibility_only: bool,
        mut t_min: f32,
        mut t_max: f32,
    ) -> bool {
        // (t_min, t_max, node) of subtrees still to visit
        let mut stack = [(0.0f32, 0.0f32, 0u32); MAX_TREE_DEPTH as usize];
        let mut stack_len = 0;
        let mut node_idx = 0u32;

        loop {
            // everything left on the stack is behind the closest hit
            if ray.hit.distance < t_min {
                return false;
            }

            match self.nodes[node_idx as usize] {
                KdNode::Interior {
                    axis,
                    split,
                    above_child,
                } => {
                    let axis = axis as usize;
                    let origin = ray.origin[axis];
                    let dir = ray.dir[axis];

                    // the child containing the origin is visited first
                    let below_first = origin < split || (origin == split && dir <= 0.0);
                    let (first, second) = if below_first {
                        (node_idx + 1, above_child)
                    } else {
                        (above_child, node_idx + 1)
                    };

                    let t_split = (split - origin) * ray.inv_dir[axis];
                    if t_split.is_nan() || t_split > t_max || t_split <= 0.0 {
                        node_idx = first;
                    } else if t_split < t_min {
                        node_idx = second;
                    } else {
                        let eps = utils::rescaled_eps(t_split);
                        stack[stack_len] = (t_split - eps, t_max, second);
                        stack_len += 1;
                        node_idx = first;
                        t_max = t_split + eps;
                    }
                }
                KdNode::Leaf(prims) => {
                    ray.set_valid_range(t_min, t_max);
                    let mut leaf_hit = false;
                    for &prim_id in self.leaf_prims(&prims) {
                        if triangles[prim_id as usize].intersect(prim_id, vertices, ray) {
                            if visibility_only {
                                return true;
                            }
                            leaf_hit = true;
                        }
                    }
                    // hits are clipped to the leaf's interval, so nothing further along
                    // can be closer
                    if leaf_hit {
                        return true;
                    }

                    if stack_len == 0 {
                        return false;
                    }
                    stack_len -= 1;
                    (t_min, t_max, node_idx) = stack[stack_len];
                }
            }
        }
    }
}
