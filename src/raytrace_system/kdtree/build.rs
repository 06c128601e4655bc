use std::{cmp::Ordering, sync::mpsc, time::Instant};

use nalgebra::Point3;
use threadpool::ThreadPool;

use super::{KdNode, KdTree, KdTreeStats, LeafPrims, MAX_TREE_DEPTH, aabb::Aabb};
use crate::{
    error::{Error, Result},
    raytrace_system::triangle::Triangle,
    settings::KdTreeSettings,
};

// nodes with fewer primitives sort their edge lists on the calling thread
pub const PARALLEL_SORT_THRESHOLD: usize = 2048;

// refinements that did not pay off before the builder gives up on a subtree
const MAX_BAD_REFINES: u32 = 3;

// END < START < BOTH at equal positions
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
enum EdgeKind {
    End,
    Start,
    // primitive is flat along this axis
    Both,
}

#[derive(Clone, Copy, Debug)]
struct BoundEdge {
    pos: f32,
    prim_id: u32,
    kind: EdgeKind,
}

// total order, so the sorted lists do not depend on the sort algorithm or thread
fn edge_order(a: &BoundEdge, b: &BoundEdge) -> Ordering {
    a.pos
        .total_cmp(&b.pos)
        .then(a.kind.cmp(&b.kind))
        .then(a.prim_id.cmp(&b.prim_id))
}

fn axis_edges(prims: &[u32], prim_bounds: &[Aabb], axis: usize) -> Vec<BoundEdge> {
    let mut edges = Vec::with_capacity(2 * prims.len());
    for &prim_id in prims {
        let bounds = &prim_bounds[prim_id as usize];
        if bounds.min[axis] == bounds.max[axis] {
            edges.push(BoundEdge {
                pos: bounds.min[axis],
                prim_id,
                kind: EdgeKind::Both,
            });
        } else {
            edges.push(BoundEdge {
                pos: bounds.min[axis],
                prim_id,
                kind: EdgeKind::Start,
            });
            edges.push(BoundEdge {
                pos: bounds.max[axis],
                prim_id,
                kind: EdgeKind::End,
            });
        }
    }
    edges
}

#[derive(Clone, Copy, Debug)]
struct SplitCandidate {
    axis: usize,
    edge_idx: usize,
    cost: f32,
}

struct KdTreeBuilder<'a> {
    settings: &'a KdTreeSettings,
    max_depth: u32,
    prim_bounds: Vec<Aabb>,
    pool: Option<ThreadPool>,
    parallel_threshold: usize,
    nodes: Vec<KdNode>,
    leaf_prim_ids: Vec<u32>,
    stats: KdTreeStats,
    // total number of primitive references held by leaves
    leaf_prim_refs: usize,
}

// gathers the per-axis edge lists sent by the sort workers
fn collect_axis_edges(
    rx: mpsc::Receiver<(usize, Vec<BoundEdge>)>,
) -> Result<[Vec<BoundEdge>; 3]> {
    let mut sorted: [Vec<BoundEdge>; 3] = Default::default();
    let mut received = 0;
    for (axis, edges) in rx {
        sorted[axis] = edges;
        received += 1;
    }
    if received != 3 {
        return Err(Error::WorkerFailed(format!(
            "only {received} of 3 edge sorts finished"
        )));
    }
    Ok(sorted)
}

impl KdTreeBuilder<'_> {
    fn sorted_edges(&self, prims: &[u32]) -> Result<[Vec<BoundEdge>; 3]> {
        match &self.pool {
            Some(pool) if prims.len() >= self.parallel_threshold => {
                let (tx, rx) = mpsc::channel();
                for axis in 0..3 {
                    let mut edges = axis_edges(prims, &self.prim_bounds, axis);
                    let tx = tx.clone();
                    pool.execute(move || {
                        edges.sort_unstable_by(edge_order);
                        // the receiver only goes away once the build has failed
                        let _ = tx.send((axis, edges));
                    });
                }
                drop(tx);
                collect_axis_edges(rx)
            }
            _ => Ok(std::array::from_fn(|axis| {
                let mut edges = axis_edges(prims, &self.prim_bounds, axis);
                edges.sort_unstable_by(edge_order);
                edges
            })),
        }
    }

    // sweeps the sorted edges of every axis and returns the cheapest split plane
    // strictly inside the node bounds, using the surface area heuristic
    fn find_best_split(
        &self,
        node_bounds: &Aabb,
        n_prims: usize,
        edges: &[Vec<BoundEdge>; 3],
    ) -> Option<SplitCandidate> {
        let dims = node_bounds.dimensions();
        let mut best: Option<SplitCandidate> = None;

        for axis in 0..3 {
            let other0 = (axis + 1) % 3;
            let other1 = (axis + 2) % 3;
            let cap_area = dims[other0] * dims[other1];
            let perimeter = dims[other0] + dims[other1];

            let mut n_below = 0usize;
            let mut n_above = n_prims;
            for (edge_idx, edge) in edges[axis].iter().enumerate() {
                match edge.kind {
                    EdgeKind::End => n_above -= 1,
                    EdgeKind::Both => {
                        n_below += 1;
                        n_above -= 1;
                    }
                    EdgeKind::Start => {}
                }

                let pos = edge.pos;
                if pos > node_bounds.min[axis] && pos < node_bounds.max[axis] {
                    let below_area = 2.0 * (cap_area + (pos - node_bounds.min[axis]) * perimeter);
                    let above_area = 2.0 * (cap_area + (node_bounds.max[axis] - pos) * perimeter);
                    let bonus = if n_below == 0 || n_above == 0 {
                        self.settings.empty_bonus
                    } else {
                        0.0
                    };
                    let cost = (1.0 - bonus)
                        * (n_below as f32 * below_area + n_above as f32 * above_area);
                    if best.is_none_or(|b| cost < b.cost) {
                        best = Some(SplitCandidate {
                            axis,
                            edge_idx,
                            cost,
                        });
                    }
                }

                if edge.kind == EdgeKind::Start {
                    n_below += 1;
                }
            }
        }
        best
    }

    fn push_leaf(&mut self, prims: &[u32], depth: u32) {
        let leaf = match prims {
            [] => LeafPrims::Empty,
            [prim_id] => LeafPrims::Single(*prim_id),
            _ => {
                let offset = self.leaf_prim_ids.len() as u32;
                self.leaf_prim_ids.extend_from_slice(prims);
                LeafPrims::Many {
                    offset,
                    count: prims.len() as u32,
                }
            }
        };
        self.nodes.push(KdNode::Leaf(leaf));

        self.stats.leaves += 1;
        if prims.is_empty() {
            self.stats.empty_leaves += 1;
        }
        self.stats.depth = self.stats.depth.max(depth);
        self.leaf_prim_refs += prims.len();
    }

    fn build_node(
        &mut self,
        node_bounds: Aabb,
        prims: Vec<u32>,
        depth: u32,
        bad_refines: u32,
    ) -> Result<()> {
        let n_prims = prims.len();
        if n_prims <= self.settings.min_prims_per_leaf as usize || depth >= self.max_depth {
            self.push_leaf(&prims, depth);
            return Ok(());
        }

        let total_area = node_bounds.area();
        if !(total_area > 0.0) {
            self.push_leaf(&prims, depth);
            return Ok(());
        }

        let edges = self.sorted_edges(&prims)?;
        let Some(best) = self.find_best_split(&node_bounds, n_prims, &edges) else {
            self.push_leaf(&prims, depth);
            return Ok(());
        };

        let intersection_cost = self.settings.intersection_cost as f32;
        let best_cost = self.settings.traversal_cost as f32
            + intersection_cost * best.cost / total_area;
        let leaf_cost = intersection_cost * n_prims as f32;

        let mut bad_refines = bad_refines;
        if best_cost > leaf_cost {
            bad_refines += 1;
        }
        if (best_cost > 4.0 * leaf_cost && n_prims < 16) || bad_refines == MAX_BAD_REFINES {
            self.push_leaf(&prims, depth);
            return Ok(());
        }

        // straddling primitives end up on both sides
        let split_axis_edges = &edges[best.axis];
        let split_edge = split_axis_edges[best.edge_idx];
        let mut below_prims: Vec<u32> = split_axis_edges[..best.edge_idx]
            .iter()
            .filter(|e| e.kind != EdgeKind::End)
            .map(|e| e.prim_id)
            .collect();
        if split_edge.kind == EdgeKind::Both {
            below_prims.push(split_edge.prim_id);
        }
        let above_prims: Vec<u32> = split_axis_edges[best.edge_idx + 1..]
            .iter()
            .filter(|e| e.kind != EdgeKind::Start)
            .map(|e| e.prim_id)
            .collect();
        drop(edges);
        drop(prims);

        let split = split_edge.pos;
        let mut below_bounds = node_bounds;
        below_bounds.max[best.axis] = split;
        let mut above_bounds = node_bounds;
        above_bounds.min[best.axis] = split;

        let node_idx = self.nodes.len();
        self.nodes.push(KdNode::Interior {
            axis: best.axis as u8,
            split,
            above_child: 0,
        });

        self.build_node(below_bounds, below_prims, depth + 1, bad_refines)?;

        let above_idx = self.nodes.len() as u32;
        if let KdNode::Interior { above_child, .. } = &mut self.nodes[node_idx] {
            *above_child = above_idx;
        }

        self.build_node(above_bounds, above_prims, depth + 1, bad_refines)
    }
}

impl KdTree {
    /// Builds a tree over `triangles` with the surface area heuristic.
    ///
    /// Edge lists of large nodes are sorted on three worker threads, one per axis. Fails
    /// only if one of those workers dies.
    pub fn build(
        triangles: &[Triangle],
        vertices: &[Point3<f32>],
        settings: &KdTreeSettings,
    ) -> Result<KdTree> {
        KdTree::build_with_threshold(triangles, vertices, settings, PARALLEL_SORT_THRESHOLD)
    }

    fn build_with_threshold(
        triangles: &[Triangle],
        vertices: &[Point3<f32>],
        settings: &KdTreeSettings,
        parallel_threshold: usize,
    ) -> Result<KdTree> {
        let start = Instant::now();
        let n_prims = triangles.len();

        let prim_bounds: Vec<Aabb> = triangles
            .iter()
            .map(|t| t.compute_aabb(vertices))
            .collect();
        let bounds = prim_bounds
            .iter()
            .fold(Aabb::empty(), |acc, b| Aabb::union(&acc, b));

        let max_depth = settings
            .max_depth
            .unwrap_or_else(|| (8.0 + 1.3 * (n_prims.max(1) as f32).log2()) as u32)
            .min(MAX_TREE_DEPTH);

        let pool = if n_prims >= parallel_threshold {
            Some(ThreadPool::new(3))
        } else {
            None
        };

        let mut builder = KdTreeBuilder {
            settings,
            max_depth,
            prim_bounds,
            pool,
            parallel_threshold,
            nodes: vec![],
            leaf_prim_ids: vec![],
            stats: KdTreeStats::default(),
            leaf_prim_refs: 0,
        };
        builder.build_node(bounds, (0..n_prims as u32).collect(), 0, 0)?;

        let mut stats = builder.stats;
        stats.nodes = builder.nodes.len();
        stats.max_depth = max_depth;
        stats.avg_prims_per_leaf = if stats.leaves > stats.empty_leaves {
            builder.leaf_prim_refs as f32 / (stats.leaves - stats.empty_leaves) as f32
        } else {
            0.0
        };
        stats.build_millis = start.elapsed().as_millis();

        log::info!(
            "built kd-tree over {} triangles: {} nodes, {} leaves ({} empty), depth {}/{}, {:.2} prims per leaf, {} ms",
            n_prims,
            stats.nodes,
            stats.leaves,
            stats.empty_leaves,
            stats.depth,
            stats.max_depth,
            stats.avg_prims_per_leaf,
            stats.build_millis,
        );

        Ok(KdTree {
            nodes: builder.nodes,
            leaf_prim_ids: builder.leaf_prim_ids,
            bounds,
            stats,
        })
    }
}

#[cfg(test)]
mod tests {
    use nalgebra::Vector3;

    use super::*;

    // `n` small triangles on a line along x
    fn strip(n: usize) -> (Vec<Point3<f32>>, Vec<Triangle>) {
        let mut vertices = vec![];
        let mut triangles = vec![];
        for i in 0..n {
            let x = i as f32 * 2.0;
            vertices.push(Point3::new(x, 0.0, 0.0));
            vertices.push(Point3::new(x + 1.0, 0.0, 0.5));
            vertices.push(Point3::new(x, 1.0, 1.0));
            let base = 3 * i as u32;
            triangles.push(Triangle::new([base, base + 1, base + 2], 0));
        }
        (vertices, triangles)
    }

    fn reachable_prims(tree: &KdTree) -> Vec<u32> {
        let mut prims: Vec<u32> = tree
            .nodes()
            .iter()
            .filter_map(|n| match n {
                KdNode::Leaf(leaf) => Some(tree.leaf_prims(leaf).to_vec()),
                _ => None,
            })
            .flatten()
            .collect();
        prims.sort_unstable();
        prims.dedup();
        prims
    }

    #[test]
    fn test_edge_order() {
        let edge = |pos, prim_id, kind| BoundEdge { pos, prim_id, kind };
        let mut edges = vec![
            edge(1.0, 0, EdgeKind::Both),
            edge(1.0, 1, EdgeKind::Start),
            edge(0.5, 7, EdgeKind::Start),
            edge(1.0, 2, EdgeKind::End),
            edge(1.0, 0, EdgeKind::Start),
        ];
        edges.sort_unstable_by(edge_order);
        let order: Vec<(u32, EdgeKind)> = edges.iter().map(|e| (e.prim_id, e.kind)).collect();
        assert_eq!(
            order,
            vec![
                (7, EdgeKind::Start),
                (2, EdgeKind::End),
                (0, EdgeKind::Start),
                (1, EdgeKind::Start),
                (0, EdgeKind::Both),
            ]
        );
    }

    #[test]
    fn test_flat_prims_produce_one_edge() {
        let bounds = vec![
            Aabb::new(Point3::new(0.0, 0.0, 0.0), Point3::new(1.0, 1.0, 0.0)),
            Aabb::new(Point3::new(0.0, 0.0, 0.0), Point3::new(1.0, 1.0, 1.0)),
        ];
        let edges = axis_edges(&[0, 1], &bounds, 2);
        assert_eq!(edges.len(), 3);
        assert_eq!(edges[0].kind, EdgeKind::Both);
    }

    #[test]
    fn test_separated_clusters_are_split() {
        let (vertices, triangles) = strip(32);
        let tree = KdTree::build(&triangles, &vertices, &KdTreeSettings::default()).unwrap();
        assert!(matches!(tree.nodes()[0], KdNode::Interior { axis: 0, .. }));
        assert!(tree.stats().leaves > 1);
        assert_eq!(tree.stats().nodes, tree.nodes().len());
        assert_eq!(reachable_prims(&tree), (0..32).collect::<Vec<_>>());
        // bottom child sits directly after its parent
        if let KdNode::Interior { above_child, .. } = tree.nodes()[0] {
            assert!(above_child as usize > 1);
            assert!((above_child as usize) < tree.nodes().len());
        }
    }

    #[test]
    fn test_build_is_idempotent() {
        let (vertices, triangles) = strip(100);
        let settings = KdTreeSettings::default();
        let a = KdTree::build(&triangles, &vertices, &settings).unwrap();
        let b = KdTree::build(&triangles, &vertices, &settings).unwrap();
        assert_eq!(a.nodes(), b.nodes());
        assert_eq!(a.leaf_prim_ids(), b.leaf_prim_ids());
    }

    #[test]
    fn test_parallel_sort_gives_same_tree() {
        let (vertices, triangles) = strip(100);
        let settings = KdTreeSettings::default();
        let inline = KdTree::build_with_threshold(&triangles, &vertices, &settings, usize::MAX).unwrap();
        let parallel = KdTree::build_with_threshold(&triangles, &vertices, &settings, 0).unwrap();
        assert_eq!(inline.nodes(), parallel.nodes());
        assert_eq!(inline.leaf_prim_ids(), parallel.leaf_prim_ids());
    }

    #[test]
    fn test_max_depth_zero_gives_single_leaf() {
        let (vertices, triangles) = strip(10);
        let settings = KdTreeSettings {
            max_depth: Some(0),
            ..Default::default()
        };
        let tree = KdTree::build(&triangles, &vertices, &settings).unwrap();
        assert_eq!(tree.nodes().len(), 1);
        assert_eq!(tree.leaf_prim_ids(), &(0..10).collect::<Vec<_>>()[..]);
    }

    #[test]
    fn test_max_depth_is_clamped() {
        let (vertices, triangles) = strip(4);
        let settings = KdTreeSettings {
            max_depth: Some(1000),
            ..Default::default()
        };
        let tree = KdTree::build(&triangles, &vertices, &settings).unwrap();
        assert_eq!(tree.stats().max_depth, MAX_TREE_DEPTH);
    }

    #[test]
    fn test_auto_max_depth() {
        let (vertices, triangles) = strip(16);
        let tree = KdTree::build(&triangles, &vertices, &KdTreeSettings::default()).unwrap();
        // 8 + 1.3 * 4
        assert_eq!(tree.stats().max_depth, 13);

        // 8 + 1.3 * log2(7) = 11.65, truncated
        let (vertices, triangles) = strip(7);
        let tree = KdTree::build(&triangles, &vertices, &KdTreeSettings::default()).unwrap();
        assert_eq!(tree.stats().max_depth, 11);
    }

    #[test]
    fn test_missing_axis_sort_is_an_error() {
        let (tx, rx) = mpsc::channel();
        for axis in 0..2 {
            tx.send((axis, vec![])).unwrap();
        }
        drop(tx);
        assert!(matches!(collect_axis_edges(rx), Err(Error::WorkerFailed(_))));

        let bounds = [Aabb::new(Point3::origin(), Point3::new(1.0, 2.0, 3.0))];
        let (tx, rx) = mpsc::channel();
        for axis in [2, 0, 1] {
            tx.send((axis, axis_edges(&[0], &bounds, axis))).unwrap();
        }
        drop(tx);
        let sorted = collect_axis_edges(rx).unwrap();
        assert_eq!(sorted[1][1].pos, 2.0);
    }

    #[test]
    fn test_coplanar_prims_stay_in_one_leaf() {
        // all triangles in the z = 0 plane and overlapping: no split can separate them
        let vertices = vec![
            Point3::new(0.0, 0.0, 0.0),
            Point3::new(1.0, 0.0, 0.0),
            Point3::new(0.0, 1.0, 0.0),
            Point3::new(1.0, 1.0, 0.0),
        ];
        let triangles = vec![
            Triangle::new([0, 1, 2], 0),
            Triangle::new([1, 3, 2], 0),
            Triangle::new([0, 1, 3], 0),
            Triangle::new([0, 3, 2], 0),
        ];
        let tree = KdTree::build(&triangles, &vertices, &KdTreeSettings::default()).unwrap();
        assert_eq!(reachable_prims(&tree), vec![0, 1, 2, 3]);

        let mut ray = crate::raytrace_system::ray::Ray::new(
            Point3::new(0.25, 0.25, 1.0),
            -Vector3::z(),
        );
        assert!(tree.intersect(&triangles, &vertices, &mut ray, false));
        assert!((ray.hit.distance - 1.0).abs() < 1e-5);
    }
}
