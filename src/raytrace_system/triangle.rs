use nalgebra::{Point3, Vector2, Vector3};

use super::{kdtree::aabb::Aabb, ray::Ray};

// slack on the barycentric bounds so rays through shared edges are not lost
const TRI_EPS: f32 = 1e-4;

/// A triangle referencing three entries of the scene's vertex buffer and one of its
/// materials.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Triangle {
    pub indices: [u32; 3],
    pub material: u32,
}

impl Triangle {
    pub fn new(indices: [u32; 3], material: u32) -> Triangle {
        Triangle { indices, material }
    }

    pub fn points(&self, vertices: &[Point3<f32>]) -> [Point3<f32>; 3] {
        self.indices.map(|i| vertices[i as usize])
    }

    pub fn compute_aabb(&self, vertices: &[Point3<f32>]) -> Aabb {
        Aabb::from_points(&self.points(vertices))
    }

    pub fn centroid(&self, vertices: &[Point3<f32>]) -> Point3<f32> {
        let [v0, v1, v2] = self.points(vertices);
        Point3::from((v0.coords + v1.coords + v2.coords) / 3.0)
    }

    // not normalized; winding decides the facing
    pub fn normal(&self, vertices: &[Point3<f32>]) -> Vector3<f32> {
        let [v0, v1, v2] = self.points(vertices);
        (v1 - v0).cross(&(v2 - v0))
    }

    /// Möller-Trumbore intersection (1997).
    ///
    /// Records the hit in `ray.hit` and returns `true` only if the hit lies strictly
    /// inside `(t_min, t_max)` and is closer than the hit already stored on the ray.
    pub fn intersect(&self, prim_id: u32, vertices: &[Point3<f32>], ray: &mut Ray) -> bool {
        let [pt0, pt1, pt2] = self.points(vertices);
        let edge0 = pt1 - pt0;
        let edge1 = pt2 - pt0;
        let p_vec = ray.dir.cross(&edge1);
        let det = edge0.dot(&p_vec);
        if det == 0.0 {
            // ray is parallel to the triangle plane
            return false;
        }
        let inv_det = 1.0 / det;
        let t_vec = ray.origin - pt0;
        let q_vec = t_vec.cross(&edge0);
        let u = t_vec.dot(&p_vec) * inv_det;
        let v = ray.dir.dot(&q_vec) * inv_det;
        if u < -TRI_EPS || v < -TRI_EPS || u + v > 1.0 + 2.0 * TRI_EPS {
            return false;
        }
        let dist = edge1.dot(&q_vec) * inv_det;
        if ray.t_min < dist && dist < ray.t_max && dist < ray.hit.distance {
            ray.hit.distance = dist;
            ray.hit.normal = edge0.cross(&edge1);
            ray.hit.material = Some(self.material);
            ray.hit.prim_id = Some(prim_id);
            ray.hit.uv = Vector2::new(u, v);
            true
        } else {
            false
        }
    }
}
