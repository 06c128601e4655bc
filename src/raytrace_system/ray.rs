use nalgebra::{Point3, Vector2, Vector3};

// origin offset along the surface normal for secondary rays, avoids self-intersection
pub const RAY_OFFSET: f32 = 1e-4;

/// Closest hit found so far along a ray.
///
/// `distance` only ever decreases while a ray is being traced.
#[derive(Clone, Copy, Debug)]
pub struct Intersection {
    pub distance: f32,
    // geometric normal; normalized by `SurfaceScene::trace` for non-visibility rays
    pub normal: Vector3<f32>,
    // index into the scene material table
    pub material: Option<u32>,
    // index into the scene triangle list
    pub prim_id: Option<u32>,
    // barycentric coordinates along the triangle's two edges
    pub uv: Vector2<f32>,
}

impl Default for Intersection {
    fn default() -> Intersection {
        Intersection {
            distance: f32::MAX,
            normal: Vector3::zeros(),
            material: None,
            prim_id: None,
            uv: Vector2::zeros(),
        }
    }
}

impl Intersection {
    pub fn is_hit(&self) -> bool {
        self.prim_id.is_some()
    }
}

#[derive(Clone, Copy, Debug)]
pub struct Ray {
    pub origin: Point3<f32>,
    // unit length
    pub dir: Vector3<f32>,
    pub inv_dir: Vector3<f32>,
    // valid intersection range
    pub t_min: f32,
    pub t_max: f32,
    pub hit: Intersection,
}

impl Ray {
    pub fn new(origin: Point3<f32>, dir: Vector3<f32>) -> Ray {
        debug_assert!(
            (dir.norm() - 1.0).abs() <= 1e-4,
            "ray direction must be normalized"
        );
        Ray {
            origin,
            dir,
            inv_dir: dir.map(|d| 1.0 / d),
            t_min: 0.0,
            t_max: f32::MAX,
            hit: Intersection::default(),
        }
    }

    // ray leaving a surface; the origin is lifted slightly along `normal`
    pub fn offset_along(origin: Point3<f32>, dir: Vector3<f32>, normal: &Vector3<f32>) -> Ray {
        Ray::new(origin + RAY_OFFSET * normal, dir)
    }

    pub fn point_at(&self, t: f32) -> Point3<f32> {
        self.origin + t * self.dir
    }

    pub fn set_valid_range(&mut self, t_min: f32, t_max: f32) {
        self.t_min = t_min;
        self.t_max = t_max;
    }
}
