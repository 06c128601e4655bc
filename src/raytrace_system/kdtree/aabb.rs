use nalgebra::{Point3, Vector3};

use crate::raytrace_system::ray::Ray;

// an empty box has min = +inf and max = -inf, so extending it by anything just works
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Aabb {
    pub min: Point3<f32>,
    pub max: Point3<f32>,
}

/// Distances along a ray to the entry and exit points of a box.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct BoxHit {
    pub entry: f32,
    pub exit: f32,
}

impl Default for Aabb {
    fn default() -> Aabb {
        Aabb::empty()
    }
}

impl Aabb {
    pub fn empty() -> Aabb {
        Aabb {
            min: Point3::new(f32::INFINITY, f32::INFINITY, f32::INFINITY),
            max: Point3::new(f32::NEG_INFINITY, f32::NEG_INFINITY, f32::NEG_INFINITY),
        }
    }

    pub fn new(min: Point3<f32>, max: Point3<f32>) -> Aabb {
        Aabb { min, max }
    }

    pub fn from_points(points: &[Point3<f32>]) -> Aabb {
        let mut aabb = Aabb::empty();
        for point in points {
            aabb.extend_point(point);
        }
        aabb
    }

    pub fn union(a: &Aabb, b: &Aabb) -> Aabb {
        let mut aabb = *a;
        aabb.extend(b);
        aabb
    }

    pub fn is_empty(&self) -> bool {
        (0..3).any(|axis| self.min[axis] > self.max[axis])
    }

    pub fn extend_point(&mut self, p: &Point3<f32>) {
        self.min = self.min.inf(p);
        self.max = self.max.sup(p);
    }

    // an empty `other` leaves the box unchanged
    pub fn extend(&mut self, other: &Aabb) {
        self.min = self.min.inf(&other.min);
        self.max = self.max.sup(&other.max);
    }

    pub fn contains_point(&self, p: &Point3<f32>) -> bool {
        (0..3).all(|axis| self.min[axis] <= p[axis] && p[axis] <= self.max[axis])
    }

    pub fn dimensions(&self) -> Vector3<f32> {
        self.max - self.min
    }

    pub fn centroid(&self) -> Point3<f32> {
        Point3::from((self.min.coords + self.max.coords) / 2.0)
    }

    // position within the box, mapped to [0, 1]^3
    pub fn normalized_position(&self, p: &Point3<f32>) -> Point3<f32> {
        Point3::from((p - self.min).component_div(&self.dimensions()))
    }

    pub fn area(&self) -> f32 {
        let d = self.dimensions();
        2.0 * (d.x * d.y + (d.x + d.y) * d.z)
    }

    // ties go to the lower axis
    pub fn max_extent_axis(&self) -> usize {
        let d = self.dimensions();
        if d.x > d.y && d.x > d.z {
            0
        } else if d.y > d.z {
            1
        } else {
            2
        }
    }

    /// Slab test (Williams et al. 2005).
    ///
    /// The near and far corners are picked per axis by the sign of the ray's reciprocal
    /// direction. Returns `None` if the slabs do not overlap, or if the overlap lies
    /// outside the ray's valid `(t_min, t_max)` range.
    pub fn intersect(&self, ray: &Ray) -> Option<BoxHit> {
        let bounds = [self.min, self.max];
        let near = |axis: usize| {
            let corner = &bounds[(ray.inv_dir[axis] < 0.0) as usize];
            (corner[axis] - ray.origin[axis]) * ray.inv_dir[axis]
        };
        let far = |axis: usize| {
            let corner = &bounds[(ray.inv_dir[axis] >= 0.0) as usize];
            (corner[axis] - ray.origin[axis]) * ray.inv_dir[axis]
        };

        let mut t_entry = near(0);
        let mut t_exit = far(0);
        for axis in 1..3 {
            let t_axis_min = near(axis);
            let t_axis_max = far(axis);
            if t_entry > t_axis_max || t_axis_min > t_exit {
                return None;
            }
            t_entry = t_entry.max(t_axis_min);
            t_exit = t_exit.min(t_axis_max);
        }

        if t_entry < ray.t_max && t_exit > ray.t_min {
            Some(BoxHit {
                entry: t_entry,
                exit: t_exit,
            })
        } else {
            None
        }
    }
}
