use nalgebra::{Point3, Vector3};

use crate::{raytrace_system::ray::Ray, settings::CameraSettings};

// orthonormal sensor frame
#[derive(Clone, Debug)]
struct DirVecs {
    front: Vector3<f32>,
    right: Vector3<f32>,
    up: Vector3<f32>,
}

impl DirVecs {
    fn new(dir: Vector3<f32>, worldup: Vector3<f32>) -> DirVecs {
        let front = dir.normalize();
        let right = front.cross(&worldup).normalize();
        let up = right.cross(&front).normalize();
        DirVecs { front, right, up }
    }
}

/// Pinhole camera generating primary rays through a virtual sensor one unit in front
/// of the eye.
#[derive(Clone, Debug)]
pub struct PerspectiveCamera {
    position: Point3<f32>,
    res: [u32; 2],
    vecs: DirVecs,
    // bottom left corner of the sensor, relative to the eye
    bottom_left: Vector3<f32>,
    // extent of one sensor element
    step_x: Vector3<f32>,
    step_y: Vector3<f32>,
}

impl PerspectiveCamera {
    pub fn new(
        position: Point3<f32>,
        dir: Vector3<f32>,
        up: Vector3<f32>,
        v_fov: f32,
        res_x: u32,
        res_y: u32,
    ) -> PerspectiveCamera {
        let vecs = DirVecs::new(dir, up);
        let aspect_ratio = res_x as f32 / res_y as f32;
        let sensor_size = 2.0 * (0.5 * v_fov).tan();
        let row_vec = sensor_size * aspect_ratio * vecs.right;
        let col_vec = sensor_size * vecs.up;
        PerspectiveCamera {
            position,
            res: [res_x, res_y],
            bottom_left: vecs.front - 0.5 * row_vec - 0.5 * col_vec,
            step_x: row_vec / res_x as f32,
            step_y: col_vec / res_y as f32,
            vecs,
        }
    }

    pub fn from_settings(settings: &CameraSettings) -> PerspectiveCamera {
        PerspectiveCamera::new(
            Point3::from(settings.position),
            Vector3::from(settings.direction),
            Vector3::from(settings.up),
            settings.v_fov,
            settings.resolution[0],
            settings.resolution[1],
        )
    }

    pub fn resolution(&self) -> [u32; 2] {
        self.res
    }

    pub fn position(&self) -> Point3<f32> {
        self.position
    }

    // returns front, right, up
    pub fn front_right_up(&self) -> (Vector3<f32>, Vector3<f32>, Vector3<f32>) {
        (self.vecs.front, self.vecs.right, self.vecs.up)
    }

    // sensor coordinates; (0, 0) is the bottom left corner, no pixel centre offset
    pub fn primary_ray(&self, x: f32, y: f32) -> Ray {
        let dir = self.bottom_left + x * self.step_x + y * self.step_y;
        Ray::new(self.position, dir.normalize())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn camera() -> PerspectiveCamera {
        PerspectiveCamera::new(
            Point3::new(0.0, 0.0, -5.0),
            Vector3::new(0.0, 0.0, 2.0),
            Vector3::y(),
            std::f32::consts::FRAC_PI_2,
            200,
            100,
        )
    }

    #[test]
    fn test_centre_ray_is_the_focal_axis() {
        let cam = camera();
        let ray = cam.primary_ray(100.0, 50.0);
        assert_eq!(ray.origin, Point3::new(0.0, 0.0, -5.0));
        assert!((ray.dir - Vector3::z()).norm() < 1e-6);
    }

    #[test]
    fn test_corner_rays_span_the_fov() {
        let cam = camera();
        // tan(45 deg) = 1, so the top edge is one unit up at unit distance
        let top = cam.primary_ray(100.0, 100.0);
        assert!((top.dir - Vector3::new(0.0, 1.0, 1.0).normalize()).norm() < 1e-5);
        // the horizontal extent is stretched by the aspect ratio
        let left = cam.primary_ray(0.0, 50.0);
        let (_, right, _) = cam.front_right_up();
        let expected = (Vector3::z() - 2.0 * right).normalize();
        assert!((left.dir - expected).norm() < 1e-5);
    }

    #[test]
    fn test_frame_is_orthonormal() {
        let (front, right, up) = camera().front_right_up();
        assert!(front.dot(&right).abs() < 1e-6);
        assert!(front.dot(&up).abs() < 1e-6);
        assert!((right.cross(&up) + front).norm() < 1e-6);
        assert_eq!(camera().resolution(), [200, 100]);
    }
}
