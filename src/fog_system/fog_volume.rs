use nalgebra::Point3;
use rand::Rng;

use super::{density_field::DensityField, preintegration::PreintegratedDensity};
use crate::raytrace_system::{
    kdtree::aabb::{Aabb, BoxHit},
    ray::Ray,
};

/// Heterogeneous fog: a density field scaled by absorption and scattering coefficients.
#[derive(Clone, Debug)]
pub struct FogVolume {
    field: DensityField,
    // per unit density
    abs_k: f32,
    sca_k: f32,
    // upper bound of the extinction coefficient anywhere in the volume
    maj_ext_k: f32,
    // optical depth along the camera rays, for the renderer
    preintegrated: Option<PreintegratedDensity>,
}

impl FogVolume {
    pub fn new(field: DensityField, maj_ext_k: f32, abs_k: f32, sca_k: f32) -> FogVolume {
        let mut fog = FogVolume {
            field,
            abs_k: 0.0,
            sca_k: 0.0,
            maj_ext_k: 0.0,
            preintegrated: None,
        };
        fog.set_coeffs(maj_ext_k, abs_k, sca_k);
        fog
    }

    pub fn set_coeffs(&mut self, maj_ext_k: f32, abs_k: f32, sca_k: f32) {
        if abs_k + sca_k > maj_ext_k {
            log::warn!(
                "extinction coefficient {} exceeds the majorant {}, free flight sampling will be biased",
                abs_k + sca_k,
                maj_ext_k
            );
        }
        self.maj_ext_k = maj_ext_k;
        self.abs_k = abs_k;
        self.sca_k = sca_k;
    }

    pub fn field(&self) -> &DensityField {
        &self.field
    }

    /// Attaches a grid integrated over this volume's density field.
    pub fn set_preintegrated(&mut self, preintegrated: PreintegratedDensity) {
        self.preintegrated = Some(preintegrated);
    }

    pub fn preintegrated(&self) -> Option<&PreintegratedDensity> {
        self.preintegrated.as_ref()
    }

    pub fn bounds(&self) -> &Aabb {
        self.field.bounds()
    }

    pub fn abs_k(&self) -> f32 {
        self.abs_k
    }

    pub fn sca_k(&self) -> f32 {
        self.sca_k
    }

    pub fn maj_ext_k(&self) -> f32 {
        self.maj_ext_k
    }

    pub fn sample_ext_k(&self, pos: &Point3<f32>) -> f32 {
        (self.abs_k + self.sca_k) * self.field.sample_density(pos)
    }

    pub fn sample_sca_k(&self, pos: &Point3<f32>) -> f32 {
        self.sca_k * self.field.sample_density(pos)
    }

    // constant across the volume
    pub fn sca_albedo(&self) -> f32 {
        let ext_k = self.abs_k + self.sca_k;
        if ext_k > 0.0 { self.sca_k / ext_k } else { 0.0 }
    }

    pub fn intersect(&self, ray: &Ray) -> Option<BoxHit> {
        self.field.intersect(ray)
    }

    /// Samples the distance to the next real collision inside `[ray.t_min, ray.t_max)`
    /// with Woodcock (delta) tracking.
    ///
    /// Tentative collisions are placed with exponential steps of the majorant and accepted
    /// with probability `ext_k / maj_ext_k`. Returns `None` if the ray leaves the range
    /// first. A zero majorant means there is nothing to hit: no random numbers are drawn.
    pub fn sample_free_flight<R: Rng + ?Sized>(&self, ray: &Ray, rng: &mut R) -> Option<f32> {
        if !(self.maj_ext_k > 0.0) || !(ray.t_min < ray.t_max) {
            return None;
        }
        let inv_maj_ext_k = 1.0 / self.maj_ext_k;
        let mut t = ray.t_min;
        loop {
            t -= (1.0 - rng.random::<f32>()).ln() * inv_maj_ext_k;
            if t >= ray.t_max {
                return None;
            }
            let ext_k = self.sample_ext_k(&ray.point_at(t));
            if rng.random::<f32>() * self.maj_ext_k < ext_k {
                return Some(t);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use nalgebra::Vector3;
    use rand::{RngCore, SeedableRng, rngs::StdRng};

    use super::*;

    // density ramps from 0 to 1 along x
    fn ramp_fog(maj_ext_k: f32, abs_k: f32, sca_k: f32) -> FogVolume {
        let bounds = Aabb::new(Point3::new(0.0, 0.0, 0.0), Point3::new(4.0, 1.0, 1.0));
        let field = DensityField::new(bounds, [4, 1, 1], vec![0, 85, 170, 255]).unwrap();
        FogVolume::new(field, maj_ext_k, abs_k, sca_k)
    }

    // counts RNG draws so the zero majorant path can be checked
    struct CountingRng {
        inner: StdRng,
        draws: usize,
    }

    impl RngCore for CountingRng {
        fn next_u32(&mut self) -> u32 {
            self.draws += 1;
            self.inner.next_u32()
        }

        fn next_u64(&mut self) -> u64 {
            self.draws += 1;
            self.inner.next_u64()
        }

        fn fill_bytes(&mut self, dst: &mut [u8]) {
            self.draws += 1;
            self.inner.fill_bytes(dst)
        }
    }

    #[test]
    fn test_coefficients() {
        let fog = ramp_fog(1.0, 0.25, 0.75);
        assert_eq!(fog.sca_albedo(), 0.75);
        let p = Point3::new(3.5, 0.5, 0.5);
        assert!((fog.sample_ext_k(&p) - 1.0).abs() < 1e-6);
        assert!((fog.sample_sca_k(&p) - 0.75).abs() < 1e-6);

        let clear = ramp_fog(0.0, 0.0, 0.0);
        assert_eq!(clear.sca_albedo(), 0.0);
    }

    #[test]
    fn test_zero_majorant_never_collides() {
        let fog = ramp_fog(0.0, 0.0, 0.0);
        let mut rng = CountingRng {
            inner: StdRng::seed_from_u64(1),
            draws: 0,
        };
        let ray = Ray::new(Point3::new(0.0, 0.5, 0.5), Vector3::x());
        for _ in 0..100 {
            assert!(fog.sample_free_flight(&ray, &mut rng).is_none());
        }
        assert_eq!(rng.draws, 0);
    }

    #[test]
    fn test_collisions_stay_in_range() {
        let fog = ramp_fog(1.0, 0.5, 0.5);
        let mut rng = StdRng::seed_from_u64(2);
        let mut ray = Ray::new(Point3::new(0.0, 0.5, 0.5), Vector3::x());
        ray.set_valid_range(1.0, 3.0);
        for _ in 0..1000 {
            if let Some(t) = fog.sample_free_flight(&ray, &mut rng) {
                assert!((1.0..3.0).contains(&t));
            }
        }
    }

    #[test]
    fn test_transmittance_matches_ray_marching() {
        let fog = ramp_fog(2.0, 0.5, 1.0);
        let mut ray = Ray::new(Point3::new(0.0, 0.5, 0.5), Vector3::x());
        ray.set_valid_range(0.0, 4.0);

        // reference optical depth with the midpoint rule
        let steps = 20_000;
        let dt = 4.0 / steps as f32;
        let optical_depth: f32 = (0..steps)
            .map(|i| fog.sample_ext_k(&ray.point_at((i as f32 + 0.5) * dt)) * dt)
            .sum();
        let expected = (-optical_depth).exp();

        let mut rng = StdRng::seed_from_u64(3);
        let n = 40_000;
        let escaped = (0..n)
            .filter(|_| fog.sample_free_flight(&ray, &mut rng).is_none())
            .count();
        let estimate = escaped as f32 / n as f32;
        assert!(
            (estimate - expected).abs() < 0.015,
            "estimate {estimate}, expected {expected}"
        );
    }
}
