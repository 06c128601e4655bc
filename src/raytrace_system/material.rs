use nalgebra::Vector3;
use rand::Rng;

use crate::utils::{self, INV_PI, PI, TWO_PI};

/// Phong BRDF material: `k_d + k_s * cos^n_s(O, S)` with `S` the mirror direction.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct PhongMaterial {
    // diffuse coefficient
    pub k_d: Vector3<f32>,
    // specular coefficient
    pub k_s: Vector3<f32>,
    // specular exponent
    pub n_s: f32,
    // emission
    pub k_e: Vector3<f32>,
}

/// Outcome of sampling the BRDF: the outgoing direction and the BRDF value divided by
/// the sampling pdf (without the cosine term).
#[derive(Clone, Copy, Debug)]
pub struct BrdfSample {
    pub dir: Vector3<f32>,
    pub throughput: Vector3<f32>,
}

// reflects v around n; both point away from the surface
fn reflect(v: &Vector3<f32>, n: &Vector3<f32>) -> Vector3<f32> {
    -v + 2.0 * v.dot(n) * n
}

impl PhongMaterial {
    pub fn new(k_d: Vector3<f32>, k_s: Vector3<f32>, n_s: f32, k_e: Vector3<f32>) -> PhongMaterial {
        PhongMaterial { k_d, k_s, n_s, k_e }
    }

    /// Builds BRDF coefficients from diffuse and specular reflectances.
    ///
    /// Reflectances are rescaled so that `rho_d + rho_s <= 1` per channel, which keeps the
    /// material energy conserving.
    pub fn from_reflectance(
        rho_d: Vector3<f32>,
        rho_s: Vector3<f32>,
        shininess: f32,
        emission: Vector3<f32>,
    ) -> PhongMaterial {
        let sum = rho_d + rho_s;
        let (rho_d, rho_s) = if sum.iter().any(|&c| c > 1.0) {
            (rho_d.component_div(&sum), rho_s.component_div(&sum))
        } else {
            (rho_d, rho_s)
        };
        PhongMaterial {
            k_d: rho_d * INV_PI,
            k_s: rho_s * (shininess + 2.0) * 0.5 * INV_PI,
            n_s: shininess,
            k_e: emission,
        }
    }

    pub fn is_emissive(&self) -> bool {
        self.k_e.iter().any(|&c| c > 0.0)
    }

    /// Picks either the diffuse or the glossy lobe, with probability proportional to
    /// their luminance, and samples a direction matching that lobe.
    ///
    /// `incident` and `normal` both point away from the surface. Returns `None` for
    /// materials that reflect nothing, or when the sample degenerates.
    pub fn importance_sample_brdf<R: Rng + ?Sized>(
        &self,
        incident: &Vector3<f32>,
        normal: &Vector3<f32>,
        rng: &mut R,
    ) -> Option<BrdfSample> {
        let u1: f32 = rng.random();
        let u2: f32 = rng.random();
        let diffuse_weight = utils::luminance(&self.k_d);
        let glossy_weight = utils::luminance(&self.k_s);
        let total_weight = diffuse_weight + glossy_weight;
        if !(total_weight > 0.0) {
            return None;
        }
        let p_diffuse = diffuse_weight / total_weight;

        if rng.random::<f32>() < p_diffuse {
            // diffuse lobe, pdf = cos(the) / PI
            let micro_to_macro = utils::span_tangent_space(normal);
            let micro_dir = utils::cos_hemisphere_dir(u1, u2);
            let cos_the = micro_dir.z;
            if cos_the <= 0.0 {
                return None;
            }
            Some(BrdfSample {
                dir: micro_to_macro * micro_dir,
                throughput: self.k_d * PI / (cos_the * p_diffuse),
            })
        } else {
            // glossy lobe centred on the mirror direction,
            // pdf = (n + 1) * cos^n(O, S) / (2 * PI)
            let s = reflect(incident, normal);
            let micro_to_macro = utils::span_tangent_space(&s);
            let micro_dir = utils::cos_pow_hemisphere_dir(u1, u2, self.n_s);
            let p_glossy = 1.0 - p_diffuse;
            Some(BrdfSample {
                dir: micro_to_macro * micro_dir,
                throughput: self.k_s * TWO_PI / ((self.n_s + 1.0) * p_glossy),
            })
        }
    }
}
