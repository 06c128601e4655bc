use nalgebra::{Matrix3, Vector3};

pub const PI: f32 = std::f32::consts::PI;
pub const TWO_PI: f32 = 2.0 * std::f32::consts::PI;
pub const INV_PI: f32 = std::f32::consts::FRAC_1_PI;

// sRGB luminous efficiency of red, green and blue
pub const LUMINOUS_EFFICIENCY: [f32; 3] = [0.2126, 0.7152, 0.0722];

#[inline]
pub fn sq(v: f32) -> f32 {
    v * v
}

#[inline]
pub fn luminance(rgb: &Vector3<f32>) -> f32 {
    rgb.dot(&Vector3::from(LUMINOUS_EFFICIENCY))
}

// exponent `e` such that |t| = m * 2^e with m in [0.5, 1), like C's frexp
fn frexp_exponent(t: f32) -> i32 {
    if t == 0.0 || !t.is_finite() {
        return 0;
    }
    let biased = (t.abs().to_bits() >> 23) as i32;
    if biased == 0 {
        // subnormal: scale into the normal range first
        frexp_exponent(t * 2f32.powi(25)) - 25
    } else {
        biased - 126
    }
}

/// Returns an epsilon matching the magnitude of `t`: `2 * EPS * 2^exp(t)`.
///
/// Used to pad ray intervals so hits that land exactly on a box or split plane
/// are not lost to rounding.
#[inline]
pub fn rescaled_eps(t: f32) -> f32 {
    f32::EPSILON * 2f32.powi(frexp_exponent(t) + 1)
}

// spans an orthonormal right-handed frame around `normal`
// columns are tangent (x), bitangent (y), normal (z)
pub fn span_tangent_space(normal: &Vector3<f32>) -> Matrix3<f32> {
    debug_assert!((normal.norm() - 1.0).abs() <= 1e-4);
    let c1 = normal.cross(&Vector3::z());
    let c2 = normal.cross(&Vector3::y());
    let c3 = if c1.norm() > c2.norm() { c1 } else { c2 };
    let tangent = (-c3).normalize();
    let bitangent = normal.cross(&tangent);
    Matrix3::from_columns(&[tangent, bitangent, *normal])
}

// unit vector from spherical angles; z is the pole
#[inline]
pub fn vec_from_sin_cos(phi: f32, sin_the: f32, cos_the: f32) -> Vector3<f32> {
    Vector3::new(sin_the * phi.cos(), sin_the * phi.sin(), cos_the)
}

// uniform direction on the +z hemisphere, pdf = 1 / (2 * PI)
pub fn uniform_hemisphere_dir(u1: f32, u2: f32) -> (Vector3<f32>, f32) {
    let phi = TWO_PI * u1;
    let cos_the = u2;
    let sin_the = (1.0 - cos_the * cos_the).max(0.0).sqrt();
    (vec_from_sin_cos(phi, sin_the, cos_the), 0.5 * INV_PI)
}

// cosine-distributed direction on the +z hemisphere, pdf = cos(the) / PI
pub fn cos_hemisphere_dir(u1: f32, u2: f32) -> Vector3<f32> {
    let phi = TWO_PI * u1;
    let sq_cos_the = u2;
    let sin_the = (1.0 - sq_cos_the).max(0.0).sqrt();
    vec_from_sin_cos(phi, sin_the, sq_cos_the.sqrt())
}

// cosine^n-distributed direction on the +z hemisphere, pdf = (n + 1) * cos^n(the) / (2 * PI)
pub fn cos_pow_hemisphere_dir(u1: f32, u2: f32, n: f32) -> Vector3<f32> {
    let phi = TWO_PI * u1;
    let cos_the = u2.powf(1.0 / (n + 1.0));
    let sin_the = (1.0 - cos_the * cos_the).max(0.0).sqrt();
    vec_from_sin_cos(phi, sin_the, cos_the)
}

#[inline]
pub fn lerp(a: f32, b: f32, t: f32) -> f32 {
    (1.0 - t) * a + t * b
}

// corners are indexed [z][y][x]
pub fn lerp3d(c: [[[f32; 2]; 2]; 2], tx: f32, ty: f32, tz: f32) -> f32 {
    let plane = |z: usize| {
        let i0 = lerp(c[z][0][0], c[z][0][1], tx);
        let i1 = lerp(c[z][1][0], c[z][1][1], tx);
        lerp(i0, i1, ty)
    };
    lerp(plane(0), plane(1), tz)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rescaled_eps_matches_magnitude() {
        // 1.0 = 0.5 * 2^1
        assert_eq!(rescaled_eps(1.0), 4.0 * f32::EPSILON);
        assert_eq!(rescaled_eps(0.75), 2.0 * f32::EPSILON);
        assert_eq!(rescaled_eps(1000.0), f32::EPSILON * 2f32.powi(11));
        assert_eq!(rescaled_eps(-1000.0), rescaled_eps(1000.0));
        assert_eq!(rescaled_eps(0.0), 2.0 * f32::EPSILON);
        // underflows like ldexp for tiny subnormals
        let tiny = rescaled_eps(1e-40);
        assert!(tiny.is_finite() && tiny >= 0.0);
    }

    #[test]
    fn test_tangent_space_is_orthonormal() {
        for n in [
            Vector3::new(0.0, 0.0, 1.0),
            Vector3::new(0.0, 1.0, 0.0),
            Vector3::new(1.0, 2.0, -3.0).normalize(),
        ] {
            let m = span_tangent_space(&n);
            let (t, b, z) = (m.column(0), m.column(1), m.column(2));
            assert!((t.norm() - 1.0).abs() < 1e-5);
            assert!((b.norm() - 1.0).abs() < 1e-5);
            assert!(t.dot(&b).abs() < 1e-5);
            assert!(t.dot(&z).abs() < 1e-5);
            // right handed
            assert!((t.cross(&b) - z).norm() < 1e-5);
            // local +z maps onto the normal
            assert!((m * Vector3::z() - n).norm() < 1e-5);
        }
    }

    #[test]
    fn test_hemisphere_samples_stay_above() {
        for i in 0..16 {
            for j in 0..16 {
                let (u1, u2) = (i as f32 / 16.0, j as f32 / 16.0);
                assert!(uniform_hemisphere_dir(u1, u2).0.z >= 0.0);
                assert!(cos_hemisphere_dir(u1, u2).z >= 0.0);
                let d = cos_pow_hemisphere_dir(u1, u2, 20.0);
                assert!(d.z >= 0.0);
                assert!((d.norm() - 1.0).abs() < 1e-5);
            }
        }
    }

    #[test]
    fn test_lerp3d_corners() {
        let c = [[[0.0, 1.0], [2.0, 3.0]], [[4.0, 5.0], [6.0, 7.0]]];
        assert_eq!(lerp3d(c, 0.0, 0.0, 0.0), 0.0);
        assert_eq!(lerp3d(c, 1.0, 0.0, 0.0), 1.0);
        assert_eq!(lerp3d(c, 0.0, 1.0, 0.0), 2.0);
        assert_eq!(lerp3d(c, 1.0, 1.0, 1.0), 7.0);
        assert!((lerp3d(c, 0.5, 0.5, 0.5) - 3.5).abs() < 1e-6);
    }
}
