//! Photon tracing from the primary light, leaving VPLs at surface and fog interactions.
//!
//! Each path starts with a uniform hemisphere direction, then alternates between a
//! Woodcock tracked walk through the fog and surface hits, for a fixed number of
//! bounces. Russian roulette on the scattering albedo decides between scattering and
//! absorption in the fog, and a fixed survival probability is used at surfaces.

use nalgebra::{Point3, Vector3};
use rand::Rng;

use super::{
    light_array::LightArray,
    point_light::{PointLight, PrimaryLight, Vpl},
};
use crate::{
    error::{Error, Result},
    raytrace_system::{
        ray::{RAY_OFFSET, Ray},
        scene::Scene,
    },
    settings::TracerSettings,
    utils::{self, TWO_PI},
};

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct TraceStats {
    // paths started, including the ones that left no VPL
    pub paths: u32,
    pub vpls: usize,
    pub medium_vpls: usize,
    pub surface_vpls: usize,
}

/// Samples `cos(theta)` from the Henyey-Greenstein phase function by inverting its CDF.
///
/// Positive `g` favours forward scattering. `g == 0` is isotropic.
pub fn sample_hg_cos(g: f32, u: f32) -> f32 {
    if g.abs() < 1e-4 {
        return 1.0 - 2.0 * u;
    }
    let n = 1.0 - utils::sq(g);
    let d = 1.0 - g + 2.0 * g * u;
    (0.5 / g * (1.0 + utils::sq(g) - utils::sq(n / d))).clamp(-1.0, 1.0)
}

/// Henyey-Greenstein phase function value for the angle between the incident and the
/// scattered direction.
pub fn eval_hg(g: f32, cos_the: f32) -> f32 {
    let base = 1.0 + utils::sq(g) - 2.0 * g * cos_the;
    0.25 * utils::INV_PI * (1.0 - utils::sq(g)) / (base * base.sqrt())
}

// new direction after scattering; the phase function is sampled exactly, so the
// throughput is always 1
fn importance_sample_hg<R: Rng + ?Sized>(g: f32, incident: &Vector3<f32>, rng: &mut R) -> Vector3<f32> {
    let phi = TWO_PI * rng.random::<f32>();
    let cos_the = sample_hg_cos(g, rng.random());
    let sin_the = (1.0 - cos_the * cos_the).max(0.0).sqrt();
    let micro_to_macro = utils::span_tangent_space(incident);
    micro_to_macro * utils::vec_from_sin_cos(phi, sin_the, cos_the)
}

enum PathEnd {
    Terminated,
    // the light array reached the requested size
    Full,
}

#[derive(Clone, Debug)]
pub struct PhotonTracer {
    settings: TracerSettings,
}

impl PhotonTracer {
    pub fn new(settings: TracerSettings) -> PhotonTracer {
        PhotonTracer { settings }
    }

    pub fn settings(&self) -> &TracerSettings {
        &self.settings
    }

    /// Clears `lights` and refills it with `max_vpl_count` VPLs traced from `source`.
    ///
    /// Paths are aimed at the hemisphere around `shoot_dir`, or at either that or the
    /// opposite hemisphere when the source sits below the fog ceiling. If the VPLs cannot
    /// be produced within `failure_factor * max_vpl_count` paths, the array is left empty
    /// and [`Error::VplQuotaNotMet`] is returned. Otherwise intensities are divided by
    /// the number of paths traced.
    pub fn trace<R: Rng + ?Sized>(
        &self,
        scene: &Scene,
        source: &PrimaryLight,
        shoot_dir: &Vector3<f32>,
        max_vpl_count: usize,
        lights: &mut LightArray<Vpl>,
        rng: &mut R,
    ) -> Result<TraceStats> {
        lights.clear();
        if max_vpl_count == 0 {
            return Ok(TraceStats::default());
        }
        if max_vpl_count > lights.capacity() {
            return Err(Error::invalid_settings(format!(
                "{} VPLs requested, but the light array only holds {}",
                max_vpl_count,
                lights.capacity()
            )));
        }
        let shoot_dir = shoot_dir
            .try_normalize(f32::EPSILON)
            .ok_or_else(|| Error::invalid_settings("shoot direction has zero length"))?;

        let max_paths = (max_vpl_count as u64 * self.settings.failure_factor as u64)
            .min(u32::MAX as u64) as u32;
        let mut stats = TraceStats::default();
        while lights.len() < max_vpl_count && stats.paths < max_paths {
            stats.paths += 1;
            let path_id = stats.paths - 1;
            if let PathEnd::Full =
                self.trace_path(scene, source, &shoot_dir, path_id, max_vpl_count, lights, &mut stats, rng)?
            {
                break;
            }
        }

        if lights.len() < max_vpl_count {
            log::warn!(
                "only {} of {} VPLs after {} paths, dropping them",
                lights.len(),
                max_vpl_count,
                stats.paths
            );
            let vpls = lights.len();
            lights.clear();
            return Err(Error::VplQuotaNotMet {
                vpls,
                target: max_vpl_count,
                paths: stats.paths,
            });
        }

        lights.normalize_intensity(stats.paths);
        stats.vpls = lights.len();
        log::debug!(
            "traced {} VPLs ({} in fog, {} on surfaces) from {} paths",
            stats.vpls,
            stats.medium_vpls,
            stats.surface_vpls,
            stats.paths
        );
        Ok(stats)
    }

    #[allow(clippy::too_many_arguments)]
    fn trace_path<R: Rng + ?Sized>(
        &self,
        scene: &Scene,
        source: &PrimaryLight,
        shoot_dir: &Vector3<f32>,
        path_id: u32,
        max_vpl_count: usize,
        lights: &mut LightArray<Vpl>,
        stats: &mut TraceStats,
        rng: &mut R,
    ) -> Result<PathEnd> {
        let fog_ceiling = scene.fog_ceiling();
        let source_pos = source.position();

        // below the fog ceiling, shoot into the opposite hemisphere half of the time
        let up = if source_pos.y <= fog_ceiling && rng.random::<f32>() < 0.5 {
            -shoot_dir
        } else {
            *shoot_dir
        };
        let (micro_dir, pdf) = utils::uniform_hemisphere_dir(rng.random(), rng.random());
        let dir = utils::span_tangent_space(&up) * micro_dir;

        let mut ray = Ray::new(source_pos, dir);
        let mut attenuation = Vector3::repeat(1.0 / pdf);

        for _ in 0..self.settings.bounces {
            let hit = scene.trace(&mut ray, false);

            if let Some(fog_hit) = scene.trace_fog(&ray) {
                ray.set_valid_range(fog_hit.entry.max(0.0), fog_hit.exit.min(ray.hit.distance));
                if let Some(t_event) = scene.sample_free_flight(&ray, rng) {
                    // scattering or absorption inside the fog
                    let event_pt = ray.point_at(t_event);
                    if rng.random::<f32>() >= scene.sca_albedo() {
                        return Ok(PathEnd::Terminated);
                    }

                    let incident = ray.dir;
                    lights.add_light(Vpl::in_medium(
                        path_id,
                        event_pt,
                        incident,
                        source.intensity().component_mul(&attenuation),
                        scene.sample_sca_k(&event_pt),
                    ))?;
                    stats.medium_vpls += 1;
                    if lights.len() == max_vpl_count {
                        return Ok(PathEnd::Full);
                    }

                    // free flight sampling accounts for transmittance and the roulette for
                    // the albedo, so the attenuation stays as it is
                    let out_dir = importance_sample_hg(self.settings.hg_g, &incident, rng);
                    ray = Ray::new(event_pt, out_dir);
                    continue;
                }
            }

            if !hit {
                return Ok(PathEnd::Terminated);
            }

            let hit_pt = ray.point_at(ray.hit.distance);
            let normal = ray.hit.normal;
            if ray.dir.dot(&normal) >= 0.0 || hit_pt.y > fog_ceiling {
                // back face, or above the region lit by VPLs
                return Ok(PathEnd::Terminated);
            }
            let Some(material_id) = ray.hit.material else {
                return Ok(PathEnd::Terminated);
            };
            let material = scene.material(material_id);
            if material.is_emissive() {
                // direct light is handled by the primary light
                return Ok(PathEnd::Terminated);
            }

            if rng.random::<f32>() >= self.settings.survival_p {
                return Ok(PathEnd::Terminated);
            }
            attenuation /= self.settings.survival_p;

            let incident = -ray.dir;
            lights.add_light(Vpl::on_surface(
                path_id,
                hit_pt + RAY_OFFSET * normal,
                incident,
                source.intensity().component_mul(&attenuation),
                normal,
                material.k_d,
                material.k_s,
                material.n_s,
            ))?;
            stats.surface_vpls += 1;
            if lights.len() == max_vpl_count {
                return Ok(PathEnd::Full);
            }

            let Some(sample) = material.importance_sample_brdf(&incident, &normal, rng) else {
                return Ok(PathEnd::Terminated);
            };
            let cos_the = sample.dir.dot(&normal);
            if cos_the <= 0.0 {
                // glossy lobe dipped below the surface
                return Ok(PathEnd::Terminated);
            }
            attenuation = attenuation.component_mul(&sample.throughput) * cos_the;
            ray = Ray::offset_along(hit_pt, sample.dir, &normal);
        }
        Ok(PathEnd::Terminated)
    }
}

// aim point used when no explicit target is given: the centre of the floor below the light
pub fn default_target(source: &Point3<f32>) -> Point3<f32> {
    Point3::new(source.x, 0.0, source.z)
}
