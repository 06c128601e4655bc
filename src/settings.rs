//! Tunable parameters, loadable from a JSON file.
//!
//! Every section has a `Default` matching the reference Cornell box setup, and every
//! field is optional in the JSON, so a settings file only needs to list overrides.

use std::path::{Path, PathBuf};

use nalgebra::{Point3, Vector3};
use serde::Deserialize;

use crate::error::{Error, Result};

#[derive(Clone, Debug, Default, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub kdtree: KdTreeSettings,
    pub fog: FogSettings,
    pub tracer: TracerSettings,
    pub primary_light: PrimaryLightSettings,
    pub camera: CameraSettings,
}

#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct KdTreeSettings {
    // cost of a single primitive intersection test
    pub intersection_cost: u32,
    // cost of stepping through an interior node
    pub traversal_cost: u32,
    // None means 8 + 1.3 * log2(n)
    pub max_depth: Option<u32>,
    // nodes with this many primitives or fewer become leaves
    pub min_prims_per_leaf: u32,
    // cost reduction for splits that leave one side empty
    pub empty_bonus: f32,
}

impl Default for KdTreeSettings {
    fn default() -> KdTreeSettings {
        KdTreeSettings {
            intersection_cost: 10,
            traversal_cost: 1,
            max_depth: None,
            min_prims_per_leaf: 2,
            empty_bonus: 0.25,
        }
    }
}

#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct FogSettings {
    pub enabled: bool,
    pub resolution: [u32; 3],
    // base frequency of the noise, in lattice cells across the volume
    pub frequency: f32,
    // amplitude of the first octave, in (0, 1]
    pub amplitude: f32,
    pub octaves: u32,
    pub seed: u32,
    // absorption coefficient per unit density
    pub abs_k: f32,
    // scattering coefficient per unit density
    pub sca_k: f32,
    // majorant extinction coefficient, must be >= abs_k + sca_k
    pub maj_ext_k: f32,
    // the fog (and VPL placement) stops at this height
    pub max_fog_height: f32,
    // cached density grid; generated and written here when missing
    pub density_file: Option<PathBuf>,
    // cached preintegrated density grid; loaded when present, computed on request
    pub preintegrated_file: Option<PathBuf>,
}

impl Default for FogSettings {
    fn default() -> FogSettings {
        FogSettings {
            enabled: true,
            resolution: [64, 64, 64],
            frequency: 12.0,
            amplitude: 1.0,
            octaves: 6,
            seed: 0,
            abs_k: 1e-5,
            sca_k: 1e-2,
            maj_ext_k: 0.01001,
            max_fog_height: 548.8,
            density_file: None,
            preintegrated_file: None,
        }
    }
}

#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct TracerSettings {
    pub max_vpls: usize,
    // number of light bounces per path
    pub bounces: u32,
    // survival probability for russian roulette at surfaces
    pub survival_p: f32,
    // henyey-greenstein asymmetry parameter
    pub hg_g: f32,
    // paths allowed per requested VPL before giving up
    pub failure_factor: u32,
}

impl Default for TracerSettings {
    fn default() -> TracerSettings {
        TracerSettings {
            max_vpls: 150,
            bounces: 3,
            survival_p: 0.95,
            hg_g: 0.25,
            failure_factor: 100,
        }
    }
}

#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct PrimaryLightSettings {
    pub position: [f32; 3],
    pub intensity: [f32; 3],
}

impl Default for PrimaryLightSettings {
    fn default() -> PrimaryLightSettings {
        PrimaryLightSettings {
            position: [278.2, 540.0, 279.5],
            intensity: [85000.0, 75000.0, 75000.0],
        }
    }
}

impl PrimaryLightSettings {
    pub fn position(&self) -> Point3<f32> {
        Point3::from(self.position)
    }

    pub fn intensity(&self) -> Vector3<f32> {
        Vector3::from(self.intensity)
    }
}

#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct CameraSettings {
    pub position: [f32; 3],
    pub direction: [f32; 3],
    pub up: [f32; 3],
    // vertical field of view in radians, spread over the `up` axis
    pub v_fov: f32,
    pub resolution: [u32; 2],
}

impl Default for CameraSettings {
    fn default() -> CameraSettings {
        CameraSettings {
            position: [278.0, 273.0, -800.0],
            direction: [0.0, 0.0, 1.0],
            up: [0.0, 1.0, 0.0],
            v_fov: 0.22 * std::f32::consts::PI,
            resolution: [800, 800],
        }
    }
}

impl Settings {
    pub fn load(path: &Path) -> Result<Settings> {
        if !path.exists() {
            return Err(Error::FileNotFound(path.to_path_buf()));
        }
        let settings: Settings = serde_json::from_str(&std::fs::read_to_string(path)?)?;
        settings.validate()?;
        Ok(settings)
    }

    pub fn validate(&self) -> Result<()> {
        if self.kdtree.min_prims_per_leaf == 0 {
            return Err(Error::invalid_settings("kdtree.min_prims_per_leaf must be >= 1"));
        }
        if !(0.0..1.0).contains(&self.kdtree.empty_bonus) {
            return Err(Error::invalid_settings("kdtree.empty_bonus must be in [0, 1)"));
        }
        if self.fog.resolution.iter().any(|&r| r == 0) {
            return Err(Error::invalid_settings("fog.resolution must be positive"));
        }
        if !(self.fog.frequency > 0.0) || !(self.fog.amplitude > 0.0 && self.fog.amplitude <= 1.0)
        {
            return Err(Error::invalid_settings(
                "fog.frequency must be positive and fog.amplitude in (0, 1]",
            ));
        }
        if self.fog.abs_k < 0.0 || self.fog.sca_k < 0.0 || self.fog.maj_ext_k < 0.0 {
            return Err(Error::invalid_settings("fog coefficients must be non-negative"));
        }
        if !(self.tracer.survival_p > 0.0 && self.tracer.survival_p <= 1.0) {
            return Err(Error::invalid_settings("tracer.survival_p must be in (0, 1]"));
        }
        if !(self.tracer.hg_g > -1.0 && self.tracer.hg_g < 1.0) {
            return Err(Error::invalid_settings("tracer.hg_g must be in (-1, 1)"));
        }
        if self.tracer.failure_factor == 0 {
            return Err(Error::invalid_settings("tracer.failure_factor must be >= 1"));
        }
        if self.camera.resolution.iter().any(|&r| r == 0) {
            return Err(Error::invalid_settings("camera.resolution must be positive"));
        }
        Ok(())
    }
}
