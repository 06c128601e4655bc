//! Virtual point light generation for scenes with heterogeneous fog.
//!
//! Surfaces are traced through a SAH k-d tree, fog is a byte density grid sampled with
//! trilinear interpolation, and photon paths are walked through both with Woodcock
//! tracking and Russian roulette to leave VPLs for a later gathering pass.

pub mod camera;
pub mod error;
pub mod fog_system;
pub mod raytrace_system;
pub mod settings;
pub mod utils;
pub mod vpl_system;
