//! Scene geometry and the queries the tracers run against it.
//!
//! A [`SceneDescription`] is the file form, read from JSON or OBJ: named materials given
//! as reflectances, and meshes with mesh-local vertex indices. It is flattened into a
//! [`SurfaceScene`] which owns the vertex, material and triangle arrays plus the k-d tree
//! over them.

use std::{collections::HashMap, path::Path, sync::Arc};

use nalgebra::{Point3, Vector3};
use rand::Rng;
use serde::Deserialize;

use super::{
    kdtree::{
        KdTree,
        aabb::{Aabb, BoxHit},
    },
    material::PhongMaterial,
    obj,
    ray::Ray,
    triangle::Triangle,
};
use crate::{
    error::{Error, Result},
    fog_system::fog_volume::FogVolume,
    settings::KdTreeSettings,
};

fn default_shininess() -> f32 {
    1.0
}

#[derive(Clone, Debug, Deserialize)]
pub struct MaterialDescription {
    pub name: String,
    // diffuse reflectance
    pub diffuse: [f32; 3],
    // specular reflectance
    #[serde(default)]
    pub specular: [f32; 3],
    #[serde(default = "default_shininess")]
    pub shininess: f32,
    #[serde(default)]
    pub emission: [f32; 3],
}

#[derive(Clone, Debug, Deserialize)]
pub struct MeshDescription {
    pub material: String,
    pub positions: Vec<[f32; 3]>,
    // counter-clockwise triangles, indexing `positions`
    pub indices: Vec<[u32; 3]>,
}

#[derive(Clone, Debug, Default, Deserialize)]
pub struct SceneDescription {
    pub materials: Vec<MaterialDescription>,
    pub meshes: Vec<MeshDescription>,
}

impl SceneDescription {
    /// Reads a scene from a `.obj` file (with its MTL libraries) or from JSON.
    pub fn load(path: &Path) -> Result<SceneDescription> {
        if !path.exists() {
            return Err(Error::FileNotFound(path.to_path_buf()));
        }
        let is_obj = path
            .extension()
            .is_some_and(|ext| ext.eq_ignore_ascii_case("obj"));
        if is_obj {
            return obj::load_obj(path);
        }
        Ok(serde_json::from_str(&std::fs::read_to_string(path)?)?)
    }

    /// Flattens all meshes into shared buffers and builds the k-d tree.
    pub fn build(&self, settings: &KdTreeSettings) -> Result<SurfaceScene> {
        let mut material_lookup = HashMap::new();
        let mut materials = vec![];
        for m in &self.materials {
            if material_lookup
                .insert(m.name.clone(), materials.len() as u32)
                .is_some()
            {
                return Err(Error::invalid_scene(format!(
                    "duplicate material '{}'",
                    m.name
                )));
            }
            materials.push(PhongMaterial::from_reflectance(
                Vector3::from(m.diffuse),
                Vector3::from(m.specular),
                m.shininess,
                Vector3::from(m.emission),
            ));
        }

        let mut vertices = vec![];
        let mut triangles = vec![];
        for (mesh_idx, mesh) in self.meshes.iter().enumerate() {
            let &material = material_lookup.get(&mesh.material).ok_or_else(|| {
                Error::invalid_scene(format!(
                    "mesh {} uses unknown material '{}'",
                    mesh_idx, mesh.material
                ))
            })?;
            let start_idx = vertices.len() as u32;
            vertices.extend(mesh.positions.iter().map(|&p| Point3::from(p)));
            for idx in &mesh.indices {
                if idx.iter().any(|&i| i as usize >= mesh.positions.len()) {
                    return Err(Error::invalid_scene(format!(
                        "mesh {} has index {:?} out of range for {} vertices",
                        mesh_idx,
                        idx,
                        mesh.positions.len()
                    )));
                }
                triangles.push(Triangle::new(idx.map(|i| start_idx + i), material));
            }
        }

        SurfaceScene::new(vertices, materials, triangles, settings)
    }
}

/// Immutable scene geometry with its acceleration structure.
///
/// Shared behind an `Arc` so worker threads can trace rays without locking.
#[derive(Clone, Debug)]
pub struct SurfaceScene {
    vertices: Vec<Point3<f32>>,
    materials: Vec<PhongMaterial>,
    triangles: Vec<Triangle>,
    kdtree: KdTree,
}

impl SurfaceScene {
    pub fn new(
        vertices: Vec<Point3<f32>>,
        materials: Vec<PhongMaterial>,
        triangles: Vec<Triangle>,
        settings: &KdTreeSettings,
    ) -> Result<SurfaceScene> {
        for (i, t) in triangles.iter().enumerate() {
            if t.indices.iter().any(|&v| v as usize >= vertices.len()) {
                return Err(Error::invalid_scene(format!(
                    "triangle {i} references a missing vertex"
                )));
            }
            if t.material as usize >= materials.len() {
                return Err(Error::invalid_scene(format!(
                    "triangle {i} references missing material {}",
                    t.material
                )));
            }
        }
        let kdtree = KdTree::build(&triangles, &vertices, settings)?;
        Ok(SurfaceScene {
            vertices,
            materials,
            triangles,
            kdtree,
        })
    }

    pub fn vertices(&self) -> &[Point3<f32>] {
        &self.vertices
    }

    pub fn materials(&self) -> &[PhongMaterial] {
        &self.materials
    }

    pub fn material(&self, index: u32) -> &PhongMaterial {
        &self.materials[index as usize]
    }

    pub fn triangles(&self) -> &[Triangle] {
        &self.triangles
    }

    pub fn kdtree(&self) -> &KdTree {
        &self.kdtree
    }

    pub fn bounds(&self) -> &Aabb {
        self.kdtree.bounds()
    }

    /// Finds the closest surface along `ray`; the hit normal is normalized unless this is
    /// a visibility query.
    pub fn trace(&self, ray: &mut Ray, visibility_only: bool) -> bool {
        if !self
            .kdtree
            .intersect(&self.triangles, &self.vertices, ray, visibility_only)
        {
            return false;
        }
        if !visibility_only {
            ray.hit.normal = ray.hit.normal.normalize();
        }
        true
    }
}

/// Surfaces plus optional fog, as seen by the photon tracer.
#[derive(Clone, Debug)]
pub struct Scene {
    surfaces: Arc<SurfaceScene>,
    fog: Option<FogVolume>,
    fog_enabled: bool,
    // fog and VPLs only exist below this height (y)
    fog_ceiling: f32,
}

impl Scene {
    pub fn new(surfaces: Arc<SurfaceScene>, fog_ceiling: f32) -> Scene {
        Scene {
            surfaces,
            fog: None,
            fog_enabled: false,
            fog_ceiling,
        }
    }

    pub fn surfaces(&self) -> &Arc<SurfaceScene> {
        &self.surfaces
    }

    pub fn fog_ceiling(&self) -> f32 {
        self.fog_ceiling
    }

    // the region the fog fills: the scene bounds, cut off at the fog ceiling
    pub fn fog_bounds(&self) -> Aabb {
        let mut bounds = *self.surfaces.bounds();
        bounds.max.y = bounds.max.y.min(self.fog_ceiling);
        bounds
    }

    pub fn add_fog(&mut self, fog: FogVolume) {
        self.fog = Some(fog);
        self.fog_enabled = true;
    }

    pub fn fog(&self) -> Option<&FogVolume> {
        self.fog.as_ref()
    }

    pub fn fog_enabled(&self) -> bool {
        self.fog_enabled && self.fog.is_some()
    }

    pub fn toggle_fog(&mut self) {
        self.fog_enabled = !self.fog_enabled;
    }

    pub fn update_fog_coeffs(&mut self, maj_ext_k: f32, abs_k: f32, sca_k: f32) -> Result<()> {
        match &mut self.fog {
            Some(fog) => {
                fog.set_coeffs(maj_ext_k, abs_k, sca_k);
                Ok(())
            }
            None => Err(Error::invalid_settings("scene has no fog")),
        }
    }

    fn active_fog(&self) -> Option<&FogVolume> {
        self.fog.as_ref().filter(|_| self.fog_enabled)
    }

    pub fn trace(&self, ray: &mut Ray, visibility_only: bool) -> bool {
        self.surfaces.trace(ray, visibility_only)
    }

    pub fn trace_fog(&self, ray: &Ray) -> Option<BoxHit> {
        self.active_fog()?.intersect(ray)
    }

    pub fn material(&self, index: u32) -> &PhongMaterial {
        self.surfaces.material(index)
    }

    pub fn sample_sca_k(&self, pos: &Point3<f32>) -> f32 {
        self.active_fog().map_or(0.0, |fog| fog.sample_sca_k(pos))
    }

    pub fn sample_ext_k(&self, pos: &Point3<f32>) -> f32 {
        self.active_fog().map_or(0.0, |fog| fog.sample_ext_k(pos))
    }

    pub fn maj_ext_k(&self) -> f32 {
        self.active_fog().map_or(0.0, |fog| fog.maj_ext_k())
    }

    pub fn sca_albedo(&self) -> f32 {
        self.active_fog().map_or(0.0, |fog| fog.sca_albedo())
    }

    // distance to the next collision in the fog within the ray's valid range
    pub fn sample_free_flight<R: Rng + ?Sized>(&self, ray: &Ray, rng: &mut R) -> Option<f32> {
        self.active_fog()?.sample_free_flight(ray, rng)
    }
}

// size of the reference Cornell box
const BOX_DIMS: [f32; 3] = [556.0, 548.8, 559.2];

fn quad(material: &str, origin: [f32; 3], u: [f32; 3], v: [f32; 3]) -> MeshDescription {
    let (o, u, v) = (Vector3::from(origin), Vector3::from(u), Vector3::from(v));
    MeshDescription {
        material: material.to_string(),
        positions: [o, o + u, o + u + v, o + v]
            .iter()
            .map(|p| [p.x, p.y, p.z])
            .collect(),
        // normal is u x v
        indices: vec![[0, 1, 2], [0, 2, 3]],
    }
}

// axis aligned box with outward facing triangles
fn cuboid(material: &str, min: [f32; 3], max: [f32; 3]) -> Vec<MeshDescription> {
    let [dx, dy, dz] = [max[0] - min[0], max[1] - min[1], max[2] - min[2]];
    vec![
        // left face
        quad(material, min, [0.0, 0.0, dz], [0.0, dy, 0.0]),
        // right face
        quad(material, [max[0], min[1], min[2]], [0.0, dy, 0.0], [0.0, 0.0, dz]),
        // lower face
        quad(material, min, [dx, 0.0, 0.0], [0.0, 0.0, dz]),
        // upper face
        quad(material, [min[0], max[1], min[2]], [0.0, 0.0, dz], [dx, 0.0, 0.0]),
        // back face
        quad(material, min, [0.0, dy, 0.0], [dx, 0.0, 0.0]),
        // front face
        quad(material, [min[0], min[1], max[2]], [dx, 0.0, 0.0], [0.0, dy, 0.0]),
    ]
}

fn material(name: &str, diffuse: [f32; 3], specular: [f32; 3], shininess: f32) -> MaterialDescription {
    MaterialDescription {
        name: name.to_string(),
        diffuse,
        specular,
        shininess,
        emission: [0.0; 3],
    }
}

/// The Cornell box: white floor, ceiling and back wall, a red wall at +x, a green wall
/// at x = 0, an emissive ceiling panel and two blocks. The box is open towards -z.
pub fn cornell_box() -> SceneDescription {
    let [x, y, z] = BOX_DIMS;
    let mut meshes = vec![
        // floor
        quad("white", [0.0, 0.0, 0.0], [0.0, 0.0, z], [x, 0.0, 0.0]),
        // ceiling
        quad("white", [0.0, y, 0.0], [x, 0.0, 0.0], [0.0, 0.0, z]),
        // back wall
        quad("white", [0.0, 0.0, z], [0.0, y, 0.0], [x, 0.0, 0.0]),
        quad("red", [x, 0.0, 0.0], [0.0, 0.0, z], [0.0, y, 0.0]),
        quad("green", [0.0, 0.0, 0.0], [0.0, y, 0.0], [0.0, 0.0, z]),
        // light panel, just below the ceiling
        quad("light", [213.0, y - 0.1, 227.0], [130.0, 0.0, 0.0], [0.0, 0.0, 105.0]),
    ];
    meshes.extend(cuboid("white", [130.0, 0.0, 65.0], [290.0, 165.0, 225.0]));
    meshes.extend(cuboid("glossy", [265.0, 0.0, 270.0], [430.0, 330.0, 435.0]));

    SceneDescription {
        materials: vec![
            material("white", [0.75, 0.75, 0.75], [0.0; 3], 1.0),
            material("red", [0.63, 0.065, 0.05], [0.0; 3], 1.0),
            material("green", [0.14, 0.45, 0.091], [0.0; 3], 1.0),
            material("glossy", [0.5, 0.5, 0.5], [0.25, 0.25, 0.25], 40.0),
            MaterialDescription {
                emission: [17.0, 12.0, 4.0],
                ..material("light", [0.78, 0.78, 0.78], [0.0; 3], 1.0)
            },
        ],
        meshes,
    }
}
