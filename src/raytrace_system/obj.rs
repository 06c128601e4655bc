//! Wavefront OBJ scenes with their MTL material libraries.
//!
//! Only vertex positions, faces and material groups are read; texture coordinates and
//! normals are skipped. Polygons become triangle fans, and the faces of each material
//! are gathered into one mesh of a [`SceneDescription`].

use std::{
    collections::HashMap,
    fs::File,
    io::{BufRead, BufReader},
    path::Path,
};

use super::scene::{MaterialDescription, MeshDescription, SceneDescription};
use crate::error::{Error, Result};

// faces before the first `usemtl`
const DEFAULT_MATERIAL: &str = "default";

fn grey(name: &str) -> MaterialDescription {
    MaterialDescription {
        name: name.to_string(),
        diffuse: [0.5; 3],
        specular: [0.0; 3],
        shininess: 1.0,
        emission: [0.0; 3],
    }
}

fn parse_vec3<'a>(mut tokens: impl Iterator<Item = &'a str>) -> Option<[f32; 3]> {
    let mut v = [0.0; 3];
    for c in v.iter_mut() {
        *c = tokens.next()?.parse().ok()?;
    }
    Some(v)
}

// `v`, `v/vt` or `v/vt/vn`; 1-based, or negative to count back from the last position
fn position_index(token: &str, n_positions: usize) -> Option<usize> {
    let idx: i64 = token.split('/').next()?.parse().ok()?;
    let idx = if idx > 0 { idx - 1 } else { n_positions as i64 + idx };
    (0..n_positions as i64)
        .contains(&idx)
        .then_some(idx as usize)
}

/// Reads the materials of an MTL file. A missing library is not fatal, the materials
/// it should have defined fall back to grey.
fn parse_mtl(path: &Path) -> Result<Vec<MaterialDescription>> {
    let file = match File::open(path) {
        Ok(file) => file,
        Err(e) => {
            log::warn!("skipping material library {}: {e}", path.display());
            return Ok(vec![]);
        }
    };

    let mut materials = vec![];
    for (line_no, line) in BufReader::new(file).lines().enumerate() {
        let line = line?;
        let mut tokens = line.split_whitespace();
        let Some(tag) = tokens.next() else {
            continue;
        };
        if tag == "newmtl" {
            let name = tokens.next().unwrap_or(DEFAULT_MATERIAL);
            materials.push(MaterialDescription {
                diffuse: [0.0; 3],
                ..grey(name)
            });
            continue;
        }
        let Some(material) = materials.last_mut() else {
            continue;
        };
        let bad_value = || {
            Error::invalid_scene(format!(
                "{}:{}: bad value for '{tag}'",
                path.display(),
                line_no + 1
            ))
        };
        match tag {
            "Kd" => material.diffuse = parse_vec3(tokens).ok_or_else(bad_value)?,
            "Ks" => material.specular = parse_vec3(tokens).ok_or_else(bad_value)?,
            "Ke" => material.emission = parse_vec3(tokens).ok_or_else(bad_value)?,
            "Ns" => {
                material.shininess = tokens
                    .next()
                    .and_then(|t| t.parse().ok())
                    .ok_or_else(bad_value)?
            }
            _ => {}
        }
    }
    Ok(materials)
}

// triangles of one material, with vertices renumbered in order of first use
#[derive(Default)]
struct MeshBuilder {
    positions: Vec<[f32; 3]>,
    indices: Vec<[u32; 3]>,
    remap: HashMap<usize, u32>,
}

impl MeshBuilder {
    fn vertex(&mut self, positions: &[[f32; 3]], idx: usize) -> u32 {
        if let Some(&local) = self.remap.get(&idx) {
            return local;
        }
        let local = self.positions.len() as u32;
        self.positions.push(positions[idx]);
        self.remap.insert(idx, local);
        local
    }
}

/// Loads an OBJ file, and the MTL libraries it names from the same directory.
pub fn load_obj(path: &Path) -> Result<SceneDescription> {
    if !path.exists() {
        return Err(Error::FileNotFound(path.to_path_buf()));
    }
    let base_dir = path.parent().unwrap_or(Path::new("."));
    let reader = BufReader::new(File::open(path)?);

    let mut positions: Vec<[f32; 3]> = vec![];
    let mut library: HashMap<String, MaterialDescription> = HashMap::new();
    let mut meshes: Vec<(String, MeshBuilder)> = vec![];
    let mut mesh_lookup: HashMap<String, usize> = HashMap::new();
    let mut current = DEFAULT_MATERIAL.to_string();

    for (line_no, line) in reader.lines().enumerate() {
        let line = line?;
        let parse_error = |what: &str| {
            Error::invalid_scene(format!("{}:{}: {what}", path.display(), line_no + 1))
        };
        let mut tokens = line.split_whitespace();
        match tokens.next() {
            Some("v") => {
                positions.push(parse_vec3(tokens).ok_or_else(|| parse_error("bad vertex"))?)
            }
            Some("mtllib") => {
                for name in tokens {
                    for material in parse_mtl(&base_dir.join(name))? {
                        library.insert(material.name.clone(), material);
                    }
                }
            }
            Some("usemtl") => {
                current = tokens.next().unwrap_or(DEFAULT_MATERIAL).to_string();
            }
            Some("f") => {
                let face = tokens
                    .map(|t| position_index(t, positions.len()))
                    .collect::<Option<Vec<usize>>>()
                    .ok_or_else(|| parse_error("face index out of range"))?;
                if face.len() < 3 {
                    return Err(parse_error("face has fewer than 3 vertices"));
                }

                let mesh_idx = *mesh_lookup.entry(current.clone()).or_insert_with(|| {
                    meshes.push((current.clone(), MeshBuilder::default()));
                    meshes.len() - 1
                });
                let mesh = &mut meshes[mesh_idx].1;
                let first = mesh.vertex(&positions, face[0]);
                for pair in face[1..].windows(2) {
                    let b = mesh.vertex(&positions, pair[0]);
                    let c = mesh.vertex(&positions, pair[1]);
                    mesh.indices.push([first, b, c]);
                }
            }
            _ => {}
        }
    }

    let mut description = SceneDescription::default();
    for (name, mesh) in meshes {
        let material = library.remove(&name).unwrap_or_else(|| {
            if name != DEFAULT_MATERIAL {
                log::warn!("material '{name}' is not defined, using grey");
            }
            grey(&name)
        });
        description.materials.push(material);
        description.meshes.push(MeshDescription {
            material: name,
            positions: mesh.positions,
            indices: mesh.indices,
        });
    }
    log::info!(
        "loaded {} meshes with {} triangles from {}",
        description.meshes.len(),
        description
            .meshes
            .iter()
            .map(|m| m.indices.len())
            .sum::<usize>(),
        path.display()
    );
    Ok(description)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::settings::KdTreeSettings;

    const ROOM_OBJ: &str = "\
# floor quad and a light triangle
mtllib room.mtl
v -1 0 -1
v 1 0 -1
v 1 0 1
v -1 0 1
usemtl floor
f 1/1/1 4/2/1 3/3/1 2/4/1
v 0 2 0
v 1 2 0
v 0 2 1
usemtl lamp
f -3 -1 -2
";

    const ROOM_MTL: &str = "\
newmtl floor
Kd 0.8 0.6 0.4
Ks 0.1 0.1 0.1
Ns 20

newmtl lamp
Kd 0 0 0
Ke 5 5 5
";

    fn write_room(dir: &Path, mtl: Option<&str>) -> std::path::PathBuf {
        let obj_path = dir.join("room.obj");
        std::fs::write(&obj_path, ROOM_OBJ).unwrap();
        if let Some(mtl) = mtl {
            std::fs::write(dir.join("room.mtl"), mtl).unwrap();
        }
        obj_path
    }

    #[test]
    fn test_position_index() {
        assert_eq!(position_index("1", 3), Some(0));
        assert_eq!(position_index("3/7/2", 3), Some(2));
        assert_eq!(position_index("-1//4", 3), Some(2));
        assert_eq!(position_index("0", 3), None);
        assert_eq!(position_index("4", 3), None);
        assert_eq!(position_index("-4", 3), None);
        assert_eq!(position_index("x", 3), None);
    }

    #[test]
    fn test_load_groups_faces_by_material() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_room(dir.path(), Some(ROOM_MTL));
        let description = load_obj(&path).unwrap();

        assert_eq!(description.meshes.len(), 2);
        let floor = &description.meshes[0];
        assert_eq!(floor.material, "floor");
        assert_eq!(floor.positions.len(), 4);
        // fan around the first corner
        assert_eq!(floor.indices, vec![[0, 1, 2], [0, 2, 3]]);
        assert_eq!(floor.positions[1], [-1.0, 0.0, 1.0]);

        let lamp = &description.meshes[1];
        assert_eq!(lamp.indices, vec![[0, 1, 2]]);
        assert_eq!(lamp.positions, vec![[0.0, 2.0, 0.0], [0.0, 2.0, 1.0], [1.0, 2.0, 0.0]]);

        let floor_mat = &description.materials[0];
        assert_eq!(floor_mat.diffuse, [0.8, 0.6, 0.4]);
        assert_eq!(floor_mat.specular, [0.1; 3]);
        assert_eq!(floor_mat.shininess, 20.0);
        assert_eq!(description.materials[1].emission, [5.0; 3]);

        let surfaces = description.build(&KdTreeSettings::default()).unwrap();
        assert_eq!(surfaces.triangles().len(), 3);
        assert!(surfaces.material(1).is_emissive());
        // the floor winding faces up
        let floor_tri = &surfaces.triangles()[0];
        assert!(floor_tri.normal(surfaces.vertices()).y > 0.0);
    }

    #[test]
    fn test_missing_library_falls_back_to_grey() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_room(dir.path(), None);
        let description = load_obj(&path).unwrap();
        assert_eq!(description.materials.len(), 2);
        for material in &description.materials {
            assert_eq!(material.diffuse, [0.5; 3]);
            assert_eq!(material.emission, [0.0; 3]);
        }
    }

    #[test]
    fn test_bad_faces_report_the_line() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bad.obj");
        std::fs::write(&path, "v 0 0 0\nv 1 0 0\nv 0 1 0\nf 1 2 3\nf 1 2 9\n").unwrap();
        match load_obj(&path) {
            Err(Error::InvalidScene(msg)) => assert!(msg.ends_with(":5: face index out of range")),
            other => panic!("unexpected result {other:?}"),
        }

        std::fs::write(&path, "v 0 0 0\nv 1 0 0\nf 1 2\n").unwrap();
        assert!(matches!(load_obj(&path), Err(Error::InvalidScene(_))));
    }

    #[test]
    fn test_faces_without_material_use_default() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("plain.obj");
        std::fs::write(&path, "v 0 0 0\nv 1 0 0\nv 0 1 0\nf 1 2 3\n").unwrap();
        let description = load_obj(&path).unwrap();
        assert_eq!(description.meshes[0].material, DEFAULT_MATERIAL);
        assert_eq!(description.materials[0].diffuse, [0.5; 3]);
    }
}
