//! Regular grid of fog density samples.
//!
//! Densities are stored as bytes in x-major order (`x + y * res_x + z * res_x * res_y`)
//! and read back normalized to [0, 1]. On disk a grid is three little-endian `i32`
//! resolution values followed by the raw bytes.

use std::{
    fs::File,
    io::{BufReader, BufWriter, Read, Write},
    path::Path,
};

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use nalgebra::Point3;
use noise::{NoiseFn, OpenSimplex};

use crate::{
    error::{Error, Result},
    raytrace_system::{
        kdtree::aabb::{Aabb, BoxHit},
        ray::Ray,
    },
    utils,
};

/// Parameters of the layered noise used by [`DensityField::generate`].
#[derive(Clone, Copy, Debug)]
pub struct NoiseParams {
    // lattice frequency of the first octave across the whole volume
    pub frequency: f32,
    // amplitude of the first octave, in (0, 1]
    pub amplitude: f32,
    pub octaves: u32,
    pub seed: u32,
}

#[derive(Clone, Debug, PartialEq)]
pub struct DensityField {
    bounds: Aabb,
    res: [u32; 3],
    data: Vec<u8>,
}

// reads a grid header; every value must be positive
pub(crate) fn read_resolution<R: Read>(reader: &mut R) -> Result<[u32; 3]> {
    let mut res = [0u32; 3];
    for r in res.iter_mut() {
        let v = reader
            .read_i32::<LittleEndian>()
            .map_err(|e| Error::InvalidDensityFile(format!("truncated header: {e}")))?;
        if v <= 0 {
            return Err(Error::InvalidDensityFile(format!(
                "non-positive resolution {v}"
            )));
        }
        *r = v as u32;
    }
    Ok(res)
}

pub(crate) fn write_resolution<W: Write>(writer: &mut W, res: [u32; 3]) -> Result<()> {
    for r in res {
        writer.write_i32::<LittleEndian>(r as i32)?;
    }
    Ok(())
}

pub(crate) fn voxel_count(res: [u32; 3]) -> Result<usize> {
    res.iter()
        .try_fold(1usize, |acc, &r| acc.checked_mul(r as usize))
        .ok_or_else(|| Error::InvalidDensityFile(format!("resolution {res:?} is too large")))
}

// reads exactly `len` payload bytes; the buffer only grows as data arrives
pub(crate) fn read_payload<R: Read>(reader: &mut R, len: usize) -> Result<Vec<u8>> {
    let mut data = vec![];
    reader.by_ref().take(len as u64).read_to_end(&mut data)?;
    if data.len() != len {
        return Err(Error::InvalidDensityFile(format!(
            "expected {len} data bytes, found {}",
            data.len()
        )));
    }
    Ok(data)
}

impl DensityField {
    pub fn new(bounds: Aabb, res: [u32; 3], data: Vec<u8>) -> Result<DensityField> {
        if res.iter().any(|&r| r == 0 || r > i32::MAX as u32) {
            return Err(Error::InvalidDensityFile(format!(
                "invalid resolution {res:?}"
            )));
        }
        let expected = voxel_count(res)?;
        if data.len() != expected {
            return Err(Error::InvalidDensityFile(format!(
                "expected {} samples, got {}",
                expected,
                data.len()
            )));
        }
        Ok(DensityField { bounds, res, data })
    }

    /// Fills the grid with several octaves of simplex noise.
    ///
    /// Each octave is mapped from [-1, 1] to [0, 0.5], and every octave doubles the
    /// frequency and halves the amplitude. The result is rescaled so that the densest
    /// voxel maps to 1.
    pub fn generate(bounds: Aabb, res: [u32; 3], params: &NoiseParams) -> Result<DensityField> {
        let n_voxels = voxel_count(res)?;
        let noise = OpenSimplex::new(params.seed);
        let octaves = params.octaves.max(1);

        // lattice position normalization, so the far corner maps to 1
        let norm = res.map(|r| if r > 1 { 1.0 / (r - 1) as f32 } else { 0.0 });

        let mut densities = vec![0.0f32; n_voxels];
        for z in 0..res[2] {
            for y in 0..res[1] {
                for x in 0..res[0] {
                    let norm_pos = [
                        x as f32 * norm[0],
                        y as f32 * norm[1],
                        z as f32 * norm[2],
                    ];
                    let mut sum = 0.0;
                    let mut freq = params.frequency;
                    let mut ampl = params.amplitude;
                    for _ in 0..octaves {
                        let val = noise.get(norm_pos.map(|c| (freq * c) as f64)) as f32;
                        sum += ampl * 0.25 * (val.clamp(-1.0, 1.0) + 1.0);
                        freq *= 2.0;
                        ampl /= 2.0;
                    }
                    densities[Self::index(res, x, y, z)] = sum / octaves as f32;
                }
            }
        }

        // rescale before quantizing, so the densest voxel is exactly 255
        let max_dens = densities.iter().fold(0.0f32, |acc, &d| acc.max(d));
        let inv_max_dens = if max_dens > 0.0 { 1.0 / max_dens } else { 0.0 };
        let data: Vec<u8> = densities
            .iter()
            .map(|&d| (255.0 * (d * inv_max_dens).min(1.0)).round() as u8)
            .collect();

        let (min_byte, max_byte, sum) = data.iter().fold((u8::MAX, 0u8, 0u64), |acc, &b| {
            (acc.0.min(b), acc.1.max(b), acc.2 + b as u64)
        });
        log::debug!(
            "generated {:?} density grid: min {:.2}, max {:.2}, avg {:.2}",
            res,
            min_byte as f32 / 255.0,
            max_byte as f32 / 255.0,
            sum as f32 / (255.0 * n_voxels as f32)
        );

        DensityField::new(bounds, res, data)
    }

    fn index(res: [u32; 3], x: u32, y: u32, z: u32) -> usize {
        x as usize + y as usize * res[0] as usize + z as usize * res[0] as usize * res[1] as usize
    }

    pub fn bounds(&self) -> &Aabb {
        &self.bounds
    }

    pub fn resolution(&self) -> [u32; 3] {
        self.res
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }

    pub fn intersect(&self, ray: &Ray) -> Option<BoxHit> {
        self.bounds.intersect(ray)
    }

    // normalized density of a voxel, zero outside the grid
    pub fn voxel(&self, x: i64, y: i64, z: i64) -> f32 {
        let in_range = |v: i64, r: u32| v >= 0 && v < r as i64;
        if in_range(x, self.res[0]) && in_range(y, self.res[1]) && in_range(z, self.res[2]) {
            self.data[Self::index(self.res, x as u32, y as u32, z as u32)] as f32 / 255.0
        } else {
            0.0
        }
    }

    /// Trilinearly interpolated density at a world position.
    ///
    /// Voxel values sit at voxel centres, like a GPU 3D texture, and lookups outside the
    /// grid read as zero density rather than being clamped to the border.
    pub fn sample_density(&self, pos: &Point3<f32>) -> f32 {
        let norm_pos = self.bounds.normalized_position(pos);
        let tex = [0, 1, 2].map(|i| norm_pos[i] * self.res[i] as f32 - 0.5);
        let lo = tex.map(|t| t.floor());
        let hi = tex.map(|t| t.ceil() as i64);
        let (x, y, z) = (
            [lo[0] as i64, hi[0]],
            [lo[1] as i64, hi[1]],
            [lo[2] as i64, hi[2]],
        );

        let mut corners = [[[0.0f32; 2]; 2]; 2];
        for (k, plane) in corners.iter_mut().enumerate() {
            for (j, row) in plane.iter_mut().enumerate() {
                for (i, c) in row.iter_mut().enumerate() {
                    *c = self.voxel(x[i], y[j], z[k]);
                }
            }
        }
        utils::lerp3d(
            corners,
            tex[0] - lo[0],
            tex[1] - lo[1],
            tex[2] - lo[2],
        )
    }

    pub fn write_to<W: Write>(&self, writer: &mut W) -> Result<()> {
        write_resolution(writer, self.res)?;
        writer.write_all(&self.data)?;
        Ok(())
    }

    pub fn read_from<R: Read>(bounds: Aabb, reader: &mut R) -> Result<DensityField> {
        let res = read_resolution(reader)?;
        let data = read_payload(reader, voxel_count(res)?)?;
        DensityField::new(bounds, res, data)
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        let mut writer = BufWriter::new(File::create(path)?);
        self.write_to(&mut writer)?;
        writer.flush()?;
        log::info!("wrote density grid to {}", path.display());
        Ok(())
    }

    pub fn load(bounds: Aabb, path: &Path) -> Result<DensityField> {
        if !path.exists() {
            return Err(Error::FileNotFound(path.to_path_buf()));
        }
        let mut reader = BufReader::new(File::open(path)?);
        let field = DensityField::read_from(bounds, &mut reader)?;
        log::info!(
            "loaded {:?} density grid from {}",
            field.res,
            path.display()
        );
        Ok(field)
    }

    /// Loads the grid cached at `path`. A missing file, or one holding another
    /// resolution, is replaced by a freshly generated grid.
    pub fn load_or_generate(
        bounds: Aabb,
        path: &Path,
        res: [u32; 3],
        params: &NoiseParams,
    ) -> Result<DensityField> {
        if path.exists() {
            let field = DensityField::load(bounds, path)?;
            if field.res == res {
                return Ok(field);
            }
            log::warn!(
                "{} holds a {:?} grid instead of {:?}, regenerating",
                path.display(),
                field.res,
                res
            );
        }
        let field = DensityField::generate(bounds, res, params)?;
        field.save(path)?;
        Ok(field)
    }
}

#[cfg(test)]
mod tests {
    use std::io::Cursor;

    use super::*;

    fn unit_bounds() -> Aabb {
        Aabb::new(Point3::new(0.0, 0.0, 0.0), Point3::new(1.0, 1.0, 1.0))
    }

    fn params() -> NoiseParams {
        NoiseParams {
            frequency: 4.0,
            amplitude: 1.0,
            octaves: 6,
            seed: 3,
        }
    }

    #[test]
    fn test_generate_is_normalized() {
        let field = DensityField::generate(unit_bounds(), [8, 6, 4], &params()).unwrap();
        assert_eq!(field.data().len(), 8 * 6 * 4);
        assert_eq!(*field.data().iter().max().unwrap(), 255);
    }

    #[test]
    fn test_generate_is_deterministic() {
        let a = DensityField::generate(unit_bounds(), [5, 5, 5], &params()).unwrap();
        let b = DensityField::generate(unit_bounds(), [5, 5, 5], &params()).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_round_trip_is_bit_exact() {
        let field = DensityField::generate(unit_bounds(), [7, 3, 5], &params()).unwrap();
        let mut bytes = vec![];
        field.write_to(&mut bytes).unwrap();
        assert_eq!(bytes.len(), 12 + 7 * 3 * 5);
        let read = DensityField::read_from(unit_bounds(), &mut Cursor::new(bytes)).unwrap();
        assert_eq!(read.resolution(), [7, 3, 5]);
        assert_eq!(read.data(), field.data());
    }

    #[test]
    fn test_save_and_load_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("df.3dt");
        let field = DensityField::generate(unit_bounds(), [4, 4, 4], &params()).unwrap();
        field.save(&path).unwrap();
        let loaded = DensityField::load(unit_bounds(), &path).unwrap();
        assert_eq!(loaded, field);
    }

    #[test]
    fn test_truncated_file_is_rejected() {
        let field = DensityField::new(unit_bounds(), [2, 2, 2], vec![1; 8]).unwrap();
        let mut bytes = vec![];
        field.write_to(&mut bytes).unwrap();
        bytes.truncate(bytes.len() - 1);
        let err = DensityField::read_from(unit_bounds(), &mut Cursor::new(bytes)).unwrap_err();
        assert!(matches!(err, Error::InvalidDensityFile(_)));

        let mut bad_header = vec![];
        write_resolution(&mut bad_header, [2, 2, 2]).unwrap();
        bad_header[4..8].copy_from_slice(&(-1i32).to_le_bytes());
        let err = DensityField::read_from(unit_bounds(), &mut Cursor::new(bad_header)).unwrap_err();
        assert!(matches!(err, Error::InvalidDensityFile(_)));
    }

    #[test]
    fn test_oversized_header_without_data() {
        let mut bytes = vec![];
        write_resolution(&mut bytes, [i32::MAX as u32, i32::MAX as u32, 2]).unwrap();
        bytes.extend_from_slice(&[7; 16]);
        let err = DensityField::read_from(unit_bounds(), &mut Cursor::new(bytes)).unwrap_err();
        assert!(matches!(err, Error::InvalidDensityFile(_)));
    }

    #[test]
    fn test_load_or_generate_reuses_matching_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("density.3dd");

        let generated =
            DensityField::load_or_generate(unit_bounds(), &path, [4, 4, 4], &params()).unwrap();
        assert!(path.exists());

        // a hand-written grid at the same path is picked up as is
        let cached = DensityField::new(unit_bounds(), [4, 4, 4], vec![9; 64]).unwrap();
        cached.save(&path).unwrap();
        let loaded =
            DensityField::load_or_generate(unit_bounds(), &path, [4, 4, 4], &params()).unwrap();
        assert_eq!(loaded, cached);

        // another resolution regenerates and overwrites the file
        let small = DensityField::new(unit_bounds(), [2, 2, 2], vec![1; 8]).unwrap();
        small.save(&path).unwrap();
        let regenerated =
            DensityField::load_or_generate(unit_bounds(), &path, [4, 4, 4], &params()).unwrap();
        assert_eq!(regenerated, generated);
        assert_eq!(DensityField::load(unit_bounds(), &path).unwrap(), generated);
    }

    #[test]
    fn test_missing_file() {
        let err = DensityField::load(unit_bounds(), Path::new("/nonexistent/df.3dt")).unwrap_err();
        assert!(matches!(err, Error::FileNotFound(_)));
    }

    #[test]
    fn test_sampling_at_voxel_centres() {
        // 2x1x1 grid: left voxel 0, right voxel 1
        let bounds = Aabb::new(Point3::new(0.0, 0.0, 0.0), Point3::new(2.0, 1.0, 1.0));
        let field = DensityField::new(bounds, [2, 1, 1], vec![0, 255]).unwrap();
        assert!((field.sample_density(&Point3::new(1.5, 0.5, 0.5)) - 1.0).abs() < 1e-6);
        assert!(field.sample_density(&Point3::new(0.5, 0.5, 0.5)).abs() < 1e-6);
        // halfway between the centres
        assert!((field.sample_density(&Point3::new(1.0, 0.5, 0.5)) - 0.5).abs() < 1e-6);
    }

    #[test]
    fn test_sampling_pads_with_zero() {
        let field = DensityField::new(unit_bounds(), [1, 1, 1], vec![255]).unwrap();
        assert!((field.sample_density(&Point3::new(0.5, 0.5, 0.5)) - 1.0).abs() < 1e-6);
        // at the face the neighbour outside the grid contributes zero
        assert!((field.sample_density(&Point3::new(1.0, 0.5, 0.5)) - 0.5).abs() < 1e-6);
        assert!((field.sample_density(&Point3::new(1.0, 1.0, 1.0)) - 0.125).abs() < 1e-6);
        assert_eq!(field.sample_density(&Point3::new(5.0, 5.0, 5.0)), 0.0);
    }

    #[test]
    fn test_new_rejects_wrong_size() {
        assert!(DensityField::new(unit_bounds(), [2, 2, 2], vec![0; 7]).is_err());
        assert!(DensityField::new(unit_bounds(), [0, 2, 2], vec![]).is_err());
    }
}
