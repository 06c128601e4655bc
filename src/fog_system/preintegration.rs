//! Optical depth of the fog along every primary ray of a camera.
//!
//! The result is a camera-space grid with the sensor resolution in x and y and the
//! density grid's z resolution in depth. Each depth slice holds the optical depth
//! accumulated from the camera up to the middle of that slice, clamped at the first
//! opaque surface.

use std::{
    fs::File,
    io::{BufReader, BufWriter, Read, Write},
    path::Path,
    sync::{Arc, mpsc},
};

use byteorder::{ByteOrder, LittleEndian, WriteBytesExt};
use image::{GrayImage, Luma};
use threadpool::ThreadPool;

use super::density_field::{self, DensityField};
use crate::{
    camera::PerspectiveCamera,
    error::{Error, Result},
    raytrace_system::scene::SurfaceScene,
};

// rows of pixels handed to one worker at a time
pub const BLOCK_ROWS: u32 = 8;

// integration sub-steps per depth slice
const STEPS_PER_SLICE: u32 = 4;

#[derive(Clone, Debug, PartialEq)]
pub struct PreintegratedDensity {
    res: [u32; 3],
    data: Vec<f32>,
}

// optical depth at the middle of each depth slice along one primary ray
fn integrate_column(
    field: &DensityField,
    camera: &PerspectiveCamera,
    surfaces: &SurfaceScene,
    x: u32,
    y: u32,
    n_slices: u32,
) -> Vec<f32> {
    let mut column = vec![0.0; n_slices as usize];
    let mut ray = camera.primary_ray(x as f32 + 0.5, y as f32 + 0.5);
    let Some(fog_hit) = field.intersect(&ray) else {
        return column;
    };
    // distance to the geometry
    surfaces.trace(&mut ray, false);

    let t_min = fog_hit.entry.max(0.0);
    let t_max = fog_hit.exit.min(ray.hit.distance);
    let n_intervals = n_slices * STEPS_PER_SLICE;
    let dt = ((t_max - t_min) / n_intervals as f32).max(0.0);

    let mut prev_dens = field.sample_density(&ray.point_at(t_min));
    let mut dens = 0.0;
    for i in 1..=n_intervals {
        let curr_dens = field.sample_density(&ray.point_at(t_min + i as f32 * dt));
        // trapezoidal rule
        dens += 0.5 * (curr_dens + prev_dens);
        prev_dens = curr_dens;
        if i % STEPS_PER_SLICE == STEPS_PER_SLICE / 2 {
            column[(i / STEPS_PER_SLICE) as usize] = dens * dt;
        }
    }
    column
}

impl PreintegratedDensity {
    pub fn new(res: [u32; 3], data: Vec<f32>) -> Result<PreintegratedDensity> {
        let expected = density_field::voxel_count(res)?;
        if res.iter().any(|&r| r == 0) || data.len() != expected {
            return Err(Error::InvalidDensityFile(format!(
                "preintegrated grid {:?} does not match {} values",
                res,
                data.len()
            )));
        }
        Ok(PreintegratedDensity { res, data })
    }

    /// Integrates the density along the primary ray through the centre of every pixel.
    ///
    /// Blocks of rows run on `pool` and send their columns back over a channel; the
    /// grid is only written on the calling thread.
    pub fn compute(
        field: &DensityField,
        camera: &PerspectiveCamera,
        surfaces: &Arc<SurfaceScene>,
        pool: &ThreadPool,
    ) -> Result<PreintegratedDensity> {
        let [res_x, res_y] = camera.resolution();
        let res = [res_x, res_y, field.resolution()[2]];
        let mut data = vec![0.0f32; density_field::voxel_count(res)?];
        log::info!("preintegrating fog density for a {res_x}x{res_y} camera");

        let field = Arc::new(field.clone());
        let camera = Arc::new(camera.clone());
        let (tx, rx) = mpsc::channel();
        let mut n_blocks = 0;
        for y_start in (0..res_y).step_by(BLOCK_ROWS as usize) {
            let y_end = (y_start + BLOCK_ROWS).min(res_y);
            let field = field.clone();
            let camera = camera.clone();
            let surfaces = surfaces.clone();
            let tx = tx.clone();
            pool.execute(move || {
                let mut columns = Vec::with_capacity(((y_end - y_start) * res_x) as usize);
                for y in y_start..y_end {
                    for x in 0..res_x {
                        columns.push(integrate_column(&field, &camera, &surfaces, x, y, res[2]));
                    }
                }
                let _ = tx.send((y_start, columns));
            });
            n_blocks += 1;
        }
        drop(tx);

        let slice_len = (res_x * res_y) as usize;
        let mut received = 0;
        for (y_start, columns) in rx {
            for (i, column) in columns.into_iter().enumerate() {
                let pixel = y_start as usize * res_x as usize + i;
                for (z, value) in column.into_iter().enumerate() {
                    data[pixel + z * slice_len] = value;
                }
            }
            received += 1;
        }
        if received != n_blocks {
            return Err(Error::WorkerFailed(format!(
                "preintegration lost {} of {} row blocks",
                n_blocks - received,
                n_blocks
            )));
        }

        PreintegratedDensity::new(res, data)
    }

    pub fn resolution(&self) -> [u32; 3] {
        self.res
    }

    pub fn data(&self) -> &[f32] {
        &self.data
    }

    pub fn value(&self, x: u32, y: u32, z: u32) -> f32 {
        let [res_x, res_y, _] = self.res;
        self.data[x as usize + y as usize * res_x as usize + z as usize * (res_x * res_y) as usize]
    }

    /// Renders one depth slice as a grayscale image scaled to the slice maximum.
    ///
    /// The sensor's bottom row ends up at the bottom of the image.
    pub fn slice_image(&self, z: u32) -> GrayImage {
        let [res_x, res_y, _] = self.res;
        let z = z.min(self.res[2] - 1);
        let max = (0..res_y)
            .flat_map(|y| (0..res_x).map(move |x| (x, y)))
            .map(|(x, y)| self.value(x, y, z))
            .fold(0.0f32, f32::max);
        let scale = if max > 0.0 { 255.0 / max } else { 0.0 };
        GrayImage::from_fn(res_x, res_y, |x, y| {
            Luma([(self.value(x, res_y - 1 - y, z) * scale).round() as u8])
        })
    }

    pub fn write_to<W: Write>(&self, writer: &mut W) -> Result<()> {
        density_field::write_resolution(writer, self.res)?;
        for &v in &self.data {
            writer.write_f32::<LittleEndian>(v)?;
        }
        Ok(())
    }

    pub fn read_from<R: Read>(reader: &mut R) -> Result<PreintegratedDensity> {
        let res = density_field::read_resolution(reader)?;
        let n_values = density_field::voxel_count(res)?;
        let n_bytes = n_values.checked_mul(4).ok_or_else(|| {
            Error::InvalidDensityFile(format!("resolution {res:?} is too large"))
        })?;
        let bytes = density_field::read_payload(reader, n_bytes)?;
        let mut data = vec![0.0f32; n_values];
        LittleEndian::read_f32_into(&bytes, &mut data);
        PreintegratedDensity::new(res, data)
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        let mut writer = BufWriter::new(File::create(path)?);
        self.write_to(&mut writer)?;
        writer.flush()?;
        log::info!("wrote preintegrated density to {}", path.display());
        Ok(())
    }

    pub fn load(path: &Path) -> Result<PreintegratedDensity> {
        if !path.exists() {
            return Err(Error::FileNotFound(path.to_path_buf()));
        }
        let mut reader = BufReader::new(File::open(path)?);
        PreintegratedDensity::read_from(&mut reader)
    }

    /// Loads the grid cached at `path` when it was made for this camera resolution and
    /// field depth. Otherwise the grid is computed and written to `path`.
    pub fn load_or_compute(
        path: &Path,
        field: &DensityField,
        camera: &PerspectiveCamera,
        surfaces: &Arc<SurfaceScene>,
        pool: &ThreadPool,
    ) -> Result<PreintegratedDensity> {
        let [res_x, res_y] = camera.resolution();
        let res = [res_x, res_y, field.resolution()[2]];
        if path.exists() {
            let cached = PreintegratedDensity::load(path)?;
            if cached.res == res {
                log::info!(
                    "loaded {:?} preintegrated density from {}",
                    res,
                    path.display()
                );
                return Ok(cached);
            }
            log::warn!(
                "{} holds a {:?} grid instead of {:?}, recomputing",
                path.display(),
                cached.res,
                res
            );
        }
        let preintegrated = PreintegratedDensity::compute(field, camera, surfaces, pool)?;
        preintegrated.save(path)?;
        Ok(preintegrated)
    }
}
