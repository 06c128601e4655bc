use std::ops::Index;

use nalgebra::Vector3;

use super::point_light::{PointLight, Vpl};
use crate::error::{Error, Result};

/// Fixed capacity list of point lights.
#[derive(Clone, Debug)]
pub struct LightArray<PL: PointLight> {
    lights: Vec<PL>,
    capacity: usize,
}

impl<PL: PointLight> LightArray<PL> {
    pub fn new(capacity: usize) -> LightArray<PL> {
        LightArray {
            lights: Vec::with_capacity(capacity),
            capacity,
        }
    }

    pub fn len(&self) -> usize {
        self.lights.len()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn is_empty(&self) -> bool {
        self.lights.is_empty()
    }

    pub fn is_full(&self) -> bool {
        self.lights.len() >= self.capacity
    }

    pub fn get(&self, index: usize) -> Option<&PL> {
        self.lights.get(index)
    }

    pub fn clear(&mut self) {
        self.lights.clear();
    }

    pub fn add_light(&mut self, light: PL) -> Result<()> {
        if self.is_full() {
            return Err(Error::LightArrayFull {
                capacity: self.capacity,
            });
        }
        self.lights.push(light);
        Ok(())
    }

    pub fn iter(&self) -> std::slice::Iter<'_, PL> {
        self.lights.iter()
    }

    // summed intensity of all lights
    pub fn total_intensity(&self) -> Vector3<f32> {
        self.lights
            .iter()
            .fold(Vector3::zeros(), |acc, l| acc + l.intensity())
    }
}

impl<PL: PointLight> Index<usize> for LightArray<PL> {
    type Output = PL;

    fn index(&self, index: usize) -> &PL {
        &self.lights[index]
    }
}

impl<'a, PL: PointLight> IntoIterator for &'a LightArray<PL> {
    type Item = &'a PL;
    type IntoIter = std::slice::Iter<'a, PL>;

    fn into_iter(self) -> Self::IntoIter {
        self.lights.iter()
    }
}

impl LightArray<Vpl> {
    /// Divides every intensity by the number of traced paths and renumbers path ids so
    /// they run from 0 without gaps, keeping VPLs of one path together.
    pub fn normalize_intensity(&mut self, n_paths: u32) {
        let Some(first) = self.lights.first() else {
            return;
        };
        let inv_n_paths = 1.0 / n_paths.max(1) as f32;
        let mut old_path_id = first.path_id;
        let mut new_path_id = 0;
        for vpl in self.lights.iter_mut() {
            if vpl.path_id != old_path_id {
                old_path_id = vpl.path_id;
                new_path_id += 1;
            }
            vpl.path_id = new_path_id;
            vpl.intensity *= inv_n_paths;
        }
    }
}
