use nalgebra::{Point3, Vector3};

pub trait PointLight {
    fn position(&self) -> Point3<f32>;
    fn intensity(&self) -> Vector3<f32>;
    fn set_position(&mut self, position: Point3<f32>);
    fn set_intensity(&mut self, intensity: Vector3<f32>);
}

/// The light source the photon tracer shoots paths from.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct PrimaryLight {
    pub position: Point3<f32>,
    pub intensity: Vector3<f32>,
}

impl PrimaryLight {
    pub fn new(position: Point3<f32>, intensity: Vector3<f32>) -> PrimaryLight {
        PrimaryLight {
            position,
            intensity,
        }
    }
}

impl PointLight for PrimaryLight {
    fn position(&self) -> Point3<f32> {
        self.position
    }

    fn intensity(&self) -> Vector3<f32> {
        self.intensity
    }

    fn set_position(&mut self, position: Point3<f32>) {
        self.position = position;
    }

    fn set_intensity(&mut self, intensity: Vector3<f32>) {
        self.intensity = intensity;
    }
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub enum VplKind {
    // scattering event inside the fog
    Medium {
        sca_k: f32,
    },
    // reflection off a surface, with the BRDF at that point
    Surface {
        normal: Vector3<f32>,
        k_d: Vector3<f32>,
        k_s: Vector3<f32>,
        n_s: f32,
    },
}

/// Virtual point light left behind by a photon path.
///
/// `intensity` already includes the path's sampling weights, so the contributions of
/// all VPLs in an array can be summed directly.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Vpl {
    // index of the path that created this light
    pub path_id: u32,
    pub position: Point3<f32>,
    // direction towards where the light came from
    pub incident: Vector3<f32>,
    pub intensity: Vector3<f32>,
    pub kind: VplKind,
}

impl Vpl {
    pub fn in_medium(
        path_id: u32,
        position: Point3<f32>,
        incident: Vector3<f32>,
        intensity: Vector3<f32>,
        sca_k: f32,
    ) -> Vpl {
        Vpl {
            path_id,
            position,
            incident,
            intensity,
            kind: VplKind::Medium { sca_k },
        }
    }

    pub fn on_surface(
        path_id: u32,
        position: Point3<f32>,
        incident: Vector3<f32>,
        intensity: Vector3<f32>,
        normal: Vector3<f32>,
        k_d: Vector3<f32>,
        k_s: Vector3<f32>,
        n_s: f32,
    ) -> Vpl {
        Vpl {
            path_id,
            position,
            incident,
            intensity,
            kind: VplKind::Surface {
                normal,
                k_d,
                k_s,
                n_s,
            },
        }
    }

    pub fn is_in_medium(&self) -> bool {
        matches!(self.kind, VplKind::Medium { .. })
    }
}

impl PointLight for Vpl {
    fn position(&self) -> Point3<f32> {
        self.position
    }

    fn intensity(&self) -> Vector3<f32> {
        self.intensity
    }

    fn set_position(&mut self, position: Point3<f32>) {
        self.position = position;
    }

    fn set_intensity(&mut self, intensity: Vector3<f32>) {
        self.intensity = intensity;
    }
}
